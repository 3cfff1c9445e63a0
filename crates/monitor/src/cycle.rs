//! Monitor cycle: one balance check with bounded token refresh
//!
//! A cycle resolves a token, fetches the balance, and on auth expiry
//! performs at most one login refresh followed by exactly one retried
//! fetch. Every cycle reaches a terminal `CheckOutcome`; failures never
//! escape as panics or abort the scheduler.
//!
//! Exclusivity: cycles serialize on an internal mutex. Scheduled ticks
//! wait for the lock; a manual trigger uses `try_lock` and reports
//! `CheckInProgress` instead of starting an overlapping cycle.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use meter_api::{BalanceReading, CredentialStore, fetch_balance, login};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{BalanceEvent, classify_transition};
use crate::store::MonitorStore;

/// Terminal classification of one monitoring cycle.
#[derive(Debug)]
pub enum CheckOutcome {
    /// Balance fetched with the stored token.
    Success(BalanceReading),
    /// Token was refreshed during the cycle, then the fetch succeeded.
    AuthRefreshed(BalanceReading),
    /// No token stored and refresh disabled or credentials incomplete.
    NoCredentials,
    /// Token rejected and no refresh was possible (or the retried fetch
    /// was rejected again).
    AuthExpired,
    /// The login refresh itself failed; the previous token is untouched.
    AuthRefreshFailed(String),
    /// Non-auth failure (network, portal, parse). State untouched.
    Failure(String),
}

impl CheckOutcome {
    /// The reading, when the cycle produced one.
    pub fn reading(&self) -> Option<&BalanceReading> {
        match self {
            CheckOutcome::Success(r) | CheckOutcome::AuthRefreshed(r) => Some(r),
            _ => None,
        }
    }

    /// Whether this outcome requires operator attention to credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            CheckOutcome::NoCredentials
                | CheckOutcome::AuthExpired
                | CheckOutcome::AuthRefreshFailed(_)
        )
    }

    /// Stable label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Success(_) => "success",
            CheckOutcome::AuthRefreshed(_) => "auth_refreshed",
            CheckOutcome::NoCredentials => "no_credentials",
            CheckOutcome::AuthExpired => "auth_expired",
            CheckOutcome::AuthRefreshFailed(_) => "auth_refresh_failed",
            CheckOutcome::Failure(_) => "failure",
        }
    }
}

/// Result of one cycle: the terminal outcome plus the classified event,
/// if the transition produced one.
#[derive(Debug)]
pub struct CycleReport {
    pub outcome: CheckOutcome,
    pub event: Option<BalanceEvent>,
}

impl CycleReport {
    fn terminal(outcome: CheckOutcome) -> Self {
        Self {
            outcome,
            event: None,
        }
    }
}

/// The monitoring engine: owns the portal endpoints, the credential
/// store, the persisted monitor record, and the cycle exclusivity marker.
pub struct Engine {
    http: reqwest::Client,
    balance_url: String,
    login_url: String,
    credentials: Arc<CredentialStore>,
    store: Arc<MonitorStore>,
    cycle_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        http: reqwest::Client,
        balance_url: String,
        login_url: String,
        credentials: Arc<CredentialStore>,
        store: Arc<MonitorStore>,
    ) -> Self {
        Self {
            http,
            balance_url,
            login_url,
            credentials,
            store,
            cycle_lock: Mutex::new(()),
        }
    }

    /// The persisted monitor record (config, state, subscriptions).
    pub fn store(&self) -> &Arc<MonitorStore> {
        &self.store
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Run one cycle, waiting for any in-flight cycle to finish first.
    /// Used by the scheduler.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        self.timed_cycle().await
    }

    /// Run one cycle on demand, refusing to overlap an in-flight cycle.
    pub async fn check_now(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.try_lock().map_err(|_| Error::CheckInProgress)?;
        Ok(self.timed_cycle().await)
    }

    /// Run the cycle under the held lock and record its metrics.
    async fn timed_cycle(&self) -> CycleReport {
        let started = std::time::Instant::now();
        let report = self.cycle().await;
        metrics::counter!("monitor_cycles_total", "outcome" => report.outcome.label())
            .increment(1);
        metrics::histogram!("monitor_cycle_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if let Some(reading) = report.outcome.reading() {
            metrics::gauge!("monitor_last_balance").set(reading.balance);
        }
        report
    }

    /// One check: resolve token, fetch, refresh-once-retry-once, classify.
    async fn cycle(&self) -> CycleReport {
        let config = self.store.config().await;
        let mut refreshed = false;

        let token = match self.credentials.token().await {
            Some(t) => t,
            None => {
                if !config.auto_refresh_token || !self.credentials.refresh_possible() {
                    debug!("no token stored and refresh unavailable");
                    return CycleReport::terminal(CheckOutcome::NoCredentials);
                }
                // Bootstrap login counts as this cycle's one refresh.
                match self.refresh_token().await {
                    Ok(t) => {
                        refreshed = true;
                        t
                    }
                    Err(e) => {
                        return CycleReport::terminal(CheckOutcome::AuthRefreshFailed(
                            e.to_string(),
                        ));
                    }
                }
            }
        };

        let reading = match fetch_balance(&self.http, &self.balance_url, &token).await {
            Ok(r) => r,
            Err(meter_api::Error::AuthExpired) => {
                if refreshed || !config.auto_refresh_token || !self.credentials.refresh_possible()
                {
                    return CycleReport::terminal(CheckOutcome::AuthExpired);
                }
                let new_token = match self.refresh_token().await {
                    Ok(t) => t,
                    Err(e) => {
                        return CycleReport::terminal(CheckOutcome::AuthRefreshFailed(
                            e.to_string(),
                        ));
                    }
                };
                refreshed = true;
                match fetch_balance(&self.http, &self.balance_url, &new_token).await {
                    Ok(r) => r,
                    Err(meter_api::Error::AuthExpired) => {
                        return CycleReport::terminal(CheckOutcome::AuthExpired);
                    }
                    Err(e) => {
                        return CycleReport::terminal(CheckOutcome::Failure(e.to_string()));
                    }
                }
            }
            Err(e) => return CycleReport::terminal(CheckOutcome::Failure(e.to_string())),
        };

        let prev = self.store.state().await.last_balance;
        let event = classify_transition(prev, reading.balance, config.threshold);
        if let Err(e) = self.store.record_check(reading.balance, unix_now()).await {
            warn!(error = %e, "failed to persist monitor state");
        }

        info!(
            balance = reading.balance,
            prev = ?prev,
            event = ?event,
            refreshed,
            "cycle completed"
        );

        let outcome = if refreshed {
            CheckOutcome::AuthRefreshed(reading)
        } else {
            CheckOutcome::Success(reading)
        };
        CycleReport { outcome, event }
    }

    /// Log in once and replace the stored token. A persist failure keeps
    /// the new token in memory so the cycle can still proceed.
    async fn refresh_token(&self) -> meter_api::Result<String> {
        let (Some(account), Some(password)) =
            (self.credentials.account(), self.credentials.password())
        else {
            return Err(meter_api::Error::InvalidCredentials(
                "account/password not configured".into(),
            ));
        };

        let token = login(&self.http, &self.login_url, account, password).await?;
        if let Err(e) = self.credentials.replace_token(token.clone()).await {
            warn!(error = %e, "failed to persist refreshed token");
        }
        info!("session token refreshed");
        Ok(token)
    }
}

/// Current unix timestamp in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BalanceEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock portal: balance endpoint accepts one token, login issues a
    /// fresh one, and both count their hits.
    struct MockPortal {
        base: String,
        balance_hits: Arc<AtomicUsize>,
        login_hits: Arc<AtomicUsize>,
    }

    /// Start a mock portal on an ephemeral port.
    ///
    /// `valid_token`: the only token the balance endpoint accepts; any
    /// other cookie gets the portal's login-expired payload.
    /// `login_ok`: whether the login endpoint accepts credentials and
    /// issues `valid_token` via Set-Cookie.
    /// `balance`: the balance reported on an accepted fetch.
    async fn start_portal(valid_token: &'static str, login_ok: bool, balance: f64) -> MockPortal {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let balance_hits = Arc::new(AtomicUsize::new(0));
        let login_hits = Arc::new(AtomicUsize::new(0));

        let bh = balance_hits.clone();
        let lh = login_hits.clone();
        tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/devices",
                    axum::routing::post(move |headers: axum::http::HeaderMap| {
                        let bh = bh.clone();
                        async move {
                            bh.fetch_add(1, Ordering::SeqCst);
                            let cookie = headers
                                .get(axum::http::header::COOKIE)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("");
                            let body = if cookie.contains(valid_token) {
                                format!(
                                    r#"{{"Tag":1,"Data":{{"RoomName":"A-101","DevicesList":[{{"DeviceType":1,"DeviceBalance":{balance},"IsOnline":1,"SwitchStatus":1,"UpdateTime":"2026-08-01 10:00"}}]}}}}"#
                                )
                            } else {
                                r#"{"Tag":0,"Message":"login expired"}"#.to_string()
                            };
                            (
                                [(axum::http::header::CONTENT_TYPE, "application/json")],
                                body,
                            )
                        }
                    }),
                )
                .route(
                    "/login",
                    axum::routing::post(move || {
                        let lh = lh.clone();
                        async move {
                            lh.fetch_add(1, Ordering::SeqCst);
                            if login_ok {
                                axum::response::Response::builder()
                                    .header(
                                        axum::http::header::SET_COOKIE,
                                        format!("AppUserToken={valid_token}; Path=/"),
                                    )
                                    .header(axum::http::header::CONTENT_TYPE, "application/json")
                                    .body(axum::body::Body::from(r#"{"Tag":1}"#))
                                    .unwrap()
                            } else {
                                axum::response::Response::builder()
                                    .header(axum::http::header::CONTENT_TYPE, "application/json")
                                    .body(axum::body::Body::from(
                                        r#"{"Tag":0,"Message":"wrong password"}"#,
                                    ))
                                    .unwrap()
                            }
                        }
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });

        MockPortal {
            base: format!("http://{addr}"),
            balance_hits,
            login_hits,
        }
    }

    async fn test_engine(
        portal: &MockPortal,
        dir: &tempfile::TempDir,
        token: Option<&str>,
        with_login_credentials: bool,
    ) -> Engine {
        let credentials = CredentialStore::load(
            dir.path().join("token.json"),
            with_login_credentials.then(|| "acct".to_string()),
            with_login_credentials.then(|| common::Secret::new("pw".to_string())),
        )
        .await
        .unwrap();
        if let Some(token) = token {
            credentials.replace_token(token.to_string()).await.unwrap();
        }

        let store = MonitorStore::load(dir.path().join("state.json"))
            .await
            .unwrap();

        Engine::new(
            reqwest::Client::new(),
            format!("{}/devices", portal.base),
            format!("{}/login", portal.base),
            Arc::new(credentials),
            Arc::new(store),
        )
    }

    #[tokio::test]
    async fn first_success_seeds_baseline_without_event() {
        let portal = start_portal("tk_good", true, 42.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, Some("tk_good"), false).await;

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CheckOutcome::Success(_)));
        assert!(report.event.is_none());

        let state = engine.store().state().await;
        assert_eq!(state.last_balance, Some(42.0));
        assert!(state.last_check_ts.is_some());
    }

    #[tokio::test]
    async fn crossing_produces_low_balance_event() {
        let portal = start_portal("tk_good", true, 25.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, Some("tk_good"), false).await;

        // Seed a baseline above the threshold
        engine.store().record_check(50.0, unix_now()).await.unwrap();

        let report = engine.run_cycle().await;
        assert!(matches!(
            report.event,
            Some(BalanceEvent::LowBalance { balance, threshold })
                if balance == 25.0 && threshold == 30.0
        ));
        assert_eq!(engine.store().state().await.last_balance, Some(25.0));
    }

    #[tokio::test]
    async fn recharge_produces_event_with_delta() {
        let portal = start_portal("tk_good", true, 60.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, Some("tk_good"), false).await;

        engine.store().record_check(20.0, unix_now()).await.unwrap();

        let report = engine.run_cycle().await;
        assert!(matches!(
            report.event,
            Some(BalanceEvent::Recharge { delta, balance })
                if delta == 40.0 && balance == 60.0
        ));
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_and_retries_once() {
        let portal = start_portal("tk_fresh", true, 33.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, Some("tk_stale"), true).await;

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CheckOutcome::AuthRefreshed(ref r) if r.balance == 33.0));

        // Exactly one login, exactly two fetches (original + retry)
        assert_eq!(portal.login_hits.load(Ordering::SeqCst), 1);
        assert_eq!(portal.balance_hits.load(Ordering::SeqCst), 2);

        // The new token was persisted over the old one
        assert_eq!(
            engine.credentials().token().await.as_deref(),
            Some("tk_fresh")
        );
    }

    #[tokio::test]
    async fn refresh_failure_leaves_state_and_token_untouched() {
        let portal = start_portal("tk_fresh", false, 33.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, Some("tk_stale"), true).await;

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CheckOutcome::AuthRefreshFailed(_)));
        assert!(report.event.is_none());

        assert_eq!(portal.login_hits.load(Ordering::SeqCst), 1);
        assert!(engine.store().state().await.last_balance.is_none());
        assert_eq!(
            engine.credentials().token().await.as_deref(),
            Some("tk_stale"),
            "previous token must survive a failed refresh"
        );
    }

    #[tokio::test]
    async fn expired_token_without_refresh_credentials_is_auth_expired() {
        let portal = start_portal("tk_fresh", true, 33.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, Some("tk_stale"), false).await;

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CheckOutcome::AuthExpired));
        assert_eq!(portal.login_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_with_auto_refresh_disabled_is_auth_expired() {
        let portal = start_portal("tk_fresh", true, 33.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, Some("tk_stale"), true).await;
        engine.store().set_auto_refresh(false).await.unwrap();

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CheckOutcome::AuthExpired));
        assert_eq!(portal.login_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_token_and_no_credentials_is_no_credentials() {
        let portal = start_portal("tk_fresh", true, 33.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, None, false).await;

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CheckOutcome::NoCredentials));
        assert_eq!(portal.balance_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_token_with_credentials_bootstraps_via_login() {
        let portal = start_portal("tk_fresh", true, 33.0).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&portal, &dir, None, true).await;

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CheckOutcome::AuthRefreshed(_)));
        assert_eq!(portal.login_hits.load(Ordering::SeqCst), 1);
        assert_eq!(portal.balance_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_portal_is_failure_and_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = CredentialStore::load(dir.path().join("token.json"), None, None)
            .await
            .unwrap();
        credentials.replace_token("tk".into()).await.unwrap();
        let store = MonitorStore::load(dir.path().join("state.json"))
            .await
            .unwrap();
        store.record_check(42.0, unix_now()).await.unwrap();

        let engine = Engine::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/devices".into(),
            "http://127.0.0.1:1/login".into(),
            Arc::new(credentials),
            Arc::new(store),
        );

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CheckOutcome::Failure(_)));
        assert_eq!(engine.store().state().await.last_balance, Some(42.0));
    }

    #[tokio::test]
    async fn check_now_reports_busy_while_cycle_in_flight() {
        // A portal that stalls long enough for the second trigger to race
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                (
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    r#"{"Tag":1,"Data":{"RoomName":"A","DevicesList":[{"DeviceType":1,"DeviceBalance":1.0}]}}"#,
                )
            });
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let credentials = CredentialStore::load(dir.path().join("token.json"), None, None)
            .await
            .unwrap();
        credentials.replace_token("tk".into()).await.unwrap();
        let store = MonitorStore::load(dir.path().join("state.json"))
            .await
            .unwrap();

        let engine = Arc::new(Engine::new(
            reqwest::Client::new(),
            format!("http://{addr}/devices"),
            format!("http://{addr}/login"),
            Arc::new(credentials),
            Arc::new(store),
        ));

        let slow = engine.clone();
        let in_flight = tokio::spawn(async move { slow.run_cycle().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let result = engine.check_now().await;
        assert!(matches!(result, Err(Error::CheckInProgress)));

        let report = in_flight.await.unwrap();
        assert!(matches!(report.outcome, CheckOutcome::Success(_)));
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(CheckOutcome::NoCredentials.label(), "no_credentials");
        assert_eq!(CheckOutcome::AuthExpired.label(), "auth_expired");
        assert_eq!(
            CheckOutcome::AuthRefreshFailed("x".into()).label(),
            "auth_refresh_failed"
        );
        assert_eq!(CheckOutcome::Failure("x".into()).label(), "failure");
        assert!(CheckOutcome::NoCredentials.is_auth_failure());
        assert!(!CheckOutcome::Failure("x".into()).is_auth_failure());
    }
}
