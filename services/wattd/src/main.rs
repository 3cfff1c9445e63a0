//! Wattmon service
//!
//! Single-binary Rust service that:
//! 1. Loads portal credentials and the persisted monitor record
//! 2. Runs the scheduler loop for periodic balance checks
//! 3. Accepts chat commands on POST /v1/commands
//! 4. Pushes notifications to subscribers via the configured webhook

mod commands;
mod config;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_adapter::WebhookAdapter;
use meter_api::CredentialStore;
use metrics_exporter_prometheus::PrometheusHandle;
use monitor::notifier::{
    auth_failure_message, event_message, low_balance_message, reading_message,
    transient_failure_message,
};
use monitor::{CheckOutcome, Control, Engine, MonitorStore, Notifier, spawn_scheduler};

use crate::commands::Command;
use crate::config::Config;

/// How long to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    notifier: Arc<Notifier>,
    control: mpsc::Sender<Control>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Inbound command from the chat adapter.
#[derive(Debug, Deserialize)]
struct CommandRequest {
    session_id: String,
    text: String,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/commands", post(commands_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting wattd");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.service.listen_addr,
        balance_url = %config.portal.balance_url,
        has_account = config.portal.account.is_some(),
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.portal.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let credentials = Arc::new(
        CredentialStore::load(
            config.service.token_file.clone(),
            config.portal.account.clone(),
            config.portal.password.clone(),
        )
        .await
        .context("failed to load credential store")?,
    );

    let store = Arc::new(
        MonitorStore::load(config.service.state_file.clone())
            .await
            .context("failed to load monitor state")?,
    );

    let engine = Arc::new(Engine::new(
        http.clone(),
        config.portal.balance_url.clone(),
        config.portal.login_url.clone(),
        credentials,
        store,
    ));

    let adapter = Arc::new(WebhookAdapter::new(
        http,
        config.service.webhook_url.clone(),
    ));
    let notifier = Arc::new(Notifier::new(adapter));

    let (scheduler_handle, control) = spawn_scheduler(engine.clone(), notifier.clone());

    let app_state = AppState {
        engine,
        notifier,
        control: control.clone(),
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.service.max_connections);

    let listener = TcpListener::bind(config.service.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.service.listen_addr))?;

    info!(addr = %config.service.listen_addr, "accepting requests");

    // Graceful shutdown: stop accepting, drain in-flight requests with a
    // deadline, then stop the scheduler.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());
    let _ = control.send(Control::Shutdown).await;

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    if tokio::time::timeout(Duration::from_secs(5), scheduler_handle)
        .await
        .is_err()
    {
        warn!("scheduler did not stop in time");
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: JSON with monitor config, state, and subscriber count.
/// Returns 200 when the engine can check (token present or refresh
/// possible), 503 when no credentials are configured at all.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let store = state.engine.store();
    let config = store.config().await;
    let monitor_state = store.state().await;
    let subscribers = store.subscriber_count().await;

    let credentials = state.engine.credentials();
    let can_check = credentials.token().await.is_some() || credentials.refresh_possible();

    let (status_code, status) = if can_check {
        (axum::http::StatusCode::OK, "healthy")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": status,
            "uptime_seconds": uptime,
            "auto_check": config.auto_check,
            "interval_minutes": config.interval_minutes,
            "threshold": config.threshold,
            "subscribers": subscribers,
            "last_balance": monitor_state.last_balance,
            "last_check_ts": monitor_state.last_check_ts,
        })
        .to_string(),
    )
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// POST /v1/commands — the chat adapter delivers one user command and
/// receives the rendered reply text.
async fn commands_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CommandRequest>,
) -> impl IntoResponse {
    let request_id = format!("cmd_{}", uuid::Uuid::new_v4().as_simple());
    info!(request_id, session = %body.session_id, text = %body.text, "command received");

    let reply = process_command(&state, &body.session_id, &body.text).await;

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "reply": reply }).to_string(),
    )
}

/// Which reply a manual cycle should render.
enum ManualReply {
    /// `balance`: always the full reading
    FullReading,
    /// `check`: a low-balance warning when below the threshold
    ThresholdAware,
}

/// Map a parsed command to an engine operation and render the reply.
/// Invalid input never reaches the engine.
async fn process_command(state: &AppState, session_id: &str, text: &str) -> String {
    let command = match commands::parse(text) {
        Ok(command) => command,
        Err(e) => return e.to_string(),
    };

    let store = state.engine.store();
    match command {
        Command::Help => commands::help_text().to_string(),

        Command::Subscribe => match store.subscribe(session_id).await {
            Ok(true) => "Subscribed to balance notifications.".to_string(),
            Ok(false) => "This session is already subscribed.".to_string(),
            Err(e) => {
                warn!(error = %e, "subscribe failed");
                "Failed to update subscriptions, please try again later.".to_string()
            }
        },

        Command::Unsubscribe => match store.unsubscribe(session_id).await {
            Ok(true) => "Unsubscribed from balance notifications.".to_string(),
            Ok(false) => "This session was not subscribed.".to_string(),
            Err(e) => {
                warn!(error = %e, "unsubscribe failed");
                "Failed to update subscriptions, please try again later.".to_string()
            }
        },

        Command::Status => format_status(state, session_id).await,

        Command::SetThreshold(value) => match store.set_threshold(value).await {
            Ok(()) => format!("Threshold updated to {value:.2}."),
            Err(e) => e.to_string(),
        },

        Command::SetInterval(minutes) => match store.set_interval(minutes).await {
            Ok(()) => {
                // Wake the scheduler so the new interval governs the next tick
                let _ = state.control.try_send(Control::Recompute);
                format!("Check interval updated to {minutes} minutes.")
            }
            Err(e) => e.to_string(),
        },

        Command::MonitorOn => match store.set_auto_check(true).await {
            Ok(()) => "Automatic checking enabled.".to_string(),
            Err(e) => e.to_string(),
        },

        Command::MonitorOff => match store.set_auto_check(false).await {
            Ok(()) => "Automatic checking disabled.".to_string(),
            Err(e) => e.to_string(),
        },

        Command::Balance => run_manual_cycle(state, ManualReply::FullReading).await,
        Command::CheckNow => run_manual_cycle(state, ManualReply::ThresholdAware).await,
    }
}

/// Run one on-demand cycle and render the requester's reply. Any event the
/// cycle produced is also broadcast to subscribers, since the transition
/// has been consumed and the next scheduled tick will not see it again.
async fn run_manual_cycle(state: &AppState, reply: ManualReply) -> String {
    let report = match state.engine.check_now().await {
        Ok(report) => report,
        Err(monitor::Error::CheckInProgress) => {
            return "A check is already in progress, please wait for it to finish.".to_string();
        }
        Err(e) => {
            warn!(error = %e, "manual check failed");
            return transient_failure_message().to_string();
        }
    };

    if let Some(event) = &report.event {
        let recipients = state.engine.store().subscribers().await;
        if !recipients.is_empty() {
            let update_time = report
                .outcome
                .reading()
                .and_then(|r| r.update_time.as_deref());
            state
                .notifier
                .broadcast(&recipients, &event_message(event, update_time))
                .await;
        }
    }

    match &report.outcome {
        CheckOutcome::Success(reading) | CheckOutcome::AuthRefreshed(reading) => match reply {
            ManualReply::FullReading => reading_message(reading),
            ManualReply::ThresholdAware => {
                let threshold = state.engine.store().config().await.threshold;
                if reading.balance < threshold {
                    low_balance_message(reading.balance, threshold, reading.update_time.as_deref())
                } else {
                    reading_message(reading)
                }
            }
        },
        CheckOutcome::Failure(reason) => {
            warn!(reason, "manual check failed");
            transient_failure_message().to_string()
        }
        outcome => auth_failure_message(outcome),
    }
}

/// Render the `status` reply.
async fn format_status(state: &AppState, session_id: &str) -> String {
    let store = state.engine.store();
    let config = store.config().await;
    let monitor_state = store.state().await;
    let subscribers = store.subscriber_count().await;
    let subscribed = store.is_subscribed(session_id).await;

    let last_balance = monitor_state
        .last_balance
        .map(|b| format!("{b:.2}"))
        .unwrap_or_else(|| "never checked".to_string());

    let last_check = match monitor_state.last_check_ts {
        None => "never".to_string(),
        Some(ts) => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            format!("{} min ago", (now - ts).max(0) / 60)
        }
    };

    format!(
        "Monitor status\n\
         auto-check: {}\n\
         interval: {} min\n\
         threshold: {:.2}\n\
         last balance: {}\n\
         last check: {}\n\
         subscribers: {}\n\
         this session: {}",
        if config.auto_check { "on" } else { "off" },
        config.interval_minutes,
        config.threshold,
        last_balance,
        last_check,
        subscribers,
        if subscribed { "subscribed" } else { "not subscribed" },
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
