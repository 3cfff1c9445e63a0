//! Scheduler loop
//!
//! Single task driving scheduled monitoring cycles. Each iteration derives
//! the next deadline from the persisted last-check timestamp plus the
//! configured interval (both re-read every pass, so config changes take
//! effect on the next tick) and suspends until the deadline or until a
//! control message arrives. No cycle outcome is fatal: the loop always
//! schedules the next tick.
//!
//! Scheduled ticks are skipped while auto-check is off or nobody is
//! subscribed; manual commands still drive cycles through the engine
//! directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cycle::{CheckOutcome, CycleReport, Engine, unix_now};
use crate::notifier::{Notifier, auth_failure_message, event_message};
use crate::store::MonitorStore;

/// Control messages that wake the scheduler outside its timer.
#[derive(Debug)]
pub enum Control {
    /// Re-derive the next deadline (sent after an interval change).
    Recompute,
    /// Stop the loop.
    Shutdown,
}

/// Spawn the scheduler task.
///
/// Returns the task handle and the control channel sender. Dropping the
/// sender also stops the loop.
pub fn spawn_scheduler(
    engine: Arc<Engine>,
    notifier: Arc<Notifier>,
) -> (tokio::task::JoinHandle<()>, mpsc::Sender<Control>) {
    let (tx, rx) = mpsc::channel(8);
    let handle = tokio::spawn(scheduler_loop(engine, notifier, rx));
    (handle, tx)
}

async fn scheduler_loop(
    engine: Arc<Engine>,
    notifier: Arc<Notifier>,
    mut rx: mpsc::Receiver<Control>,
) {
    // Floor on the next tick set after every firing, so skipped or failed
    // ticks (which leave last_check_ts untouched) still wait one interval.
    let mut earliest: Option<Instant> = None;
    // Auth failures notify once per streak, reset by the next success.
    let mut auth_alerted = false;

    info!("scheduler started");
    loop {
        let wait = next_wait(engine.store(), earliest).await;
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                run_tick(&engine, &notifier, &mut auth_alerted).await;
                let interval = engine.store().config().await.interval_minutes;
                earliest = Some(Instant::now() + Duration::from_secs(interval.saturating_mul(60)));
            }
            msg = rx.recv() => match msg {
                Some(Control::Recompute) => {
                    debug!("recomputing next deadline");
                    earliest = None;
                }
                Some(Control::Shutdown) | None => break,
            }
        }
    }
    info!("scheduler stopped");
}

/// Time until the next scheduled tick.
///
/// A last-check timestamp in the future means the clock rolled back; it is
/// cleared and the tick runs immediately.
async fn next_wait(store: &MonitorStore, earliest: Option<Instant>) -> Duration {
    let config = store.config().await;
    let interval = Duration::from_secs(config.interval_minutes.saturating_mul(60));
    let state = store.state().await;
    let now = unix_now();

    let state_wait = match state.last_check_ts {
        None => Duration::ZERO,
        Some(ts) if ts > now => {
            warn!(last_check_ts = ts, now, "last check timestamp is in the future, clearing");
            if let Err(e) = store.clear_last_check().await {
                warn!(error = %e, "failed to clear last check timestamp");
            }
            Duration::ZERO
        }
        Some(ts) => interval.saturating_sub(Duration::from_secs((now - ts) as u64)),
    };

    let idle_wait = earliest
        .map(|t| t.saturating_duration_since(Instant::now()))
        .unwrap_or(Duration::ZERO);

    state_wait.max(idle_wait)
}

/// Run one scheduled tick: skip when idle, otherwise cycle and dispatch.
async fn run_tick(engine: &Engine, notifier: &Notifier, auth_alerted: &mut bool) {
    let store = engine.store();
    let config = store.config().await;
    let recipients = store.subscribers().await;

    if !config.auto_check || recipients.is_empty() {
        debug!(
            auto_check = config.auto_check,
            subscribers = recipients.len(),
            "skipping scheduled check"
        );
        return;
    }

    let report = engine.run_cycle().await;
    dispatch_report(notifier, &recipients, &report, auth_alerted).await;
}

/// Route a cycle report to subscribers per the surfacing rules:
/// events always notify, auth failures notify once per streak, transient
/// failures only log.
async fn dispatch_report(
    notifier: &Notifier,
    recipients: &[String],
    report: &CycleReport,
    auth_alerted: &mut bool,
) {
    match &report.outcome {
        CheckOutcome::Success(reading) | CheckOutcome::AuthRefreshed(reading) => {
            *auth_alerted = false;
            if let Some(event) = &report.event {
                let text = event_message(event, reading.update_time.as_deref());
                notifier.broadcast(recipients, &text).await;
            }
        }
        CheckOutcome::NoCredentials
        | CheckOutcome::AuthExpired
        | CheckOutcome::AuthRefreshFailed(_) => {
            warn!(
                outcome = report.outcome.label(),
                "scheduled check hit an authentication failure"
            );
            if !*auth_alerted {
                notifier
                    .broadcast(recipients, &auth_failure_message(&report.outcome))
                    .await;
                *auth_alerted = true;
            }
        }
        CheckOutcome::Failure(reason) => {
            warn!(reason, "scheduled check failed, will retry next interval");
        }
    }
}
