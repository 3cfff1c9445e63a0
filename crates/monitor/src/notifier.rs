//! Notification formatting and fan-out
//!
//! Turns cycle outcomes and balance events into message text and delivers
//! it to every subscribed session through the message adapter. Delivery is
//! best-effort per recipient: a failed send is logged and the remaining
//! recipients still get the message.

use std::sync::Arc;

use chat_adapter::MessageAdapter;
use meter_api::BalanceReading;
use tracing::warn;

use crate::cycle::CheckOutcome;
use crate::events::BalanceEvent;

/// Fans formatted messages out to subscribed sessions.
pub struct Notifier {
    adapter: Arc<dyn MessageAdapter>,
}

impl Notifier {
    pub fn new(adapter: Arc<dyn MessageAdapter>) -> Self {
        Self { adapter }
    }

    /// Deliver `text` to every recipient. Returns the number of successful
    /// deliveries.
    pub async fn broadcast(&self, recipients: &[String], text: &str) -> usize {
        let mut delivered = 0;
        for session in recipients {
            match self.adapter.send(session, text).await {
                Ok(()) => {
                    metrics::counter!("monitor_notifications_total", "result" => "sent")
                        .increment(1);
                    delivered += 1;
                }
                Err(e) => {
                    metrics::counter!("monitor_notifications_total", "result" => "failed")
                        .increment(1);
                    warn!(session, adapter = self.adapter.id(), error = %e, "failed to notify session");
                }
            }
        }
        delivered
    }
}

/// Full reading report for a manual balance query.
pub fn reading_message(reading: &BalanceReading) -> String {
    let mut lines = vec![
        String::from("Electricity balance"),
        format!("room: {}", reading.room_name),
        format!("balance: {:.2}", reading.balance),
    ];
    if let Some(price) = reading.price {
        lines.push(format!("price: {price:.2}/kWh"));
    }
    lines.push(format!(
        "meter online: {}",
        if reading.is_online { "yes" } else { "no" }
    ));
    if let Some(update_time) = &reading.update_time {
        lines.push(format!("updated: {update_time}"));
    }
    lines.join("\n")
}

/// Low-balance warning text. Also used for manual checks that find the
/// balance below the threshold.
pub fn low_balance_message(balance: f64, threshold: f64, update_time: Option<&str>) -> String {
    let mut lines = vec![
        String::from("Low balance warning"),
        format!("balance: {balance:.2}"),
        format!("threshold: {threshold:.2}"),
    ];
    if let Some(update_time) = update_time {
        lines.push(format!("updated: {update_time}"));
    }
    lines.join("\n")
}

/// Notification text for a classified balance event.
pub fn event_message(event: &BalanceEvent, update_time: Option<&str>) -> String {
    match event {
        BalanceEvent::LowBalance { balance, threshold } => {
            low_balance_message(*balance, *threshold, update_time)
        }
        BalanceEvent::Recharge { balance, delta } => {
            let mut lines = vec![
                String::from("Balance recharged"),
                format!("amount added: {delta:.2}"),
                format!("balance: {balance:.2}"),
            ];
            if let Some(update_time) = update_time {
                lines.push(format!("updated: {update_time}"));
            }
            lines.join("\n")
        }
    }
}

/// Human-readable text for an authentication failure, with a hint on how
/// to recover.
pub fn auth_failure_message(outcome: &CheckOutcome) -> String {
    match outcome {
        CheckOutcome::NoCredentials => String::from(
            "Balance check failed: no portal credentials configured. \
             Set a session token or an account/password pair in the service configuration.",
        ),
        CheckOutcome::AuthExpired => String::from(
            "Balance check failed: the portal session has expired and could not be \
             refreshed. Please update the stored session token.",
        ),
        CheckOutcome::AuthRefreshFailed(reason) => format!(
            "Balance check failed: portal login was rejected ({reason}). \
             Please check the configured account and password."
        ),
        _ => String::from("Balance check failed, please try again later."),
    }
}

/// Generic reply for transient failures on manual queries.
pub fn transient_failure_message() -> &'static str {
    "Balance query failed, please try again later."
}
