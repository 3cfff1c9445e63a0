//! Balance transition classification
//!
//! Pure function from (previous balance, current balance, threshold) to an
//! optional notification event. No history beyond the last observed
//! balance is consulted; re-alerts while the balance stays below the
//! threshold are suppressed so subscribers only hear about a fresh
//! crossing or a recharge.

/// A notification-worthy balance transition.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceEvent {
    /// Balance newly dropped below the threshold.
    LowBalance { balance: f64, threshold: f64 },
    /// Balance increased relative to the last observation.
    Recharge { balance: f64, delta: f64 },
}

/// Classify one balance transition.
///
/// `prev == None` means this is the first successful check: it seeds the
/// baseline and never produces an event. A balance exactly equal to the
/// threshold counts as NOT below it (strict `<`).
pub fn classify_transition(
    prev: Option<f64>,
    current: f64,
    threshold: f64,
) -> Option<BalanceEvent> {
    let prev = prev?;

    if current > prev {
        return Some(BalanceEvent::Recharge {
            balance: current,
            delta: current - prev,
        });
    }

    // Fresh crossing only: already-below balances don't re-alert.
    if current < prev && current < threshold && !(prev < threshold) {
        return Some(BalanceEvent::LowBalance {
            balance: current,
            threshold,
        });
    }

    None
}
