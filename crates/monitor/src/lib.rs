//! Balance monitoring engine
//!
//! Tracks per-session subscriptions, schedules periodic balance checks,
//! classifies balance transitions into notification events, and handles
//! token expiry with a bounded refresh retry. The engine owns no
//! transport: the portal client comes from `meter-api` and outbound
//! delivery goes through `chat-adapter`.
//!
//! Cycle lifecycle:
//! 1. Scheduler wakes on the configured interval (or a manual trigger)
//! 2. Engine fetches the balance with the stored token
//! 3. On auth expiry, one login refresh + one retried fetch, never more
//! 4. Transition classified against the previous balance and threshold
//! 5. State persisted, event (if any) fanned out to subscribers

pub mod cycle;
pub mod error;
pub mod events;
pub mod notifier;
pub mod scheduler;
pub mod store;
pub mod subscriptions;

pub use cycle::{CheckOutcome, CycleReport, Engine};
pub use error::{Error, Result};
pub use events::{BalanceEvent, classify_transition};
pub use notifier::Notifier;
pub use scheduler::{Control, spawn_scheduler};
pub use store::{MonitorConfig, MonitorState, MonitorStore};
pub use subscriptions::SubscriptionSet;
