//! Message adapter abstraction for outbound notifications
//!
//! Defines the `MessageAdapter` trait that decouples the monitoring engine
//! from the chat platform. The engine formats notification text and hands
//! it to the adapter; how a message physically reaches a session (webhook,
//! bot gateway, test capture) is the adapter's concern.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn MessageAdapter>`).

pub mod webhook;

pub use webhook::WebhookAdapter;

use std::future::Future;
use std::pin::Pin;

/// Errors from message delivery.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Result alias for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Abstraction over chat-platform message delivery.
///
/// One call delivers one message to one session. Implementations must not
/// retry internally — the notifier treats each recipient independently and
/// logs failures without aborting the fan-out.
pub trait MessageAdapter: Send + Sync {
    /// Identifier for logging (e.g. "webhook")
    fn id(&self) -> &str;

    /// Deliver `text` to the given session.
    fn send<'a>(
        &'a self,
        session: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
