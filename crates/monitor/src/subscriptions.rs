//! Subscription registry
//!
//! Ordered set of session identifiers that receive notifications. Backed
//! by a Vec so the persisted file keeps insertion order; uniqueness is
//! enforced on insert. Duplicate subscribes are idempotent.

use serde::{Deserialize, Serialize};

/// Set of subscribed session identifiers, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionSet {
    sessions: Vec<String>,
}

impl SubscriptionSet {
    /// Add a session. Returns true if it was newly added.
    pub fn insert(&mut self, session: &str) -> bool {
        if self.contains(session) {
            return false;
        }
        self.sessions.push(session.to_string());
        true
    }

    /// Remove a session. Returns true if it was present.
    pub fn remove(&mut self, session: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s != session);
        self.sessions.len() != before
    }

    pub fn contains(&self, session: &str) -> bool {
        self.sessions.iter().any(|s| s == session)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.sessions.clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
