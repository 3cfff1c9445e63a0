//! Utility-portal client library
//!
//! Talks to the campus electricity portal: one balance lookup per call,
//! form login for token refresh, and a credential file holding the current
//! session token. This crate is a standalone library with no dependency on
//! the monitoring engine — it can be tested and used independently.
//!
//! Credential flow:
//! 1. Service config supplies the portal account/password (optional)
//! 2. `credentials::CredentialStore::load()` reads the persisted token
//! 3. `balance::fetch_balance()` queries with the current token
//! 4. On auth expiry, `login::login()` obtains a fresh token
//! 5. New token saved via `credentials::CredentialStore::replace_token()`

pub mod balance;
pub mod classify;
pub mod credentials;
pub mod error;
pub mod login;

pub use balance::{BalanceReading, fetch_balance};
pub use classify::looks_like_auth_expired;
pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use login::{TOKEN_COOKIE, login};
