//! Auth-expiry detection for portal error messages
//!
//! The portal reports an expired session inside the JSON error message
//! rather than via the HTTP status code, so auth expiry has to be
//! recognized by message content. Only a match here sends the engine down
//! the token-refresh path; everything else stays a plain portal failure.

/// Message fragments the portal uses when the session token is no longer
/// valid. Matched case-insensitively against the error message.
const AUTH_EXPIRED_PATTERNS: &[&str] = &[
    "登录过期",
    "登录已过期",
    "请登录",
    "请先登录",
    "未登录",
    "账号过期",
    "token过期",
    "token已过期",
    "token expired",
    "login expired",
    "not logged in",
    "session expired",
];

/// Whether a portal error message indicates an expired or missing login.
pub fn looks_like_auth_expired(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_EXPIRED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}
