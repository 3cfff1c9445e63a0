//! Persisted monitor record
//!
//! One JSON document holding the monitor configuration, the last observed
//! state, and the subscription list. Loaded with defaults on first start,
//! updated in place, never deleted. All writes use atomic temp-file +
//! rename; a tokio Mutex serializes mutations from the scheduler and the
//! command surface.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::subscriptions::SubscriptionSet;

/// Monitoring configuration, mutated only via explicit admin commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Low-balance alert boundary (strict `<` comparison)
    pub threshold: f64,
    /// Scheduled check interval
    pub interval_minutes: u64,
    /// Whether scheduled checks run at all
    pub auto_check: bool,
    /// Whether an expired token triggers an automatic login
    pub auto_refresh_token: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            interval_minutes: 60,
            auto_check: true,
            auto_refresh_token: true,
        }
    }
}

/// Last observed monitoring state.
///
/// `last_balance == None` means no check has ever succeeded; the next
/// successful check seeds the baseline without emitting an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorState {
    pub last_balance: Option<f64>,
    /// Unix timestamp (seconds) of the last successful check
    pub last_check_ts: Option<i64>,
}

/// On-disk shape of the monitor record.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    #[serde(default)]
    config: MonitorConfig,
    #[serde(default)]
    state: MonitorState,
    #[serde(default)]
    subscriptions: SubscriptionSet,
}

/// Thread-safe monitor record manager. Every mutation persists to disk.
pub struct MonitorStore {
    path: PathBuf,
    inner: Mutex<Persisted>,
}

impl MonitorStore {
    /// Load the record from the given file path, or create it with
    /// defaults on cold start.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let inner = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading state file: {e}")))?;
            let persisted: Persisted = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing state file: {e}")))?;
            info!(
                path = %path.display(),
                subscribers = persisted.subscriptions.len(),
                "loaded monitor state"
            );
            persisted
        } else {
            info!(path = %path.display(), "state file not found, starting with defaults");
            let persisted = Persisted::default();
            write_atomic(&path, &persisted).await?;
            persisted
        };

        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> MonitorConfig {
        let inner = self.inner.lock().await;
        inner.config.clone()
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> MonitorState {
        let inner = self.inner.lock().await;
        inner.state.clone()
    }

    /// Update the low-balance threshold. Rejects negative or non-finite
    /// values; zero is allowed (disables low-balance alerts in practice).
    pub async fn set_threshold(&self, threshold: f64) -> Result<()> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "threshold must be a non-negative number, got {threshold}"
            )));
        }
        let mut inner = self.inner.lock().await;
        inner.config.threshold = threshold;
        debug!(threshold, "threshold updated");
        write_atomic(&self.path, &inner).await
    }

    /// Update the check interval. Rejects zero.
    pub async fn set_interval(&self, minutes: u64) -> Result<()> {
        if minutes == 0 {
            return Err(Error::InvalidConfig(
                "interval must be at least 1 minute".into(),
            ));
        }
        let mut inner = self.inner.lock().await;
        inner.config.interval_minutes = minutes;
        debug!(minutes, "interval updated");
        write_atomic(&self.path, &inner).await
    }

    /// Toggle scheduled checking without clearing any state.
    pub async fn set_auto_check(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.config.auto_check = enabled;
        debug!(enabled, "auto-check toggled");
        write_atomic(&self.path, &inner).await
    }

    /// Toggle automatic token refresh on auth expiry.
    pub async fn set_auto_refresh(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.config.auto_refresh_token = enabled;
        debug!(enabled, "auto-refresh toggled");
        write_atomic(&self.path, &inner).await
    }

    /// Record a successful check: last balance and check timestamp.
    pub async fn record_check(&self, balance: f64, ts: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state.last_balance = Some(balance);
        inner.state.last_check_ts = Some(ts);
        write_atomic(&self.path, &inner).await
    }

    /// Clear the last-check timestamp (clock rollback recovery). The last
    /// balance is kept so event classification still has its baseline.
    pub async fn clear_last_check(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state.last_check_ts = None;
        write_atomic(&self.path, &inner).await
    }

    /// Add a session to the registry. Returns true if newly added.
    pub async fn subscribe(&self, session: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let added = inner.subscriptions.insert(session);
        if added {
            debug!(session, "session subscribed");
            write_atomic(&self.path, &inner).await?;
        }
        Ok(added)
    }

    /// Remove a session from the registry. Returns true if it was present.
    pub async fn unsubscribe(&self, session: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let removed = inner.subscriptions.remove(session);
        if removed {
            debug!(session, "session unsubscribed");
            write_atomic(&self.path, &inner).await?;
        }
        Ok(removed)
    }

    pub async fn is_subscribed(&self, session: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.subscriptions.contains(session)
    }

    /// All subscribed sessions, in insertion order.
    pub async fn subscribers(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.subscriptions.to_vec()
    }

    pub async fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.subscriptions.len()
    }
}

/// Write the monitor record atomically (temp file + rename).
async fn write_atomic(path: &Path, data: &Persisted) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing state: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("state path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".state.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp state file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting state file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp state file: {e}")))?;

    debug!(path = %path.display(), "persisted monitor state");
    Ok(())
}
