//! Credential storage for the portal session
//!
//! The token file is the single source of truth for the session token and
//! is overwritten in place when a refresh succeeds. All writes use atomic
//! temp-file + rename to prevent corruption on crash, and a tokio Mutex
//! serializes the token between a cycle's refresh and a concurrently
//! dispatched manual query.
//!
//! The account/password pair never touches the token file: it is injected
//! at load time from service configuration, with the password wrapped in
//! `common::Secret` so it stays out of logs.

use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// On-disk shape of the token file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    token: Option<String>,
}

/// Thread-safe token file manager plus the optional login pair.
pub struct CredentialStore {
    path: PathBuf,
    account: Option<String>,
    password: Option<Secret<String>>,
    token: Mutex<Option<String>>,
}

impl CredentialStore {
    /// Load the token from the given file path.
    ///
    /// If the file doesn't exist, creates it with a null token (cold start).
    /// The engine will report `NoCredentials` until either a token is
    /// refreshed via login or the file is seeded out of band.
    pub async fn load(
        path: PathBuf,
        account: Option<String>,
        password: Option<Secret<String>>,
    ) -> Result<Self> {
        let token = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading token file: {e}")))?;
            let file: TokenFile = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing token file: {e}")))?;
            info!(
                path = %path.display(),
                has_token = file.token.is_some(),
                "loaded credential file"
            );
            file.token
        } else {
            info!(path = %path.display(), "token file not found, starting without a session token");
            write_atomic(&path, &TokenFile::default()).await?;
            None
        };

        Ok(Self {
            path,
            account,
            password,
            token: Mutex::new(token),
        })
    }

    /// Get a clone of the current session token.
    pub async fn token(&self) -> Option<String> {
        let token = self.token.lock().await;
        token.clone()
    }

    /// Replace the session token after a successful login and persist it.
    ///
    /// The old token is discarded; the write is atomic so a crash can never
    /// leave a torn file.
    pub async fn replace_token(&self, new_token: String) -> Result<()> {
        let mut token = self.token.lock().await;
        *token = Some(new_token.clone());
        debug!("replaced session token");
        write_atomic(
            &self.path,
            &TokenFile {
                token: Some(new_token),
            },
        )
        .await
    }

    /// Whether a login can be attempted: both account and password present.
    pub fn refresh_possible(&self) -> bool {
        self.account.is_some() && self.password.is_some()
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose().as_str())
    }
}

/// Write the token file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. File permissions are set to 0600 since the file contains a
/// live session token.
async fn write_atomic(path: &Path, data: &TokenFile) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing token file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".token.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted token file");
    Ok(())
}
