//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The portal password is loaded from the WATTMON_PASSWORD env var or
//! password_file, never stored in the TOML directly to avoid leaking
//! secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub portal: PortalConfig,
    pub service: ServiceConfig,
}

/// Portal connection settings
#[derive(Debug, Deserialize)]
pub struct PortalConfig {
    pub balance_url: String,
    pub login_url: String,
    /// Portal account for automatic token refresh (optional)
    #[serde(default)]
    pub account: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to WATTMON_PASSWORD env var)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// HTTP service settings
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// Chat-platform push endpoint for outbound notifications
    pub webhook_url: String,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_timeout() -> u64 {
    30
}

fn default_token_file() -> PathBuf {
    PathBuf::from("wattmon-token.json")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("wattmon-state.json")
}

fn default_max_connections() -> usize {
    64
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. WATTMON_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (name, url) in [
            ("balance_url", &config.portal.balance_url),
            ("login_url", &config.portal.login_url),
            ("webhook_url", &config.service.webhook_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if config.portal.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.service.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        // Resolve password: env var takes precedence over file
        if let Ok(password) = std::env::var("WATTMON_PASSWORD") {
            config.portal.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = config.portal.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim().to_owned();
            if !password.is_empty() {
                config.portal.password = Some(Secret::new(password));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("wattd.toml")
    }
}
