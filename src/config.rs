use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::credentials::{CredentialError, TokenKey};
use crate::provider::aurinko::{SyncWindow, DEFAULT_API_BASE};
use crate::sync::SyncSettings;

pub const ENV_DB_PATH: &str = "MAILSYNC_DB_PATH";
pub const ENV_API_BASE: &str = "MAILSYNC_API_BASE";
pub const ENV_DAYS_WITHIN: &str = "MAILSYNC_DAYS_WITHIN";
pub const ENV_BODY_TYPE: &str = "MAILSYNC_BODY_TYPE";
pub const ENV_POLL_INTERVAL_MS: &str = "MAILSYNC_POLL_INTERVAL_MS";
pub const ENV_MAX_POLL_ATTEMPTS: &str = "MAILSYNC_MAX_POLL_ATTEMPTS";
pub const ENV_TOKEN_KEY: &str = "MAILSYNC_TOKEN_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("MAILSYNC_TOKEN_KEY: {0}")]
    TokenKey(#[from] CredentialError),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Overrides the default database location when set.
    pub db_path: Option<PathBuf>,
    pub api_base: String,
    pub sync_window: SyncWindow,
    pub sync: SyncSettings,
    pub token_key: Option<TokenKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            api_base: DEFAULT_API_BASE.to_string(),
            sync_window: SyncWindow::default(),
            sync: SyncSettings::default(),
            token_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset or blank values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        if let Some(path) = get(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(base) = get(ENV_API_BASE) {
            config.api_base = base;
        }
        if let Some(days) = get(ENV_DAYS_WITHIN) {
            config.sync_window.days_within =
                parse_positive(ENV_DAYS_WITHIN, &days)?;
        }
        if let Some(body_type) = get(ENV_BODY_TYPE) {
            config.sync_window.body_type = match body_type.to_ascii_lowercase().as_str() {
                kind @ ("html" | "text") => kind.to_string(),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: ENV_BODY_TYPE,
                        expected: "'html' or 'text'",
                        value: body_type,
                    })
                }
            };
        }
        if let Some(interval) = get(ENV_POLL_INTERVAL_MS) {
            let millis = interval.parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: ENV_POLL_INTERVAL_MS,
                expected: "a number of milliseconds",
                value: interval.clone(),
            })?;
            config.sync.poll_interval = Duration::from_millis(millis);
        }
        if let Some(attempts) = get(ENV_MAX_POLL_ATTEMPTS) {
            config.sync.max_poll_attempts = parse_positive(ENV_MAX_POLL_ATTEMPTS, &attempts)?;
        }
        if let Some(key) = get(ENV_TOKEN_KEY) {
            config.token_key = Some(TokenKey::from_hex(&key)?);
        }

        Ok(config)
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a positive integer",
            value: raw.to_string(),
        }),
    }
}
