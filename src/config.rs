//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and validates
//! the keys the uploader cannot run without.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The configuration sources could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    /// A required key is absent or empty
    #[error("Missing required configuration key: {0}")]
    MissingKey(&'static str),
    /// A value is present but unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application settings loaded from environment variables and config files
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// sm.ms API access key
    #[serde(default)]
    pub smms_key: String,
    /// Base URL of the sm.ms API
    #[serde(default = "default_smms_api_base")]
    pub smms_api_base: String,
    /// Timeout for a single upload request
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Timeout for a single downstream bot request
    #[serde(default = "default_forward_timeout_secs")]
    pub forward_timeout_secs: u64,
    /// Lifetime of an unpaired entry, `0` keeps entries until paired or overwritten
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    /// Period of the expired-entry sweeper
    #[serde(default = "default_pending_sweep_interval_secs")]
    pub pending_sweep_interval_secs: u64,

    /// Telegram Bot API token
    pub telegram_token: Option<String>,

    /// API key for the downstream chat model
    pub llm_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible downstream API
    #[serde(default = "default_llm_api_base")]
    pub llm_api_base: String,
    /// Model used by the downstream bot
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// System message for the downstream bot
    pub system_message: Option<String>,
}

fn default_smms_api_base() -> String {
    SMMS_API_BASE.to_string()
}

const fn default_upload_timeout_secs() -> u64 {
    UPLOAD_TIMEOUT_SECS
}

const fn default_forward_timeout_secs() -> u64 {
    FORWARD_TIMEOUT_SECS
}

const fn default_pending_ttl_secs() -> u64 {
    PENDING_TTL_SECS
}

const fn default_pending_sweep_interval_secs() -> u64 {
    PENDING_SWEEP_INTERVAL_SECS
}

fn default_llm_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if loading fails.
    pub fn new() -> Result<Self, SettingsError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__SMMS_KEY=... ./target/image-relay`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables, empty values treated as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        Self::from_config(s)
    }

    /// Deserialize settings from an already built `Config`
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if the values do not deserialize.
    pub fn from_config(config: Config) -> Result<Self, SettingsError> {
        Ok(config.try_deserialize()?)
    }

    /// Returns the sm.ms key, failing when it is missing or blank
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::MissingKey` for an empty key.
    pub fn smms_key(&self) -> Result<&str, SettingsError> {
        let key = self.smms_key.trim();
        if key.is_empty() {
            return Err(SettingsError::MissingKey("smms_key"));
        }
        Ok(key)
    }

    /// Upload request timeout
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Invalid` when the timeout is zero.
    pub fn upload_timeout(&self) -> Result<Duration, SettingsError> {
        non_zero_secs("upload_timeout_secs", self.upload_timeout_secs)
    }

    /// Downstream request timeout
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Invalid` when the timeout is zero.
    pub fn forward_timeout(&self) -> Result<Duration, SettingsError> {
        non_zero_secs("forward_timeout_secs", self.forward_timeout_secs)
    }

    /// Expiry for pending entries, `None` when disabled
    #[must_use]
    pub const fn pending_ttl(&self) -> Option<Duration> {
        if self.pending_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.pending_ttl_secs))
        }
    }

    /// Sweeper period, never shorter than one second
    #[must_use]
    pub fn pending_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pending_sweep_interval_secs.max(1))
    }
}

fn non_zero_secs(key: &str, secs: u64) -> Result<Duration, SettingsError> {
    if secs == 0 {
        return Err(SettingsError::Invalid(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

/// Default sm.ms API host
pub const SMMS_API_BASE: &str = "https://sm.ms";
/// Upload endpoint path on the sm.ms host
pub const SMMS_UPLOAD_PATH: &str = "/api/v2/upload";
/// Default upload timeout in seconds
pub const UPLOAD_TIMEOUT_SECS: u64 = 30;
/// Default downstream timeout in seconds
pub const FORWARD_TIMEOUT_SECS: u64 = 60;
/// Default lifetime of unpaired entries (30 minutes)
pub const PENDING_TTL_SECS: u64 = 1800;
/// Default sweeper period in seconds
pub const PENDING_SWEEP_INTERVAL_SECS: u64 = 60;

// Downstream bot configuration
/// Default system message for the downstream bot
pub const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are a helpful assistant. Users send you images by URL together with a request.";
/// Maximum output tokens per downstream reply
pub const LLM_MAX_TOKENS: u32 = 2048;
/// Number of past messages kept per session
pub const LLM_HISTORY_MESSAGES: usize = 20;
/// Lifetime of an idle session history in seconds
pub const LLM_SESSION_TTL_SECS: u64 = 3600;
/// Maximum number of session histories kept in memory
pub const LLM_SESSION_MAX_CAPACITY: u64 = 10_000;

// Telegram file API retry policy
/// Max attempts for Telegram file downloads
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram file downloads
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Max backoff for Telegram file downloads
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
