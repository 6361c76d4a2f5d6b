use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable that overrides the store API key from the file.
pub const STORE_API_KEY_ENV: &str = "UPLINK_STORE_API_KEY";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Accepted extension list cannot be empty")]
    EmptyExtensions,

    #[error("Accepted extensions must start with a dot: {0}")]
    BadExtension(String),

    #[error("Maximum file size cannot be 0")]
    InvalidMaxSize,

    #[error("Dispatch timeout cannot be 0")]
    InvalidTimeout,

    #[error("A relay URL is required for secure-origin dispatch")]
    RelayUrlRequired,
}

/// Submission pipeline configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Extensions the validator accepts, in leading-dot form
    #[serde(default = "default_extensions")]
    pub accepted_extensions: Vec<String>,
    /// Upper bound on file size in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u32,
    /// Processor endpoints, one per upload type
    pub destinations: Destinations,
    /// Bounded wait on one dispatch, in seconds
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    /// Secure-origin callers route through the relay to avoid mixed-content
    /// restrictions; insecure-origin callers dispatch directly
    #[serde(default)]
    pub secure_origin: bool,
    /// Base URL of the relay; required when `secure_origin` is set
    #[serde(default)]
    pub relay_url: Option<Url>,
    /// History store settings. Absent means the degraded configuration:
    /// no persistence and no reconciliation, submissions still work.
    #[serde(default)]
    pub history: Option<HistoryConfig>,
}

fn default_extensions() -> Vec<String> {
    [".csv", ".xlsx", ".xls", ".pdf", ".jpg", ".jpeg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_file_size_mb() -> u32 {
    10
}

fn default_dispatch_timeout_secs() -> u64 {
    90
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.accepted_extensions.is_empty() {
            return Err(ValidationError::EmptyExtensions);
        }
        for extension in &self.accepted_extensions {
            if !extension.starts_with('.') || extension.len() < 2 {
                return Err(ValidationError::BadExtension(extension.clone()));
            }
        }
        if self.max_file_size_mb == 0 {
            return Err(ValidationError::InvalidMaxSize);
        }
        if self.dispatch_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.secure_origin && self.relay_url.is_none() {
            return Err(ValidationError::RelayUrlRequired);
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

/// Processor endpoint per upload type
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Destinations {
    pub po: Url,
    pub grn: Url,
}

/// Remote history table settings.
#[derive(Clone, Debug, Deserialize)]
pub struct HistoryConfig {
    /// Base URL of the store (the REST table endpoint lives under it)
    pub url: Url,
    /// API key; `UPLINK_STORE_API_KEY` in the environment takes precedence
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    /// How many records the history view keeps
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    /// Seconds between stale-record sweeps
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Age after which a processing record is considered orphaned
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_table() -> String {
    "uploads".to_string()
}

fn default_recent_limit() -> usize {
    20
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    120
}

impl HistoryConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(STORE_API_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .or_else(|| self.api_key.clone())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
