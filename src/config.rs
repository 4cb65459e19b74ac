//! Engine configuration
//!
//! Defaults, overridden by `CR_LOOKUP_*` environment variables (a `.env` file
//! is honoured), overridden in turn by CLI flags in the binary.

use crate::error::{LookupError, Result};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8001/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BATCH_CONCURRENCY: usize = 10;

pub const ENV_BASE_URL: &str = "CR_LOOKUP_BASE_URL";
pub const ENV_TOKEN: &str = "CR_LOOKUP_TOKEN";
pub const ENV_TIMEOUT_SECS: &str = "CR_LOOKUP_TIMEOUT_SECS";
pub const ENV_BATCH_CONCURRENCY: &str = "CR_LOOKUP_BATCH_CONCURRENCY";
pub const ENV_MAX_RETRIES: &str = "CR_LOOKUP_MAX_RETRIES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub batch_concurrency: usize,
    pub batch_enrich: bool,
    pub history_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            batch_enrich: false,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| LookupError::Config(format!("{} has an invalid value: '{}'", name, raw)))
}

impl LookupConfig {
    /// Loads `.env` (if present) and applies environment overrides.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from any key/value lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url.trim().to_string();
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.token = Some(token);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = parse_var(ENV_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BATCH_CONCURRENCY) {
            self.batch_concurrency = parse_var(ENV_BATCH_CONCURRENCY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            self.retry.max_retries = parse_var(ENV_MAX_RETRIES, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(LookupError::Config("base_url must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(LookupError::Config("timeout_secs must be positive".to_string()));
        }
        if self.batch_concurrency == 0 {
            return Err(LookupError::Config(
                "batch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
