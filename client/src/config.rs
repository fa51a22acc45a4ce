//! Configuration management for the client.

use optimist_engine::{ExecutorConfig, RollbackPolicy, DEFAULT_PROVISIONAL_PREFIX};
use std::env;
use std::time::Duration;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the social API, without trailing slash
    pub api_base_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Mutation executor settings
    pub executor: ExecutorConfig,
}

impl Config {
    /// Create a configuration for `api_base_url` with default settings.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(30),
            executor: ExecutorConfig::default(),
        }
    }

    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its value.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = lookup("API_BASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingApiBaseUrl)?;
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidApiBaseUrl(api_base_url));
        }

        let api_token = lookup("API_TOKEN").filter(|token| !token.is_empty());

        let request_timeout = lookup("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidTimeout)?;

        let rollback_policy = match lookup("ROLLBACK_POLICY") {
            Some(value) => value.parse().map_err(ConfigError::InvalidRollbackPolicy)?,
            None => RollbackPolicy::default(),
        };

        let provisional_prefix =
            lookup("PROVISIONAL_PREFIX").unwrap_or_else(|| DEFAULT_PROVISIONAL_PREFIX.to_string());

        let mut config = Self::new(api_base_url);
        config.api_token = api_token;
        config.request_timeout = request_timeout;
        config.executor = ExecutorConfig {
            rollback_policy,
            provisional_prefix,
            ..ExecutorConfig::default()
        };
        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API_BASE_URL environment variable is required")]
    MissingApiBaseUrl,

    #[error("API_BASE_URL must be an http(s) URL, got '{0}'")]
    InvalidApiBaseUrl(String),

    #[error("Invalid REQUEST_TIMEOUT_SECS value")]
    InvalidTimeout,

    #[error("Invalid ROLLBACK_POLICY value: {0}")]
    InvalidRollbackPolicy(String),
}
