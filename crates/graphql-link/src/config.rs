//! Serializable client configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::DEFAULT_TIMEOUT;
use crate::policy::ErrorPolicy;
use crate::retry::{ExponentialBackoff, RetryPolicy, RetryStrategy};

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config is not valid JSON for the schema.
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds an unusable value.
    #[error("invalid config field `{field}`: {message}")]
    Invalid {
        /// Field path.
        field: &'static str,
        /// Details.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Retry section of [`ClientConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Delay cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Randomize delays.
    pub jitter: bool,
    /// Which operations may be retried.
    pub strategy: RetryStrategy,
    /// Also retry responses with GraphQL errors.
    pub retry_graphql_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: duration_ms(policy.backoff.initial),
            max_delay_ms: duration_ms(policy.backoff.max),
            multiplier: policy.backoff.multiplier,
            jitter: policy.backoff.jitter,
            strategy: policy.strategy,
            retry_graphql_errors: policy.retry_graphql_errors,
        }
    }
}

impl RetryConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "retry.multiplier",
                format!("must be a finite number >= 1, got {}", self.multiplier),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.initial_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }

    /// Equivalent retry policy.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: ExponentialBackoff::new(
                Duration::from_millis(self.initial_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_multiplier(self.multiplier)
            .with_jitter(self.jitter),
            strategy: self.strategy,
            retry_graphql_errors: self.retry_graphql_errors,
        }
    }
}

/// Client configuration, typically loaded from JSON.
///
/// ```json
/// {
///   "endpoint": "https://api.example.com/graphql",
///   "error_policy": "all",
///   "retry": { "max_attempts": 3, "initial_delay_ms": 200 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// GraphQL endpoint URL.
    pub endpoint: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Policy for operations that do not set one.
    pub error_policy: ErrorPolicy,
    /// Retry settings; `null` disables the retry link.
    pub retry: Option<RetryConfig>,
    /// Deduplicate identical in-flight queries.
    pub dedup: bool,
    /// Log each operation with `tracing`.
    pub tracing: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_ms: duration_ms(DEFAULT_TIMEOUT),
            headers: BTreeMap::new(),
            error_policy: ErrorPolicy::default(),
            retry: Some(RetryConfig::default()),
            dedup: false,
            tracing: true,
        }
    }
}

impl ClientConfig {
    /// Config for `endpoint` with defaults elsewhere.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Parse and validate JSON.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check required fields and ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("endpoint", "must not be empty"));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("timeout_ms", "must be positive"));
        }
        self.header_map()?;
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }

    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Headers as a header map.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| ConfigError::invalid("headers", format!("{name}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| ConfigError::invalid("headers", format!("{name}: {err}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
