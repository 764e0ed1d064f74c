//! Coalescer configuration
//!
//! Timing knobs for the rate limiter and debounced dispatcher, loadable
//! from TOML:
//!
//! ```toml
//! debounce_ms = 500
//! rate_limit_ms = 100
//! rate_limit_policy = "coalesce"
//! event_capacity = 256
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What happens to an interaction that arrives inside the rate-limit window
///
/// The default is `Coalesce`, so two taps inside the window still send the
/// second value. Set `Drop` for the stricter behaviour where a limited tap
/// is ignored outright and the view keeps the earlier value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// Record the value but keep the already-armed debounce timer
    #[default]
    Coalesce,
    /// Ignore the interaction entirely
    Drop,
}

/// Coalescer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoalescerConfig {
    /// Quiet period before a line's pending intent is dispatched
    pub debounce_ms: u64,
    /// Minimum spacing between accepted interactions on one line
    pub rate_limit_ms: u64,
    /// Handling of interactions inside the rate-limit window
    pub rate_limit_policy: RateLimitPolicy,
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,
}

impl CoalescerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With debounce quiet period
    #[inline]
    #[must_use]
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// With rate-limit window
    #[inline]
    #[must_use]
    pub fn with_rate_limit_ms(mut self, ms: u64) -> Self {
        self.rate_limit_ms = ms;
        self
    }

    /// With rate-limit policy
    #[inline]
    #[must_use]
    pub fn with_rate_limit_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit_policy = policy;
        self
    }

    /// With event channel capacity
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Debounce quiet period
    #[inline]
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Rate-limit window
    #[inline]
    #[must_use]
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML or unknown keys
    /// - `ConfigError::Invalid` if validation fails
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - see [`CoalescerConfig::from_toml_str`]
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "debounce_ms must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            rate_limit_ms: 100,
            rate_limit_policy: RateLimitPolicy::Coalesce,
            event_capacity: 256,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Malformed TOML
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// File could not be read
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// Out-of-range value
    #[error("invalid config: {0}")]
    Invalid(String),
}
