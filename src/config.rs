//! Configuration for the core services.
//!
//! Every section and field has a default, so an empty TOML document is a
//! valid configuration:
//!
//! ```toml
//! [geo]
//! key_precision = 10
//!
//! [proximity]
//! page_size = 50
//! default_radius_meters = 2000.0
//! scan_timeout_ms = 10000
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 100
//! max_backoff_ms = 2000
//! jitter = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::geohash::{DEFAULT_KEY_PRECISION, MAX_KEY_PRECISION};

/// Error type for configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid TOML or has wrong types.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Geohash indexing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Length of the geohash stored on each user record (1-12).
    pub key_precision: usize,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            key_precision: DEFAULT_KEY_PRECISION,
        }
    }
}

/// Proximity search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Maximum documents returned by each range scan.
    pub page_size: usize,
    /// Radius used when the caller does not pass one.
    pub default_radius_meters: f64,
    /// Deadline for each range scan.
    pub scan_timeout_ms: u64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            default_radius_meters: 2_000.0,
            scan_timeout_ms: 10_000,
        }
    }
}

impl ProximityConfig {
    /// Returns the scan deadline as a [`Duration`].
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

/// Retry settings for transient store failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Randomize each delay between half and the full value.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            jitter: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Geohash indexing.
    pub geo: GeoConfig,
    /// Proximity search.
    pub proximity: ProximityConfig,
    /// Retry policy for relationship mutations.
    pub retry: RetryConfig,
}

impl CoreConfig {
    /// Parses and validates a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Checks that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_KEY_PRECISION).contains(&self.geo.key_precision) {
            return Err(ConfigError::Invalid(format!(
                "geo.key_precision must be 1..={MAX_KEY_PRECISION}, got {}",
                self.geo.key_precision
            )));
        }
        if self.proximity.page_size == 0 {
            return Err(ConfigError::Invalid(
                "proximity.page_size must be positive".to_string(),
            ));
        }
        let radius = self.proximity.default_radius_meters;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "proximity.default_radius_meters must be positive, got {radius}"
            )));
        }
        if self.proximity.scan_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "proximity.scan_timeout_ms must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}
