//! Configuration for metered sessions
//!
//! Loaded from TOML, overridable from environment variables, validated
//! before use.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::metrics::Pricing;

/// Main configuration for an interceptor session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Cost model
    pub pricing: PricingConfig,

    /// Operation tracing
    pub trace: TraceConfig,
}

/// Per-million pricing for read and write units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub read_per_million: f64,
    pub write_per_million: f64,
}

/// Detailed per-operation tracing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Retain individual operations
    pub enabled: bool,

    /// Maximum retained operations before trimming
    pub capacity: usize,

    /// Operations kept after a trim
    pub trim_to: usize,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            read_per_million: 0.001,
            write_per_million: 1.00,
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 1000,
            trim_to: 500,
        }
    }
}

impl PricingConfig {
    pub fn pricing(&self) -> Pricing {
        Pricing::new(self.read_per_million, self.write_per_million)
    }
}

impl MeterConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: MeterConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from environment variables
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(value) = std::env::var("BLOBMETER_PRICE_READ_PER_MILLION") {
            self.pricing.read_per_million = parse_env("BLOBMETER_PRICE_READ_PER_MILLION", &value)?;
        }

        if let Ok(value) = std::env::var("BLOBMETER_PRICE_WRITE_PER_MILLION") {
            self.pricing.write_per_million =
                parse_env("BLOBMETER_PRICE_WRITE_PER_MILLION", &value)?;
        }

        if let Ok(value) = std::env::var("BLOBMETER_TRACE") {
            self.trace.enabled = parse_env("BLOBMETER_TRACE", &value)?;
        }

        Ok(())
    }

    /// Defaults plus environment overrides
    pub fn load_from_env() -> ConfigResult<Self> {
        let mut config = MeterConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, price) in [
            ("pricing.read_per_million", self.pricing.read_per_million),
            ("pricing.write_per_million", self.pricing.write_per_million),
        ] {
            if !price.is_finite() || price < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: price.to_string(),
                });
            }
        }

        if self.trace.capacity == 0 {
            return Err(ConfigError::Validation {
                reason: "trace.capacity must be greater than 0".to_string(),
            });
        }

        if self.trace.trim_to == 0 || self.trace.trim_to > self.trace.capacity {
            return Err(ConfigError::Validation {
                reason: format!(
                    "trace.trim_to must be within 1..={}, got {}",
                    self.trace.capacity, self.trace.trim_to
                ),
            });
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}
