//! Configuration for the result log writer and reader

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ResultsError};

/// Main configuration for result logging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    pub writer: WriterConfig,
    pub reader: ReaderConfig,
}

/// How the writer treats an existing target file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Append,
    Overwrite,
}

/// Writer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Target JSONL file
    pub path: PathBuf,

    pub mode: WriteMode,

    /// Buffered records that trigger a background flush
    pub buffer_size: usize,

    /// Periodic flush interval; `None` disables the timer
    pub flush_interval_ms: Option<u64>,

    /// Pending commands queued for the flush worker
    pub channel_capacity: usize,

    /// Size above which `rotate_if_needed` rotates the file
    pub max_file_bytes: u64,
}

/// Reader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Log files to read, in order
    pub paths: Vec<PathBuf>,

    /// Percentage change counted as significant in comparisons
    pub regression_threshold_pct: f64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("results/benchmarks.jsonl"),
            mode: WriteMode::Append,
            buffer_size: 100,
            flush_interval_ms: Some(5000),
            channel_capacity: 64,
            max_file_bytes: 100 * 1024 * 1024,
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("results/benchmarks.jsonl")],
            regression_threshold_pct: 5.0,
        }
    }
}

impl WriterConfig {
    /// Writer config targeting `path` with defaults elsewhere
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_ms.map(Duration::from_millis)
    }
}

impl ResultsConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ResultsError::io(path, e))?;
        let config: ResultsConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| ResultsError::io(path, e))?;
        Ok(())
    }

    /// Apply overrides from environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("BLOBMETER_RESULTS_PATH") {
            let path = PathBuf::from(path);
            self.reader.paths = vec![path.clone()];
            self.writer.path = path;
        }

        if let Ok(value) = std::env::var("BLOBMETER_BUFFER_SIZE") {
            self.writer.buffer_size = parse_env("BLOBMETER_BUFFER_SIZE", &value)?;
        }

        if let Ok(value) = std::env::var("BLOBMETER_FLUSH_INTERVAL_MS") {
            let interval: u64 = parse_env("BLOBMETER_FLUSH_INTERVAL_MS", &value)?;
            // 0 disables the timer
            self.writer.flush_interval_ms = (interval > 0).then_some(interval);
        }

        if let Ok(value) = std::env::var("BLOBMETER_REGRESSION_THRESHOLD") {
            self.reader.regression_threshold_pct =
                parse_env("BLOBMETER_REGRESSION_THRESHOLD", &value)?;
        }

        Ok(())
    }

    /// Defaults plus environment overrides
    pub fn load_from_env() -> Result<Self> {
        let mut config = ResultsConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.writer.path.as_os_str().is_empty() {
            return Err(ResultsError::Config {
                reason: "writer.path must not be empty".to_string(),
            });
        }

        if self.writer.buffer_size == 0 {
            return Err(ResultsError::Config {
                reason: "writer.buffer_size must be greater than 0".to_string(),
            });
        }

        if self.writer.channel_capacity == 0 {
            return Err(ResultsError::Config {
                reason: "writer.channel_capacity must be greater than 0".to_string(),
            });
        }

        if self.writer.flush_interval_ms == Some(0) {
            return Err(ResultsError::Config {
                reason: "writer.flush_interval_ms must be greater than 0 when set".to_string(),
            });
        }

        let threshold = self.reader.regression_threshold_pct;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ResultsError::Config {
                reason: format!(
                    "reader.regression_threshold_pct must be non-negative, got {}",
                    threshold
                ),
            });
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ResultsError::Config {
        reason: format!("invalid value for {}: {}", field, value),
    })
}
