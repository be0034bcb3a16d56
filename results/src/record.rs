//! Benchmark record schema
//!
//! One [`BenchmarkRecord`] is one line of the result log. Field names are the
//! on-disk format and must stay stable across releases so that runs remain
//! comparable. Only `benchmark`, `database` and `run_id` are required when
//! decoding; every other field falls back to a zero value.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use blobmeter_interceptor::Metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stats;

/// Current record schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Where a benchmark ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Worker,
    /// Durable object
    #[serde(rename = "do")]
    DurableObject,
    Container,
    #[default]
    Local,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Worker => "worker",
            Environment::DurableObject => "do",
            Environment::Container => "container",
            Environment::Local => "local",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "worker" => Ok(Environment::Worker),
            "do" => Ok(Environment::DurableObject),
            "container" => Ok(Environment::Container),
            "local" => Ok(Environment::Local),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// Correlation token for one benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Time-prefixed unique run id, e.g. `20261019T120000Z-1f3a9c2b`
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        RunId(format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        RunId(id.to_string())
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        RunId(id)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// One benchmark measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    // Identity
    pub benchmark: String,
    pub database: String,
    #[serde(default)]
    pub dataset: String,

    // Timing, milliseconds
    #[serde(default)]
    pub p50_ms: f64,
    #[serde(default)]
    pub p99_ms: f64,
    #[serde(default)]
    pub min_ms: f64,
    #[serde(default)]
    pub max_ms: f64,
    #[serde(default)]
    pub mean_ms: f64,
    #[serde(default)]
    pub stddev_ms: f64,

    // Throughput
    #[serde(default)]
    pub ops_per_sec: f64,
    #[serde(default)]
    pub iterations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<f64>,

    // Storage traffic observed by the interceptor
    #[serde(default)]
    pub vfs_reads: u64,
    #[serde(default)]
    pub vfs_writes: u64,
    #[serde(default)]
    pub vfs_bytes_read: u64,
    #[serde(default)]
    pub vfs_bytes_written: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_amplification: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_amplification: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,

    // Environment
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_start: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_ms: Option<f64>,

    // Provenance
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

impl Default for BenchmarkRecord {
    fn default() -> Self {
        Self {
            benchmark: String::new(),
            database: String::new(),
            dataset: String::new(),
            p50_ms: 0.0,
            p99_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            mean_ms: 0.0,
            stddev_ms: 0.0,
            ops_per_sec: 0.0,
            iterations: 0,
            total_duration_ms: None,
            vfs_reads: 0,
            vfs_writes: 0,
            vfs_bytes_read: 0,
            vfs_bytes_written: 0,
            write_amplification: None,
            read_amplification: None,
            estimated_cost: None,
            timestamp: DateTime::<Utc>::default(),
            environment: Environment::default(),
            colo: None,
            container_size: None,
            cold_start: None,
            memory_mb: None,
            cpu_ms: None,
            run_id: String::new(),
            git_sha: None,
            git_branch: None,
            tags: BTreeMap::new(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl BenchmarkRecord {
    /// Record stamped with the current time; everything else zeroed
    pub fn new(
        benchmark: impl Into<String>,
        database: impl Into<String>,
        run_id: impl Into<RunId>,
    ) -> Self {
        let run_id: RunId = run_id.into();
        Self {
            benchmark: benchmark.into(),
            database: database.into(),
            run_id: run_id.into(),
            timestamp: Utc::now(),
            ..Self::default()
        }
    }

    /// Fill timing and throughput fields from per-iteration latencies in ms
    pub fn with_timings(mut self, samples_ms: &[f64]) -> Self {
        let total: f64 = samples_ms.iter().sum();

        self.p50_ms = stats::percentile(samples_ms, 50.0);
        self.p99_ms = stats::percentile(samples_ms, 99.0);
        self.min_ms = stats::min(samples_ms);
        self.max_ms = stats::max(samples_ms);
        self.mean_ms = stats::mean(samples_ms);
        self.stddev_ms = stats::standard_deviation(samples_ms);
        self.iterations = samples_ms.len() as u64;
        self.total_duration_ms = Some(total);
        self.ops_per_sec = if total > 0.0 {
            samples_ms.len() as f64 / (total / 1000.0)
        } else {
            0.0
        };
        self
    }

    /// Flatten a metrics snapshot into the storage traffic fields
    ///
    /// Reads and writes count billable units (rows plus blobs).
    pub fn with_metrics(mut self, metrics: &Metrics) -> Self {
        self.vfs_reads = metrics.rows_read + metrics.blobs_read;
        self.vfs_writes = metrics.rows_written + metrics.blobs_written;
        self.vfs_bytes_read = metrics.bytes_read;
        self.vfs_bytes_written = metrics.bytes_written;
        self.write_amplification = Some(metrics.write_amplification);
        self.read_amplification = Some(metrics.read_amplification);
        self.estimated_cost = Some(metrics.estimated_total_cost);
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_git(mut self, sha: impl Into<String>, branch: Option<String>) -> Self {
        self.git_sha = Some(sha.into());
        self.git_branch = branch;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// `(benchmark, database)` pair used to join runs
    pub fn comparison_key(&self) -> (&str, &str) {
        (&self.benchmark, &self.database)
    }
}
