//! Record fields and query filters
//!
//! A [`RecordFilter`] is a conjunction of optional criteria plus sort and
//! pagination settings. Unset criteria match everything, so the default
//! filter returns every record in file order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{Result, ResultsError};
use crate::record::{BenchmarkRecord, Environment};

/// Addressable record field, named as in the on-disk format
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordField {
    Benchmark,
    Database,
    Dataset,
    Environment,
    RunId,
    GitSha,
    GitBranch,
    Colo,
    ContainerSize,
    ColdStart,
    Timestamp,
    P50Ms,
    P99Ms,
    MinMs,
    MaxMs,
    MeanMs,
    StddevMs,
    OpsPerSec,
    Iterations,
    TotalDurationMs,
    VfsReads,
    VfsWrites,
    VfsBytesRead,
    VfsBytesWritten,
    WriteAmplification,
    ReadAmplification,
    EstimatedCost,
    MemoryMb,
    CpuMs,
    /// `tags.<name>`
    Tag(String),
}

/// Value of one field on one record
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Time(DateTime<Utc>),
    Missing,
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    /// Total order used for sorting; missing values sort lowest
    pub fn compare(&self, other: &FieldValue) -> Ordering {
        use FieldValue::*;
        match (self, other) {
            (Number(a), Number(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Flag(a), Flag(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (Missing, Missing) => Ordering::Equal,
            (Missing, _) => Ordering::Less,
            (_, Missing) => Ordering::Greater,
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Flag(b) => write!(f, "{}", b),
            FieldValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            FieldValue::Missing => Ok(()),
        }
    }
}

fn text(value: &str) -> FieldValue {
    FieldValue::Text(value.to_string())
}

fn optional_text(value: &Option<String>) -> FieldValue {
    value.as_deref().map(text).unwrap_or(FieldValue::Missing)
}

fn optional_number(value: Option<f64>) -> FieldValue {
    value.map(FieldValue::Number).unwrap_or(FieldValue::Missing)
}

impl RecordField {
    /// Read this field from `record`
    pub fn value(&self, record: &BenchmarkRecord) -> FieldValue {
        use FieldValue::Number;
        match self {
            RecordField::Benchmark => text(&record.benchmark),
            RecordField::Database => text(&record.database),
            RecordField::Dataset => text(&record.dataset),
            RecordField::Environment => text(record.environment.as_str()),
            RecordField::RunId => text(&record.run_id),
            RecordField::GitSha => optional_text(&record.git_sha),
            RecordField::GitBranch => optional_text(&record.git_branch),
            RecordField::Colo => optional_text(&record.colo),
            RecordField::ContainerSize => optional_text(&record.container_size),
            RecordField::ColdStart => record
                .cold_start
                .map(FieldValue::Flag)
                .unwrap_or(FieldValue::Missing),
            RecordField::Timestamp => FieldValue::Time(record.timestamp),
            RecordField::P50Ms => Number(record.p50_ms),
            RecordField::P99Ms => Number(record.p99_ms),
            RecordField::MinMs => Number(record.min_ms),
            RecordField::MaxMs => Number(record.max_ms),
            RecordField::MeanMs => Number(record.mean_ms),
            RecordField::StddevMs => Number(record.stddev_ms),
            RecordField::OpsPerSec => Number(record.ops_per_sec),
            RecordField::Iterations => Number(record.iterations as f64),
            RecordField::TotalDurationMs => optional_number(record.total_duration_ms),
            RecordField::VfsReads => Number(record.vfs_reads as f64),
            RecordField::VfsWrites => Number(record.vfs_writes as f64),
            RecordField::VfsBytesRead => Number(record.vfs_bytes_read as f64),
            RecordField::VfsBytesWritten => Number(record.vfs_bytes_written as f64),
            RecordField::WriteAmplification => optional_number(record.write_amplification),
            RecordField::ReadAmplification => optional_number(record.read_amplification),
            RecordField::EstimatedCost => optional_number(record.estimated_cost),
            RecordField::MemoryMb => optional_number(record.memory_mb.map(|mb| mb as f64)),
            RecordField::CpuMs => optional_number(record.cpu_ms),
            RecordField::Tag(name) => record
                .tags
                .get(name)
                .map(|value| text(value))
                .unwrap_or(FieldValue::Missing),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            RecordField::P50Ms
                | RecordField::P99Ms
                | RecordField::MinMs
                | RecordField::MaxMs
                | RecordField::MeanMs
                | RecordField::StddevMs
                | RecordField::OpsPerSec
                | RecordField::Iterations
                | RecordField::TotalDurationMs
                | RecordField::VfsReads
                | RecordField::VfsWrites
                | RecordField::VfsBytesRead
                | RecordField::VfsBytesWritten
                | RecordField::WriteAmplification
                | RecordField::ReadAmplification
                | RecordField::EstimatedCost
                | RecordField::MemoryMb
                | RecordField::CpuMs
        )
    }

    pub fn name(&self) -> String {
        let name = match self {
            RecordField::Benchmark => "benchmark",
            RecordField::Database => "database",
            RecordField::Dataset => "dataset",
            RecordField::Environment => "environment",
            RecordField::RunId => "run_id",
            RecordField::GitSha => "git_sha",
            RecordField::GitBranch => "git_branch",
            RecordField::Colo => "colo",
            RecordField::ContainerSize => "container_size",
            RecordField::ColdStart => "cold_start",
            RecordField::Timestamp => "timestamp",
            RecordField::P50Ms => "p50_ms",
            RecordField::P99Ms => "p99_ms",
            RecordField::MinMs => "min_ms",
            RecordField::MaxMs => "max_ms",
            RecordField::MeanMs => "mean_ms",
            RecordField::StddevMs => "stddev_ms",
            RecordField::OpsPerSec => "ops_per_sec",
            RecordField::Iterations => "iterations",
            RecordField::TotalDurationMs => "total_duration_ms",
            RecordField::VfsReads => "vfs_reads",
            RecordField::VfsWrites => "vfs_writes",
            RecordField::VfsBytesRead => "vfs_bytes_read",
            RecordField::VfsBytesWritten => "vfs_bytes_written",
            RecordField::WriteAmplification => "write_amplification",
            RecordField::ReadAmplification => "read_amplification",
            RecordField::EstimatedCost => "estimated_cost",
            RecordField::MemoryMb => "memory_mb",
            RecordField::CpuMs => "cpu_ms",
            RecordField::Tag(tag) => return format!("tags.{}", tag),
        };
        name.to_string()
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for RecordField {
    type Err = ResultsError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(tag) = s.strip_prefix("tags.") {
            if !tag.is_empty() {
                return Ok(RecordField::Tag(tag.to_string()));
            }
        }

        let field = match s {
            "benchmark" => RecordField::Benchmark,
            "database" => RecordField::Database,
            "dataset" => RecordField::Dataset,
            "environment" => RecordField::Environment,
            "run_id" => RecordField::RunId,
            "git_sha" => RecordField::GitSha,
            "git_branch" => RecordField::GitBranch,
            "colo" => RecordField::Colo,
            "container_size" => RecordField::ContainerSize,
            "cold_start" => RecordField::ColdStart,
            "timestamp" => RecordField::Timestamp,
            "p50_ms" => RecordField::P50Ms,
            "p99_ms" => RecordField::P99Ms,
            "min_ms" => RecordField::MinMs,
            "max_ms" => RecordField::MaxMs,
            "mean_ms" => RecordField::MeanMs,
            "stddev_ms" => RecordField::StddevMs,
            "ops_per_sec" => RecordField::OpsPerSec,
            "iterations" => RecordField::Iterations,
            "total_duration_ms" => RecordField::TotalDurationMs,
            "vfs_reads" => RecordField::VfsReads,
            "vfs_writes" => RecordField::VfsWrites,
            "vfs_bytes_read" => RecordField::VfsBytesRead,
            "vfs_bytes_written" => RecordField::VfsBytesWritten,
            "write_amplification" => RecordField::WriteAmplification,
            "read_amplification" => RecordField::ReadAmplification,
            "estimated_cost" => RecordField::EstimatedCost,
            "memory_mb" => RecordField::MemoryMb,
            "cpu_ms" => RecordField::CpuMs,
            other => {
                return Err(ResultsError::UnknownField {
                    name: other.to_string(),
                })
            }
        };
        Ok(field)
    }
}

/// Benchmark name criterion
#[derive(Debug, Clone)]
pub enum NameMatch {
    Exact(String),
    Pattern(Regex),
}

impl NameMatch {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatch::Exact(expected) => expected == name,
            NameMatch::Pattern(regex) => regex.is_match(name),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Arbitrary record predicate
pub type RecordPredicate = Arc<dyn Fn(&BenchmarkRecord) -> bool + Send + Sync>;

/// Conjunctive record filter with sort and pagination
#[derive(Clone, Default)]
pub struct RecordFilter {
    pub name: Option<NameMatch>,
    pub databases: Option<HashSet<String>>,
    pub datasets: Option<HashSet<String>>,
    pub environments: Option<HashSet<Environment>>,
    pub run_id: Option<String>,
    pub git_sha: Option<String>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub until: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
    pub predicate: Option<RecordPredicate>,

    pub sort_by: Option<RecordField>,
    pub order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordFilter")
            .field("name", &self.name)
            .field("databases", &self.databases)
            .field("datasets", &self.datasets)
            .field("environments", &self.environments)
            .field("run_id", &self.run_id)
            .field("git_sha", &self.git_sha)
            .field("since", &self.since)
            .field("until", &self.until)
            .field("tags", &self.tags)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("sort_by", &self.sort_by)
            .field("order", &self.order)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_benchmark(mut self, name: impl Into<String>) -> Self {
        self.name = Some(NameMatch::Exact(name.into()));
        self
    }

    /// Match benchmark names against a regular expression
    pub fn with_benchmark_pattern(mut self, pattern: &str) -> Result<Self> {
        self.name = Some(NameMatch::Pattern(Regex::new(pattern)?));
        Ok(self)
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.databases
            .get_or_insert_with(HashSet::new)
            .insert(database.into());
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.datasets
            .get_or_insert_with(HashSet::new)
            .insert(dataset.into());
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environments
            .get_or_insert_with(HashSet::new)
            .insert(environment);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_git_sha(mut self, sha: impl Into<String>) -> Self {
        self.git_sha = Some(sha.into());
        self
    }

    pub fn with_time_range(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BenchmarkRecord) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sort by `field`, descending unless changed with [`Self::ascending`]
    pub fn sort_by(mut self, field: RecordField) -> Self {
        self.sort_by = Some(field);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.order = SortOrder::Ascending;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same criteria without sort or pagination
    pub fn criteria_only(&self) -> Self {
        Self {
            sort_by: None,
            order: SortOrder::default(),
            offset: 0,
            limit: None,
            ..self.clone()
        }
    }

    /// Whether `record` satisfies every criterion
    pub fn matches(&self, record: &BenchmarkRecord) -> bool {
        if let Some(name) = &self.name {
            if !name.matches(&record.benchmark) {
                return false;
            }
        }

        if let Some(databases) = &self.databases {
            if !databases.contains(&record.database) {
                return false;
            }
        }

        if let Some(datasets) = &self.datasets {
            if !datasets.contains(&record.dataset) {
                return false;
            }
        }

        if let Some(environments) = &self.environments {
            if !environments.contains(&record.environment) {
                return false;
            }
        }

        if let Some(run_id) = &self.run_id {
            if &record.run_id != run_id {
                return false;
            }
        }

        if let Some(sha) = &self.git_sha {
            if record.git_sha.as_ref() != Some(sha) {
                return false;
            }
        }

        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if record.timestamp > until {
                return false;
            }
        }

        if !self
            .tags
            .iter()
            .all(|(key, value)| record.tags.get(key) == Some(value))
        {
            return false;
        }

        match &self.predicate {
            Some(predicate) => predicate(record),
            None => true,
        }
    }

    /// Sort `records` in place per `sort_by` and `order`
    pub fn sort(&self, records: &mut [BenchmarkRecord]) {
        if let Some(field) = &self.sort_by {
            records.sort_by(|a, b| {
                let ordering = field.value(a).compare(&field.value(b));
                match self.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }
    }

    /// Apply offset and limit
    pub fn paginate(&self, records: Vec<BenchmarkRecord>) -> Vec<BenchmarkRecord> {
        let limit = self.limit.unwrap_or(usize::MAX);
        records
            .into_iter()
            .skip(self.offset)
            .take(limit)
            .collect()
    }
}
