//! Grouped aggregation and run-to-run comparison

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::filter::RecordField;
use crate::record::BenchmarkRecord;
use crate::stats::{self, Distribution};

/// Separator between field values in a group key
pub const GROUP_KEY_SEPARATOR: &str = "|";

/// Totals and means of the storage traffic counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VfsSummary {
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    pub mean_reads: f64,
    pub mean_writes: f64,
    pub mean_bytes_read: f64,
    pub mean_bytes_written: f64,
}

/// Summary of one group of records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    /// Group values joined with [`GROUP_KEY_SEPARATOR`]
    pub key: String,
    /// Field name to value for each grouping field
    pub group: BTreeMap<String, String>,
    pub count: usize,
    pub p50_ms: Distribution,
    pub p99_ms: Distribution,
    pub mean_ms: Distribution,
    pub ops_per_sec: Distribution,
    pub vfs: VfsSummary,
}

#[derive(Default)]
struct GroupState {
    group: BTreeMap<String, String>,
    p50_ms: Vec<f64>,
    p99_ms: Vec<f64>,
    mean_ms: Vec<f64>,
    ops_per_sec: Vec<f64>,
    reads: u64,
    writes: u64,
    bytes_read: u64,
    bytes_written: u64,
}

impl GroupState {
    fn add(&mut self, record: &BenchmarkRecord) {
        self.p50_ms.push(record.p50_ms);
        self.p99_ms.push(record.p99_ms);
        self.mean_ms.push(record.mean_ms);
        self.ops_per_sec.push(record.ops_per_sec);
        self.reads += record.vfs_reads;
        self.writes += record.vfs_writes;
        self.bytes_read += record.vfs_bytes_read;
        self.bytes_written += record.vfs_bytes_written;
    }

    fn finish(self, key: String) -> GroupSummary {
        let count = self.p50_ms.len();
        let mean = |total: u64| {
            if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            }
        };

        GroupSummary {
            key,
            count,
            p50_ms: Distribution::from_values(&self.p50_ms),
            p99_ms: Distribution::from_values(&self.p99_ms),
            mean_ms: Distribution::from_values(&self.mean_ms),
            ops_per_sec: Distribution::from_values(&self.ops_per_sec),
            vfs: VfsSummary {
                total_reads: self.reads,
                total_writes: self.writes,
                total_bytes_read: self.bytes_read,
                total_bytes_written: self.bytes_written,
                mean_reads: mean(self.reads),
                mean_writes: mean(self.writes),
                mean_bytes_read: mean(self.bytes_read),
                mean_bytes_written: mean(self.bytes_written),
            },
            group: self.group,
        }
    }
}

/// Incremental grouping over a record stream
pub struct GroupAggregator {
    fields: Vec<RecordField>,
    groups: BTreeMap<Vec<String>, GroupState>,
}

impl GroupAggregator {
    /// With no fields every record lands in one group keyed `""`
    pub fn new(fields: &[RecordField]) -> Self {
        Self {
            fields: fields.to_vec(),
            groups: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, record: &BenchmarkRecord) {
        let values: Vec<String> = self
            .fields
            .iter()
            .map(|field| field.value(record).to_string())
            .collect();

        let fields = &self.fields;
        let state = self.groups.entry(values).or_insert_with_key(|values| GroupState {
            group: fields
                .iter()
                .map(RecordField::name)
                .zip(values.iter().cloned())
                .collect(),
            ..GroupState::default()
        });
        state.add(record);
    }

    /// Summaries ordered by their group values
    ///
    /// Groups are told apart by the value tuple itself; the joined `key` is
    /// only a label and may coincide for values containing the separator.
    pub fn finish(self) -> Vec<GroupSummary> {
        self.groups
            .into_iter()
            .map(|(values, state)| state.finish(values.join(GROUP_KEY_SEPARATOR)))
            .collect()
    }
}

/// Group an in-memory slice of records
pub fn aggregate_records(records: &[BenchmarkRecord], group_by: &[RecordField]) -> Vec<GroupSummary> {
    let mut aggregator = GroupAggregator::new(group_by);
    for record in records {
        aggregator.add(record);
    }
    aggregator.finish()
}

/// One matched `(benchmark, database)` pair across two runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub benchmark: String,
    pub database: String,
    pub baseline_p50_ms: f64,
    pub current_p50_ms: f64,
    pub baseline_p99_ms: f64,
    pub current_p99_ms: f64,
    pub baseline_ops_per_sec: f64,
    pub current_ops_per_sec: f64,
    pub p50_change_pct: f64,
    pub p99_change_pct: f64,
    pub ops_per_sec_change_pct: f64,
    /// Either latency percentile moved by more than the threshold
    pub significant: bool,
    /// Either latency percentile got slower by more than the threshold
    pub regression: bool,
    /// Throughput rose by more than the threshold
    pub improvement: bool,
}

impl Comparison {
    pub fn between(baseline: &BenchmarkRecord, current: &BenchmarkRecord, threshold_pct: f64) -> Self {
        let p50_change_pct = stats::percent_change(baseline.p50_ms, current.p50_ms);
        let p99_change_pct = stats::percent_change(baseline.p99_ms, current.p99_ms);
        let ops_per_sec_change_pct = stats::percent_change(baseline.ops_per_sec, current.ops_per_sec);

        Self {
            benchmark: current.benchmark.clone(),
            database: current.database.clone(),
            baseline_p50_ms: baseline.p50_ms,
            current_p50_ms: current.p50_ms,
            baseline_p99_ms: baseline.p99_ms,
            current_p99_ms: current.p99_ms,
            baseline_ops_per_sec: baseline.ops_per_sec,
            current_ops_per_sec: current.ops_per_sec,
            p50_change_pct,
            p99_change_pct,
            ops_per_sec_change_pct,
            significant: p50_change_pct.abs() > threshold_pct
                || p99_change_pct.abs() > threshold_pct,
            regression: p50_change_pct > threshold_pct || p99_change_pct > threshold_pct,
            improvement: ops_per_sec_change_pct > threshold_pct,
        }
    }
}

/// Join two runs on `(benchmark, database)`
///
/// When a run holds several records for one pair the last one wins.
/// Current records without a baseline counterpart are left out. Output is
/// ordered by benchmark, then database.
pub fn compare_records(
    baseline: &[BenchmarkRecord],
    current: &[BenchmarkRecord],
    threshold_pct: f64,
) -> Vec<Comparison> {
    let baseline: BTreeMap<(&str, &str), &BenchmarkRecord> = baseline
        .iter()
        .map(|record| (record.comparison_key(), record))
        .collect();
    let current: BTreeMap<(&str, &str), &BenchmarkRecord> = current
        .iter()
        .map(|record| (record.comparison_key(), record))
        .collect();

    current
        .into_iter()
        .filter_map(|(key, current)| {
            baseline
                .get(&key)
                .map(|baseline| Comparison::between(baseline, current, threshold_pct))
        })
        .collect()
}
