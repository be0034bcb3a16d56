use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use blobmeter_results::{BenchmarkRecord, Environment, ResultWriter};

/// Seeded generator for realistic benchmark records
pub struct RecordGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    sequence: u64,
}

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub benchmarks: Vec<String>,
    pub databases: Vec<String>,
    pub environments: Vec<Environment>,
    pub run_ids: Vec<String>,
    /// Timestamp of the first record; later ones step forward one second
    pub start: DateTime<Utc>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            benchmarks: vec![
                "point-read".to_string(),
                "bulk-insert".to_string(),
                "range-scan".to_string(),
            ],
            databases: vec![
                "sqlite".to_string(),
                "kv".to_string(),
                "postgres".to_string(),
            ],
            environments: vec![
                Environment::Worker,
                Environment::DurableObject,
                Environment::Local,
            ],
            run_ids: vec!["run-a".to_string(), "run-b".to_string()],
            start: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_default(),
        }
    }
}

impl RecordGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            sequence: 0,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(GeneratorConfig {
            seed,
            ..GeneratorConfig::default()
        })
    }

    pub fn generate(&mut self, count: usize) -> Vec<BenchmarkRecord> {
        (0..count).map(|_| self.next_record()).collect()
    }

    pub fn next_record(&mut self) -> BenchmarkRecord {
        let benchmark = pick(&mut self.rng, &self.config.benchmarks);
        let database = pick(&mut self.rng, &self.config.databases);
        let run_id = pick(&mut self.rng, &self.config.run_ids);
        let environment = pick(&mut self.rng, &self.config.environments);

        let p50 = self.quarter(1, 200);
        let p99 = p50 + self.quarter(0, 400);
        let iterations = self.rng.gen_range(10..10_000u64);
        let reads = self.rng.gen_range(0..5_000u64);
        let writes = self.rng.gen_range(0..1_000u64);

        let timestamp = self.config.start + Duration::seconds(self.sequence as i64);
        self.sequence += 1;

        let mut record = BenchmarkRecord::new(benchmark, database, run_id)
            .with_dataset(format!("dataset-{}", self.rng.gen_range(1..4)))
            .with_environment(environment)
            .with_timestamp(timestamp);

        record.p50_ms = p50;
        record.p99_ms = p99;
        record.min_ms = p50 / 2.0;
        record.max_ms = p99 * 2.0;
        record.mean_ms = (p50 + p99) / 2.0;
        record.stddev_ms = self.quarter(0, 40);
        record.ops_per_sec = self.quarter(10, 50_000);
        record.iterations = iterations;
        record.total_duration_ms = Some(record.mean_ms * iterations as f64);
        record.vfs_reads = reads;
        record.vfs_writes = writes;
        record.vfs_bytes_read = reads * 4096;
        record.vfs_bytes_written = writes * 4096;

        if self.rng.gen_bool(0.5) {
            record.write_amplification = Some(self.quarter(4, 16));
            record.read_amplification = Some(self.quarter(4, 8));
            record.estimated_cost = Some(writes as f64 / 1000.0);
        }
        if environment == Environment::DurableObject {
            record.colo = Some("SJC".to_string());
            record.cold_start = Some(self.rng.gen_bool(0.2));
        }
        if self.rng.gen_bool(0.3) {
            record = record
                .with_git("0123abcd", Some("main".to_string()))
                .with_tag("suite", "nightly");
        }

        record
    }

    /// Random multiple of 0.25 in `[low, high)`
    fn quarter(&mut self, low: u32, high: u32) -> f64 {
        f64::from(self.rng.gen_range(low * 4..high.max(low + 1) * 4)) / 4.0
    }
}

fn pick<T: Clone>(rng: &mut StdRng, choices: &[T]) -> T {
    choices[rng.gen_range(0..choices.len())].clone()
}

/// Common generators used across the integration tests
pub mod generators {
    use super::*;

    /// Record with explicit latency and throughput figures
    pub fn timed_record(
        benchmark: &str,
        database: &str,
        run_id: &str,
        p50_ms: f64,
        p99_ms: f64,
        ops_per_sec: f64,
    ) -> BenchmarkRecord {
        let mut record = BenchmarkRecord::new(benchmark, database, run_id);
        record.p50_ms = p50_ms;
        record.p99_ms = p99_ms;
        record.ops_per_sec = ops_per_sec;
        record
    }

    /// Pseudo-random per-iteration latencies around `center_ms`
    pub fn latency_samples(seed: u64, count: usize, center_ms: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| center_ms * rng.gen_range(0.5..1.5))
            .collect()
    }
}

/// Write `records` through a fresh writer at `path` and close it
pub async fn write_records(path: &Path, records: &[BenchmarkRecord]) -> Result<()> {
    let writer = ResultWriter::open_path(path).await?;
    writer.write_batch(records.iter().cloned())?;
    writer.close().await?;
    Ok(())
}

/// Assert two floats agree within `tolerance`
#[track_caller]
pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} to be within {} of {}",
        actual,
        tolerance,
        expected
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_deterministic() {
        let first = RecordGenerator::with_seed(7).generate(20);
        let second = RecordGenerator::with_seed(7).generate(20);
        assert_eq!(first, second);
    }

    #[test]
    fn test_generated_records_are_consistent() {
        for record in RecordGenerator::with_seed(1).generate(100) {
            assert!(record.p99_ms >= record.p50_ms);
            assert!(record.p50_ms >= 1.0);
            assert!(!record.run_id.is_empty());
        }
    }
}
