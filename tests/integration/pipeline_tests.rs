//! End-to-end: meter a workload, log the results, compare runs

use std::time::Instant;

use anyhow::Result;
use blobmeter_interceptor::memory::row;
use blobmeter_interceptor::{
    BlobStore, BlobValue, Interceptor, ListOptions, MemorySql, MemoryStore, SessionAggregator,
    SqlExecutor,
};
use blobmeter_results::{
    BenchmarkRecord, Environment, RecordField, RecordFilter, ResultReader, ResultWriter, RunId,
    WriterConfig,
};
use blobmeter_tests::generators::{latency_samples, timed_record};
use blobmeter_tests::{assert_close, init_test_environment, reference_pricing, write_records};
use serde_json::json;
use tempfile::TempDir;

/// Drive a small key/value workload and return per-iteration latencies
fn run_kv_workload(store: &dyn BlobStore, iterations: usize) -> Result<Vec<f64>> {
    let mut samples = Vec::with_capacity(iterations);
    for i in 0..iterations {
        let start = Instant::now();
        let key = format!("item:{:04}", i);
        store.put(&key, BlobValue::from(json!({ "id": i, "payload": "x".repeat(32) })))?;
        store.get(&key)?;
        samples.push(start.elapsed().as_secs_f64() * 1000.0);
    }
    store.list(&ListOptions::with_prefix("item:").limit(10))?;
    Ok(samples)
}

#[tokio::test]
async fn test_metered_workload_round_trips_through_log() -> Result<()> {
    init_test_environment();

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("bench").join("results.jsonl");
    let run_id = RunId::generate();

    let interceptor = Interceptor::new(reference_pricing());
    let store = interceptor.wrap_store(MemoryStore::new());
    let samples = run_kv_workload(&store, 100)?;

    let metrics = interceptor.metrics();
    assert_eq!(metrics.blobs_written, 100);
    assert_eq!(metrics.blobs_read, 110);

    let record = BenchmarkRecord::new("kv-put-get", "memory", run_id.clone())
        .with_environment(Environment::Local)
        .with_timings(&samples)
        .with_metrics(&metrics)
        .with_tag("workload", "kv");

    assert_eq!(record.vfs_writes, 100);
    assert_eq!(record.vfs_reads, 110);
    assert_eq!(record.vfs_bytes_written, metrics.bytes_written);
    assert_eq!(record.estimated_cost, Some(metrics.estimated_total_cost));
    assert_eq!(record.iterations, 100);

    let writer = ResultWriter::open(WriterConfig {
        buffer_size: 1,
        ..WriterConfig::for_path(&path)
    })
    .await?;
    writer.write(record.clone())?;
    writer.close().await?;
    assert_eq!(writer.stats().records_written, 1);

    let reader = ResultReader::new([&path]);
    let stored = reader
        .first(&RecordFilter::new().with_run_id(run_id.as_str()))
        .await?
        .ok_or_else(|| anyhow::anyhow!("record missing from log"))?;

    assert_eq!(stored.benchmark, "kv-put-get");
    assert_eq!(stored.vfs_writes, record.vfs_writes);
    assert_eq!(stored.tags.get("workload").map(String::as_str), Some("kv"));
    assert_eq!(stored, record);
    Ok(())
}

#[tokio::test]
async fn test_run_comparison_flags_regression() -> Result<()> {
    init_test_environment();

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    write_records(
        &path,
        &[
            timed_record("q", "sqlite", "r1", 5.0, 9.0, 200.0),
            timed_record("q", "sqlite", "r2", 6.0, 10.0, 160.0),
        ],
    )
    .await?;

    let comparisons = ResultReader::new([&path]).compare("r1", "r2").await?;
    assert_eq!(comparisons.len(), 1);

    let comparison = &comparisons[0];
    assert_eq!(comparison.benchmark, "q");
    assert_eq!(comparison.database, "sqlite");
    assert_close(comparison.p50_change_pct, 20.0, 1e-9);
    assert_close(comparison.p99_change_pct, 100.0 / 9.0, 1e-9);
    assert_close(comparison.ops_per_sec_change_pct, -20.0, 1e-9);
    assert!(comparison.significant);
    assert!(comparison.regression);
    assert!(!comparison.improvement);
    Ok(())
}

#[tokio::test]
async fn test_sql_session_feeds_records() -> Result<()> {
    init_test_environment();

    let rows = (0..25).map(|i| row([("n", json!(i))])).collect::<Vec<_>>();
    let interceptor = Interceptor::new(reference_pricing());
    let sql = interceptor.wrap_sql(
        MemorySql::new()
            .respond("SELECT", rows)
            .respond_write("INSERT", 25),
    );

    let mut session = SessionAggregator::new(reference_pricing());
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("sessions.jsonl");
    let writer = ResultWriter::open_path(&path).await?;

    for (database, round) in [("sqlite", 0u32), ("postgres", 1)] {
        let before = interceptor.metrics();
        let start = Instant::now();
        sql.exec("INSERT INTO t SELECT value FROM series(25)", &[])?;
        let read = sql.exec("SELECT n FROM t", &[])?.to_array();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let after = interceptor.metrics();
        session.record(
            "insert-then-scan",
            after.rows_read - before.rows_read,
            after.rows_written - before.rows_written,
            elapsed_ms,
        );
        assert_eq!(read.len(), 25);

        let samples = latency_samples(u64::from(round), 50, 2.0);
        writer.write(
            BenchmarkRecord::new("insert-then-scan", database, "session")
                .with_timings(&samples)
                .with_metrics(&after),
        )?;
    }
    writer.close().await?;

    let summary = session.summary();
    assert_eq!(summary.total_operations, 2);
    assert_eq!(summary.total_rows_read, 50);
    assert_eq!(summary.total_rows_written, 50);
    assert_close(summary.estimated_write_cost, 50.0 / 1_000_000.0, 1e-12);

    let reader = ResultReader::new([&path]);
    let groups = reader
        .aggregate(&[RecordField::Database], &RecordFilter::new())
        .await?;
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|group| group.count == 1));

    let latest = reader
        .last(&RecordFilter::new().with_benchmark("insert-then-scan"))
        .await?
        .ok_or_else(|| anyhow::anyhow!("expected records"))?;
    assert_eq!(latest.database, "postgres");
    // cumulative metrics after both rounds
    assert_eq!(latest.vfs_reads, 50);
    assert_eq!(latest.vfs_writes, 50);
    Ok(())
}
