//! Result log write, read and query behavior

use std::collections::HashSet;

use anyhow::Result;
use blobmeter_results::{
    BenchmarkRecord, Environment, FieldValue, RecordField, RecordFilter, ResultReader,
    ResultWriter, WriteMode, WriterConfig,
};
use blobmeter_tests::generators::{latency_samples, timed_record};
use blobmeter_tests::{assert_close, init_test_environment, write_records, RecordGenerator};
use futures::TryStreamExt;
use tempfile::TempDir;

#[tokio::test]
async fn test_written_records_read_back_identically() -> Result<()> {
    init_test_environment();

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    let records = RecordGenerator::with_seed(11).generate(250);

    write_records(&path, &records).await?;

    let read = ResultReader::new([&path]).read_all().await?;
    assert_eq!(read.len(), records.len());
    assert_eq!(read, records);
    Ok(())
}

#[tokio::test]
async fn test_computed_timings_read_back_identically() -> Result<()> {
    init_test_environment();

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    let records: Vec<BenchmarkRecord> = (0..200u64)
        .map(|seed| {
            let samples = latency_samples(seed, 64, 1.0 + seed as f64 / 3.0);
            BenchmarkRecord::new(format!("timed-{}", seed), "sqlite", "computed")
                .with_timings(&samples)
        })
        .collect();

    write_records(&path, &records).await?;

    let read = ResultReader::new([&path]).read_all().await?;
    assert_eq!(read, records);
    Ok(())
}

#[tokio::test]
async fn test_filters_combine_as_conjunction() -> Result<()> {
    init_test_environment();

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    let records = RecordGenerator::with_seed(3).generate(300);
    write_records(&path, &records).await?;

    let reader = ResultReader::new([&path]);
    let filter = RecordFilter::new()
        .with_database("sqlite")
        .with_environment(Environment::DurableObject);
    let matched = reader.read(&filter).await?;

    let expected: Vec<_> = records
        .iter()
        .filter(|r| r.database == "sqlite" && r.environment == Environment::DurableObject)
        .cloned()
        .collect();
    assert!(!expected.is_empty());
    assert_eq!(matched, expected);
    assert_eq!(reader.count(&filter).await?, expected.len());

    // the empty filter returns everything
    assert_eq!(reader.count(&RecordFilter::new()).await?, records.len());
    Ok(())
}

#[tokio::test]
async fn test_missing_and_empty_inputs() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let reader = ResultReader::new([temp_dir.path().join("nope.jsonl")]);

    assert!(reader.read_all().await?.is_empty());
    assert_eq!(reader.count(&RecordFilter::new()).await?, 0);
    assert!(!reader.exists(&RecordFilter::new()).await?);
    assert!(reader.first(&RecordFilter::new()).await?.is_none());
    assert!(reader.compare("a", "b").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_corrupt_lines_are_skipped() -> Result<()> {
    init_test_environment();

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    let records = RecordGenerator::with_seed(5).generate(4);
    write_records(&path, &records).await?;

    let mut contents = tokio::fs::read_to_string(&path).await?;
    contents.push_str("{\"benchmark\": \"truncated\n");
    contents.push_str("not json at all\n\n");
    tokio::fs::write(&path, contents).await?;
    write_records(&path, &records[..1]).await?;

    let read = ResultReader::new([&path]).read_all().await?;
    assert_eq!(read.len(), 5);
    assert_eq!(read[4], records[0]);
    Ok(())
}

#[tokio::test]
async fn test_stream_respects_limit_and_offset() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    let records = RecordGenerator::with_seed(9).generate(50);
    write_records(&path, &records).await?;

    let reader = ResultReader::new([&path]);
    let streamed: Vec<_> = reader
        .stream(&RecordFilter::new().with_offset(10).with_limit(5))
        .try_collect()
        .await?;
    assert_eq!(streamed, records[10..15].to_vec());

    let fastest = reader
        .first(&RecordFilter::new().sort_by(RecordField::P50Ms).ascending())
        .await?
        .ok_or_else(|| anyhow::anyhow!("expected a record"))?;
    let minimum = records
        .iter()
        .map(|r| r.p50_ms)
        .fold(f64::INFINITY, f64::min);
    assert_eq!(fastest.p50_ms, minimum);
    Ok(())
}

#[tokio::test]
async fn test_distinct_and_aggregate() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    let records = RecordGenerator::with_seed(21).generate(120);
    write_records(&path, &records).await?;

    let reader = ResultReader::new([&path]);
    let databases = reader
        .distinct(&RecordField::Database, &RecordFilter::new())
        .await?;
    let expected: HashSet<_> = records.iter().map(|r| r.database.clone()).collect();
    assert_eq!(databases.len(), expected.len());
    for value in &databases {
        assert!(matches!(value, FieldValue::Text(name) if expected.contains(name)));
    }

    let groups = reader
        .aggregate(&[RecordField::Database], &RecordFilter::new())
        .await?;
    assert_eq!(groups.len(), expected.len());
    let total: usize = groups.iter().map(|group| group.count).sum();
    assert_eq!(total, records.len());

    let stats = reader
        .stats(&RecordField::OpsPerSec, &RecordFilter::new())
        .await?;
    assert_eq!(stats.count, records.len());
    assert!(stats.min <= stats.median && stats.median <= stats.max);
    Ok(())
}

#[tokio::test]
async fn test_regression_threshold() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    write_records(
        &path,
        &[
            timed_record("small-drift", "sqlite", "base", 10.0, 20.0, 100.0),
            timed_record("big-drift", "sqlite", "base", 10.0, 20.0, 100.0),
            timed_record("small-drift", "sqlite", "head", 10.4, 20.0, 100.0),
            timed_record("big-drift", "sqlite", "head", 11.0, 20.0, 100.0),
        ],
    )
    .await?;

    let comparisons = ResultReader::new([&path]).compare("base", "head").await?;
    assert_eq!(comparisons.len(), 2);

    let big = &comparisons[0];
    assert_eq!(big.benchmark, "big-drift");
    assert_close(big.p50_change_pct, 10.0, 1e-9);
    assert!(big.significant);
    assert!(big.regression);

    let small = &comparisons[1];
    assert_eq!(small.benchmark, "small-drift");
    assert_close(small.p50_change_pct, 4.0, 1e-9);
    assert!(!small.significant);
    assert!(!small.regression);

    // a tighter threshold flags the small drift too
    let strict = ResultReader::new([&path])
        .with_regression_threshold(2.0)
        .compare("base", "head")
        .await?;
    assert!(strict.iter().all(|comparison| comparison.regression));
    Ok(())
}

#[tokio::test]
async fn test_rotation_keeps_every_record_readable() -> Result<()> {
    init_test_environment();

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("results.jsonl");
    let records = RecordGenerator::with_seed(17).generate(40);

    let writer = ResultWriter::open(WriterConfig {
        mode: WriteMode::Overwrite,
        flush_interval_ms: None,
        ..WriterConfig::for_path(&path)
    })
    .await?;

    writer.write_batch(records[..20].iter().cloned())?;
    writer.flush().await?;
    let rotated = writer
        .rotate_if_larger_than(1)
        .await?
        .ok_or_else(|| anyhow::anyhow!("file should have rotated"))?;
    writer.write_batch(records[20..].iter().cloned())?;
    writer.close().await?;

    let reader = ResultReader::from_directory(temp_dir.path()).await?;
    assert_eq!(reader.paths().len(), 2);
    assert!(reader.paths().contains(&rotated));

    let mut read = reader.read_all().await?;
    read.sort_by_key(|record| record.timestamp);
    assert_eq!(read, records);
    Ok(())
}
