//! Streaming result log reader
//!
//! Every query is built on [`ResultReader::stream`], which reads the
//! configured files line by line in order. Missing files read as empty and
//! malformed lines are skipped with a warning.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use futures::stream::{self, Stream, TryStreamExt};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tracing::{debug, warn};

use crate::analysis::{self, Comparison, GroupSummary};
use crate::config::ReaderConfig;
use crate::error::{Result, ResultsError};
use crate::filter::{FieldValue, RecordField, RecordFilter};
use crate::record::BenchmarkRecord;
use crate::stats::Distribution;

/// Default percentage change counted as significant
pub const DEFAULT_REGRESSION_THRESHOLD_PCT: f64 = 5.0;

/// Reader over one or more JSONL result files
#[derive(Debug, Clone)]
pub struct ResultReader {
    paths: Vec<PathBuf>,
    regression_threshold_pct: f64,
}

impl ResultReader {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            regression_threshold_pct: DEFAULT_REGRESSION_THRESHOLD_PCT,
        }
    }

    pub fn from_config(config: &ReaderConfig) -> Self {
        Self {
            paths: config.paths.clone(),
            regression_threshold_pct: config.regression_threshold_pct,
        }
    }

    /// Every `*.jsonl` file in `dir`, sorted by name
    ///
    /// Rotated segments sort ahead of the live file sharing their stem. A
    /// missing directory yields a reader with no files.
    pub async fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Result directory missing, reading nothing");
                return Ok(Self::new(Vec::<PathBuf>::new()));
            }
            Err(e) => return Err(ResultsError::io(dir, e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ResultsError::io(dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(Self::new(paths))
    }

    pub fn with_regression_threshold(mut self, threshold_pct: f64) -> Self {
        self.regression_threshold_pct = threshold_pct;
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn regression_threshold(&self) -> f64 {
        self.regression_threshold_pct
    }

    /// Lazily stream matching records in file order
    ///
    /// Honors the filter's offset and limit, stopping as soon as the limit is
    /// reached. Sorting is ignored here; use [`Self::read`] for sorted output.
    pub fn stream(
        &self,
        filter: &RecordFilter,
    ) -> impl Stream<Item = Result<BenchmarkRecord>> + Send + 'static {
        let state = ScanState {
            pending: self.paths.iter().cloned().collect(),
            current: None,
            skip: filter.offset,
            remaining: filter.limit,
            filter: filter.criteria_only(),
        };

        stream::unfold(state, |mut state| async move {
            let item = state.next_record().await?;
            Some((item, state))
        })
    }

    /// Load matching records, sorted and paginated per the filter
    pub async fn read(&self, filter: &RecordFilter) -> Result<Vec<BenchmarkRecord>> {
        if filter.sort_by.is_none() {
            return self.stream(filter).try_collect().await;
        }

        let mut records: Vec<BenchmarkRecord> =
            self.stream(&filter.criteria_only()).try_collect().await?;
        filter.sort(&mut records);
        Ok(filter.paginate(records))
    }

    /// Every record in every file
    pub async fn read_all(&self) -> Result<Vec<BenchmarkRecord>> {
        self.read(&RecordFilter::default()).await
    }

    pub async fn first(&self, filter: &RecordFilter) -> Result<Option<BenchmarkRecord>> {
        let records = self.read(&filter.clone().with_limit(1)).await?;
        Ok(records.into_iter().next())
    }

    pub async fn last(&self, filter: &RecordFilter) -> Result<Option<BenchmarkRecord>> {
        if filter.sort_by.is_some() {
            return Ok(self.read(filter).await?.pop());
        }

        let mut stream = Box::pin(self.stream(filter));
        let mut last = None;
        while let Some(record) = stream.try_next().await? {
            last = Some(record);
        }
        Ok(last)
    }

    pub async fn count(&self, filter: &RecordFilter) -> Result<usize> {
        let mut stream = Box::pin(self.stream(filter));
        let mut count = 0;
        while stream.try_next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub async fn exists(&self, filter: &RecordFilter) -> Result<bool> {
        let mut stream = Box::pin(self.stream(&filter.criteria_only().with_limit(1)));
        Ok(stream.try_next().await?.is_some())
    }

    /// Distinct values of `field`, in first-seen order
    ///
    /// Records where the field is absent contribute nothing.
    pub async fn distinct(
        &self,
        field: &RecordField,
        filter: &RecordFilter,
    ) -> Result<Vec<FieldValue>> {
        let mut stream = Box::pin(self.stream(filter));
        let mut seen = HashSet::new();
        let mut values = Vec::new();

        while let Some(record) = stream.try_next().await? {
            let value = field.value(&record);
            if value.is_missing() {
                continue;
            }
            if seen.insert(value.to_string()) {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Per-group latency, throughput and storage traffic summaries
    pub async fn aggregate(
        &self,
        group_by: &[RecordField],
        filter: &RecordFilter,
    ) -> Result<Vec<GroupSummary>> {
        let mut stream = Box::pin(self.stream(filter));
        let mut aggregator = analysis::GroupAggregator::new(group_by);
        while let Some(record) = stream.try_next().await? {
            aggregator.add(&record);
        }
        Ok(aggregator.finish())
    }

    /// Compare two runs joined on `(benchmark, database)`
    pub async fn compare(&self, baseline_run: &str, current_run: &str) -> Result<Vec<Comparison>> {
        let baseline = self
            .read(&RecordFilter::new().with_run_id(baseline_run))
            .await?;
        let current = self
            .read(&RecordFilter::new().with_run_id(current_run))
            .await?;

        Ok(analysis::compare_records(
            &baseline,
            &current,
            self.regression_threshold_pct,
        ))
    }

    /// Distribution of one numeric field
    pub async fn stats(&self, field: &RecordField, filter: &RecordFilter) -> Result<Distribution> {
        if !field.is_numeric() {
            return Err(ResultsError::UnknownField { name: field.name() });
        }

        let values: Vec<f64> = self
            .stream(filter)
            .try_filter_map(|record| async move { Ok::<_, ResultsError>(field.value(&record).as_number()) })
            .try_collect()
            .await?;

        Ok(Distribution::from_values(&values))
    }
}

struct OpenFile {
    path: PathBuf,
    lines: Split<BufReader<File>>,
    line_number: usize,
}

struct ScanState {
    pending: VecDeque<PathBuf>,
    current: Option<OpenFile>,
    filter: RecordFilter,
    skip: usize,
    remaining: Option<usize>,
}

impl ScanState {
    async fn next_record(&mut self) -> Option<Result<BenchmarkRecord>> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }

            let open = match self.current.as_mut() {
                Some(open) => open,
                None => {
                    let path = self.pending.pop_front()?;
                    match File::open(&path).await {
                        Ok(file) => {
                            self.current = Some(OpenFile {
                                path,
                                lines: BufReader::new(file).split(b'\n'),
                                line_number: 0,
                            });
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            debug!(path = %path.display(), "Result file missing, skipping");
                        }
                        Err(e) => return Some(Err(ResultsError::io(path, e))),
                    }
                    continue;
                }
            };

            let line = match open.lines.next_segment().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.current = None;
                    continue;
                }
                Err(e) => {
                    let path = open.path.clone();
                    self.current = None;
                    return Some(Err(ResultsError::io(path, e)));
                }
            };
            open.line_number += 1;

            let line = line.strip_suffix(b"\r").unwrap_or(&line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let record: BenchmarkRecord = match serde_json::from_slice(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        path = %open.path.display(),
                        line = open.line_number,
                        error = %e,
                        "Skipping malformed result line"
                    );
                    continue;
                }
            };

            if !self.filter.matches(&record) {
                continue;
            }

            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }

            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Some(Ok(record));
        }
    }
}
