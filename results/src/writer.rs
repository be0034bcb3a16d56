//! Buffered, append-only result log writer
//!
//! Records are buffered in memory and handed to a single background flush
//! worker over a command channel. The worker is the only task that touches
//! the file, so flushes never interleave. Each flush appends the whole batch
//! with one write so concurrent readers never observe half a batch.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{WriteMode, WriterConfig};
use crate::error::{Result, ResultsError};
use crate::record::BenchmarkRecord;

/// Counters maintained by the flush worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub records_written: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub bytes_written: u64,
}

enum WriterCommand {
    /// `None` for threshold-triggered flushes nobody waits on
    Flush(Option<oneshot::Sender<Result<()>>>),
    Rotate {
        max_bytes: u64,
        reply: oneshot::Sender<Result<Option<PathBuf>>>,
    },
    Close(oneshot::Sender<Result<()>>),
}

type SharedBuffer = Arc<Mutex<Vec<BenchmarkRecord>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Append-only JSONL writer for benchmark records
pub struct ResultWriter {
    path: PathBuf,
    buffer_size: usize,
    max_file_bytes: u64,
    buffer: SharedBuffer,
    stats: Arc<Mutex<WriterStats>>,
    commands: mpsc::Sender<WriterCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    close_lock: AsyncMutex<()>,
    closed: AtomicBool,
}

impl ResultWriter {
    /// Prepare the target file and start the flush worker
    ///
    /// Missing parent directories are created. In overwrite mode the target
    /// is truncated; in append mode existing content is kept.
    pub async fn open(config: WriterConfig) -> Result<Self> {
        let path = config.path.clone();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ResultsError::io(parent, e))?;
        }

        if config.mode == WriteMode::Overwrite {
            File::create(&path)
                .await
                .map_err(|e| ResultsError::io(&path, e))?;
        }

        let file = open_append(&path).await?;
        let buffer: SharedBuffer = Arc::new(Mutex::new(Vec::with_capacity(config.buffer_size)));
        let stats = Arc::new(Mutex::new(WriterStats::default()));
        let (commands, receiver) = mpsc::channel(config.channel_capacity.max(1));

        let worker = FlushWorker {
            path: path.clone(),
            file,
            buffer: Arc::clone(&buffer),
            stats: Arc::clone(&stats),
        };
        let handle = tokio::spawn(worker.run(receiver, config.flush_interval()));

        info!(
            path = %path.display(),
            mode = ?config.mode,
            buffer_size = config.buffer_size,
            "Result writer opened"
        );

        Ok(Self {
            path,
            buffer_size: config.buffer_size.max(1),
            max_file_bytes: config.max_file_bytes,
            buffer,
            stats,
            commands,
            worker: Mutex::new(Some(handle)),
            close_lock: AsyncMutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Open `path` in append mode with default settings
    pub async fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(WriterConfig::for_path(path)).await
    }

    /// Buffer one record
    ///
    /// Never blocks on I/O. Reaching the buffer threshold schedules a
    /// background flush without waiting for it.
    pub fn write(&self, record: BenchmarkRecord) -> Result<()> {
        self.ensure_open()?;

        let buffered = {
            let mut buffer = lock(&self.buffer);
            buffer.push(record);
            buffer.len()
        };

        if buffered >= self.buffer_size {
            self.schedule_flush()?;
        }
        Ok(())
    }

    /// Buffer several records
    pub fn write_batch<I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = BenchmarkRecord>,
    {
        self.ensure_open()?;

        let buffered = {
            let mut buffer = lock(&self.buffer);
            buffer.extend(records);
            buffer.len()
        };

        if buffered >= self.buffer_size {
            self.schedule_flush()?;
        }
        Ok(())
    }

    /// Write every buffered record to disk
    ///
    /// Waits behind any flush already in progress. On failure the records
    /// stay buffered for the next attempt.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        let (reply, response) = oneshot::channel();
        self.send(WriterCommand::Flush(Some(reply))).await?;
        receive(response).await?
    }

    /// Rotate the file when it exceeds the configured size
    pub async fn rotate_if_needed(&self) -> Result<Option<PathBuf>> {
        self.rotate_if_larger_than(self.max_file_bytes).await
    }

    /// Rename the file to a timestamped sibling when larger than `max_bytes`
    ///
    /// Returns the rotated path. Later flushes go to a fresh file at the
    /// original path.
    pub async fn rotate_if_larger_than(&self, max_bytes: u64) -> Result<Option<PathBuf>> {
        self.ensure_open()?;
        let (reply, response) = oneshot::channel();
        self.send(WriterCommand::Rotate { max_bytes, reply }).await?;
        receive(response).await?
    }

    /// Stop the timer, flush what is buffered and shut the worker down
    ///
    /// When the final flush fails the writer stays open with its records
    /// still buffered, so `flush()` or another `close()` can retry. Closing
    /// an already closed writer is a no-op.
    pub async fn close(&self) -> Result<()> {
        let _closing = self.close_lock.lock().await;
        if self.is_closed() {
            return Ok(());
        }

        let (reply, response) = oneshot::channel();
        self.send(WriterCommand::Close(reply)).await?;
        receive(response).await??;
        self.closed.store(true, Ordering::SeqCst);

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| ResultsError::WorkerUnavailable {
                reason: e.to_string(),
            })?;
        }

        info!(path = %self.path.display(), "Result writer closed");
        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        lock(&self.stats).clone()
    }

    /// Records waiting for the next flush
    pub fn buffered(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ResultsError::WriterClosed);
        }
        Ok(())
    }

    fn schedule_flush(&self) -> Result<()> {
        match self.commands.try_send(WriterCommand::Flush(None)) {
            Ok(()) => Ok(()),
            // a queued command will flush the buffer anyway
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Flush queue full, skipping background flush request");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ResultsError::WorkerUnavailable {
                reason: "flush worker stopped".to_string(),
            }),
        }
    }

    async fn send(&self, command: WriterCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ResultsError::WorkerUnavailable {
                reason: "flush worker stopped".to_string(),
            })
    }
}

async fn receive<T>(response: oneshot::Receiver<T>) -> Result<T> {
    response.await.map_err(|_| ResultsError::WorkerUnavailable {
        reason: "flush worker dropped the request".to_string(),
    })
}

async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| ResultsError::io(path, e))
}

/// Sibling path carrying a rotation timestamp before the extension
pub fn rotated_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let stamp = at.format("%Y%m%dT%H%M%S%.3fZ");
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}-{}", stem, stamp),
    };
    path.with_file_name(name)
}

/// First rotation target for `at` that does not exist yet
///
/// Rotations landing in the same millisecond get a `-1`, `-2`, ... suffix
/// after the timestamp.
async fn unused_rotated_path(path: &Path, at: DateTime<Utc>) -> Result<PathBuf> {
    let base = rotated_path(path, at);
    let mut candidate = base.clone();
    let mut attempt = 0u32;

    while fs::try_exists(&candidate)
        .await
        .map_err(|e| ResultsError::io(&candidate, e))?
    {
        attempt += 1;
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match base.extension() {
            Some(ext) => format!("{}-{}.{}", stem, attempt, ext.to_string_lossy()),
            None => format!("{}-{}", stem, attempt),
        };
        candidate = base.with_file_name(name);
    }
    Ok(candidate)
}

/// Serialize a batch as newline-terminated JSON lines
pub fn encode_batch(records: &[BenchmarkRecord]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(records.len() * 512);
    for record in records {
        serde_json::to_writer(&mut payload, record)?;
        payload.push(b'\n');
    }
    Ok(payload)
}

struct FlushWorker {
    path: PathBuf,
    file: File,
    buffer: SharedBuffer,
    stats: Arc<Mutex<WriterStats>>,
}

impl FlushWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WriterCommand>,
        interval: Option<Duration>,
    ) {
        let mut ticker = interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(WriterCommand::Flush(reply)) => {
                        let result = self.flush().await;
                        match reply {
                            Some(reply) => {
                                let _ = reply.send(result);
                            }
                            None => self.log_background_failure(result),
                        }
                    }
                    Some(WriterCommand::Rotate { max_bytes, reply }) => {
                        let _ = reply.send(self.rotate(max_bytes).await);
                    }
                    Some(WriterCommand::Close(reply)) => {
                        let result = self.flush().await;
                        let flushed = result.is_ok();
                        let _ = reply.send(result);
                        // keep serving so the retained batch can be retried
                        if flushed {
                            break;
                        }
                    }
                    None => {
                        // writer dropped without close
                        let result = self.flush().await;
                        self.log_background_failure(result);
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => {
                    let result = self.flush().await;
                    self.log_background_failure(result);
                }
            }
        }

        debug!(path = %self.path.display(), "Flush worker stopped");
    }

    async fn flush(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut *lock(&self.buffer));
        if batch.is_empty() {
            return Ok(());
        }

        let payload = match encode_batch(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                self.restore(batch);
                return Err(e);
            }
        };

        if let Err(e) = self.append(&payload).await {
            let retained = batch.len();
            self.restore(batch);
            lock(&self.stats).failed_flushes += 1;
            error!(
                path = %self.path.display(),
                retained,
                error = %e,
                "Failed to flush result batch"
            );
            return Err(ResultsError::io(&self.path, e));
        }

        let mut stats = lock(&self.stats);
        stats.records_written += batch.len() as u64;
        stats.bytes_written += payload.len() as u64;
        stats.flushes += 1;
        debug!(
            path = %self.path.display(),
            records = batch.len(),
            bytes = payload.len(),
            "Flushed result batch"
        );
        Ok(())
    }

    /// Append `payload`, truncating back to the prior length on failure
    ///
    /// A failed append leaves no partial line behind, so retrying the same
    /// batch writes each record exactly once.
    async fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        let committed = self.file.metadata().await?.len();

        let result = match self.file.write_all(payload).await {
            Ok(()) => self.file.flush().await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            rollback(&mut self.file, &self.path, committed).await;
        }
        result
    }

    /// Put a failed batch back ahead of anything buffered since
    fn restore(&self, batch: Vec<BenchmarkRecord>) {
        let mut buffer = lock(&self.buffer);
        let newer = std::mem::replace(&mut *buffer, batch);
        buffer.extend(newer);
    }

    async fn rotate(&mut self, max_bytes: u64) -> Result<Option<PathBuf>> {
        let size = match fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(ResultsError::io(&self.path, e)),
        };

        if size <= max_bytes {
            return Ok(None);
        }

        let rotated = unused_rotated_path(&self.path, Utc::now()).await?;
        fs::rename(&self.path, &rotated)
            .await
            .map_err(|e| ResultsError::io(&self.path, e))?;
        self.file = open_append(&self.path).await?;

        info!(
            path = %self.path.display(),
            rotated = %rotated.display(),
            size,
            "Rotated result log"
        );
        Ok(Some(rotated))
    }

    fn log_background_failure(&self, result: Result<()>) {
        if let Err(e) = result {
            warn!(
                path = %self.path.display(),
                category = e.category(),
                error = %e,
                "Background flush failed; records kept for retry"
            );
        }
    }
}

/// Cut `file` back to `committed` bytes after a failed append
async fn rollback(file: &mut File, path: &Path, committed: u64) {
    if let Err(e) = file.set_len(committed).await {
        warn!(
            path = %path.display(),
            committed,
            error = %e,
            "Could not truncate partial batch"
        );
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
