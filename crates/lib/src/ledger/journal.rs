//! Durable NDJSON journal for the ledger.
//!
//! Appended events collect in a bounded buffer owned by the journal. The buffer is written
//! when it reaches `batch_size`, or whenever the owner calls `flush` (the gateway schedules
//! this on an interval and once more at shutdown). One file per UTC day of `createdAt`.
//! A flush waits at most `write_timeout` for the disk; a write still in progress after that
//! finishes in the background and restores its batch on failure.

use crate::event::MessageEvent;
use crate::ndjson;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const FILE_PREFIX: &str = "message_events_";
const FILE_SUFFIX: &str = ".ndjson";

/// Retained backlog after failed flushes is capped at this multiple of the batch size.
const BACKLOG_FACTOR: usize = 4;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal writer task failed: {0}")]
    Task(String),
    #[error("journal write still pending after {0:?}")]
    Timeout(Duration),
}

type Buffer = Arc<Mutex<Vec<MessageEvent>>>;

pub struct LedgerJournal {
    dir: PathBuf,
    batch_size: usize,
    write_timeout: Duration,
    buffer: Buffer,
}

impl LedgerJournal {
    pub fn new(dir: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            dir: dir.into(),
            batch_size: batch_size.max(1),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of events waiting for the next flush.
    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Buffer one event; flushes when the buffer is full.
    pub async fn push(&self, event: MessageEvent) -> Result<(), JournalError> {
        let full = {
            let mut buf = self.buffer.lock().await;
            buf.push(event);
            buf.len() >= self.batch_size
        };
        if full {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write everything buffered. On failure the batch is kept for the next attempt.
    ///
    /// The write runs on its own task, so dropping this future or hitting the timeout never
    /// loses the batch.
    pub async fn flush(&self) -> Result<usize, JournalError> {
        let batch = std::mem::take(&mut *self.buffer.lock().await);
        if batch.is_empty() {
            return Ok(0);
        }
        let dir = self.dir.clone();
        let buffer = self.buffer.clone();
        let cap = self.batch_size.saturating_mul(BACKLOG_FACTOR);
        let writer = tokio::spawn(async move {
            let joined = tokio::task::spawn_blocking(move || {
                let res = write_batch(&dir, &batch);
                (batch, res)
            })
            .await;
            match joined {
                Ok((_, Ok(n))) => {
                    log::debug!("ledger journal: flushed {} event(s)", n);
                    Ok(n)
                }
                Ok((batch, Err(e))) => {
                    restore(&buffer, batch, cap).await;
                    Err(JournalError::Io(e))
                }
                Err(e) => Err(JournalError::Task(e.to_string())),
            }
        });
        match tokio::time::timeout(self.write_timeout, writer).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => Err(JournalError::Task(e.to_string())),
            Err(_) => Err(JournalError::Timeout(self.write_timeout)),
        }
    }

    /// Load every journaled event, oldest file first.
    pub fn replay(dir: &Path) -> Result<Vec<MessageEvent>, JournalError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        let mut events = Vec::new();
        for f in files {
            events.extend(ndjson::read_records::<MessageEvent>(&f)?);
        }
        Ok(events)
    }
}

/// Put a failed batch back in front of newer events, logging whatever exceeds `cap`.
async fn restore(buffer: &Mutex<Vec<MessageEvent>>, batch: Vec<MessageEvent>, cap: usize) {
    let mut buf = buffer.lock().await;
    let newer = std::mem::take(&mut *buf);
    let mut restored = batch;
    restored.extend(newer);
    if restored.len() > cap {
        let excess = restored.len() - cap;
        for ev in restored.drain(..excess) {
            match serde_json::to_string(&ev) {
                Ok(line) => log::error!(target: "switchboard::ledger", "journal backlog full, event not persisted: {}", line),
                Err(_) => log::error!(target: "switchboard::ledger", "journal backlog full, event not persisted: {}", ev.id),
            }
        }
    }
    *buf = restored;
}

/// Journal file for a given day.
pub fn journal_file(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("{}{}{}", FILE_PREFIX, day.format("%Y-%m-%d"), FILE_SUFFIX))
}

fn write_batch(dir: &Path, batch: &[MessageEvent]) -> std::io::Result<usize> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&MessageEvent>> = BTreeMap::new();
    for ev in batch {
        by_day.entry(ev.created_at.date_naive()).or_default().push(ev);
    }
    let mut written = 0;
    for (day, events) in by_day {
        written += ndjson::append_records(&journal_file(dir, day), &events)?;
    }
    Ok(written)
}
