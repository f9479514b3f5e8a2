//! Orphan quarantine: events that could not be attributed to exactly one tenant.
//!
//! The store is global (no tenant scope) and is only exposed to operators. Inserting
//! never fails the caller: if the sink errors or times out the orphan is written as a JSON
//! line to the fallback writer, by default the `switchboard::orphan` log target.

use crate::event::{Channel, LeadRef, OrphanEvent, OrphanReason};
use crate::ndjson;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// File name of the orphan journal inside the data directory.
pub const ORPHAN_FILE: &str = "orphan_events.ndjson";

/// Log target receiving orphans the sink could not take.
pub const ORPHAN_LOG_TARGET: &str = "switchboard::orphan";

/// Orphans kept in memory for listing; older ones stay in the file only.
pub const DEFAULT_RETAINED: usize = 10_000;

/// Receives one JSON line per orphan that the sink could not store.
pub type FallbackWriter = Arc<dyn Fn(&str) + Send + Sync>;

fn log_fallback() -> FallbackWriter {
    Arc::new(|line: &str| log::error!(target: ORPHAN_LOG_TARGET, "{}", line))
}

#[derive(Debug, thiserror::Error)]
pub enum QuarantineError {
    #[error("orphan store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("orphan store writer task failed: {0}")]
    Task(String),
}

/// Destination for orphans.
#[async_trait]
pub trait OrphanSink: Send + Sync {
    async fn insert(&self, orphan: &OrphanEvent) -> Result<(), QuarantineError>;
}

#[derive(Default)]
struct Retained {
    newest: VecDeque<OrphanEvent>,
    total: usize,
}

impl Retained {
    fn push(&mut self, orphan: OrphanEvent, cap: usize) {
        self.newest.push_back(orphan);
        self.total += 1;
        while self.newest.len() > cap {
            self.newest.pop_front();
        }
    }
}

/// Orphan list holding the newest `retained` entries in memory, optionally mirrored to an
/// NDJSON file that keeps all of them.
pub struct OrphanStore {
    orphans: RwLock<Retained>,
    retained: usize,
    path: Option<PathBuf>,
}

impl Default for OrphanStore {
    fn default() -> Self {
        Self {
            orphans: RwLock::new(Retained::default()),
            retained: DEFAULT_RETAINED,
            path: None,
        }
    }
}

impl OrphanStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load orphans previously written to `path`; new orphans are appended there.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, QuarantineError> {
        Self::open_retaining(path, DEFAULT_RETAINED).await
    }

    pub async fn open_retaining(
        path: impl Into<PathBuf>,
        retained: usize,
    ) -> Result<Self, QuarantineError> {
        let path = path.into();
        let p = path.clone();
        let loaded = tokio::task::spawn_blocking(move || ndjson::read_records::<OrphanEvent>(&p))
            .await
            .map_err(|e| QuarantineError::Task(e.to_string()))??;
        if !loaded.is_empty() {
            log::info!("quarantine: loaded {} orphan(s) from {}", loaded.len(), path.display());
        }
        let store = Self {
            path: Some(path),
            ..Self::default().retaining(retained)
        };
        {
            let mut orphans = store.orphans.write().await;
            for o in loaded {
                orphans.push(o, store.retained);
            }
        }
        Ok(store)
    }

    /// Keep at most `retained` orphans in memory (at least one).
    pub fn retaining(mut self, retained: usize) -> Self {
        self.retained = retained.max(1);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Most recent orphans first.
    pub async fn recent(&self, limit: usize) -> Vec<OrphanEvent> {
        let orphans = self.orphans.read().await;
        orphans.newest.iter().rev().take(limit).cloned().collect()
    }

    /// Every orphan seen, including those no longer retained in memory.
    pub async fn count(&self) -> usize {
        self.orphans.read().await.total
    }
}

#[async_trait]
impl OrphanSink for OrphanStore {
    async fn insert(&self, orphan: &OrphanEvent) -> Result<(), QuarantineError> {
        if let Some(ref path) = self.path {
            let path = path.clone();
            let record = orphan.clone();
            tokio::task::spawn_blocking(move || ndjson::append_records(&path, &[record]))
                .await
                .map_err(|e| QuarantineError::Task(e.to_string()))??;
        }
        self.orphans.write().await.push(orphan.clone(), self.retained);
        Ok(())
    }
}

/// Front door used by the pipeline and the ingress handlers.
#[derive(Clone)]
pub struct Quarantine {
    sink: Arc<dyn OrphanSink>,
    timeout: Duration,
    fallback: FallbackWriter,
}

impl Quarantine {
    pub fn new(sink: Arc<dyn OrphanSink>, timeout: Duration) -> Self {
        Self {
            sink,
            timeout,
            fallback: log_fallback(),
        }
    }

    /// Replace the log fallback.
    pub fn with_fallback(mut self, fallback: FallbackWriter) -> Self {
        self.fallback = fallback;
        self
    }

    /// Build and store an orphan. Candidates are kept only for `Ambiguous`.
    pub async fn quarantine(
        &self,
        channel: Channel,
        provider_name: &str,
        reason: OrphanReason,
        contact_identifier: &str,
        provider_message_id: Option<String>,
        candidates: Option<Vec<LeadRef>>,
        raw_payload: serde_json::Value,
    ) -> OrphanEvent {
        let orphan = OrphanEvent::new(
            channel,
            provider_name,
            reason,
            contact_identifier,
            provider_message_id,
            candidates,
            raw_payload,
        );
        self.insert(orphan.clone()).await;
        orphan
    }

    /// Store an orphan, falling back to the fallback writer when the sink fails.
    pub async fn insert(&self, orphan: OrphanEvent) {
        log::info!(
            "quarantine: {} {} orphan {} ({})",
            orphan.provider_name,
            orphan.channel,
            orphan.id,
            orphan.reason.as_str()
        );
        let err = match tokio::time::timeout(self.timeout, self.sink.insert(&orphan)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.timeout),
        };
        log::warn!("quarantine: orphan store unavailable ({}), writing {} to fallback", err, orphan.id);
        let line = serde_json::to_string(&orphan).unwrap_or_else(|_| orphan.id.clone());
        (self.fallback)(&line);
    }
}
