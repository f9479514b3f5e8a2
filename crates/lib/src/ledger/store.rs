//! Tenant-partitioned in-memory ledger with an outbound provider-message-id index.

use super::journal::{JournalError, LedgerJournal};
use super::query::{self, EventFilter, EventsPage, LedgerStats, Page, StatsWindow};
use crate::contact::{classify, ContactKind};
use crate::event::{Direction, LeadRef, MessageEvent};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("tenant id is required")]
    MissingTenant,
    #[error("lead id is required")]
    MissingLead,
    #[error("duplicate event (idempotency key {0})")]
    Duplicate(String),
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Construction options for `EventLedger`.
#[derive(Default)]
pub struct LedgerOptions {
    pub journal: Option<LedgerJournal>,
    /// Reject repeats of (provider, provider message id, status, direction).
    pub dedupe: bool,
}

type Partition = Arc<RwLock<Vec<MessageEvent>>>;

#[derive(Debug, Clone)]
struct OutboundBinding {
    owner: LeadRef,
    event_timestamp: DateTime<Utc>,
}

pub struct EventLedger {
    partitions: RwLock<HashMap<String, Partition>>,
    outbound: RwLock<HashMap<String, OutboundBinding>>,
    seen: Option<Mutex<HashSet<String>>>,
    journal: Option<LedgerJournal>,
}

impl Default for EventLedger {
    fn default() -> Self {
        Self::new(LedgerOptions::default())
    }
}

/// `sha256(provider|providerMessageId|status|direction)` as hex; None without a message id.
pub fn idempotency_key(ev: &MessageEvent) -> Option<String> {
    let pmid = ev.provider_message_id.as_deref()?;
    let mut hasher = Sha256::new();
    hasher.update(ev.provider_name.as_bytes());
    hasher.update(b"|");
    hasher.update(pmid.as_bytes());
    hasher.update(b"|");
    hasher.update(ev.status.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(ev.direction.as_str().as_bytes());
    Some(
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect(),
    )
}

fn require_tenant(tenant_id: &str) -> Result<&str, LedgerError> {
    let t = tenant_id.trim();
    if t.is_empty() {
        Err(LedgerError::MissingTenant)
    } else {
        Ok(t)
    }
}

impl EventLedger {
    pub fn new(options: LedgerOptions) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            outbound: RwLock::new(HashMap::new()),
            seen: options.dedupe.then(|| Mutex::new(HashSet::new())),
            journal: options.journal,
        }
    }

    /// Build a ledger and load previously journaled events (without re-journaling them).
    pub async fn open(options: LedgerOptions) -> Result<Self, LedgerError> {
        let replayed = match options.journal.as_ref() {
            Some(j) => {
                let dir = j.dir().to_path_buf();
                tokio::task::spawn_blocking(move || LedgerJournal::replay(&dir))
                    .await
                    .map_err(|e| JournalError::Task(e.to_string()))??
            }
            None => Vec::new(),
        };
        let ledger = Self::new(options);
        let count = replayed.len();
        for ev in replayed {
            if let Some(ref seen) = ledger.seen {
                if let Some(key) = idempotency_key(&ev) {
                    seen.lock().await.insert(key);
                }
            }
            ledger.insert(ev).await;
        }
        if count > 0 {
            log::info!("ledger: replayed {} journaled event(s)", count);
        }
        Ok(ledger)
    }

    /// Append one immutable event. There is no update path.
    ///
    /// Owner ids are stored trimmed. Once the event is in its partition the append has
    /// succeeded: journal trouble after that point is logged and retried on the next flush.
    pub async fn append(&self, mut event: MessageEvent) -> Result<(), LedgerError> {
        let tenant = require_tenant(event.tenant_id())?.to_string();
        let lead = event.lead_id().trim().to_string();
        if lead.is_empty() {
            return Err(LedgerError::MissingLead);
        }
        event.owner = LeadRef::new(tenant, lead);
        if let Some(ref seen) = self.seen {
            if let Some(key) = idempotency_key(&event) {
                let mut seen = seen.lock().await;
                if !seen.insert(key.clone()) {
                    return Err(LedgerError::Duplicate(key));
                }
            }
        }
        self.insert(event.clone()).await;
        if let Some(ref journal) = self.journal {
            if let Err(e) = journal.push(event).await {
                log::warn!("ledger journal write failed, will retry on next flush: {}", e);
            }
        }
        Ok(())
    }

    async fn insert(&self, event: MessageEvent) {
        if event.direction == Direction::Out {
            if let Some(pmid) = event.provider_message_id.clone() {
                let mut idx = self.outbound.write().await;
                let newer = idx
                    .get(&pmid)
                    .map(|b| event.event_timestamp >= b.event_timestamp)
                    .unwrap_or(true);
                if newer {
                    idx.insert(
                        pmid,
                        OutboundBinding {
                            owner: event.owner.clone(),
                            event_timestamp: event.event_timestamp,
                        },
                    );
                }
            }
        }
        let partition = self.partition_for_write(event.tenant_id()).await;
        partition.write().await.push(event);
    }

    async fn partition_for_write(&self, tenant_id: &str) -> Partition {
        if let Some(p) = self.partitions.read().await.get(tenant_id) {
            return p.clone();
        }
        self.partitions
            .write()
            .await
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    async fn partition(&self, tenant_id: &str) -> Option<Partition> {
        self.partitions.read().await.get(tenant_id).cloned()
    }

    /// Tenant and lead of the most recent outbound event carrying `provider_message_id`.
    pub async fn latest_outbound_owner(&self, provider_message_id: &str) -> Option<LeadRef> {
        let key = provider_message_id.trim();
        if key.is_empty() {
            return None;
        }
        self.outbound
            .read()
            .await
            .get(key)
            .map(|b| b.owner.clone())
    }

    /// Filtered, paginated events of one tenant, newest `eventTimestamp` first.
    pub async fn query(
        &self,
        tenant_id: &str,
        filter: &EventFilter,
        page: Page,
    ) -> Result<EventsPage, LedgerError> {
        let tenant_id = require_tenant(tenant_id)?;
        let matched: Vec<MessageEvent> = match self.partition(tenant_id).await {
            Some(p) => p
                .read()
                .await
                .iter()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Ok(query::paginate(matched, page))
    }

    /// Per-channel counters and a daily timeseries for one tenant inside `window`.
    pub async fn stats(
        &self,
        tenant_id: &str,
        window: StatsWindow,
    ) -> Result<LedgerStats, LedgerError> {
        let tenant_id = require_tenant(tenant_id)?;
        match self.partition(tenant_id).await {
            Some(p) => Ok(query::aggregate(p.read().await.iter(), window)),
            None => Ok(query::aggregate(std::iter::empty(), window)),
        }
    }

    /// All events of one lead, newest first. When the lead has none and a fallback contact is
    /// given, events of the same tenant for that contact are returned instead. Nothing is rewritten.
    pub async fn lead_timeline(
        &self,
        tenant_id: &str,
        lead_id: &str,
        fallback_contacts: &[&str],
    ) -> Result<Vec<MessageEvent>, LedgerError> {
        let tenant_id = require_tenant(tenant_id)?;
        let Some(p) = self.partition(tenant_id).await else {
            return Ok(Vec::new());
        };
        let events = p.read().await;
        let mut found: Vec<MessageEvent> = events
            .iter()
            .filter(|e| e.lead_id() == lead_id)
            .cloned()
            .collect();
        if found.is_empty() {
            let contacts: Vec<ContactKind> = fallback_contacts
                .iter()
                .map(|c| classify(c))
                .filter(|c| *c != ContactKind::Empty)
                .collect();
            if !contacts.is_empty() {
                found = events
                    .iter()
                    .filter(|e| contacts.iter().any(|c| query::contact_matches(e, c)))
                    .cloned()
                    .collect();
                log::debug!(
                    "ledger: lead {} has no events, {} found by contact fallback",
                    lead_id,
                    found.len()
                );
            }
        }
        drop(events);
        query::sort_newest_first(&mut found);
        Ok(found)
    }

    /// Total events across all tenants (health reporting only).
    pub async fn len(&self) -> usize {
        let parts: Vec<Partition> = self.partitions.read().await.values().cloned().collect();
        let mut n = 0;
        for p in parts {
            n += p.read().await.len();
        }
        n
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write buffered journal entries. No-op without a journal.
    pub async fn flush(&self) -> Result<usize, LedgerError> {
        match self.journal {
            Some(ref j) => Ok(j.flush().await?),
            None => Ok(0),
        }
    }
}
