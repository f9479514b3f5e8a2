//! Bounded worker pool between webhook ingress and the ledger.
//!
//! The HTTP handler only parses and enqueues. Workers resolve the owner, normalize the
//! status and append to the ledger; anything that cannot be attributed to exactly one
//! tenant goes to quarantine. Processing never fails outward.

use crate::event::{
    Channel, Direction, EventDraft, LeadRef, MessageEvent, OrphanReason, RawInboundEvent,
    ResolutionResult,
};
use crate::ledger::{EventLedger, LedgerError};
use crate::quarantine::Quarantine;
use crate::resolver::IdentityResolver;
use crate::status::normalize;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Unit of work for the pool.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Inbound(RawInboundEvent),
    /// Payload that could not be turned into an event; always quarantined as `incomplete_payload`.
    Malformed {
        channel: Channel,
        provider_name: String,
        contact_identifier: String,
        provider_message_id: Option<String>,
        raw_payload: serde_json::Value,
    },
}

impl WorkItem {
    fn channel(&self) -> Channel {
        match self {
            WorkItem::Inbound(ev) => ev.channel,
            WorkItem::Malformed { channel, .. } => *channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Appended to the ledger under this event id.
    Recorded(String),
    Quarantined(OrphanReason),
    /// Rejected by ledger dedupe.
    Duplicate,
}

/// An outbound send reported by the sending side, where the tenant is already known.
#[derive(Debug, Clone)]
pub struct OutboundSend {
    pub owner: LeadRef,
    pub channel: Channel,
    pub provider_name: String,
    pub provider_message_id: Option<String>,
    pub contact_identifier: String,
    /// Provider status at send time; `sent` when absent.
    pub status: Option<String>,
    pub body: Option<String>,
    pub event_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Shared collaborators used by every worker.
pub struct PipelineContext {
    pub resolver: IdentityResolver,
    pub ledger: Arc<EventLedger>,
    pub quarantine: Quarantine,
}

impl PipelineContext {
    pub fn new(resolver: IdentityResolver, ledger: Arc<EventLedger>, quarantine: Quarantine) -> Self {
        Self {
            resolver,
            ledger,
            quarantine,
        }
    }

    /// Resolve, normalize and persist one item.
    pub async fn process(&self, item: WorkItem) -> Outcome {
        let ev = match item {
            WorkItem::Inbound(ev) => ev,
            WorkItem::Malformed {
                channel,
                provider_name,
                contact_identifier,
                provider_message_id,
                raw_payload,
            } => {
                self.quarantine
                    .quarantine(
                        channel,
                        &provider_name,
                        OrphanReason::IncompletePayload,
                        &contact_identifier,
                        provider_message_id,
                        None,
                        raw_payload,
                    )
                    .await;
                return Outcome::Quarantined(OrphanReason::IncompletePayload);
            }
        };
        if ev.lacks_identity() || ev.raw_status.trim().is_empty() {
            return self.orphan(ev, OrphanReason::IncompletePayload, None).await;
        }

        let (resolution, trace) = self
            .resolver
            .resolve_traced(&ev.contact_identifier, ev.provider_message_id.as_deref())
            .await;
        let owner = match resolution {
            ResolutionResult::Resolved { tenant_id, lead_id } => LeadRef::new(tenant_id, lead_id),
            ResolutionResult::Ambiguous { candidates } => {
                return self.orphan(ev, OrphanReason::Ambiguous, Some(candidates)).await;
            }
            ResolutionResult::NotFound => {
                let reason = if trace.only_untenanted() {
                    OrphanReason::NoTenantId
                } else {
                    OrphanReason::NoMatch
                };
                return self.orphan(ev, reason, None).await;
            }
        };

        let event = MessageEvent::new(
            owner,
            EventDraft {
                channel: ev.channel,
                provider_name: ev.provider_name.clone(),
                direction: ev.direction,
                provider_message_id: ev.provider_message_id.clone(),
                status: normalize(&ev.raw_status, &ev.provider_name),
                contact_identifier: ev.contact_identifier.clone(),
                snippet: ev.body.clone(),
                raw_payload: ev.raw_payload.clone(),
                event_timestamp: ev.event_timestamp,
            },
        );
        let id = event.id.clone();
        match self.append(event).await {
            Ok(()) => {
                log::debug!("pipeline: recorded {} ({} {})", id, ev.provider_name, ev.raw_status);
                Outcome::Recorded(id)
            }
            Err(PipelineError::Ledger(LedgerError::Duplicate(key))) => {
                log::debug!("pipeline: duplicate {} event dropped ({})", ev.provider_name, key);
                Outcome::Duplicate
            }
            Err(e) => {
                log::warn!("pipeline: ledger write failed, quarantining: {}", e);
                self.orphan(ev, OrphanReason::LedgerUnavailable, None).await
            }
        }
    }

    /// Append an outbound send directly to the ledger. Binds its provider message id to the tenant.
    pub async fn record_outbound(&self, send: OutboundSend) -> Result<MessageEvent, PipelineError> {
        let status = normalize(send.status.as_deref().unwrap_or("sent"), &send.provider_name);
        let event = MessageEvent::new(
            send.owner,
            EventDraft {
                channel: send.channel,
                provider_name: send.provider_name,
                direction: Direction::Out,
                provider_message_id: send.provider_message_id,
                status,
                contact_identifier: send.contact_identifier,
                snippet: send.body,
                raw_payload: serde_json::Value::Null,
                event_timestamp: send.event_timestamp,
            },
        );
        self.append(event.clone()).await?;
        Ok(event)
    }

    /// Not wrapped in a timeout here: the ledger bounds its own journal I/O, and cutting an
    /// append short after the insert would record the event and quarantine it too.
    async fn append(&self, event: MessageEvent) -> Result<(), PipelineError> {
        Ok(self.ledger.append(event).await?)
    }

    async fn orphan(
        &self,
        ev: RawInboundEvent,
        reason: OrphanReason,
        candidates: Option<Vec<LeadRef>>,
    ) -> Outcome {
        self.quarantine
            .quarantine(
                ev.channel,
                &ev.provider_name,
                reason,
                &ev.contact_identifier,
                ev.provider_message_id,
                candidates,
                ev.raw_payload,
            )
            .await;
        Outcome::Quarantined(reason)
    }
}

/// Cloneable submit side of the pool.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: Arc<RwLock<Option<mpsc::Sender<WorkItem>>>>,
    context: Arc<PipelineContext>,
}

impl PipelineHandle {
    /// Enqueue without waiting. Returns false (after quarantining as `queue_full`) when the
    /// queue is full or the pool is draining.
    pub async fn submit(&self, item: WorkItem) -> bool {
        let rejected = {
            let guard = self.tx.read().await;
            match guard.as_ref() {
                Some(tx) => match tx.try_send(item) {
                    Ok(()) => None,
                    Err(TrySendError::Full(item)) => Some((item, "full")),
                    Err(TrySendError::Closed(item)) => Some((item, "closed")),
                },
                None => Some((item, "closed")),
            }
        };
        let Some((item, why)) = rejected else {
            return true;
        };
        log::warn!("pipeline: work queue {}, quarantining {} item", why, item.channel());
        match item {
            WorkItem::Inbound(ev) => {
                self.context
                    .orphan(ev, OrphanReason::QueueFull, None)
                    .await;
            }
            WorkItem::Malformed {
                channel,
                provider_name,
                contact_identifier,
                provider_message_id,
                raw_payload,
            } => {
                self.context
                    .quarantine
                    .quarantine(
                        channel,
                        &provider_name,
                        OrphanReason::QueueFull,
                        &contact_identifier,
                        provider_message_id,
                        None,
                        raw_payload,
                    )
                    .await;
            }
        }
        false
    }

    pub async fn record_outbound(&self, send: OutboundSend) -> Result<MessageEvent, PipelineError> {
        self.context.record_outbound(send).await
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }
}

/// The running pool. Dropping it does not stop the workers; call `drain`.
pub struct Pipeline {
    handle: PipelineHandle,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Spawn `workers` consumers over a queue holding at most `capacity` items.
    pub fn start(context: Arc<PipelineContext>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<WorkItem>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers.max(1))
            .map(|n| {
                let rx = rx.clone();
                let ctx = context.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(item) = next else { break };
                        ctx.process(item).await;
                    }
                    log::debug!("pipeline worker {} stopped", n);
                })
            })
            .collect();
        log::info!("pipeline started: {} worker(s), queue capacity {}", workers.max(1), capacity.max(1));
        Self {
            handle: PipelineHandle {
                tx: Arc::new(RwLock::new(Some(tx))),
                context,
            },
            workers: Mutex::new(handles),
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop accepting work, let workers finish what is queued, and wait for them.
    pub async fn drain(&self) {
        self.handle.tx.write().await.take();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for h in handles {
            if let Err(e) = h.await {
                log::warn!("pipeline worker ended abnormally: {}", e);
            }
        }
        log::info!("pipeline drained");
    }
}
