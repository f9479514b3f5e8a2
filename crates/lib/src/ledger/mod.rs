//! Append-only message event ledger.
//!
//! Events are partitioned by tenant; every read path takes a tenant id and opens only that
//! tenant's partition. An optional NDJSON journal makes the ledger durable across restarts.

mod journal;
mod query;
mod store;

pub use journal::{journal_file, JournalError, LedgerJournal};
pub use query::{
    ChannelStats, DayBucket, EventFilter, EventsPage, LedgerStats, Page, StatsRange, StatsWindow,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use store::{idempotency_key, EventLedger, LedgerError, LedgerOptions};
