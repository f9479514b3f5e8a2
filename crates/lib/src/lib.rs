//! Switchboard core library: multi-tenant webhook ingestion, identity resolution,
//! status normalization, the message event ledger and orphan quarantine.

pub mod channels;
pub mod config;
pub mod contact;
pub mod crm;
pub mod event;
pub mod gateway;
pub mod init;
pub mod ledger;
mod ndjson;
pub mod pipeline;
pub mod quarantine;
pub mod resolver;
pub mod status;
