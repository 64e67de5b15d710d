pub mod memory;
pub mod query;
pub mod repository;

use async_trait::async_trait;

use crate::indexer::types::{ChainWatermark, EventData, EventRecord, ScanTask};
use crate::ledger::updater::UserLedger;

pub use memory::MemoryStore;
pub use repository::PgStore;

/// Storage used by the scan loop.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn scan_tasks(&self) -> eyre::Result<Vec<ScanTask>>;

    /// Whether an event with this (chain_id, event_type, tx_hash) was already persisted.
    async fn event_exists(&self, chain_id: u64, event_type: &str, tx_hash: &str)
        -> eyre::Result<bool>;

    /// Batch-insert staged events, `chunk_size` rows per statement.
    async fn insert_events(&self, events: &[EventData], chunk_size: usize) -> eyre::Result<u64>;

    /// Raise the watermark of every task on `chain_id` that is below `next_block`.
    async fn advance_watermark(&self, chain_id: u64, next_block: u64) -> eyre::Result<u64>;
}

/// Storage used by the parse loop.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Oldest unprocessed events first.
    async fn unprocessed_events(&self, limit: u32) -> eyre::Result<Vec<EventRecord>>;

    async fn mark_processed(&self, event_id: i64) -> eyre::Result<u64>;

    async fn find_ledger(&self, address: &str) -> eyre::Result<Option<UserLedger>>;

    async fn insert_ledger(&self, ledger: &UserLedger) -> eyre::Result<i64>;

    async fn update_ledger(&self, ledger: &UserLedger) -> eyre::Result<u64>;
}

/// Read-only queries for the API.
#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn watermarks(&self) -> eyre::Result<Vec<ChainWatermark>>;

    async fn list_events(&self, filter: &EventFilter) -> eyre::Result<Vec<EventRecord>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub chain_id: Option<u64>,
    pub event_type: Option<String>,
    pub processed: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            chain_id: None,
            event_type: None,
            processed: None,
            limit: 100,
            offset: 0,
        }
    }
}
