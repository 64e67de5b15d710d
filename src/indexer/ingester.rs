use eyre::WrapErr;
use std::sync::Arc;

use crate::db::ScanStore;
use crate::indexer::scanner::ChainScan;

/// Default rows per INSERT statement.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub chains_written: usize,
    pub chains_failed: usize,
    pub events_inserted: u64,
}

/// Persists staged events per chain and advances that chain's watermark
/// only after the batch write succeeded.
pub struct EventIngester {
    store: Arc<dyn ScanStore>,
    batch_size: usize,
}

impl EventIngester {
    pub fn new(store: Arc<dyn ScanStore>, batch_size: usize) -> Self {
        Self { store, batch_size }
    }

    /// Write chains one after another. A failed chain is logged and keeps
    /// its watermark, so its window is scanned again next cycle.
    pub async fn ingest(&self, scans: &[ChainScan]) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for scan in scans {
            match self.ingest_chain(scan).await {
                Ok(inserted) => {
                    summary.chains_written += 1;
                    summary.events_inserted += inserted;
                }
                Err(e) => {
                    tracing::error!(
                        chain_id = scan.chain_id,
                        events = scan.events.len(),
                        error = %e,
                        "Failed to persist chain scan"
                    );
                    summary.chains_failed += 1;
                }
            }
        }

        summary
    }

    async fn ingest_chain(&self, scan: &ChainScan) -> eyre::Result<u64> {
        let inserted = if scan.events.is_empty() {
            0
        } else {
            self.store
                .insert_events(&scan.events, self.batch_size)
                .await
                .wrap_err("batch insert of events failed")?
        };

        let tasks = self
            .store
            .advance_watermark(scan.chain_id, scan.next_block())
            .await
            .wrap_err("watermark update failed")?;

        tracing::info!(
            chain_id = scan.chain_id,
            inserted,
            next_block = scan.next_block(),
            tasks,
            "Chain scan persisted"
        );

        Ok(inserted)
    }
}
