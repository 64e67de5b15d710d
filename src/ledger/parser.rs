use std::sync::Arc;

use crate::db::LedgerStore;
use crate::indexer::types::EventRecord;
use crate::ledger::decoder::decode_stake_payload;
use crate::ledger::updater::{LedgerUpdater, StakeAction};

/// Counts from one parse pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParseSummary {
    pub fetched: usize,
    pub applied: usize,
    pub ignored: usize,
    pub malformed: usize,
    pub ledger_failures: usize,
    pub marked: usize,
}

/// Reads unprocessed events a page at a time and reconciles them into the ledger.
pub struct EventParser {
    store: Arc<dyn LedgerStore>,
    updater: LedgerUpdater,
    page_size: u32,
}

impl EventParser {
    pub fn new(store: Arc<dyn LedgerStore>, page_size: u32) -> Self {
        Self {
            updater: LedgerUpdater::new(store.clone()),
            store,
            page_size,
        }
    }

    /// Process one page of unprocessed events.
    ///
    /// Records that fail to decode stay unprocessed and come back next pass.
    /// A decoded record is marked processed even when its ledger update
    /// failed; the two writes are independent.
    pub async fn run_once(&self) -> eyre::Result<ParseSummary> {
        let events = self.store.unprocessed_events(self.page_size).await?;
        let mut summary = ParseSummary {
            fetched: events.len(),
            ..Default::default()
        };

        for event in &events {
            self.process(event, &mut summary).await;
        }

        Ok(summary)
    }

    async fn process(&self, event: &EventRecord, summary: &mut ParseSummary) {
        let payload = match decode_stake_payload(&event.data.raw_data) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    event_id = event.id,
                    tx_hash = %event.data.tx_hash,
                    error = %e,
                    "Failed to decode event payload, leaving unprocessed"
                );
                summary.malformed += 1;
                return;
            }
        };

        match StakeAction::from_event_type(&event.data.event_type) {
            Some(action) => {
                match self
                    .updater
                    .apply(action, &payload.wallet, &payload.amount)
                    .await
                {
                    Ok(_) => summary.applied += 1,
                    Err(e) => {
                        tracing::error!(
                            event_id = event.id,
                            wallet = %payload.wallet,
                            error = %e,
                            "Ledger update failed"
                        );
                        summary.ledger_failures += 1;
                    }
                }
            }
            None => {
                tracing::debug!(
                    event_id = event.id,
                    event_type = %event.data.event_type,
                    "Event type does not affect the ledger"
                );
                summary.ignored += 1;
            }
        }

        match self.updater.mark_processed(event.id).await {
            Ok(()) => summary.marked += 1,
            Err(e) => {
                tracing::error!(event_id = event.id, error = %e, "Failed to mark event processed");
            }
        }
    }
}
