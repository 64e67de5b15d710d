use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{EventFilter, LedgerStore, QueryStore, ScanStore};
use crate::indexer::types::{ChainWatermark, EventData, EventRecord, ScanTask};
use crate::ledger::updater::UserLedger;

/// In-process store with the same semantics as `PgStore`. Backs the test
/// suites; failure switches simulate write errors.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_ledger_writes: AtomicBool,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    tasks: Vec<ScanTask>,
    events: Vec<EventRecord>,
    ledgers: Vec<UserLedger>,
    failing_chains: BTreeSet<u64>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_scan_task(
        &self,
        chain_id: u64,
        contract_address: &str,
        from_block: u64,
        event_type: &str,
        event_signature: &str,
    ) -> i64 {
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.tasks.push(ScanTask {
            id,
            chain_id,
            contract_address: contract_address.to_string(),
            from_block,
            event_type: event_type.to_string(),
            event_signature: event_signature.to_string(),
        });
        id
    }

    /// Persist an event directly, bypassing the scanner.
    pub fn add_event(&self, data: EventData) -> i64 {
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.events.push(EventRecord {
            id,
            data,
            processed: false,
            created_at: Utc::now(),
        });
        id
    }

    pub fn tasks(&self) -> Vec<ScanTask> {
        self.lock().tasks.clone()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.lock().events.clone()
    }

    pub fn ledgers(&self) -> Vec<UserLedger> {
        self.lock().ledgers.clone()
    }

    /// Make event inserts for `chain_id` fail until turned off again.
    pub fn fail_event_inserts_for(&self, chain_id: u64, fail: bool) {
        let mut inner = self.lock();
        if fail {
            inner.failing_chains.insert(chain_id);
        } else {
            inner.failing_chains.remove(&chain_id);
        }
    }

    pub fn fail_ledger_writes(&self, fail: bool) {
        self.fail_ledger_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn scan_tasks(&self) -> eyre::Result<Vec<ScanTask>> {
        Ok(self.tasks())
    }

    async fn event_exists(
        &self,
        chain_id: u64,
        event_type: &str,
        tx_hash: &str,
    ) -> eyre::Result<bool> {
        Ok(self.lock().events.iter().any(|e| {
            e.data.chain_id == chain_id && e.data.event_type == event_type && e.data.tx_hash == tx_hash
        }))
    }

    async fn insert_events(&self, events: &[EventData], chunk_size: usize) -> eyre::Result<u64> {
        let mut inner = self.lock();
        if let Some(e) = events
            .iter()
            .find(|e| inner.failing_chains.contains(&e.chain_id))
        {
            return Err(eyre::eyre!("simulated insert failure on chain {}", e.chain_id));
        }

        let mut written = 0;
        for chunk in events.chunks(chunk_size.max(1)) {
            for data in chunk {
                let id = inner.next_id();
                inner.events.push(EventRecord {
                    id,
                    data: data.clone(),
                    processed: false,
                    created_at: Utc::now(),
                });
                written += 1;
            }
        }
        Ok(written)
    }

    async fn advance_watermark(&self, chain_id: u64, next_block: u64) -> eyre::Result<u64> {
        let mut updated = 0;
        for task in self
            .lock()
            .tasks
            .iter_mut()
            .filter(|t| t.chain_id == chain_id && t.from_block < next_block)
        {
            task.from_block = next_block;
            updated += 1;
        }
        Ok(updated)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn unprocessed_events(&self, limit: u32) -> eyre::Result<Vec<EventRecord>> {
        let mut pending: Vec<EventRecord> = self
            .lock()
            .events
            .iter()
            .filter(|e| !e.processed)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.id);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn mark_processed(&self, event_id: i64) -> eyre::Result<u64> {
        let mut inner = self.lock();
        match inner.events.iter_mut().find(|e| e.id == event_id) {
            Some(event) => {
                event.processed = true;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_ledger(&self, address: &str) -> eyre::Result<Option<UserLedger>> {
        Ok(self
            .lock()
            .ledgers
            .iter()
            .find(|l| l.address == address)
            .cloned())
    }

    async fn insert_ledger(&self, ledger: &UserLedger) -> eyre::Result<i64> {
        if self.fail_ledger_writes.load(Ordering::SeqCst) {
            return Err(eyre::eyre!("simulated ledger write failure"));
        }

        let mut inner = self.lock();
        let id = inner.next_id();
        inner.ledgers.push(UserLedger {
            id: Some(id),
            ..ledger.clone()
        });
        Ok(id)
    }

    async fn update_ledger(&self, ledger: &UserLedger) -> eyre::Result<u64> {
        if self.fail_ledger_writes.load(Ordering::SeqCst) {
            return Err(eyre::eyre!("simulated ledger write failure"));
        }

        let mut updated = 0;
        for row in self
            .lock()
            .ledgers
            .iter_mut()
            .filter(|l| l.address == ledger.address)
        {
            row.total_staked = ledger.total_staked.clone();
            row.total_unstaked = ledger.total_unstaked.clone();
            row.current_staked = ledger.current_staked.clone();
            updated += 1;
        }
        Ok(updated)
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    async fn watermarks(&self) -> eyre::Result<Vec<ChainWatermark>> {
        let mut by_chain: BTreeMap<u64, u64> = BTreeMap::new();
        for task in &self.lock().tasks {
            let entry = by_chain.entry(task.chain_id).or_insert(task.from_block);
            *entry = (*entry).min(task.from_block);
        }
        Ok(by_chain
            .into_iter()
            .map(|(chain_id, from_block)| ChainWatermark {
                chain_id,
                from_block,
            })
            .collect())
    }

    async fn list_events(&self, filter: &EventFilter) -> eyre::Result<Vec<EventRecord>> {
        let mut events: Vec<EventRecord> = self
            .lock()
            .events
            .iter()
            .filter(|e| filter.chain_id.map_or(true, |c| e.data.chain_id == c))
            .filter(|e| {
                filter
                    .event_type
                    .as_deref()
                    .map_or(true, |t| e.data.event_type == t)
            })
            .filter(|e| filter.processed.map_or(true, |p| e.processed == p))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);

        Ok(events
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }
}
