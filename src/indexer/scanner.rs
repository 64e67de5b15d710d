use alloy::primitives::{Address, B256};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use crate::db::ScanStore;
use crate::indexer::rpc::{signature_hash, ChainClient, ChainConnector};
use crate::indexer::types::{EventData, LogQuery, RawLog, ScanTask, ScanWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Maximum number of blocks past the watermark scanned per cycle.
    pub block_range: u64,
    /// Blocks subtracted from the chain head before scanning.
    pub confirmation_lag: u64,
}

/// What one chain produced in a cycle: the staged events and the watermark
/// to store once they are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainScan {
    pub chain_id: u64,
    pub window: ScanWindow,
    pub events: Vec<EventData>,
}

impl ChainScan {
    pub fn next_block(&self) -> u64 {
        self.window.next_block()
    }
}

/// A task with its parsed contract address and signature hash.
struct TrackedEvent<'a> {
    task: &'a ScanTask,
    contract: Address,
    topic0: B256,
}

/// All tasks of one chain.
struct ChainTasks<'a> {
    watermark: u64,
    tracked: Vec<TrackedEvent<'a>>,
}

impl<'a> ChainTasks<'a> {
    fn contracts(&self) -> Vec<Address> {
        let mut seen = HashSet::new();
        self.tracked
            .iter()
            .map(|t| t.contract)
            .filter(|a| seen.insert(*a))
            .collect()
    }

    fn topics(&self) -> Vec<B256> {
        let mut seen = HashSet::new();
        self.tracked
            .iter()
            .map(|t| t.topic0)
            .filter(|h| seen.insert(*h))
            .collect()
    }

    /// First task whose signature hash and contract match the log.
    fn match_log(&self, log: &RawLog) -> Option<&'a ScanTask> {
        let topic0 = log.topics.first()?;
        self.tracked
            .iter()
            .find(|t| t.topic0 == *topic0 && t.contract == log.address)
            .map(|t| t.task)
    }
}

/// Group tasks by chain; the chain watermark is the lowest `from_block`.
fn group_by_chain(tasks: &[ScanTask]) -> BTreeMap<u64, ChainTasks<'_>> {
    let mut chains: BTreeMap<u64, ChainTasks<'_>> = BTreeMap::new();

    for task in tasks {
        let entry = chains.entry(task.chain_id).or_insert(ChainTasks {
            watermark: task.from_block,
            tracked: Vec::new(),
        });
        entry.watermark = entry.watermark.min(task.from_block);

        match Address::from_str(&task.contract_address) {
            Ok(contract) => entry.tracked.push(TrackedEvent {
                task,
                contract,
                topic0: signature_hash(&task.event_signature),
            }),
            Err(e) => {
                tracing::error!(
                    task_id = task.id,
                    chain_id = task.chain_id,
                    address = %task.contract_address,
                    error = %e,
                    "Invalid contract address in scan task, skipping"
                );
            }
        }
    }

    chains
}

/// Scans every tracked chain concurrently for matching logs.
pub struct ChainScanner {
    store: Arc<dyn ScanStore>,
    connector: Arc<dyn ChainConnector>,
    settings: ScanSettings,
}

impl ChainScanner {
    pub fn new(
        store: Arc<dyn ScanStore>,
        connector: Arc<dyn ChainConnector>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            store,
            connector,
            settings,
        }
    }

    /// Scan all chains. Chains that fail or are skipped are absent from the
    /// result; nothing is written here.
    pub async fn scan_all(&self) -> eyre::Result<Vec<ChainScan>> {
        let tasks = self.store.scan_tasks().await?;
        if tasks.is_empty() {
            tracing::info!("No scan tasks configured");
            return Ok(Vec::new());
        }

        let chains = group_by_chain(&tasks);
        tracing::info!(
            chains = ?chains.keys().collect::<Vec<_>>(),
            tasks = tasks.len(),
            "Scanning chains"
        );

        let results = join_all(
            chains
                .iter()
                .map(|(chain_id, group)| self.scan_chain_logged(*chain_id, group)),
        )
        .await;

        Ok(results.into_iter().flatten().collect())
    }

    async fn scan_chain_logged(&self, chain_id: u64, group: &ChainTasks<'_>) -> Option<ChainScan> {
        match self.scan_chain(chain_id, group).await {
            Ok(scan) => scan,
            Err(e) => {
                tracing::error!(chain_id, error = %e, "Chain scan failed, retrying next cycle");
                None
            }
        }
    }

    async fn scan_chain(
        &self,
        chain_id: u64,
        group: &ChainTasks<'_>,
    ) -> eyre::Result<Option<ChainScan>> {
        let Some(client) = self.connector.connect(chain_id)? else {
            tracing::warn!(chain_id, "No RPC endpoints configured for chain, skipping");
            return Ok(None);
        };
        if group.tracked.is_empty() {
            tracing::warn!(chain_id, "No valid scan tasks for chain, skipping");
            return Ok(None);
        }

        let head = client.block_number().await?;
        let Some(window) = ScanWindow::compute(
            group.watermark,
            head,
            self.settings.confirmation_lag,
            self.settings.block_range,
        ) else {
            tracing::warn!(
                chain_id,
                head,
                watermark = group.watermark,
                confirmation_lag = self.settings.confirmation_lag,
                "Invalid block range, skipping chain this cycle"
            );
            return Ok(None);
        };

        tracing::info!(
            chain_id,
            endpoint = client.endpoint(),
            from = window.from_block,
            to = window.to_block,
            "Scanning block range"
        );

        let query = LogQuery {
            addresses: group.contracts(),
            from_block: window.from_block,
            to_block: window.to_block,
            topic0: group.topics(),
        };
        let logs = client.logs(&query).await?;

        let mut events = Vec::new();
        for log in &logs {
            if log.topics.is_empty() || log.removed {
                continue;
            }
            let Some(task) = group.match_log(log) else {
                continue;
            };

            if let Some(event) = self.stage(chain_id, task, log, client.as_ref()).await? {
                events.push(event);
            }
        }

        tracing::info!(
            chain_id,
            logs = logs.len(),
            staged = events.len(),
            "Chain scan complete"
        );

        Ok(Some(ChainScan {
            chain_id,
            window,
            events,
        }))
    }

    /// Build the record for a matched log unless it is already persisted.
    async fn stage(
        &self,
        chain_id: u64,
        task: &ScanTask,
        log: &RawLog,
        client: &dyn ChainClient,
    ) -> eyre::Result<Option<EventData>> {
        let tx_hash = format!("{:#x}", log.tx_hash);
        if self
            .store
            .event_exists(chain_id, &task.event_type, &tx_hash)
            .await?
        {
            tracing::warn!(
                chain_id,
                event_type = %task.event_type,
                block_number = log.block_number,
                %tx_hash,
                "Event already recorded, skipping"
            );
            return Ok(None);
        }

        let sender = client.sender(log.tx_hash).await?;
        let timestamp = client.block_timestamp(log.block_number).await?;

        tracing::debug!(
            chain_id,
            event_type = %task.event_type,
            block_number = log.block_number,
            %tx_hash,
            log_index = log.log_index,
            "Staging event"
        );

        Ok(Some(EventData::from_log(
            chain_id,
            &task.event_type,
            log,
            sender,
            timestamp,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::indexer::fake::{FakeChain, FakeConnector};

    const STAKED: &str = "Staked(address,uint256)";
    const UNSTAKED: &str = "UnStaked(address,uint256)";

    fn settings() -> ScanSettings {
        ScanSettings {
            block_range: 100,
            confirmation_lag: 6,
        }
    }

    fn contract(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn setup(chains: Vec<(u64, Arc<FakeChain>)>) -> (Arc<MemoryStore>, ChainScanner) {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(FakeConnector::new(chains));
        let scanner = ChainScanner::new(store.clone(), connector, settings());
        (store, scanner)
    }

    #[tokio::test]
    async fn test_scan_window_and_filter() {
        let chain = Arc::new(FakeChain::new(210));
        let (store, scanner) = setup(vec![(1, chain.clone())]);
        let c = contract(0xAA);
        store.add_scan_task(1, &format!("{:#x}", c), 100, "Staked", STAKED);
        store.add_scan_task(1, &format!("{:#x}", c), 150, "UnStaked", UNSTAKED);

        let scans = scanner.scan_all().await.unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].window, ScanWindow { from_block: 100, to_block: 200 });
        assert_eq!(scans[0].next_block(), 201);
        assert!(scans[0].events.is_empty());

        let queries = chain.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].addresses, vec![c]);
        assert_eq!(queries[0].from_block, 100);
        assert_eq!(queries[0].to_block, 200);
        assert_eq!(
            queries[0].topic0,
            vec![signature_hash(STAKED), signature_hash(UNSTAKED)]
        );
    }

    #[tokio::test]
    async fn test_waits_for_head_to_pass_confirmation_lag() {
        let chain = Arc::new(FakeChain::new(150));
        let (store, scanner) = setup(vec![(1, chain.clone())]);
        store.add_scan_task(1, &format!("{:#x}", contract(0xAA)), 100, "Staked", STAKED);

        let scans = scanner.scan_all().await.unwrap();
        assert_eq!(scans[0].window, ScanWindow { from_block: 100, to_block: 144 });
        store.advance_watermark(1, scans[0].next_block()).await.unwrap();

        // Nothing confirmed past block 144 yet
        assert!(scanner.scan_all().await.unwrap().is_empty());
        assert_eq!(chain.queries().len(), 1);

        chain.set_head(400);
        let scans = scanner.scan_all().await.unwrap();
        assert_eq!(scans[0].window, ScanWindow { from_block: 145, to_block: 245 });
        assert_eq!(chain.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_matches_logs_to_tasks() {
        let chain = Arc::new(FakeChain::new(1_000));
        let c = contract(0xAA);
        chain.push_log(FakeChain::log(c, STAKED, 120, 1));
        chain.push_log(FakeChain::log(c, UNSTAKED, 130, 2));
        chain.push_log(FakeChain::log(contract(0xBB), STAKED, 140, 3));

        let (store, scanner) = setup(vec![(1, chain.clone())]);
        // Mixed case must still match the checksummed log address
        store.add_scan_task(1, &format!("0x{}", "Aa".repeat(20)), 100, "Staked", STAKED);
        store.add_scan_task(1, &format!("{:#x}", c), 100, "UnStaked", UNSTAKED);

        let scans = scanner.scan_all().await.unwrap();
        let events = &scans[0].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "Staked");
        assert_eq!(events[0].block_number, 120);
        assert_eq!(events[0].tx_hash, format!("{:#x}", B256::with_last_byte(1)));
        assert_eq!(events[0].sender, format!("{:#x}", FakeChain::sender_of(B256::with_last_byte(1))));
        assert_eq!(events[0].block_timestamp, FakeChain::timestamp_of(120));
        assert_eq!(events[0].topic0, format!("{:#x}", signature_hash(STAKED)));
        assert_eq!(events[1].event_type, "UnStaked");
    }

    #[tokio::test]
    async fn test_first_matching_task_wins() {
        let chain = Arc::new(FakeChain::new(1_000));
        let c = contract(0xAA);
        chain.push_log(FakeChain::log(c, STAKED, 120, 1));

        let (store, scanner) = setup(vec![(1, chain)]);
        store.add_scan_task(1, &format!("{:#x}", c), 100, "Staked", STAKED);
        store.add_scan_task(1, &format!("{:#x}", c), 100, "StakedAgain", STAKED);

        let scans = scanner.scan_all().await.unwrap();
        assert_eq!(scans[0].events.len(), 1);
        assert_eq!(scans[0].events[0].event_type, "Staked");
    }

    #[tokio::test]
    async fn test_skips_removed_and_topicless_logs() {
        let chain = Arc::new(FakeChain::new(1_000));
        let c = contract(0xAA);
        let mut removed = FakeChain::log(c, STAKED, 120, 1);
        removed.removed = true;
        let mut anonymous = FakeChain::log(c, STAKED, 121, 2);
        anonymous.topics.clear();
        chain.push_log(removed);
        chain.push_log(anonymous);
        chain.push_log(FakeChain::log(c, STAKED, 122, 3));

        let (store, scanner) = setup(vec![(1, chain)]);
        store.add_scan_task(1, &format!("{:#x}", c), 100, "Staked", STAKED);

        let scans = scanner.scan_all().await.unwrap();
        assert_eq!(scans[0].events.len(), 1);
        assert_eq!(scans[0].events[0].block_number, 122);
    }

    #[tokio::test]
    async fn test_skips_already_recorded_events() {
        let chain = Arc::new(FakeChain::new(1_000));
        let c = contract(0xAA);
        let log = FakeChain::log(c, STAKED, 120, 1);
        chain.push_log(log.clone());

        let (store, scanner) = setup(vec![(1, chain)]);
        store.add_scan_task(1, &format!("{:#x}", c), 100, "Staked", STAKED);
        store.add_event(EventData::from_log(1, "Staked", &log, Address::ZERO, 0));

        let scans = scanner.scan_all().await.unwrap();
        assert!(scans[0].events.is_empty());
        assert_eq!(scans[0].next_block(), 201);
    }

    #[tokio::test]
    async fn test_chain_behind_watermark_is_skipped() {
        let chain = Arc::new(FakeChain::new(300));
        let (store, scanner) = setup(vec![(1, chain.clone())]);
        store.add_scan_task(1, &format!("{:#x}", contract(0xAA)), 500, "Staked", STAKED);

        let scans = scanner.scan_all().await.unwrap();
        assert!(scans.is_empty());
        assert!(chain.queries().is_empty());
    }

    #[tokio::test]
    async fn test_failing_chain_does_not_affect_others() {
        let healthy = Arc::new(FakeChain::new(1_000));
        let broken = Arc::new(FakeChain::new(1_000));
        broken.fail_logs(true);
        let c = contract(0xAA);
        healthy.push_log(FakeChain::log(c, STAKED, 120, 1));
        broken.push_log(FakeChain::log(c, STAKED, 120, 2));

        let (store, scanner) = setup(vec![(1, healthy), (56, broken)]);
        store.add_scan_task(1, &format!("{:#x}", c), 100, "Staked", STAKED);
        store.add_scan_task(56, &format!("{:#x}", c), 100, "Staked", STAKED);

        let scans = scanner.scan_all().await.unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].chain_id, 1);
        assert_eq!(scans[0].events.len(), 1);
    }

    #[tokio::test]
    async fn test_chain_without_rpc_is_skipped() {
        let (store, scanner) = setup(vec![]);
        store.add_scan_task(10, &format!("{:#x}", contract(0xAA)), 0, "Staked", STAKED);

        assert!(scanner.scan_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_tasks() {
        let (_store, scanner) = setup(vec![]);
        assert!(scanner.scan_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_group_uses_lowest_watermark() {
        let task = |id, from_block, address: &str| ScanTask {
            id,
            chain_id: 1,
            contract_address: address.to_string(),
            from_block,
            event_type: "Staked".into(),
            event_signature: STAKED.into(),
        };
        let good = format!("{:#x}", contract(0xAA));
        let tasks = vec![task(1, 300, &good), task(2, 120, &good), task(3, 50, "0xnothex")];

        let groups = group_by_chain(&tasks);
        let group = &groups[&1];
        assert_eq!(group.watermark, 50);
        assert_eq!(group.tracked.len(), 2);
        assert_eq!(group.contracts(), vec![contract(0xAA)]);
        assert_eq!(group.topics(), vec![signature_hash(STAKED)]);
    }
}
