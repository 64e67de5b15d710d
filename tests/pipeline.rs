//! End-to-end scan and parse cycles against an in-memory store and a
//! scripted chain.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use stake_indexer::config::Config;
use stake_indexer::db::MemoryStore;
use stake_indexer::indexer::rpc::{signature_hash, ChainClient, ChainConnector};
use stake_indexer::indexer::types::{LogQuery, RawLog};
use stake_indexer::pipeline::build_schedulers;

const STAKED: &str = "Staked(address,uint256)";
const UNSTAKED: &str = "UnStaked(address,uint256)";
const CHAIN_ID: u64 = 97;

struct ScriptedChain {
    head: u64,
    logs: Mutex<Vec<RawLog>>,
}

#[async_trait]
impl ChainClient for ScriptedChain {
    fn endpoint(&self) -> &str {
        "scripted://97"
    }

    async fn block_number(&self) -> eyre::Result<u64> {
        Ok(self.head)
    }

    async fn logs(&self, query: &LogQuery) -> eyre::Result<Vec<RawLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.block_number >= query.from_block && l.block_number <= query.to_block)
            .filter(|l| query.addresses.contains(&l.address))
            .cloned()
            .collect())
    }

    async fn sender(&self, _tx_hash: B256) -> eyre::Result<Address> {
        Ok(Address::repeat_byte(0x55))
    }

    async fn block_timestamp(&self, block_number: u64) -> eyre::Result<u64> {
        Ok(1_700_000_000 + block_number)
    }
}

struct Connector(Arc<ScriptedChain>);

impl ChainConnector for Connector {
    fn connect(&self, chain_id: u64) -> eyre::Result<Option<Arc<dyn ChainClient>>> {
        Ok((chain_id == CHAIN_ID).then(|| self.0.clone() as Arc<dyn ChainClient>))
    }
}

/// Log data laid out as `[12 zero bytes][wallet][32-byte amount]`.
fn stake_log(contract: Address, signature: &str, block: u64, tx: u8, wallet: Address, amount: u64) -> RawLog {
    let mut data = vec![0u8; 12];
    data.extend_from_slice(wallet.as_slice());
    data.extend_from_slice(&[0u8; 24]);
    data.extend_from_slice(&amount.to_be_bytes());

    RawLog {
        address: contract,
        topics: vec![signature_hash(signature)],
        data: Bytes::from(data),
        block_number: block,
        tx_hash: B256::with_last_byte(tx),
        log_index: 0,
        tx_index: 0,
        removed: false,
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.scan.block_range = 100;
    config.scan.confirmation_lag = 6;
    config
}

fn wallet_key(wallet: Address) -> String {
    format!("0x{}", hex::encode(wallet.as_slice()))
}

#[tokio::test]
async fn test_scan_then_parse_builds_ledger() {
    let contract = Address::repeat_byte(0xC0);
    let wallet = Address::repeat_byte(0xAB);

    let store = Arc::new(MemoryStore::new());
    store.add_scan_task(CHAIN_ID, &contract.to_string(), 100, "Staked", STAKED);
    store.add_scan_task(CHAIN_ID, &contract.to_string(), 100, "UnStaked", UNSTAKED);

    let chain = Arc::new(ScriptedChain {
        head: 300,
        logs: Mutex::new(vec![
            stake_log(contract, STAKED, 120, 1, wallet, 1000),
            stake_log(contract, UNSTAKED, 180, 2, wallet, 300),
            // past the confirmed window
            stake_log(contract, STAKED, 299, 3, wallet, 5),
        ]),
    });

    let (sync, parse) = build_schedulers(store.clone(), Arc::new(Connector(chain)), &config());

    assert!(sync.trigger().await);
    assert_eq!(store.events().len(), 2);
    assert!(store.tasks().iter().all(|t| t.from_block == 201));

    assert!(parse.trigger().await);
    assert!(store.events().iter().all(|e| e.processed));

    let ledgers = store.ledgers();
    assert_eq!(ledgers.len(), 1);
    assert_eq!(ledgers[0].address, wallet_key(wallet));
    assert_eq!(ledgers[0].total_staked.to_string(), "1000");
    assert_eq!(ledgers[0].total_unstaked.to_string(), "300");
    assert_eq!(ledgers[0].current_staked.to_string(), "700");
}

#[tokio::test]
async fn test_rescan_does_not_duplicate_events() {
    let contract = Address::repeat_byte(0xC0);
    let newcomer = Address::repeat_byte(0xC1);
    let wallet = Address::repeat_byte(0xAB);

    let store = Arc::new(MemoryStore::new());
    store.add_scan_task(CHAIN_ID, &contract.to_string(), 100, "Staked", STAKED);

    let chain = Arc::new(ScriptedChain {
        head: 300,
        logs: Mutex::new(vec![stake_log(contract, STAKED, 150, 1, wallet, 42)]),
    });
    let (sync, parse) = build_schedulers(store.clone(), Arc::new(Connector(chain)), &config());

    sync.trigger().await;
    parse.trigger().await;
    assert_eq!(store.events().len(), 1);

    // A task registered later pulls the chain watermark back to 100, so the
    // already-indexed window is read again.
    store.add_scan_task(CHAIN_ID, &newcomer.to_string(), 100, "Staked", STAKED);
    sync.trigger().await;
    parse.trigger().await;

    assert_eq!(store.events().len(), 1);
    assert_eq!(store.ledgers()[0].total_staked.to_string(), "42");
    assert!(store.tasks().iter().all(|t| t.from_block == 201));
}

#[tokio::test]
async fn test_idle_cycles_leave_ledger_unchanged() {
    let contract = Address::repeat_byte(0xC0);
    let wallet = Address::repeat_byte(0xAB);

    let store = Arc::new(MemoryStore::new());
    store.add_scan_task(CHAIN_ID, &contract.to_string(), 100, "Staked", STAKED);

    let chain = Arc::new(ScriptedChain {
        head: 300,
        logs: Mutex::new(vec![stake_log(contract, STAKED, 110, 1, wallet, 7)]),
    });
    let (sync, parse) = build_schedulers(store.clone(), Arc::new(Connector(chain)), &config());

    sync.trigger().await;
    parse.trigger().await;
    let before = store.ledgers()[0].current_staked.to_string();

    for _ in 0..3 {
        sync.trigger().await;
        parse.trigger().await;
    }

    assert_eq!(store.events().len(), 1);
    assert_eq!(store.ledgers().len(), 1);
    assert_eq!(store.ledgers()[0].current_staked.to_string(), before);
    assert_eq!(before, "7");
}
