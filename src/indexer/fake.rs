//! Scripted chain used by the unit tests.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::rpc::{signature_hash, ChainClient, ChainConnector};
use super::types::{LogQuery, RawLog};

pub struct FakeChain {
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    queries: Mutex<Vec<LogQuery>>,
    fail_logs: AtomicBool,
}

impl FakeChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            fail_logs: AtomicBool::new(false),
        }
    }

    /// A log for `signature` on `contract`, in tx `0x00..0n`.
    pub fn log(contract: Address, signature: &str, block_number: u64, n: u8) -> RawLog {
        RawLog {
            address: contract,
            topics: vec![signature_hash(signature)],
            data: Bytes::from(vec![0u8; 64]),
            block_number,
            tx_hash: B256::with_last_byte(n),
            log_index: n as u64,
            tx_index: 0,
            removed: false,
        }
    }

    pub fn sender_of(tx_hash: B256) -> Address {
        Address::from_word(tx_hash)
    }

    pub fn timestamp_of(block_number: u64) -> u64 {
        1_700_000_000 + block_number * 12
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<LogQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn endpoint(&self) -> &str {
        "fake://chain"
    }

    async fn block_number(&self) -> eyre::Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn logs(&self, query: &LogQuery) -> eyre::Result<Vec<RawLog>> {
        self.queries.lock().unwrap().push(query.clone());
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(eyre::eyre!("connection reset"));
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.block_number >= query.from_block && l.block_number <= query.to_block)
            .filter(|l| query.addresses.contains(&l.address))
            .filter(|l| l.topics.first().map_or(true, |t| query.topic0.contains(t)))
            .cloned()
            .collect())
    }

    async fn sender(&self, tx_hash: B256) -> eyre::Result<Address> {
        Ok(Self::sender_of(tx_hash))
    }

    async fn block_timestamp(&self, block_number: u64) -> eyre::Result<u64> {
        Ok(Self::timestamp_of(block_number))
    }
}

pub struct FakeConnector {
    chains: HashMap<u64, Arc<FakeChain>>,
}

impl FakeConnector {
    pub fn new(chains: Vec<(u64, Arc<FakeChain>)>) -> Self {
        Self {
            chains: chains.into_iter().collect(),
        }
    }
}

impl ChainConnector for FakeConnector {
    fn connect(&self, chain_id: u64) -> eyre::Result<Option<Arc<dyn ChainClient>>> {
        Ok(self
            .chains
            .get(&chain_id)
            .map(|c| c.clone() as Arc<dyn ChainClient>))
    }
}
