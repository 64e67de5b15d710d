use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A tracked (contract, event signature) pair on one chain, with its watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub id: i64,
    pub chain_id: u64,
    pub contract_address: String,
    pub from_block: u64,
    pub event_type: String,
    pub event_signature: String,
}

/// Matched log content staged by the scanner, ready for DB insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventData {
    pub chain_id: u64,
    pub sender: String,
    pub event_type: String,
    pub contract_address: String,
    pub topic0: String,
    pub topic1: String,
    pub topic2: String,
    pub topic3: String,
    pub raw_data: String,
    pub log_index: u64,
    pub tx_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_index: u64,
}

impl EventData {
    /// Build a record from a matched log. Topics are lower-cased hex, missing
    /// topics are empty strings, data is `0x`-prefixed hex.
    pub fn from_log(
        chain_id: u64,
        event_type: &str,
        log: &RawLog,
        sender: Address,
        block_timestamp: u64,
    ) -> Self {
        let topic = |i: usize| {
            log.topics
                .get(i)
                .map(|t| format!("{:#x}", t))
                .unwrap_or_default()
        };

        Self {
            chain_id,
            sender: format!("{:#x}", sender),
            event_type: event_type.to_string(),
            contract_address: format!("{:#x}", log.address),
            topic0: topic(0),
            topic1: topic(1),
            topic2: topic(2),
            topic3: topic(3),
            raw_data: format!("0x{}", hex::encode(&log.data)),
            log_index: log.log_index,
            tx_hash: format!("{:#x}", log.tx_hash),
            block_number: log.block_number,
            block_timestamp,
            tx_index: log.tx_index,
        }
    }
}

/// A persisted event row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub id: i64,
    #[serde(flatten)]
    pub data: EventData,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// The subset of an RPC log the scanner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub tx_index: u64,
    pub removed: bool,
}

impl From<Log> for RawLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number: log.block_number.unwrap_or_default(),
            tx_hash: log.transaction_hash.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
            tx_index: log.transaction_index.unwrap_or_default(),
            removed: log.removed,
        }
    }
}

/// `eth_getLogs` parameters: contracts, inclusive block range, topic0 OR-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub addresses: Vec<Address>,
    pub from_block: u64,
    pub to_block: u64,
    pub topic0: Vec<B256>,
}

/// Inclusive block range examined in one scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl ScanWindow {
    /// Compute the window for a chain, or `None` when it should be skipped
    /// this cycle (head not far enough past the confirmation lag, or behind
    /// the watermark).
    pub fn compute(
        watermark: u64,
        head: u64,
        confirmation_lag: u64,
        block_range: u64,
    ) -> Option<Self> {
        let to_block = head.checked_sub(confirmation_lag).filter(|b| *b > 0)?;
        if to_block < watermark {
            return None;
        }

        let capped = watermark.saturating_add(block_range);
        Some(Self {
            from_block: watermark,
            to_block: if capped < to_block { capped } else { to_block },
        })
    }

    /// Watermark to store once this window has been persisted.
    pub fn next_block(&self) -> u64 {
        self.to_block + 1
    }
}

/// Lowest watermark per chain, as reported to the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainWatermark {
    pub chain_id: u64,
    pub from_block: u64,
}
