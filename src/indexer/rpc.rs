use alloy::network::TransactionResponse;
use alloy::primitives::{keccak256, Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ChainConfig;
use crate::indexer::types::{LogQuery, RawLog};

/// keccak256 of an event signature such as `Staked(address,uint256)`.
pub fn signature_hash(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// JSON-RPC access for a single chain endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn block_number(&self) -> eyre::Result<u64>;

    async fn logs(&self, query: &LogQuery) -> eyre::Result<Vec<RawLog>>;

    /// Sender of a transaction; the zero address when the node does not know it.
    async fn sender(&self, tx_hash: B256) -> eyre::Result<Address>;

    /// Block timestamp in seconds; 0 when the block is unknown.
    async fn block_timestamp(&self, block_number: u64) -> eyre::Result<u64>;
}

/// Hands out a client for a chain, or `None` when the chain has no endpoints.
pub trait ChainConnector: Send + Sync {
    fn connect(&self, chain_id: u64) -> eyre::Result<Option<Arc<dyn ChainClient>>>;
}

/// Per-chain RPC endpoint pools. Each `connect` picks an endpoint uniformly
/// at random; there is no health checking.
pub struct RpcPool {
    pools: HashMap<u64, Vec<String>>,
    max_retries: u32,
}

impl RpcPool {
    pub fn new(chains: &[ChainConfig], max_retries: u32) -> Self {
        let pools = chains
            .iter()
            .map(|c| (c.chain_id, c.rpc_pool.clone()))
            .collect();
        Self { pools, max_retries }
    }
}

impl ChainConnector for RpcPool {
    fn connect(&self, chain_id: u64) -> eyre::Result<Option<Arc<dyn ChainClient>>> {
        let Some(endpoint) = self
            .pools
            .get(&chain_id)
            .and_then(|pool| pool.choose(&mut rand::thread_rng()))
        else {
            return Ok(None);
        };

        let provider = ProviderBuilder::new().connect_http(
            endpoint
                .parse()
                .map_err(|e| eyre::eyre!("Invalid RPC URL '{}': {}", endpoint, e))?,
        );

        Ok(Some(Arc::new(AlloyChainClient {
            endpoint: endpoint.clone(),
            provider,
            max_retries: self.max_retries,
        })))
    }
}

/// `ChainClient` over an alloy provider. Every call is retried with backoff.
pub struct AlloyChainClient<P> {
    endpoint: String,
    provider: P,
    max_retries: u32,
}

#[async_trait]
impl<P> ChainClient for AlloyChainClient<P>
where
    P: Provider + Send + Sync,
{
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn block_number(&self) -> eyre::Result<u64> {
        retry_rpc(self.max_retries, || self.provider.get_block_number()).await
    }

    async fn logs(&self, query: &LogQuery) -> eyre::Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(query.addresses.clone())
            .event_signature(query.topic0.clone())
            .from_block(query.from_block)
            .to_block(query.to_block);

        let logs = retry_rpc(self.max_retries, || self.provider.get_logs(&filter)).await?;
        Ok(logs.into_iter().map(RawLog::from).collect())
    }

    async fn sender(&self, tx_hash: B256) -> eyre::Result<Address> {
        let tx = retry_rpc(self.max_retries, || async {
            self.provider.get_transaction_by_hash(tx_hash).await
        })
        .await?;

        Ok(sender_or_zero(tx.map(|tx| tx.from())))
    }

    async fn block_timestamp(&self, block_number: u64) -> eyre::Result<u64> {
        let block = retry_rpc(self.max_retries, || async {
            self.provider
                .get_block_by_number(BlockNumberOrTag::Number(block_number))
                .await
        })
        .await?;

        Ok(timestamp_or_zero(block.map(|b| b.header.timestamp)))
    }
}

/// A transaction the node cannot find is recorded with the zero address.
fn sender_or_zero(from: Option<Address>) -> Address {
    from.unwrap_or(Address::ZERO)
}

/// A block the node cannot find is recorded with timestamp 0.
fn timestamp_or_zero(timestamp: Option<u64>) -> u64 {
    timestamp.unwrap_or_default()
}

/// Retry an async operation with exponential backoff.
/// Handles transient RPC errors (rate limits, network issues).
pub async fn retry_rpc<F, Fut, T, E>(max_retries: u32, mut f: F) -> eyre::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = Duration::from_millis(500);

    for attempt in 0..max_retries {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "RPC call failed, retrying..."
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }

    // Final attempt; propagate the error
    f().await.map_err(|e| eyre::eyre!("RPC call failed after {} retries: {}", max_retries, e))
}
