use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::query::{self, Filter, Order, Predicate, Select, Value};
use super::{EventFilter, LedgerStore, QueryStore, ScanStore};
use crate::indexer::types::{ChainWatermark, EventData, EventRecord, ScanTask};
use crate::ledger::updater::UserLedger;

const SCAN_TASKS: &str = "scan_tasks";
const EVENT_RECORDS: &str = "event_records";
const USER_LEDGERS: &str = "user_ledgers";

pub const EVENT_COLUMNS: [&str; 14] = [
    "chain_id",
    "sender",
    "event_type",
    "contract_address",
    "topic0",
    "topic1",
    "topic2",
    "topic3",
    "raw_data",
    "log_index",
    "tx_hash",
    "block_number",
    "block_timestamp",
    "tx_index",
];

/// PostgreSQL-backed store. Cheap to clone; shares the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScanTaskRow {
    id: i64,
    chain_id: i64,
    contract_address: String,
    from_block: i64,
    event_type: String,
    event_signature: String,
}

impl From<ScanTaskRow> for ScanTask {
    fn from(row: ScanTaskRow) -> Self {
        Self {
            id: row.id,
            chain_id: row.chain_id as u64,
            contract_address: row.contract_address,
            from_block: row.from_block as u64,
            event_type: row.event_type,
            event_signature: row.event_signature,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    chain_id: i64,
    sender: String,
    event_type: String,
    contract_address: String,
    topic0: String,
    topic1: String,
    topic2: String,
    topic3: String,
    raw_data: String,
    log_index: i64,
    tx_hash: String,
    block_number: i64,
    block_timestamp: i64,
    tx_index: i64,
    processed: i16,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            data: EventData {
                chain_id: row.chain_id as u64,
                sender: row.sender,
                event_type: row.event_type,
                contract_address: row.contract_address,
                topic0: row.topic0,
                topic1: row.topic1,
                topic2: row.topic2,
                topic3: row.topic3,
                raw_data: row.raw_data,
                log_index: row.log_index as u64,
                tx_hash: row.tx_hash,
                block_number: row.block_number as u64,
                block_timestamp: row.block_timestamp as u64,
                tx_index: row.tx_index as u64,
            },
            processed: row.processed != 0,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: i64,
    address: String,
    total_staked: String,
    total_unstaked: String,
    current_staked: String,
}

fn event_select() -> Select {
    Select::from(EVENT_RECORDS).fields(
        ["id"]
            .into_iter()
            .chain(EVENT_COLUMNS)
            .chain(["processed", "created_at"]),
    )
}

fn event_values(e: &EventData) -> eyre::Result<Vec<Value>> {
    Ok(vec![
        Value::try_from(e.chain_id)?,
        Value::from(e.sender.as_str()),
        Value::from(e.event_type.as_str()),
        Value::from(e.contract_address.as_str()),
        Value::from(e.topic0.as_str()),
        Value::from(e.topic1.as_str()),
        Value::from(e.topic2.as_str()),
        Value::from(e.topic3.as_str()),
        Value::from(e.raw_data.as_str()),
        Value::try_from(e.log_index)?,
        Value::from(e.tx_hash.as_str()),
        Value::try_from(e.block_number)?,
        Value::try_from(e.block_timestamp)?,
        Value::try_from(e.tx_index)?,
    ])
}

fn ledger_amounts(ledger: &UserLedger) -> [(&'static str, Value); 3] {
    [
        ("total_staked", Value::from(ledger.total_staked.to_string())),
        ("total_unstaked", Value::from(ledger.total_unstaked.to_string())),
        ("current_staked", Value::from(ledger.current_staked.to_string())),
    ]
}

#[async_trait]
impl ScanStore for PgStore {
    async fn scan_tasks(&self) -> eyre::Result<Vec<ScanTask>> {
        let select = Select::from(SCAN_TASKS)
            .fields([
                "id",
                "chain_id",
                "contract_address",
                "from_block",
                "event_type",
                "event_signature",
            ])
            .order_by("id", Order::Asc);

        let rows: Vec<ScanTaskRow> = query::fetch_all(&self.pool, &select).await?;
        Ok(rows.into_iter().map(ScanTask::from).collect())
    }

    async fn event_exists(
        &self,
        chain_id: u64,
        event_type: &str,
        tx_hash: &str,
    ) -> eyre::Result<bool> {
        let filter = Filter::new()
            .eq("chain_id", Value::try_from(chain_id)?)
            .eq("event_type", event_type)
            .eq("tx_hash", tx_hash);
        Ok(query::count(&self.pool, EVENT_RECORDS, &filter).await? > 0)
    }

    async fn insert_events(&self, events: &[EventData], chunk_size: usize) -> eyre::Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        let rows = events
            .iter()
            .map(event_values)
            .collect::<eyre::Result<Vec<_>>>()?;
        query::insert_batch(&self.pool, EVENT_RECORDS, &EVENT_COLUMNS, &rows, chunk_size).await
    }

    async fn advance_watermark(&self, chain_id: u64, next_block: u64) -> eyre::Result<u64> {
        let next_block = Value::try_from(next_block)?;
        let filter = Filter::new()
            .eq("chain_id", Value::try_from(chain_id)?)
            .with("from_block", Predicate::Lt(next_block.clone()));
        query::update(
            &self.pool,
            SCAN_TASKS,
            &[("from_block", next_block)],
            &filter,
        )
        .await
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn unprocessed_events(&self, limit: u32) -> eyre::Result<Vec<EventRecord>> {
        let select = event_select()
            .filter(Filter::new().eq("processed", 0i64))
            .order_by("id", Order::Asc)
            .limit(limit as i64, 0);

        let rows: Vec<EventRow> = query::fetch_all(&self.pool, &select).await?;
        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    async fn mark_processed(&self, event_id: i64) -> eyre::Result<u64> {
        query::update(
            &self.pool,
            EVENT_RECORDS,
            &[("processed", Value::Int(1))],
            &Filter::new().eq("id", event_id),
        )
        .await
    }

    async fn find_ledger(&self, address: &str) -> eyre::Result<Option<UserLedger>> {
        let select = Select::from(USER_LEDGERS)
            .fields([
                "id",
                "address",
                "total_staked",
                "total_unstaked",
                "current_staked",
            ])
            .filter(Filter::new().eq("address", address))
            .order_by("id", Order::Asc)
            .limit(1, 0);

        let rows: Vec<LedgerRow> = query::fetch_all(&self.pool, &select).await?;
        rows.into_iter()
            .next()
            .map(|row| {
                UserLedger::from_strings(
                    Some(row.id),
                    row.address,
                    &row.total_staked,
                    &row.total_unstaked,
                    &row.current_staked,
                )
            })
            .transpose()
    }

    async fn insert_ledger(&self, ledger: &UserLedger) -> eyre::Result<i64> {
        let mut values = vec![("address", Value::from(ledger.address.as_str()))];
        values.extend(ledger_amounts(ledger));
        query::insert(&self.pool, USER_LEDGERS, &values).await
    }

    async fn update_ledger(&self, ledger: &UserLedger) -> eyre::Result<u64> {
        query::update(
            &self.pool,
            USER_LEDGERS,
            &ledger_amounts(ledger),
            &Filter::new().eq("address", ledger.address.as_str()),
        )
        .await
    }
}

#[derive(sqlx::FromRow)]
struct WatermarkRow {
    chain_id: i64,
    from_block: i64,
}

#[async_trait]
impl QueryStore for PgStore {
    async fn watermarks(&self) -> eyre::Result<Vec<ChainWatermark>> {
        let select = Select::from(SCAN_TASKS)
            .fields(["chain_id", "MIN(from_block) AS from_block"])
            .group_by(["chain_id"])
            .order_by("chain_id", Order::Asc);

        let rows: Vec<WatermarkRow> = query::fetch_all(&self.pool, &select).await?;
        Ok(rows
            .into_iter()
            .map(|r| ChainWatermark {
                chain_id: r.chain_id as u64,
                from_block: r.from_block as u64,
            })
            .collect())
    }

    async fn list_events(&self, filter: &EventFilter) -> eyre::Result<Vec<EventRecord>> {
        let mut conditions = Filter::new();
        if let Some(chain_id) = filter.chain_id {
            conditions = conditions.eq("chain_id", Value::try_from(chain_id)?);
        }
        if let Some(event_type) = &filter.event_type {
            conditions = conditions.eq("event_type", event_type.as_str());
        }
        if let Some(processed) = filter.processed {
            conditions = conditions.eq("processed", if processed { 1i64 } else { 0i64 });
        }

        let select = event_select()
            .filter(conditions)
            .order_by("id", Order::Asc)
            .limit(filter.limit, filter.offset);

        let rows: Vec<EventRow> = query::fetch_all(&self.pool, &select).await?;
        Ok(rows.into_iter().map(EventRecord::from).collect())
    }
}
