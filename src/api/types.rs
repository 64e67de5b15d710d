use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indexer::types::{ChainWatermark, EventRecord};
use crate::ledger::updater::UserLedger;

// ============================================================
// Query params
// ============================================================

#[derive(Debug, Deserialize)]
pub struct UserParams {
    pub address: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventParams {
    pub chain_id: Option<u64>,
    pub event_type: Option<String>,
    pub processed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============================================================
// Response types
// ============================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub chains: Vec<ChainWatermark>,
}

/// Amounts are decimal strings; they routinely exceed 64 bits.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub address: String,
    pub total_staked: String,
    pub total_unstaked: String,
    pub current_staked: String,
}

impl From<UserLedger> for LedgerResponse {
    fn from(ledger: UserLedger) -> Self {
        Self {
            address: ledger.address,
            total_staked: ledger.total_staked.to_string(),
            total_unstaked: ledger.total_unstaked.to_string(),
            current_staked: ledger.current_staked.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventRecord>,
    pub count: usize,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
