use num_bigint::{BigInt, BigUint};
use std::sync::Arc;

use crate::db::LedgerStore;

/// Ledger-affecting event kinds. Other event types pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeAction {
    Staked,
    UnStaked,
}

impl StakeAction {
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "Staked" => Some(Self::Staked),
            "UnStaked" => Some(Self::UnStaked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staked => "Staked",
            Self::UnStaked => "UnStaked",
        }
    }
}

/// Per-wallet staking totals. Stored as decimal strings, computed as `BigInt`.
///
/// `current_staked` is not clamped: an unstake larger than the current stake
/// leaves it negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLedger {
    pub id: Option<i64>,
    pub address: String,
    pub total_staked: BigInt,
    pub total_unstaked: BigInt,
    pub current_staked: BigInt,
}

impl UserLedger {
    /// First row for a wallet.
    pub fn open(address: &str, action: StakeAction, amount: &BigUint) -> Self {
        let amount = BigInt::from(amount.clone());
        let zero = BigInt::from(0);
        let (total_staked, total_unstaked, current_staked) = match action {
            StakeAction::Staked => (amount.clone(), zero, amount),
            StakeAction::UnStaked => (zero.clone(), amount, zero),
        };

        Self {
            id: None,
            address: address.to_string(),
            total_staked,
            total_unstaked,
            current_staked,
        }
    }

    pub fn apply(&mut self, action: StakeAction, amount: &BigUint) {
        let amount = BigInt::from(amount.clone());
        match action {
            StakeAction::Staked => {
                self.total_staked += &amount;
                self.current_staked += amount;
            }
            StakeAction::UnStaked => {
                self.total_unstaked += &amount;
                self.current_staked -= amount;
            }
        }
    }

    /// Rebuild from stored decimal strings.
    pub fn from_strings(
        id: Option<i64>,
        address: String,
        total_staked: &str,
        total_unstaked: &str,
        current_staked: &str,
    ) -> eyre::Result<Self> {
        let parse = |field: &str, value: &str| {
            value.parse::<BigInt>().map_err(|e| {
                eyre::eyre!("Invalid {} '{}' for wallet {}: {}", field, value, address, e)
            })
        };

        Ok(Self {
            total_staked: parse("total_staked", total_staked)?,
            total_unstaked: parse("total_unstaked", total_unstaked)?,
            current_staked: parse("current_staked", current_staked)?,
            id,
            address,
        })
    }
}

/// Applies Staked/UnStaked deltas with a read-modify-write (no row lock) and
/// marks events processed.
#[derive(Clone)]
pub struct LedgerUpdater {
    store: Arc<dyn LedgerStore>,
}

impl LedgerUpdater {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn apply(
        &self,
        action: StakeAction,
        wallet: &str,
        amount: &BigUint,
    ) -> eyre::Result<UserLedger> {
        match self.store.find_ledger(wallet).await? {
            Some(mut ledger) => {
                ledger.apply(action, amount);
                self.store.update_ledger(&ledger).await?;

                tracing::info!(
                    wallet,
                    action = action.as_str(),
                    %amount,
                    current_staked = %ledger.current_staked,
                    "Ledger updated"
                );
                if ledger.current_staked < BigInt::from(0) {
                    tracing::warn!(
                        wallet,
                        current_staked = %ledger.current_staked,
                        "Current stake is negative"
                    );
                }
                Ok(ledger)
            }
            None => {
                let mut ledger = UserLedger::open(wallet, action, amount);
                ledger.id = Some(self.store.insert_ledger(&ledger).await?);

                tracing::info!(
                    wallet,
                    action = action.as_str(),
                    %amount,
                    "Ledger opened"
                );
                Ok(ledger)
            }
        }
    }

    pub async fn mark_processed(&self, event_id: i64) -> eyre::Result<()> {
        let updated = self.store.mark_processed(event_id).await?;
        if updated == 0 {
            tracing::warn!(event_id, "Event to mark processed was not found");
        }
        Ok(())
    }
}
