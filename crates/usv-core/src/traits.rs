// crates/usv-core/src/traits.rs

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::UsvError;
use crate::identity::Address;

/// ERC-20 style asset transfer interface.
///
/// Implemented by `usv_economics::ledger::TokenLedger` for USV, reserve
/// tokens and liquidity-pool tokens. Every mutating call fails loudly on
/// insufficient balance or allowance; callers never assume success.
pub trait AssetLedger {
    /// Decimal places of the smallest unit.
    fn decimals(&self) -> u8;

    /// Total units in existence.
    fn total_supply(&self) -> u128;

    /// Balance of `holder`.
    fn balance_of(&self, holder: &Address) -> u128;

    /// Amount `spender` may still move on behalf of `owner`.
    fn allowance(&self, owner: &Address, spender: &Address) -> u128;

    /// Set the allowance of `spender` over `owner`'s balance.
    fn approve(&mut self, owner: &Address, spender: &Address, amount: u128);

    /// Move `amount` from `from` to `to`.
    fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<(), UsvError>;

    /// Move `amount` from `from` to `to`, spending `spender`'s allowance.
    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), UsvError>;
}

/// Valuation collaborator for liquidity-pool assets.
///
/// Converts an amount of pool token into its USV-denominated backing value.
/// The exact formula is supplied externally; the treasury only stores one
/// valuation per registered liquidity token.
pub trait LiquidityValuation: Debug + Send + Sync {
    /// Backing value (in USV units) of `amount` pool tokens of `pool`.
    fn valuation(&self, pool: &Address, amount: u128) -> Result<u128, UsvError>;

    /// Price markdown used to quote barter prices for this pool in reserve
    /// terms, scaled by 10^9.
    fn markdown(&self, pool: &Address) -> Result<u128, UsvError>;
}

/// A single durable key/value record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub key: String,
    pub value: Vec<u8>,
}

/// Durable key/value storage for protocol state.
///
/// Implemented by usv-store (RocksDB backend and an in-memory backend).
/// Writes must be atomic across all records of one call and reads must
/// observe earlier writes.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically write every record, overwriting existing keys.
    async fn put_records(&self, records: &[StateRecord]) -> Result<(), UsvError>;

    /// Retrieve a single record by key.
    async fn get_record(&self, key: &str) -> Result<Option<Vec<u8>>, UsvError>;

    /// List all records whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<StateRecord>, UsvError>;
}
