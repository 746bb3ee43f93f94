// crates/usv-economics/src/valuation.rs
//
// Risk-free valuation of USV/reserve constant-product pool tokens.
//
// A pool holding `x` USV and `y` reserve units has invariant `k = x * y`.
// Whatever the market price, the pool is worth at least `2 * sqrt(k)` USV
// of backing, so one pool token is valued at `2 * sqrt(k) / lp_supply`.
// This is what the treasury credits as reserves for liquidity deposits.
//
// `k` is normalized so that `sqrt(k)` is denominated in USV units:
//   k = usv_reserve * paired_reserve / 10^(9 + paired_decimals - lp_decimals)

use serde::{Deserialize, Serialize};

use crate::token::{pow10, Amount, USV_DECIMALS};
use usv_core::error::UsvError;
use usv_core::identity::Address;
use usv_core::traits::LiquidityValuation;

/// Decimals of pool tokens.
pub const LP_DECIMALS: u8 = 18;

/// Snapshot of a USV/reserve pool's reserves and pool-token supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantProductValuation {
    /// USV held by the pool, in USV units.
    pub usv_reserve: Amount,
    /// Paired reserve asset held by the pool, in its own units.
    pub paired_reserve: Amount,
    /// Decimals of the paired reserve asset.
    pub paired_decimals: u8,
    /// Total pool tokens in existence.
    pub lp_supply: Amount,
}

impl ConstantProductValuation {
    pub fn new(usv_reserve: Amount, paired_reserve: Amount, paired_decimals: u8, lp_supply: Amount) -> Self {
        Self {
            usv_reserve,
            paired_reserve,
            paired_decimals,
            lp_supply,
        }
    }

    /// Normalized constant-product invariant.
    pub fn k_value(&self) -> Result<Amount, UsvError> {
        let product = self
            .usv_reserve
            .checked_mul(self.paired_reserve)
            .ok_or_else(|| UsvError::Overflow("pool invariant".to_string()))?;
        let shift = (USV_DECIMALS + self.paired_decimals).saturating_sub(LP_DECIMALS);
        Ok(product / pow10(shift))
    }

    /// `2 * sqrt(k)`, the pool's risk-free value in USV units.
    pub fn total_value(&self) -> Result<Amount, UsvError> {
        Ok(integer_sqrt(self.k_value()?) * 2)
    }
}

impl LiquidityValuation for ConstantProductValuation {
    fn valuation(&self, _pool: &Address, amount: Amount) -> Result<Amount, UsvError> {
        if self.lp_supply == 0 {
            return Ok(0);
        }
        let total_value = self.total_value()?;
        total_value
            .checked_mul(amount)
            .map(|v| v / self.lp_supply)
            .ok_or_else(|| UsvError::Overflow("pool token valuation".to_string()))
    }

    fn markdown(&self, _pool: &Address) -> Result<Amount, UsvError> {
        let total_value = self.total_value()?;
        if total_value == 0 {
            return Ok(0);
        }
        self.paired_reserve
            .checked_mul(2 * pow10(USV_DECIMALS))
            .map(|v| v / total_value)
            .ok_or_else(|| UsvError::Overflow("pool markdown".to_string()))
    }
}

/// Floor square root (Newton's method).
pub fn integer_sqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x >> 1) + (x & 1);
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}
