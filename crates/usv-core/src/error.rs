// crates/usv-core/src/error.rs

use thiserror::Error;

use crate::identity::Address;

/// Protocol-wide error types for the Universal treasury protocol.
///
/// Every variant is terminal for the call that produced it: the protocol
/// facade discards the draft state of a failed call, so no partial mutation
/// survives an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsvError {
    /// Caller does not hold the capability (or ownership) the call requires.
    #[error("Permission denied: {subject} is not approved as {required}")]
    PermissionDenied { required: String, subject: Address },

    /// Asset is neither a registered reserve token nor a liquidity token.
    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(Address),

    /// Unsigned subtraction would go below zero.
    #[error("Arithmetic underflow: {0}")]
    Underflow(String),

    /// Multiplication or addition exceeded the amount range.
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Debtor tried to borrow beyond its staked balance.
    #[error("Exceeds debt limit: requested {requested}, available {available}")]
    ExceedsDebtLimit { requested: u128, available: u128 },

    /// Barter payout below the minimum payout.
    #[error("Barter too small: payout {payout} below minimum {minimum}")]
    BarterTooSmall { payout: u128, minimum: u128 },

    /// Barter payout above the per-deposit cap.
    #[error("Barter too large: payout {payout} above maximum {maximum}")]
    BarterTooLarge { payout: u128, maximum: u128 },

    /// Current barter price exceeds the caller's slippage limit.
    #[error("Price too high: current price {price}, max acceptable {max_price}")]
    PriceTooHigh { price: u128, max_price: u128 },

    /// Holder balance is smaller than the requested amount.
    #[error("Insufficient balance: {holder} has {available}, needs {requested}")]
    InsufficientBalance {
        holder: Address,
        available: u128,
        requested: u128,
    },

    /// Spender allowance is smaller than the requested amount.
    #[error("Insufficient allowance: {spender} may move {available} for {owner}, needs {requested}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        available: u128,
        requested: u128,
    },

    /// `toggle` without a preceding `queue`.
    #[error("Must queue {capability} for {subject} before toggling")]
    NotQueued { capability: String, subject: Address },

    /// `toggle` before the queue delay has elapsed.
    #[error("Queue for {subject} not expired: ready at block {ready_at}, current block {current}")]
    QueueNotExpired {
        subject: Address,
        ready_at: u64,
        current: u64,
    },

    /// Withdrawal or reward mint larger than the excess reserves.
    #[error("Insufficient reserves: requested {requested}, excess {excess}")]
    InsufficientReserves { requested: u128, excess: u128 },

    /// Barter depository outstanding debt already above its cap.
    #[error("Max capacity reached: debt {debt} above cap {max_debt}")]
    MaxCapacityReached { debt: u128, max_debt: u128 },

    /// Barter terms rejected during initialization or update.
    #[error("Invalid terms: {0}")]
    InvalidTerms(String),

    /// Redeem requested for a depositor without an open bond.
    #[error("No active bond for {0}")]
    NoActiveBond(Address),

    /// Warm-up deposits for this account are locked by its owner.
    #[error("Deposits for {0} are locked")]
    DepositsLocked(Address),

    /// USV supply would exceed reserves plus outstanding debt.
    #[error("Backing violated: supply {supply} exceeds reserves {reserves} + debt {debt}")]
    BackingViolated {
        supply: u128,
        reserves: u128,
        debt: u128,
    },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage layer error (RocksDB, in-memory store).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file or genesis parameters are invalid.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for UsvError {
    fn from(e: serde_json::Error) -> Self {
        UsvError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_amounts() {
        let err = UsvError::ExceedsDebtLimit {
            requested: 6_000_000_000,
            available: 5_000_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Exceeds debt limit: requested 6000000000, available 5000000000"
        );
    }

    #[test]
    fn test_from_serde_json() {
        let parse: Result<u32, _> = serde_json::from_str("not json");
        let err: UsvError = parse.unwrap_err().into();
        assert!(matches!(err, UsvError::Serialization(_)));
    }
}
