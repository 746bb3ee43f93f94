// crates/usv-core/src/lib.rs
//
// usv-core: Core types, error taxonomy, and collaborator traits for the
// Universal (USV) treasury protocol.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines account identifiers, the protocol-wide error enum, and the
// trait interfaces for asset ledgers, liquidity valuation, and durable
// state storage.

pub mod error;
pub mod identity;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use usv_core::Address;`
pub use error::UsvError;
pub use identity::Address;
pub use traits::{AssetLedger, LiquidityValuation, StateRecord, StateStore};
