// crates/usv-economics/src/lib.rs
//
// usv-economics: the Universal (USV) reserve-backed treasury protocol.
//
// Components:
//   - treasury     reserve custody, USV minting, debt, capability registry
//   - barter       discounted USV sold for reserves, vesting linearly
//   - rebasing     sUSV, the gons-based rebasing staking receipt
//   - distributor  per-epoch reward minting
//   - staking      epoch rollover, warm-up, stake/unstake
//   - protocol     the transactional facade tying them together
//
// All USV and sUSV values are tracked in units of 10^-9 USV.

pub mod barter;
pub mod distributor;
pub mod ledger;
pub mod permissions;
pub mod protocol;
pub mod rebasing;
pub mod snapshot;
pub mod staking;
pub mod token;
pub mod treasury;
pub mod valuation;

// Re-export key types for ergonomic access from downstream crates.
pub use barter::{BarterDepository, BarterTerms, Bond, DepositReceipt, TermParameter};
pub use distributor::{Distributor, RewardRecipient};
pub use ledger::{AssetBank, TokenLedger};
pub use permissions::{Capability, PermissionRegistry};
pub use protocol::{
    asset_address, barter_address, BarterConfig, GenesisConfig, LiquidityPoolConfig, Protocol,
    ProtocolAddresses, ProtocolState, ReserveAssetConfig,
};
pub use rebasing::{RebaseRecord, StakedUsv};
pub use staking::{Epoch, StakingCoordinator, WarmupClaim};
pub use token::{Amount, Usv, UNITS_PER_USV, USV_DECIMALS};
pub use treasury::Treasury;
pub use valuation::ConstantProductValuation;
