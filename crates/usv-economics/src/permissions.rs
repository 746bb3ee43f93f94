// crates/usv-economics/src/permissions.rs
//
// Two-phase capability registry used by the treasury.
//
// Every privileged treasury entry point is gated by one capability. A
// capability is granted to a subject in two steps: the administrator first
// `queue`s the grant, then `toggle`s it once the queue delay has passed.
// Toggling an active grant revokes it immediately.
//
// Manager capabilities (reserve-manager, liquidity-manager) wait twice the
// configured delay.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use usv_core::error::UsvError;
use usv_core::identity::Address;

/// Closed set of treasury capabilities.
///
/// Discriminants are the wire codes accepted by `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ReserveDepositor = 0,
    ReserveSpender = 1,
    ReserveToken = 2,
    ReserveManager = 3,
    LiquidityDepositor = 4,
    LiquidityToken = 5,
    LiquidityManager = 6,
    Debtor = 7,
    RewardManager = 8,
    RebasingTokenAuthority = 9,
}

impl Capability {
    /// All capabilities in code order.
    pub const ALL: [Capability; 10] = [
        Capability::ReserveDepositor,
        Capability::ReserveSpender,
        Capability::ReserveToken,
        Capability::ReserveManager,
        Capability::LiquidityDepositor,
        Capability::LiquidityToken,
        Capability::LiquidityManager,
        Capability::Debtor,
        Capability::RewardManager,
        Capability::RebasingTokenAuthority,
    ];

    /// Numeric wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a capability by its numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::ReserveDepositor => "reserve-depositor",
            Capability::ReserveSpender => "reserve-spender",
            Capability::ReserveToken => "reserve-token",
            Capability::ReserveManager => "reserve-manager",
            Capability::LiquidityDepositor => "liquidity-depositor",
            Capability::LiquidityToken => "liquidity-token",
            Capability::LiquidityManager => "liquidity-manager",
            Capability::Debtor => "debtor",
            Capability::RewardManager => "reward-manager",
            Capability::RebasingTokenAuthority => "rebasing-token-authority",
        }
    }

    /// Whether the queue delay is doubled for this capability.
    pub fn is_manager(self) -> bool {
        matches!(self, Capability::ReserveManager | Capability::LiquidityManager)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = UsvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code)
                .ok_or_else(|| UsvError::NotFound(format!("capability code {}", code)));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UsvError::NotFound(format!("capability {}", s)))
    }
}

/// Grants of one capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityGrants {
    active: BTreeSet<Address>,
    /// subject -> first block at which `toggle` may activate it.
    pending: BTreeMap<Address, u64>,
    /// Every subject ever activated, in activation order, without duplicates.
    activated: Vec<Address>,
}

/// The registry of queued and active grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRegistry {
    queue_delay_blocks: u64,
    grants: BTreeMap<Capability, CapabilityGrants>,
}

impl PermissionRegistry {
    /// Create an empty registry with the given base queue delay.
    pub fn new(queue_delay_blocks: u64) -> Self {
        Self {
            queue_delay_blocks,
            grants: BTreeMap::new(),
        }
    }

    pub fn queue_delay_blocks(&self) -> u64 {
        self.queue_delay_blocks
    }

    /// Change the base delay. Entries already queued keep their ready block.
    pub fn set_queue_delay(&mut self, blocks: u64) {
        self.queue_delay_blocks = blocks;
    }

    /// Blocks a queued grant of `capability` must wait before toggling.
    pub fn delay_for(&self, capability: Capability) -> u64 {
        if capability.is_manager() {
            self.queue_delay_blocks.saturating_mul(2)
        } else {
            self.queue_delay_blocks
        }
    }

    /// Queue a grant. Re-queueing refreshes the ready block.
    ///
    /// Returns the block at which the grant can be toggled.
    pub fn queue(&mut self, capability: Capability, subject: &Address, block: u64) -> Result<u64, UsvError> {
        if subject.is_zero() {
            return Err(UsvError::InvalidState(format!(
                "Cannot queue {} for the zero address",
                capability
            )));
        }
        let ready_at = block.saturating_add(self.delay_for(capability));
        self.grants
            .entry(capability)
            .or_default()
            .pending
            .insert(*subject, ready_at);
        Ok(ready_at)
    }

    /// Flip a grant.
    ///
    /// An inactive grant needs an expired queue entry and becomes active.
    /// An active grant is revoked without any queue entry.
    ///
    /// Returns the new state (`true` = active).
    pub fn toggle(&mut self, capability: Capability, subject: &Address, block: u64) -> Result<bool, UsvError> {
        let grants = self.grants.entry(capability).or_default();

        if grants.active.remove(subject) {
            return Ok(false);
        }

        let ready_at = *grants.pending.get(subject).ok_or_else(|| UsvError::NotQueued {
            capability: capability.to_string(),
            subject: *subject,
        })?;
        if ready_at > block {
            return Err(UsvError::QueueNotExpired {
                subject: *subject,
                ready_at,
                current: block,
            });
        }

        grants.pending.remove(subject);
        grants.active.insert(*subject);
        if !grants.activated.contains(subject) {
            grants.activated.push(*subject);
        }
        Ok(true)
    }

    /// Whether `subject` currently holds `capability`.
    pub fn is_granted(&self, capability: Capability, subject: &Address) -> bool {
        self.grants
            .get(&capability)
            .map(|g| g.active.contains(subject))
            .unwrap_or(false)
    }

    /// Fail with `PermissionDenied` unless `subject` holds `capability`.
    pub fn require(&self, capability: Capability, subject: &Address) -> Result<(), UsvError> {
        if self.is_granted(capability, subject) {
            Ok(())
        } else {
            Err(UsvError::PermissionDenied {
                required: capability.to_string(),
                subject: *subject,
            })
        }
    }

    /// Ready block of a pending grant.
    pub fn pending_at(&self, capability: Capability, subject: &Address) -> Option<u64> {
        self.grants
            .get(&capability)
            .and_then(|g| g.pending.get(subject).copied())
    }

    /// Every subject ever activated for `capability`, in activation order.
    pub fn activated(&self, capability: Capability) -> &[Address] {
        self.grants
            .get(&capability)
            .map(|g| g.activated.as_slice())
            .unwrap_or(&[])
    }

    /// Subjects currently holding `capability`, in address order.
    pub fn active(&self, capability: Capability) -> Vec<Address> {
        self.grants
            .get(&capability)
            .map(|g| g.active.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for PermissionRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}
