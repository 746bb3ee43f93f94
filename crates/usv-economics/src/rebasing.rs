// crates/usv-economics/src/rebasing.rs
//
// sUSV: the elastic-supply staking token.
//
// Balances are stored as "gons", internal units whose total never changes
// (TOTAL_GONS). The visible supply is elastic; each holder's balance is
//   gons / gons_per_fragment,  gons_per_fragment = TOTAL_GONS / total_supply
// so a rebase that grows `total_supply` grows every balance in proportion
// in O(1), without touching per-holder state.
//
// The staking contract holds the undistributed supply. Only balances
// outside it (the circulating supply) earn rebase profit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::token::{Amount, Usv, USV_DECIMALS};
use usv_core::error::UsvError;
use usv_core::identity::Address;
use usv_core::traits::AssetLedger;

/// Supply minted to the staking contract at initialization: 5,000,000 sUSV.
pub const INITIAL_FRAGMENTS_SUPPLY: Amount = 5_000_000 * 1_000_000_000;

/// Total internal units. Largest multiple of the initial supply that fits,
/// so the initial `gons_per_fragment` is exact.
pub const TOTAL_GONS: u128 = u128::MAX - (u128::MAX % INITIAL_FRAGMENTS_SUPPLY);

/// Upper bound on the elastic supply.
pub const MAX_SUPPLY: Amount = u64::MAX as Amount;

/// Scale of `RebaseRecord::rebase_percent` (1e18 = 100%).
pub const PERCENT_SCALE: u128 = 1_000_000_000_000_000_000;

/// Rebase records retained; older entries are dropped first.
pub const REBASE_HISTORY_LIMIT: usize = 256;

/// One entry of the rebase history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseRecord {
    pub epoch: u64,
    /// Profit over circulating supply, scaled by `PERCENT_SCALE`.
    pub rebase_percent: u128,
    pub total_staked_before: Amount,
    pub total_staked_after: Amount,
    pub amount_rebased: Amount,
    pub index: Amount,
    pub block: u64,
}

/// The sUSV ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakedUsv {
    owner: Address,
    /// Staking contract; set once by `initialize`.
    staking: Option<Address>,
    total_supply: Amount,
    gons_per_fragment: u128,
    gon_balances: BTreeMap<Address, u128>,
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    /// Index stored in gons so that it grows with rebases. Zero until set.
    index_gons: u128,
    rebases: Vec<RebaseRecord>,
}

impl StakedUsv {
    /// Create the token with the full initial supply unassigned.
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            staking: None,
            total_supply: INITIAL_FRAGMENTS_SUPPLY,
            gons_per_fragment: TOTAL_GONS / INITIAL_FRAGMENTS_SUPPLY,
            gon_balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            index_gons: 0,
            rebases: Vec::new(),
        }
    }

    fn require_owner(&self, caller: &Address) -> Result<(), UsvError> {
        if *caller != self.owner {
            return Err(UsvError::PermissionDenied {
                required: "sUSV owner".to_string(),
                subject: *caller,
            });
        }
        Ok(())
    }

    /// Bind the staking contract and credit it with every gon. Owner only, once.
    pub fn initialize(&mut self, caller: &Address, staking: &Address) -> Result<(), UsvError> {
        self.require_owner(caller)?;
        if self.staking.is_some() {
            return Err(UsvError::InvalidState("sUSV already initialized".to_string()));
        }
        self.staking = Some(*staking);
        self.gon_balances.insert(*staking, TOTAL_GONS);
        tracing::info!(staking = %staking.short(), "sUSV initialized");
        Ok(())
    }

    /// Staking contract, once initialized.
    pub fn staking(&self) -> Option<Address> {
        self.staking
    }

    /// Set the starting index. Owner only, once.
    pub fn set_index(&mut self, caller: &Address, index: Amount) -> Result<(), UsvError> {
        self.require_owner(caller)?;
        if self.index_gons != 0 {
            return Err(UsvError::InvalidState("sUSV index already set".to_string()));
        }
        self.index_gons = self.gons_for_balance(index)?;
        Ok(())
    }

    /// Current index: the starting index grown by every rebase since.
    pub fn index(&self) -> Amount {
        self.balance_for_gons(self.index_gons)
    }

    pub fn gons_per_fragment(&self) -> u128 {
        self.gons_per_fragment
    }

    pub fn gons_for_balance(&self, amount: Amount) -> Result<u128, UsvError> {
        amount
            .checked_mul(self.gons_per_fragment)
            .ok_or_else(|| UsvError::Overflow(format!("gons for {} sUSV units", amount)))
    }

    pub fn balance_for_gons(&self, gons: u128) -> Amount {
        gons / self.gons_per_fragment
    }

    /// Supply held outside the staking contract.
    pub fn circulating_supply(&self) -> Amount {
        let held = self
            .staking
            .map(|s| self.balance_of(&s))
            .unwrap_or(0);
        self.total_supply.saturating_sub(held)
    }

    /// The last `REBASE_HISTORY_LIMIT` rebases, oldest first.
    pub fn rebases(&self) -> &[RebaseRecord] {
        &self.rebases
    }

    /// Grow the supply so circulating holders gain `profit` in aggregate.
    ///
    /// Only the staking contract may call. Zero profit or zero circulating
    /// supply leaves the supply unchanged. Returns the new total supply.
    pub fn rebase(&mut self, caller: &Address, profit: Amount, epoch: u64, block: u64) -> Result<Amount, UsvError> {
        if self.staking != Some(*caller) {
            return Err(UsvError::PermissionDenied {
                required: "sUSV staking contract".to_string(),
                subject: *caller,
            });
        }

        let circulating = self.circulating_supply();
        if profit == 0 || circulating == 0 {
            tracing::debug!(epoch, profit, circulating, "Rebase skipped");
            return Ok(self.total_supply);
        }

        let growth = profit
            .checked_mul(self.total_supply)
            .ok_or_else(|| UsvError::Overflow("rebase growth".to_string()))?
            / circulating;
        self.total_supply = self.total_supply.saturating_add(growth).min(MAX_SUPPLY);
        self.gons_per_fragment = TOTAL_GONS / self.total_supply;

        let record = RebaseRecord {
            epoch,
            rebase_percent: profit.saturating_mul(PERCENT_SCALE) / circulating,
            total_staked_before: circulating,
            total_staked_after: self.circulating_supply(),
            amount_rebased: profit,
            index: self.index(),
            block,
        };
        tracing::info!(
            epoch,
            profit = %Usv::from_units(profit),
            circulating_before = %Usv::from_units(record.total_staked_before),
            circulating_after = %Usv::from_units(record.total_staked_after),
            total_supply = %Usv::from_units(self.total_supply),
            "sUSV rebased"
        );
        self.rebases.push(record);
        if self.rebases.len() > REBASE_HISTORY_LIMIT {
            let excess = self.rebases.len() - REBASE_HISTORY_LIMIT;
            self.rebases.drain(..excess);
        }
        Ok(self.total_supply)
    }

    fn move_gons(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), UsvError> {
        let gons = self.gons_for_balance(amount)?;
        let held = self.gon_balances.get(from).copied().unwrap_or(0);
        if held < gons {
            return Err(UsvError::InsufficientBalance {
                holder: *from,
                available: self.balance_for_gons(held),
                requested: amount,
            });
        }
        if held == gons {
            self.gon_balances.remove(from);
        } else {
            self.gon_balances.insert(*from, held - gons);
        }
        *self.gon_balances.entry(*to).or_insert(0) += gons;
        Ok(())
    }
}

impl AssetLedger for StakedUsv {
    fn decimals(&self) -> u8 {
        USV_DECIMALS
    }

    fn total_supply(&self) -> Amount {
        self.total_supply
    }

    fn balance_of(&self, holder: &Address) -> Amount {
        self.balance_for_gons(self.gon_balances.get(holder).copied().unwrap_or(0))
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or(0)
    }

    fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        let per_owner = self.allowances.entry(*owner).or_default();
        if amount == 0 {
            per_owner.remove(spender);
        } else {
            per_owner.insert(*spender, amount);
        }
        if per_owner.is_empty() {
            self.allowances.remove(owner);
        }
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), UsvError> {
        self.move_gons(from, to, amount)
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), UsvError> {
        let available = self.allowance(from, spender);
        if available < amount {
            return Err(UsvError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                available,
                requested: amount,
            });
        }
        self.move_gons(from, to, amount)?;
        self.approve(from, spender, available - amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Address {
        Address::derive("admin")
    }
    fn staking() -> Address {
        Address::derive("staking")
    }
    fn alice() -> Address {
        Address::derive("alice")
    }
    fn bob() -> Address {
        Address::derive("bob")
    }

    fn initialized() -> StakedUsv {
        let mut token = StakedUsv::new(admin());
        token.initialize(&admin(), &staking()).unwrap();
        token
    }

    #[test]
    fn test_initialize_credits_staking() {
        let token = initialized();
        assert_eq!(token.total_supply(), INITIAL_FRAGMENTS_SUPPLY);
        assert_eq!(token.balance_of(&staking()), INITIAL_FRAGMENTS_SUPPLY);
        assert_eq!(token.circulating_supply(), 0);
        assert_eq!(TOTAL_GONS % INITIAL_FRAGMENTS_SUPPLY, 0);
    }

    #[test]
    fn test_initialize_only_once() {
        let mut token = initialized();
        assert!(token.initialize(&admin(), &bob()).is_err());
        let mut fresh = StakedUsv::new(admin());
        assert!(fresh.initialize(&alice(), &staking()).is_err());
    }

    #[test]
    fn test_rebase_only_by_staking() {
        let mut token = initialized();
        let err = token.rebase(&admin(), 1_000, 1, 0).unwrap_err();
        assert!(matches!(err, UsvError::PermissionDenied { .. }));
    }

    #[test]
    fn test_rebase_without_circulating_supply_is_noop() {
        let mut token = initialized();
        assert_eq!(
            token.rebase(&staking(), 1_000_000_000, 1, 0).unwrap(),
            INITIAL_FRAGMENTS_SUPPLY
        );
        assert!(token.rebases().is_empty());
    }

    #[test]
    fn test_rebase_by_one_third_is_proportional() {
        let mut token = initialized();
        token.transfer(&staking(), &alice(), 1_000_000_000).unwrap();
        token.transfer(&staking(), &bob(), 2_000_000_000).unwrap();
        assert_eq!(token.circulating_supply(), 3_000_000_000);

        let supply = token.rebase(&staking(), 1_000_000_000, 1, 7).unwrap();
        assert_eq!(supply, 6_666_666_666_666_666);

        let a = token.balance_of(&alice());
        let b = token.balance_of(&bob());
        assert!(a > 1_000_000_000);
        assert!(b > 2_000_000_000);
        assert!((b as i128 - 2 * a as i128).abs() <= 1);

        let record = &token.rebases()[0];
        assert_eq!(record.epoch, 1);
        assert_eq!(record.total_staked_before, 3_000_000_000);
        assert_eq!(record.amount_rebased, 1_000_000_000);
        assert_eq!(record.block, 7);
    }

    #[test]
    fn test_history_keeps_latest_rebases() {
        let mut token = initialized();
        token.transfer(&staking(), &alice(), 1_000_000_000).unwrap();
        let rounds = REBASE_HISTORY_LIMIT as u64 + 10;
        for epoch in 1..=rounds {
            token.rebase(&staking(), 1_000, epoch, epoch).unwrap();
        }
        let history = token.rebases();
        assert_eq!(history.len(), REBASE_HISTORY_LIMIT);
        assert_eq!(history[0].epoch, 11);
        assert_eq!(history[REBASE_HISTORY_LIMIT - 1].epoch, rounds);
    }

    #[test]
    fn test_zero_profit_keeps_balances() {
        let mut token = initialized();
        token.transfer(&staking(), &alice(), 1_000_000_000).unwrap();
        token.rebase(&staking(), 0, 1, 0).unwrap();
        assert_eq!(token.balance_of(&alice()), 1_000_000_000);
    }

    #[test]
    fn test_index_grows_with_rebase() {
        let mut token = initialized();
        token.set_index(&admin(), 1_000_000_000).unwrap();
        assert!(token.set_index(&admin(), 2).is_err());
        assert_eq!(token.index(), 1_000_000_000);

        token.transfer(&staking(), &alice(), 1_000_000_000).unwrap();
        token.rebase(&staking(), 114_000_000, 1, 0).unwrap();
        assert_eq!(token.index(), token.balance_of(&alice()));
    }

    #[test]
    fn test_transfer_from_spends_allowance() {
        let mut token = initialized();
        token.transfer(&staking(), &alice(), 500).unwrap();
        assert!(token.transfer_from(&bob(), &alice(), &bob(), 100).is_err());
        token.approve(&alice(), &bob(), 300);
        token.transfer_from(&bob(), &alice(), &bob(), 100).unwrap();
        assert_eq!(token.allowance(&alice(), &bob()), 200);
        assert_eq!(token.balance_of(&bob()), 100);
        assert!(token.transfer(&alice(), &bob(), 401).is_err());
    }
}
