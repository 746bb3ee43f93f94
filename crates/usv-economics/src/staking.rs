// crates/usv-economics/src/staking.rs
//
// Staking coordinator: exchanges USV for sUSV and drives epochs.
//
// Each epoch the coordinator:
//   1. rebases sUSV by the profit measured at the end of the last epoch
//   2. advances the epoch (exactly one per trigger)
//   3. asks the distributor to mint this epoch's reward into staking
//   4. measures the next profit: USV held by staking minus circulating sUSV
//
// Stakes pass through a warm-up: sUSV is parked on the warm-up account and
// released by `claim` once `warmup_period` epochs have elapsed. The claim
// is recorded in gons, so parked sUSV keeps earning rebases.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::distributor::Distributor;
use crate::ledger::AssetBank;
use crate::rebasing::StakedUsv;
use crate::token::{Amount, Usv};
use crate::treasury::Treasury;
use usv_core::error::UsvError;
use usv_core::identity::Address;
use usv_core::traits::AssetLedger;

/// Epoch bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Blocks per epoch.
    pub length: u64,
    pub number: u64,
    /// Block at or after which the next rebase fires.
    pub end_block: u64,
    /// Profit to rebase at the next epoch boundary.
    pub distribute: Amount,
}

/// A stake waiting out its warm-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupClaim {
    /// USV deposited, returned on forfeit.
    pub deposit: Amount,
    /// sUSV owed, in gons.
    pub gons: u128,
    /// Epoch number at which the claim can be released.
    pub expiry: u64,
    /// Only the owner may add to a locked claim.
    pub lock: bool,
}

/// The mutable collaborators an epoch rollover touches.
pub struct EpochContext<'a> {
    pub rebasing: &'a mut StakedUsv,
    pub distributor: &'a mut Distributor,
    pub treasury: &'a mut Treasury,
    pub assets: &'a mut AssetBank,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingCoordinator {
    /// Account holding staked USV and undistributed sUSV.
    address: Address,
    owner: Address,
    /// Account parking sUSV during warm-up.
    warmup_account: Address,
    epoch: Epoch,
    warmup_period: u64,
    warmup: BTreeMap<Address, WarmupClaim>,
}

impl StakingCoordinator {
    pub fn new(
        address: Address,
        owner: Address,
        warmup_account: Address,
        epoch_length: u64,
        first_epoch_number: u64,
        first_epoch_block: u64,
    ) -> Self {
        Self {
            address,
            owner,
            warmup_account,
            epoch: Epoch {
                length: epoch_length,
                number: first_epoch_number,
                end_block: first_epoch_block,
                distribute: 0,
            },
            warmup_period: 0,
            warmup: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn warmup_account(&self) -> Address {
        self.warmup_account
    }

    pub fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    pub fn warmup_period(&self) -> u64 {
        self.warmup_period
    }

    pub fn warmup_info(&self, recipient: &Address) -> Option<&WarmupClaim> {
        self.warmup.get(recipient)
    }

    /// USV held by the staking account.
    pub fn contract_balance(&self, assets: &AssetBank) -> Amount {
        assets.usv().balance_of(&self.address)
    }

    /// Set the warm-up length in epochs. Owner only.
    pub fn set_warmup(&mut self, caller: &Address, epochs: u64) -> Result<(), UsvError> {
        if *caller != self.owner {
            return Err(UsvError::PermissionDenied {
                required: "staking manager".to_string(),
                subject: *caller,
            });
        }
        self.warmup_period = epochs;
        Ok(())
    }

    /// Roll over one epoch if its end block has been reached.
    ///
    /// Returns whether an epoch was advanced.
    pub fn rebase(&mut self, ctx: &mut EpochContext<'_>, block: u64) -> Result<bool, UsvError> {
        if self.epoch.end_block > block {
            return Ok(false);
        }

        ctx.rebasing
            .rebase(&self.address, self.epoch.distribute, self.epoch.number, block)?;
        self.epoch.end_block = self.epoch.end_block.saturating_add(self.epoch.length);
        self.epoch.number += 1;

        ctx.distributor
            .distribute(ctx.treasury, ctx.assets, &self.address, block)?;

        let balance = self.contract_balance(ctx.assets);
        let staked = ctx.rebasing.circulating_supply();
        self.epoch.distribute = balance.saturating_sub(staked);

        tracing::info!(
            epoch = self.epoch.number,
            end_block = self.epoch.end_block,
            next_profit = %Usv::from_units(self.epoch.distribute),
            index = ctx.rebasing.index(),
            "Epoch advanced"
        );
        Ok(true)
    }

    /// Stake `amount` USV from `caller` into a warm-up claim for `recipient`.
    ///
    /// Triggers an epoch rollover first. The caller must have approved the
    /// staking account for `amount`.
    pub fn stake(
        &mut self,
        ctx: &mut EpochContext<'_>,
        caller: &Address,
        amount: Amount,
        recipient: &Address,
        block: u64,
    ) -> Result<(), UsvError> {
        self.rebase(ctx, block)?;

        let existing = self.warmup.get(recipient).cloned().unwrap_or_default();
        if existing.lock && caller != recipient {
            return Err(UsvError::DepositsLocked(*recipient));
        }

        let gons = ctx.rebasing.gons_for_balance(amount)?;
        ctx.assets
            .usv_mut()
            .transfer_from(&self.address, caller, &self.address, amount)?;
        ctx.rebasing
            .transfer(&self.address, &self.warmup_account, amount)?;

        self.warmup.insert(
            *recipient,
            WarmupClaim {
                deposit: existing.deposit.saturating_add(amount),
                gons: existing.gons.saturating_add(gons),
                expiry: self.epoch.number.saturating_add(self.warmup_period),
                lock: existing.lock,
            },
        );

        tracing::info!(
            staker = %caller.short(),
            recipient = %recipient.short(),
            amount = %Usv::from_units(amount),
            "USV staked"
        );
        Ok(())
    }

    /// Release `recipient`'s warm-up claim if it has expired.
    ///
    /// Returns the sUSV released (zero if nothing was claimable).
    pub fn claim(&mut self, rebasing: &mut StakedUsv, recipient: &Address) -> Result<Amount, UsvError> {
        let Some(info) = self
            .warmup
            .get(recipient)
            .filter(|c| c.gons > 0 && self.epoch.number >= c.expiry)
            .cloned()
        else {
            return Ok(0);
        };

        self.settle(recipient, info.lock);
        let amount = rebasing.balance_for_gons(info.gons);
        rebasing.transfer(&self.warmup_account, recipient, amount)?;
        tracing::debug!(
            recipient = %recipient.short(),
            amount = %Usv::from_units(amount),
            "Warm-up claimed"
        );
        Ok(amount)
    }

    /// Give up a warm-up claim and get the deposited USV back.
    ///
    /// Returns the USV returned.
    pub fn forfeit(
        &mut self,
        rebasing: &mut StakedUsv,
        assets: &mut AssetBank,
        caller: &Address,
    ) -> Result<Amount, UsvError> {
        let Some(info) = self.warmup.get(caller).filter(|c| c.gons > 0).cloned() else {
            return Ok(0);
        };
        self.settle(caller, info.lock);
        let parked = rebasing.balance_for_gons(info.gons);
        rebasing.transfer(&self.warmup_account, &self.address, parked)?;
        assets.usv_mut().transfer(&self.address, caller, info.deposit)?;
        tracing::info!(
            staker = %caller.short(),
            returned = %Usv::from_units(info.deposit),
            "Warm-up forfeited"
        );
        Ok(info.deposit)
    }

    /// Flip whether others may add to the caller's warm-up claim.
    ///
    /// Returns the new lock state. The lock outlives claims and forfeits.
    pub fn toggle_deposit_lock(&mut self, caller: &Address) -> bool {
        let claim = self.warmup.entry(*caller).or_default();
        claim.lock = !claim.lock;
        let lock = claim.lock;
        if !lock && claim.gons == 0 {
            self.warmup.remove(caller);
        }
        lock
    }

    /// Drop a released claim, keeping only its deposit lock.
    fn settle(&mut self, holder: &Address, lock: bool) {
        if lock {
            self.warmup.insert(
                *holder,
                WarmupClaim {
                    lock: true,
                    ..WarmupClaim::default()
                },
            );
        } else {
            self.warmup.remove(holder);
        }
    }

    /// Return `amount` sUSV for the same amount of USV.
    ///
    /// The caller must have approved the staking account for `amount` sUSV.
    pub fn unstake(
        &mut self,
        ctx: &mut EpochContext<'_>,
        caller: &Address,
        amount: Amount,
        trigger: bool,
        block: u64,
    ) -> Result<(), UsvError> {
        if trigger {
            self.rebase(ctx, block)?;
        }
        ctx.rebasing
            .transfer_from(&self.address, caller, &self.address, amount)?;
        ctx.assets.usv_mut().transfer(&self.address, caller, amount)?;
        tracing::info!(
            staker = %caller.short(),
            amount = %Usv::from_units(amount),
            "USV unstaked"
        );
        Ok(())
    }

    /// Stake and immediately claim; only releases when warm-up is zero.
    pub fn stake_and_claim(
        &mut self,
        ctx: &mut EpochContext<'_>,
        caller: &Address,
        amount: Amount,
        recipient: &Address,
        block: u64,
    ) -> Result<Amount, UsvError> {
        self.stake(ctx, caller, amount, recipient, block)?;
        self.claim(ctx.rebasing, recipient)
    }
}
