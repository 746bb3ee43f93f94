// crates/usv-economics/src/distributor.rs
//
// Epoch reward distributor.
//
// Once per epoch the staking contract triggers `distribute`, which mints
// each recipient's reward through the treasury's reward-manager path:
//   reward = USV.total_supply * rate / 1_000_000
// Rates may drift toward a target by a fixed step after every distribution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::AssetBank;
use crate::token::{Amount, Usv};
use crate::treasury::Treasury;
use usv_core::error::UsvError;
use usv_core::identity::Address;
use usv_core::traits::AssetLedger;

/// Denominator of reward rates (rate 3_000 = 0.3% of supply per epoch).
pub const RATE_DENOMINATOR: u128 = 1_000_000;

/// A reward recipient and its per-epoch rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRecipient {
    pub recipient: Address,
    pub rate: u128,
}

/// Scheduled drift of one recipient's rate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateAdjustment {
    pub add: bool,
    pub rate: u128,
    pub target: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distributor {
    /// Account the treasury knows as reward manager.
    address: Address,
    owner: Address,
    /// The only account allowed to trigger distribution.
    staking: Address,
    epoch_length: u64,
    next_epoch_block: u64,
    /// Removed recipients keep their slot with a zero rate so indices stay stable.
    recipients: Vec<RewardRecipient>,
    adjustments: BTreeMap<usize, RateAdjustment>,
}

impl Distributor {
    pub fn new(address: Address, owner: Address, staking: Address, epoch_length: u64, next_epoch_block: u64) -> Self {
        Self {
            address,
            owner,
            staking,
            epoch_length,
            next_epoch_block,
            recipients: Vec::new(),
            adjustments: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn next_epoch_block(&self) -> u64 {
        self.next_epoch_block
    }

    pub fn recipients(&self) -> &[RewardRecipient] {
        &self.recipients
    }

    pub fn adjustment(&self, index: usize) -> Option<&RateAdjustment> {
        self.adjustments.get(&index)
    }

    fn require_owner(&self, caller: &Address) -> Result<(), UsvError> {
        if *caller != self.owner {
            return Err(UsvError::PermissionDenied {
                required: "distributor policy owner".to_string(),
                subject: *caller,
            });
        }
        Ok(())
    }

    /// Mint this epoch's rewards if the epoch boundary has been reached.
    ///
    /// Returns `false` without effect before the boundary.
    pub fn distribute(
        &mut self,
        treasury: &mut Treasury,
        assets: &mut AssetBank,
        caller: &Address,
        block: u64,
    ) -> Result<bool, UsvError> {
        if *caller != self.staking {
            return Err(UsvError::PermissionDenied {
                required: "registered staking contract".to_string(),
                subject: *caller,
            });
        }
        if self.next_epoch_block > block {
            return Ok(false);
        }

        self.next_epoch_block = self.next_epoch_block.saturating_add(self.epoch_length);
        for index in 0..self.recipients.len() {
            let RewardRecipient { recipient, rate } = self.recipients[index].clone();
            if rate == 0 {
                continue;
            }
            let reward = Self::reward_at(assets, rate);
            treasury.mint_rewards(assets, &self.address, &recipient, reward)?;
            tracing::info!(
                recipient = %recipient.short(),
                rate,
                reward = %Usv::from_units(reward),
                "Epoch reward distributed"
            );
            self.adjust(index);
        }
        Ok(true)
    }

    fn adjust(&mut self, index: usize) {
        let Some(adjustment) = self.adjustments.get_mut(&index) else {
            return;
        };
        if adjustment.rate == 0 {
            return;
        }
        let info = &mut self.recipients[index];
        if adjustment.add {
            info.rate = info.rate.saturating_add(adjustment.rate);
            if info.rate >= adjustment.target {
                adjustment.rate = 0;
            }
        } else {
            info.rate = info.rate.saturating_sub(adjustment.rate);
            if info.rate <= adjustment.target {
                adjustment.rate = 0;
            }
        }
    }

    fn reward_at(assets: &AssetBank, rate: u128) -> Amount {
        assets.usv().total_supply().saturating_mul(rate) / RATE_DENOMINATOR
    }

    /// Reward a recipient with `rate` would receive at the current supply.
    pub fn next_reward_at(&self, assets: &AssetBank, rate: u128) -> Amount {
        Self::reward_at(assets, rate)
    }

    /// Total next-epoch reward of `recipient` across its slots.
    pub fn next_reward_for(&self, assets: &AssetBank, recipient: &Address) -> Amount {
        self.recipients
            .iter()
            .filter(|r| r.recipient == *recipient)
            .map(|r| Self::reward_at(assets, r.rate))
            .sum()
    }

    /// Register a recipient. Owner only. Returns its slot index.
    pub fn add_recipient(&mut self, caller: &Address, recipient: &Address, rate: u128) -> Result<usize, UsvError> {
        self.require_owner(caller)?;
        self.recipients.push(RewardRecipient {
            recipient: *recipient,
            rate,
        });
        tracing::info!(recipient = %recipient.short(), rate, "Reward recipient added");
        Ok(self.recipients.len() - 1)
    }

    /// Clear the slot at `index`. Owner only; `recipient` must match the slot.
    pub fn remove_recipient(&mut self, caller: &Address, index: usize, recipient: &Address) -> Result<(), UsvError> {
        self.require_owner(caller)?;
        let slot = self
            .recipients
            .get_mut(index)
            .filter(|r| r.recipient == *recipient)
            .ok_or_else(|| UsvError::NotFound(format!("recipient {} at slot {}", recipient, index)))?;
        slot.recipient = Address::ZERO;
        slot.rate = 0;
        self.adjustments.remove(&index);
        Ok(())
    }

    /// Schedule a rate drift for slot `index`. Owner only.
    pub fn set_adjustment(
        &mut self,
        caller: &Address,
        index: usize,
        add: bool,
        rate: u128,
        target: u128,
    ) -> Result<(), UsvError> {
        self.require_owner(caller)?;
        if index >= self.recipients.len() {
            return Err(UsvError::NotFound(format!("recipient slot {}", index)));
        }
        self.adjustments.insert(index, RateAdjustment { add, rate, target });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TokenLedger;
    use crate::permissions::Capability;

    fn admin() -> Address {
        Address::derive("admin")
    }
    fn vault() -> Address {
        Address::derive("treasury")
    }
    fn staking() -> Address {
        Address::derive("staking")
    }
    fn distributor_account() -> Address {
        Address::derive("distributor")
    }

    /// 40 DAI of reserves backing 38 USV; distributor is reward manager.
    fn setup() -> (Treasury, AssetBank, Distributor) {
        let dai = Address::derive("dai");
        let mut assets = AssetBank::new(Address::derive("usv"), TokenLedger::new("USV", 9, Some(vault())));
        let mut dai_ledger = TokenLedger::new("DAI", 18, Some(admin()));
        dai_ledger.mint(&admin(), &admin(), 40_000_000_000_000_000_000).unwrap();
        assets.list(dai, dai_ledger).unwrap();

        let mut treasury = Treasury::new(vault(), admin(), 0);
        for (cap, subject) in [
            (Capability::ReserveToken, dai),
            (Capability::ReserveDepositor, admin()),
            (Capability::RewardManager, distributor_account()),
        ] {
            treasury.queue(&admin(), cap, &subject, 0).unwrap();
            treasury.toggle(&admin(), cap, &subject, None, 0).unwrap();
        }
        assets
            .get_mut(&dai)
            .unwrap()
            .approve(&admin(), &vault(), 40_000_000_000_000_000_000);
        treasury
            .deposit(&mut assets, &admin(), &dai, 40_000_000_000_000_000_000, 2_000_000_000)
            .unwrap();

        let distributor = Distributor::new(distributor_account(), admin(), staking(), 4, 0);
        (treasury, assets, distributor)
    }

    #[test]
    fn test_only_staking_triggers() {
        let (mut treasury, mut assets, mut distributor) = setup();
        let err = distributor
            .distribute(&mut treasury, &mut assets, &admin(), 0)
            .unwrap_err();
        assert!(matches!(err, UsvError::PermissionDenied { .. }));
    }

    #[test]
    fn test_distribute_mints_rate_of_supply() {
        let (mut treasury, mut assets, mut distributor) = setup();
        distributor.add_recipient(&admin(), &staking(), 3_000).unwrap();
        assert_eq!(distributor.next_reward_for(&assets, &staking()), 114_000_000);

        assert!(distributor
            .distribute(&mut treasury, &mut assets, &staking(), 0)
            .unwrap());
        assert_eq!(assets.usv().balance_of(&staking()), 114_000_000);
        assert_eq!(distributor.next_epoch_block(), 4);

        // Before the next boundary nothing happens.
        assert!(!distributor
            .distribute(&mut treasury, &mut assets, &staking(), 3)
            .unwrap());
        assert_eq!(assets.usv().balance_of(&staking()), 114_000_000);

        assert!(distributor
            .distribute(&mut treasury, &mut assets, &staking(), 4)
            .unwrap());
        assert_eq!(assets.usv().balance_of(&staking()), 114_000_000 + 114_342_000);
    }

    #[test]
    fn test_distribute_without_recipients_advances_epoch() {
        let (mut treasury, mut assets, mut distributor) = setup();
        assert!(distributor
            .distribute(&mut treasury, &mut assets, &staking(), 0)
            .unwrap());
        assert_eq!(assets.usv().total_supply(), 38_000_000_000);
        assert_eq!(distributor.next_epoch_block(), 4);
    }

    #[test]
    fn test_rate_adjusts_toward_target() {
        let (mut treasury, mut assets, mut distributor) = setup();
        let index = distributor.add_recipient(&admin(), &staking(), 3_000).unwrap();
        distributor
            .set_adjustment(&admin(), index, true, 500, 3_800)
            .unwrap();
        for block in [0, 4] {
            distributor
                .distribute(&mut treasury, &mut assets, &staking(), block)
                .unwrap();
        }
        assert_eq!(distributor.recipients()[index].rate, 4_000);
        assert_eq!(distributor.adjustment(index).unwrap().rate, 0);
    }

    #[test]
    fn test_remove_recipient_checks_slot() {
        let (_, assets, mut distributor) = setup();
        let index = distributor.add_recipient(&admin(), &staking(), 3_000).unwrap();
        assert!(distributor
            .remove_recipient(&admin(), index, &admin())
            .is_err());
        distributor.remove_recipient(&admin(), index, &staking()).unwrap();
        assert_eq!(distributor.next_reward_for(&assets, &staking()), 0);
        assert_eq!(distributor.next_reward_at(&assets, 3_000), 114_000_000);
    }
}
