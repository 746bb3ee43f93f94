// crates/usv-economics/src/barter.rs
//
// Barter depository: sells USV for one principal asset on a bonding curve.
//
// Pricing is driven by the depository's outstanding debt relative to USV
// supply:
//   debt_ratio = current_debt * 1e9 / usv_supply
//   price      = max(minimum_price, (control_variable * debt_ratio + 1e9) / 1e7)
// Price is quoted in hundredths of a reserve unit per USV, so
//   payout = value * 100 / price
//
// Outstanding debt decays linearly over the vesting term, and payouts vest
// linearly per depositor over the same term. Each deposit pushes the ratio
// up, so the price paid by later depositors is never lower within a block.
//
// The control variable may be nudged toward a target by an adjustment that
// fires at most once per `buffer` blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::AssetBank;
use crate::token::{pow10, Amount, Usv};
use crate::treasury::Treasury;
use usv_core::error::UsvError;
use usv_core::identity::Address;
use usv_core::traits::AssetLedger;

/// Scale of the debt ratio.
pub const DEBT_RATIO_SCALE: u128 = 1_000_000_000;

/// Divisor turning `control_variable * debt_ratio` into a price.
pub const PRICE_DIVISOR: u128 = 10_000_000;

/// Denominator of `BarterTerms::fee`.
pub const FEE_DIVISOR: u128 = 10_000;

/// Denominator of `BarterTerms::max_payout` (thousandths of a percent).
pub const FRACTION_DIVISOR: u128 = 100_000;

/// Smallest payout accepted: 0.01 USV.
pub const MIN_PAYOUT: Amount = 10_000_000;

/// Shortest vesting term accepted at initialization.
pub const MIN_VESTING_BLOCKS: u64 = 10;

/// Shortest vesting term accepted by `set_term`.
pub const MIN_VESTING_UPDATE_BLOCKS: u64 = 10_000;

/// Largest `max_payout` accepted: 1% of supply.
pub const MAX_PAYOUT_LIMIT: u128 = 1_000;

/// Basis points at which a bond is fully vested.
pub const FULLY_VESTED_BPS: u128 = 10_000;

/// Pricing and sizing parameters of a depository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarterTerms {
    /// Scales the debt ratio into a price.
    pub control_variable: u128,
    /// Blocks over which a payout vests and debt decays.
    pub vesting_blocks: u64,
    /// Price floor, retired once the curve clears it.
    pub minimum_price: u128,
    /// Largest single payout, in thousandths of a percent of USV supply.
    pub max_payout: u128,
    /// DAO fee as a fraction of payout, over `FEE_DIVISOR`.
    pub fee: u128,
    /// Outstanding debt above which deposits are refused.
    pub max_debt: Amount,
}

/// A depositor's vesting position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    /// USV still owed.
    pub payout: Amount,
    /// Blocks left until fully vested, counted from `last_block`.
    pub vesting: u64,
    pub last_block: u64,
    /// Price paid in reserve terms at the latest deposit.
    pub price_paid: u128,
    /// Whether redemptions stake by default.
    pub auto_stake: bool,
}

/// Scheduled drift of the control variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub add: bool,
    pub rate: u128,
    pub target: u128,
    pub buffer: u64,
    pub last_block: u64,
}

/// A single term updatable after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermParameter {
    Vesting,
    Payout,
    Fee,
    Debt,
    MinimumPrice,
}

/// Outcome of a deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    pub payout: Amount,
    pub fee: Amount,
    pub value: Amount,
    pub price: u128,
}

/// Outcome of a redemption. The caller delivers `amount` to the recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub amount: Amount,
    /// The bond was paid out in full and removed.
    pub closed: bool,
    /// Preference recorded at deposit.
    pub auto_stake: bool,
}

/// One barter depository, selling USV for `principal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarterDepository {
    /// Account holding vesting payouts; the treasury sees it as depositor.
    address: Address,
    owner: Address,
    principal: Address,
    /// Principal is a pool token valued by the treasury's valuation.
    is_liquidity: bool,
    /// Receives the fee.
    dao: Address,
    terms: BarterTerms,
    adjustment: Adjustment,
    total_debt: Amount,
    last_decay: u64,
    bonds: BTreeMap<Address, Bond>,
}

impl BarterDepository {
    pub fn new(address: Address, owner: Address, principal: Address, is_liquidity: bool, dao: Address) -> Self {
        Self {
            address,
            owner,
            principal,
            is_liquidity,
            dao,
            terms: BarterTerms::default(),
            adjustment: Adjustment::default(),
            total_debt: 0,
            last_decay: 0,
            bonds: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn principal(&self) -> Address {
        self.principal
    }

    pub fn is_liquidity(&self) -> bool {
        self.is_liquidity
    }

    pub fn dao(&self) -> Address {
        self.dao
    }

    pub fn terms(&self) -> &BarterTerms {
        &self.terms
    }

    pub fn adjustment(&self) -> &Adjustment {
        &self.adjustment
    }

    /// Recorded debt, before decay since the last interaction.
    pub fn total_debt(&self) -> Amount {
        self.total_debt
    }

    /// Vesting position of `depositor`.
    pub fn bond_info(&self, depositor: &Address) -> Option<&Bond> {
        self.bonds.get(depositor)
    }

    fn require_owner(&self, caller: &Address) -> Result<(), UsvError> {
        if *caller != self.owner {
            return Err(UsvError::PermissionDenied {
                required: "barter policy owner".to_string(),
                subject: *caller,
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Policy
    // ---------------------------------------------------------------------

    /// Set all terms and the starting debt. Owner only.
    ///
    /// Allowed only while current debt is zero.
    pub fn initialize_terms(
        &mut self,
        caller: &Address,
        terms: BarterTerms,
        initial_debt: Amount,
        block: u64,
    ) -> Result<(), UsvError> {
        self.require_owner(caller)?;
        if self.current_debt(block) != 0 {
            return Err(UsvError::InvalidTerms("debt must be 0 for initialization".to_string()));
        }
        if terms.control_variable == 0 {
            return Err(UsvError::InvalidTerms("control variable must be positive".to_string()));
        }
        if terms.vesting_blocks < MIN_VESTING_BLOCKS {
            return Err(UsvError::InvalidTerms(format!(
                "vesting must be at least {} blocks",
                MIN_VESTING_BLOCKS
            )));
        }
        if terms.max_payout > MAX_PAYOUT_LIMIT {
            return Err(UsvError::InvalidTerms("payout cannot be above 1 percent".to_string()));
        }
        if terms.fee > FEE_DIVISOR {
            return Err(UsvError::InvalidTerms("DAO fee cannot exceed payout".to_string()));
        }

        tracing::info!(
            barter = %self.address.short(),
            control_variable = terms.control_variable,
            vesting_blocks = terms.vesting_blocks,
            minimum_price = terms.minimum_price,
            max_payout = terms.max_payout,
            fee = terms.fee,
            max_debt = terms.max_debt,
            initial_debt,
            "Barter terms initialized"
        );
        self.terms = terms;
        self.total_debt = initial_debt;
        self.last_decay = block;
        Ok(())
    }

    /// Update one term. Owner only.
    pub fn set_term(&mut self, caller: &Address, parameter: TermParameter, value: u128) -> Result<(), UsvError> {
        self.require_owner(caller)?;
        match parameter {
            TermParameter::Vesting => {
                if value < MIN_VESTING_UPDATE_BLOCKS as u128 {
                    return Err(UsvError::InvalidTerms(format!(
                        "vesting must be at least {} blocks",
                        MIN_VESTING_UPDATE_BLOCKS
                    )));
                }
                self.terms.vesting_blocks = u64::try_from(value)
                    .map_err(|_| UsvError::InvalidTerms(format!("vesting {} out of range", value)))?;
            }
            TermParameter::Payout => {
                if value > MAX_PAYOUT_LIMIT {
                    return Err(UsvError::InvalidTerms("payout cannot be above 1 percent".to_string()));
                }
                self.terms.max_payout = value;
            }
            TermParameter::Fee => {
                if value > FEE_DIVISOR {
                    return Err(UsvError::InvalidTerms("DAO fee cannot exceed payout".to_string()));
                }
                self.terms.fee = value;
            }
            TermParameter::Debt => self.terms.max_debt = value,
            TermParameter::MinimumPrice => self.terms.minimum_price = value,
        }
        tracing::info!(barter = %self.address.short(), ?parameter, value, "Barter term updated");
        Ok(())
    }

    /// Schedule a control-variable drift. Owner only.
    ///
    /// `increment` may not exceed 2.5% of the current control variable.
    pub fn set_adjustment(
        &mut self,
        caller: &Address,
        add: bool,
        increment: u128,
        target: u128,
        buffer: u64,
        block: u64,
    ) -> Result<(), UsvError> {
        self.require_owner(caller)?;
        let limit = self.terms.control_variable * 25 / 1_000;
        if increment > limit {
            return Err(UsvError::InvalidTerms(format!(
                "increment {} too large, limit {}",
                increment, limit
            )));
        }
        self.adjustment = Adjustment {
            add,
            rate: increment,
            target,
            buffer,
            last_block: block,
        };
        Ok(())
    }

    fn adjust(&mut self, block: u64) {
        let can_adjust_at = self.adjustment.last_block.saturating_add(self.adjustment.buffer);
        if self.adjustment.rate == 0 || block < can_adjust_at {
            return;
        }
        let before = self.terms.control_variable;
        if self.adjustment.add {
            self.terms.control_variable = before.saturating_add(self.adjustment.rate);
            if self.terms.control_variable >= self.adjustment.target {
                self.adjustment.rate = 0;
            }
        } else {
            self.terms.control_variable = before.saturating_sub(self.adjustment.rate);
            if self.terms.control_variable <= self.adjustment.target {
                self.adjustment.rate = 0;
            }
        }
        self.adjustment.last_block = block;
        tracing::debug!(
            barter = %self.address.short(),
            before,
            after = self.terms.control_variable,
            "Control variable adjusted"
        );
    }

    // ---------------------------------------------------------------------
    // Debt and pricing
    // ---------------------------------------------------------------------

    /// Debt that has decayed since the last decay point.
    pub fn debt_decay(&self, block: u64) -> Amount {
        if self.terms.vesting_blocks == 0 {
            return 0;
        }
        let since = block.saturating_sub(self.last_decay) as u128;
        let decay = self.total_debt.saturating_mul(since) / self.terms.vesting_blocks as u128;
        decay.min(self.total_debt)
    }

    /// Outstanding debt at `block`.
    pub fn current_debt(&self, block: u64) -> Amount {
        self.total_debt - self.debt_decay(block)
    }

    fn decay_debt(&mut self, block: u64) {
        self.total_debt -= self.debt_decay(block);
        self.last_decay = block;
    }

    /// `current_debt * 1e9 / usv_supply`; zero while no USV exists.
    pub fn debt_ratio(&self, assets: &AssetBank, block: u64) -> u128 {
        let supply = assets.usv().total_supply();
        if supply == 0 {
            return 0;
        }
        self.current_debt(block).saturating_mul(DEBT_RATIO_SCALE) / supply
    }

    fn curve_price(&self, debt_ratio: u128) -> u128 {
        (self.terms.control_variable.saturating_mul(debt_ratio) + DEBT_RATIO_SCALE) / PRICE_DIVISOR
    }

    /// Current price in hundredths of a reserve unit per USV.
    pub fn barter_price(&self, assets: &AssetBank, block: u64) -> u128 {
        self.curve_price(self.debt_ratio(assets, block))
            .max(self.terms.minimum_price)
    }

    /// Price in principal units per USV (pool-token prices via markdown).
    pub fn barter_price_in_reserve(
        &self,
        treasury: &Treasury,
        assets: &AssetBank,
        block: u64,
    ) -> Result<u128, UsvError> {
        let price = self.barter_price(assets, block);
        let scale = if self.is_liquidity {
            self.markdown(treasury)?
        } else {
            pow10(assets.get(&self.principal)?.decimals())
        };
        Ok(price.saturating_mul(scale) / 100)
    }

    /// Debt ratio in reserve terms (scaled by markdown for pool tokens).
    pub fn standardized_debt_ratio(
        &self,
        treasury: &Treasury,
        assets: &AssetBank,
        block: u64,
    ) -> Result<u128, UsvError> {
        let ratio = self.debt_ratio(assets, block);
        if self.is_liquidity {
            Ok(ratio.saturating_mul(self.markdown(treasury)?) / DEBT_RATIO_SCALE)
        } else {
            Ok(ratio)
        }
    }

    fn markdown(&self, treasury: &Treasury) -> Result<u128, UsvError> {
        treasury
            .valuation_for(&self.principal)
            .ok_or_else(|| UsvError::NotFound(format!("valuation for {}", self.principal)))?
            .markdown(&self.principal)
    }

    /// USV paid out for `value` at the current price.
    pub fn payout_for(&self, assets: &AssetBank, value: Amount, block: u64) -> Amount {
        match self.barter_price(assets, block) {
            0 => 0,
            price => value.saturating_mul(100) / price,
        }
    }

    /// Largest single payout: `max_payout` thousandths of a percent of supply.
    pub fn max_payout(&self, assets: &AssetBank) -> Amount {
        assets.usv().total_supply().saturating_mul(self.terms.max_payout) / FRACTION_DIVISOR
    }

    // ---------------------------------------------------------------------
    // Deposits and redemptions
    // ---------------------------------------------------------------------

    /// Exchange `amount` of principal from `caller` for a vesting USV bond
    /// credited to `recipient`.
    ///
    /// The caller must have approved this depository for `amount`, and the
    /// depository must be an approved treasury depositor for the principal.
    #[allow(clippy::too_many_arguments)]
    pub fn deposit(
        &mut self,
        treasury: &mut Treasury,
        assets: &mut AssetBank,
        caller: &Address,
        amount: Amount,
        max_price: u128,
        recipient: &Address,
        auto_stake: bool,
        block: u64,
    ) -> Result<DepositReceipt, UsvError> {
        if recipient.is_zero() {
            return Err(UsvError::InvalidState("Invalid recipient".to_string()));
        }
        if self.terms.control_variable == 0 {
            return Err(UsvError::InvalidState(format!(
                "Barter {} terms not initialized",
                self.address
            )));
        }

        self.decay_debt(block);
        if self.total_debt > self.terms.max_debt {
            return Err(UsvError::MaxCapacityReached {
                debt: self.total_debt,
                max_debt: self.terms.max_debt,
            });
        }

        let price_in_reserve = self.barter_price_in_reserve(treasury, assets, block)?;
        let curve = self.curve_price(self.debt_ratio(assets, block));
        let price = curve.max(self.terms.minimum_price);
        if price > max_price {
            return Err(UsvError::PriceTooHigh { price, max_price });
        }

        let value = treasury.value_of(assets, &self.principal, amount)?;
        let payout = value.saturating_mul(100) / price;
        if payout < MIN_PAYOUT {
            return Err(UsvError::BarterTooSmall {
                payout,
                minimum: MIN_PAYOUT,
            });
        }
        let maximum = self.max_payout(assets);
        if payout > maximum {
            return Err(UsvError::BarterTooLarge { payout, maximum });
        }

        let fee = payout.saturating_mul(self.terms.fee) / FEE_DIVISOR;
        let profit = value
            .checked_sub(payout)
            .and_then(|v| v.checked_sub(fee))
            .ok_or_else(|| {
                UsvError::Underflow(format!(
                    "payout {} plus fee {} exceeds value {}",
                    payout, fee, value
                ))
            })?;

        let barter = self.address;
        let treasury_account = treasury.address();
        let principal = assets.get_mut(&self.principal)?;
        principal.transfer_from(&barter, caller, &barter, amount)?;
        principal.approve(&barter, &treasury_account, amount);
        treasury.deposit(assets, &barter, &self.principal, amount, profit)?;
        if fee != 0 {
            assets.usv_mut().transfer(&barter, &self.dao, fee)?;
        }

        if self.terms.minimum_price != 0 && curve >= self.terms.minimum_price {
            // Floor is retired once the curve clears it.
            self.terms.minimum_price = 0;
        }
        self.total_debt = self.total_debt.saturating_add(value);
        let bond = self.bonds.entry(*recipient).or_default();
        bond.payout = bond.payout.saturating_add(payout);
        bond.vesting = self.terms.vesting_blocks;
        bond.last_block = block;
        bond.price_paid = price_in_reserve;
        bond.auto_stake = auto_stake;

        tracing::info!(
            barter = %barter.short(),
            depositor = %caller.short(),
            recipient = %recipient.short(),
            amount,
            payout = %Usv::from_units(payout),
            fee = %Usv::from_units(fee),
            price,
            "Barter created"
        );

        self.adjust(block);
        Ok(DepositReceipt {
            payout,
            fee,
            value,
            price,
        })
    }

    /// Basis points of the remaining payout vested since the last interaction.
    pub fn percent_vested_for(&self, depositor: &Address, block: u64) -> u128 {
        match self.bonds.get(depositor) {
            Some(bond) if bond.vesting == 0 => FULLY_VESTED_BPS,
            Some(bond) => {
                let since = block.saturating_sub(bond.last_block) as u128;
                since * FULLY_VESTED_BPS / bond.vesting as u128
            }
            None => 0,
        }
    }

    /// USV `depositor` could redeem now.
    pub fn pending_payout_for(&self, depositor: &Address, block: u64) -> Amount {
        self.bonds
            .get(depositor)
            .map_or(0, |bond| vested_payout(bond, block))
    }

    /// Release the vested part of `recipient`'s bond, at most `max_amount`.
    ///
    /// Updates the bond only; the caller delivers the returned amount.
    pub fn redeem(
        &mut self,
        recipient: &Address,
        max_amount: Option<Amount>,
        block: u64,
    ) -> Result<Redemption, UsvError> {
        let bond = self
            .bonds
            .get_mut(recipient)
            .filter(|b| b.payout > 0)
            .ok_or(UsvError::NoActiveBond(*recipient))?;

        let vested = vested_payout(bond, block);
        let amount = max_amount.map_or(vested, |cap| vested.min(cap));
        let elapsed = block.saturating_sub(bond.last_block);
        // Only the share of elapsed blocks that backs `amount` is consumed;
        // vested payout left unclaimed stays claimable.
        let consumed = if vested == 0 {
            0
        } else {
            (elapsed as u128 * amount / vested) as u64
        };

        bond.payout -= amount;
        bond.vesting = bond.vesting.saturating_sub(consumed);
        bond.last_block += consumed;
        let auto_stake = bond.auto_stake;
        let closed = bond.payout == 0;
        let remaining = bond.payout;
        if closed {
            self.bonds.remove(recipient);
        }

        tracing::info!(
            barter = %self.address.short(),
            recipient = %recipient.short(),
            payout = %Usv::from_units(amount),
            remaining = %Usv::from_units(remaining),
            "Barter redeemed"
        );
        Ok(Redemption {
            amount,
            closed,
            auto_stake,
        })
    }
}

/// Payout of `bond` vested by `block`, linear over the remaining vesting.
fn vested_payout(bond: &Bond, block: u64) -> Amount {
    let since = block.saturating_sub(bond.last_block);
    if since >= bond.vesting {
        bond.payout
    } else {
        bond.payout.saturating_mul(since as u128) / bond.vesting as u128
    }
}
