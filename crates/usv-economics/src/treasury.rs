// crates/usv-economics/src/treasury.rs
//
// Reserve accounting for the Universal protocol.
//
// The treasury custodies reserve assets (DAI, FRAX, ...) and USV/reserve
// pool tokens, and is the only account allowed to mint USV. It tracks:
//   - `total_reserves`: backing value of custodied assets, in USV units
//   - `total_debt`: USV-denominated value lent out to approved debtors
//
// Backing invariant, checked after every call:
//   USV.total_supply <= total_reserves + total_debt
//
// Every privileged entry point is gated by a capability in the
// `PermissionRegistry`; the owner manages grants with `queue` / `toggle`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ledger::AssetBank;
use crate::permissions::{Capability, PermissionRegistry};
use crate::token::{pow10, Amount, Usv, USV_DECIMALS};
use usv_core::error::UsvError;
use usv_core::identity::Address;
use usv_core::traits::{AssetLedger, LiquidityValuation};

/// The protocol treasury.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treasury {
    /// Custody account holding every reserve asset.
    address: Address,
    owner: Address,
    permissions: PermissionRegistry,
    total_reserves: Amount,
    total_debt: Amount,
    debtor_balance: BTreeMap<Address, Amount>,
    /// Rebasing token whose balances bound debtor credit lines.
    rebasing_token: Option<Address>,
    /// Valuation per registered liquidity token. Rebound after loading.
    #[serde(skip)]
    valuations: BTreeMap<Address, Arc<dyn LiquidityValuation>>,
}

impl Treasury {
    /// Create an empty treasury.
    ///
    /// # Arguments
    /// - `address`: Custody account of the treasury (also the USV minter).
    /// - `owner`: Administrator allowed to queue and toggle grants.
    /// - `queue_delay_blocks`: Base delay between `queue` and `toggle`.
    pub fn new(address: Address, owner: Address, queue_delay_blocks: u64) -> Self {
        Self {
            address,
            owner,
            permissions: PermissionRegistry::new(queue_delay_blocks),
            total_reserves: 0,
            total_debt: 0,
            debtor_balance: BTreeMap::new(),
            rebasing_token: None,
            valuations: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn total_reserves(&self) -> Amount {
        self.total_reserves
    }

    pub fn total_debt(&self) -> Amount {
        self.total_debt
    }

    /// Outstanding debt of `debtor`, in USV units.
    pub fn debtor_balance(&self, debtor: &Address) -> Amount {
        self.debtor_balance.get(debtor).copied().unwrap_or(0)
    }

    /// Registered rebasing token, if any.
    pub fn rebasing_token(&self) -> Option<Address> {
        self.rebasing_token
    }

    pub fn permissions(&self) -> &PermissionRegistry {
        &self.permissions
    }

    /// Whether `subject` holds `capability`.
    pub fn is_granted(&self, capability: Capability, subject: &Address) -> bool {
        self.permissions.is_granted(capability, subject)
    }

    pub fn is_reserve_token(&self, asset: &Address) -> bool {
        self.is_granted(Capability::ReserveToken, asset)
    }

    pub fn is_liquidity_token(&self, asset: &Address) -> bool {
        self.is_granted(Capability::LiquidityToken, asset)
    }

    /// Valuation bound to a liquidity token.
    pub fn valuation_for(&self, asset: &Address) -> Option<&Arc<dyn LiquidityValuation>> {
        self.valuations.get(asset)
    }

    /// Re-attach a valuation after the treasury was loaded from storage.
    pub fn rebind_valuation(&mut self, asset: Address, valuation: Arc<dyn LiquidityValuation>) {
        self.valuations.insert(asset, valuation);
    }

    fn require_owner(&self, caller: &Address) -> Result<(), UsvError> {
        if *caller != self.owner {
            return Err(UsvError::PermissionDenied {
                required: "treasury owner".to_string(),
                subject: *caller,
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Grants
    // ---------------------------------------------------------------------

    /// Queue a grant of `capability` to `subject`. Owner only.
    ///
    /// Returns the block at which it can be toggled.
    pub fn queue(
        &mut self,
        caller: &Address,
        capability: Capability,
        subject: &Address,
        block: u64,
    ) -> Result<u64, UsvError> {
        self.require_owner(caller)?;
        let ready_at = self.permissions.queue(capability, subject, block)?;
        tracing::info!(
            capability = %capability,
            subject = %subject.short(),
            ready_at,
            "Grant queued"
        );
        Ok(ready_at)
    }

    /// Activate or revoke a grant. Owner only.
    ///
    /// Activating a liquidity token binds `valuation`, which is then required.
    /// Activating the rebasing-token authority registers `subject` as the
    /// token that bounds debtor credit.
    ///
    /// Returns the new state (`true` = active).
    pub fn toggle(
        &mut self,
        caller: &Address,
        capability: Capability,
        subject: &Address,
        valuation: Option<Arc<dyn LiquidityValuation>>,
        block: u64,
    ) -> Result<bool, UsvError> {
        self.require_owner(caller)?;

        let activating = !self.permissions.is_granted(capability, subject);
        if activating && capability == Capability::LiquidityToken && valuation.is_none() {
            return Err(UsvError::InvalidState(format!(
                "Liquidity token {} needs a valuation",
                subject
            )));
        }

        let active = self.permissions.toggle(capability, subject, block)?;
        match (capability, active) {
            (Capability::LiquidityToken, true) => {
                if let Some(v) = valuation {
                    self.valuations.insert(*subject, v);
                }
            }
            (Capability::LiquidityToken, false) => {
                self.valuations.remove(subject);
            }
            (Capability::RebasingTokenAuthority, true) => {
                self.rebasing_token = Some(*subject);
            }
            (Capability::RebasingTokenAuthority, false) => {
                if self.rebasing_token == Some(*subject) {
                    self.rebasing_token = None;
                }
            }
            _ => {}
        }

        tracing::info!(
            capability = %capability,
            subject = %subject.short(),
            active,
            "Grant toggled"
        );
        Ok(active)
    }

    /// Change the base queue delay. Owner only.
    pub fn set_queue_delay(&mut self, caller: &Address, blocks: u64) -> Result<(), UsvError> {
        self.require_owner(caller)?;
        self.permissions.set_queue_delay(blocks);
        tracing::info!(blocks, "Queue delay updated");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Valuation
    // ---------------------------------------------------------------------

    /// USV-denominated value of `amount` of `asset`.
    ///
    /// Reserve tokens convert by decimals; liquidity tokens go through their
    /// bound valuation.
    ///
    /// # Errors
    /// Returns `UsvError::UnsupportedAsset` for any other asset.
    pub fn value_of(&self, assets: &AssetBank, asset: &Address, amount: Amount) -> Result<Amount, UsvError> {
        if self.is_reserve_token(asset) {
            let decimals = assets.get(asset)?.decimals();
            let scaled = amount
                .checked_mul(pow10(USV_DECIMALS))
                .ok_or_else(|| UsvError::Overflow(format!("value of {} units", amount)))?;
            Ok(scaled / pow10(decimals))
        } else if self.is_liquidity_token(asset) {
            let valuation = self
                .valuations
                .get(asset)
                .ok_or_else(|| UsvError::NotFound(format!("valuation for {}", asset)))?;
            valuation.valuation(asset, amount)
        } else {
            Err(UsvError::UnsupportedAsset(*asset))
        }
    }

    /// Reserves not needed to back circulating, non-debt USV.
    ///
    /// `total_reserves - (USV supply - total_debt)`, floored at zero.
    pub fn excess_reserves(&self, assets: &AssetBank) -> Amount {
        let unbacked_supply = assets.usv().total_supply().saturating_sub(self.total_debt);
        self.total_reserves.saturating_sub(unbacked_supply)
    }

    /// Fail with `BackingViolated` if USV supply exceeds reserves plus debt.
    pub fn check_backing(&self, assets: &AssetBank) -> Result<(), UsvError> {
        let supply = assets.usv().total_supply();
        let backing = self.total_reserves.saturating_add(self.total_debt);
        if supply > backing {
            return Err(UsvError::BackingViolated {
                supply,
                reserves: self.total_reserves,
                debt: self.total_debt,
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reserve flows
    // ---------------------------------------------------------------------

    /// Deposit `amount` of `asset` and mint `value - profit` USV to the caller.
    ///
    /// Both reserve and liquidity deposits count toward `total_reserves`.
    /// The caller must have approved the treasury for `amount`.
    ///
    /// Returns the USV minted.
    pub fn deposit(
        &mut self,
        assets: &mut AssetBank,
        caller: &Address,
        asset: &Address,
        amount: Amount,
        profit: Amount,
    ) -> Result<Amount, UsvError> {
        if self.is_reserve_token(asset) {
            self.permissions.require(Capability::ReserveDepositor, caller)?;
        } else if self.is_liquidity_token(asset) {
            self.permissions.require(Capability::LiquidityDepositor, caller)?;
        } else {
            return Err(UsvError::UnsupportedAsset(*asset));
        }

        let value = self.value_of(assets, asset, amount)?;
        let send = value.checked_sub(profit).ok_or_else(|| {
            UsvError::Underflow(format!("profit {} exceeds deposit value {}", profit, value))
        })?;

        let treasury = self.address;
        assets
            .get_mut(asset)?
            .transfer_from(&treasury, caller, &treasury, amount)?;
        assets.usv_mut().mint(&treasury, caller, send)?;
        self.total_reserves = self.total_reserves.saturating_add(value);

        tracing::info!(
            depositor = %caller.short(),
            asset = %asset.short(),
            amount,
            value = %Usv::from_units(value),
            minted = %Usv::from_units(send),
            "Reserves deposited"
        );
        Ok(send)
    }

    /// Burn the caller's USV and release `amount` of reserve `asset`.
    ///
    /// The caller must have approved the treasury to burn the USV value.
    pub fn withdraw(
        &mut self,
        assets: &mut AssetBank,
        caller: &Address,
        amount: Amount,
        asset: &Address,
    ) -> Result<(), UsvError> {
        if !self.is_reserve_token(asset) {
            return Err(UsvError::UnsupportedAsset(*asset));
        }
        self.permissions.require(Capability::ReserveSpender, caller)?;

        let value = self.value_of(assets, asset, amount)?;
        let treasury = self.address;
        assets.usv_mut().burn_from(&treasury, caller, value)?;
        self.total_reserves = self.total_reserves.checked_sub(value).ok_or_else(|| {
            UsvError::Underflow(format!("withdraw {} from reserves {}", value, self.total_reserves))
        })?;
        assets.get_mut(asset)?.transfer(&treasury, caller, amount)?;

        tracing::info!(
            spender = %caller.short(),
            asset = %asset.short(),
            amount,
            value = %Usv::from_units(value),
            "Reserves withdrawn"
        );
        Ok(())
    }

    /// Lend `amount` of reserve `asset` to an approved debtor.
    ///
    /// A debtor's total debt may not exceed its balance of the registered
    /// rebasing token (`staked`).
    pub fn incur_debt(
        &mut self,
        assets: &mut AssetBank,
        staked: &dyn AssetLedger,
        caller: &Address,
        amount: Amount,
        asset: &Address,
    ) -> Result<(), UsvError> {
        self.permissions.require(Capability::Debtor, caller)?;
        if !self.is_reserve_token(asset) {
            return Err(UsvError::UnsupportedAsset(*asset));
        }
        if self.rebasing_token.is_none() {
            return Err(UsvError::InvalidState(
                "No rebasing token registered to bound debt".to_string(),
            ));
        }

        let value = self.value_of(assets, asset, amount)?;
        let maximum = staked.balance_of(caller);
        let available = maximum.saturating_sub(self.debtor_balance(caller));
        if value > available {
            return Err(UsvError::ExceedsDebtLimit {
                requested: value,
                available,
            });
        }

        self.total_reserves = self.total_reserves.checked_sub(value).ok_or_else(|| {
            UsvError::Underflow(format!("lend {} from reserves {}", value, self.total_reserves))
        })?;
        *self.debtor_balance.entry(*caller).or_insert(0) += value;
        self.total_debt = self.total_debt.saturating_add(value);

        let treasury = self.address;
        assets.get_mut(asset)?.transfer(&treasury, caller, amount)?;

        tracing::info!(
            debtor = %caller.short(),
            asset = %asset.short(),
            value = %Usv::from_units(value),
            "Debt incurred"
        );
        Ok(())
    }

    /// Repay debt by returning `amount` of reserve `asset`.
    pub fn repay_debt_with_reserve(
        &mut self,
        assets: &mut AssetBank,
        caller: &Address,
        amount: Amount,
        asset: &Address,
    ) -> Result<(), UsvError> {
        self.permissions.require(Capability::Debtor, caller)?;
        if !self.is_reserve_token(asset) {
            return Err(UsvError::UnsupportedAsset(*asset));
        }

        let value = self.value_of(assets, asset, amount)?;
        self.reduce_debt(caller, value)?;
        self.total_reserves = self.total_reserves.saturating_add(value);

        let treasury = self.address;
        assets
            .get_mut(asset)?
            .transfer_from(&treasury, caller, &treasury, amount)?;

        tracing::info!(
            debtor = %caller.short(),
            asset = %asset.short(),
            value = %Usv::from_units(value),
            "Debt repaid with reserve"
        );
        Ok(())
    }

    /// Repay debt by burning `amount` USV from the caller.
    pub fn repay_debt_with_token(
        &mut self,
        assets: &mut AssetBank,
        caller: &Address,
        amount: Amount,
    ) -> Result<(), UsvError> {
        self.permissions.require(Capability::Debtor, caller)?;

        let treasury = self.address;
        assets.usv_mut().burn_from(&treasury, caller, amount)?;
        self.reduce_debt(caller, amount)?;

        tracing::info!(
            debtor = %caller.short(),
            amount = %Usv::from_units(amount),
            "Debt repaid with USV"
        );
        Ok(())
    }

    fn reduce_debt(&mut self, debtor: &Address, value: Amount) -> Result<(), UsvError> {
        let owed = self.debtor_balance(debtor);
        let remaining = owed.checked_sub(value).ok_or_else(|| {
            UsvError::Underflow(format!("repay {} against debt {}", value, owed))
        })?;
        if remaining == 0 {
            self.debtor_balance.remove(debtor);
        } else {
            self.debtor_balance.insert(*debtor, remaining);
        }
        self.total_debt = self.total_debt.checked_sub(value).ok_or_else(|| {
            UsvError::Underflow(format!("repay {} against total debt {}", value, self.total_debt))
        })?;
        Ok(())
    }

    /// Move excess reserves out of the treasury to the caller.
    ///
    /// Liquidity tokens need liquidity-manager, anything else reserve-manager.
    pub fn manage(
        &mut self,
        assets: &mut AssetBank,
        caller: &Address,
        asset: &Address,
        amount: Amount,
    ) -> Result<(), UsvError> {
        if self.is_liquidity_token(asset) {
            self.permissions.require(Capability::LiquidityManager, caller)?;
        } else {
            self.permissions.require(Capability::ReserveManager, caller)?;
        }

        let value = self.value_of(assets, asset, amount)?;
        let excess = self.excess_reserves(assets);
        if value > excess {
            return Err(UsvError::InsufficientReserves {
                requested: value,
                excess,
            });
        }

        self.total_reserves -= value;
        let treasury = self.address;
        assets.get_mut(asset)?.transfer(&treasury, caller, amount)?;

        tracing::info!(
            manager = %caller.short(),
            asset = %asset.short(),
            amount,
            value = %Usv::from_units(value),
            "Reserves managed"
        );
        Ok(())
    }

    /// Mint `amount` USV to `recipient` out of excess reserves.
    pub fn mint_rewards(
        &mut self,
        assets: &mut AssetBank,
        caller: &Address,
        recipient: &Address,
        amount: Amount,
    ) -> Result<(), UsvError> {
        self.permissions.require(Capability::RewardManager, caller)?;

        let excess = self.excess_reserves(assets);
        if amount > excess {
            return Err(UsvError::InsufficientReserves {
                requested: amount,
                excess,
            });
        }

        let treasury = self.address;
        assets.usv_mut().mint(&treasury, recipient, amount)?;

        tracing::debug!(
            recipient = %recipient.short(),
            amount = %Usv::from_units(amount),
            "Rewards minted"
        );
        Ok(())
    }

    /// Recompute `total_reserves` from actual custody balances. Owner only.
    ///
    /// Returns the new total.
    pub fn audit_reserves(&mut self, assets: &AssetBank, caller: &Address) -> Result<Amount, UsvError> {
        self.require_owner(caller)?;

        let mut reserves: Amount = 0;
        for capability in [Capability::ReserveToken, Capability::LiquidityToken] {
            for asset in self.permissions.activated(capability) {
                if !self.permissions.is_granted(capability, asset) {
                    continue;
                }
                let held = assets.get(asset)?.balance_of(&self.address);
                reserves = reserves.saturating_add(self.value_of(assets, asset, held)?);
            }
        }

        tracing::info!(
            before = %Usv::from_units(self.total_reserves),
            after = %Usv::from_units(reserves),
            "Reserves audited"
        );
        self.total_reserves = reserves;
        Ok(reserves)
    }
}
