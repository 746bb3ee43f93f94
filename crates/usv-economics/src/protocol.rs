// crates/usv-economics/src/protocol.rs
//
// The protocol facade.
//
// `Protocol` owns every component (asset ledgers, treasury, sUSV, staking,
// distributor, barter depositories), the current block height, and the
// well-known protocol addresses. Each public entry point runs as one atomic
// transaction:
//
//   1. clone the state into a draft
//   2. apply the call to the draft (cross-component calls included)
//   3. check the backing invariant on the draft
//   4. commit the draft, or drop it on any error
//
// so a failed call never leaves partial state behind. Methods take
// `&mut self`; callers that share a `Protocol` across tasks wrap it in a
// single lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::barter::{BarterDepository, BarterTerms, Bond, DepositReceipt, TermParameter};
use crate::distributor::Distributor;
use crate::ledger::{AssetBank, TokenLedger};
use crate::permissions::Capability;
use crate::rebasing::{RebaseRecord, StakedUsv};
use crate::staking::{Epoch, EpochContext, StakingCoordinator, WarmupClaim};
use crate::token::{pow10, Amount, MAX_DECIMALS, USV_DECIMALS};
use crate::treasury::Treasury;
use crate::valuation::{ConstantProductValuation, LP_DECIMALS};
use usv_core::error::UsvError;
use usv_core::identity::Address;
use usv_core::traits::{AssetLedger, LiquidityValuation};

/// Well-known accounts of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAddresses {
    pub admin: Address,
    pub dao: Address,
    pub usv: Address,
    pub susv: Address,
    pub treasury: Address,
    pub staking: Address,
    pub warmup: Address,
    pub distributor: Address,
}

impl ProtocolAddresses {
    /// Derive every protocol account from the admin and DAO labels.
    pub fn derive(admin: &str, dao: &str) -> Self {
        Self {
            admin: Address::derive(admin),
            dao: Address::derive(dao),
            usv: Address::derive("usv"),
            susv: Address::derive("susv"),
            treasury: Address::derive("treasury"),
            staking: Address::derive("staking"),
            warmup: Address::derive("staking-warmup"),
            distributor: Address::derive("distributor"),
        }
    }
}

/// Address of a listed asset, derived from its ticker.
pub fn asset_address(symbol: &str) -> Address {
    Address::derive(&format!("asset:{}", symbol.to_lowercase()))
}

/// Address of a barter depository, derived from its label.
pub fn barter_address(label: &str) -> Address {
    Address::derive(&format!("barter:{}", label))
}

/// A reserve asset listed at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveAssetConfig {
    pub symbol: String,
    #[serde(default = "default_reserve_decimals")]
    pub decimals: u8,
}

fn default_reserve_decimals() -> u8 {
    18
}

/// A USV/reserve pool whose token the treasury accepts.
///
/// Amounts are whole tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPoolConfig {
    pub symbol: String,
    pub usv_reserve: u64,
    pub paired_reserve: u64,
    #[serde(default = "default_reserve_decimals")]
    pub paired_decimals: u8,
    pub lp_supply: u64,
}

impl LiquidityPoolConfig {
    pub fn valuation(&self) -> Result<ConstantProductValuation, UsvError> {
        if self.paired_decimals > MAX_DECIMALS {
            return Err(UsvError::Config(format!(
                "Pool {} pairs an asset with {} decimals, at most {} supported",
                self.symbol, self.paired_decimals, MAX_DECIMALS
            )));
        }
        let paired_reserve = (self.paired_reserve as Amount)
            .checked_mul(pow10(self.paired_decimals))
            .ok_or_else(|| UsvError::Overflow(format!("paired reserve of pool {}", self.symbol)))?;
        Ok(ConstantProductValuation::new(
            self.usv_reserve as Amount * pow10(USV_DECIMALS),
            paired_reserve,
            self.paired_decimals,
            self.lp_supply as Amount * pow10(LP_DECIMALS),
        ))
    }
}

/// A barter depository opened at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarterConfig {
    pub label: String,
    /// Ticker of a reserve asset or liquidity pool listed at genesis.
    pub principal: String,
    #[serde(default)]
    pub is_liquidity: bool,
    pub terms: BarterTerms,
    #[serde(default)]
    pub initial_debt: Amount,
}

/// Parameters of a fresh deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Label the administrator address is derived from.
    pub admin: String,
    /// Label the fee recipient address is derived from.
    pub dao: String,
    pub queue_delay_blocks: u64,
    pub epoch_length_blocks: u64,
    pub first_epoch_number: u64,
    pub first_epoch_block: u64,
    pub warmup_epochs: u64,
    /// Staking reward per epoch, per million of USV supply. Zero disables rewards.
    pub staking_reward_rate: u128,
    /// Starting sUSV index. Zero leaves it unset.
    pub initial_index: Amount,
    pub reserve_assets: Vec<ReserveAssetConfig>,
    pub liquidity_pools: Vec<LiquidityPoolConfig>,
    pub barters: Vec<BarterConfig>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            admin: "admin".to_string(),
            dao: "dao".to_string(),
            queue_delay_blocks: 0,
            epoch_length_blocks: 2_200,
            first_epoch_number: 0,
            first_epoch_block: 0,
            warmup_epochs: 0,
            staking_reward_rate: 3_000,
            initial_index: 7_675_210_820,
            reserve_assets: vec![
                ReserveAssetConfig {
                    symbol: "DAI".to_string(),
                    decimals: 18,
                },
                ReserveAssetConfig {
                    symbol: "FRAX".to_string(),
                    decimals: 18,
                },
            ],
            liquidity_pools: Vec::new(),
            barters: Vec::new(),
        }
    }
}

/// Complete protocol state. Cloned per transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolState {
    pub block: u64,
    pub addresses: ProtocolAddresses,
    pub assets: AssetBank,
    pub treasury: Treasury,
    pub rebasing: StakedUsv,
    pub staking: StakingCoordinator,
    pub distributor: Distributor,
    pub barters: BTreeMap<Address, BarterDepository>,
}

impl ProtocolState {
    /// Split out the staking coordinator and the collaborators it drives.
    fn epoch_context(&mut self) -> (&mut StakingCoordinator, EpochContext<'_>) {
        let ProtocolState {
            staking,
            rebasing,
            distributor,
            treasury,
            assets,
            ..
        } = self;
        (
            staking,
            EpochContext {
                rebasing,
                distributor,
                treasury,
                assets,
            },
        )
    }

    fn barter(&self, barter: &Address) -> Result<&BarterDepository, UsvError> {
        self.barters
            .get(barter)
            .ok_or_else(|| UsvError::NotFound(format!("barter {}", barter)))
    }

    fn ledger(&self, asset: &Address) -> Result<&dyn AssetLedger, UsvError> {
        let ledger: &dyn AssetLedger = if *asset == self.addresses.susv {
            &self.rebasing
        } else {
            self.assets.get(asset)?
        };
        Ok(ledger)
    }

    fn ledger_mut(&mut self, asset: &Address) -> Result<&mut dyn AssetLedger, UsvError> {
        let ledger: &mut dyn AssetLedger = if *asset == self.addresses.susv {
            &mut self.rebasing
        } else {
            self.assets.get_mut(asset)?
        };
        Ok(ledger)
    }
}

/// The protocol facade. See the module docs for the transaction model.
#[derive(Debug, Clone)]
pub struct Protocol {
    state: ProtocolState,
}

impl Protocol {
    /// Build and wire a fresh deployment at block 0.
    pub fn genesis(config: &GenesisConfig) -> Result<Self, UsvError> {
        if config.epoch_length_blocks == 0 {
            return Err(UsvError::Config("epoch length must be positive".to_string()));
        }
        let addresses = ProtocolAddresses::derive(&config.admin, &config.dao);
        let admin = addresses.admin;

        let usv = TokenLedger::new("USV", USV_DECIMALS, Some(addresses.treasury));
        let mut assets = AssetBank::new(addresses.usv, usv);
        // Grants are wired with no delay; the configured delay applies afterwards.
        let mut treasury = Treasury::new(addresses.treasury, admin, 0);

        let grant = |treasury: &mut Treasury, capability: Capability, subject: &Address| -> Result<(), UsvError> {
            treasury.queue(&admin, capability, subject, 0)?;
            treasury.toggle(&admin, capability, subject, None, 0).map(|_| ())
        };

        for reserve in &config.reserve_assets {
            let id = asset_address(&reserve.symbol);
            assets.list(id, TokenLedger::new(&reserve.symbol, reserve.decimals, Some(admin)))?;
            grant(&mut treasury, Capability::ReserveToken, &id)?;
        }
        for pool in &config.liquidity_pools {
            let id = asset_address(&pool.symbol);
            let valuation = pool.valuation()?;
            assets.list(id, TokenLedger::new(&pool.symbol, LP_DECIMALS, Some(admin)))?;
            treasury.queue(&admin, Capability::LiquidityToken, &id, 0)?;
            treasury.toggle(&admin, Capability::LiquidityToken, &id, Some(Arc::new(valuation)), 0)?;
        }
        grant(&mut treasury, Capability::RewardManager, &addresses.distributor)?;
        grant(&mut treasury, Capability::RebasingTokenAuthority, &addresses.susv)?;

        let mut rebasing = StakedUsv::new(admin);
        rebasing.initialize(&admin, &addresses.staking)?;
        if config.initial_index != 0 {
            rebasing.set_index(&admin, config.initial_index)?;
        }

        let mut staking = StakingCoordinator::new(
            addresses.staking,
            admin,
            addresses.warmup,
            config.epoch_length_blocks,
            config.first_epoch_number,
            config.first_epoch_block,
        );
        staking.set_warmup(&admin, config.warmup_epochs)?;

        let mut distributor = Distributor::new(
            addresses.distributor,
            admin,
            addresses.staking,
            config.epoch_length_blocks,
            config.first_epoch_block,
        );
        if config.staking_reward_rate != 0 {
            distributor.add_recipient(&admin, &addresses.staking, config.staking_reward_rate)?;
        }

        let mut barters = BTreeMap::new();
        for barter_config in &config.barters {
            let principal = asset_address(&barter_config.principal);
            if !assets.contains(&principal) {
                return Err(UsvError::Config(format!(
                    "barter {} uses unlisted principal {}",
                    barter_config.label, barter_config.principal
                )));
            }
            if barter_config.is_liquidity != treasury.is_liquidity_token(&principal) {
                return Err(UsvError::Config(format!(
                    "barter {} principal {} is not a {}",
                    barter_config.label,
                    barter_config.principal,
                    if barter_config.is_liquidity { "liquidity pool" } else { "reserve asset" }
                )));
            }
            let id = barter_address(&barter_config.label);
            let mut depository =
                BarterDepository::new(id, admin, principal, barter_config.is_liquidity, addresses.dao);
            depository.initialize_terms(&admin, barter_config.terms.clone(), barter_config.initial_debt, 0)?;
            let capability = if barter_config.is_liquidity {
                Capability::LiquidityDepositor
            } else {
                Capability::ReserveDepositor
            };
            grant(&mut treasury, capability, &id)?;
            barters.insert(id, depository);
        }

        treasury.set_queue_delay(&admin, config.queue_delay_blocks)?;

        tracing::info!(
            admin = %admin.short(),
            reserves = config.reserve_assets.len(),
            barters = barters.len(),
            epoch_length = config.epoch_length_blocks,
            "Protocol genesis"
        );

        Ok(Self {
            state: ProtocolState {
                block: 0,
                addresses,
                assets,
                treasury,
                rebasing,
                staking,
                distributor,
                barters,
            },
        })
    }

    /// Wrap previously persisted state.
    pub fn from_state(state: ProtocolState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn addresses(&self) -> &ProtocolAddresses {
        &self.state.addresses
    }

    pub fn block(&self) -> u64 {
        self.state.block
    }

    /// Run `f` against a draft and commit only if it and the backing check succeed.
    fn execute<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut ProtocolState) -> Result<T, UsvError>,
    ) -> Result<T, UsvError> {
        let mut draft = self.state.clone();
        let outcome = f(&mut draft).and_then(|value| {
            draft.treasury.check_backing(&draft.assets)?;
            Ok(value)
        });
        match outcome {
            Ok(value) => {
                self.state = draft;
                tracing::debug!(operation, block = self.state.block, "Call committed");
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(operation, block = self.state.block, error = %e, "Call rolled back");
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Chain
    // ---------------------------------------------------------------------

    /// Move the block height forward by `blocks`.
    pub fn advance_blocks(&mut self, blocks: u64) -> u64 {
        self.state.block = self.state.block.saturating_add(blocks);
        self.state.block
    }

    /// Jump to `block`. The height never moves backwards.
    pub fn set_block(&mut self, block: u64) -> Result<(), UsvError> {
        if block < self.state.block {
            return Err(UsvError::InvalidState(format!(
                "Block {} is behind current block {}",
                block, self.state.block
            )));
        }
        self.state.block = block;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Asset ledgers
    // ---------------------------------------------------------------------

    /// List an external asset minted by the administrator. Admin only.
    ///
    /// The asset still needs a reserve-token or liquidity-token grant before
    /// the treasury accepts it.
    pub fn list_asset(&mut self, caller: &Address, symbol: &str, decimals: u8) -> Result<Address, UsvError> {
        let symbol = symbol.to_string();
        self.execute("list_asset", |s| {
            if *caller != s.addresses.admin {
                return Err(UsvError::PermissionDenied {
                    required: "admin".to_string(),
                    subject: *caller,
                });
            }
            let id = asset_address(&symbol);
            s.assets
                .list(id, TokenLedger::new(&symbol, decimals, Some(s.addresses.admin)))?;
            Ok(id)
        })
    }

    /// Mint an external asset. Only its minter may call; USV is minted
    /// only by the treasury.
    pub fn mint_asset(&mut self, caller: &Address, asset: &Address, to: &Address, amount: Amount) -> Result<(), UsvError> {
        self.execute("mint_asset", |s| {
            if *asset == s.addresses.usv {
                return Err(UsvError::PermissionDenied {
                    required: "USV minter".to_string(),
                    subject: *caller,
                });
            }
            s.assets.get_mut(asset)?.mint(caller, to, amount)
        })
    }

    pub fn approve(&mut self, caller: &Address, asset: &Address, spender: &Address, amount: Amount) -> Result<(), UsvError> {
        self.execute("approve", |s| {
            s.ledger_mut(asset)?.approve(caller, spender, amount);
            Ok(())
        })
    }

    pub fn transfer(&mut self, caller: &Address, asset: &Address, to: &Address, amount: Amount) -> Result<(), UsvError> {
        self.execute("transfer", |s| s.ledger_mut(asset)?.transfer(caller, to, amount))
    }

    /// Balance of `holder` in any ledger, sUSV included. Unknown assets read as zero.
    pub fn balance_of(&self, asset: &Address, holder: &Address) -> Amount {
        self.state
            .ledger(asset)
            .map(|l| l.balance_of(holder))
            .unwrap_or(0)
    }

    pub fn total_supply(&self, asset: &Address) -> Amount {
        self.state.ledger(asset).map(|l| l.total_supply()).unwrap_or(0)
    }

    pub fn allowance(&self, asset: &Address, owner: &Address, spender: &Address) -> Amount {
        self.state
            .ledger(asset)
            .map(|l| l.allowance(owner, spender))
            .unwrap_or(0)
    }

    // ---------------------------------------------------------------------
    // Treasury
    // ---------------------------------------------------------------------

    pub fn queue(&mut self, caller: &Address, capability: Capability, subject: &Address) -> Result<u64, UsvError> {
        self.execute("queue", |s| s.treasury.queue(caller, capability, subject, s.block))
    }

    pub fn toggle(
        &mut self,
        caller: &Address,
        capability: Capability,
        subject: &Address,
        valuation: Option<Arc<dyn LiquidityValuation>>,
    ) -> Result<bool, UsvError> {
        self.execute("toggle", |s| {
            s.treasury.toggle(caller, capability, subject, valuation, s.block)
        })
    }

    pub fn set_queue_delay(&mut self, caller: &Address, blocks: u64) -> Result<(), UsvError> {
        self.execute("set_queue_delay", |s| s.treasury.set_queue_delay(caller, blocks))
    }

    /// Re-attach a liquidity valuation after loading persisted state.
    pub fn rebind_valuation(&mut self, asset: Address, valuation: Arc<dyn LiquidityValuation>) {
        self.state.treasury.rebind_valuation(asset, valuation);
    }

    /// Re-attach every configured pool that is still an active liquidity token.
    ///
    /// Returns how many were bound.
    pub fn rebind_pools(&mut self, pools: &[LiquidityPoolConfig]) -> usize {
        let mut bound = 0;
        for pool in pools {
            let id = asset_address(&pool.symbol);
            if !self.state.treasury.is_liquidity_token(&id) {
                tracing::warn!(pool = %pool.symbol, "Configured pool is not an active liquidity token");
                continue;
            }
            match pool.valuation() {
                Ok(valuation) => {
                    self.rebind_valuation(id, Arc::new(valuation));
                    bound += 1;
                }
                Err(e) => tracing::warn!(pool = %pool.symbol, error = %e, "Configured pool rejected"),
            }
        }
        bound
    }

    pub fn deposit(&mut self, caller: &Address, asset: &Address, amount: Amount, profit: Amount) -> Result<Amount, UsvError> {
        self.execute("deposit", |s| {
            s.treasury.deposit(&mut s.assets, caller, asset, amount, profit)
        })
    }

    pub fn withdraw(&mut self, caller: &Address, amount: Amount, asset: &Address) -> Result<(), UsvError> {
        self.execute("withdraw", |s| {
            s.treasury.withdraw(&mut s.assets, caller, amount, asset)
        })
    }

    pub fn incur_debt(&mut self, caller: &Address, amount: Amount, asset: &Address) -> Result<(), UsvError> {
        self.execute("incur_debt", |s| {
            if let Some(token) = s.treasury.rebasing_token() {
                if token != s.addresses.susv {
                    return Err(UsvError::InvalidState(format!(
                        "Registered rebasing token {} is not sUSV",
                        token
                    )));
                }
            }
            s.treasury
                .incur_debt(&mut s.assets, &s.rebasing, caller, amount, asset)
        })
    }

    pub fn repay_debt_with_reserve(&mut self, caller: &Address, amount: Amount, asset: &Address) -> Result<(), UsvError> {
        self.execute("repay_debt_with_reserve", |s| {
            s.treasury
                .repay_debt_with_reserve(&mut s.assets, caller, amount, asset)
        })
    }

    pub fn repay_debt_with_token(&mut self, caller: &Address, amount: Amount) -> Result<(), UsvError> {
        self.execute("repay_debt_with_token", |s| {
            s.treasury.repay_debt_with_token(&mut s.assets, caller, amount)
        })
    }

    pub fn manage(&mut self, caller: &Address, asset: &Address, amount: Amount) -> Result<(), UsvError> {
        self.execute("manage", |s| s.treasury.manage(&mut s.assets, caller, asset, amount))
    }

    pub fn mint_rewards(&mut self, caller: &Address, recipient: &Address, amount: Amount) -> Result<(), UsvError> {
        self.execute("mint_rewards", |s| {
            s.treasury.mint_rewards(&mut s.assets, caller, recipient, amount)
        })
    }

    pub fn audit_reserves(&mut self, caller: &Address) -> Result<Amount, UsvError> {
        self.execute("audit_reserves", |s| s.treasury.audit_reserves(&s.assets, caller))
    }

    pub fn value_of(&self, asset: &Address, amount: Amount) -> Result<Amount, UsvError> {
        self.state.treasury.value_of(&self.state.assets, asset, amount)
    }

    pub fn excess_reserves(&self) -> Amount {
        self.state.treasury.excess_reserves(&self.state.assets)
    }

    pub fn total_reserves(&self) -> Amount {
        self.state.treasury.total_reserves()
    }

    pub fn total_debt(&self) -> Amount {
        self.state.treasury.total_debt()
    }

    pub fn debtor_balance(&self, debtor: &Address) -> Amount {
        self.state.treasury.debtor_balance(debtor)
    }

    pub fn is_granted(&self, capability: Capability, subject: &Address) -> bool {
        self.state.treasury.is_granted(capability, subject)
    }

    /// Subjects currently holding `capability`.
    pub fn grantees(&self, capability: Capability) -> Vec<Address> {
        self.state.treasury.permissions().active(capability)
    }

    // ---------------------------------------------------------------------
    // Barter depositories
    // ---------------------------------------------------------------------

    /// Open a depository selling USV for `principal`. Admin only.
    ///
    /// The depository still needs a depositor grant from the treasury.
    pub fn create_barter(
        &mut self,
        caller: &Address,
        label: &str,
        principal: &Address,
        is_liquidity: bool,
    ) -> Result<Address, UsvError> {
        self.execute("create_barter", |s| {
            if *caller != s.addresses.admin {
                return Err(UsvError::PermissionDenied {
                    required: "admin".to_string(),
                    subject: *caller,
                });
            }
            let id = barter_address(label);
            if s.barters.contains_key(&id) {
                return Err(UsvError::InvalidState(format!("Barter {} already exists", label)));
            }
            s.assets.get(principal)?;
            let depository = BarterDepository::new(id, s.addresses.admin, *principal, is_liquidity, s.addresses.dao);
            s.barters.insert(id, depository);
            tracing::info!(label, barter = %id.short(), principal = %principal.short(), "Barter created");
            Ok(id)
        })
    }

    pub fn initialize_barter_terms(
        &mut self,
        caller: &Address,
        barter: &Address,
        terms: BarterTerms,
        initial_debt: Amount,
    ) -> Result<(), UsvError> {
        self.execute("initialize_barter_terms", |s| {
            let block = s.block;
            Self::barter_mut(s, barter)?.initialize_terms(caller, terms, initial_debt, block)
        })
    }

    pub fn set_barter_term(
        &mut self,
        caller: &Address,
        barter: &Address,
        parameter: TermParameter,
        value: u128,
    ) -> Result<(), UsvError> {
        self.execute("set_barter_term", |s| {
            Self::barter_mut(s, barter)?.set_term(caller, parameter, value)
        })
    }

    pub fn set_barter_adjustment(
        &mut self,
        caller: &Address,
        barter: &Address,
        add: bool,
        increment: u128,
        target: u128,
        buffer: u64,
    ) -> Result<(), UsvError> {
        self.execute("set_barter_adjustment", |s| {
            let block = s.block;
            Self::barter_mut(s, barter)?.set_adjustment(caller, add, increment, target, buffer, block)
        })
    }

    fn barter_mut<'a>(s: &'a mut ProtocolState, barter: &Address) -> Result<&'a mut BarterDepository, UsvError> {
        s.barters
            .get_mut(barter)
            .ok_or_else(|| UsvError::NotFound(format!("barter {}", barter)))
    }

    /// Deposit principal into `barter` for a vesting USV bond.
    #[allow(clippy::too_many_arguments)]
    pub fn barter_deposit(
        &mut self,
        caller: &Address,
        barter: &Address,
        amount: Amount,
        max_price: u128,
        recipient: &Address,
        auto_stake: bool,
    ) -> Result<DepositReceipt, UsvError> {
        self.execute("barter_deposit", |s| {
            let block = s.block;
            let depository = s
                .barters
                .get_mut(barter)
                .ok_or_else(|| UsvError::NotFound(format!("barter {}", barter)))?;
            depository.deposit(
                &mut s.treasury,
                &mut s.assets,
                caller,
                amount,
                max_price,
                recipient,
                auto_stake,
                block,
            )
        })
    }

    /// Pay out the vested part of `recipient`'s bond.
    ///
    /// With staking (explicit, or the preference recorded at deposit when
    /// `auto_stake` is `None`) the payout is staked and claimed for the
    /// recipient; otherwise it is sent as USV. Returns the amount paid out.
    ///
    /// Anyone may redeem in full on the recipient's behalf; only the
    /// recipient may cap the amount.
    pub fn redeem(
        &mut self,
        caller: &Address,
        barter: &Address,
        recipient: &Address,
        max_amount: Option<Amount>,
        auto_stake: Option<bool>,
    ) -> Result<Amount, UsvError> {
        if max_amount.is_some() && caller != recipient {
            return Err(UsvError::PermissionDenied {
                required: "bond recipient".to_string(),
                subject: *caller,
            });
        }
        self.execute("redeem", |s| {
            let block = s.block;
            let depository = Self::barter_mut(s, barter)?;
            let account = depository.address();
            let redemption = depository.redeem(recipient, max_amount, block)?;
            let amount = redemption.amount;
            if amount == 0 {
                return Ok(0);
            }

            if auto_stake.unwrap_or(redemption.auto_stake) {
                let staking_account = s.addresses.staking;
                s.assets.usv_mut().approve(&account, &staking_account, amount);
                let (staking, mut ctx) = s.epoch_context();
                staking.stake_and_claim(&mut ctx, &account, amount, recipient, block)?;
            } else {
                s.assets.usv_mut().transfer(&account, recipient, amount)?;
            }
            Ok(amount)
        })
    }

    pub fn barter(&self, barter: &Address) -> Result<&BarterDepository, UsvError> {
        self.state.barter(barter)
    }

    pub fn barter_price(&self, barter: &Address) -> Result<u128, UsvError> {
        Ok(self.state.barter(barter)?.barter_price(&self.state.assets, self.state.block))
    }

    pub fn barter_price_in_reserve(&self, barter: &Address) -> Result<u128, UsvError> {
        self.state
            .barter(barter)?
            .barter_price_in_reserve(&self.state.treasury, &self.state.assets, self.state.block)
    }

    pub fn payout_for(&self, barter: &Address, value: Amount) -> Result<Amount, UsvError> {
        Ok(self
            .state
            .barter(barter)?
            .payout_for(&self.state.assets, value, self.state.block))
    }

    pub fn max_payout(&self, barter: &Address) -> Result<Amount, UsvError> {
        Ok(self.state.barter(barter)?.max_payout(&self.state.assets))
    }

    pub fn debt_ratio(&self, barter: &Address) -> Result<u128, UsvError> {
        Ok(self.state.barter(barter)?.debt_ratio(&self.state.assets, self.state.block))
    }

    pub fn standardized_debt_ratio(&self, barter: &Address) -> Result<u128, UsvError> {
        self.state
            .barter(barter)?
            .standardized_debt_ratio(&self.state.treasury, &self.state.assets, self.state.block)
    }

    pub fn current_debt(&self, barter: &Address) -> Result<Amount, UsvError> {
        Ok(self.state.barter(barter)?.current_debt(self.state.block))
    }

    pub fn debt_decay(&self, barter: &Address) -> Result<Amount, UsvError> {
        Ok(self.state.barter(barter)?.debt_decay(self.state.block))
    }

    pub fn bond_info(&self, barter: &Address, depositor: &Address) -> Result<Option<Bond>, UsvError> {
        Ok(self.state.barter(barter)?.bond_info(depositor).cloned())
    }

    pub fn percent_vested_for(&self, barter: &Address, depositor: &Address) -> Result<u128, UsvError> {
        Ok(self
            .state
            .barter(barter)?
            .percent_vested_for(depositor, self.state.block))
    }

    pub fn pending_payout_for(&self, barter: &Address, depositor: &Address) -> Result<Amount, UsvError> {
        Ok(self
            .state
            .barter(barter)?
            .pending_payout_for(depositor, self.state.block))
    }

    // ---------------------------------------------------------------------
    // Staking
    // ---------------------------------------------------------------------

    /// Roll over one epoch if due. Anyone may call.
    pub fn rebase(&mut self) -> Result<bool, UsvError> {
        self.execute("rebase", |s| {
            let block = s.block;
            let (staking, mut ctx) = s.epoch_context();
            staking.rebase(&mut ctx, block)
        })
    }

    pub fn stake(&mut self, caller: &Address, amount: Amount, recipient: &Address) -> Result<(), UsvError> {
        self.execute("stake", |s| {
            let block = s.block;
            let (staking, mut ctx) = s.epoch_context();
            staking.stake(&mut ctx, caller, amount, recipient, block)
        })
    }

    pub fn claim(&mut self, recipient: &Address) -> Result<Amount, UsvError> {
        self.execute("claim", |s| s.staking.claim(&mut s.rebasing, recipient))
    }

    /// Stake then claim in one call.
    pub fn stake_and_claim(&mut self, caller: &Address, amount: Amount, recipient: &Address) -> Result<Amount, UsvError> {
        self.execute("stake_and_claim", |s| {
            let block = s.block;
            let (staking, mut ctx) = s.epoch_context();
            staking.stake_and_claim(&mut ctx, caller, amount, recipient, block)
        })
    }

    pub fn forfeit(&mut self, caller: &Address) -> Result<Amount, UsvError> {
        self.execute("forfeit", |s| {
            s.staking.forfeit(&mut s.rebasing, &mut s.assets, caller)
        })
    }

    pub fn toggle_deposit_lock(&mut self, caller: &Address) -> Result<bool, UsvError> {
        self.execute("toggle_deposit_lock", |s| Ok(s.staking.toggle_deposit_lock(caller)))
    }

    pub fn unstake(&mut self, caller: &Address, amount: Amount, trigger: bool) -> Result<(), UsvError> {
        self.execute("unstake", |s| {
            let block = s.block;
            let (staking, mut ctx) = s.epoch_context();
            staking.unstake(&mut ctx, caller, amount, trigger, block)
        })
    }

    pub fn set_warmup(&mut self, caller: &Address, epochs: u64) -> Result<(), UsvError> {
        self.execute("set_warmup", |s| s.staking.set_warmup(caller, epochs))
    }

    pub fn epoch(&self) -> &Epoch {
        self.state.staking.epoch()
    }

    pub fn warmup_info(&self, recipient: &Address) -> Option<&WarmupClaim> {
        self.state.staking.warmup_info(recipient)
    }

    /// Current sUSV index.
    pub fn index(&self) -> Amount {
        self.state.rebasing.index()
    }

    pub fn contract_balance(&self) -> Amount {
        self.state.staking.contract_balance(&self.state.assets)
    }

    pub fn circulating_supply(&self) -> Amount {
        self.state.rebasing.circulating_supply()
    }

    pub fn rebases(&self) -> &[RebaseRecord] {
        self.state.rebasing.rebases()
    }

    // ---------------------------------------------------------------------
    // Distributor
    // ---------------------------------------------------------------------

    /// Trigger distribution directly. Only the staking account may call.
    pub fn distribute(&mut self, caller: &Address) -> Result<bool, UsvError> {
        self.execute("distribute", |s| {
            s.distributor
                .distribute(&mut s.treasury, &mut s.assets, caller, s.block)
        })
    }

    pub fn add_recipient(&mut self, caller: &Address, recipient: &Address, rate: u128) -> Result<usize, UsvError> {
        self.execute("add_recipient", |s| s.distributor.add_recipient(caller, recipient, rate))
    }

    pub fn remove_recipient(&mut self, caller: &Address, index: usize, recipient: &Address) -> Result<(), UsvError> {
        self.execute("remove_recipient", |s| {
            s.distributor.remove_recipient(caller, index, recipient)
        })
    }

    pub fn set_reward_adjustment(
        &mut self,
        caller: &Address,
        index: usize,
        add: bool,
        rate: u128,
        target: u128,
    ) -> Result<(), UsvError> {
        self.execute("set_reward_adjustment", |s| {
            s.distributor.set_adjustment(caller, index, add, rate, target)
        })
    }

    pub fn next_reward_at(&self, rate: u128) -> Amount {
        self.state.distributor.next_reward_at(&self.state.assets, rate)
    }

    pub fn next_reward_for(&self, recipient: &Address) -> Amount {
        self.state.distributor.next_reward_for(&self.state.assets, recipient)
    }
}
