// crates/usv-economics/src/ledger.rs
//
// In-process ERC-20 style asset ledgers.
//
// USV, reserve tokens (DAI, FRAX, ...) and liquidity-pool tokens are all
// modelled as a `TokenLedger`: balances, allowances, decimals, and a single
// authorized minter. USV's minter is the treasury (the "vault"); nothing
// else can create USV.
//
// `AssetBank` owns every ledger the protocol touches, keyed by asset address.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::token::{Amount, MAX_DECIMALS};
use usv_core::error::UsvError;
use usv_core::identity::Address;
use usv_core::traits::AssetLedger;

/// Balances and allowances for a single fungible asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLedger {
    /// Ticker, used only for logging.
    pub symbol: String,
    decimals: u8,
    total_supply: Amount,
    /// The only account allowed to mint. `None` means fixed supply.
    minter: Option<Address>,
    balances: BTreeMap<Address, Amount>,
    /// owner -> spender -> remaining allowance.
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

impl TokenLedger {
    /// Create an empty ledger.
    pub fn new(symbol: &str, decimals: u8, minter: Option<Address>) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            total_supply: 0,
            minter,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
        }
    }

    /// Current minter, if any.
    pub fn minter(&self) -> Option<Address> {
        self.minter
    }

    /// Create `amount` new units for `to`. Only the minter may call.
    pub fn mint(&mut self, caller: &Address, to: &Address, amount: Amount) -> Result<(), UsvError> {
        if self.minter != Some(*caller) {
            return Err(UsvError::PermissionDenied {
                required: format!("{} minter", self.symbol),
                subject: *caller,
            });
        }
        let new_supply = self.total_supply.checked_add(amount).ok_or_else(|| {
            UsvError::Overflow(format!("{} total supply", self.symbol))
        })?;
        self.total_supply = new_supply;
        *self.balances.entry(*to).or_insert(0) += amount;
        Ok(())
    }

    /// Destroy `amount` units held by `from`.
    pub fn burn(&mut self, from: &Address, amount: Amount) -> Result<(), UsvError> {
        self.debit(from, amount)?;
        self.total_supply -= amount;
        Ok(())
    }

    /// Destroy `amount` units held by `from`, spending `spender`'s allowance.
    ///
    /// The allowance is checked before the balance.
    pub fn burn_from(&mut self, spender: &Address, from: &Address, amount: Amount) -> Result<(), UsvError> {
        let remaining = self.checked_allowance(from, spender, amount)?;
        self.check_balance(from, amount)?;
        self.set_allowance(from, spender, remaining);
        self.burn(from, amount)
    }

    fn check_balance(&self, holder: &Address, amount: Amount) -> Result<(), UsvError> {
        let available = self.balance_of(holder);
        if available < amount {
            return Err(UsvError::InsufficientBalance {
                holder: *holder,
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    fn checked_allowance(
        &self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<Amount, UsvError> {
        let available = self.allowance(owner, spender);
        if available < amount {
            return Err(UsvError::InsufficientAllowance {
                owner: *owner,
                spender: *spender,
                available,
                requested: amount,
            });
        }
        Ok(available - amount)
    }

    fn set_allowance(&mut self, owner: &Address, spender: &Address, amount: Amount) {
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

    fn debit(&mut self, holder: &Address, amount: Amount) -> Result<(), UsvError> {
        self.check_balance(holder, amount)?;
        let remaining = self.balance_of(holder) - amount;
        if remaining == 0 {
            self.balances.remove(holder);
        } else {
            self.balances.insert(*holder, remaining);
        }
        Ok(())
    }
}

impl AssetLedger for TokenLedger {
    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn total_supply(&self) -> Amount {
        self.total_supply
    }

    fn balance_of(&self, holder: &Address) -> Amount {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or(0)
    }

    fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        self.set_allowance(owner, spender, amount);
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), UsvError> {
        self.debit(from, amount)?;
        *self.balances.entry(*to).or_insert(0) += amount;
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), UsvError> {
        let remaining = self.checked_allowance(from, spender, amount)?;
        self.check_balance(from, amount)?;
        self.set_allowance(from, spender, remaining);
        self.transfer(from, to, amount)
    }
}

/// Every asset ledger known to the protocol, keyed by asset address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBank {
    /// Address of the USV ledger.
    primary: Address,
    ledgers: BTreeMap<Address, TokenLedger>,
}

impl AssetBank {
    /// Create a bank holding only the USV ledger.
    pub fn new(primary: Address, usv: TokenLedger) -> Self {
        let mut ledgers = BTreeMap::new();
        ledgers.insert(primary, usv);
        Self { primary, ledgers }
    }

    /// Add a new asset ledger.
    ///
    /// # Errors
    /// Returns `UsvError::InvalidState` if the address is already listed.
    pub fn list(&mut self, id: Address, ledger: TokenLedger) -> Result<(), UsvError> {
        if self.ledgers.contains_key(&id) {
            return Err(UsvError::InvalidState(format!("Asset {} already listed", id)));
        }
        if ledger.decimals() > MAX_DECIMALS {
            return Err(UsvError::InvalidState(format!(
                "Asset {} declares {} decimals, at most {} supported",
                id,
                ledger.decimals(),
                MAX_DECIMALS
            )));
        }
        self.ledgers.insert(id, ledger);
        Ok(())
    }

    /// Whether a ledger exists for `id`.
    pub fn contains(&self, id: &Address) -> bool {
        self.ledgers.contains_key(id)
    }

    pub fn get(&self, id: &Address) -> Result<&TokenLedger, UsvError> {
        self.ledgers
            .get(id)
            .ok_or_else(|| UsvError::NotFound(format!("asset ledger {}", id)))
    }

    pub fn get_mut(&mut self, id: &Address) -> Result<&mut TokenLedger, UsvError> {
        self.ledgers
            .get_mut(id)
            .ok_or_else(|| UsvError::NotFound(format!("asset ledger {}", id)))
    }

    /// The USV ledger.
    pub fn usv(&self) -> &TokenLedger {
        // The primary ledger is inserted at construction and never removed.
        &self.ledgers[&self.primary]
    }

    pub fn usv_mut(&mut self) -> &mut TokenLedger {
        self.ledgers
            .get_mut(&self.primary)
            .unwrap_or_else(|| unreachable!("primary ledger is inserted at construction"))
    }

    /// Iterate over all listed assets.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &TokenLedger)> {
        self.ledgers.iter()
    }
}
