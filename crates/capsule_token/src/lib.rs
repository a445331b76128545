#![forbid(unsafe_code)]
#![deny(
    warnings,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

//! Capsule token — the capped, mintable, ownable fungible ledger underneath
//! claim settlement.
//!
//! The full cap is minted to a vault account at construction, so the supply
//! ceiling is reached on day one; later mints only become possible if supply
//! ever drops below the cap. Transfers are atomic debit/credit pairs and the
//! ledger reports balance shortfalls without mutating anything, which is the
//! contract `capsule_claims` settlement relies on.

use std::collections::BTreeMap;

use capsule_claims::TokenLedger;
use capsule_primitives::Address;
use thiserror::Error;

/// Decimal scaling of the token: raw units per whole token.
pub const TOKEN_DECIMALS: u32 = 18;
pub const UNITS_PER_TOKEN: u128 = 10u128.pow(TOKEN_DECIMALS);
/// Supply ceiling, in whole tokens.
pub const TOKEN_CAP_WHOLE: u128 = 2_500_000_000;
/// Supply ceiling, in raw units.
pub const TOKEN_CAP: u128 = TOKEN_CAP_WHOLE * UNITS_PER_TOKEN;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("caller is not the owner")]
    NotOwner,

    #[error("mint would exceed cap: {attempted} > {cap}")]
    CapExceeded { cap: u128, attempted: u128 },

    #[error("insufficient balance: {balance} < {needed}")]
    InsufficientBalance { balance: u128, needed: u128 },
}

/// Account ledger with a fixed supply cap and an owner-gated mint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CappedToken {
    owner: Address,
    cap: u128,
    total_supply: u128,
    balances: BTreeMap<Address, u128>,
}

impl CappedToken {
    /// Deploy the token: the full cap is minted to `vault`.
    #[must_use]
    pub fn new(owner: Address, vault: Address) -> Self {
        Self::with_initial_supply(owner, vault, TOKEN_CAP)
    }

    /// Deploy with `initial` raw units minted to `vault` (`initial` must not
    /// exceed the cap). Leaves headroom for later owner mints.
    #[must_use]
    pub fn with_initial_supply(owner: Address, vault: Address, initial: u128) -> Self {
        assert!(initial <= TOKEN_CAP, "initial supply above cap");
        let mut balances = BTreeMap::new();
        balances.insert(vault, initial);
        Self {
            owner,
            cap: TOKEN_CAP,
            total_supply: initial,
            balances,
        }
    }

    #[must_use]
    pub const fn owner(&self) -> Address {
        self.owner
    }

    #[must_use]
    pub const fn cap(&self) -> u128 {
        self.cap
    }

    #[must_use]
    pub const fn total_supply(&self) -> u128 {
        self.total_supply
    }

    #[must_use]
    pub const fn decimals() -> u32 {
        TOKEN_DECIMALS
    }

    #[must_use]
    pub fn balance_of(&self, who: Address) -> u128 {
        self.balances.get(&who).copied().unwrap_or(0)
    }

    /// Owner-gated mint, bounded by the cap. Supply is unchanged on any
    /// rejection.
    pub fn mint(&mut self, caller: Address, to: Address, amount: u128) -> Result<(), TokenError> {
        if caller != self.owner {
            return Err(TokenError::NotOwner);
        }
        // Saturation can only over-report `attempted`, and any saturated
        // value already exceeds the cap.
        let attempted = self.total_supply.saturating_add(amount);
        if attempted > self.cap {
            return Err(TokenError::CapExceeded {
                cap: self.cap,
                attempted,
            });
        }
        *self.balances.entry(to).or_default() += amount;
        self.total_supply = attempted;
        Ok(())
    }

    /// Atomic debit/credit. Rejects on shortfall with no state change.
    pub fn transfer(&mut self, from: Address, to: Address, amount: u128) -> Result<(), TokenError> {
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(TokenError::InsufficientBalance {
                balance,
                needed: amount,
            });
        }
        *self.balances.entry(from).or_default() = balance - amount;
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }
}

impl TokenLedger for CappedToken {
    type Error = TokenError;

    fn transfer(&mut self, from: Address, to: Address, amount: u128) -> Result<(), TokenError> {
        Self::transfer(self, from, to, amount)
    }
}
