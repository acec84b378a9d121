//! Wallet - Spendable balance of a party
//!
//! Wallets back the in-memory escrow gateway. They hold a single available
//! balance in base units and never go negative.
//! - Credits and debits must be positive
//! - Every mutation bumps `version`

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::amount::Amount;
use crate::types::party::PartyId;

/// Wallet operation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Insufficient available balance: required {required}, available {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Balance overflow")]
    Overflow,
}

/// Balance held by one party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub owner: PartyId,

    /// Spendable balance in base units
    pub available: Amount,

    /// Bumped on every successful mutation
    pub version: u64,
}

impl Wallet {
    /// Create an empty wallet
    pub fn new(owner: PartyId) -> Self {
        Self {
            owner,
            available: Amount::ZERO,
            version: 0,
        }
    }

    /// Create a wallet with an opening balance
    pub fn with_balance(owner: PartyId, initial_balance: Amount) -> Self {
        let mut wallet = Self::new(owner);
        wallet.available = initial_balance;
        wallet
    }

    /// Add funds
    pub fn credit(&mut self, amount: Amount) -> Result<(), WalletError> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount);
        }

        self.available = self
            .available
            .checked_add(amount)
            .ok_or(WalletError::Overflow)?;
        self.touch();
        Ok(())
    }

    /// Remove funds from the available balance
    pub fn debit(&mut self, amount: Amount) -> Result<(), WalletError> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount);
        }

        self.available = self
            .available
            .checked_sub(amount)
            .ok_or(WalletError::InsufficientBalance {
                required: amount,
                available: self.available,
            })?;
        self.touch();
        Ok(())
    }

    /// Move funds to another wallet.
    ///
    /// Both sides are checked before either is touched, so a failure leaves
    /// both wallets unchanged.
    pub fn pay_to(&mut self, amount: Amount, recipient: &mut Wallet) -> Result<(), WalletError> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount);
        }
        if self.available < amount {
            return Err(WalletError::InsufficientBalance {
                required: amount,
                available: self.available,
            });
        }
        if recipient.available.checked_add(amount).is_none() {
            return Err(WalletError::Overflow);
        }

        self.debit(amount)?;
        recipient.credit(amount)
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

impl std::fmt::Display for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Wallet({}, available={})", self.owner, self.available)
    }
}
