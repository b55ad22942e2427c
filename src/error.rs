// Ledger errors
//
// Every core operation either completes or returns one of these values with
// all state left exactly as it was before the call.

use crate::money::Money;
use thiserror::Error;

/// Fixed message carried by [`LedgerError::InsufficientFunds`]
pub const INSUFFICIENT_FUNDS_MESSAGE: &str = "insufficient funds";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// A debit would leave the balance below zero
    #[error("insufficient funds")]
    InsufficientFunds { balance: Money, requested: Money },

    /// Debit, credit and transfer amounts must not be negative
    #[error("invalid amount {0}: amount must not be negative")]
    InvalidAmount(Money),

    /// The account already belongs to another live bank
    #[error("account '{owner}' already belongs to bank '{bank}'")]
    AccountAlreadyInBank { owner: String, bank: String },

    #[error("amount out of range")]
    Overflow,

    #[error("invalid monetary value: '{0}'")]
    InvalidMoney(String),
}

impl LedgerError {
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, LedgerError::InsufficientFunds { .. })
    }
}

/// Result alias for core operations
pub type LedgerResult<T> = Result<T, LedgerError>;
