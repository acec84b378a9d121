//! Error types for PeerLend
//!
//! [`LedgerError`] is the whole failure taxonomy of the loan engine. Every
//! variant is local and non-retryable by the ledger itself.

use thiserror::Error;

use crate::types::amount::Amount;
use crate::types::loan::{LoanId, LoanStatus, Operation};
use crate::types::party::PartyId;
use crate::types::wallet::WalletError;

/// Result type alias using LedgerError
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Unified error type for ledger operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Malformed request parameters, rejected before any state change
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Loan not found: {0}")]
    NotFound(LoanId),

    #[error("Cannot {operation} loan {loan_id} in status {status}")]
    InvalidState {
        loan_id: LoanId,
        status: LoanStatus,
        operation: Operation,
    },

    #[error("Party {party} is not authorized to {operation} loan {loan_id}")]
    NotAuthorized {
        party: PartyId,
        loan_id: LoanId,
        operation: Operation,
    },

    #[error("Amount mismatch: expected {expected}, supplied {supplied}")]
    AmountMismatch { expected: Amount, supplied: Amount },

    /// The escrow gateway declined or could not complete the movement.
    /// Never accompanied by a committed state change.
    #[error("Transfer failed: {0}")]
    TransferFailed(#[from] TransferError),
}

/// Value transfer errors reported by an escrow gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Transfer amount must be positive")]
    InvalidAmount,

    #[error("Source and destination are the same party: {0}")]
    SelfTransfer(PartyId),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Transfer declined: {0}")]
    Declined(String),
}

impl From<WalletError> for TransferError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InvalidAmount => TransferError::InvalidAmount,
            WalletError::InsufficientBalance {
                required,
                available,
            } => TransferError::InsufficientFunds {
                required,
                available,
            },
            WalletError::Overflow => TransferError::Declined("balance overflow".to_string()),
        }
    }
}
