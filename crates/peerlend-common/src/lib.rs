//! # PeerLend Common
//!
//! Shared money, time, loan and credit types for the PeerLend loan engine.
//!
//! ## Core Types
//!
//! - [`Amount`]: exact integer value in base units
//! - [`PartyId`]: opaque borrower/lender address
//! - [`Loan`]/[`LoanTerms`]: loan record, derived quantities and state transitions
//! - [`CreditReport`]: 0-1000 credit score of a loan history
//! - [`Wallet`]: party balance used by the in-memory escrow
//! - [`Clock`]: injectable time source

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{LedgerError, Result, TransferError};
pub use types::{
    amount::{Amount, PRINCIPAL_CEILING},
    clock::{add_months, Clock, ManualClock, SystemClock},
    credit_score::{CreditBand, CreditComponents, CreditReport},
    loan::{Loan, LoanId, LoanStatus, LoanTerms, Operation, MAX_INTEREST_RATE_PERCENT},
    party::PartyId,
    wallet::{Wallet, WalletError},
};

/// PeerLend version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum credit score value
pub const MAX_CREDIT_SCORE: u16 = types::credit_score::MAX_SCORE;

/// Minimum credit score value
pub const MIN_CREDIT_SCORE: u16 = types::credit_score::MIN_SCORE;

/// Longest loan term offered by default, in months
pub const DEFAULT_MAX_DURATION_MONTHS: u32 = 60;
