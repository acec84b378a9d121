//! # PeerLend Ledger
//!
//! Loan lifecycle and accounting engine for peer-to-peer lending.
//!
//! ## Components
//!
//! - **Ledger**: authoritative loan table and lifecycle state machine
//! - **Escrow**: value-transfer capability the ledger settles through
//! - **Index**: borrower, lender and availability queries
//! - **Reports**: portfolio summaries and repayment schedules
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LoanLedger                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐ │
//! │  │  Loan gates │  │  LoanBook   │  │   EscrowGateway     │ │
//! │  │ (per-loan   │──│ (loans +    │──│ (transfer, then     │ │
//! │  │  mutex)     │  │  LoanIndex) │  │  commit)            │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use peerlend_common::{Amount, LoanStatus, PartyId};
//! use peerlend_ledger::LoanLedger;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (ledger, escrow) = LoanLedger::standalone();
//! let borrower = PartyId::from("0xborrower");
//! let lender = PartyId::from("0xlender");
//! escrow.deposit(&lender, Amount::new(1_000)).unwrap();
//!
//! let id = ledger.request_loan(borrower, Amount::new(1_000), 12, 12).unwrap();
//! let receipt = ledger.fund_loan(&lender, id, Amount::new(1_000)).await.unwrap();
//! assert_eq!(receipt.loan.status, LoanStatus::Funded);
//! # });
//! ```

pub mod config;
pub mod escrow;
pub mod index;
pub mod ledger;
pub mod reports;

pub use config::LedgerConfig;
pub use escrow::{EscrowGateway, InMemoryEscrow, TransferReceipt};
pub use index::LoanIndex;
pub use ledger::{FundingReceipt, LoanLedger, OverdueOutcome, PaymentReceipt};
pub use reports::{PartyRole, PartySummary, RepaymentSchedule};

/// PeerLend ledger version
pub const LEDGER_VERSION: &str = env!("CARGO_PKG_VERSION");
