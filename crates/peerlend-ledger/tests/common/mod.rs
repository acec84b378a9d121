//! Shared harness for ledger integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use peerlend_common::{Amount, LoanId, ManualClock, PartyId};
use peerlend_ledger::{InMemoryEscrow, LedgerConfig, LoanLedger};

/// Ledger, rail and clock wired together
pub struct TestHarness {
    pub ledger: Arc<LoanLedger>,
    pub escrow: Arc<InMemoryEscrow>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(start()));
        let (ledger, escrow) = LoanLedger::in_memory(config, clock.clone());
        Self {
            ledger: Arc::new(ledger),
            escrow,
            clock,
        }
    }

    /// Give a party spendable balance
    pub fn fund_wallet(&self, party: &PartyId, units: u128) {
        self.escrow
            .deposit(party, Amount::new(units))
            .expect("deposit");
    }

    /// Request and fund a loan in one step
    pub async fn funded_loan(
        &self,
        borrower: &PartyId,
        lender: &PartyId,
        principal: u128,
        rate: u32,
        months: u32,
    ) -> LoanId {
        self.fund_wallet(lender, principal);
        let id = self
            .ledger
            .request_loan(borrower.clone(), Amount::new(principal), rate, months)
            .expect("request");
        self.ledger
            .fund_loan(lender, id, Amount::new(principal))
            .await
            .expect("fund");
        id
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
}

pub fn borrower() -> PartyId {
    PartyId::from("0xb0770we4")
}

pub fn lender() -> PartyId {
    PartyId::from("0x1e4de4")
}

/// Install a test subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
