//! Loan Ledger
//!
//! Owns the authoritative loan table and its index, and drives every loan
//! through the lifecycle state machine.
//!
//! Mutations follow one protocol:
//!
//! 1. take the loan's gate (one writer per loan, bounded wait)
//! 2. validate against committed state and build a draft of the new loan
//! 3. move value through the escrow gateway, if the operation moves value
//! 4. commit the draft and update the index in one short write section
//!
//! Steps 1 to 4 of funding and payment run on a spawned task, so a caller
//! that stops waiting cannot leave a settled transfer uncommitted. A loan
//! that reaches a terminal status drops its gate.
//!
//! A failed step leaves the committed loan exactly as it was. Readers only
//! ever see committed state, so a gateway that reads the ledger while a
//! transfer is in flight observes the loan as it was before the call.

mod gate;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn, Instrument};

use peerlend_common::{
    Amount, Clock, CreditReport, LedgerError, Loan, LoanId, LoanStatus, LoanTerms, Operation,
    PartyId, Result, SystemClock,
};

use crate::config::LedgerConfig;
use crate::escrow::{EscrowGateway, InMemoryEscrow, TransferReceipt};
use crate::index::LoanIndex;
use crate::reports::{PartyRole, PartySummary, RepaymentSchedule};

use gate::LoanGates;

/// Result of a successful funding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingReceipt {
    /// Committed loan after funding
    pub loan: Loan,
    pub transfer: TransferReceipt,
}

/// Result of a successful installment payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// Committed loan after the payment
    pub loan: Loan,
    /// 1-based number of the installment just paid
    pub installment_number: u32,
    /// Value moved from payer to lender
    pub charged: Amount,
    /// Part of the supplied value that was never moved
    pub refunded: Amount,
    pub transfer: TransferReceipt,
}

/// Outcome of an overdue check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverdueOutcome {
    /// The loan was overdue and is now defaulted
    Defaulted(Loan),
    /// Funded and within its current installment window
    NotDue { next_due: Option<DateTime<Utc>> },
    /// Not funded, nothing to check
    NotApplicable(LoanStatus),
}

impl OverdueOutcome {
    pub fn is_defaulted(&self) -> bool {
        matches!(self, OverdueOutcome::Defaulted(_))
    }
}

/// Committed state: the loan table and its index
#[derive(Debug, Default)]
struct LoanBook {
    loans: BTreeMap<LoanId, Loan>,
    index: LoanIndex,
    next_id: u64,
}

impl LoanBook {
    fn commit(&mut self, next: Loan) {
        let previous = self.loans.insert(next.id, next.clone());
        self.index.apply(previous.as_ref(), &next);
    }

    fn collect(&self, ids: Vec<LoanId>) -> Vec<Loan> {
        ids.iter()
            .filter_map(|id| self.loans.get(id).cloned())
            .collect()
    }
}

/// Engine state shared with detached settlement tasks
struct LedgerCore {
    config: LedgerConfig,
    escrow: Arc<dyn EscrowGateway>,
    clock: Arc<dyn Clock>,
    book: RwLock<LoanBook>,
    gates: LoanGates,
}

/// Peer-to-peer loan ledger
pub struct LoanLedger {
    core: Arc<LedgerCore>,
}

impl LoanLedger {
    /// Create a ledger over an escrow gateway and a clock
    pub fn new(config: LedgerConfig, escrow: Arc<dyn EscrowGateway>, clock: Arc<dyn Clock>) -> Self {
        let gates = LoanGates::new(config.gate_timeout());
        Self {
            core: Arc::new(LedgerCore {
                config,
                escrow,
                clock,
                book: RwLock::new(LoanBook {
                    next_id: 1,
                    ..Default::default()
                }),
                gates,
            }),
        }
    }

    /// Create a ledger settling through a fresh in-memory escrow (for testing
    /// and embedding). The escrow shares the ledger's clock.
    pub fn in_memory(config: LedgerConfig, clock: Arc<dyn Clock>) -> (Self, Arc<InMemoryEscrow>) {
        let escrow = Arc::new(InMemoryEscrow::with_clock(clock.clone()));
        let ledger = Self::new(config, escrow.clone(), clock);
        (ledger, escrow)
    }

    /// In-memory ledger on the wall clock with default limits
    pub fn standalone() -> (Self, Arc<InMemoryEscrow>) {
        Self::in_memory(LedgerConfig::default(), Arc::new(SystemClock))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.core.config
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Open a new loan request. No value moves.
    #[instrument(skip_all, fields(borrower = %borrower, principal = %principal))]
    pub fn request_loan(
        &self,
        borrower: PartyId,
        principal: Amount,
        annual_interest_rate_percent: u32,
        duration_months: u32,
    ) -> Result<LoanId> {
        if let Err(err) = self.core.check_request(
            &borrower,
            principal,
            annual_interest_rate_percent,
            duration_months,
        ) {
            return reject(err);
        }
        let terms = match LoanTerms::new(principal, annual_interest_rate_percent, duration_months) {
            Ok(terms) => terms,
            Err(err) => return reject(err),
        };

        let now = self.core.clock.now();
        let mut book = self.core.book.write();
        let id = LoanId::new(book.next_id);
        book.next_id += 1;
        book.commit(Loan::new_request(id, borrower, terms, now));
        drop(book);

        info!(
            loan_id = %id,
            rate = annual_interest_rate_percent,
            months = duration_months,
            "Loan requested"
        );
        Ok(id)
    }

    /// Fund a requested loan with exactly its principal.
    ///
    /// The principal moves lender to borrower before the loan is committed
    /// as `Funded`; a failed transfer leaves the request open. Once started,
    /// the transfer and the commit run to completion even if the returned
    /// future is dropped.
    #[instrument(skip_all, fields(loan_id = %loan_id, lender = %lender, supplied = %supplied))]
    pub async fn fund_loan(
        &self,
        lender: &PartyId,
        loan_id: LoanId,
        supplied: Amount,
    ) -> Result<FundingReceipt> {
        let core = self.core.clone();
        let lender = lender.clone();
        self.detached(loan_id, Operation::Fund, async move {
            core.fund(&lender, loan_id, supplied).await
        })
        .await
    }

    /// Pay the next installment of a funded loan.
    ///
    /// `supplied` must cover the next installment. Only the installment
    /// amount moves payer to lender; any excess is reported back as
    /// `refunded`. Paying the final installment repays the loan. Like
    /// funding, a started payment is committed even if the caller goes away.
    #[instrument(skip_all, fields(loan_id = %loan_id, payer = %payer, supplied = %supplied))]
    pub async fn pay_installment(
        &self,
        payer: &PartyId,
        loan_id: LoanId,
        supplied: Amount,
    ) -> Result<PaymentReceipt> {
        let core = self.core.clone();
        let payer = payer.clone();
        self.detached(loan_id, Operation::PayInstallment, async move {
            core.pay(&payer, loan_id, supplied).await
        })
        .await
    }

    /// Withdraw an unfunded request. Only its borrower may do this.
    #[instrument(skip_all, fields(loan_id = %loan_id, caller = %caller))]
    pub async fn remove_loan(&self, caller: &PartyId, loan_id: LoanId) -> Result<Loan> {
        self.core.remove(caller, loan_id).await
    }

    /// Default a funded loan whose current installment deadline is before
    /// `now`. Idempotent; anyone may call it.
    #[instrument(skip_all, fields(loan_id = %loan_id, now = %now))]
    pub async fn mark_overdue_if_applicable(
        &self,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> Result<OverdueOutcome> {
        self.core.mark_overdue(loan_id, now).await
    }

    /// Run the overdue check at the clock's current time over every funded
    /// loan. Returns the ids that were defaulted by this sweep.
    #[instrument(skip(self))]
    pub async fn sweep_overdue(&self) -> Vec<LoanId> {
        let now = self.core.clock.now();
        let candidates: Vec<LoanId> = self
            .core
            .book
            .read()
            .loans
            .values()
            .filter(|loan| loan.is_overdue(now))
            .map(|loan| loan.id)
            .collect();

        let mut defaulted = Vec::new();
        for loan_id in candidates {
            match self.core.mark_overdue(loan_id, now).await {
                Ok(outcome) if outcome.is_defaulted() => defaulted.push(loan_id),
                Ok(_) => {}
                Err(e) => warn!(loan_id = %loan_id, error = %e, "Overdue check skipped"),
            }
        }

        if !defaulted.is_empty() {
            info!(count = defaulted.len(), "Overdue sweep defaulted loans");
        }
        defaulted
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.core.get_loan(loan_id)
    }

    /// Loans requested by `party`, ordered by id
    pub fn get_loans_by_borrower(&self, party: &PartyId) -> Vec<Loan> {
        let book = self.core.book.read();
        book.collect(book.index.borrowed_by(party))
    }

    /// Loans funded by `party`, ordered by id
    pub fn get_loans_by_lender(&self, party: &PartyId) -> Vec<Loan> {
        let book = self.core.book.read();
        book.collect(book.index.lent_by(party))
    }

    /// Loans open for funding, ordered by id
    pub fn get_available_loans(&self) -> Vec<Loan> {
        let book = self.core.book.read();
        book.collect(book.index.available())
    }

    pub fn get_all_loans(&self) -> Vec<Loan> {
        self.core.book.read().loans.values().cloned().collect()
    }

    pub fn loan_count(&self) -> usize {
        self.core.book.read().loans.len()
    }

    /// Credit score of `party` over the loans it borrowed
    pub fn get_credit_score(&self, party: &PartyId) -> u16 {
        self.credit_report(party).score
    }

    pub fn credit_report(&self, party: &PartyId) -> CreditReport {
        CreditReport::from_loans(&self.get_loans_by_borrower(party))
    }

    /// Portfolio summary of `party` as borrower or as lender
    pub fn party_summary(&self, party: &PartyId, role: PartyRole) -> PartySummary {
        let loans = match role {
            PartyRole::Borrower => self.get_loans_by_borrower(party),
            PartyRole::Lender => self.get_loans_by_lender(party),
        };
        PartySummary::for_party(party, role, &loans)
    }

    /// Repayment position of a loan at the clock's current time
    pub fn repayment_schedule(&self, loan_id: LoanId) -> Result<RepaymentSchedule> {
        let loan = self.get_loan(loan_id)?;
        Ok(RepaymentSchedule::for_loan(&loan, self.core.clock.now()))
    }

    /// Copy of the incrementally maintained index
    pub fn index_snapshot(&self) -> LoanIndex {
        self.core.book.read().index.clone()
    }

    /// Rebuild the index from the loan table and swap it in.
    ///
    /// Returns `true` if the live index had drifted from the table.
    pub fn rebuild_index(&self) -> bool {
        let mut book = self.core.book.write();
        let rebuilt = LoanIndex::rebuild(book.loans.values());
        let drifted = rebuilt != book.index;
        if drifted {
            warn!("Loan index drifted from loan table, replaced");
        }
        book.index = rebuilt;
        drifted
    }

    /// Run a value-moving mutation on its own task so that dropping the
    /// caller's future cannot separate a settled transfer from its commit.
    async fn detached<T, F>(&self, loan_id: LoanId, operation: Operation, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match tokio::spawn(task.in_current_span()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {
                // Runtime shutting down
                let loan = self.get_loan(loan_id)?;
                Err(invalid_state(&loan, operation))
            }
        }
    }
}

impl LedgerCore {
    async fn fund(&self, lender: &PartyId, loan_id: LoanId, supplied: Amount) -> Result<FundingReceipt> {
        if lender.as_str().is_empty() {
            return reject(LedgerError::InvalidArgument(
                "lender address is empty".to_string(),
            ));
        }
        let (_gate, loan) = self.enter(loan_id, Operation::Fund).await?;

        if loan.status != LoanStatus::Requested {
            return reject(invalid_state(&loan, Operation::Fund));
        }
        if &loan.borrower == lender {
            return reject(LedgerError::NotAuthorized {
                party: lender.clone(),
                loan_id,
                operation: Operation::Fund,
            });
        }
        if supplied != loan.principal() {
            return reject(LedgerError::AmountMismatch {
                expected: loan.principal(),
                supplied,
            });
        }

        let draft = loan.funded(lender.clone(), self.clock.now())?;
        let transfer = self.move_value(lender, &loan.borrower, supplied).await?;

        self.commit(draft.clone());
        info!(loan_id = %loan_id, transfer_id = %transfer.id, "Loan funded");

        Ok(FundingReceipt {
            loan: draft,
            transfer,
        })
    }

    async fn pay(&self, payer: &PartyId, loan_id: LoanId, supplied: Amount) -> Result<PaymentReceipt> {
        let (_gate, loan) = self.enter(loan_id, Operation::PayInstallment).await?;

        if loan.status != LoanStatus::Funded {
            return reject(invalid_state(&loan, Operation::PayInstallment));
        }
        if &loan.borrower != payer {
            return reject(LedgerError::NotAuthorized {
                party: payer.clone(),
                loan_id,
                operation: Operation::PayInstallment,
            });
        }
        let (Some(expected), Some(lender)) = (loan.next_installment_amount(), loan.lender.clone())
        else {
            return reject(invalid_state(&loan, Operation::PayInstallment));
        };
        if supplied < expected {
            return reject(LedgerError::AmountMismatch { expected, supplied });
        }

        let draft = loan.with_installment(expected, self.clock.now())?;
        let transfer = self.move_value(payer, &lender, expected).await?;

        self.commit(draft.clone());
        info!(
            loan_id = %loan_id,
            installment = draft.installments_paid,
            of = draft.duration_months(),
            amount = %expected,
            status = %draft.status,
            "Installment paid"
        );

        Ok(PaymentReceipt {
            installment_number: draft.installments_paid,
            loan: draft,
            charged: expected,
            refunded: supplied.saturating_sub(expected),
            transfer,
        })
    }

    async fn remove(&self, caller: &PartyId, loan_id: LoanId) -> Result<Loan> {
        let (_gate, loan) = self.enter(loan_id, Operation::Remove).await?;

        if loan.status != LoanStatus::Requested {
            return reject(invalid_state(&loan, Operation::Remove));
        }
        if &loan.borrower != caller {
            return reject(LedgerError::NotAuthorized {
                party: caller.clone(),
                loan_id,
                operation: Operation::Remove,
            });
        }

        let draft = loan.removed(self.clock.now())?;
        self.commit(draft.clone());
        info!(loan_id = %loan_id, "Loan removed");
        Ok(draft)
    }

    async fn mark_overdue(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<OverdueOutcome> {
        let (_gate, loan) = self.enter(loan_id, Operation::MarkOverdue).await?;

        if loan.status != LoanStatus::Funded {
            return Ok(OverdueOutcome::NotApplicable(loan.status));
        }
        if !loan.is_overdue(now) {
            return Ok(OverdueOutcome::NotDue {
                next_due: loan.next_due_date(),
            });
        }

        let draft = loan.defaulted(now)?;
        self.commit(draft.clone());
        info!(
            loan_id = %loan_id,
            installments_paid = draft.installments_paid,
            "Loan defaulted"
        );
        Ok(OverdueOutcome::Defaulted(draft))
    }

    fn get_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.book
            .read()
            .loans
            .get(&loan_id)
            .cloned()
            .ok_or(LedgerError::NotFound(loan_id))
    }

    /// Replace the committed loan; a loan that reached a terminal status
    /// gives up its gate.
    fn commit(&self, next: Loan) {
        let retired = next.status.is_terminal().then_some(next.id);
        self.book.write().commit(next);
        if let Some(loan_id) = retired {
            self.gates.retire(loan_id);
        }
    }

    fn check_request(
        &self,
        borrower: &PartyId,
        principal: Amount,
        annual_interest_rate_percent: u32,
        duration_months: u32,
    ) -> Result<()> {
        if borrower.as_str().is_empty() {
            return Err(LedgerError::InvalidArgument(
                "borrower address is empty".to_string(),
            ));
        }
        if principal > Amount::from(self.config.max_principal) {
            return Err(LedgerError::InvalidArgument(format!(
                "principal {} exceeds limit {}",
                principal, self.config.max_principal
            )));
        }
        if annual_interest_rate_percent > self.config.max_interest_rate_percent {
            return Err(LedgerError::InvalidArgument(format!(
                "interest rate {}% exceeds limit {}%",
                annual_interest_rate_percent, self.config.max_interest_rate_percent
            )));
        }
        if duration_months > self.config.max_duration_months {
            return Err(LedgerError::InvalidArgument(format!(
                "duration {} months exceeds limit {} months",
                duration_months, self.config.max_duration_months
            )));
        }
        Ok(())
    }

    /// Become the loan's only writer and read its committed state.
    ///
    /// Terminal loans never change again, so they are returned without a
    /// gate.
    async fn enter(
        &self,
        loan_id: LoanId,
        operation: Operation,
    ) -> Result<(Option<OwnedMutexGuard<()>>, Loan)> {
        // Unknown ids never get a gate
        let loan = self.get_loan(loan_id)?;
        if loan.status.is_terminal() {
            return Ok((None, loan));
        }

        let Some(gate) = self.gates.acquire(loan_id).await else {
            let status = self.get_loan(loan_id)?.status;
            warn!(
                loan_id = %loan_id,
                operation = %operation,
                timeout_ms = self.config.gate_timeout_ms,
                "Loan busy, gave up waiting"
            );
            return Err(LedgerError::InvalidState {
                loan_id,
                status,
                operation,
            });
        };

        let loan = self.get_loan(loan_id)?;
        Ok((Some(gate), loan))
    }

    async fn move_value(
        &self,
        from: &PartyId,
        to: &PartyId,
        amount: Amount,
    ) -> Result<TransferReceipt> {
        self.escrow.transfer(from, to, amount).await.map_err(|e| {
            warn!(from = %from, to = %to, amount = %amount, error = %e, "Transfer failed");
            LedgerError::TransferFailed(e)
        })
    }
}

fn invalid_state(loan: &Loan, operation: Operation) -> LedgerError {
    LedgerError::InvalidState {
        loan_id: loan.id,
        status: loan.status,
        operation,
    }
}

fn reject<T>(err: LedgerError) -> Result<T> {
    debug!(error = %err, "Request rejected");
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use mockall::mock;
    use peerlend_common::{ManualClock, TransferError};

    mock! {
        pub Gateway {}

        #[async_trait]
        impl EscrowGateway for Gateway {
            async fn transfer(
                &self,
                from: &PartyId,
                to: &PartyId,
                amount: Amount,
            ) -> std::result::Result<TransferReceipt, TransferError>;
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn borrower() -> PartyId {
        PartyId::from("0xborrower")
    }

    fn lender() -> PartyId {
        PartyId::from("0xlender")
    }

    fn ledger_with(gateway: MockGateway) -> LoanLedger {
        LoanLedger::new(
            LedgerConfig::default(),
            Arc::new(gateway),
            Arc::new(ManualClock::new(t0())),
        )
    }

    fn accept_all() -> MockGateway {
        let mut gateway = MockGateway::new();
        gateway
            .expect_transfer()
            .returning(|from, to, amount| Ok(TransferReceipt::new(from.clone(), to.clone(), amount, t0())));
        gateway
    }

    #[test]
    fn test_request_assigns_sequential_ids() {
        let ledger = ledger_with(MockGateway::new());
        let a = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        let b = ledger.request_loan(borrower(), Amount::new(200), 5, 12).unwrap();

        assert_eq!(a, LoanId::new(1));
        assert_eq!(b, LoanId::new(2));
        let loan = ledger.get_loan(a).unwrap();
        assert_eq!(loan.status, LoanStatus::Requested);
        assert_eq!(loan.requested_at, t0());
        assert_eq!(loan.lender, None);
    }

    #[test]
    fn test_request_validation() {
        let ledger = ledger_with(MockGateway::new());
        let cases = [
            (Amount::ZERO, 10, 10),
            (Amount::new(100), 101, 10),
            (Amount::new(100), 10, 0),
            (Amount::new(100), 10, 61),
            (Amount::new(u64::MAX as u128 + 1), 10, 10),
            // 5 / 10 months floors to a zero installment
            (Amount::new(5), 0, 10),
        ];
        for (principal, rate, months) in cases {
            let result = ledger.request_loan(borrower(), principal, rate, months);
            assert!(
                matches!(result, Err(LedgerError::InvalidArgument(_))),
                "{principal} @ {rate}% x {months}"
            );
        }
        assert!(matches!(
            ledger.request_loan(PartyId::from(""), Amount::new(100), 10, 10),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(ledger.loan_count(), 0);
    }

    #[test]
    fn test_request_honours_configured_limits() {
        let config = LedgerConfig {
            max_duration_months: 12,
            max_interest_rate_percent: 20,
            max_principal: 1_000,
            ..Default::default()
        };
        let ledger = LoanLedger::new(
            config,
            Arc::new(MockGateway::new()),
            Arc::new(ManualClock::new(t0())),
        );

        assert!(ledger.request_loan(borrower(), Amount::new(1_000), 20, 12).is_ok());
        assert!(ledger.request_loan(borrower(), Amount::new(1_001), 20, 12).is_err());
        assert!(ledger.request_loan(borrower(), Amount::new(1_000), 21, 12).is_err());
        assert!(ledger.request_loan(borrower(), Amount::new(1_000), 20, 13).is_err());
    }

    #[tokio::test]
    async fn test_fund_moves_principal_to_borrower() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_transfer()
            .withf(|from, to, amount| {
                from.as_str() == "0xlender" && to.as_str() == "0xborrower" && amount.units() == 100
            })
            .times(1)
            .returning(|from, to, amount| Ok(TransferReceipt::new(from.clone(), to.clone(), amount, t0())));
        let ledger = ledger_with(gateway);
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();

        let receipt = ledger.fund_loan(&lender(), id, Amount::new(100)).await.unwrap();

        assert_eq!(receipt.loan.status, LoanStatus::Funded);
        assert_eq!(receipt.loan.lender, Some(lender()));
        assert_eq!(receipt.loan.start_time, Some(t0()));
        assert_eq!(ledger.get_loan(id).unwrap(), receipt.loan);
        assert!(ledger.get_available_loans().is_empty());
    }

    #[tokio::test]
    async fn test_failed_funding_transfer_leaves_loan_unchanged() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_transfer()
            .times(1)
            .returning(|_, _, _| Err(TransferError::Declined("rail offline".to_string())));
        let ledger = ledger_with(gateway);
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        let before = ledger.get_loan(id).unwrap();

        let result = ledger.fund_loan(&lender(), id, Amount::new(100)).await;

        assert!(matches!(result, Err(LedgerError::TransferFailed(_))));
        assert_eq!(ledger.get_loan(id).unwrap(), before);
        assert_eq!(ledger.get_available_loans().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_payment_transfer_leaves_loan_unchanged() {
        let mut gateway = MockGateway::new();
        let mut calls = 0;
        gateway.expect_transfer().times(2).returning(move |from, to, amount| {
            calls += 1;
            if calls == 1 {
                Ok(TransferReceipt::new(from.clone(), to.clone(), amount, t0()))
            } else {
                Err(TransferError::InsufficientFunds {
                    required: amount,
                    available: Amount::ZERO,
                })
            }
        });
        let ledger = ledger_with(gateway);
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        ledger.fund_loan(&lender(), id, Amount::new(100)).await.unwrap();
        let before = ledger.get_loan(id).unwrap();

        let result = ledger.pay_installment(&borrower(), id, Amount::new(10)).await;

        assert!(matches!(result, Err(LedgerError::TransferFailed(_))));
        assert_eq!(ledger.get_loan(id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_fund_rejections_never_touch_the_gateway() {
        // No expectations: any transfer call panics
        let ledger = ledger_with(MockGateway::new());
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();

        assert_eq!(
            ledger.fund_loan(&lender(), id, Amount::new(99)).await,
            Err(LedgerError::AmountMismatch {
                expected: Amount::new(100),
                supplied: Amount::new(99),
            })
        );
        assert!(matches!(
            ledger.fund_loan(&borrower(), id, Amount::new(100)).await,
            Err(LedgerError::NotAuthorized { .. })
        ));
        assert_eq!(
            ledger.fund_loan(&lender(), LoanId::new(42), Amount::new(100)).await,
            Err(LedgerError::NotFound(LoanId::new(42)))
        );
        assert_eq!(ledger.get_loan(id).unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_overpayment_charges_only_installment() {
        let ledger = ledger_with(accept_all());
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        ledger.fund_loan(&lender(), id, Amount::new(100)).await.unwrap();

        let receipt = ledger
            .pay_installment(&borrower(), id, Amount::new(11))
            .await
            .unwrap();

        assert_eq!(receipt.installment_number, 1);
        assert_eq!(receipt.charged, Amount::new(10));
        assert_eq!(receipt.refunded, Amount::new(1));
        assert_eq!(receipt.transfer.amount, Amount::new(10));
        assert_eq!(receipt.loan.repaid_amount, Amount::new(10));
    }

    #[tokio::test]
    async fn test_underpayment_and_wrong_payer_rejected() {
        let ledger = ledger_with(accept_all());
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        ledger.fund_loan(&lender(), id, Amount::new(100)).await.unwrap();

        assert_eq!(
            ledger.pay_installment(&borrower(), id, Amount::new(9)).await,
            Err(LedgerError::AmountMismatch {
                expected: Amount::new(10),
                supplied: Amount::new(9),
            })
        );
        assert!(matches!(
            ledger.pay_installment(&lender(), id, Amount::new(10)).await,
            Err(LedgerError::NotAuthorized { .. })
        ));
        assert_eq!(ledger.get_loan(id).unwrap().installments_paid, 0);
    }

    #[tokio::test]
    async fn test_pay_before_funding_is_invalid_state() {
        let ledger = ledger_with(MockGateway::new());
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();

        assert_eq!(
            ledger.pay_installment(&borrower(), id, Amount::new(10)).await,
            Err(LedgerError::InvalidState {
                loan_id: id,
                status: LoanStatus::Requested,
                operation: Operation::PayInstallment,
            })
        );
    }

    #[tokio::test]
    async fn test_remove_rules() {
        let ledger = ledger_with(accept_all());
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();

        assert!(matches!(
            ledger.remove_loan(&lender(), id).await,
            Err(LedgerError::NotAuthorized { .. })
        ));

        let removed = ledger.remove_loan(&borrower(), id).await.unwrap();
        assert_eq!(removed.status, LoanStatus::Removed);
        assert_eq!(removed.closed_at, Some(t0()));
        assert!(ledger.get_available_loans().is_empty());

        let funded = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        ledger.fund_loan(&lender(), funded, Amount::new(100)).await.unwrap();
        assert_eq!(
            ledger.remove_loan(&borrower(), funded).await,
            Err(LedgerError::InvalidState {
                loan_id: funded,
                status: LoanStatus::Funded,
                operation: Operation::Remove,
            })
        );
    }

    #[tokio::test]
    async fn test_mark_overdue_outcomes() {
        let ledger = ledger_with(accept_all());
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();

        assert_eq!(
            ledger.mark_overdue_if_applicable(id, t0()).await,
            Ok(OverdueOutcome::NotApplicable(LoanStatus::Requested))
        );

        ledger.fund_loan(&lender(), id, Amount::new(100)).await.unwrap();
        let due = Utc.with_ymd_and_hms(2024, 2, 15, 9, 0, 0).unwrap();

        // Exactly at the deadline is not yet overdue
        assert_eq!(
            ledger.mark_overdue_if_applicable(id, due).await,
            Ok(OverdueOutcome::NotDue { next_due: Some(due) })
        );

        let late = due + chrono::Duration::seconds(1);
        let outcome = ledger.mark_overdue_if_applicable(id, late).await.unwrap();
        assert!(outcome.is_defaulted());

        let after_first = ledger.get_loan(id).unwrap();
        assert_eq!(after_first.status, LoanStatus::Defaulted);
        assert_eq!(after_first.closed_at, Some(late));

        // Second call is a no-op
        assert_eq!(
            ledger.mark_overdue_if_applicable(id, late).await,
            Ok(OverdueOutcome::NotApplicable(LoanStatus::Defaulted))
        );
        assert_eq!(ledger.get_loan(id).unwrap(), after_first);

        assert_eq!(
            ledger.mark_overdue_if_applicable(LoanId::new(99), late).await,
            Err(LedgerError::NotFound(LoanId::new(99)))
        );
    }

    #[tokio::test]
    async fn test_busy_loan_times_out() {
        let config = LedgerConfig {
            gate_timeout_ms: 20,
            ..Default::default()
        };
        let ledger = LoanLedger::new(
            config,
            Arc::new(MockGateway::new()),
            Arc::new(ManualClock::new(t0())),
        );
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();

        let _held = ledger.core.gates.acquire(id).await.unwrap();
        assert_eq!(
            ledger.remove_loan(&borrower(), id).await,
            Err(LedgerError::InvalidState {
                loan_id: id,
                status: LoanStatus::Requested,
                operation: Operation::Remove,
            })
        );
    }

    #[test]
    fn test_rebuild_index_reports_no_drift() {
        let ledger = ledger_with(MockGateway::new());
        ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        ledger.request_loan(lender(), Amount::new(300), 10, 10).unwrap();

        assert!(!ledger.rebuild_index());
        assert_eq!(
            ledger.index_snapshot(),
            LoanIndex::rebuild(&ledger.get_all_loans())
        );
    }

    #[tokio::test]
    async fn test_empty_lender_rejected() {
        let ledger = ledger_with(MockGateway::new());
        let id = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();

        assert!(matches!(
            ledger.fund_loan(&PartyId::from(""), id, Amount::new(100)).await,
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(ledger.get_loan(id).unwrap().status, LoanStatus::Requested);
    }

    #[tokio::test]
    async fn test_terminal_loans_release_their_gates() {
        let ledger = ledger_with(accept_all());
        let open = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        let funded = ledger.request_loan(borrower(), Amount::new(100), 10, 10).unwrap();
        ledger.fund_loan(&lender(), funded, Amount::new(100)).await.unwrap();
        assert_eq!(ledger.core.gates.len(), 1);

        ledger.remove_loan(&borrower(), open).await.unwrap();
        assert_eq!(ledger.core.gates.len(), 1);

        let late = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(ledger
            .mark_overdue_if_applicable(funded, late)
            .await
            .unwrap()
            .is_defaulted());
        assert!(ledger.core.gates.is_empty());

        // Terminal loans are still answered without recreating a gate
        assert!(matches!(
            ledger.remove_loan(&borrower(), open).await,
            Err(LedgerError::InvalidState { .. })
        ));
        assert_eq!(
            ledger.mark_overdue_if_applicable(funded, late).await,
            Ok(OverdueOutcome::NotApplicable(LoanStatus::Defaulted))
        );
        assert!(ledger.core.gates.is_empty());
    }
}
