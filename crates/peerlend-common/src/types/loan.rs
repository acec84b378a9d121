//! Loan - The central entity of the lending engine
//!
//! A loan carries its immutable terms, its lifecycle status and its
//! repayment progress. Interest, totals and installments are derived from
//! the stored fields on every read and are never cached.
//!
//! ## State machine
//!
//! ```text
//! Requested ──► Funded ──► Repaid
//!     │            └─────► Defaulted
//!     └──────► Removed
//! ```
//!
//! Transitions are produced as *drafts*: `funded`, `with_installment`,
//! `removed` and `defaulted` return a new `Loan` and leave `self` untouched,
//! so a caller can validate, move value, and only then commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LedgerError, Result};
use crate::types::amount::{Amount, PRINCIPAL_CEILING};
use crate::types::clock::add_months;
use crate::types::party::PartyId;

/// Hard upper bound on the annual interest rate (percent)
pub const MAX_INTEREST_RATE_PERCENT: u32 = 100;

/// Months per year, the simple-interest time divisor
const MONTHS_PER_YEAR: u128 = 12;

/// Percent divisor
const PERCENT: u128 = 100;

/// Monotonically assigned loan identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(u64);

impl LoanId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// Open request, waiting for a lender
    Requested,
    /// Funded and in repayment
    Funded,
    /// Every installment paid
    Repaid,
    /// An installment deadline passed unpaid
    Defaulted,
    /// Withdrawn by the borrower before funding
    Removed,
}

impl LoanStatus {
    /// Whether the state machine has an edge `self -> next`
    pub fn can_transition_to(self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, next),
            (Requested, Funded) | (Requested, Removed) | (Funded, Repaid) | (Funded, Defaulted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoanStatus::Repaid | LoanStatus::Defaulted | LoanStatus::Removed
        )
    }

    /// Statuses in which a lender is attached
    pub fn has_lender(self) -> bool {
        matches!(
            self,
            LoanStatus::Funded | LoanStatus::Repaid | LoanStatus::Defaulted
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoanStatus::Requested => write!(f, "requested"),
            LoanStatus::Funded => write!(f, "funded"),
            LoanStatus::Repaid => write!(f, "repaid"),
            LoanStatus::Defaulted => write!(f, "defaulted"),
            LoanStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Ledger operation, used in errors and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Request,
    Fund,
    PayInstallment,
    Remove,
    MarkOverdue,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Request => write!(f, "request"),
            Operation::Fund => write!(f, "fund"),
            Operation::PayInstallment => write!(f, "pay an installment on"),
            Operation::Remove => write!(f, "remove"),
            Operation::MarkOverdue => write!(f, "mark overdue"),
        }
    }
}

/// Immutable loan terms with simple-interest arithmetic.
///
/// All divisions floor:
/// - `total_interest = principal * rate * months / 1200`
/// - `monthly_payment = total_amount_due / months`
///
/// The final installment absorbs the rounding remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    principal: Amount,
    annual_interest_rate_percent: u32,
    duration_months: u32,
}

impl LoanTerms {
    /// Validate and build terms.
    ///
    /// Rejects a zero or oversized principal, a rate above
    /// [`MAX_INTEREST_RATE_PERCENT`], a zero duration, and terms whose
    /// monthly installment would round down to zero.
    pub fn new(
        principal: Amount,
        annual_interest_rate_percent: u32,
        duration_months: u32,
    ) -> Result<Self> {
        if principal.is_zero() {
            return Err(LedgerError::InvalidArgument(
                "principal must be positive".to_string(),
            ));
        }
        if principal > PRINCIPAL_CEILING {
            return Err(LedgerError::InvalidArgument(format!(
                "principal {} exceeds ceiling {}",
                principal, PRINCIPAL_CEILING
            )));
        }
        if annual_interest_rate_percent > MAX_INTEREST_RATE_PERCENT {
            return Err(LedgerError::InvalidArgument(format!(
                "interest rate {}% exceeds {}%",
                annual_interest_rate_percent, MAX_INTEREST_RATE_PERCENT
            )));
        }
        if duration_months == 0 {
            return Err(LedgerError::InvalidArgument(
                "duration must be at least one month".to_string(),
            ));
        }

        let terms = Self {
            principal,
            annual_interest_rate_percent,
            duration_months,
        };

        if terms.monthly_payment().is_zero() {
            return Err(LedgerError::InvalidArgument(format!(
                "total due {} cannot be split into {} non-zero installments",
                terms.total_amount_due(),
                duration_months
            )));
        }

        Ok(terms)
    }

    pub fn principal(&self) -> Amount {
        self.principal
    }

    pub fn annual_interest_rate_percent(&self) -> u32 {
        self.annual_interest_rate_percent
    }

    pub fn duration_months(&self) -> u32 {
        self.duration_months
    }

    /// `floor(principal * rate * months / (100 * 12))`
    pub fn total_interest(&self) -> Amount {
        let numerator = self
            .principal
            .units()
            .saturating_mul(self.annual_interest_rate_percent as u128)
            .saturating_mul(self.duration_months as u128);
        Amount::new(numerator / (PERCENT * MONTHS_PER_YEAR))
    }

    pub fn total_amount_due(&self) -> Amount {
        Amount::new(
            self.principal
                .units()
                .saturating_add(self.total_interest().units()),
        )
    }

    /// `floor(total_amount_due / months)`
    pub fn monthly_payment(&self) -> Amount {
        let total = self.total_amount_due();
        total
            .checked_div_floor(self.duration_months as u128)
            .unwrap_or(total)
    }

    /// Amount due for installment number `installments_paid + 1`, given what
    /// has been repaid so far. `None` once every installment is paid.
    pub fn installment_due(&self, installments_paid: u32, repaid_amount: Amount) -> Option<Amount> {
        if installments_paid >= self.duration_months {
            return None;
        }
        if installments_paid + 1 == self.duration_months {
            Some(self.total_amount_due().saturating_sub(repaid_amount))
        } else {
            Some(self.monthly_payment())
        }
    }
}

/// Loan record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: PartyId,
    /// Set exactly when the status is funded, repaid or defaulted
    pub lender: Option<PartyId>,
    pub terms: LoanTerms,
    pub status: LoanStatus,
    pub installments_paid: u32,
    /// Cumulative value received, never above `total_amount_due`
    pub repaid_amount: Amount,
    pub requested_at: DateTime<Utc>,
    /// Set once at funding
    pub start_time: Option<DateTime<Utc>>,
    /// Set on entry into a terminal status
    pub closed_at: Option<DateTime<Utc>>,
    /// Incremented by one on every committed mutation
    pub version: u64,
}

impl Loan {
    /// New loan in `Requested`
    pub fn new_request(
        id: LoanId,
        borrower: PartyId,
        terms: LoanTerms,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            borrower,
            lender: None,
            terms,
            status: LoanStatus::Requested,
            installments_paid: 0,
            repaid_amount: Amount::ZERO,
            requested_at,
            start_time: None,
            closed_at: None,
            version: 0,
        }
    }

    #[inline]
    pub fn principal(&self) -> Amount {
        self.terms.principal()
    }

    #[inline]
    pub fn annual_interest_rate_percent(&self) -> u32 {
        self.terms.annual_interest_rate_percent()
    }

    #[inline]
    pub fn duration_months(&self) -> u32 {
        self.terms.duration_months()
    }

    pub fn total_interest(&self) -> Amount {
        self.terms.total_interest()
    }

    pub fn total_amount_due(&self) -> Amount {
        self.terms.total_amount_due()
    }

    pub fn monthly_payment(&self) -> Amount {
        self.terms.monthly_payment()
    }

    /// `total_amount_due - repaid_amount`
    pub fn remaining_balance(&self) -> Amount {
        self.total_amount_due().saturating_sub(self.repaid_amount)
    }

    /// Amount of the next installment; the final one closes out the balance
    pub fn next_installment_amount(&self) -> Option<Amount> {
        self.terms
            .installment_due(self.installments_paid, self.repaid_amount)
    }

    /// Deadline of the next installment: `start_time + (paid + 1)` months
    pub fn next_due_date(&self) -> Option<DateTime<Utc>> {
        if self.installments_paid >= self.duration_months() {
            return None;
        }
        let start = self.start_time?;
        add_months(start, self.installments_paid + 1)
    }

    /// A funded loan whose next deadline has passed
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::Funded
            && self.next_due_date().map(|due| now > due).unwrap_or(false)
    }

    /// Open for funding
    pub fn is_available(&self) -> bool {
        self.status == LoanStatus::Requested && !self.principal().is_zero()
    }

    pub fn involves(&self, party: &PartyId) -> bool {
        &self.borrower == party || self.lender.as_ref() == Some(party)
    }

    /// Draft of this loan funded by `lender` at `at`
    pub fn funded(&self, lender: PartyId, at: DateTime<Utc>) -> Result<Loan> {
        let mut next = self.transition(LoanStatus::Funded, Operation::Fund, at)?;
        next.lender = Some(lender);
        next.start_time = Some(at);
        Ok(next)
    }

    /// Draft of this loan after one installment of `amount`.
    ///
    /// `amount` must equal [`Loan::next_installment_amount`]. The draft is
    /// `Repaid` when this was the final installment.
    pub fn with_installment(&self, amount: Amount, at: DateTime<Utc>) -> Result<Loan> {
        let invalid_state = LedgerError::InvalidState {
            loan_id: self.id,
            status: self.status,
            operation: Operation::PayInstallment,
        };
        if self.status != LoanStatus::Funded {
            return Err(invalid_state);
        }
        let expected = self.next_installment_amount().ok_or(invalid_state)?;
        if amount != expected {
            return Err(LedgerError::AmountMismatch {
                expected,
                supplied: amount,
            });
        }

        let repaid_amount = self
            .repaid_amount
            .checked_add(amount)
            .filter(|total| *total <= self.total_amount_due())
            .ok_or_else(|| {
                LedgerError::InvalidArgument(format!(
                    "installment {} would exceed total due {}",
                    amount,
                    self.total_amount_due()
                ))
            })?;

        let mut next = if self.installments_paid + 1 == self.duration_months() {
            self.transition(LoanStatus::Repaid, Operation::PayInstallment, at)?
        } else {
            let mut next = self.clone();
            next.version += 1;
            next
        };
        next.installments_paid += 1;
        next.repaid_amount = repaid_amount;
        Ok(next)
    }

    /// Draft of this loan withdrawn by its borrower
    pub fn removed(&self, at: DateTime<Utc>) -> Result<Loan> {
        self.transition(LoanStatus::Removed, Operation::Remove, at)
    }

    /// Draft of this loan marked as defaulted
    pub fn defaulted(&self, at: DateTime<Utc>) -> Result<Loan> {
        self.transition(LoanStatus::Defaulted, Operation::MarkOverdue, at)
    }

    fn transition(&self, next: LoanStatus, operation: Operation, at: DateTime<Utc>) -> Result<Loan> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidState {
                loan_id: self.id,
                status: self.status,
                operation,
            });
        }
        let mut loan = self.clone();
        loan.status = next;
        if next.is_terminal() {
            loan.closed_at = Some(at);
        }
        loan.version += 1;
        Ok(loan)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_installments_close_out_total(
            principal in 1u64..=u64::MAX,
            rate in 0u32..=MAX_INTEREST_RATE_PERCENT,
            months in 1u32..=60,
        ) {
            let Ok(terms) = LoanTerms::new(Amount::from(principal), rate, months) else {
                // Refused only when an installment would round to zero
                return Ok(());
            };

            let mut repaid = Amount::ZERO;
            for paid in 0..months {
                let due = terms.installment_due(paid, repaid).unwrap();
                prop_assert!(due >= terms.monthly_payment());
                repaid = repaid.checked_add(due).unwrap();
            }

            prop_assert_eq!(repaid, terms.total_amount_due());
            prop_assert_eq!(terms.installment_due(months, repaid), None);
        }

        #[test]
        fn prop_interest_never_exceeds_five_principals(
            principal in 1u64..=u64::MAX,
            rate in 0u32..=MAX_INTEREST_RATE_PERCENT,
            months in 1u32..=60,
        ) {
            if let Ok(terms) = LoanTerms::new(Amount::from(principal), rate, months) {
                let cap = Amount::from(principal).checked_mul(5).unwrap();
                prop_assert!(terms.total_interest() <= cap);
            }
        }
    }
}
