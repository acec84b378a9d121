//! Portfolio and repayment reports
//!
//! Read-only views computed from committed loans. Nothing here is stored;
//! every report is rebuilt from the loans it is given.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use peerlend_common::{Amount, Loan, LoanId, LoanStatus, PartyId};

/// Which side of its loans a party is viewed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Borrower,
    Lender,
}

/// Portfolio summary of one party in one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySummary {
    pub party: PartyId,
    pub role: PartyRole,
    pub total_loans: usize,
    pub requested_loans: usize,
    /// Funded and in repayment
    pub active_loans: usize,
    pub repaid_loans: usize,
    pub defaulted_loans: usize,
    pub removed_loans: usize,
    /// Principal over every loan in the view
    pub total_principal: Amount,
    /// Principal of funded loans
    pub active_principal: Amount,
    /// Interest of fully repaid loans; always zero for a borrower
    pub earnings: Amount,
    /// Repaid share of all loans, in basis points
    pub success_rate_bps: u32,
    pub installments_paid: u64,
    pub installments_total: u64,
}

impl PartySummary {
    /// Summarize the loans where `party` acts as `role`.
    ///
    /// Loans in which the party plays the other role are ignored.
    pub fn for_party<'a>(
        party: &PartyId,
        role: PartyRole,
        loans: impl IntoIterator<Item = &'a Loan>,
    ) -> Self {
        let mine: Vec<&Loan> = loans
            .into_iter()
            .filter(|loan| match role {
                PartyRole::Borrower => &loan.borrower == party,
                PartyRole::Lender => loan.lender.as_ref() == Some(party),
            })
            .collect();

        let count = |status: LoanStatus| mine.iter().filter(|l| l.status == status).count();
        let total_loans = mine.len();
        let repaid_loans = count(LoanStatus::Repaid);

        let earnings = match role {
            PartyRole::Lender => mine
                .iter()
                .filter(|l| l.status == LoanStatus::Repaid)
                .map(|l| l.total_interest())
                .sum(),
            PartyRole::Borrower => Amount::ZERO,
        };

        Self {
            party: party.clone(),
            role,
            total_loans,
            requested_loans: count(LoanStatus::Requested),
            active_loans: count(LoanStatus::Funded),
            repaid_loans,
            defaulted_loans: count(LoanStatus::Defaulted),
            removed_loans: count(LoanStatus::Removed),
            total_principal: mine.iter().map(|l| l.principal()).sum(),
            active_principal: mine
                .iter()
                .filter(|l| l.status == LoanStatus::Funded)
                .map(|l| l.principal())
                .sum(),
            earnings,
            success_rate_bps: ratio_bps(repaid_loans as u128, total_loans as u128),
            installments_paid: mine.iter().map(|l| l.installments_paid as u64).sum(),
            installments_total: mine.iter().map(|l| l.duration_months() as u64).sum(),
        }
    }

    /// Paid share of all scheduled installments, in basis points
    pub fn installment_progress_bps(&self) -> u32 {
        ratio_bps(self.installments_paid as u128, self.installments_total as u128)
    }
}

/// Repayment position of a single loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentSchedule {
    pub loan_id: LoanId,
    pub status: LoanStatus,
    pub installments_paid: u32,
    pub installments_total: u32,
    /// 1-based number of the next installment, `None` when nothing is due
    pub next_installment: Option<u32>,
    pub next_amount: Option<Amount>,
    pub next_due: Option<DateTime<Utc>>,
    pub paid: Amount,
    pub remaining: Amount,
    pub overdue: bool,
    /// Repaid share of the total due, in basis points
    pub progress_bps: u32,
}

impl RepaymentSchedule {
    pub fn for_loan(loan: &Loan, now: DateTime<Utc>) -> Self {
        let collecting = loan.status == LoanStatus::Funded;
        Self {
            loan_id: loan.id,
            status: loan.status,
            installments_paid: loan.installments_paid,
            installments_total: loan.duration_months(),
            next_installment: collecting.then_some(loan.installments_paid + 1),
            next_amount: loan.next_installment_amount().filter(|_| collecting),
            next_due: loan.next_due_date().filter(|_| collecting),
            paid: loan.repaid_amount,
            remaining: loan.remaining_balance(),
            overdue: loan.is_overdue(now),
            progress_bps: ratio_bps(loan.repaid_amount.units(), loan.total_amount_due().units()),
        }
    }
}

fn ratio_bps(part: u128, whole: u128) -> u32 {
    if whole == 0 {
        return 0;
    }
    (part.saturating_mul(10_000) / whole).min(10_000) as u32
}
