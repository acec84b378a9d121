//! CreditScore - Borrower reputation metric (0-1000)
//!
//! The score is a pure function of a party's loan history. It has no hidden
//! state, so any caller holding the same loan set recomputes the same value.
//!
//! ```text
//! score = 300 + floor(400 * repaid / total)
//!       + 50            if total >= 5
//!       - 100 * defaulted
//! clamped to [0, 1000]; 0 for an empty history
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::loan::{Loan, LoanStatus};

/// Maximum possible credit score
pub const MAX_SCORE: u16 = 1000;

/// Minimum possible credit score
pub const MIN_SCORE: u16 = 0;

/// Starting point for any non-empty history
pub const BASE_SCORE: i64 = 300;

/// Points awarded for a fully repaid history
pub const REPAYMENT_WEIGHT: i64 = 400;

/// Bonus for an established history
pub const HISTORY_BONUS: i64 = 50;

/// Loans needed for the history bonus
pub const HISTORY_BONUS_MIN_LOANS: usize = 5;

/// Penalty per defaulted loan
pub const DEFAULT_PENALTY: i64 = 100;

/// Loan counts the score is computed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditComponents {
    pub total_loans: usize,
    pub repaid_loans: usize,
    pub defaulted_loans: usize,
    /// Funded and still in repayment
    pub active_loans: usize,
}

impl CreditComponents {
    /// Tally a loan history
    pub fn from_loans<'a>(loans: impl IntoIterator<Item = &'a Loan>) -> Self {
        loans
            .into_iter()
            .fold(Self::default(), |mut acc, loan| {
                acc.total_loans += 1;
                match loan.status {
                    LoanStatus::Repaid => acc.repaid_loans += 1,
                    LoanStatus::Defaulted => acc.defaulted_loans += 1,
                    LoanStatus::Funded => acc.active_loans += 1,
                    LoanStatus::Requested | LoanStatus::Removed => {}
                }
                acc
            })
    }

    /// Composite score from the counts
    pub fn score(&self) -> u16 {
        if self.total_loans == 0 {
            return MIN_SCORE;
        }

        let total = self.total_loans as i64;
        let mut score = BASE_SCORE + (self.repaid_loans as i64 * REPAYMENT_WEIGHT) / total;
        if self.total_loans >= HISTORY_BONUS_MIN_LOANS {
            score += HISTORY_BONUS;
        }
        score -= self.defaulted_loans as i64 * DEFAULT_PENALTY;

        score.clamp(MIN_SCORE as i64, MAX_SCORE as i64) as u16
    }

    /// Share of loans repaid, in basis points (0-10000)
    pub fn repayment_rate_bps(&self) -> u32 {
        if self.total_loans == 0 {
            return 0;
        }
        ((self.repaid_loans as u64 * 10_000) / self.total_loans as u64) as u32
    }
}

/// Credit score of a loan history
pub fn score<'a>(loans: impl IntoIterator<Item = &'a Loan>) -> u16 {
    CreditComponents::from_loans(loans).score()
}

/// Human-facing classification of a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditBand {
    /// 750 and above
    Excellent,
    /// 650 - 749
    Good,
    /// 550 - 649
    Fair,
    /// 1 - 549
    Poor,
    /// Score of zero
    NoHistory,
}

impl CreditBand {
    pub fn from_score(score: u16) -> Self {
        match score {
            750.. => CreditBand::Excellent,
            650..=749 => CreditBand::Good,
            550..=649 => CreditBand::Fair,
            1..=549 => CreditBand::Poor,
            0 => CreditBand::NoHistory,
        }
    }
}

impl fmt::Display for CreditBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditBand::Excellent => write!(f, "Excellent"),
            CreditBand::Good => write!(f, "Good"),
            CreditBand::Fair => write!(f, "Fair"),
            CreditBand::Poor => write!(f, "Poor"),
            CreditBand::NoHistory => write!(f, "No History"),
        }
    }
}

/// Score with full breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReport {
    /// Composite score from 0-1000
    pub score: u16,
    pub band: CreditBand,
    /// Count breakdown for transparency
    pub components: CreditComponents,
    /// Repaid share in basis points
    pub repayment_rate_bps: u32,
}

impl CreditReport {
    pub fn from_loans<'a>(loans: impl IntoIterator<Item = &'a Loan>) -> Self {
        let components = CreditComponents::from_loans(loans);
        let score = components.score();
        Self {
            score,
            band: CreditBand::from_score(score),
            components,
            repayment_rate_bps: components.repayment_rate_bps(),
        }
    }
}

impl fmt::Display for CreditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CreditReport({}/1000, {}, repaid={}/{})",
            self.score, self.band, self.components.repaid_loans, self.components.total_loans
        )
    }
}
