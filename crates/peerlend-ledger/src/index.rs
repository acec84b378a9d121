//! Loan Indexing
//!
//! Secondary indices over the loan table, kept in step with every commit.

use std::collections::{BTreeSet, HashMap};

use peerlend_common::{Loan, LoanId, PartyId};

/// Secondary indices for party and availability queries.
///
/// Sets are ordered so every query returns ids in ascending order. Empty
/// per-party sets are pruned, which keeps an incrementally maintained index
/// structurally equal to a rebuilt one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoanIndex {
    /// Loan ids by borrower
    by_borrower: HashMap<PartyId, BTreeSet<LoanId>>,
    /// Loan ids by lender
    by_lender: HashMap<PartyId, BTreeSet<LoanId>>,
    /// Requested loans with a positive principal
    available: BTreeSet<LoanId>,
}

impl LoanIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from scratch over a full loan table
    pub fn rebuild<'a>(loans: impl IntoIterator<Item = &'a Loan>) -> Self {
        let mut index = Self::new();
        for loan in loans {
            index.add(loan);
        }
        index
    }

    /// Reflect one committed mutation.
    ///
    /// `previous` is the committed loan being replaced, `None` for a new one.
    pub fn apply(&mut self, previous: Option<&Loan>, next: &Loan) {
        if let Some(previous) = previous {
            self.remove(previous);
        }
        self.add(next);
    }

    fn add(&mut self, loan: &Loan) {
        self.by_borrower
            .entry(loan.borrower.clone())
            .or_default()
            .insert(loan.id);

        if let Some(lender) = &loan.lender {
            self.by_lender
                .entry(lender.clone())
                .or_default()
                .insert(loan.id);
        }

        if loan.is_available() {
            self.available.insert(loan.id);
        }
    }

    fn remove(&mut self, loan: &Loan) {
        Self::remove_from_set(&mut self.by_borrower, &loan.borrower, loan.id);
        if let Some(lender) = &loan.lender {
            Self::remove_from_set(&mut self.by_lender, lender, loan.id);
        }
        self.available.remove(&loan.id);
    }

    fn remove_from_set(map: &mut HashMap<PartyId, BTreeSet<LoanId>>, party: &PartyId, id: LoanId) {
        if let Some(set) = map.get_mut(party) {
            set.remove(&id);
            if set.is_empty() {
                map.remove(party);
            }
        }
    }

    /// Ids of loans requested by `party`
    pub fn borrowed_by(&self, party: &PartyId) -> Vec<LoanId> {
        self.by_borrower
            .get(party)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of loans funded by `party`
    pub fn lent_by(&self, party: &PartyId) -> Vec<LoanId> {
        self.by_lender
            .get(party)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of loans open for funding
    pub fn available(&self) -> Vec<LoanId> {
        self.available.iter().copied().collect()
    }

    pub fn borrower_count(&self) -> usize {
        self.by_borrower.len()
    }

    pub fn lender_count(&self) -> usize {
        self.by_lender.len()
    }
}
