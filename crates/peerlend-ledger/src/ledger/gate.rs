//! Per-loan writer gates

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use peerlend_common::LoanId;

/// One async mutex per loan id.
///
/// Holding a loan's gate makes the holder the only writer of that loan for
/// the whole validate, transfer, commit sequence. Gates of different loans
/// are independent.
pub struct LoanGates {
    gates: DashMap<LoanId, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl LoanGates {
    pub fn new(timeout: Duration) -> Self {
        Self {
            gates: DashMap::new(),
            timeout,
        }
    }

    /// Wait for the loan's gate, at most the configured timeout.
    ///
    /// `None` means the loan stayed busy for the whole wait.
    pub async fn acquire(&self, loan_id: LoanId) -> Option<OwnedMutexGuard<()>> {
        let gate = self
            .gates
            .entry(loan_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::time::timeout(self.timeout, gate.lock_owned())
            .await
            .ok()
    }

    /// Forget the gate of a loan that will never be written again.
    ///
    /// Callers still waiting on the old gate acquire it as usual.
    pub fn retire(&self, loan_id: LoanId) {
        self.gates.remove(&loan_id);
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
