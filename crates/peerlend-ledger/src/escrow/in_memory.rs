//! Wallet-backed in-memory settlement rail

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use peerlend_common::{Amount, Clock, PartyId, SystemClock, TransferError, Wallet};

use super::{EscrowGateway, TransferReceipt};

/// In-memory escrow
///
/// Holds one [`Wallet`] per party and a journal of every completed transfer.
pub struct InMemoryEscrow {
    wallets: Mutex<HashMap<PartyId, Wallet>>,
    journal: RwLock<Vec<TransferReceipt>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEscrow {
    /// Create an empty rail on the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty rail stamping receipts with `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            wallets: Mutex::new(HashMap::new()),
            journal: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Fund a party's wallet from outside the rail
    pub fn deposit(&self, party: &PartyId, amount: Amount) -> Result<(), TransferError> {
        let mut wallets = self.wallets.lock();
        wallets
            .entry(party.clone())
            .or_insert_with(|| Wallet::new(party.clone()))
            .credit(amount)?;
        Ok(())
    }

    /// Available balance, zero for an unknown party
    pub fn balance(&self, party: &PartyId) -> Amount {
        self.wallets
            .lock()
            .get(party)
            .map(|w| w.available)
            .unwrap_or(Amount::ZERO)
    }

    /// Snapshot of a party's wallet
    pub fn wallet(&self, party: &PartyId) -> Option<Wallet> {
        self.wallets.lock().get(party).cloned()
    }

    /// Completed transfers in execution order
    pub fn journal(&self) -> Vec<TransferReceipt> {
        self.journal.read().clone()
    }

    pub fn transfer_count(&self) -> usize {
        self.journal.read().len()
    }

    fn settle(
        &self,
        from: &PartyId,
        to: &PartyId,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        if amount.is_zero() {
            return Err(TransferError::InvalidAmount);
        }
        if from == to {
            return Err(TransferError::SelfTransfer(from.clone()));
        }

        let mut wallets = self.wallets.lock();
        let mut payer = wallets
            .remove(from)
            .ok_or(TransferError::InsufficientFunds {
                required: amount,
                available: Amount::ZERO,
            })?;
        let known_recipient = wallets.contains_key(to);
        let mut recipient = wallets
            .remove(to)
            .unwrap_or_else(|| Wallet::new(to.clone()));
        let result = payer.pay_to(amount, &mut recipient);
        wallets.insert(from.clone(), payer);
        // A declined transfer must not open a wallet for the recipient
        if result.is_ok() || known_recipient {
            wallets.insert(to.clone(), recipient);
        }
        result?;

        let receipt = TransferReceipt::new(from.clone(), to.clone(), amount, self.clock.now());
        self.journal.write().push(receipt.clone());
        Ok(receipt)
    }
}

impl Default for InMemoryEscrow {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EscrowGateway for InMemoryEscrow {
    async fn transfer(
        &self,
        from: &PartyId,
        to: &PartyId,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        let receipt = self.settle(from, to, amount)?;
        debug!(
            transfer_id = %receipt.id,
            from = %from,
            to = %to,
            amount = %amount,
            "Transfer settled"
        );
        Ok(receipt)
    }
}
