//! Escrow / value-transfer gateway
//!
//! The ledger never moves value itself. It asks an [`EscrowGateway`] to move
//! an amount between two parties and commits state only once the gateway
//! confirms. A gateway implementation may be a blockchain rail, a payment
//! processor or the wallet-backed [`InMemoryEscrow`].

pub mod in_memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use peerlend_common::{Amount, PartyId, TransferError};

pub use in_memory::InMemoryEscrow;

/// Value-transfer capability
///
/// A transfer is all-or-nothing: on `Ok` the whole amount has moved, on
/// `Err` nothing has.
#[async_trait]
pub trait EscrowGateway: Send + Sync {
    /// Move `amount` from `from` to `to`
    async fn transfer(
        &self,
        from: &PartyId,
        to: &PartyId,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError>;
}

/// Confirmation of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Gateway-assigned reference
    pub id: Uuid,
    pub from: PartyId,
    pub to: PartyId,
    pub amount: Amount,
    pub at: DateTime<Utc>,
}

impl TransferReceipt {
    /// Receipt with a fresh time-ordered id
    pub fn new(from: PartyId, to: PartyId, amount: Amount, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            from,
            to,
            amount,
            at,
        }
    }
}
