//! Core data types for PeerLend

pub mod amount;
pub mod clock;
pub mod credit_score;
pub mod loan;
pub mod party;
pub mod wallet;
