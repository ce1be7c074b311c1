use crate::types::{CoinAmount, EntryReason, EntryRef};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient funds: balance {balance}, needed {needed}")]
    InsufficientFunds {
        balance: CoinAmount,
        needed: CoinAmount,
    },

    /// An entry for this `(reason, reference)` pair already exists.
    /// Benign at the `Ledger` level; replays resolve to the prior entry.
    #[error("Duplicate ledger entry for ({reason}, {reference})")]
    DuplicateEntry {
        reason: EntryReason,
        reference: EntryRef,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}
