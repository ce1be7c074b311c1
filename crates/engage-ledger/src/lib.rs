//! Append-only coin ledger.
//!
//! The ledger is the source of truth for coin balances; the cached per-user
//! balance is a projection updated in the same storage transaction as the
//! entry append. Debits are conditional updates that never let a balance go
//! negative, and every movement carries a typed reason and an idempotency
//! reference.

pub mod error;
pub mod ledger;
pub mod storage;
pub mod types;

pub use error::{LedgerError, Result};
pub use ledger::{AppliedEntry, Ledger};
pub use storage::{LedgerStorage, MemoryLedgerStorage};
pub use types::{CoinAmount, CoinEntry, EntryId, EntryReason, EntryRef};
