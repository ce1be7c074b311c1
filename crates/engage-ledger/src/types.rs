use chrono::{DateTime, Utc};
use engage_types::{OrderId, TaskId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A whole number of platform coins.
///
/// Coins are integral; there is no sub-coin unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoinAmount(u64);

impl CoinAmount {
    pub const ZERO: Self = Self(0);

    pub fn from_coins(coins: u64) -> Self {
        Self(coins)
    }

    pub fn as_coins(&self) -> u64 {
        self.0
    }

    /// Signed delta for a ledger entry crediting this amount.
    pub fn as_delta(&self) -> i64 {
        self.0 as i64
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn checked_mul(&self, count: u32) -> Option<Self> {
        self.0.checked_mul(count as u64).map(Self)
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for CoinAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} coins", self.0)
    }
}

/// Identifier for a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a coin movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    OrderDebit,
    TaskCredit,
    Refund,
    AdminAdjust,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryReason::OrderDebit => "order_debit",
            EntryReason::TaskCredit => "task_credit",
            EntryReason::Refund => "refund",
            EntryReason::AdminAdjust => "admin_adjust",
        }
    }
}

impl fmt::Display for EntryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a coin movement refers to.
///
/// `(reason, reference)` is unique across the ledger; a replayed call with
/// the same pair is a no-op returning the prior entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRef {
    Order(OrderId),
    Task(TaskId),
    /// Administrative adjustments carry an operator-chosen sequence number.
    Admin(u64),
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryRef::Order(id) => write!(f, "order-{}", id),
            EntryRef::Task(id) => write!(f, "task-{}", id),
            EntryRef::Admin(n) => write!(f, "admin-{}", n),
        }
    }
}

/// One immutable coin movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub delta: i64,
    pub reason: EntryReason,
    pub reference: EntryRef,
    pub created_at: DateTime<Utc>,
}
