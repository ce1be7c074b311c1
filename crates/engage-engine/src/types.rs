use chrono::{DateTime, Utc};
use engage_ledger::CoinAmount;
use engage_types::{InteractionKind, OrderId, TaskId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Verified,
    Rejected,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Verified => "verified",
            TaskStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A purchased request for N interactions on one Instagram target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: UserId,
    pub kind: InteractionKind,
    pub target_url: String,
    pub required_text: Option<String>,
    pub target_count: u32,
    /// Units not yet resolved (verified or refunded). Decremented only by
    /// the verification and refund paths.
    pub remaining_count: u32,
    pub status: OrderStatus,
    /// Set by CancelOrder; assigned tasks run to their conclusion, after
    /// which the order finalizes as cancelled.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
}

/// One unit of work inside an order, held by at most one worker at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub order_id: OrderId,
    pub status: TaskStatus,
    pub assigned_user: Option<UserId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub validation_ref: Option<String>,
    pub reject_reason: Option<String>,
    /// Times this task returned to the pool (deadline lapse or retryable
    /// validation failure).
    pub attempt_count: u32,
    /// Set on a worker-fault rejection that spawned a replacement task.
    pub replaced_by: Option<TaskId>,
    /// Workers who flunked this unit of work; they never see it again.
    pub prior_worker_faults: Vec<UserId>,
    /// True when the order owner was refunded for this unit.
    pub refunded: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Still counts toward the order's open work.
    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Assigned)
    }
}

/// Request payload for PlaceOrder.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub kind: InteractionKind,
    pub target_url: String,
    pub target_count: u32,
    pub required_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub new_balance: CoinAmount,
}

/// What a worker sees after TakeTask.
#[derive(Debug, Clone)]
pub struct AssignedTask {
    pub task_id: TaskId,
    pub order_id: OrderId,
    pub kind: InteractionKind,
    pub target_url: String,
    pub required_text: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Structured outcome of CompleteTask. Classified validation failures are
/// outcomes, not errors.
#[derive(Debug, Clone)]
pub enum TaskCompletion {
    Verified {
        credited: CoinAmount,
        new_balance: CoinAmount,
        order_status: OrderStatus,
    },
    /// Transient validation failure; the task is back in the pool.
    Retryable { reason: String },
    /// The worker did not perform the action. No credit.
    RejectedWorkerFault {
        reason: String,
        replacement: Option<TaskId>,
    },
    /// The target is gone or the retry budget ran out; the owner was
    /// refunded one unit.
    RejectedRefunded {
        reason: String,
        order_status: OrderStatus,
    },
}

#[derive(Debug, Clone)]
pub struct CancelReceipt {
    pub order_id: OrderId,
    pub refunded: CoinAmount,
    pub order_status: OrderStatus,
    pub new_balance: CoinAmount,
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    /// Tasks returned to the pool.
    pub released: Vec<TaskId>,
    /// Tasks of cancel-requested orders that were rejected and refunded
    /// instead of re-entering the pool.
    pub cancelled_rejected: Vec<TaskId>,
}

/// Snapshot handed to the assignment policy: one claimable task joined with
/// the order fields the policy rules need.
#[derive(Debug, Clone)]
pub struct CandidateTask {
    pub task_id: TaskId,
    pub order_id: OrderId,
    pub order_owner: UserId,
    pub created_at: DateTime<Utc>,
    pub prior_worker_faults: Vec<UserId>,
}
