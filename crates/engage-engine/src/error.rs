use engage_ledger::LedgerError;
use engage_types::{OrderId, TaskId, TypesError, UserId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("User {0} is banned")]
    Banned(UserId),

    #[error("Worker {0} already has an active task")]
    HasActiveTask(UserId),

    #[error("No tasks available")]
    NoTasksAvailable,

    #[error("Task {task_id} is not assigned to user {user_id}")]
    NotYours { task_id: TaskId, user_id: UserId },

    #[error("Wrong state: expected {expected}, got {actual}")]
    WrongState { expected: String, actual: String },

    #[error("Assignment for task {0} has expired")]
    Expired(TaskId),

    #[error("Illegal order transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Caller is not the owner of order {order_id}")]
    NotOwner { order_id: OrderId },

    #[error("User {0} has no linked Instagram account")]
    NoLinkedAccount(UserId),

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<TypesError> for EngineError {
    fn from(e: TypesError) -> Self {
        match e {
            TypesError::InvalidTarget(msg) => Self::InvalidTarget(msg),
            TypesError::InvalidParameter(msg) => Self::InvalidParameter(msg),
        }
    }
}
