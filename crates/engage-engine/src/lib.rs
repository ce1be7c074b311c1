/*!
# Engage Order/Task Engine

Core of the coin-earning platform: a user places an order for N
interactions on an Instagram target, the engine debits coins, materializes
N discrete tasks, dispatches them one at a time to eligible workers,
verifies each interaction through the Instagram adapter, credits the
worker and advances order progress.

## Module Structure

- **types**: Orders, tasks, status machines and operation payloads
- **engine**: The public operations (PlaceOrder, TakeTask, CompleteTask,
  CancelOrder, SweepExpired)
- **assignment**: Pure, deterministic next-task-for-worker policy
- **order_store** / **task_store**: Persistence seams with in-memory
  implementations; `claim` is the compare-and-set linearization point
- **instagram**: Adapter contract plus test doubles
- **users**: Minimal profile directory (handle, ban flag)
- **clock**: Injected time source
- **config**: Costs, rewards, windows and retry budgets
- **error**: Engine-specific errors

Fairness rules enforced throughout: no self-tasks, at most one active
assignment per worker, at most one verified task per (order, worker).

Balances live in `engage-ledger`; every coin movement is an append-only
entry with a typed reason and an idempotency reference.
*/

pub mod assignment;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod instagram;
pub mod order_store;
pub mod task_store;
pub mod types;
pub mod users;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::EngagementEngine;
pub use error::{EngineError, Result};
pub use instagram::{FailureReason, InstagramAdapter, ValidationOutcome};
pub use order_store::{MemoryOrderStore, OrderStore};
pub use task_store::{MemoryTaskStore, TaskStore};
pub use types::{
    AssignedTask, CancelReceipt, CandidateTask, NewOrder, Order, OrderReceipt, OrderStatus,
    SweepReport, Task, TaskCompletion, TaskStatus,
};
pub use users::{MemoryUserDirectory, UserDirectory, UserProfile};
