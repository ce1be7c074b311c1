use crate::error::{EngineError, Result};
use crate::types::{Task, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engage_types::{OrderId, TaskId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Persisted tasks. `claim` is the single linearization point moving a task
/// from pending to assigned; every mutation is a conditional update on the
/// current status.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Creates `count` pending tasks for a freshly placed order.
    async fn bulk_create(
        &self,
        order_id: OrderId,
        count: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>>;

    /// Creates a pending stand-in for a worker-fault-rejected task. The
    /// faulting worker is carried over so the unit never returns to them.
    async fn create_replacement(&self, original: TaskId, now: DateTime<Utc>) -> Result<Task>;

    async fn get(&self, task_id: TaskId) -> Result<Task>;

    /// Compare-and-set pending -> assigned. Returns `None` when the task is
    /// no longer pending (a racing claim won); fails with `HasActiveTask`
    /// when the worker already holds an assignment.
    async fn claim(
        &self,
        task_id: TaskId,
        user: UserId,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Task>>;

    /// Returns lapsed assignments (`expires_at <= now`) to the pool,
    /// incrementing `attempt_count`. Returns the released tasks.
    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Returns a retryably-failed assignment to the pool without penalty
    /// beyond the attempt counter.
    async fn reset_for_retry(&self, task_id: TaskId, user: UserId) -> Result<Task>;

    async fn mark_verified(
        &self,
        task_id: TaskId,
        user: UserId,
        validation_ref: String,
        now: DateTime<Utc>,
    ) -> Result<Task>;

    async fn mark_rejected(
        &self,
        task_id: TaskId,
        user: UserId,
        reason: String,
        refunded: bool,
        now: DateTime<Utc>,
    ) -> Result<Task>;

    /// Rejects every pending task of an order (cancellation path). The
    /// owner is refunded for each by the caller.
    async fn reject_pending_for_order(
        &self,
        order_id: OrderId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>>;

    async fn active_task_for(&self, user: UserId) -> Result<Option<Task>>;
    async fn tasks_for_order(&self, order_id: OrderId) -> Result<Vec<Task>>;

    /// Orders in which this user already has a verified task.
    async fn orders_verified_by(&self, user: UserId) -> Result<HashSet<OrderId>>;

    /// Claimable candidates for a worker: pending, not in an excluded
    /// order, not already verified-credited to them in the same order, and
    /// not a unit they previously flunked. Ordered oldest-first with
    /// order-id then task-id tie-breaks, truncated to `limit`.
    async fn find_candidates(
        &self,
        worker: UserId,
        exclude_orders: &HashSet<OrderId>,
        limit: usize,
    ) -> Result<Vec<Task>>;
}

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<TaskId, Task>,
    by_order: HashMap<OrderId, Vec<TaskId>>,
    next_id: u64,
}

impl TaskTable {
    fn allocate(&mut self, order_id: OrderId, now: DateTime<Utc>) -> TaskId {
        self.next_id += 1;
        let id = TaskId::new(self.next_id);
        let task = Task {
            id,
            order_id,
            status: TaskStatus::Pending,
            assigned_user: None,
            assigned_at: None,
            expires_at: None,
            completed_at: None,
            validation_ref: None,
            reject_reason: None,
            attempt_count: 0,
            replaced_by: None,
            prior_worker_faults: Vec::new(),
            refunded: false,
            created_at: now,
        };
        self.tasks.insert(id, task);
        self.by_order.entry(order_id).or_default().push(id);
        id
    }
}

pub struct MemoryTaskStore {
    table: Arc<RwLock<TaskTable>>,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(TaskTable::default())),
        }
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn bulk_create(
        &self,
        order_id: OrderId,
        count: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut table = self.table.write().await;
        let mut created = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = table.allocate(order_id, now);
            created.push(table.tasks[&id].clone());
        }
        debug!(order_id = %order_id, count, "Tasks materialized");
        Ok(created)
    }

    async fn create_replacement(&self, original: TaskId, now: DateTime<Utc>) -> Result<Task> {
        let mut table = self.table.write().await;

        let (order_id, mut faults, rejected_by) = {
            let task = table
                .tasks
                .get(&original)
                .ok_or(EngineError::TaskNotFound(original))?;
            if task.status != TaskStatus::Rejected {
                return Err(EngineError::WrongState {
                    expected: TaskStatus::Rejected.to_string(),
                    actual: task.status.to_string(),
                });
            }
            (
                task.order_id,
                task.prior_worker_faults.clone(),
                task.assigned_user,
            )
        };

        if let Some(worker) = rejected_by {
            if !faults.contains(&worker) {
                faults.push(worker);
            }
        }

        let id = table.allocate(order_id, now);
        if let Some(replacement) = table.tasks.get_mut(&id) {
            replacement.prior_worker_faults = faults;
        }
        if let Some(task) = table.tasks.get_mut(&original) {
            task.replaced_by = Some(id);
        }

        info!(
            original = %original,
            replacement = %id,
            order_id = %order_id,
            "♻️ Replacement task created"
        );
        Ok(table.tasks[&id].clone())
    }

    async fn get(&self, task_id: TaskId) -> Result<Task> {
        let table = self.table.read().await;
        table
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(EngineError::TaskNotFound(task_id))
    }

    async fn claim(
        &self,
        task_id: TaskId,
        user: UserId,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let mut table = self.table.write().await;

        // One active assignment per worker, checked at the same
        // linearization point as the status flip.
        let busy = table
            .tasks
            .values()
            .any(|task| task.status == TaskStatus::Assigned && task.assigned_user == Some(user));
        if busy {
            return Err(EngineError::HasActiveTask(user));
        }

        let task = table
            .tasks
            .get_mut(&task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;

        if task.status != TaskStatus::Pending {
            return Ok(None);
        }

        task.status = TaskStatus::Assigned;
        task.assigned_user = Some(user);
        task.assigned_at = Some(now);
        task.expires_at = Some(deadline);

        Ok(Some(task.clone()))
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut table = self.table.write().await;
        let mut released = Vec::new();

        for task in table.tasks.values_mut() {
            if task.status != TaskStatus::Assigned {
                continue;
            }
            let lapsed = task.expires_at.map(|at| at <= now).unwrap_or(false);
            if !lapsed {
                continue;
            }

            task.status = TaskStatus::Pending;
            task.assigned_user = None;
            task.assigned_at = None;
            task.expires_at = None;
            task.attempt_count += 1;
            released.push(task.clone());
        }

        if !released.is_empty() {
            info!(count = released.len(), "⏰ Lapsed assignments released");
        }
        Ok(released)
    }

    async fn reset_for_retry(&self, task_id: TaskId, user: UserId) -> Result<Task> {
        let mut table = self.table.write().await;
        let task = table
            .tasks
            .get_mut(&task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;

        Self::require_assigned_to(task, task_id, user)?;

        task.status = TaskStatus::Pending;
        task.assigned_user = None;
        task.assigned_at = None;
        task.expires_at = None;
        task.attempt_count += 1;

        Ok(task.clone())
    }

    async fn mark_verified(
        &self,
        task_id: TaskId,
        user: UserId,
        validation_ref: String,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut table = self.table.write().await;
        let task = table
            .tasks
            .get_mut(&task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;

        Self::require_assigned_to(task, task_id, user)?;

        // Deadline re-checked here so a sweep racing the verification
        // resolves to exactly one winner.
        if let Some(expires_at) = task.expires_at {
            if now >= expires_at {
                return Err(EngineError::Expired(task_id));
            }
        }

        task.status = TaskStatus::Verified;
        task.completed_at = Some(now);
        task.validation_ref = Some(validation_ref);

        Ok(task.clone())
    }

    async fn mark_rejected(
        &self,
        task_id: TaskId,
        user: UserId,
        reason: String,
        refunded: bool,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut table = self.table.write().await;
        let task = table
            .tasks
            .get_mut(&task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;

        Self::require_assigned_to(task, task_id, user)?;

        task.status = TaskStatus::Rejected;
        task.completed_at = Some(now);
        task.reject_reason = Some(reason);
        task.refunded = refunded;

        Ok(task.clone())
    }

    async fn reject_pending_for_order(
        &self,
        order_id: OrderId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut table = self.table.write().await;
        let ids = table.by_order.get(&order_id).cloned().unwrap_or_default();
        let mut rejected = Vec::new();

        for id in ids {
            if let Some(task) = table.tasks.get_mut(&id) {
                if task.status != TaskStatus::Pending {
                    continue;
                }
                task.status = TaskStatus::Rejected;
                task.completed_at = Some(now);
                task.reject_reason = Some(reason.clone());
                task.refunded = true;
                rejected.push(task.clone());
            }
        }

        Ok(rejected)
    }

    async fn active_task_for(&self, user: UserId) -> Result<Option<Task>> {
        let table = self.table.read().await;
        Ok(table
            .tasks
            .values()
            .find(|task| task.status == TaskStatus::Assigned && task.assigned_user == Some(user))
            .cloned())
    }

    async fn tasks_for_order(&self, order_id: OrderId) -> Result<Vec<Task>> {
        let table = self.table.read().await;
        let ids = table.by_order.get(&order_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| table.tasks.get(id))
            .cloned()
            .collect())
    }

    async fn orders_verified_by(&self, user: UserId) -> Result<HashSet<OrderId>> {
        let table = self.table.read().await;
        Ok(table
            .tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Verified && task.assigned_user == Some(user)
            })
            .map(|task| task.order_id)
            .collect())
    }

    async fn find_candidates(
        &self,
        worker: UserId,
        exclude_orders: &HashSet<OrderId>,
        limit: usize,
    ) -> Result<Vec<Task>> {
        let table = self.table.read().await;

        let credited: HashSet<OrderId> = table
            .tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Verified && task.assigned_user == Some(worker)
            })
            .map(|task| task.order_id)
            .collect();

        let mut candidates: Vec<&Task> = table
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| !exclude_orders.contains(&task.order_id))
            .filter(|task| !credited.contains(&task.order_id))
            .filter(|task| !task.prior_worker_faults.contains(&worker))
            .collect();

        candidates.sort_by_key(|task| (task.created_at, task.order_id, task.id));
        candidates.truncate(limit);

        Ok(candidates.into_iter().cloned().collect())
    }
}

impl MemoryTaskStore {
    fn require_assigned_to(task: &Task, task_id: TaskId, user: UserId) -> Result<()> {
        if task.status != TaskStatus::Assigned {
            return Err(EngineError::WrongState {
                expected: TaskStatus::Assigned.to_string(),
                actual: task.status.to_string(),
            });
        }
        if task.assigned_user != Some(user) {
            return Err(EngineError::NotYours {
                task_id,
                user_id: user,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let store = MemoryTaskStore::new();
        let t = now();
        let tasks = store.bulk_create(OrderId::new(1), 1, t).await.unwrap();
        let task_id = tasks[0].id;
        let deadline = t + Duration::seconds(60);

        let first = store
            .claim(task_id, UserId::new(2), t, deadline)
            .await
            .unwrap();
        assert!(first.is_some());

        // Second claim loses the race.
        let second = store
            .claim(task_id, UserId::new(3), t, deadline)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_claim_enforces_single_active() {
        let store = MemoryTaskStore::new();
        let t = now();
        let tasks = store.bulk_create(OrderId::new(1), 2, t).await.unwrap();
        let worker = UserId::new(2);
        let deadline = t + Duration::seconds(60);

        store.claim(tasks[0].id, worker, t, deadline).await.unwrap();
        let result = store.claim(tasks[1].id, worker, t, deadline).await;
        assert!(matches!(result, Err(EngineError::HasActiveTask(_))));
    }

    #[tokio::test]
    async fn test_release_expired() {
        let store = MemoryTaskStore::new();
        let t = now();
        let tasks = store.bulk_create(OrderId::new(1), 1, t).await.unwrap();
        let worker = UserId::new(2);
        let deadline = t + Duration::seconds(60);

        store.claim(tasks[0].id, worker, t, deadline).await.unwrap();

        // Not yet lapsed.
        let released = store
            .release_expired(t + Duration::seconds(59))
            .await
            .unwrap();
        assert!(released.is_empty());

        // Deadline itself counts as lapsed.
        let released = store.release_expired(deadline).await.unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].attempt_count, 1);
        assert_eq!(released[0].status, TaskStatus::Pending);
        assert!(released[0].assigned_user.is_none());
    }

    #[tokio::test]
    async fn test_mark_verified_requires_live_assignment() {
        let store = MemoryTaskStore::new();
        let t = now();
        let tasks = store.bulk_create(OrderId::new(1), 1, t).await.unwrap();
        let worker = UserId::new(2);
        let deadline = t + Duration::seconds(60);

        store.claim(tasks[0].id, worker, t, deadline).await.unwrap();

        // Wrong worker.
        let wrong = store
            .mark_verified(tasks[0].id, UserId::new(3), "ref".to_string(), t)
            .await;
        assert!(matches!(wrong, Err(EngineError::NotYours { .. })));

        // At the deadline the assignment is dead.
        let expired = store
            .mark_verified(tasks[0].id, worker, "ref".to_string(), deadline)
            .await;
        assert!(matches!(expired, Err(EngineError::Expired(_))));

        let verified = store
            .mark_verified(
                tasks[0].id,
                worker,
                "ref".to_string(),
                t + Duration::seconds(30),
            )
            .await
            .unwrap();
        assert_eq!(verified.status, TaskStatus::Verified);
        assert_eq!(verified.validation_ref.as_deref(), Some("ref"));
    }

    #[tokio::test]
    async fn test_replacement_inherits_faults() {
        let store = MemoryTaskStore::new();
        let t = now();
        let tasks = store.bulk_create(OrderId::new(1), 1, t).await.unwrap();
        let worker = UserId::new(2);
        let deadline = t + Duration::seconds(60);

        store.claim(tasks[0].id, worker, t, deadline).await.unwrap();
        store
            .mark_rejected(tasks[0].id, worker, "not_performed".to_string(), false, t)
            .await
            .unwrap();

        let replacement = store.create_replacement(tasks[0].id, t).await.unwrap();
        assert_eq!(replacement.status, TaskStatus::Pending);
        assert!(replacement.prior_worker_faults.contains(&worker));

        let original = store.get(tasks[0].id).await.unwrap();
        assert_eq!(original.replaced_by, Some(replacement.id));

        // The faulting worker never sees the unit again.
        let candidates = store
            .find_candidates(worker, &HashSet::new(), 10)
            .await
            .unwrap();
        assert!(candidates.is_empty());

        let candidates = store
            .find_candidates(UserId::new(3), &HashSet::new(), 10)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_candidate_ordering() {
        let store = MemoryTaskStore::new();
        let t0 = now();
        let t1 = t0 + Duration::seconds(10);

        // Later-created order first in insertion, to prove ordering is by
        // creation time, not map iteration.
        store.bulk_create(OrderId::new(2), 1, t1).await.unwrap();
        let older = store.bulk_create(OrderId::new(1), 2, t0).await.unwrap();

        let candidates = store
            .find_candidates(UserId::new(9), &HashSet::new(), 10)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].id, older[0].id);
        assert_eq!(candidates[1].id, older[1].id);
        assert_eq!(candidates[2].order_id, OrderId::new(2));
    }

    #[tokio::test]
    async fn test_reject_pending_for_order() {
        let store = MemoryTaskStore::new();
        let t = now();
        let tasks = store.bulk_create(OrderId::new(1), 3, t).await.unwrap();
        let worker = UserId::new(2);
        let deadline = t + Duration::seconds(60);

        // One task is held by a worker; it must be left alone.
        store.claim(tasks[0].id, worker, t, deadline).await.unwrap();

        let rejected = store
            .reject_pending_for_order(OrderId::new(1), "order_cancelled".to_string(), t)
            .await
            .unwrap();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.iter().all(|task| task.refunded));

        let held = store.get(tasks[0].id).await.unwrap();
        assert_eq!(held.status, TaskStatus::Assigned);
    }
}
