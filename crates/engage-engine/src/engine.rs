use crate::assignment;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::instagram::InstagramAdapter;
use crate::order_store::{MemoryOrderStore, OrderStore};
use crate::task_store::{MemoryTaskStore, TaskStore};
use crate::types::{
    AssignedTask, CancelReceipt, CandidateTask, NewOrder, Order, OrderReceipt, OrderStatus,
    SweepReport, Task, TaskCompletion, TaskStatus,
};
use crate::users::{UserDirectory, UserProfile};
use chrono::{DateTime, Utc};
use engage_ledger::{CoinAmount, EntryReason, EntryRef, Ledger, LedgerError, MemoryLedgerStorage};
use engage_types::{validate_order_target, InteractionKind, OrderId, Principal, TaskId, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The order/task engine.
///
/// All collaborators are injected: the ledger, both stores, the user
/// directory, the Instagram adapter and the clock. Every operation takes an
/// authenticated principal; none talks HTTP, none sleeps.
pub struct EngagementEngine {
    pub ledger: Arc<Ledger>,
    pub orders: Arc<dyn OrderStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub users: Arc<dyn UserDirectory>,
    pub instagram: Arc<dyn InstagramAdapter>,
    pub clock: Arc<dyn Clock>,
    config: EngineConfig,
    order_seq: AtomicU64,
}

impl EngagementEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        ledger: Arc<Ledger>,
        orders: Arc<dyn OrderStore>,
        tasks: Arc<dyn TaskStore>,
        users: Arc<dyn UserDirectory>,
        instagram: Arc<dyn InstagramAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ledger,
            orders,
            tasks,
            users,
            instagram,
            clock,
            config,
            order_seq: AtomicU64::new(0),
        })
    }

    /// Engine over fresh in-memory stores; the persistence traits are the
    /// seam for anything durable.
    pub fn in_memory(
        config: EngineConfig,
        users: Arc<dyn UserDirectory>,
        instagram: Arc<dyn InstagramAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedgerStorage::new())));
        Self::new(
            config,
            ledger,
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemoryTaskStore::new()),
            users,
            instagram,
            clock,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Debits the owner, creates the order and materializes its tasks.
    ///
    /// The debit is the conditional step and happens first, keyed by the
    /// order id, so a retried call cannot double-charge.
    pub async fn place_order(
        &self,
        principal: Principal,
        new_order: NewOrder,
    ) -> Result<OrderReceipt> {
        let start = Instant::now();
        let owner = principal.user_id;

        let profile = self.profile(owner).await?;
        Self::require_not_banned(&profile)?;

        if new_order.target_count == 0 {
            return Err(EngineError::InvalidTarget(
                "target_count must be at least 1".to_string(),
            ));
        }
        validate_order_target(
            new_order.kind,
            &new_order.target_url,
            new_order.required_text.as_deref(),
        )?;

        let total = self
            .config
            .unit_cost
            .checked_mul(new_order.target_count)
            .ok_or_else(|| EngineError::InvalidParameter("order cost overflow".to_string()))?;

        let order_id = OrderId::new(self.order_seq.fetch_add(1, Ordering::SeqCst) + 1);

        let applied = self
            .ledger
            .debit(owner, total, EntryReason::OrderDebit, EntryRef::Order(order_id))
            .await
            .map_err(|e| match e {
                LedgerError::InsufficientFunds { .. } => {
                    EngineError::InsufficientFunds(e.to_string())
                }
                other => EngineError::Ledger(other),
            })?;

        let now = self.clock.now();
        let order = Order {
            id: order_id,
            owner,
            kind: new_order.kind,
            target_url: new_order.target_url.clone(),
            required_text: new_order.required_text.clone(),
            target_count: new_order.target_count,
            remaining_count: new_order.target_count,
            status: OrderStatus::Active,
            cancel_requested: false,
            created_at: now,
        };
        self.orders.insert(order).await?;
        let created = self
            .tasks
            .bulk_create(order_id, new_order.target_count, now)
            .await?;

        info!(
            order_id = %order_id,
            owner = %owner,
            kind = %new_order.kind,
            target_count = new_order.target_count,
            cost = %total,
            new_balance = %applied.new_balance,
            tasks_created = created.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "🛒 Order placed"
        );

        Ok(OrderReceipt {
            order_id,
            new_balance: applied.new_balance,
        })
    }

    /// Picks and claims the next task for a worker.
    ///
    /// A lost claim race is retried internally a bounded number of times
    /// before reporting `NoTasksAvailable`.
    pub async fn take_task(&self, principal: Principal) -> Result<AssignedTask> {
        let worker = principal.user_id;

        let profile = self.profile(worker).await?;
        Self::require_not_banned(&profile)?;
        if profile.instagram_handle.is_none() {
            return Err(EngineError::NoLinkedAccount(worker));
        }
        if self.tasks.active_task_for(worker).await?.is_some() {
            return Err(EngineError::HasActiveTask(worker));
        }

        let mut exclude: HashSet<OrderId> = HashSet::new();
        for order in self.orders.list_active_owned_by(worker).await? {
            exclude.insert(order.id);
        }
        // Cancel-requested orders are off the market even while their
        // assigned tasks run out.
        for order in self.orders.list_active_not_owned_by(worker).await? {
            if order.cancel_requested {
                exclude.insert(order.id);
            }
        }

        let credited = self.tasks.orders_verified_by(worker).await?;

        for attempt in 0..self.config.claim_retry_limit.max(1) {
            let now = self.clock.now();
            let raw = self
                .tasks
                .find_candidates(worker, &exclude, self.config.max_candidates_per_take)
                .await?;
            if raw.is_empty() {
                return Err(EngineError::NoTasksAvailable);
            }

            let mut candidates = Vec::with_capacity(raw.len());
            for task in &raw {
                let order = self.orders.get(task.order_id).await?;
                candidates.push(CandidateTask {
                    task_id: task.id,
                    order_id: order.id,
                    order_owner: order.owner,
                    created_at: task.created_at,
                    prior_worker_faults: task.prior_worker_faults.clone(),
                });
            }

            let chosen = match assignment::choose_task(worker, &candidates, &credited) {
                Some(task_id) => task_id,
                None => return Err(EngineError::NoTasksAvailable),
            };

            let deadline = now + self.config.assignment_window();
            match self.tasks.claim(chosen, worker, now, deadline).await? {
                Some(task) => {
                    let order = self.orders.get(task.order_id).await?;
                    info!(
                        task_id = %task.id,
                        order_id = %order.id,
                        worker = %worker,
                        kind = %order.kind,
                        expires_at = %deadline,
                        attempt,
                        "👷 Task claimed"
                    );
                    return Ok(AssignedTask {
                        task_id: task.id,
                        order_id: order.id,
                        kind: order.kind,
                        target_url: order.target_url.clone(),
                        required_text: order.required_text.clone(),
                        expires_at: deadline,
                    });
                }
                None => {
                    debug!(task_id = %chosen, worker = %worker, attempt, "Claim lost, retrying");
                }
            }
        }

        Err(EngineError::NoTasksAvailable)
    }

    /// Verifies a worker's claimed task against Instagram and settles it.
    ///
    /// The adapter call is the only I/O-bound step and runs between the
    /// read and the mutating portion; the mutation re-checks the
    /// assignment, so a racing sweep resolves to exactly one winner.
    pub async fn complete_task(
        &self,
        principal: Principal,
        task_id: TaskId,
    ) -> Result<TaskCompletion> {
        let start = Instant::now();
        let worker = principal.user_id;

        let profile = self.profile(worker).await?;
        Self::require_not_banned(&profile)?;
        let handle = profile
            .instagram_handle
            .clone()
            .ok_or(EngineError::NoLinkedAccount(worker))?;

        let task = self.tasks.get(task_id).await?;
        if task.status != TaskStatus::Assigned {
            return Err(EngineError::WrongState {
                expected: TaskStatus::Assigned.to_string(),
                actual: task.status.to_string(),
            });
        }
        if task.assigned_user != Some(worker) {
            return Err(EngineError::NotYours {
                task_id,
                user_id: worker,
            });
        }
        let now = self.clock.now();
        if let Some(expires_at) = task.expires_at {
            if now >= expires_at {
                return Err(EngineError::Expired(task_id));
            }
        }

        let order = self.orders.get(task.order_id).await?;

        let outcome = match order.kind {
            InteractionKind::Like => {
                self.instagram
                    .validate_like(&handle, &order.target_url)
                    .await?
            }
            InteractionKind::Follow => {
                self.instagram
                    .validate_follow(&handle, &order.target_url)
                    .await?
            }
            InteractionKind::Comment => {
                let text = order.required_text.as_deref().unwrap_or_default();
                self.instagram
                    .validate_comment(&handle, &order.target_url, text)
                    .await?
            }
        };

        if outcome.ok {
            return self.settle_verified(&order, &task, worker, start).await;
        }

        let reason = outcome.reason_text();

        if !outcome.terminal && task.attempt_count < self.config.max_retries {
            self.tasks.reset_for_retry(task_id, worker).await?;
            info!(
                task_id = %task_id,
                order_id = %order.id,
                worker = %worker,
                reason = %reason,
                attempt_count = task.attempt_count + 1,
                "🔁 Retryable validation failure, task returned to pool"
            );
            return Ok(TaskCompletion::Retryable { reason });
        }

        let worker_fault = outcome.terminal
            && outcome
                .reason
                .as_ref()
                .map(|r| r.is_worker_fault())
                .unwrap_or(false);

        if worker_fault {
            self.settle_worker_fault(&order, &task, worker, reason).await
        } else {
            self.settle_refunded(&order, &task, worker, reason).await
        }
    }

    /// Cancels an active order: pending tasks are rejected and refunded;
    /// assigned tasks run to their natural conclusion, after which the
    /// order finalizes as cancelled.
    pub async fn cancel_order(
        &self,
        principal: Principal,
        order_id: OrderId,
    ) -> Result<CancelReceipt> {
        let order = self.orders.get(order_id).await?;

        if order.owner != principal.user_id && !principal.is_admin {
            return Err(EngineError::NotOwner { order_id });
        }
        if order.status != OrderStatus::Active {
            return Err(EngineError::IllegalTransition {
                from: order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }

        let now = self.clock.now();
        self.orders.request_cancel(order_id).await?;

        let rejected = self
            .tasks
            .reject_pending_for_order(order_id, "order_cancelled".to_string(), now)
            .await?;

        let mut refunded = CoinAmount::ZERO;
        for task in &rejected {
            self.refund_unit(&order, task.id).await?;
            self.orders.decrement_remaining(order_id).await?;
            refunded = refunded
                .checked_add(self.config.unit_cost)
                .ok_or_else(|| EngineError::InvalidParameter("refund overflow".to_string()))?;
        }

        let order_status = self.finalize_if_settled(order_id).await?;
        let new_balance = self.ledger.balance(order.owner).await?;

        info!(
            order_id = %order_id,
            owner = %order.owner,
            rejected_tasks = rejected.len(),
            refunded = %refunded,
            order_status = %order_status,
            "🛑 Order cancellation requested"
        );

        Ok(CancelReceipt {
            order_id,
            refunded,
            order_status,
            new_balance,
        })
    }

    /// Periodic maintenance: returns lapsed assignments to the pool. Tasks
    /// freed for a cancel-requested order do not re-enter the pool; their
    /// cancellation completes instead.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let released = self.tasks.release_expired(now).await?;

        let mut cancelled_rejected = Vec::new();
        let mut seen_orders = HashSet::new();

        for task in &released {
            if !seen_orders.insert(task.order_id) {
                continue;
            }
            let order = self.orders.get(task.order_id).await?;
            if !order.cancel_requested || order.status != OrderStatus::Active {
                continue;
            }

            let rejected = self
                .tasks
                .reject_pending_for_order(order.id, "order_cancelled".to_string(), now)
                .await?;
            for freed in &rejected {
                self.refund_unit(&order, freed.id).await?;
                self.orders.decrement_remaining(order.id).await?;
                cancelled_rejected.push(freed.id);
            }
            self.finalize_if_settled(order.id).await?;
        }

        if !released.is_empty() {
            info!(
                released = released.len(),
                cancelled_rejected = cancelled_rejected.len(),
                "🧹 Swept expired assignments"
            );
        }

        Ok(SweepReport {
            released: released.iter().map(|task| task.id).collect(),
            cancelled_rejected,
        })
    }

    pub async fn balance(&self, user: UserId) -> Result<CoinAmount> {
        Ok(self.ledger.balance(user).await?)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.orders.get(order_id).await
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Task> {
        self.tasks.get(task_id).await
    }

    async fn settle_verified(
        &self,
        order: &Order,
        task: &Task,
        worker: UserId,
        start: Instant,
    ) -> Result<TaskCompletion> {
        let now = self.clock.now();
        let validation_ref = validation_reference(task.id, worker, now);

        self.tasks
            .mark_verified(task.id, worker, validation_ref.clone(), now)
            .await?;
        let credited = self
            .ledger
            .credit(
                worker,
                self.config.reward_amount,
                EntryReason::TaskCredit,
                EntryRef::Task(task.id),
            )
            .await?;
        let order_status = self.resolve_unit(order.id).await?;

        info!(
            task_id = %task.id,
            order_id = %order.id,
            worker = %worker,
            credited = %self.config.reward_amount,
            new_balance = %credited.new_balance,
            order_status = %order_status,
            validation_ref = %validation_ref,
            duration_ms = start.elapsed().as_millis() as u64,
            "✅ Task verified"
        );

        Ok(TaskCompletion::Verified {
            credited: self.config.reward_amount,
            new_balance: credited.new_balance,
            order_status,
        })
    }

    async fn settle_worker_fault(
        &self,
        order: &Order,
        task: &Task,
        worker: UserId,
        reason: String,
    ) -> Result<TaskCompletion> {
        let now = self.clock.now();
        self.tasks
            .mark_rejected(task.id, worker, reason.clone(), false, now)
            .await?;

        let replacement = if self.config.replace_on_worker_fault {
            let replacement = self.tasks.create_replacement(task.id, now).await?;
            Some(replacement.id)
        } else {
            // The order shrinks by one unit; no refund on a worker fault.
            let order_status = self.resolve_unit(order.id).await?;
            debug!(order_id = %order.id, order_status = %order_status, "Order shrunk by worker fault");
            None
        };

        warn!(
            task_id = %task.id,
            order_id = %order.id,
            worker = %worker,
            reason = %reason,
            replacement = ?replacement,
            "❌ Task rejected (worker fault)"
        );

        Ok(TaskCompletion::RejectedWorkerFault { reason, replacement })
    }

    async fn settle_refunded(
        &self,
        order: &Order,
        task: &Task,
        worker: UserId,
        reason: String,
    ) -> Result<TaskCompletion> {
        let now = self.clock.now();
        self.tasks
            .mark_rejected(task.id, worker, reason.clone(), true, now)
            .await?;
        self.refund_unit(order, task.id).await?;
        let order_status = self.resolve_unit(order.id).await?;

        info!(
            task_id = %task.id,
            order_id = %order.id,
            owner = %order.owner,
            worker = %worker,
            refunded = %self.config.unit_cost,
            reason = %reason,
            order_status = %order_status,
            "💸 Task failed through no fault of the worker, owner refunded"
        );

        Ok(TaskCompletion::RejectedRefunded {
            reason,
            order_status,
        })
    }

    async fn refund_unit(&self, order: &Order, task_id: TaskId) -> Result<()> {
        self.ledger
            .credit(
                order.owner,
                self.config.unit_cost,
                EntryReason::Refund,
                EntryRef::Task(task_id),
            )
            .await?;
        Ok(())
    }

    /// Burns one unresolved unit off the order; finalizes it when none
    /// remain.
    async fn resolve_unit(&self, order_id: OrderId) -> Result<OrderStatus> {
        let remaining = self.orders.decrement_remaining(order_id).await?;
        if remaining > 0 {
            return Ok(OrderStatus::Active);
        }
        self.finalize_order(order_id).await
    }

    /// Finalizes the order now if nothing is pending or assigned anymore.
    async fn finalize_if_settled(&self, order_id: OrderId) -> Result<OrderStatus> {
        let order = self.orders.get(order_id).await?;
        if order.status != OrderStatus::Active {
            return Ok(order.status);
        }
        let open = self
            .tasks
            .tasks_for_order(order_id)
            .await?
            .iter()
            .any(|task| task.is_open());
        if open {
            return Ok(OrderStatus::Active);
        }
        self.finalize_order(order_id).await
    }

    /// Completed iff every resolved unit was verified and no cancellation
    /// was requested; any refund or cancellation yields cancelled.
    async fn finalize_order(&self, order_id: OrderId) -> Result<OrderStatus> {
        let order = self.orders.get(order_id).await?;
        if order.status != OrderStatus::Active {
            return Ok(order.status);
        }

        let tasks = self.tasks.tasks_for_order(order_id).await?;
        let any_refunded = tasks.iter().any(|task| task.refunded);
        let status = if order.cancel_requested || any_refunded {
            OrderStatus::Cancelled
        } else {
            OrderStatus::Completed
        };

        self.orders.update_status(order_id, status).await?;
        info!(order_id = %order_id, status = %status, "🏁 Order finalized");
        Ok(status)
    }

    async fn profile(&self, user: UserId) -> Result<UserProfile> {
        self.users
            .get(user)
            .await?
            .ok_or(EngineError::UnknownUser(user))
    }

    fn require_not_banned(profile: &UserProfile) -> Result<()> {
        if profile.banned {
            return Err(EngineError::Banned(profile.user_id));
        }
        Ok(())
    }
}

/// Opaque receipt for a verified interaction, derived the same way the
/// ledger would derive a transaction hash.
fn validation_reference(task_id: TaskId, worker: UserId, now: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&task_id.as_u64().to_le_bytes());
    hasher.update(&worker.as_u64().to_le_bytes());
    hasher.update(&now.timestamp_millis().to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_reference_is_stable() {
        let now = Utc::now();
        let a = validation_reference(TaskId::new(1), UserId::new(2), now);
        let b = validation_reference(TaskId::new(1), UserId::new(2), now);
        let c = validation_reference(TaskId::new(2), UserId::new(2), now);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
