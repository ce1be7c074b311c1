use crate::types::CandidateTask;
use engage_types::{OrderId, TaskId, UserId};
use std::collections::HashSet;

/// Deterministic choice of the next task for a worker.
///
/// Rules, applied in order:
/// 1. Never a task from an order the worker owns.
/// 2. Never a task from an order the worker already has a verified task in.
/// 3. Never a unit of work the worker previously flunked.
/// 4. Oldest creation time wins; ties break by lowest order id, then lowest
///    task id.
///
/// Pure and clock-free: identical inputs always pick the same task, which
/// keeps dispatch starvation-free under a fixed worker population.
pub fn choose_task(
    worker: UserId,
    candidates: &[CandidateTask],
    credited_orders: &HashSet<OrderId>,
) -> Option<TaskId> {
    let mut eligible: Vec<&CandidateTask> = candidates
        .iter()
        .filter(|candidate| candidate.order_owner != worker)
        .filter(|candidate| !credited_orders.contains(&candidate.order_id))
        .filter(|candidate| !candidate.prior_worker_faults.contains(&worker))
        .collect();

    eligible.sort_by_key(|candidate| {
        (
            candidate.created_at,
            candidate.order_id,
            candidate.task_id,
        )
    });

    eligible.first().map(|candidate| candidate.task_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candidate(task: u64, order: u64, owner: u64, age_secs: i64) -> CandidateTask {
        CandidateTask {
            task_id: TaskId::new(task),
            order_id: OrderId::new(order),
            order_owner: UserId::new(owner),
            created_at: Utc::now() - Duration::seconds(age_secs),
            prior_worker_faults: Vec::new(),
        }
    }

    #[test]
    fn test_excludes_own_orders() {
        let worker = UserId::new(1);
        let candidates = vec![candidate(1, 1, 1, 100), candidate(2, 2, 9, 10)];

        let chosen = choose_task(worker, &candidates, &HashSet::new());
        assert_eq!(chosen, Some(TaskId::new(2)));
    }

    #[test]
    fn test_excludes_credited_orders() {
        let worker = UserId::new(1);
        let candidates = vec![candidate(1, 1, 9, 100), candidate(2, 2, 9, 10)];
        let credited: HashSet<OrderId> = [OrderId::new(1)].into_iter().collect();

        let chosen = choose_task(worker, &candidates, &credited);
        assert_eq!(chosen, Some(TaskId::new(2)));
    }

    #[test]
    fn test_excludes_flunked_units() {
        let worker = UserId::new(1);
        let mut flunked = candidate(1, 1, 9, 100);
        flunked.prior_worker_faults.push(worker);
        let candidates = vec![flunked, candidate(2, 2, 9, 10)];

        let chosen = choose_task(worker, &candidates, &HashSet::new());
        assert_eq!(chosen, Some(TaskId::new(2)));
    }

    #[test]
    fn test_oldest_first_with_id_tie_breaks() {
        let worker = UserId::new(1);
        let now = Utc::now();

        let mut a = candidate(5, 3, 9, 0);
        let mut b = candidate(4, 3, 9, 0);
        let mut c = candidate(9, 2, 9, 0);
        a.created_at = now;
        b.created_at = now;
        c.created_at = now;

        // Same age, same order: lowest task id.
        let chosen = choose_task(worker, &[a.clone(), b.clone()], &HashSet::new());
        assert_eq!(chosen, Some(TaskId::new(4)));

        // Same age, different orders: lowest order id.
        let chosen = choose_task(worker, &[a, b, c], &HashSet::new());
        assert_eq!(chosen, Some(TaskId::new(9)));
    }

    #[test]
    fn test_none_when_everything_excluded() {
        let worker = UserId::new(1);
        let candidates = vec![candidate(1, 1, 1, 100)];

        assert_eq!(choose_task(worker, &candidates, &HashSet::new()), None);
        assert_eq!(choose_task(worker, &[], &HashSet::new()), None);
    }
}
