//! Races the engine cares about: contended claims, sweep-vs-complete on
//! the same task, and a many-worker storm with a conservation audit.

use chrono::{Duration, TimeZone, Utc};
use engage_engine::instagram::fakes::AlwaysOkAdapter;
use engage_engine::{
    EngagementEngine, EngineConfig, EngineError, ManualClock, MemoryUserDirectory, NewOrder,
    OrderStatus, TaskStatus,
};
use engage_ledger::{CoinAmount, EntryReason, EntryRef};
use engage_types::{InteractionKind, Principal, UserId};
use std::sync::Arc;

async fn engine_with_users(
    config: EngineConfig,
    user_ids: &[u64],
) -> (Arc<EngagementEngine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let users = Arc::new(MemoryUserDirectory::new());
    for id in user_ids {
        users.register(UserId::new(*id), &format!("user{}", id)).await;
    }
    let engine = Arc::new(
        EngagementEngine::in_memory(config, users, Arc::new(AlwaysOkAdapter), clock.clone())
            .unwrap(),
    );
    (engine, clock)
}

async fn fund(engine: &EngagementEngine, user: UserId, coins: u64) {
    engine
        .ledger
        .credit(
            user,
            CoinAmount::from_coins(coins),
            EntryReason::AdminAdjust,
            EntryRef::Admin(user.as_u64()),
        )
        .await
        .unwrap();
}

fn like_order(count: u32) -> NewOrder {
    NewOrder {
        kind: InteractionKind::Like,
        target_url: "https://instagram.com/p/abc123/".to_string(),
        target_count: count,
        required_text: None,
    }
}

/// Two workers race for the single candidate: exactly one wins the claim,
/// the other reports no tasks, and the task is never double-assigned.
#[tokio::test]
async fn test_assignment_race_single_candidate() {
    let (engine, _clock) = engine_with_users(EngineConfig::default(), &[1, 2, 3]).await;
    let owner = UserId::new(1);
    fund(&engine, owner, 100).await;

    engine
        .place_order(Principal::user(owner), like_order(1))
        .await
        .unwrap();

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.take_task(Principal::user(UserId::new(2))).await })
    };
    let second = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.take_task(Principal::user(UserId::new(3))).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let losses = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::NoTasksAvailable)))
        .count();

    assert_eq!(wins, 1);
    assert_eq!(losses, 1);

    // The winner holds the one assignment.
    let assigned = results
        .iter()
        .find_map(|r| r.as_ref().ok())
        .expect("one winner");
    let task = engine.task(assigned.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
}

/// A sweep landing exactly at the deadline beats the late completion;
/// exactly one of the two mutates the task.
#[tokio::test]
async fn test_sweep_racing_late_completion() {
    let config = EngineConfig {
        assignment_window_secs: 60,
        ..EngineConfig::default()
    };
    let (engine, clock) = engine_with_users(config, &[1, 2]).await;
    let owner = UserId::new(1);
    let worker = UserId::new(2);
    fund(&engine, owner, 100).await;

    engine
        .place_order(Principal::user(owner), like_order(1))
        .await
        .unwrap();
    let assigned = engine.take_task(Principal::user(worker)).await.unwrap();

    clock.advance(Duration::seconds(60));

    let sweep = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sweep_expired().await })
    };
    let complete = {
        let engine = engine.clone();
        let task_id = assigned.task_id;
        tokio::spawn(async move { engine.complete_task(Principal::user(worker), task_id).await })
    };

    let sweep_report = sweep.await.unwrap().unwrap();
    let completion = complete.await.unwrap();

    // At the deadline the completion is expired no matter who ran first.
    assert!(matches!(
        completion,
        Err(EngineError::Expired(_)) | Err(EngineError::WrongState { .. })
    ));
    assert_eq!(sweep_report.released, vec![assigned.task_id]);

    let task = engine.task(assigned.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(engine.balance(worker).await.unwrap(), CoinAmount::ZERO);
}

/// Ten workers storm one ten-task order; every task is verified exactly
/// once, every worker is credited exactly once, and coins are conserved.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_storm_conserves_coins() {
    let worker_ids: Vec<u64> = (2..=11).collect();
    let mut all_ids = vec![1];
    all_ids.extend(&worker_ids);

    let (engine, _clock) = engine_with_users(EngineConfig::default(), &all_ids).await;
    let owner = UserId::new(1);
    fund(&engine, owner, 1000).await;

    let receipt = engine
        .place_order(Principal::user(owner), like_order(10))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for id in &worker_ids {
        let engine = engine.clone();
        let principal = Principal::user(UserId::new(*id));
        handles.push(tokio::spawn(async move {
            // Each worker keeps trying until it lands and settles one task
            // (one verified per order per worker caps it at one).
            for _ in 0..200 {
                match engine.take_task(principal).await {
                    Ok(assigned) => {
                        engine
                            .complete_task(principal, assigned.task_id)
                            .await
                            .unwrap();
                        return true;
                    }
                    Err(EngineError::NoTasksAvailable) => {
                        tokio::task::yield_now().await;
                    }
                    Err(other) => panic!("unexpected error: {}", other),
                }
            }
            false
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap(), "worker never landed a task");
    }

    let order = engine.order(receipt.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.remaining_count, 0);

    let tasks = engine.tasks.tasks_for_order(receipt.order_id).await.unwrap();
    assert_eq!(tasks.len(), 10);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Verified));

    for id in &worker_ids {
        assert_eq!(
            engine.balance(UserId::new(*id)).await.unwrap(),
            CoinAmount::from_coins(8)
        );
    }
    assert_eq!(
        engine.balance(owner).await.unwrap(),
        CoinAmount::from_coins(900)
    );

    let total_delta = engine.ledger.total_delta().await.unwrap();
    let balance_sum = engine.ledger.balance_sum().await.unwrap();
    assert_eq!(total_delta, balance_sum);
}
