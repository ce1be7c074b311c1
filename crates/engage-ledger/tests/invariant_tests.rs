use engage_ledger::{
    CoinAmount, EntryReason, EntryRef, Ledger, LedgerError, MemoryLedgerStorage,
};
use engage_types::{OrderId, TaskId, UserId};
use std::sync::Arc;

fn ledger() -> Arc<Ledger> {
    Arc::new(Ledger::new(Arc::new(MemoryLedgerStorage::new())))
}

/// Coin conservation: the sum of all entry deltas equals the sum of all
/// cached balances after any sequence of operations.
#[tokio::test]
async fn test_conservation_across_operations() {
    let ledger = ledger();
    let users: Vec<UserId> = (1..=10).map(UserId::new).collect();

    for (i, user) in users.iter().enumerate() {
        ledger
            .credit(
                *user,
                CoinAmount::from_coins(100 + i as u64),
                EntryReason::AdminAdjust,
                EntryRef::Admin(i as u64),
            )
            .await
            .unwrap();
    }

    // Interleave debits, credits and failed debits.
    for i in 0..50u64 {
        let user = users[(i % 10) as usize];
        let order = EntryRef::Order(OrderId::new(i));
        let amount = CoinAmount::from_coins(i % 7 + 1);

        if ledger.balance(user).await.unwrap() >= amount {
            ledger
                .debit(user, amount, EntryReason::OrderDebit, order)
                .await
                .unwrap();
        }
        if i % 3 == 0 {
            ledger
                .credit(
                    users[((i + 1) % 10) as usize],
                    CoinAmount::from_coins(2),
                    EntryReason::TaskCredit,
                    EntryRef::Task(TaskId::new(i)),
                )
                .await
                .unwrap();
        }

        let total_delta = ledger.total_delta().await.unwrap();
        let balance_sum = ledger.balance_sum().await.unwrap();
        assert_eq!(total_delta, balance_sum);
    }
}

/// No balance ever goes negative: a debit beyond the balance fails and
/// leaves no trace.
#[tokio::test]
async fn test_no_negative_balance() {
    let ledger = ledger();
    let user = UserId::new(1);

    ledger
        .credit(
            user,
            CoinAmount::from_coins(10),
            EntryReason::AdminAdjust,
            EntryRef::Admin(1),
        )
        .await
        .unwrap();

    let result = ledger
        .debit(
            user,
            CoinAmount::from_coins(11),
            EntryReason::OrderDebit,
            EntryRef::Order(OrderId::new(1)),
        )
        .await;

    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
    assert_eq!(
        ledger.balance(user).await.unwrap(),
        CoinAmount::from_coins(10)
    );
    assert_eq!(ledger.entries(user).await.unwrap().len(), 1);
}

/// Idempotency: replaying a debit or credit with the same
/// `(reason, reference)` produces the same final balance as applying it once.
#[tokio::test]
async fn test_replay_idempotency() {
    let ledger = ledger();
    let user = UserId::new(1);

    ledger
        .credit(
            user,
            CoinAmount::from_coins(100),
            EntryReason::AdminAdjust,
            EntryRef::Admin(1),
        )
        .await
        .unwrap();

    let reference = EntryRef::Order(OrderId::new(9));
    for _ in 0..5 {
        let applied = ledger
            .debit(user, CoinAmount::from_coins(30), EntryReason::OrderDebit, reference)
            .await
            .unwrap();
        assert_eq!(applied.new_balance, CoinAmount::from_coins(70));
    }

    assert_eq!(
        ledger.balance(user).await.unwrap(),
        CoinAmount::from_coins(70)
    );
    assert_eq!(ledger.entries(user).await.unwrap().len(), 2);
}

/// Concurrent replays of the same credit apply exactly once.
#[tokio::test]
async fn test_concurrent_replay_applies_once() {
    let ledger = ledger();
    let user = UserId::new(7);
    let reference = EntryRef::Task(TaskId::new(1));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .credit(user, CoinAmount::from_coins(8), EntryReason::TaskCredit, reference)
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        ledger.balance(user).await.unwrap(),
        CoinAmount::from_coins(8)
    );
    assert_eq!(ledger.entries(user).await.unwrap().len(), 1);
    assert_eq!(ledger.total_delta().await.unwrap(), 8);
}

/// Concurrent debits against one balance never overdraw it.
#[tokio::test]
async fn test_concurrent_debits_respect_balance() {
    let ledger = ledger();
    let user = UserId::new(3);

    ledger
        .credit(
            user,
            CoinAmount::from_coins(50),
            EntryReason::AdminAdjust,
            EntryRef::Admin(1),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10u64 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .debit(
                    user,
                    CoinAmount::from_coins(10),
                    EntryReason::OrderDebit,
                    EntryRef::Order(OrderId::new(i)),
                )
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(ledger.balance(user).await.unwrap(), CoinAmount::ZERO);
    assert_eq!(ledger.total_delta().await.unwrap(), 0);
}
