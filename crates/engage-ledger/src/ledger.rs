use crate::error::{LedgerError, Result};
use crate::storage::LedgerStorage;
use crate::types::{CoinAmount, CoinEntry, EntryReason, EntryRef};
use chrono::Utc;
use engage_types::UserId;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Result of applying (or replaying) a debit/credit.
#[derive(Debug, Clone)]
pub struct AppliedEntry {
    pub entry: CoinEntry,
    pub new_balance: CoinAmount,
    /// True when the `(reason, reference)` pair had already been applied and
    /// this call was a no-op returning the prior entry.
    pub replayed: bool,
}

/// Authoritative record of coin movements.
///
/// Balances are a cached projection of the entry log, updated in the same
/// storage transaction as the entry append. `(reason, reference)` pairs are
/// unique; replayed calls resolve to the prior entry instead of double
/// applying.
pub struct Ledger {
    storage: Arc<dyn LedgerStorage>,
    // Serializes the check-then-write of conditional updates.
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(storage: Arc<dyn LedgerStorage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Add `amount` to a user's balance. Requires `amount > 0`.
    pub async fn credit(
        &self,
        user: UserId,
        amount: CoinAmount,
        reason: EntryReason,
        reference: EntryRef,
    ) -> Result<AppliedEntry> {
        if amount == CoinAmount::ZERO {
            return Err(LedgerError::InvalidAmount(
                "credit amount must be positive".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;

        if let Some(prior) = self.replay(user, reason, reference).await? {
            return Ok(prior);
        }

        let before = self.storage.get_balance(user).await?;
        let after = before.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidAmount(format!("balance overflow for user {}", user))
        })?;

        let entry = self
            .apply(user, amount.as_delta(), after, reason, reference)
            .await?;

        info!(
            user = %user,
            amount = %amount,
            balance_before = before.as_coins(),
            balance_after = after.as_coins(),
            reason = %reason,
            reference = %reference,
            "💰 Coins credited"
        );

        Ok(AppliedEntry {
            entry,
            new_balance: after,
            replayed: false,
        })
    }

    /// Remove `amount` from a user's balance; fails with `InsufficientFunds`
    /// when the balance cannot cover it. The balance check and the write
    /// happen under one lock, so a user's balance never goes negative.
    pub async fn debit(
        &self,
        user: UserId,
        amount: CoinAmount,
        reason: EntryReason,
        reference: EntryRef,
    ) -> Result<AppliedEntry> {
        if amount == CoinAmount::ZERO {
            return Err(LedgerError::InvalidAmount(
                "debit amount must be positive".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;

        if let Some(prior) = self.replay(user, reason, reference).await? {
            return Ok(prior);
        }

        let before = self.storage.get_balance(user).await?;
        let after = before
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds {
                balance: before,
                needed: amount,
            })?;

        let entry = self
            .apply(user, -amount.as_delta(), after, reason, reference)
            .await?;

        info!(
            user = %user,
            amount = %amount,
            balance_before = before.as_coins(),
            balance_after = after.as_coins(),
            reason = %reason,
            reference = %reference,
            "💸 Coins debited"
        );

        Ok(AppliedEntry {
            entry,
            new_balance: after,
            replayed: false,
        })
    }

    pub async fn balance(&self, user: UserId) -> Result<CoinAmount> {
        self.storage.get_balance(user).await
    }

    pub async fn entries(&self, user: UserId) -> Result<Vec<CoinEntry>> {
        self.storage.entries_for(user).await
    }

    /// Sum of every entry delta across all users. Audit helper: equals
    /// `balance_sum` whenever the cached balances are consistent.
    pub async fn total_delta(&self) -> Result<i64> {
        let entries = self.storage.all_entries().await?;
        Ok(entries.iter().map(|entry| entry.delta).sum())
    }

    /// Sum of every cached balance across all users.
    pub async fn balance_sum(&self) -> Result<i64> {
        let mut sum: i64 = 0;
        for user in self.storage.all_users().await? {
            sum += self.storage.get_balance(user).await?.as_coins() as i64;
        }
        Ok(sum)
    }

    async fn replay(
        &self,
        user: UserId,
        reason: EntryReason,
        reference: EntryRef,
    ) -> Result<Option<AppliedEntry>> {
        match self.storage.entry_by_ref(reason, reference).await? {
            Some(prior) => {
                let balance = self.storage.get_balance(user).await?;
                debug!(
                    user = %user,
                    reason = %reason,
                    reference = %reference,
                    entry_id = %prior.id,
                    "↩️ Ledger entry replayed, prior result returned"
                );
                Ok(Some(AppliedEntry {
                    entry: prior,
                    new_balance: balance,
                    replayed: true,
                }))
            }
            None => Ok(None),
        }
    }

    async fn apply(
        &self,
        user: UserId,
        delta: i64,
        new_balance: CoinAmount,
        reason: EntryReason,
        reference: EntryRef,
    ) -> Result<CoinEntry> {
        self.storage.begin_transaction().await?;

        let result = async {
            let id = self.storage.next_entry_id().await?;
            let entry = CoinEntry {
                id,
                user_id: user,
                delta,
                reason,
                reference,
                created_at: Utc::now(),
            };
            self.storage.set_balance(user, new_balance).await?;
            self.storage.append_entry(entry.clone()).await?;
            Ok(entry)
        }
        .await;

        match result {
            Ok(entry) => {
                self.storage.commit_transaction().await?;
                Ok(entry)
            }
            Err(e) => {
                self.storage.rollback_transaction().await?;
                Err(e)
            }
        }
    }
}
