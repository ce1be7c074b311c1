use crate::error::{LedgerError, Result};
use crate::types::{CoinAmount, CoinEntry, EntryId, EntryReason, EntryRef};
use async_trait::async_trait;
use engage_types::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Persistence seam for the ledger.
///
/// Implementations must make each method atomic; the `Ledger` composes them
/// under its own write serialization and the begin/commit/rollback bracket.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    async fn get_balance(&self, user: UserId) -> Result<CoinAmount>;
    async fn set_balance(&self, user: UserId, balance: CoinAmount) -> Result<()>;

    async fn next_entry_id(&self) -> Result<EntryId>;
    async fn append_entry(&self, entry: CoinEntry) -> Result<()>;
    async fn entry_by_ref(
        &self,
        reason: EntryReason,
        reference: EntryRef,
    ) -> Result<Option<CoinEntry>>;
    async fn entries_for(&self, user: UserId) -> Result<Vec<CoinEntry>>;
    async fn all_entries(&self) -> Result<Vec<CoinEntry>>;
    async fn all_users(&self) -> Result<Vec<UserId>>;

    async fn begin_transaction(&self) -> Result<()>;
    async fn commit_transaction(&self) -> Result<()>;
    async fn rollback_transaction(&self) -> Result<()>;
}

#[derive(Default, Clone)]
struct LedgerTable {
    balances: HashMap<UserId, CoinAmount>,
    entries: Vec<CoinEntry>,
    by_ref: HashMap<(EntryReason, EntryRef), usize>,
    next_entry_id: u64,
}

/// In-memory ledger storage with snapshot-based rollback.
pub struct MemoryLedgerStorage {
    table: Arc<RwLock<LedgerTable>>,
    backup: Arc<RwLock<Option<LedgerTable>>>,
}

impl Default for MemoryLedgerStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStorage {
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(LedgerTable::default())),
            backup: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl LedgerStorage for MemoryLedgerStorage {
    async fn get_balance(&self, user: UserId) -> Result<CoinAmount> {
        let table = self.table.read().await;
        Ok(table
            .balances
            .get(&user)
            .copied()
            .unwrap_or(CoinAmount::ZERO))
    }

    async fn set_balance(&self, user: UserId, balance: CoinAmount) -> Result<()> {
        let mut table = self.table.write().await;
        let old_balance = table
            .balances
            .get(&user)
            .copied()
            .unwrap_or(CoinAmount::ZERO);

        table.balances.insert(user, balance);

        if old_balance != balance {
            debug!(
                user = %user,
                balance_before = old_balance.as_coins(),
                balance_after = balance.as_coins(),
                storage_type = "memory",
                "💾 Balance stored"
            );
        }
        Ok(())
    }

    async fn next_entry_id(&self) -> Result<EntryId> {
        let mut table = self.table.write().await;
        table.next_entry_id += 1;
        Ok(EntryId::new(table.next_entry_id))
    }

    async fn append_entry(&self, entry: CoinEntry) -> Result<()> {
        let mut table = self.table.write().await;
        let key = (entry.reason, entry.reference);
        if table.by_ref.contains_key(&key) {
            return Err(LedgerError::DuplicateEntry {
                reason: entry.reason,
                reference: entry.reference,
            });
        }
        let index = table.entries.len();
        table.entries.push(entry);
        table.by_ref.insert(key, index);
        Ok(())
    }

    async fn entry_by_ref(
        &self,
        reason: EntryReason,
        reference: EntryRef,
    ) -> Result<Option<CoinEntry>> {
        let table = self.table.read().await;
        Ok(table
            .by_ref
            .get(&(reason, reference))
            .map(|&index| table.entries[index].clone()))
    }

    async fn entries_for(&self, user: UserId) -> Result<Vec<CoinEntry>> {
        let table = self.table.read().await;
        Ok(table
            .entries
            .iter()
            .filter(|entry| entry.user_id == user)
            .cloned()
            .collect())
    }

    async fn all_entries(&self) -> Result<Vec<CoinEntry>> {
        let table = self.table.read().await;
        Ok(table.entries.clone())
    }

    async fn all_users(&self) -> Result<Vec<UserId>> {
        let table = self.table.read().await;
        let mut users: Vec<UserId> = table.balances.keys().copied().collect();
        for entry in &table.entries {
            if !table.balances.contains_key(&entry.user_id) {
                users.push(entry.user_id);
            }
        }
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn begin_transaction(&self) -> Result<()> {
        let table = self.table.read().await;
        let mut backup = self.backup.write().await;
        *backup = Some(table.clone());

        debug!(
            accounts = table.balances.len(),
            entries = table.entries.len(),
            storage_type = "memory",
            "📝 Transaction began (snapshot created)"
        );
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        *backup = None;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        if let Some(snapshot) = backup.take() {
            let mut table = self.table.write().await;
            *table = snapshot;
            info!(
                storage_type = "memory",
                "❌ Transaction rolled back (snapshot restored)"
            );
        }
        Ok(())
    }
}
