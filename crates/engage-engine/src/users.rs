use crate::error::{EngineError, Result};
use async_trait::async_trait;
use engage_types::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Profile fields the engine cares about. Coin balances live in the ledger.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: UserId,
    pub instagram_handle: Option<String>,
    pub banned: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, user: UserId) -> Result<Option<UserProfile>>;
    async fn upsert(&self, profile: UserProfile) -> Result<()>;
    async fn set_banned(&self, user: UserId, banned: bool) -> Result<()>;
}

pub struct MemoryUserDirectory {
    profiles: Arc<RwLock<HashMap<UserId, UserProfile>>>,
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            profiles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Convenience for tests and wiring: register a user with a linked
    /// Instagram handle.
    pub async fn register(&self, user: UserId, handle: &str) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(
            user,
            UserProfile {
                user_id: user,
                instagram_handle: Some(handle.to_string()),
                banned: false,
            },
        );
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get(&self, user: UserId) -> Result<Option<UserProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&user).cloned())
    }

    async fn upsert(&self, profile: UserProfile) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.user_id, profile);
        Ok(())
    }

    async fn set_banned(&self, user: UserId, banned: bool) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(&user)
            .ok_or(EngineError::UnknownUser(user))?;
        profile.banned = banned;

        info!(user = %user, banned, "🚫 Ban flag updated");
        Ok(())
    }
}
