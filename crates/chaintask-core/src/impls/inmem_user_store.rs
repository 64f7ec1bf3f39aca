//! InMemoryUserStore - 開発・テスト用の UserStore

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::{Address, StoreError, UserId, UserRecord};
use crate::ports::UserStore;

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Which unique column `candidate` would collide on, ignoring the row itself.
fn conflict(users: &HashMap<UserId, UserRecord>, candidate: &UserRecord) -> Option<&'static str> {
    users.values().filter(|u| u.id != candidate.id).find_map(|u| {
        if u.username == candidate.username {
            Some("users.username")
        } else if u.email == candidate.email {
            Some("users.email")
        } else if u.wallet.is_some() && u.wallet == candidate.wallet {
            Some("users.wallet")
        } else {
            None
        }
    })
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(StoreError::Duplicate("users.id".to_string()));
        }
        if let Some(column) = conflict(&users, &user) {
            return Err(StoreError::Duplicate(column.to_string()));
        }
        users.insert(user.id, user);
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = email.to_lowercase();
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_wallet(&self, wallet: &Address) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.wallet.as_ref() == Some(wallet))
            .cloned())
    }

    async fn update(&self, user: UserRecord) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Ok(false);
        }
        if let Some(column) = conflict(&users, &user) {
            return Err(StoreError::Duplicate(column.to_string()));
        }
        users.insert(user.id, user);
        Ok(true)
    }
}
