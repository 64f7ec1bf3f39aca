//! UserStore port - アカウント情報

use async_trait::async_trait;

use crate::domain::{Address, StoreError, UserId, UserRecord};

/// UserStore はユーザーを保存する
///
/// username / email / wallet はそれぞれ一意で、違反は `StoreError::Duplicate`
/// （メッセージにはカラム名が入る）で返す。
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: UserRecord) -> Result<(), StoreError>;

    async fn get(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// `email` is compared lowercased.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_wallet(&self, wallet: &Address) -> Result<Option<UserRecord>, StoreError>;

    /// `false` when the user does not exist.
    async fn update(&self, user: UserRecord) -> Result<bool, StoreError>;
}
