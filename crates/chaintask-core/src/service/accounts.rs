//! AccountService - 登録・ログイン・ウォレット連携・設定
//!
//! # 設計原則
//! - ウォレットは全ユーザーで一意。別のウォレットへの付け替えは明示的な
//!   リセットを経由する
//! - 一意性の最終判断は UserStore（Duplicate）に任せ、事前チェックは
//!   分かりやすいメッセージのためだけに行う

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{Address, ErrorKind, Preferences, StoreError, UserId, UserRecord};
use crate::ports::{Clock, IdGenerator, UserStore};

use super::auth::{self, AuthError, TokenIssuer};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum AccountError {
    /// Bad input; the message is shown to the user.
    #[error("{0}")]
    Validation(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token is not valid")]
    Unauthorized(#[source] AuthError),

    #[error("User not found")]
    UserNotFound,

    #[error("A different wallet is already linked to this account. Reset it first.")]
    WalletAlreadyLinked,

    #[error("This wallet address is already linked to another account.")]
    WalletTaken,

    #[error("could not issue token: {0}")]
    Token(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccountError::Store(e) => e.kind(),
            AccountError::Token(_) | AccountError::Hash(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub wallet_address: Option<Address>,
}

pub struct AccountService {
    users: Arc<dyn UserStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    tokens: TokenIssuer,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            users,
            ids,
            clock,
            tokens,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<UserRecord, AccountError> {
        let username = req.username.trim().to_string();
        let email = req.email.trim().to_lowercase();
        if username.is_empty() || email.is_empty() || req.password.is_empty() || req.confirm_password.is_empty() {
            return Err(AccountError::Validation("Please enter all fields".into()));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if req.password != req.confirm_password {
            return Err(AccountError::Validation("Passwords do not match".into()));
        }
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AccountError::Validation("User with this email already exists".into()));
        }
        if self.users.find_by_username(&username).await?.is_some() {
            return Err(AccountError::Validation("Username is already taken".into()));
        }

        let hash = auth::hash_password(req.password)
            .await
            .map_err(|e| AccountError::Hash(e.0))?;
        let user = UserRecord::new(self.ids.generate_user_id(), username, email, hash, self.clock.now());
        match self.users.insert(user.clone()).await {
            Ok(()) => {}
            // lost a race against a concurrent registration
            Err(StoreError::Duplicate(column)) if column.contains("username") => {
                return Err(AccountError::Validation("Username is already taken".into()));
            }
            Err(StoreError::Duplicate(_)) => {
                return Err(AccountError::Validation("User with this email already exists".into()));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(user = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AccountError> {
        let Some(user) = self.users.find_by_email(&email.trim().to_lowercase()).await? else {
            return Err(AccountError::InvalidCredentials);
        };
        if !auth::verify_password(password.to_string(), user.password_hash.clone()).await {
            return Err(AccountError::InvalidCredentials);
        }
        let token = self
            .tokens
            .issue(user.id)
            .map_err(|e| AccountError::Token(e.to_string()))?;
        Ok(LoginResponse {
            token,
            username: user.username,
            wallet_address: user.wallet,
        })
    }

    /// Resolves a session token to its user id.
    pub fn authenticate(&self, token: &str) -> Result<UserId, AccountError> {
        self.tokens.verify(token).map_err(AccountError::Unauthorized)
    }

    pub async fn user(&self, id: UserId) -> Result<UserRecord, AccountError> {
        self.users.get(id).await?.ok_or(AccountError::UserNotFound)
    }

    pub async fn link_wallet(&self, id: UserId, raw: &str) -> Result<UserRecord, AccountError> {
        if raw.trim().is_empty() {
            return Err(AccountError::Validation("Wallet address is required.".into()));
        }
        let wallet = Address::parse(raw)
            .map_err(|_| AccountError::Validation("Invalid wallet address.".into()))?;

        let mut user = self.user(id).await?;
        match &user.wallet {
            Some(current) if *current == wallet => return Ok(user),
            Some(_) => return Err(AccountError::WalletAlreadyLinked),
            None => {}
        }
        let holder = self.users.find_by_wallet(&wallet).await?;
        if holder.is_some_and(|other| other.id != id) {
            return Err(AccountError::WalletTaken);
        }

        user.wallet = Some(wallet);
        user.updated_at = self.clock.now();
        match self.users.update(user.clone()).await {
            Ok(true) => {}
            Ok(false) => return Err(AccountError::UserNotFound),
            Err(StoreError::Duplicate(_)) => return Err(AccountError::WalletTaken),
            Err(e) => return Err(e.into()),
        }
        tracing::info!(user = %id, wallet = ?user.wallet, "wallet linked");
        Ok(user)
    }

    pub async fn unlink_wallet(&self, id: UserId) -> Result<UserRecord, AccountError> {
        let mut user = self.user(id).await?;
        if user.wallet.is_none() {
            return Ok(user);
        }
        user.wallet = None;
        user.updated_at = self.clock.now();
        self.save(&user).await?;
        tracing::info!(user = %id, "wallet reset");
        Ok(user)
    }

    pub async fn preferences(&self, id: UserId) -> Result<Preferences, AccountError> {
        Ok(self.user(id).await?.preferences)
    }

    /// Blank or missing theme leaves the preference untouched.
    pub async fn update_preferences(
        &self,
        id: UserId,
        theme: Option<String>,
    ) -> Result<Preferences, AccountError> {
        let mut user = self.user(id).await?;
        if let Some(theme) = theme.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            user.preferences.theme = theme;
            user.updated_at = self.clock.now();
            self.save(&user).await?;
        }
        Ok(user.preferences)
    }

    pub async fn subscribe(&self, id: UserId, subscription: serde_json::Value) -> Result<(), AccountError> {
        if !subscription.is_object() {
            return Err(AccountError::Validation("Subscription must be an object.".into()));
        }
        let mut user = self.user(id).await?;
        user.push_subscription = Some(subscription);
        user.updated_at = self.clock.now();
        self.save(&user).await
    }

    async fn save(&self, user: &UserRecord) -> Result<(), AccountError> {
        if self.users.update(user.clone()).await? {
            Ok(())
        } else {
            Err(AccountError::UserNotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryUserStore;
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn service() -> AccountService {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        AccountService::new(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
            TokenIssuer::new(b"secret", Duration::hours(2), clock),
        )
    }

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            confirm_password: password.into(),
        }
    }

    const WALLET: &str = "0xABCDEF0000000000000000000000000000000001";

    #[tokio::test]
    async fn register_validates_input() {
        let s = service();
        let cases = [
            (request("", "a@x.io", "secret1"), "Please enter all fields"),
            (request("alice", "a@x.io", "12345"), "Password must be at least 6 characters"),
            (
                RegisterRequest {
                    confirm_password: "other1".into(),
                    ..request("alice", "a@x.io", "secret1")
                },
                "Passwords do not match",
            ),
        ];
        for (req, msg) in cases {
            let err = s.register(req).await.unwrap_err();
            assert_eq!(err.to_string(), msg);
        }
    }

    #[tokio::test]
    async fn register_then_login() {
        let s = service();
        let user = s.register(request("alice", "Alice@X.io", "secret1")).await.unwrap();
        assert_eq!(user.email, "alice@x.io");

        let err = s.register(request("bob", "alice@x.io", "secret1")).await.unwrap_err();
        assert_eq!(err.to_string(), "User with this email already exists");
        let err = s.register(request("alice", "other@x.io", "secret1")).await.unwrap_err();
        assert_eq!(err.to_string(), "Username is already taken");

        let login = s.login("ALICE@x.io", "secret1").await.unwrap();
        assert_eq!(login.username, "alice");
        assert_eq!(login.wallet_address, None);
        assert_eq!(s.authenticate(&login.token).unwrap(), user.id);

        assert!(matches!(s.login("alice@x.io", "wrong!!").await, Err(AccountError::InvalidCredentials)));
        assert!(matches!(s.login("nobody@x.io", "secret1").await, Err(AccountError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn wallet_link_rules() {
        let s = service();
        let alice = s.register(request("alice", "a@x.io", "secret1")).await.unwrap();
        let bob = s.register(request("bob", "b@x.io", "secret1")).await.unwrap();

        let linked = s.link_wallet(alice.id, WALLET).await.unwrap();
        assert_eq!(linked.wallet.unwrap().as_str(), WALLET.to_lowercase());

        // same wallet again is a no-op
        s.link_wallet(alice.id, &WALLET.to_lowercase()).await.unwrap();

        let other = "0x00000000000000000000000000000000000000ff";
        assert!(matches!(s.link_wallet(alice.id, other).await, Err(AccountError::WalletAlreadyLinked)));
        assert!(matches!(s.link_wallet(bob.id, WALLET).await, Err(AccountError::WalletTaken)));
        assert!(matches!(s.link_wallet(bob.id, "0x123").await, Err(AccountError::Validation(_))));

        s.unlink_wallet(alice.id).await.unwrap();
        s.link_wallet(bob.id, WALLET).await.unwrap();
        assert_eq!(s.login("b@x.io", "secret1").await.unwrap().wallet_address.unwrap().as_str(), WALLET.to_lowercase());
    }

    #[tokio::test]
    async fn preferences_and_subscription() {
        let s = service();
        let alice = s.register(request("alice", "a@x.io", "secret1")).await.unwrap();
        assert_eq!(s.preferences(alice.id).await.unwrap().theme, "light");

        assert_eq!(s.update_preferences(alice.id, Some("dark".into())).await.unwrap().theme, "dark");
        assert_eq!(s.update_preferences(alice.id, Some("  ".into())).await.unwrap().theme, "dark");

        s.subscribe(alice.id, json!({"endpoint": "https://push.example/1"})).await.unwrap();
        assert!(s.user(alice.id).await.unwrap().push_subscription.is_some());
        assert!(s.subscribe(alice.id, json!("nope")).await.is_err());
    }
}
