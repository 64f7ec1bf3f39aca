//! Account records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::Address;
use super::ids::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub theme: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
        }
    }
}

/// A registered user.
///
/// `wallet` is unique across all users; it is set once and only changes
/// through an explicit reset.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    /// Always lowercased.
    pub email: String,
    pub password_hash: String,
    pub wallet: Option<Address>,
    pub preferences: Preferences,
    /// Opaque web-push subscription as sent by the browser.
    pub push_subscription: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(
        id: UserId,
        username: String,
        email: String,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            email: email.to_lowercase(),
            password_hash,
            wallet: None,
            preferences: Preferences::default(),
            push_subscription: None,
            created_at: now,
            updated_at: now,
        }
    }
}
