//! Auth - セッショントークンとパスワードハッシュ
//!
//! - トークンは HS256 の JWT（`sub` = ユーザー ID）
//! - 有効期限は Clock で判定する（テストで時刻を固定できる）
//! - パスワードは Argon2id。CPU を食うので spawn_blocking で回す

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::UserId;
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("could not issue token: {0}")]
    Issue(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            clock,
        }
    }

    pub fn issue(&self, user: UserId) -> Result<String, AuthError> {
        let now = self.clock.now();
        let claims = Claims {
            sub: user.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against our clock below
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        if data.claims.exp <= self.clock.now().timestamp() {
            return Err(AuthError::Expired);
        }
        data.claims
            .sub
            .parse()
            .map_err(|e: crate::domain::ParseIdError| AuthError::Invalid(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(pub String);

pub async fn hash_password(password: String) -> Result<String, HashError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HashError(e.to_string()))
    })
    .await
    .map_err(|e| HashError(e.to_string()))?
}

/// `false` for a wrong password and for an unparseable stored hash.
pub async fn verify_password(password: String, stored: String) -> bool {
    tokio::task::spawn_blocking(move || {
        PasswordHash::new(&stored)
            .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    fn issuer(clock: Arc<FixedClock>) -> TokenIssuer {
        TokenIssuer::new(b"test-secret", Duration::hours(2), clock)
    }

    #[test]
    fn token_roundtrip_and_expiry() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let tokens = issuer(clock.clone());
        let user = UserId::from_ulid(Ulid::new());

        let token = tokens.issue(user).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), user);

        clock.advance(Duration::hours(2));
        assert_eq!(tokens.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn foreign_or_garbage_tokens_are_invalid() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let ours = issuer(clock.clone());
        let theirs = TokenIssuer::new(b"other-secret", Duration::hours(2), clock);
        let token = theirs.issue(UserId::from_ulid(Ulid::new())).unwrap();

        assert!(matches!(ours.verify(&token), Err(AuthError::Invalid(_))));
        assert!(matches!(ours.verify("not.a.jwt"), Err(AuthError::Invalid(_))));
    }

    #[tokio::test]
    async fn password_hash_verifies() {
        let hash = hash_password("hunter22".into()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22".into(), hash.clone()).await);
        assert!(!verify_password("hunter23".into(), hash).await);
        assert!(!verify_password("x".into(), "not-a-hash".into()).await);
    }
}
