//! Service - REST API の背後にあるユースケース
//!
//! HTTP には依存しない。エラー型はそれぞれ `kind()` を持ち、
//! ステータスコードへの変換はバイナリ側で行う。

pub mod accounts;
pub mod auth;
pub mod tasks;

pub use self::accounts::{AccountError, AccountService, LoginResponse, RegisterRequest};
pub use self::auth::{AuthError, Claims, TokenIssuer};
pub use self::tasks::{TaskService, TaskServiceError, parse_patch};
