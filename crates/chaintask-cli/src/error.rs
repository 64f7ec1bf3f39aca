//! API error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use chaintask_core::domain::ErrorKind;
use chaintask_core::service::{AccountError, TaskServiceError};

/// Everything a handler can fail with. The body is always `{"msg": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No token, authorization denied")]
    MissingToken,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Tasks(#[from] TaskServiceError),

    #[error("Server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Account(e) => match e {
                AccountError::Validation(_)
                | AccountError::InvalidCredentials
                | AccountError::WalletTaken => StatusCode::BAD_REQUEST,
                AccountError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                AccountError::UserNotFound => StatusCode::NOT_FOUND,
                AccountError::WalletAlreadyLinked => StatusCode::CONFLICT,
                AccountError::Store(store) if store.kind() == ErrorKind::Permanent => {
                    StatusCode::BAD_REQUEST
                }
                AccountError::Token(_) | AccountError::Hash(_) | AccountError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Tasks(e) => match e {
                TaskServiceError::NoWallet | TaskServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
                TaskServiceError::NotFound => StatusCode::NOT_FOUND,
                TaskServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // internal details go to the log, not to the client
        let msg = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "msg": msg }))).into_response()
    }
}
