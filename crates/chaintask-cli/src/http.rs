//! REST API and router.
//!
//! Handlers are thin: parse, authenticate, call the service, shape JSON.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router, async_trait};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use chaintask_core::app::Mirror;
use chaintask_core::domain::{TaskId, UserId};
use chaintask_core::impls::RoomHub;
use chaintask_core::ports::IdGenerator;
use chaintask_core::service::RegisterRequest;

use crate::error::ApiError;
use crate::ws;

pub const AUTH_HEADER: &str = "x-auth-token";

#[derive(Clone)]
pub struct AppState {
    pub mirror: Arc<Mirror>,
    pub hub: Arc<RoomHub>,
    pub ids: Arc<dyn IdGenerator>,
}

pub fn router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/user/link-wallet", post(link_wallet).delete(unlink_wallet))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:task_id", axum::routing::delete(delete_task))
        .route("/api/tasks/:task_id/metadata", patch(patch_metadata))
        .route("/api/preferences", get(get_preferences).put(put_preferences))
        .route("/api/subscribe", post(subscribe))
        .route("/api/status", get(status))
        .route("/ws", get(ws::upgrade))
        .layer(cors(cors_origin))
        .with_state(state)
}

fn cors(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static(AUTH_HEADER)]);
    match origin {
        "*" => layer.allow_origin(Any),
        origin => match HeaderValue::from_str(origin) {
            Ok(value) => layer.allow_origin(value),
            Err(_) => {
                tracing::warn!(origin, "unusable cors origin, cross-origin requests disabled");
                layer
            }
        },
    }
}

/// Caller resolved from the `x-auth-token` header.
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::MissingToken)?;
        Ok(AuthUser(state.mirror.accounts.authenticate(token)?))
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| {
            tracing::debug!(error = %e, "rejected request body");
            ApiError::BadRequest("Invalid request body".into())
        })
}

fn task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse::<TaskId>()
        .map_err(|_| ApiError::BadRequest("Invalid task id".into()))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    state.mirror.accounts.register(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(json!({ "msg": "User registered successfully" }))))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let response = state.mirror.accounts.login(&req.email, &req.password).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkWalletRequest {
    #[serde(default)]
    wallet_address: String,
}

async fn link_wallet(
    State(state): State<AppState>,
    AuthUser(id): AuthUser,
    payload: Result<Json<LinkWalletRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let user = state.mirror.accounts.link_wallet(id, &req.wallet_address).await?;
    Ok(Json(json!({
        "msg": "Wallet linked successfully.",
        "walletAddress": user.wallet,
    })))
}

async fn unlink_wallet(
    State(state): State<AppState>,
    AuthUser(id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    state.mirror.accounts.unlink_wallet(id).await?;
    Ok(Json(json!({ "msg": "Wallet reset." })))
}

async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.mirror.accounts.user(id).await?;
    let tasks = state.mirror.tasks.list(user.wallet.as_ref()).await?;
    Ok(Json(tasks))
}

async fn patch_metadata(
    State(state): State<AppState>,
    AuthUser(id): AuthUser,
    Path(raw_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = task_id(&raw_id)?;
    let patch = chaintask_core::service::parse_patch(&body(payload)?)?;
    let user = state.mirror.accounts.user(id).await?;
    let record = state
        .mirror
        .tasks
        .patch_metadata(user.wallet.as_ref(), task_id, &patch)
        .await?;
    Ok(Json(record))
}

async fn delete_task(
    State(state): State<AppState>,
    AuthUser(id): AuthUser,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = task_id(&raw_id)?;
    let user = state.mirror.accounts.user(id).await?;
    state.mirror.tasks.delete(user.wallet.as_ref(), task_id).await?;
    Ok(Json(json!({ "msg": "Task deleted" })))
}

async fn get_preferences(
    State(state): State<AppState>,
    AuthUser(id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.mirror.accounts.preferences(id).await?))
}

#[derive(Debug, Deserialize)]
struct PreferencesRequest {
    #[serde(default)]
    theme: Option<String>,
}

async fn put_preferences(
    State(state): State<AppState>,
    AuthUser(id): AuthUser,
    payload: Result<Json<PreferencesRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    Ok(Json(state.mirror.accounts.update_preferences(id, req.theme).await?))
}

async fn subscribe(
    State(state): State<AppState>,
    AuthUser(id): AuthUser,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    state.mirror.accounts.subscribe(id, body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(json!({ "msg": "Subscription saved." }))))
}

async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .mirror
        .status()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(status))
}
