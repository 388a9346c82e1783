//! Password gate routes.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tubedeck_core::GateStatus;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{expired_session_cookie, has_session, session_cookie, session_token};
use crate::state::AppState;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// Password change request body.
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Gate state for the login page.
#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    /// Whether a password is required at all.
    pub enabled: bool,
    /// Whether this request carries a live session.
    pub authenticated: bool,
    #[serde(flatten)]
    pub gate: GateStatus,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route("/reset", post(reset))
        .route("/status", get(status))
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Response> {
    let token = state.gate.lock().await.login(&request.password)?;
    let cookie = session_cookie(&token)
        .ok_or_else(|| ApiError::internal("session token is not a valid cookie value"))?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "authenticated": true })),
    )
        .into_response())
}

/// POST /api/auth/logout
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.gate.lock().await.logout(&token);
    }
    (
        [(header::SET_COOKIE, expired_session_cookie())],
        Json(serde_json::json!({ "authenticated": false })),
    )
        .into_response()
}

/// POST /api/auth/change-password
///
/// Every session ends, including the caller's.
async fn change_password(
    State(state): State<AppState>,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<Response> {
    let new_hash = state.gate.lock().await.change_password(
        &request.current_password,
        &request.new_password,
        &request.confirm_password,
    )?;
    state
        .config
        .write()
        .await
        .modify(|config| config.auth.password_hash = new_hash)?;
    info!("New dashboard password saved");

    Ok((
        [(header::SET_COOKIE, expired_session_cookie())],
        Json(serde_json::json!({ "changed": true })),
    )
        .into_response())
}

/// POST /api/auth/reset
async fn reset(State(state): State<AppState>) -> Json<GateStatus> {
    let mut gate = state.gate.lock().await;
    gate.reset_attempts();
    info!("Login attempts reset");
    Json(gate.status())
}

/// GET /api/auth/status
async fn status(State(state): State<AppState>, headers: HeaderMap) -> Json<AuthStatusResponse> {
    let authenticated = has_session(&state, &headers).await;
    let gate = state.gate.lock().await.status();
    Json(AuthStatusResponse {
        enabled: state.auth_enabled,
        authenticated,
        gate,
    })
}
