//! Session cookie authentication.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "tubedeck_session";

/// API routes reachable without a session.
const PUBLIC_API_PATHS: [&str; 2] = ["/api/auth/login", "/api/auth/status"];

/// Token from the session cookie, if any.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
        .filter(|token| !token.is_empty())
}

/// `Set-Cookie` value starting a session.
pub fn session_cookie(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict"
    ))
    .ok()
}

/// `Set-Cookie` value ending a session.
pub fn expired_session_cookie() -> HeaderValue {
    HeaderValue::from_static("tubedeck_session=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// Whether the request carries a live session (always true with the gate off).
pub async fn has_session(state: &AppState, headers: &HeaderMap) -> bool {
    if !state.auth_enabled {
        return true;
    }
    let token = session_token(headers);
    state.gate.lock().await.require(token.as_deref()).is_ok()
}

/// Reject `/api/*` requests without a session while the gate is enabled.
pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    if !path.starts_with("/api/") || PUBLIC_API_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    if has_session(&state, request.headers()).await {
        next.run(request).await
    } else {
        debug!("Rejecting unauthenticated request to {}", path);
        ApiError::unauthorized("login required").into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; tubedeck_session=abc123; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_missing_or_empty_session() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("tubedeck_session="));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn test_cookie_values() {
        let cookie = session_cookie("abc").unwrap();
        assert!(cookie.to_str().unwrap().starts_with("tubedeck_session=abc;"));
        assert!(
            expired_session_cookie()
                .to_str()
                .unwrap()
                .contains("Max-Age=0")
        );
    }
}
