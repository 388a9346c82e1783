//! The dashboard and login pages.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
};

use crate::middleware::has_session;
use crate::state::AppState;

const DASHBOARD_HTML: &str = include_str!("../../assets/dashboard.html");
const LOGIN_HTML: &str = include_str!("../../assets/login.html");

/// GET /
pub async fn dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if has_session(&state, &headers).await {
        Html(DASHBOARD_HTML).into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

/// GET /login
pub async fn login_page() -> Html<&'static str> {
    Html(LOGIN_HTML)
}
