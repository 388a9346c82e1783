//! Music folder routes.

use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::{Query, Request, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeFile;
use tracing::debug;
use tubedeck_core::{LibraryStats, Song, TrashEntry, mime_type_for};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// A file in the library, relative to its root or absolute.
#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: PathBuf,
}

/// A file in the trash, by name.
#[derive(Debug, Deserialize)]
pub struct TrashNameRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub songs: Vec<Song>,
    pub stats: LibraryStats,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_songs))
        .route("/stats", get(stats))
        .route("/scan", post(scan))
        .route("/delete", post(delete_song))
        .route("/stream", get(stream))
        .route("/trash", get(list_trash).post(move_to_trash))
        .route("/trash/restore", post(restore))
        .route("/trash/delete", post(delete_from_trash))
        .route("/trash/empty", post(empty_trash))
}

/// GET /api/library
async fn list_songs(State(state): State<AppState>) -> ApiResult<Json<Vec<Song>>> {
    Ok(Json(state.with_library(|library| library.scan()).await?))
}

/// GET /api/library/stats
async fn stats(State(state): State<AppState>) -> ApiResult<Json<LibraryStats>> {
    Ok(Json(state.with_library(|library| library.stats()).await?))
}

/// POST /api/library/scan
async fn scan(State(state): State<AppState>) -> ApiResult<Json<ScanResponse>> {
    let songs = state.with_library(|library| library.scan()).await?;
    let stats = LibraryStats::from_songs(&songs);
    Ok(Json(ScanResponse { songs, stats }))
}

/// POST /api/library/delete
async fn delete_song(
    State(state): State<AppState>,
    Json(request): Json<PathRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .with_library(move |library| library.delete(&request.path))
        .await?;
    state.reload_playlist().await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// POST /api/library/trash
async fn move_to_trash(
    State(state): State<AppState>,
    Json(request): Json<PathRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = state
        .with_library(move |library| library.move_to_trash(&request.path))
        .await?;
    state.reload_playlist().await?;
    Ok(Json(serde_json::json!({ "name": name })))
}

/// GET /api/library/trash
async fn list_trash(State(state): State<AppState>) -> ApiResult<Json<Vec<TrashEntry>>> {
    Ok(Json(state.with_library(|library| library.list_trash()).await?))
}

/// POST /api/library/trash/restore
async fn restore(
    State(state): State<AppState>,
    Json(request): Json<TrashNameRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let path = state
        .with_library(move |library| library.restore(&request.name))
        .await?;
    state.reload_playlist().await?;
    Ok(Json(serde_json::json!({ "path": path })))
}

/// POST /api/library/trash/delete
async fn delete_from_trash(
    State(state): State<AppState>,
    Json(request): Json<TrashNameRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .with_library(move |library| library.delete_from_trash(&request.name))
        .await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// POST /api/library/trash/empty
async fn empty_trash(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.with_library(|library| library.empty_trash()).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

/// GET /api/library/stream?path=
///
/// Serves the file with range support so browsers (Safari on iOS in
/// particular) can seek and play it.
async fn stream(
    State(state): State<AppState>,
    Query(query): Query<PathRequest>,
    request: Request,
) -> ApiResult<Response> {
    let path = state
        .with_library(move |library| library.resolve(&query.path))
        .await?;
    debug!("Streaming {}", path.display());

    let mime = mime_type_for(&path);
    let mut response = ServeFile::new(&path)
        .try_call(request)
        .await
        .map_err(|e| ApiError::internal(format!("failed to serve file: {e}")))?
        .into_response();
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    }
    Ok(response)
}
