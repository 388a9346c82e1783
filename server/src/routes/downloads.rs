//! Lookup, search and download routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tubedeck_core::{DownloadJob, MediaFormat, SearchResult, VideoInfo};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VideoInfoQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

/// Single download request.
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    /// Falls back to the configured default format.
    pub format: Option<MediaFormat>,
}

/// Batch download request.
#[derive(Debug, Deserialize)]
pub struct BatchDownloadRequest {
    pub urls: Vec<String>,
    pub format: Option<MediaFormat>,
}

#[derive(Debug, Serialize)]
pub struct StartedResponse {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

/// Routes mounted under `/api`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/video-info", get(video_info))
        .route("/search", get(search))
        .route("/downloads", post(start_download).get(list_jobs))
        .route("/downloads/batch", post(start_batch))
        .route("/downloads/cancel", post(cancel_all))
        .route("/downloads/finished", delete(clear_finished))
        .route("/downloads/{id}", get(get_job))
}

/// GET /api/video-info?url=
async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<VideoInfoQuery>,
) -> ApiResult<Json<VideoInfo>> {
    Ok(Json(state.downloads.video_info(&query.url).await?))
}

/// GET /api/search?q=&limit=
async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    Ok(Json(state.downloads.search(&query.q, query.limit).await?))
}

async fn format_or_default(state: &AppState, format: Option<MediaFormat>) -> MediaFormat {
    match format {
        Some(format) => format,
        None => state.config.read().await.config().download.default_format,
    }
}

/// POST /api/downloads
async fn start_download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<StartedResponse>> {
    let format = format_or_default(&state, request.format).await;
    let id = state.downloads.start(&request.url, format)?;
    Ok(Json(StartedResponse { ids: vec![id] }))
}

/// POST /api/downloads/batch
async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchDownloadRequest>,
) -> ApiResult<Json<StartedResponse>> {
    let format = format_or_default(&state, request.format).await;
    let ids = state.downloads.start_batch(&request.urls, format)?;
    Ok(Json(StartedResponse { ids }))
}

/// GET /api/downloads
async fn list_jobs(State(state): State<AppState>) -> Json<Vec<DownloadJob>> {
    Json(state.downloads.jobs())
}

/// GET /api/downloads/{id}
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadJob>> {
    state
        .downloads
        .job(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no download with id '{id}'")))
}

/// POST /api/downloads/cancel
async fn cancel_all(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.downloads.cancel_all();
    Json(serde_json::json!({ "cancelled": state.downloads.active_jobs() }))
}

/// DELETE /api/downloads/finished
async fn clear_finished(State(state): State<AppState>) -> Json<ClearedResponse> {
    Json(ClearedResponse {
        cleared: state.downloads.clear_finished(),
    })
}
