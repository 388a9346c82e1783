//! Cloud upload routes.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tubedeck_core::{CloudService, UploadResult};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: &'static str,
    pub name: &'static str,
    /// Whether the credentials file is present.
    pub available: bool,
    pub credentials_file: &'static str,
}

/// Upload request. Without `service` the file goes to every available provider.
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub service: Option<String>,
    pub remote_name: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/services", get(services))
        .route("/upload", post(upload))
}

/// GET /api/cloud/services
async fn services(State(state): State<AppState>) -> ApiResult<Json<Vec<ServiceInfo>>> {
    let uploads = Arc::clone(&state.uploads);
    let available = tokio::task::spawn_blocking(move || uploads.available_services()).await?;
    Ok(Json(
        CloudService::ALL
            .into_iter()
            .map(|service| ServiceInfo {
                id: service.id(),
                name: service.display_name(),
                available: available.contains(&service),
                credentials_file: service.credentials_file(),
            })
            .collect(),
    ))
}

/// POST /api/cloud/upload
///
/// Provider failures are reported per result, not as an error response.
async fn upload(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> ApiResult<Json<Vec<UploadResult>>> {
    let requested = request.path;
    let path = state
        .with_library(move |library| library.resolve(&requested))
        .await?;

    let uploads = Arc::clone(&state.uploads);
    let results = tokio::task::spawn_blocking(move || {
        let remote_name = request.remote_name.as_deref();
        match request.service.as_deref() {
            Some(service) => vec![uploads.upload_to(service, &path, remote_name)],
            None => uploads
                .upload_to_all(&path, remote_name)
                .into_iter()
                .map(|(_, result)| result)
                .collect(),
        }
    })
    .await?;
    Ok(Json(results))
}
