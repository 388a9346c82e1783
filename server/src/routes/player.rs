//! Local playback routes and the live event stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use tubedeck_core::{MusicPlayer, PlayerStatus};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PlayRequest {
    /// Playlist index; the cursor (or the first song) when absent.
    pub index: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub volume: f32,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    /// Fraction of the song, 0.0 - 1.0.
    pub position: f64,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub songs: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/play", post(play))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/stop", post(stop))
        .route("/next", post(next))
        .route("/previous", post(previous))
        .route("/volume", post(volume))
        .route("/seek", post(seek))
        .route("/shuffle", post(shuffle))
        .route("/repeat", post(repeat))
        .route("/reload", post(reload))
        .route("/events", get(events))
}

/// GET /api/player/status
async fn status(State(state): State<AppState>) -> Json<PlayerStatus> {
    Json(state.player.lock().await.status())
}

/// Apply a fallible player operation and report the new status.
async fn apply<F>(state: &AppState, operation: F) -> ApiResult<Json<PlayerStatus>>
where
    F: FnOnce(&mut MusicPlayer) -> tubedeck_core::Result<()> + Send + 'static,
{
    let status = state
        .with_player(move |player| operation(player).map(|()| player.status()))
        .await??;
    Ok(Json(status))
}

/// POST /api/player/play
async fn play(
    State(state): State<AppState>,
    request: Option<Json<PlayRequest>>,
) -> ApiResult<Json<PlayerStatus>> {
    let index = request.and_then(|Json(r)| r.index);
    apply(&state, move |player| player.play(index)).await
}

/// POST /api/player/pause
async fn pause(State(state): State<AppState>) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, |player| {
        player.pause();
        Ok(())
    })
    .await
}

/// POST /api/player/resume
async fn resume(State(state): State<AppState>) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, |player| {
        player.resume();
        Ok(())
    })
    .await
}

/// POST /api/player/stop
async fn stop(State(state): State<AppState>) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, |player| {
        player.stop();
        Ok(())
    })
    .await
}

/// POST /api/player/next
async fn next(State(state): State<AppState>) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, MusicPlayer::next).await
}

/// POST /api/player/previous
async fn previous(State(state): State<AppState>) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, MusicPlayer::previous).await
}

/// POST /api/player/volume
async fn volume(
    State(state): State<AppState>,
    Json(request): Json<VolumeRequest>,
) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, move |player| {
        player.set_volume(request.volume);
        Ok(())
    })
    .await
}

/// POST /api/player/seek
async fn seek(
    State(state): State<AppState>,
    Json(request): Json<SeekRequest>,
) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, move |player| {
        player.seek(request.position);
        Ok(())
    })
    .await
}

/// POST /api/player/shuffle
async fn shuffle(State(state): State<AppState>) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, |player| {
        player.toggle_shuffle();
        Ok(())
    })
    .await
}

/// POST /api/player/repeat
async fn repeat(State(state): State<AppState>) -> ApiResult<Json<PlayerStatus>> {
    apply(&state, |player| {
        player.toggle_repeat();
        Ok(())
    })
    .await
}

/// POST /api/player/reload
async fn reload(State(state): State<AppState>) -> ApiResult<Json<ReloadResponse>> {
    let songs = state.reload_playlist().await?;
    Ok(Json(ReloadResponse { songs }))
}

/// Turn a broadcast receiver into named SSE events.
fn sse_events<T>(
    receiver: tokio::sync::broadcast::Receiver<T>,
    name: &'static str,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Serialize + Clone + Send + 'static,
{
    BroadcastStream::new(receiver).filter_map(move |result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(name).data(json))),
                Err(e) => {
                    warn!("Failed to serialize {} event: {}", name, e);
                    None
                }
            },
            Err(e) => {
                // Lagged clients just miss some progress ticks.
                debug!("{} event stream: {}", name, e);
                None
            }
        }
    })
}

/// GET /api/player/events
///
/// Player events arrive as `player`, download job updates as `download`.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New event stream client");
    let player_events = state.player.lock().await.subscribe();
    let download_events = state.downloads.subscribe();

    let stream = stream::select(
        sse_events(player_events, "player"),
        sse_events(download_events, "download"),
    );

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
