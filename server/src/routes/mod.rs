//! HTTP routes.
//!
//! Organizes routes by resource type; everything under `/api` speaks JSON.

pub mod auth;
pub mod cloud;
pub mod downloads;
pub mod health;
pub mod library;
pub mod pages;
pub mod player;

use axum::{Router, middleware, routing::get};

use crate::middleware::require_session;
use crate::state::AppState;

/// Create the router with every route and the session check.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::dashboard))
        .route("/login", get(pages::login_page))
        .route("/health", get(health::health_check))
        .nest("/api/auth", auth::router())
        .nest("/api/library", library::router())
        .nest("/api/player", player::router())
        .nest("/api/cloud", cloud::router())
        .nest("/api", downloads::router())
        .layer(middleware::from_fn_with_state(state.clone(), require_session))
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use tubedeck_core::{
        AudioBackend, AudioSession, ConfigManager, DEFAULT_PASSWORD, DownloadError,
        DownloadResult, Error, MediaDownloader, MediaFormat, MusicPlayer, PlayerSettings,
        ProgressCallback, Result, SearchResult, VideoInfo,
    };

    use super::*;

    /// Downloader for tests that never reach the network.
    struct OfflineDownloader;

    impl MediaDownloader for OfflineDownloader {
        fn video_info(&self, _url: &str) -> Result<VideoInfo> {
            Err(Error::Download(DownloadError::Network("offline".to_string())))
        }

        fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }

        fn download(
            &self,
            _url: &str,
            _format: MediaFormat,
            _output_dir: &Path,
            _progress: Option<ProgressCallback>,
        ) -> Result<DownloadResult> {
            Err(Error::Download(DownloadError::Network("offline".to_string())))
        }

        fn cancel(&self) {}

        fn reset_cancel(&self) {}
    }

    struct SilentBackend;
    struct SilentSession;

    impl AudioBackend for SilentBackend {
        fn open(&self, _path: &Path) -> Result<Box<dyn AudioSession>> {
            Ok(Box::new(SilentSession))
        }
    }

    impl AudioSession for SilentSession {
        fn play(&mut self) {}
        fn pause(&mut self) {}
        fn resume(&mut self) {}
        fn stop(&mut self) {}
        fn set_volume(&mut self, _volume: f32) {}
        fn is_busy(&self) -> bool {
            true
        }
        fn position(&self) -> Option<Duration> {
            None
        }
        fn seek(&mut self, _position: Duration) -> Result<()> {
            Ok(())
        }
    }

    struct TestApp {
        _temp: TempDir,
        router: Router,
        music_dir: std::path::PathBuf,
    }

    fn test_app(songs: &[&str]) -> TestApp {
        let temp = TempDir::new().unwrap();
        let music_dir = temp.path().join("music");
        fs::create_dir_all(&music_dir).unwrap();
        for song in songs {
            fs::write(music_dir.join(song), b"0123456789abcdef").unwrap();
        }

        let mut config = ConfigManager::with_path(temp.path().join("config.json")).unwrap();
        config.set_music_directory(music_dir.clone()).unwrap();

        let settings = PlayerSettings {
            poll_interval_ms: 5,
            ..PlayerSettings::default()
        };
        let player = MusicPlayer::new(Arc::new(SilentBackend), &settings);
        let state = AppState::new(config, player, Arc::new(OfflineDownloader)).unwrap();

        TestApp {
            _temp: temp,
            router: create_router(state),
            music_dir,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, cookie: Option<&str>, body: &serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    /// Log in with the default password and return the cookie to send back.
    async fn login(router: &Router) -> String {
        let response = send(
            router,
            post_json(
                "/api/auth/login",
                None,
                &serde_json::json!({ "password": DEFAULT_PASSWORD }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health_is_public() {
        let app = test_app(&[]);
        let response = send(&app.router, get("/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_api_requires_session() {
        let app = test_app(&["a.mp3"]);
        let response = send(&app.router, get("/api/library", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["code"], "unauthorized");

        let response = send(&app.router, get("/api/auth/status", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["authenticated"], false);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dashboard_redirects_to_login() {
        let app = test_app(&[]);
        let response = send(&app.router, get("/", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_then_list_library() {
        let app = test_app(&["b.mp3", "a.ogg"]);
        let cookie = login(&app.router).await;

        let response = send(&app.router, get("/api/library", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let names: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|song| song["file_name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.ogg", "b.mp3"]);

        let response = send(&app.router, get("/", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wrong_password_counts_attempts() {
        let app = test_app(&[]);
        let response = send(
            &app.router,
            post_json(
                "/api/auth/login",
                None,
                &serde_json::json!({ "password": "nope" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = json_body(send(&app.router, get("/api/auth/status", None)).await).await;
        assert_eq!(body["failed_attempts"], 1);
        assert_eq!(body["locked"], false);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_logout_ends_session() {
        let app = test_app(&[]);
        let cookie = login(&app.router).await;

        let response = send(
            &app.router,
            post_json("/api/auth/logout", Some(&cookie), &serde_json::json!({})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app.router, get("/api/player/status", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stream_serves_ranges_with_audio_mime() {
        let app = test_app(&["song.mp3"]);
        let cookie = login(&app.router).await;

        let request = Request::builder()
            .uri("/api/library/stream?path=song.mp3")
            .header(header::COOKIE, &cookie)
            .header(header::RANGE, "bytes=0-3")
            .body(Body::empty())
            .unwrap();
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/mpeg"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"0123");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stream_refuses_escape() {
        let app = test_app(&["song.mp3"]);
        let cookie = login(&app.router).await;
        let response = send(
            &app.router,
            get("/api/library/stream?path=../config.json", Some(&cookie)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_player_controls() {
        let app = test_app(&["one.mp3", "two.mp3"]);
        let cookie = login(&app.router).await;

        let response = send(
            &app.router,
            post_json("/api/player/play", Some(&cookie), &serde_json::json!({ "index": 1 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["state"], "playing");
        assert_eq!(body["current_index"], 1);

        let response = send(
            &app.router,
            post_json("/api/player/volume", Some(&cookie), &serde_json::json!({ "volume": 3.0 })),
        )
        .await;
        let body = json_body(response).await;
        assert_eq!(body["volume"], 1.0);

        let response = send(
            &app.router,
            post_json("/api/player/play", Some(&cookie), &serde_json::json!({ "index": 9 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app.router,
            post_json("/api/player/stop", Some(&cookie), &serde_json::json!({})),
        )
        .await;
        let body = json_body(response).await;
        assert_eq!(body["state"], "stopped");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trash_and_restore_reload_playlist() {
        let app = test_app(&["keep.mp3", "drop.mp3"]);
        let cookie = login(&app.router).await;

        let response = send(
            &app.router,
            post_json(
                "/api/library/trash",
                Some(&cookie),
                &serde_json::json!({ "path": "drop.mp3" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let name = json_body(response).await["name"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(!app.music_dir.join("drop.mp3").exists());

        let body = json_body(send(&app.router, get("/api/player/status", Some(&cookie))).await).await;
        assert_eq!(body["playlist_len"], 1);

        let response = send(
            &app.router,
            post_json(
                "/api/library/trash/restore",
                Some(&cookie),
                &serde_json::json!({ "name": name }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(app.music_dir.join("drop.mp3").exists());

        let body = json_body(send(&app.router, get("/api/player/status", Some(&cookie))).await).await;
        assert_eq!(body["playlist_len"], 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_download_rejects_invalid_url() {
        let app = test_app(&[]);
        let cookie = login(&app.router).await;
        let response = send(
            &app.router,
            post_json(
                "/api/downloads",
                Some(&cookie),
                &serde_json::json!({ "url": "https://example.com/watch?v=nothing" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app.router, get("/api/downloads/missing", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cloud_services_without_credentials() {
        let app = test_app(&[]);
        let cookie = login(&app.router).await;
        let body = json_body(send(&app.router, get("/api/cloud/services", Some(&cookie))).await).await;
        let services = body.as_array().unwrap();
        assert_eq!(services.len(), 3);
        assert_eq!(services[0]["id"], "google_drive");
    }
}
