//! Application state shared by every handler.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use tubedeck_core::{
    CloudUploadManager, ConfigManager, DownloadEvent, DownloadService, DownloadServiceConfig,
    MediaDownloader, MusicLibrary, MusicPlayer, PasswordGate, PlaybackState, Result,
};

use crate::error::ApiResult;

/// Everything a request may touch.
///
/// The player and the library do blocking work (thread joins, directory
/// walks), so handlers reach them through [`Self::with_player`] and
/// [`Self::with_library`], which run on the blocking pool.
#[derive(Clone)]
pub struct AppState {
    /// Persisted configuration.
    pub config: Arc<RwLock<ConfigManager>>,
    /// The music folder.
    pub library: Arc<MusicLibrary>,
    /// Local playback.
    pub player: Arc<Mutex<MusicPlayer>>,
    /// Background downloads.
    pub downloads: DownloadService,
    /// Cloud upload relay.
    pub uploads: Arc<CloudUploadManager>,
    /// Password gate and sessions.
    pub gate: Arc<Mutex<PasswordGate>>,
    /// Whether the gate is enforced.
    pub auth_enabled: bool,
    /// Process start, for the health endpoint.
    pub started_at: Instant,
}

impl AppState {
    /// Wire up the services from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the music directory cannot be opened.
    pub fn new(
        config: ConfigManager,
        player: MusicPlayer,
        downloader: Arc<dyn MediaDownloader>,
    ) -> Result<Self> {
        let settings = config.config().clone();
        let library = Arc::new(MusicLibrary::new(&settings.music_directory)?);
        info!("Music library at {}", library.root().display());

        let uploads = Arc::new(CloudUploadManager::new(settings.cloud.clone()));
        let downloads = DownloadService::new(
            downloader,
            Some(Arc::clone(&uploads)),
            DownloadServiceConfig {
                output_dir: library.root().to_path_buf(),
                default_search_results: settings.download.search_results,
                auto_upload: settings.download.auto_upload,
            },
        );

        let mut player = player;
        match player.scan_and_load(&library) {
            Ok(count) => debug!("Player starts with {} songs", count),
            Err(e) => warn!("Initial library scan failed: {}", e),
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            library,
            player: Arc::new(Mutex::new(player)),
            downloads,
            uploads,
            gate: Arc::new(Mutex::new(PasswordGate::new(&settings.auth))),
            auth_enabled: settings.auth.enabled,
            started_at: Instant::now(),
        })
    }

    /// Run `f` against the player on the blocking pool.
    pub async fn with_player<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&mut MusicPlayer) -> T + Send + 'static,
        T: Send + 'static,
    {
        let player = Arc::clone(&self.player);
        let value = tokio::task::spawn_blocking(move || f(&mut player.blocking_lock())).await?;
        Ok(value)
    }

    /// Run `f` against the library on the blocking pool.
    pub async fn with_library<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&MusicLibrary) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let library = Arc::clone(&self.library);
        let value = tokio::task::spawn_blocking(move || f(&library)).await??;
        Ok(value)
    }

    /// Reload the player's playlist from disk.
    pub async fn reload_playlist(&self) -> ApiResult<usize> {
        let library = Arc::clone(&self.library);
        let count = self
            .with_player(move |player| player.scan_and_load(&library))
            .await??;
        Ok(count)
    }

    /// Keep the playlist in step with finished downloads.
    ///
    /// A running song is never interrupted: while something plays the new
    /// file shows up on the next manual reload.
    pub fn spawn_library_watcher(&self) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        let mut events = self.downloads.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DownloadEvent::LibraryChanged { path }) => {
                        let idle = state.player.lock().await.state() == PlaybackState::Stopped;
                        if !idle {
                            debug!("Player busy, not reloading for {}", path.display());
                            continue;
                        }
                        match state.reload_playlist().await {
                            Ok(count) => info!("Playlist reloaded after download ({} songs)", count),
                            Err(e) => warn!("Playlist reload failed: {}", e.message),
                        }
                    }
                    Ok(DownloadEvent::JobUpdated { .. }) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Library watcher skipped {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
