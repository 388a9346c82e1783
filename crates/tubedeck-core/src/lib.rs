//! `TubeDeck` Core Library
//!
//! This crate provides the core functionality for the `TubeDeck` dashboard:
//! - `YouTube` lookup, keyword search and downloading (video or audio only)
//! - Music folder management with a recoverable trash
//! - Local playback with a playlist, shuffle, repeat and progress reporting
//! - Password gate with attempt counting and lockout
//! - Optional upload of downloads to Google Drive, Dropbox or OneDrive
//! - Application configuration management
//!
//! # Error Handling
//!
//! Every fallible operation returns [`Result`], whose error type is split by
//! domain. See the [`error`] module for details.
//!
//! ```rust,ignore
//! use tubedeck_core::{MusicLibrary, Result};
//!
//! fn count_songs() -> Result<usize> {
//!     let library = MusicLibrary::new("/home/me/Music")?;
//!     Ok(library.scan()?.len())
//! }
//! ```

pub mod auth;
pub mod cloud;
pub mod config;
pub mod downloads;
pub mod error;
pub mod library;
pub mod metadata;
pub mod player;
pub mod youtube;

pub use auth::{DEFAULT_PASSWORD, GateStatus, PasswordGate, hash_password, verify_password};
pub use cloud::{
    CloudService, CloudUploadManager, CloudUploader, DropboxUploader, GoogleDriveUploader,
    OneDriveUploader, UploadResult,
};
pub use config::{
    AppConfig, AuthSettings, CloudSettings, ConfigManager, DownloadSettings, PlayerSettings,
    ServerSettings, config_file_path, default_music_directory,
};
pub use downloads::{
    DownloadEvent, DownloadJob, DownloadService, DownloadServiceConfig, JobStatus,
};
pub use error::{
    AuthError, DownloadError, Error, ErrorContext, ErrorKind, FileSystemError, LibraryError,
    PlaybackError, Result, UploadError,
};
pub use library::{
    LibraryStats, MusicLibrary, SUPPORTED_EXTENSIONS, Song, TrashEntry, format_file_size,
    format_time, is_audio_file, mime_type_for,
};
pub use metadata::{TrackMetadata, extract_metadata};
pub use player::{
    AudioBackend, AudioSession, MusicPlayer, PlaybackState, PlayerEvent, PlayerStatus,
    RodioBackend,
};
pub use youtube::{
    BatchPosition, BatchReport, DownloadProgress, DownloadResult, DownloadStatus,
    MediaDownloader, MediaFormat, ProgressCallback, RustyYtdlConfig, RustyYtdlDownloader,
    SearchResult, SpeedMeter, VideoInfo, YouTubeUrlType, YouTubeUrlValidation, download_batch,
    extract_video_id, sanitize_filename, validate_youtube_url,
};
