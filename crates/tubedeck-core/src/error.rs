//! Error types for TubeDeck core operations.
//!
//! Errors are grouped by domain. Each domain has its own enum and the
//! top-level [`Error`] wraps them, so callers can match on a whole domain
//! (`Error::Download(_)`) or a single failure.
//!
//! [`Error::kind`] gives a coarse category that the web layer maps onto a
//! response code, and [`Error::is_retryable`] tells the dashboard whether
//! offering a "try again" makes sense.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in TubeDeck core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// File system operation failed.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// YouTube lookup, search or download failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Music library operation failed.
    #[error(transparent)]
    Library(#[from] LibraryError),

    /// Local playback failed.
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// Password gate rejected the request.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Cloud upload failed.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// File system errors.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// A path does not exist.
    #[error("Path not found: {path}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// Reading a file failed.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// The path being read.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// Writing a file failed.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// The path being written.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// Creating a directory failed.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// The directory path.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// Deleting a file failed.
    #[error("Failed to delete {path}: {reason}")]
    DeleteFailed {
        /// The path being deleted.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// Moving or renaming a file failed.
    #[error("Failed to move {from} to {to}: {reason}")]
    MoveFailed {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// Permission denied.
    #[error("Permission denied: {path}")]
    PermissionDenied {
        /// The path that could not be accessed.
        path: PathBuf,
    },
}

/// YouTube lookup, search and download errors.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL is not a usable YouTube video URL.
    #[error("Invalid YouTube URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The video cannot be fetched (private, removed, region locked...).
    #[error("Video {video_id} is unavailable: {reason}")]
    VideoUnavailable {
        /// The video ID.
        video_id: String,
        /// The reason reported by the extractor.
        reason: String,
    },

    /// No stream matched the requested format.
    #[error("No {format} stream available for '{title}'")]
    NoMatchingStream {
        /// Video title.
        title: String,
        /// Requested format.
        format: String,
    },

    /// The media stream could not be downloaded or written.
    #[error("Failed to download '{title}': {reason}")]
    StreamFailed {
        /// Video title.
        title: String,
        /// The reason for the failure.
        reason: String,
    },

    /// A search request failed.
    #[error("Search for '{query}' failed: {reason}")]
    SearchFailed {
        /// The search query.
        query: String,
        /// The reason for the failure.
        reason: String,
    },

    /// A network request failed.
    #[error("Network error: {0}")]
    Network(String),

    /// The download was cancelled.
    #[error("Download cancelled")]
    Cancelled,
}

/// Music library errors.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The file is not a supported audio file.
    #[error("Unsupported audio file: {path}")]
    UnsupportedFile {
        /// The offending path.
        path: PathBuf,
    },

    /// The path resolves outside the library root.
    #[error("Path is outside the music library: {path}")]
    OutsideLibrary {
        /// The offending path.
        path: PathBuf,
    },

    /// The file does not exist in the library.
    #[error("File not found in library: {path}")]
    FileNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The file does not exist in the trash.
    #[error("File not found in trash: {name}")]
    NotInTrash {
        /// Trash file name.
        name: String,
    },
}

/// Playback errors.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Playlist has no songs.
    #[error("Playlist is empty")]
    EmptyPlaylist,

    /// Requested index is out of range.
    #[error("Invalid song index {index} (playlist has {len} songs)")]
    InvalidIndex {
        /// The requested index.
        index: usize,
        /// Playlist length.
        len: usize,
    },

    /// The audio output device could not be opened.
    #[error("Audio output unavailable: {0}")]
    OutputUnavailable(String),

    /// A file could not be decoded.
    #[error("Failed to decode {path}: {reason}")]
    DecodeFailed {
        /// The audio file.
        path: PathBuf,
        /// The reason reported by the decoder.
        reason: String,
    },

    /// The playback worker is gone.
    #[error("Playback worker is not running")]
    WorkerGone,
}

/// Password gate errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No valid session.
    #[error("Authentication required")]
    Unauthenticated,

    /// No password was supplied.
    #[error("Password is required")]
    MissingPassword,

    /// Wrong password.
    #[error("Incorrect password ({remaining_attempts} attempts remaining)")]
    WrongPassword {
        /// Attempts left before lockout.
        remaining_attempts: u32,
    },

    /// Too many failed attempts.
    #[error("Too many failed attempts, try again in {remaining_secs} seconds")]
    LockedOut {
        /// Seconds until the lockout expires.
        remaining_secs: u64,
    },

    /// Password change request was rejected.
    #[error("Password change rejected: {0}")]
    InvalidPasswordChange(String),
}

/// Cloud upload errors.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Credentials for the service are missing.
    #[error("{service} is not configured: missing {file}")]
    NotConfigured {
        /// Service name.
        service: String,
        /// Expected credentials file.
        file: String,
    },

    /// Unknown service identifier.
    #[error("Unknown cloud service: {0}")]
    UnknownService(String),

    /// Token exchange failed.
    #[error("{service} authentication failed: {reason}")]
    AuthFailed {
        /// Service name.
        service: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The upload request failed.
    #[error("{service} upload failed: {reason}")]
    RequestFailed {
        /// Service name.
        service: String,
        /// The reason for the failure.
        reason: String,
    },
}

/// Coarse error category used for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller supplied bad input.
    InvalidInput,
    /// A requested item does not exist.
    NotFound,
    /// The caller must log in.
    Unauthorized,
    /// The caller is temporarily blocked.
    Locked,
    /// A remote service failed.
    Network,
    /// Local playback failed.
    Playback,
    /// The operation was cancelled.
    Cancelled,
    /// Anything else.
    Internal,
}

impl Error {
    /// Get the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::FileSystem(FileSystemError::NotFound { .. }) => ErrorKind::NotFound,
            Self::FileSystem(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
            Self::Download(e) => match e {
                DownloadError::InvalidUrl { .. } => ErrorKind::InvalidInput,
                DownloadError::VideoUnavailable { .. } | DownloadError::NoMatchingStream { .. } => {
                    ErrorKind::NotFound
                }
                DownloadError::Cancelled => ErrorKind::Cancelled,
                _ => ErrorKind::Network,
            },
            Self::Library(e) => match e {
                LibraryError::FileNotFound { .. } | LibraryError::NotInTrash { .. } => {
                    ErrorKind::NotFound
                }
                _ => ErrorKind::InvalidInput,
            },
            Self::Playback(e) => match e {
                PlaybackError::EmptyPlaylist | PlaybackError::InvalidIndex { .. } => {
                    ErrorKind::InvalidInput
                }
                _ => ErrorKind::Playback,
            },
            Self::Auth(e) => match e {
                AuthError::Unauthenticated | AuthError::WrongPassword { .. } => {
                    ErrorKind::Unauthorized
                }
                AuthError::LockedOut { .. } => ErrorKind::Locked,
                AuthError::MissingPassword | AuthError::InvalidPasswordChange(_) => {
                    ErrorKind::InvalidInput
                }
            },
            Self::Upload(e) => match e {
                UploadError::NotConfigured { .. } | UploadError::UnknownService(_) => {
                    ErrorKind::InvalidInput
                }
                _ => ErrorKind::Network,
            },
            Self::Configuration(_) => ErrorKind::InvalidInput,
        }
    }

    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Download(
                DownloadError::StreamFailed { .. }
                    | DownloadError::SearchFailed { .. }
                    | DownloadError::Network(_)
            ) | Self::Upload(UploadError::RequestFailed { .. })
                | Self::Playback(PlaybackError::OutputUnavailable(_))
                | Self::Auth(AuthError::LockedOut { .. })
        )
    }

    /// Suggested delay before retrying, if the error is retryable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Auth(AuthError::LockedOut { remaining_secs }) => Some(*remaining_secs),
            Self::Download(_) | Self::Upload(_) if self.is_retryable() => Some(2),
            Self::Playback(PlaybackError::OutputUnavailable(_)) => Some(1),
            _ => None,
        }
    }
}

/// Attach a path to IO failures.
pub trait ErrorContext<T> {
    /// Convert an IO failure into a read error for `path`.
    fn read_context(self, path: &Path) -> Result<T>;

    /// Convert an IO failure into a write error for `path`.
    fn write_context(self, path: &Path) -> Result<T>;

    /// Convert an IO failure into a delete error for `path`.
    fn delete_context(self, path: &Path) -> Result<T>;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn read_context(self, path: &Path) -> Result<T> {
        self.map_err(|e| io_error(path, e, |path, reason| FileSystemError::ReadFailed { path, reason }))
    }

    fn write_context(self, path: &Path) -> Result<T> {
        self.map_err(|e| io_error(path, e, |path, reason| FileSystemError::WriteFailed { path, reason }))
    }

    fn delete_context(self, path: &Path) -> Result<T> {
        self.map_err(|e| {
            io_error(path, e, |path, reason| FileSystemError::DeleteFailed { path, reason })
        })
    }
}

fn io_error(
    path: &Path,
    err: std::io::Error,
    other: impl FnOnce(PathBuf, String) -> FileSystemError,
) -> Error {
    let path = path.to_path_buf();
    let fs_err = match err.kind() {
        std::io::ErrorKind::NotFound => FileSystemError::NotFound { path },
        std::io::ErrorKind::PermissionDenied => FileSystemError::PermissionDenied { path },
        _ => other(path, err.to_string()),
    };
    Error::FileSystem(fs_err)
}
