//! Persistent settings, stored as pretty JSON.
//!
//! One file holds the music folder, download and playback defaults, the
//! password gate, cloud credentials and the web server address. Every
//! field has a default so older or hand-edited files keep loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{DEFAULT_PASSWORD, hash_password};
use crate::error::{Error, FileSystemError, Result};
use crate::youtube::MediaFormat;

const fn default_true() -> bool {
    true
}

/// Download settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadSettings {
    /// Format used when a request does not name one.
    #[serde(default)]
    pub default_format: MediaFormat,
    /// Attempts per video before giving up.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Fixed pause between attempts, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Number of results returned by a search when none is requested.
    #[serde(default = "default_search_results")]
    pub search_results: usize,
    /// Upload every finished download to Google Drive.
    #[serde(default)]
    pub auto_upload: bool,
}

const fn default_retries() -> u32 {
    3
}

const fn default_retry_delay_secs() -> u64 {
    2
}

const fn default_search_results() -> usize {
    5
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            default_format: MediaFormat::default(),
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            search_results: default_search_results(),
            auto_upload: false,
        }
    }
}

/// Local playback settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSettings {
    /// Initial volume (0.0 - 1.0).
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// How often the playback worker checks the output, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Start with shuffle enabled.
    #[serde(default)]
    pub shuffle: bool,
    /// Start with repeat enabled.
    #[serde(default)]
    pub repeat: bool,
}

const fn default_volume() -> f32 {
    0.7
}

const fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            poll_interval_ms: default_poll_interval_ms(),
            shuffle: false,
            repeat: false,
        }
    }
}

/// Password gate settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSettings {
    /// Whether the dashboard requires a password.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SHA-256 hex digest of the password.
    #[serde(default = "default_password_hash")]
    pub password_hash: String,
    /// Failed attempts allowed before lockout.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Lockout length in seconds.
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
    /// Minimum length of a new password.
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

fn default_password_hash() -> String {
    hash_password(DEFAULT_PASSWORD)
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_lockout_secs() -> u64 {
    300
}

const fn default_min_password_len() -> usize {
    6
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            password_hash: default_password_hash(),
            max_attempts: default_max_attempts(),
            lockout_secs: default_lockout_secs(),
            min_password_len: default_min_password_len(),
        }
    }
}

/// Cloud upload settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudSettings {
    /// Directory holding provider credential files.
    #[serde(default = "default_credentials_directory")]
    pub credentials_directory: PathBuf,
    /// Google Drive folder for audio uploads.
    #[serde(default)]
    pub audio_folder_id: Option<String>,
    /// Google Drive folder for video uploads.
    #[serde(default)]
    pub video_folder_id: Option<String>,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            credentials_directory: default_credentials_directory(),
            audio_folder_id: None,
            video_folder_id: None,
        }
    }
}

/// Web server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8501
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Everything in `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Directory holding downloaded media and the playable library.
    #[serde(default = "default_music_directory")]
    pub music_directory: PathBuf,
    /// Download settings.
    #[serde(default)]
    pub download: DownloadSettings,
    /// Playback settings.
    #[serde(default)]
    pub player: PlayerSettings,
    /// Password gate settings.
    #[serde(default)]
    pub auth: AuthSettings,
    /// Cloud upload settings.
    #[serde(default)]
    pub cloud: CloudSettings,
    /// Web server settings.
    #[serde(default)]
    pub server: ServerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            music_directory: default_music_directory(),
            download: DownloadSettings::default(),
            player: PlayerSettings::default(),
            auth: AuthSettings::default(),
            cloud: CloudSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl AppConfig {
    /// Read `path`. A missing file yields defaults, which are written back.
    ///
    /// # Errors
    ///
    /// Unreadable or malformed files are errors.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No configuration at {}, writing defaults", path.display());
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("Could not write default configuration: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))?;

        debug!(
            "Configuration loaded from {} (music in {})",
            path.display(),
            config.music_directory.display()
        );

        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Fails when the directory or file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    reason: e.to_string(),
                })
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;

        debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check values that serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.player.volume) {
            return Err(Error::Configuration(format!(
                "Player volume must be between 0.0 and 1.0, got {}",
                self.player.volume
            )));
        }
        if self.player.poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "Player poll interval must be greater than zero".to_string(),
            ));
        }
        if self.download.retries == 0 {
            return Err(Error::Configuration(
                "Download retries must be at least 1".to_string(),
            ));
        }
        if self.auth.max_attempts == 0 {
            return Err(Error::Configuration(
                "Maximum login attempts must be at least 1".to_string(),
            ));
        }
        if self.auth.password_hash.len() != 64
            || !self.auth.password_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::Configuration(
                "Password hash must be a SHA-256 hex digest".to_string(),
            ));
        }
        Ok(())
    }

    /// Point the library at `path`, creating it when needed.
    ///
    /// # Errors
    ///
    /// See [`validate_storage_directory`].
    pub fn set_music_directory(&mut self, path: PathBuf) -> Result<()> {
        validate_storage_directory(&path)?;
        info!("Music directory is now {}", path.display());
        self.music_directory = path;
        Ok(())
    }
}

/// `<audio dir>/tubedeck`.
#[must_use]
pub fn default_music_directory() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tubedeck")
}

/// `<config dir>/tubedeck/cloud_config`.
#[must_use]
pub fn default_credentials_directory() -> PathBuf {
    config_directory().join("cloud_config")
}

/// `<config dir>/tubedeck/config.json`.
#[must_use]
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.json")
}

fn config_directory() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::data_local_dir)
        .map_or_else(|| PathBuf::from("tubedeck"), |dir| dir.join("tubedeck"))
}

/// Check that `path` can hold the music library.
///
/// The directory must be absolute. It is created if missing and probed
/// with a scratch file when it exists.
///
/// # Errors
///
/// A configuration error names the first problem found.
pub fn validate_storage_directory(path: &Path) -> Result<()> {
    let unusable = |why: String| Err(Error::Configuration(format!("{}: {why}", path.display())));

    if !path.is_absolute() {
        return unusable("music directory must be an absolute path".to_string());
    }
    if !path.exists() {
        return fs::create_dir_all(path)
            .or_else(|e| unusable(format!("cannot create directory ({e})")));
    }
    if !path.is_dir() {
        return unusable("not a directory".to_string());
    }

    let probe = path.join(".tubedeck_write_test");
    if let Err(e) = fs::write(&probe, b"") {
        return unusable(format!("directory is not writable ({e})"));
    }
    let _ = fs::remove_file(&probe);
    Ok(())
}

/// Owns the loaded configuration and writes every change back to disk.
pub struct ConfigManager {
    path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    /// Use [`config_file_path`].
    ///
    /// # Errors
    ///
    /// See [`Self::with_path`].
    pub fn new() -> Result<Self> {
        Self::with_path(config_file_path())
    }

    /// Load (or create) `path` and validate it.
    ///
    /// # Errors
    ///
    /// Fails on unreadable, malformed or invalid settings.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let config = AppConfig::load_from(&path)?;
        config.validate()?;
        Ok(Self { path, config })
    }

    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy, validate it, then keep and save it. An
    /// invalid result leaves the current settings untouched.
    ///
    /// # Errors
    ///
    /// Validation or write failures.
    pub fn modify(&mut self, change: impl FnOnce(&mut AppConfig)) -> Result<()> {
        let mut config = self.config.clone();
        change(&mut config);
        config.validate()?;
        self.config = config;
        self.config.save_to(&self.path)
    }

    /// # Errors
    ///
    /// Unusable directory or write failure.
    pub fn set_music_directory(&mut self, path: PathBuf) -> Result<()> {
        self.config.set_music_directory(path)?;
        self.config.save_to(&self.path)
    }

}
