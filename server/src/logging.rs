//! Structured logging using tracing.
//!
//! Two layers are installed:
//! - console output, human readable, overridable with `RUST_LOG`
//! - JSON file output under the log directory with rotation and retention

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Targets logged at the configured level. Everything else logs warnings.
const OWN_CRATES: [&str; 2] = ["tubedeck", "tubedeck_core"];

const FILE_STEM: &str = "tubedeck";

/// Which preset to start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogProfile {
    /// Debug console, trace file, hourly files, request spans.
    Development,
    /// Info console, debug file, one file per day kept for a week.
    Production,
}

impl LogProfile {
    /// `Development` for debug builds or when `force_development` is set.
    #[must_use]
    pub const fn select(force_development: bool) -> Self {
        if force_development || cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log files land here as `tubedeck.<date>.log`.
    pub directory: PathBuf,
    pub console_level: Level,
    pub file_level: Level,
    pub rotation: Rotation,
    /// Rotated files kept on disk.
    pub keep_files: usize,
    /// Show target and source location on the console.
    pub verbose_console: bool,
    /// Emit span open/close events for HTTP requests.
    pub request_spans: bool,
}

impl LoggingConfig {
    #[must_use]
    pub fn for_profile(profile: LogProfile) -> Self {
        let directory = default_log_directory();
        match profile {
            LogProfile::Development => Self {
                directory,
                console_level: Level::DEBUG,
                file_level: Level::TRACE,
                rotation: Rotation::HOURLY,
                keep_files: 24,
                verbose_console: true,
                request_spans: true,
            },
            LogProfile::Production => Self {
                directory,
                console_level: Level::INFO,
                file_level: Level::DEBUG,
                rotation: Rotation::DAILY,
                keep_files: 7,
                verbose_console: false,
                request_spans: false,
            },
        }
    }

    #[must_use]
    pub fn in_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }
}

/// Dropping this flushes the file writer.
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when the log directory or file cannot be created or another
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    std::fs::create_dir_all(&config.directory).map_err(|source| LoggingError::CreateDir {
        path: config.directory.clone(),
        source,
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(config.rotation.clone())
        .filename_prefix(FILE_STEM)
        .filename_suffix("log")
        .max_log_files(config.keep_files.max(1))
        .build(&config.directory)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let spans = if config.request_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console = fmt::layer()
        .with_target(config.verbose_console)
        .with_file(config.verbose_console)
        .with_line_number(config.verbose_console)
        .with_span_events(spans.clone())
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| own_crates_at(config.console_level)),
        );

    let file = fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_span_events(spans)
        .with_filter(own_crates_at(config.file_level));

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;

    tracing::debug!(
        "Logging to {} (console {}, file {})",
        config.directory.display(),
        config.console_level,
        config.file_level
    );
    Ok(LoggingGuard { _writer: guard })
}

/// `warn` globally, `level` for our own crates.
fn own_crates_at(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    OWN_CRATES
        .iter()
        .filter_map(|krate| format!("{krate}={level}").parse::<Directive>().ok())
        .fold(EnvFilter::new("warn"), EnvFilter::add_directive)
}

/// `<local data dir>/tubedeck/logs`, or `./logs` without a data dir.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir().map_or_else(
        || Path::new(".").join("logs"),
        |dir| dir.join("tubedeck").join("logs"),
    )
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Cannot create log directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot open log file: {0}")]
    Appender(#[from] InitError),

    #[error("Logging already initialized: {0}")]
    Subscriber(#[from] TryInitError),
}
