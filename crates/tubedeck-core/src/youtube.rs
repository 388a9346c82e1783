//! `YouTube` lookup, search and downloading.
//!
//! - Video metadata and media streams come from `rusty_ytdl`.
//! - Keyword search scrapes the results page and reads the embedded
//!   `ytInitialData` JSON, so no API key is needed.
//!
//! Two output formats are supported:
//! - [`MediaFormat::Video`]: best combined audio+video stream, saved as
//!   `<title>.<ext>` (mp4 in practice)
//! - [`MediaFormat::Audio`]: best audio-only stream in its native container
//!   (m4a/webm), saved as `<title>_<id>.<ext>` so re-uploads with the same
//!   title do not collide
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tubedeck_core::youtube::{MediaDownloader, MediaFormat, RustyYtdlDownloader};
//! use std::path::Path;
//!
//! let downloader = RustyYtdlDownloader::new();
//! let hits = downloader.search("lofi beats", 5).unwrap();
//! let result = downloader
//!     .download(&hits[0].url, MediaFormat::Audio, Path::new("/tmp/music"), None)
//!     .unwrap();
//! println!("saved to {}", result.output_path.display());
//! ```

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use regex::Regex;
use rusty_ytdl::{Video, VideoFormat, VideoOptions, VideoQuality, VideoSearchOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{DownloadError, Error, ErrorContext, FileSystemError, Result};

/// Maximum characters of a search result description.
const DESCRIPTION_LIMIT: usize = 200;

/// Minimum thumbnail width preferred for search results.
const MIN_THUMBNAIL_WIDTH: u64 = 120;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Output format of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    /// Combined audio and video (MP4).
    Video,
    /// Audio only.
    #[default]
    Audio,
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

impl MediaFormat {
    /// Only streams the player can decode: AAC in mp4 for audio, muxed mp4
    /// for video.
    fn ytdl_options(self) -> VideoOptions {
        let quality = match self {
            Self::Video => VideoQuality::Highest,
            Self::Audio => VideoQuality::HighestAudio,
        };
        VideoOptions {
            quality,
            filter: VideoSearchOptions::Custom(Arc::new(move |stream: &VideoFormat| {
                self.accepts_stream(stream.has_video, stream.has_audio, &stream.mime_type.container)
            })),
            ..Default::default()
        }
    }

    fn accepts_stream(self, has_video: bool, has_audio: bool, container: &str) -> bool {
        let tracks_match = match self {
            Self::Video => has_video && has_audio,
            Self::Audio => has_audio && !has_video,
        };
        tracks_match && self.extension_for_container(container).is_some()
    }

    /// File extension for a stream container, `None` for containers this
    /// format is never saved in.
    #[must_use]
    pub fn extension_for_container(self, container: &str) -> Option<&'static str> {
        match (self, container.to_ascii_lowercase().as_str()) {
            (Self::Audio, "mp4" | "m4a") => Some("m4a"),
            (Self::Video, "mp4") => Some("mp4"),
            _ => None,
        }
    }
}

/// What the dashboard shows about a video before downloading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Video ID.
    pub id: String,
    /// Video title.
    pub title: String,
    /// Seconds.
    pub duration_secs: Option<u64>,
    /// Channel name.
    pub uploader: Option<String>,
    /// Largest thumbnail offered.
    pub thumbnail_url: Option<String>,
    /// View count.
    pub view_count: Option<u64>,
    /// Upload date as `YYYY-MM-DD`.
    pub upload_date: Option<String>,
}

impl VideoInfo {
    /// Minimal info for a video that has not been looked up yet.
    #[must_use]
    pub fn unresolved(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: format!("Video {id}"),
            duration_secs: None,
            uploader: None,
            thumbnail_url: None,
            view_count: None,
            upload_date: None,
        }
    }

    /// Canonical watch URL.
    #[must_use]
    pub fn url(&self) -> String {
        watch_url(&self.id)
    }

    /// Uploader name with fallback.
    #[must_use]
    pub fn display_uploader(&self) -> &str {
        self.uploader.as_deref().unwrap_or("Unknown uploader")
    }

    /// Duration as `M:SS`, or "Unknown".
    #[must_use]
    pub fn duration_text(&self) -> String {
        format_duration_text(self.duration_secs)
    }
}

/// One keyword search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Video ID.
    pub video_id: String,
    /// Video title.
    pub title: String,
    /// Canonical watch URL.
    pub url: String,
    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,
    /// Duration in seconds.
    pub duration_secs: Option<u64>,
    /// Duration as `M:SS`, or "Unknown".
    pub duration_text: String,
    /// View count.
    pub view_count: Option<u64>,
    /// Channel name, or "Unknown".
    pub uploader: String,
    /// Publication date as shown by YouTube, or "Unknown".
    pub upload_date: String,
    /// Description snippet, truncated.
    pub description: String,
}

/// Receives progress snapshots while a file downloads.
pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;

/// Where an item sits inside a [`download_batch`] run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchPosition {
    /// 1-based item number.
    pub item: usize,
    /// Items in the batch.
    pub of: usize,
    /// `(item - 1 + fraction) / of`.
    pub overall: f64,
    /// Items already on disk.
    pub completed: usize,
    /// Items that failed so far.
    pub failed: usize,
}

/// Snapshot of one file transfer.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    /// Video title, or the video ID until metadata is known.
    pub title: String,
    /// Fraction of the file received, 0.0 to 1.0.
    pub fraction: f64,
    /// Stage of the transfer.
    pub status: DownloadStatus,
    /// Bytes written so far.
    pub bytes: u64,
    /// Stream length when YouTube reports one.
    pub total_bytes: Option<u64>,
    /// Recent transfer rate.
    pub speed_bps: f64,
    /// Estimated seconds left.
    pub eta_secs: Option<f64>,
    /// Set by [`download_batch`].
    pub batch: Option<BatchPosition>,
}

impl DownloadProgress {
    /// A zero-byte snapshot in `status`.
    #[must_use]
    pub fn new(title: &str, status: DownloadStatus) -> Self {
        Self {
            title: title.to_string(),
            fraction: 0.0,
            status,
            bytes: 0,
            total_bytes: None,
            speed_bps: 0.0,
            eta_secs: None,
            batch: None,
        }
    }

    /// Transfer rate such as `512 B/s` or `1.4 MB/s`.
    #[must_use]
    pub fn speed_text(&self) -> String {
        const KIB: f64 = 1024.0;
        let bps = self.speed_bps;
        if bps >= KIB * KIB {
            format!("{:.1} MB/s", bps / (KIB * KIB))
        } else if bps >= KIB {
            format!("{:.1} KB/s", bps / KIB)
        } else {
            format!("{bps:.0} B/s")
        }
    }

    /// Time left as `M:SS`, when it can be estimated.
    #[must_use]
    pub fn eta_text(&self) -> Option<String> {
        self.eta_secs.map(|secs| clock_text(secs as u64))
    }
}

fn clock_text(total: u64) -> String {
    let (hours, minutes, seconds) = (total / 3600, total % 3600 / 60, total % 60);
    if hours == 0 {
        format!("{minutes}:{seconds:02}")
    } else {
        format!("{hours}:{minutes:02}:{seconds:02}")
    }
}

/// Format an optional duration as `M:SS` / `H:MM:SS`, or "Unknown".
#[must_use]
pub fn format_duration_text(secs: Option<u64>) -> String {
    match secs {
        Some(secs) if secs > 0 => clock_text(secs),
        _ => "Unknown".to_string(),
    }
}

/// Normalise an upload date to `YYYY-MM-DD`.
///
/// Accepts compact `YYYYMMDD` and ISO-8601 timestamps.
#[must_use]
pub fn format_upload_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if bytes.len() == 8 && bytes.iter().all(u8::is_ascii_digit) {
        return Some(format!("{}-{}-{}", &raw[..4], &raw[4..6], &raw[6..]));
    }
    if bytes.len() >= 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[8..10].iter().all(u8::is_ascii_digit)
    {
        return Some(raw[..10].to_string());
    }
    None
}

/// Download status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Starting download.
    Starting,
    /// Receiving media data.
    Downloading,
    /// File written and renamed into place.
    Completed,
    /// Gave up; carries the last error.
    Failed(String),
    /// Target file was already there.
    Skipped,
}

/// A file that is now in the output directory.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    /// Video info.
    pub video: VideoInfo,
    /// Format downloaded.
    pub format: MediaFormat,
    /// Output file path.
    pub output_path: PathBuf,
    /// The file already existed and nothing was downloaded.
    pub skipped: bool,
    /// Bytes written.
    pub bytes: u64,
}

/// A batch item that could not be downloaded.
#[derive(Debug, Clone, Serialize)]
pub struct FailedDownload {
    /// Requested URL.
    pub url: String,
    /// Error message.
    pub error: String,
}

/// Outcome of a batch download.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Items that were downloaded or already present.
    pub completed: Vec<DownloadResult>,
    /// Items that failed.
    pub failed: Vec<FailedDownload>,
}

impl BatchReport {
    /// Number of items that ended up on disk.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.completed.len()
    }
}

/// Media downloader trait for testability.
#[cfg_attr(test, mockall::automock)]
pub trait MediaDownloader: Send + Sync {
    /// Look up metadata for a single video.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the video is unavailable.
    fn video_info(&self, url: &str) -> Result<VideoInfo>;

    /// Search by keyword, returning at most `max_results` videos.
    ///
    /// # Errors
    ///
    /// Returns an error if the results page cannot be fetched or parsed.
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;

    /// Download one video into `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or every attempt failed.
    fn download(
        &self,
        url: &str,
        format: MediaFormat,
        output_dir: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadResult>;

    /// Abort in-flight downloads.
    fn cancel(&self);

    /// Allow downloads again after [`Self::cancel`].
    fn reset_cancel(&self);
}

/// Download several URLs one after another.
///
/// A failing item is recorded in the report and the batch continues.
/// Overall progress is `(index + current) / total`.
pub fn download_batch(
    downloader: &dyn MediaDownloader,
    urls: &[String],
    format: MediaFormat,
    output_dir: &Path,
    progress: Option<ProgressCallback>,
) -> BatchReport {
    let total = urls.len();
    let progress: Option<Arc<ProgressCallback>> = progress.map(Arc::new);
    let mut report = BatchReport::default();

    for (index, url) in urls.iter().enumerate() {
        let completed = report.completed.len();
        let failed = report.failed.len();

        let item_progress = progress.as_ref().map(|callback| {
            let callback = Arc::clone(callback);
            Box::new(move |mut p: DownloadProgress| {
                p.batch = Some(BatchPosition {
                    item: index + 1,
                    of: total,
                    overall: (index as f64 + p.fraction) / total as f64,
                    completed,
                    failed,
                });
                callback(p);
            }) as ProgressCallback
        });

        match downloader.download(url, format, output_dir, item_progress) {
            Ok(result) => report.completed.push(result),
            Err(Error::Download(DownloadError::Cancelled)) => {
                info!("Batch download cancelled after {} items", index);
                report.failed.push(FailedDownload {
                    url: url.clone(),
                    error: DownloadError::Cancelled.to_string(),
                });
                break;
            }
            Err(e) => {
                warn!("Batch item {} ({}) failed: {}", index + 1, url, e);
                report.failed.push(FailedDownload {
                    url: url.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        "Batch download finished: {}/{} succeeded",
        report.success_count(),
        total
    );
    report
}

/// Outcome of [`validate_youtube_url`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeUrlValidation {
    pub is_valid: bool,
    /// 11-character ID when valid.
    pub video_id: Option<String>,
    /// `https://www.youtube.com/watch?v=<id>` when valid.
    pub normalized_url: Option<String>,
    /// Why the URL was rejected.
    pub error_message: Option<String>,
    pub url_type: YouTubeUrlType,
}

/// Which URL shape was recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum YouTubeUrlType {
    /// `youtube.com/watch?v=<id>`
    Watch,
    /// `youtu.be/<id>`
    ShortUrl,
    /// `youtube.com/shorts/<id>`
    Shorts,
    /// `youtube.com/embed/<id>`
    Embed,
    #[default]
    Invalid,
}

impl YouTubeUrlValidation {
    #[must_use]
    pub fn valid(video_id: String, url_type: YouTubeUrlType) -> Self {
        Self {
            is_valid: true,
            normalized_url: Some(watch_url(&video_id)),
            video_id: Some(video_id),
            error_message: None,
            url_type,
        }
    }

    #[must_use]
    pub const fn invalid(error_message: String, url_type: YouTubeUrlType) -> Self {
        Self {
            is_valid: false,
            video_id: None,
            normalized_url: None,
            error_message: Some(error_message),
            url_type,
        }
    }
}

/// Canonical watch URL for a video ID.
#[must_use]
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Check that `url` points at a single `YouTube` video and pull out its ID.
///
/// Accepted shapes:
///
/// - `https://www.youtube.com/watch?v=XXXXXXXXXXX` (extra parameters allowed)
/// - `https://youtu.be/XXXXXXXXXXX`
/// - `https://www.youtube.com/shorts/XXXXXXXXXXX`
/// - `https://www.youtube.com/embed/XXXXXXXXXXX`
/// - `http://`, mobile and `music.` hosts are also accepted
///
/// # Examples
///
/// ```rust
/// use tubedeck_core::youtube::validate_youtube_url;
///
/// let result = validate_youtube_url("https://youtu.be/dQw4w9WgXcQ?t=42");
/// assert!(result.is_valid);
/// assert_eq!(result.video_id.as_deref(), Some("dQw4w9WgXcQ"));
///
/// assert!(!validate_youtube_url("https://vimeo.com/123").is_valid);
/// ```
#[must_use]
pub fn validate_youtube_url(url: &str) -> YouTubeUrlValidation {
    let url = url.trim();

    if url.is_empty() {
        return YouTubeUrlValidation::invalid("Enter a URL".to_string(), YouTubeUrlType::Invalid);
    }

    let Ok(parsed) = Url::parse(url) else {
        return YouTubeUrlValidation::invalid(
            "Not a valid URL".to_string(),
            YouTubeUrlType::Invalid,
        );
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return YouTubeUrlValidation::invalid(
            "Only http and https links are supported".to_string(),
            YouTubeUrlType::Invalid,
        );
    }

    let Some(host) = parsed.host_str().filter(|host| is_youtube_host(host)) else {
        return YouTubeUrlValidation::invalid(
            "Not a YouTube link".to_string(),
            YouTubeUrlType::Invalid,
        );
    };

    let (url_type, video_id) = locate_video_id(host, &parsed);
    let Some(video_id) = video_id.filter(|id| !id.is_empty()) else {
        return YouTubeUrlValidation::invalid(
            "URL does not contain a video ID".to_string(),
            url_type,
        );
    };

    if let Err(reason) = validate_video_id_format(&video_id) {
        return YouTubeUrlValidation::invalid(reason, url_type);
    }

    YouTubeUrlValidation::valid(video_id, url_type)
}

/// `youtube.com` and its subdomains (`www`, `m`, `music`), `youtu.be`.
fn is_youtube_host(host: &str) -> bool {
    host == "youtube.com"
        || host.ends_with(".youtube.com")
        || host == "youtu.be"
        || host == "www.youtu.be"
}

fn locate_video_id(host: &str, url: &Url) -> (YouTubeUrlType, Option<String>) {
    let mut segments = url.path_segments().into_iter().flatten();
    let first = segments.next().unwrap_or_default();

    if host.trim_start_matches("www.") == "youtu.be" {
        return (YouTubeUrlType::ShortUrl, Some(first.to_string()));
    }

    match first {
        "shorts" => (YouTubeUrlType::Shorts, segments.next().map(String::from)),
        "embed" => (YouTubeUrlType::Embed, segments.next().map(String::from)),
        "watch" => (
            YouTubeUrlType::Watch,
            url.query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.trim().to_string()),
        ),
        _ => (YouTubeUrlType::Invalid, None),
    }
}

fn validate_video_id_format(video_id: &str) -> std::result::Result<(), String> {
    if video_id.len() != 11 {
        return Err(format!(
            "Video ID must be 11 characters, got {}",
            video_id.len()
        ));
    }
    if !video_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("Video ID contains invalid characters".to_string());
    }
    Ok(())
}

/// Extract the video ID from a `YouTube` URL.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidUrl`] if the URL is not a valid video URL.
pub fn extract_video_id(url: &str) -> Result<String> {
    let validation = validate_youtube_url(url);
    match validation.video_id {
        Some(id) if validation.is_valid => Ok(id),
        _ => Err(Error::Download(DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: validation
                .error_message
                .unwrap_or_else(|| "Invalid URL".to_string()),
        })),
    }
}

/// A title made safe to use as a file name on any platform.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

    let replaced = name.replace(RESERVED, "_");
    let trimmed = replaced.trim().trim_matches('.');

    // Limit length (leaving room for suffix and extension)
    let mut end = trimmed.len().min(200);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    let limited = trimmed[..end].trim_end();

    if limited.is_empty() {
        "untitled".to_string()
    } else {
        limited.to_string()
    }
}

/// File name for a downloaded video.
#[must_use]
pub fn output_file_name(video: &VideoInfo, format: MediaFormat, extension: &str) -> String {
    let title = sanitize_filename(&video.title);
    match format {
        MediaFormat::Video => format!("{title}.{extension}"),
        MediaFormat::Audio => format!("{title}_{}.{extension}", video.id),
    }
}

/// Transfer rate over the last few chunks of a single file.
#[derive(Debug)]
pub struct SpeedMeter {
    started: Instant,
    window: std::collections::VecDeque<(Instant, u64)>,
    capacity: usize,
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SpeedMeter {
    /// A meter averaging over `capacity` samples (at least two).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            started: Instant::now(),
            window: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Note that `bytes` have been received so far.
    pub fn sample(&mut self, bytes: u64) {
        self.sample_at(Instant::now(), bytes);
    }

    fn sample_at(&mut self, at: Instant, bytes: u64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back((at, bytes));
    }

    /// Bytes per second across the window, or since the start when only
    /// one sample exists.
    #[must_use]
    pub fn bytes_per_sec(&self) -> f64 {
        match (self.window.front(), self.window.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if self.window.len() > 1 => {
                let secs = t1.duration_since(t0).as_secs_f64();
                if secs > 0.0 {
                    b1.saturating_sub(b0) as f64 / secs
                } else {
                    0.0
                }
            }
            (_, Some(&(t1, b1))) => {
                let secs = t1.duration_since(self.started).as_secs_f64();
                if secs > 0.0 { b1 as f64 / secs } else { 0.0 }
            }
            _ => 0.0,
        }
    }

    /// Seconds left at the current rate, once the total is known.
    #[must_use]
    pub fn eta_secs(&self, total: Option<u64>) -> Option<f64> {
        let rate = self.bytes_per_sec();
        let &(_, received) = self.window.back()?;
        let left = total?.checked_sub(received)?;
        (rate > 0.0 && left > 0).then(|| left as f64 / rate)
    }

    /// Fill in the rate fields of a snapshot.
    #[must_use]
    pub fn snapshot(&self, title: &str, bytes: u64, total: Option<u64>) -> DownloadProgress {
        DownloadProgress {
            fraction: total.map_or(0.0, |t| (bytes as f64 / t.max(1) as f64).min(1.0)),
            bytes,
            total_bytes: total,
            speed_bps: self.bytes_per_sec(),
            eta_secs: self.eta_secs(total),
            ..DownloadProgress::new(title, DownloadStatus::Downloading)
        }
    }
}

/// Retry and timeout settings for [`RustyYtdlDownloader`].
#[derive(Debug, Clone)]
pub struct RustyYtdlConfig {
    /// Number of attempts for a failing download.
    pub retries: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
    /// HTTP timeout for page scraping.
    pub request_timeout: Duration,
}

impl Default for RustyYtdlConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// [`MediaDownloader`] backed by `rusty_ytdl` for streams and a plain HTTP
/// fetch of the results page for search.
///
/// Streams are written to `<name>.part` and renamed when complete. Cancelling
/// is cooperative and checked between chunks.
pub struct RustyYtdlDownloader {
    config: RustyYtdlConfig,
    cancel_flag: Arc<AtomicBool>,
}

impl RustyYtdlDownloader {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RustyYtdlConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RustyYtdlConfig) -> Self {
        Self {
            config,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run an async extractor call from synchronous code.
    ///
    /// The blocking feature of rusty_ytdl hangs, so the async API is driven
    /// on the current runtime when there is one, otherwise on a fresh one.
    fn block_on<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| handle.block_on(fut))
        } else {
            let rt = tokio::runtime::Runtime::new().map_err(|e| {
                Error::Download(DownloadError::Network(format!(
                    "Failed to create tokio runtime: {e}"
                )))
            })?;
            rt.block_on(fut)
        }
    }

    fn http_client(&self) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| Error::Download(DownloadError::Network(e.to_string())))
    }

    async fn fetch_video_info(video_id: &str) -> Result<VideoInfo> {
        let video = Video::new(watch_url(video_id)).map_err(|e| {
            Error::Download(DownloadError::VideoUnavailable {
                video_id: video_id.to_string(),
                reason: format!("Failed to create video instance: {e}"),
            })
        })?;

        let info = video.get_basic_info().await.map_err(|e| {
            Error::Download(DownloadError::VideoUnavailable {
                video_id: video_id.to_string(),
                reason: format!("Failed to get video info: {e}"),
            })
        })?;

        Ok(video_info_from_details(&info.video_details))
    }

    /// One download attempt. Returns the result and whether it was skipped.
    async fn download_attempt(
        &self,
        video_id: &str,
        format: MediaFormat,
        output_dir: &Path,
        on_chunk: &(dyn Fn(&VideoInfo, u64, Option<u64>) + Send + Sync),
    ) -> Result<DownloadResult> {
        let options = format.ytdl_options();
        let video = Video::new_with_options(watch_url(video_id), options.clone()).map_err(|e| {
            Error::Download(DownloadError::VideoUnavailable {
                video_id: video_id.to_string(),
                reason: format!("Failed to create video instance: {e}"),
            })
        })?;

        let info = video.get_info().await.map_err(|e| {
            Error::Download(DownloadError::VideoUnavailable {
                video_id: video_id.to_string(),
                reason: format!("Failed to get video info: {e}"),
            })
        })?;
        let video_info = video_info_from_details(&info.video_details);
        debug!("{} offers {} formats", video_id, info.formats.len());

        let no_stream = || {
            Error::Download(DownloadError::NoMatchingStream {
                title: video_info.title.clone(),
                format: format.to_string(),
            })
        };
        let chosen = rusty_ytdl::choose_format(&info.formats, &options).map_err(|e| {
            debug!("No {} format for {}: {}", format, video_id, e);
            no_stream()
        })?;
        let extension = format
            .extension_for_container(&chosen.mime_type.container)
            .ok_or_else(no_stream)?;
        let output_path = output_dir.join(output_file_name(&video_info, format, extension));

        if output_path.exists() {
            info!("Skipping existing file: {}", output_path.display());
            let bytes = output_path.metadata().map(|m| m.len()).unwrap_or(0);
            return Ok(DownloadResult {
                video: video_info,
                format,
                output_path,
                skipped: true,
                bytes,
            });
        }

        let stream = video.stream().await.map_err(|e| {
            Error::Download(DownloadError::StreamFailed {
                title: video_info.title.clone(),
                reason: format!("Failed to create stream: {e}"),
            })
        })?;
        let total_bytes = Some(stream.content_length() as u64).filter(|len| *len > 0);
        debug!("Stream content length: {:?} bytes", total_bytes);

        let part_path = output_path.with_extension(format!("{extension}.part"));
        let mut file = std::fs::File::create(&part_path).write_context(&part_path)?;

        let mut written = 0u64;
        let result: Result<()> = async {
            while let Some(chunk) = stream.chunk().await.map_err(|e| {
                Error::Download(DownloadError::StreamFailed {
                    title: video_info.title.clone(),
                    reason: format!("Failed to download chunk: {e}"),
                })
            })? {
                if self.cancel_flag.load(Ordering::SeqCst) {
                    return Err(Error::Download(DownloadError::Cancelled));
                }
                file.write_all(&chunk).write_context(&part_path)?;
                written += chunk.len() as u64;
                on_chunk(&video_info, written, total_bytes);
            }
            file.flush().write_context(&part_path)
        }
        .await;

        if let Err(e) = result {
            drop(file);
            let _ = std::fs::remove_file(&part_path);
            return Err(e);
        }
        drop(file);

        std::fs::rename(&part_path, &output_path).map_err(|e| {
            Error::FileSystem(FileSystemError::MoveFailed {
                from: part_path.clone(),
                to: output_path.clone(),
                reason: e.to_string(),
            })
        })?;

        info!(
            "Downloaded {} bytes: {} -> {}",
            written,
            video_info.title,
            output_path.display()
        );

        Ok(DownloadResult {
            video: video_info,
            format,
            output_path,
            skipped: false,
            bytes: written,
        })
    }

    fn fetch_search_page(&self, query: &str) -> Result<String> {
        let search_failed = |reason: String| {
            Error::Download(DownloadError::SearchFailed {
                query: query.to_string(),
                reason,
            })
        };

        let response = self
            .http_client()?
            .get("https://www.youtube.com/results")
            .query(&[("search_query", query)])
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .map_err(|e| search_failed(format!("Failed to fetch results page: {e}")))?;

        if !response.status().is_success() {
            return Err(search_failed(format!(
                "Results page returned HTTP {}",
                response.status()
            )));
        }

        response
            .text()
            .map_err(|e| search_failed(format!("Failed to read response: {e}")))
    }
}

impl Default for RustyYtdlDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDownloader for RustyYtdlDownloader {
    fn video_info(&self, url: &str) -> Result<VideoInfo> {
        let video_id = extract_video_id(url)?;
        info!("Fetching video info for: {}", video_id);
        self.block_on(Self::fetch_video_info(&video_id))
    }

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        info!("Searching YouTube for '{}' (max {})", query, max_results);
        let html = self.fetch_search_page(query)?;
        let results = parse_search_results(&html, max_results).map_err(|reason| {
            Error::Download(DownloadError::SearchFailed {
                query: query.to_string(),
                reason,
            })
        })?;

        info!("Search for '{}' returned {} results", query, results.len());
        Ok(results)
    }

    fn download(
        &self,
        url: &str,
        format: MediaFormat,
        output_dir: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadResult> {
        let video_id = extract_video_id(url)?;

        if !output_dir.exists() {
            std::fs::create_dir_all(output_dir).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: output_dir.to_path_buf(),
                    reason: e.to_string(),
                })
            })?;
        }

        let meter = std::sync::Mutex::new(SpeedMeter::default());
        let emit = |snapshot: DownloadProgress| {
            if let Some(callback) = &progress {
                callback(snapshot);
            }
        };
        let finish = |title: &str, status: DownloadStatus, bytes: u64| {
            emit(DownloadProgress {
                fraction: if matches!(status, DownloadStatus::Failed(_)) { 0.0 } else { 1.0 },
                bytes,
                total_bytes: Some(bytes),
                ..DownloadProgress::new(title, status)
            });
        };

        emit(DownloadProgress::new(&video_id, DownloadStatus::Starting));

        let on_chunk = |video: &VideoInfo, written: u64, total: Option<u64>| {
            if let Ok(mut meter) = meter.lock() {
                meter.sample(written);
                emit(meter.snapshot(&video.title, written, total));
            }
        };

        let retries = self.config.retries.max(1);
        let mut last_error = None;

        for attempt in 1..=retries {
            if self.cancel_flag.load(Ordering::SeqCst) {
                info!("Download of {} cancelled", video_id);
                return Err(Error::Download(DownloadError::Cancelled));
            }

            match self.block_on(self.download_attempt(&video_id, format, output_dir, &on_chunk)) {
                Ok(result) => {
                    let status = if result.skipped {
                        DownloadStatus::Skipped
                    } else {
                        DownloadStatus::Completed
                    };
                    finish(&result.video.title, status, result.bytes);
                    return Ok(result);
                }
                Err(e @ Error::Download(DownloadError::Cancelled | DownloadError::NoMatchingStream { .. })) => {
                    finish(&video_id, DownloadStatus::Failed(e.to_string()), 0);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt, retries, video_id, e
                    );
                    last_error = Some(e);

                    if attempt < retries {
                        std::thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            Error::Download(DownloadError::StreamFailed {
                title: video_id.clone(),
                reason: "Unknown error".to_string(),
            })
        });
        error!("Failed to download '{}': {}", video_id, err);
        finish(&video_id, DownloadStatus::Failed(err.to_string()), 0);
        Err(err)
    }

    fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    fn reset_cancel(&self) {
        self.cancel_flag.store(false, Ordering::SeqCst);
    }
}

fn video_info_from_details(details: &rusty_ytdl::VideoDetails) -> VideoInfo {
    let uploader = details
        .author
        .as_ref()
        .map(|a| a.name.clone())
        .or_else(|| Some(details.owner_channel_name.clone()))
        .filter(|name| !name.is_empty());

    VideoInfo {
        id: details.video_id.clone(),
        title: if details.title.is_empty() {
            "Unknown title".to_string()
        } else {
            details.title.clone()
        },
        duration_secs: details.length_seconds.parse().ok(),
        uploader,
        thumbnail_url: details.thumbnails.last().map(|t| t.url.clone()),
        view_count: details.view_count.parse().ok(),
        upload_date: format_upload_date(&details.upload_date),
    }
}

/// Parse search hits out of a results page.
///
/// # Errors
///
/// Returns a reason string if no `ytInitialData` can be found or parsed.
pub fn parse_search_results(
    html: &str,
    max_results: usize,
) -> std::result::Result<Vec<SearchResult>, String> {
    let data = extract_yt_initial_data(html)?;

    let mut renderers = Vec::new();
    collect_video_renderers(&data, &mut renderers);

    let mut seen = std::collections::HashSet::new();
    let mut results: Vec<SearchResult> = renderers
        .into_iter()
        .filter_map(parse_video_renderer)
        .filter(|r| seen.insert(r.video_id.clone()))
        .take(max_results)
        .collect();

    if results.is_empty() {
        warn!("No videoRenderer entries found, trying regex extraction");
        results = extract_results_regex(html, max_results);
    }

    Ok(results)
}

/// The `ytInitialData` object embedded in a results page.
fn extract_yt_initial_data(html: &str) -> std::result::Result<serde_json::Value, String> {
    let start = ["var ytInitialData = ", "ytInitialData = "]
        .iter()
        .find_map(|marker| html.find(marker).map(|pos| pos + marker.len()))
        .ok_or_else(|| "Could not find ytInitialData in page".to_string())?;

    // The object is followed by `;</script>`; parse only the first value.
    let mut values =
        serde_json::Deserializer::from_str(&html[start..]).into_iter::<serde_json::Value>();
    match values.next() {
        Some(Ok(value)) if value.is_object() => {
            debug!("ytInitialData parsed ({} bytes)", values.byte_offset());
            Ok(value)
        }
        Some(Ok(_)) => Err("ytInitialData is not an object".to_string()),
        Some(Err(e)) => Err(format!("Failed to parse ytInitialData: {e}")),
        None => Err("ytInitialData is empty".to_string()),
    }
}

/// Collect every `videoRenderer` object, in document order.
fn collect_video_renderers<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a serde_json::Value>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                if key == "videoRenderer" {
                    out.push(child);
                } else {
                    collect_video_renderers(child, out);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_video_renderers(item, out);
            }
        }
        _ => {}
    }
}

fn runs_text(value: Option<&serde_json::Value>) -> Option<String> {
    let value = value?;
    if let Some(text) = value.get("simpleText").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let runs = value.get("runs")?.as_array()?;
    let text: String = runs
        .iter()
        .filter_map(|run| run.get("text").and_then(|t| t.as_str()))
        .collect();
    (!text.is_empty()).then_some(text)
}

fn parse_video_renderer(renderer: &serde_json::Value) -> Option<SearchResult> {
    let video_id = renderer.get("videoId")?.as_str()?.to_string();
    let title = runs_text(renderer.get("title")).unwrap_or_else(|| "Unknown title".to_string());

    let duration_secs = runs_text(renderer.get("lengthText"))
        .as_deref()
        .and_then(parse_duration_text);

    let view_count = runs_text(renderer.get("viewCountText")).and_then(|text| parse_view_count(&text));

    let uploader = runs_text(renderer.get("ownerText"))
        .or_else(|| runs_text(renderer.get("longBylineText")))
        .unwrap_or_else(|| "Unknown".to_string());

    let upload_date =
        runs_text(renderer.get("publishedTimeText")).unwrap_or_else(|| "Unknown".to_string());

    let thumbnails = renderer
        .get("thumbnail")
        .and_then(|t| t.get("thumbnails"))
        .and_then(|t| t.as_array());
    let thumbnail_url = thumbnails.and_then(|thumbs| {
        thumbs
            .iter()
            .find(|t| t.get("width").and_then(serde_json::Value::as_u64).unwrap_or(0) >= MIN_THUMBNAIL_WIDTH)
            .or_else(|| thumbs.first())
            .and_then(|t| t.get("url"))
            .and_then(|u| u.as_str())
            .map(String::from)
    });

    let description = renderer
        .get("detailedMetadataSnippets")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .and_then(|s| runs_text(s.get("snippetText")))
        .or_else(|| runs_text(renderer.get("descriptionSnippet")))
        .unwrap_or_default();

    Some(SearchResult {
        url: watch_url(&video_id),
        video_id,
        title: html_decode(&title),
        thumbnail_url,
        duration_text: format_duration_text(duration_secs),
        duration_secs,
        view_count,
        uploader,
        upload_date,
        description: truncate_description(&description),
    })
}

/// Fallback: extract video IDs using regex patterns.
fn extract_results_regex(html: &str, max_results: usize) -> Vec<SearchResult> {
    let Ok(video_id_re) = Regex::new(r#""videoId"\s*:\s*"([a-zA-Z0-9_-]{11})""#) else {
        return Vec::new();
    };

    let mut seen_ids = std::collections::HashSet::new();
    video_id_re
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|id| seen_ids.insert(id.clone()))
        .take(max_results)
        .map(|id| {
            let info = VideoInfo::unresolved(&id);
            SearchResult {
                url: info.url(),
                video_id: id,
                title: info.title,
                thumbnail_url: None,
                duration_secs: None,
                duration_text: format_duration_text(None),
                view_count: None,
                uploader: "Unknown".to_string(),
                upload_date: "Unknown".to_string(),
                description: String::new(),
            }
        })
        .collect()
}

fn truncate_description(text: &str) -> String {
    if text.chars().count() > DESCRIPTION_LIMIT {
        let cut: String = text.chars().take(DESCRIPTION_LIMIT).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// Parse "1,234,567 views" style counts.
fn parse_view_count(text: &str) -> Option<u64> {
    if text.to_lowercase().starts_with("no views") {
        return Some(0);
    }
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `"3:45"` or `"1:23:45"` to seconds.
fn parse_duration_text(text: &str) -> Option<u64> {
    let fields = text.trim().split(':');
    let mut secs = 0u64;
    let mut count = 0;
    for field in fields {
        secs = secs * 60 + field.parse::<u64>().ok()?;
        count += 1;
    }
    (2..=3).contains(&count).then_some(secs)
}

/// The few entities that appear in result titles.
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}
