//! Download orchestration.
//!
//! [`DownloadService`] turns dashboard requests into background jobs. Each
//! job runs the blocking downloader on tokio's blocking pool, records its
//! progress in an in-memory job table, optionally relays the file to cloud
//! storage and announces new audio files so the library and player can
//! rescan.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::cloud::{CloudUploadManager, UploadResult};
use crate::error::{DownloadError, Error, Result};
use crate::youtube::{
    DownloadProgress, MediaDownloader, MediaFormat, ProgressCallback, SearchResult, VideoInfo,
    validate_youtube_url,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MAX_SEARCH_RESULTS: usize = 50;

/// Lifecycle of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued.
    Pending,
    /// Fetching media.
    Downloading,
    /// Relaying to cloud storage.
    Uploading,
    /// Done.
    Completed,
    /// Gave up.
    Failed(String),
}

impl JobStatus {
    /// Whether the job will not change any more.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// One requested download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Job id.
    pub id: String,
    /// Requested URL.
    pub url: String,
    /// Video title once known.
    pub title: Option<String>,
    /// Requested format.
    pub format: MediaFormat,
    /// Current status.
    pub status: JobStatus,
    /// Fraction downloaded (0.0 - 1.0).
    pub progress: f64,
    /// Human-readable download speed.
    pub speed: Option<String>,
    /// Where the file was saved.
    pub output_path: Option<PathBuf>,
    /// The file was already present.
    pub skipped: bool,
    /// Cloud upload outcome, when one was attempted.
    pub upload: Option<UploadResult>,
    /// Failure description.
    pub error: Option<String>,
    /// Creation time (unix seconds).
    pub created_at: u64,
    /// Completion time (unix seconds).
    pub finished_at: Option<u64>,
}

impl DownloadJob {
    fn new(url: &str, format: MediaFormat) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            title: None,
            format,
            status: JobStatus::Pending,
            progress: 0.0,
            speed: None,
            output_path: None,
            skipped: false,
            upload: None,
            error: None,
            created_at: unix_now(),
            finished_at: None,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Notifications published by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// A job changed.
    JobUpdated {
        /// The job after the change.
        job: DownloadJob,
    },
    /// A new audio file landed in the library.
    LibraryChanged {
        /// The new file.
        path: PathBuf,
    },
}

/// Options for [`DownloadService`].
#[derive(Debug, Clone)]
pub struct DownloadServiceConfig {
    /// Where downloads are saved.
    pub output_dir: PathBuf,
    /// Result count used when a search does not ask for one.
    pub default_search_results: usize,
    /// Relay finished downloads to cloud storage.
    pub auto_upload: bool,
}

type JobTable = Arc<RwLock<Vec<DownloadJob>>>;

/// Runs downloads in the background and tracks them.
#[derive(Clone)]
pub struct DownloadService {
    downloader: Arc<dyn MediaDownloader>,
    uploads: Option<Arc<CloudUploadManager>>,
    config: Arc<RwLock<DownloadServiceConfig>>,
    jobs: JobTable,
    active: Arc<AtomicUsize>,
    events: broadcast::Sender<DownloadEvent>,
}

impl std::fmt::Debug for DownloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadService")
            .field("config", &self.config)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl DownloadService {
    /// Create the service.
    #[must_use]
    pub fn new(
        downloader: Arc<dyn MediaDownloader>,
        uploads: Option<Arc<CloudUploadManager>>,
        config: DownloadServiceConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            downloader,
            uploads,
            config: Arc::new(RwLock::new(config)),
            jobs: Arc::new(RwLock::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            events,
        }
    }

    /// Receive job and library notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Directory downloads are saved to.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.settings().output_dir
    }

    /// Point new downloads at another directory.
    pub fn set_output_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        info!("Download directory set to {}", dir.display());
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .output_dir = dir;
    }

    fn settings(&self) -> DownloadServiceConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up a video.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the video is unavailable.
    pub async fn video_info(&self, url: &str) -> Result<VideoInfo> {
        let validation = validate_youtube_url(url);
        let Some(normalized) = validation.normalized_url else {
            return Err(invalid_url(url, validation.error_message));
        };
        let downloader = Arc::clone(&self.downloader);
        run_blocking(move || downloader.video_info(&normalized)).await
    }

    /// Keyword search. `limit` defaults to the configured count.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty query or if the search fails.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchResult>> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(Error::Download(DownloadError::SearchFailed {
                query,
                reason: "search query is empty".to_string(),
            }));
        }
        let limit = limit
            .unwrap_or(self.settings().default_search_results)
            .clamp(1, MAX_SEARCH_RESULTS);
        let downloader = Arc::clone(&self.downloader);
        run_blocking(move || downloader.search(&query, limit)).await
    }

    /// Queue one download, returning the job id.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the URL is not a `YouTube` video.
    pub fn start(&self, url: &str, format: MediaFormat) -> Result<String> {
        let validation = validate_youtube_url(url);
        let Some(normalized) = validation.normalized_url else {
            return Err(invalid_url(url, validation.error_message));
        };

        let job = DownloadJob::new(&normalized, format);
        let id = job.id.clone();
        self.insert(job);
        self.spawn(vec![id.clone()]);
        Ok(id)
    }

    /// Queue several downloads that run one after another.
    ///
    /// Invalid URLs are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if none of the URLs is valid.
    pub fn start_batch(&self, urls: &[String], format: MediaFormat) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for url in urls {
            let validation = validate_youtube_url(url);
            match validation.normalized_url {
                Some(normalized) => {
                    let job = DownloadJob::new(&normalized, format);
                    ids.push(job.id.clone());
                    self.insert(job);
                }
                None => warn!("Skipping invalid batch URL {}", url),
            }
        }

        if ids.is_empty() {
            return Err(invalid_url(
                &urls.join(" "),
                Some("no valid YouTube URL in batch".to_string()),
            ));
        }
        info!("Queued batch of {} downloads", ids.len());
        self.spawn(ids.clone());
        Ok(ids)
    }

    /// A job by id.
    #[must_use]
    pub fn job(&self, id: &str) -> Option<DownloadJob> {
        read_jobs(&self.jobs).iter().find(|j| j.id == id).cloned()
    }

    /// Every job, newest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<DownloadJob> {
        read_jobs(&self.jobs).iter().rev().cloned().collect()
    }

    /// Forget completed and failed jobs, returning how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|j| !j.status.is_finished());
        before - jobs.len()
    }

    /// Abort running downloads. Queued jobs of the same batch fail as cancelled.
    pub fn cancel_all(&self) {
        info!("Cancelling active downloads");
        self.downloader.cancel();
    }

    /// Number of jobs not yet finished.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn insert(&self, job: DownloadJob) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);
    }

    fn spawn(&self, ids: Vec<String>) {
        // A previous cancel must not leak into new work once nothing is running.
        if self.active.fetch_add(ids.len(), Ordering::SeqCst) == 0 {
            self.downloader.reset_cancel();
        }

        let runner = JobRunner {
            downloader: Arc::clone(&self.downloader),
            uploads: self.uploads.clone(),
            settings: self.settings(),
            jobs: Arc::clone(&self.jobs),
            events: self.events.clone(),
        };
        let active = Arc::clone(&self.active);

        tokio::task::spawn_blocking(move || {
            for id in ids {
                runner.run(&id);
                active.fetch_sub(1, Ordering::SeqCst);
            }
        });
    }
}

fn invalid_url(url: &str, reason: Option<String>) -> Error {
    Error::Download(DownloadError::InvalidUrl {
        url: url.to_string(),
        reason: reason.unwrap_or_else(|| "not a YouTube video URL".to_string()),
    })
}

fn read_jobs(jobs: &JobTable) -> std::sync::RwLockReadGuard<'_, Vec<DownloadJob>> {
    jobs.read().unwrap_or_else(PoisonError::into_inner)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("background task failed: {e}"))))?
}

/// Executes jobs on a blocking thread.
struct JobRunner {
    downloader: Arc<dyn MediaDownloader>,
    uploads: Option<Arc<CloudUploadManager>>,
    settings: DownloadServiceConfig,
    jobs: JobTable,
    events: broadcast::Sender<DownloadEvent>,
}

impl JobRunner {
    fn run(&self, id: &str) {
        let Some(job) = self.update(id, |job| job.status = JobStatus::Downloading) else {
            debug!("Job {} was cleared before it started", id);
            return;
        };
        info!("Starting download job {} for {}", id, job.url);

        let progress = self.progress_callback(id);
        let result = self.downloader.download(
            &job.url,
            job.format,
            &self.settings.output_dir,
            Some(progress),
        );

        let download = match result {
            Ok(download) => download,
            Err(e) => {
                error!("Download job {} failed: {}", id, e);
                let message = e.to_string();
                self.update(id, |job| {
                    job.status = JobStatus::Failed(message.clone());
                    job.error = Some(message);
                    job.finished_at = Some(unix_now());
                });
                return;
            }
        };

        self.update(id, |job| {
            job.title = Some(download.video.title.clone());
            job.output_path = Some(download.output_path.clone());
            job.skipped = download.skipped;
            job.progress = 1.0;
        });

        let upload = self.maybe_upload(id, &download.output_path, job.format);

        self.update(id, |job| {
            job.upload = upload;
            job.status = JobStatus::Completed;
            job.finished_at = Some(unix_now());
        });
        info!(
            "Download job {} finished: {}",
            id,
            download.output_path.display()
        );

        if job.format == MediaFormat::Audio {
            let _ = self.events.send(DownloadEvent::LibraryChanged {
                path: download.output_path,
            });
        }
    }

    fn maybe_upload(&self, id: &str, path: &Path, format: MediaFormat) -> Option<UploadResult> {
        if !self.settings.auto_upload {
            return None;
        }
        let uploads = self.uploads.as_ref()?;
        if uploads.available_services().is_empty() {
            debug!("Auto upload enabled but no cloud service is configured");
            return None;
        }

        self.update(id, |job| job.status = JobStatus::Uploading);
        let result = uploads.upload(path, format);
        if !result.success {
            warn!(
                "Auto upload of {} failed: {}",
                path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        Some(result)
    }

    fn progress_callback(&self, id: &str) -> ProgressCallback {
        let jobs = Arc::clone(&self.jobs);
        let events = self.events.clone();
        let id = id.to_string();
        Box::new(move |p: DownloadProgress| {
            let updated = {
                let mut jobs = jobs.write().unwrap_or_else(PoisonError::into_inner);
                let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
                    return;
                };
                let percent_before = (job.progress * 100.0) as u32;
                job.progress = p.fraction.clamp(0.0, 1.0);
                if job.title.is_none() && !p.title.is_empty() {
                    job.title = Some(p.title.clone());
                }
                if p.speed_bps > 0.0 {
                    job.speed = Some(p.speed_text());
                }
                // Whole-percent steps only, to keep the event stream small.
                ((job.progress * 100.0) as u32 != percent_before).then(|| job.clone())
            };
            if let Some(job) = updated {
                let _ = events.send(DownloadEvent::JobUpdated { job });
            }
        })
    }

    /// Apply `change` to a job and publish it.
    fn update(&self, id: &str, change: impl FnOnce(&mut DownloadJob)) -> Option<DownloadJob> {
        let job = {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            let job = jobs.iter_mut().find(|j| j.id == id)?;
            change(job);
            job.clone()
        };
        let _ = self.events.send(DownloadEvent::JobUpdated { job: job.clone() });
        Some(job)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::youtube::{DownloadResult, DownloadStatus, MockMediaDownloader, watch_url};
    use std::time::Duration;
    use tempfile::TempDir;

    fn video(id: &str) -> VideoInfo {
        VideoInfo {
            title: format!("Title {id}"),
            ..VideoInfo::unresolved(id)
        }
    }

    fn service(mock: MockMediaDownloader, dir: &Path) -> DownloadService {
        DownloadService::new(
            Arc::new(mock),
            None,
            DownloadServiceConfig {
                output_dir: dir.to_path_buf(),
                default_search_results: 5,
                auto_upload: false,
            },
        )
    }

    fn succeeding_download(mock: &mut MockMediaDownloader) {
        mock.expect_download()
            .returning(|url, format, dir, progress| {
                if let Some(callback) = progress {
                    callback(DownloadProgress {
                        fraction: 0.5,
                        ..DownloadProgress::new("Title", DownloadStatus::Downloading)
                    });
                }
                if url.contains("bbbbbbbbbbb") {
                    return Err(Error::Download(DownloadError::Network("boom".to_string())));
                }
                let id = url.rsplit('=').next().unwrap_or_default().to_string();
                let output_path = dir.join(format!("{id}.m4a"));
                std::fs::write(&output_path, b"audio").unwrap();
                Ok(DownloadResult {
                    video: video(&id),
                    format,
                    output_path,
                    skipped: false,
                    bytes: 5,
                })
            });
    }

    async fn wait_finished(service: &DownloadService, id: &str) -> DownloadJob {
        for _ in 0..500 {
            if let Some(job) = service.job(id)
                && job.status.is_finished()
            {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_rejects_invalid_url() {
        let temp = TempDir::new().unwrap();
        let service = service(MockMediaDownloader::new(), temp.path());
        let err = service
            .start("https://example.com/video", MediaFormat::Audio)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Download(DownloadError::InvalidUrl { .. })
        ));
        assert!(service.jobs().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_completes_and_announces_audio() {
        let temp = TempDir::new().unwrap();
        let mut mock = MockMediaDownloader::new();
        mock.expect_reset_cancel().returning(|| ());
        succeeding_download(&mut mock);
        let service = service(mock, temp.path());
        let mut events = service.subscribe();

        let id = service
            .start("https://youtu.be/aaaaaaaaaaa", MediaFormat::Audio)
            .unwrap();
        let job = wait_finished(&service, &id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.url, watch_url("aaaaaaaaaaa"));
        assert_eq!(job.title.as_deref(), Some("Title aaaaaaaaaaa"));
        assert!((job.progress - 1.0).abs() < f64::EPSILON);
        assert!(job.output_path.unwrap().exists());
        assert!(job.finished_at.is_some());

        let mut library_changed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DownloadEvent::LibraryChanged { .. }) {
                library_changed = true;
            }
        }
        assert!(library_changed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_video_download_does_not_touch_library() {
        let temp = TempDir::new().unwrap();
        let mut mock = MockMediaDownloader::new();
        mock.expect_reset_cancel().returning(|| ());
        succeeding_download(&mut mock);
        let service = service(mock, temp.path());
        let mut events = service.subscribe();

        let id = service
            .start(&watch_url("aaaaaaaaaaa"), MediaFormat::Video)
            .unwrap();
        wait_finished(&service, &id).await;

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, DownloadEvent::LibraryChanged { .. }));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_keeps_going_after_failure() {
        let temp = TempDir::new().unwrap();
        let mut mock = MockMediaDownloader::new();
        mock.expect_reset_cancel().returning(|| ());
        succeeding_download(&mut mock);
        let service = service(mock, temp.path());

        let urls = vec![
            watch_url("aaaaaaaaaaa"),
            "not a url".to_string(),
            watch_url("bbbbbbbbbbb"),
            watch_url("ccccccccccc"),
        ];
        let ids = service.start_batch(&urls, MediaFormat::Audio).unwrap();
        assert_eq!(ids.len(), 3);

        let mut statuses = Vec::new();
        for id in &ids {
            statuses.push(wait_finished(&service, id).await.status);
        }
        assert_eq!(statuses[0], JobStatus::Completed);
        assert!(matches!(&statuses[1], JobStatus::Failed(msg) if msg.contains("boom")));
        assert_eq!(statuses[2], JobStatus::Completed);
        assert_eq!(service.active_jobs(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_with_no_valid_urls() {
        let temp = TempDir::new().unwrap();
        let service = service(MockMediaDownloader::new(), temp.path());
        let urls = vec!["nope".to_string(), String::new()];
        assert!(service.start_batch(&urls, MediaFormat::Audio).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_finished() {
        let temp = TempDir::new().unwrap();
        let mut mock = MockMediaDownloader::new();
        mock.expect_reset_cancel().returning(|| ());
        succeeding_download(&mut mock);
        let service = service(mock, temp.path());

        let id = service
            .start(&watch_url("aaaaaaaaaaa"), MediaFormat::Audio)
            .unwrap();
        wait_finished(&service, &id).await;

        assert_eq!(service.jobs().len(), 1);
        assert_eq!(service.clear_finished(), 1);
        assert!(service.jobs().is_empty());
        assert!(service.job(&id).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_uses_default_limit() {
        let temp = TempDir::new().unwrap();
        let mut mock = MockMediaDownloader::new();
        mock.expect_search()
            .withf(|query, limit| query == "lofi" && *limit == 5)
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        let service = service(mock, temp.path());

        assert!(service.search("  lofi ", None).await.unwrap().is_empty());
        assert!(service.search("   ", None).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_video_info_normalizes_url() {
        let temp = TempDir::new().unwrap();
        let mut mock = MockMediaDownloader::new();
        mock.expect_video_info()
            .withf(|url| url == "https://www.youtube.com/watch?v=aaaaaaaaaaa")
            .times(1)
            .returning(|_| Ok(video("aaaaaaaaaaa")));
        let service = service(mock, temp.path());

        let info = service
            .video_info("https://youtube.com/shorts/aaaaaaaaaaa")
            .await
            .unwrap();
        assert_eq!(info.id, "aaaaaaaaaaa");
        assert!(service.video_info("garbage").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_all_reaches_downloader() {
        let temp = TempDir::new().unwrap();
        let mut mock = MockMediaDownloader::new();
        mock.expect_cancel().times(1).returning(|| ());
        let service = service(mock, temp.path());
        service.cancel_all();
    }

    #[test]
    fn test_job_status_serialization() {
        let json = serde_json::to_value(JobStatus::Failed("x".to_string())).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "x");
        let json = serde_json::to_value(JobStatus::Pending).unwrap();
        assert_eq!(json["state"], "pending");
    }
}
