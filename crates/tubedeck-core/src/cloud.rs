//! Upload relay for Google Drive, Dropbox and OneDrive.
//!
//! Each provider reads its credentials from a file in the credentials
//! directory; a provider counts as available when that file exists. No
//! interactive OAuth flow is run: tokens must be provisioned beforehand.
//!
//! Uploads never panic or bubble errors up to the caller of
//! [`CloudUploadManager`]; every outcome is reported as an [`UploadResult`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::CloudSettings;
use crate::error::{Error, ErrorContext, FileSystemError, Result, UploadError};
use crate::youtube::MediaFormat;

/// Google Drive OAuth client secrets; required for Drive to be available.
pub const GOOGLE_CREDENTIALS_FILE: &str = "google_credentials.json";
/// Google Drive authorized-user token.
pub const GOOGLE_TOKEN_FILE: &str = "google_token.json";
/// Dropbox access token (plain text).
pub const DROPBOX_TOKEN_FILE: &str = "dropbox_token.txt";
/// OneDrive app registration.
pub const ONEDRIVE_CONFIG_FILE: &str = "onedrive_config.json";

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/drive/v3/files?uploadType=multipart&fields=id,name,webViewLink";
const DROPBOX_UPLOAD_URL: &str = "https://content.dropboxapi.com/2/files/upload";
const DROPBOX_SHARE_URL: &str = "https://api.dropboxapi.com/2/sharing/create_shared_link_with_settings";
const GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";

const UPLOAD_RETRIES: u32 = 3;
const UPLOAD_RETRY_DELAY: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudService {
    /// Google Drive.
    #[serde(rename = "google_drive")]
    GoogleDrive,
    /// Dropbox.
    #[serde(rename = "dropbox")]
    Dropbox,
    /// Microsoft OneDrive.
    #[serde(rename = "onedrive")]
    OneDrive,
}

impl CloudService {
    /// Every provider, in preference order.
    pub const ALL: [Self; 3] = [Self::GoogleDrive, Self::Dropbox, Self::OneDrive];

    /// Stable identifier.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::GoogleDrive => "google_drive",
            Self::Dropbox => "dropbox",
            Self::OneDrive => "onedrive",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::GoogleDrive => "Google Drive",
            Self::Dropbox => "Dropbox",
            Self::OneDrive => "OneDrive",
        }
    }

    /// Credentials file that marks the provider as available.
    #[must_use]
    pub const fn credentials_file(self) -> &'static str {
        match self {
            Self::GoogleDrive => GOOGLE_CREDENTIALS_FILE,
            Self::Dropbox => DROPBOX_TOKEN_FILE,
            Self::OneDrive => ONEDRIVE_CONFIG_FILE,
        }
    }
}

impl fmt::Display for CloudService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for CloudService {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|service| service.id() == s)
            .ok_or_else(|| Error::Upload(UploadError::UnknownService(s.to_string())))
    }
}

/// Outcome of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Whether the file was uploaded.
    pub success: bool,
    /// Provider display name.
    pub service: String,
    /// Remote file id.
    pub file_id: Option<String>,
    /// Remote file name.
    pub file_name: Option<String>,
    /// Link for viewing the file, when one could be created.
    pub web_link: Option<String>,
    /// Failure description.
    pub error: Option<String>,
}

impl UploadResult {
    fn uploaded(
        service: CloudService,
        file_id: String,
        file_name: String,
        web_link: Option<String>,
    ) -> Self {
        Self {
            success: true,
            service: service.display_name().to_string(),
            file_id: Some(file_id),
            file_name: Some(file_name),
            web_link,
            error: None,
        }
    }

    /// A failed upload.
    #[must_use]
    pub fn failed(service: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            service: service.to_string(),
            file_id: None,
            file_name: None,
            web_link: None,
            error: Some(error.into()),
        }
    }
}

/// A provider able to receive files.
pub trait CloudUploader: Send + Sync {
    /// Which provider this is.
    fn service(&self) -> CloudService;

    /// Upload `path`, named `remote_name` (or the local file name).
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, credentials are missing or
    /// invalid, or the provider rejects the upload.
    fn upload(&self, path: &Path, remote_name: Option<&str>) -> Result<UploadResult>;
}

fn upload_failed(service: CloudService, reason: impl fmt::Display) -> Error {
    Error::Upload(UploadError::RequestFailed {
        service: service.display_name().to_string(),
        reason: reason.to_string(),
    })
}

fn auth_failed(service: CloudService, reason: impl fmt::Display) -> Error {
    Error::Upload(UploadError::AuthFailed {
        service: service.display_name().to_string(),
        reason: reason.to_string(),
    })
}

fn not_configured(service: CloudService, file: &str) -> Error {
    Error::Upload(UploadError::NotConfigured {
        service: service.display_name().to_string(),
        file: file.to_string(),
    })
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::FileSystem(FileSystemError::NotFound {
            path: path.to_path_buf(),
        }))
    }
}

fn remote_file_name(path: &Path, remote_name: Option<&str>) -> String {
    remote_name
        .map(str::to_string)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Send a request, retrying connection failures and 5xx responses at a
/// fixed interval.
fn send_with_retry<F>(service: CloudService, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_error = String::new();
    for attempt in 1..=UPLOAD_RETRIES {
        match build().send() {
            Ok(response) if response.status().is_server_error() => {
                last_error = format!("server returned {}", response.status());
            }
            Ok(response) => return Ok(response),
            Err(e) if e.is_connect() || e.is_timeout() => {
                last_error = e.to_string();
            }
            Err(e) => return Err(upload_failed(service, e)),
        }

        if attempt < UPLOAD_RETRIES {
            warn!(
                "{} request attempt {}/{} failed: {}, retrying in {:?}",
                service, attempt, UPLOAD_RETRIES, last_error, UPLOAD_RETRY_DELAY
            );
            thread::sleep(UPLOAD_RETRY_DELAY);
        }
    }
    Err(upload_failed(service, last_error))
}

fn expect_success(service: CloudService, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(upload_failed(service, format!("{status} - {body}")))
}

// ---------------------------------------------------------------------------
// Google Drive
// ---------------------------------------------------------------------------

/// Authorized-user token as written by Google's client libraries.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GoogleToken {
    #[serde(default, alias = "access_token")]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    web_view_link: Option<String>,
}

/// Google Drive uploader.
#[derive(Debug, Clone)]
pub struct GoogleDriveUploader {
    credentials_dir: PathBuf,
    folder_id: Option<String>,
}

impl GoogleDriveUploader {
    /// Uploader reading credentials from `credentials_dir`, uploading into
    /// `folder_id` (Drive root when `None`).
    #[must_use]
    pub fn new(credentials_dir: impl Into<PathBuf>, folder_id: Option<String>) -> Self {
        Self {
            credentials_dir: credentials_dir.into(),
            folder_id,
        }
    }

    /// Upload into a specific folder, overriding the default one.
    ///
    /// # Errors
    ///
    /// See [`CloudUploader::upload`].
    pub fn upload_to_folder(
        &self,
        path: &Path,
        remote_name: Option<&str>,
        folder_id: Option<&str>,
    ) -> Result<UploadResult> {
        const SERVICE: CloudService = CloudService::GoogleDrive;
        require_file(path)?;

        let credentials = self.credentials_dir.join(GOOGLE_CREDENTIALS_FILE);
        if !credentials.is_file() {
            return Err(not_configured(SERVICE, GOOGLE_CREDENTIALS_FILE));
        }

        let client = http_client()?;
        let access_token = self.access_token(&client)?;

        let name = remote_file_name(path, remote_name);
        let mut metadata = json!({ "name": name });
        if let Some(folder) = folder_id.or(self.folder_id.as_deref()) {
            metadata["parents"] = json!([folder]);
        }

        let content = fs::read(path).read_context(path)?;
        let boundary = format!("tubedeck-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, crate::library::mime_type_for(path), &content);

        let response = send_with_retry(SERVICE, || {
            client
                .post(GOOGLE_UPLOAD_URL)
                .bearer_auth(&access_token)
                .header(
                    reqwest::header::CONTENT_TYPE,
                    format!("multipart/related; boundary={boundary}"),
                )
                .body(body.clone())
        })?;
        let file: DriveFile = expect_success(SERVICE, response)?
            .json()
            .map_err(|e| upload_failed(SERVICE, e))?;

        info!("Uploaded to Google Drive: {}", file.name);
        Ok(UploadResult::uploaded(
            SERVICE,
            file.id,
            file.name,
            file.web_view_link,
        ))
    }

    /// Current access token, refreshed when a refresh token is available.
    fn access_token(&self, client: &Client) -> Result<String> {
        const SERVICE: CloudService = CloudService::GoogleDrive;
        let token_path = self.credentials_dir.join(GOOGLE_TOKEN_FILE);
        if !token_path.is_file() {
            return Err(not_configured(SERVICE, GOOGLE_TOKEN_FILE));
        }
        let raw = fs::read_to_string(&token_path).read_context(&token_path)?;
        let mut token: GoogleToken =
            serde_json::from_str(&raw).map_err(|e| auth_failed(SERVICE, e))?;

        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            token.refresh_token.clone(),
            token.client_id.clone(),
            token.client_secret.clone(),
        ) else {
            debug!("No refresh credentials, using stored Google token as-is");
            return token
                .token
                .ok_or_else(|| auth_failed(SERVICE, "token file has no access token"));
        };

        let token_uri = token
            .token_uri
            .clone()
            .unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string());
        let response = send_with_retry(SERVICE, || {
            client.post(&token_uri).form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
        })?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(auth_failed(SERVICE, format!("token refresh returned {status}")));
        }
        let refreshed: AccessTokenResponse =
            response.json().map_err(|e| auth_failed(SERVICE, e))?;

        token.token = Some(refreshed.access_token.clone());
        match serde_json::to_string_pretty(&token) {
            Ok(json) => {
                if let Err(e) = fs::write(&token_path, json) {
                    warn!("Could not save refreshed Google token: {}", e);
                }
            }
            Err(e) => warn!("Could not serialize refreshed Google token: {}", e),
        }
        Ok(refreshed.access_token)
    }
}

impl CloudUploader for GoogleDriveUploader {
    fn service(&self) -> CloudService {
        CloudService::GoogleDrive
    }

    fn upload(&self, path: &Path, remote_name: Option<&str>) -> Result<UploadResult> {
        self.upload_to_folder(path, remote_name, None)
    }
}

fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

// ---------------------------------------------------------------------------
// Dropbox
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DropboxFile {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DropboxLink {
    url: String,
}

/// Dropbox uploader.
#[derive(Debug, Clone)]
pub struct DropboxUploader {
    credentials_dir: PathBuf,
}

impl DropboxUploader {
    /// Uploader reading its token from `credentials_dir`.
    #[must_use]
    pub fn new(credentials_dir: impl Into<PathBuf>) -> Self {
        Self {
            credentials_dir: credentials_dir.into(),
        }
    }

    fn access_token(&self) -> Result<String> {
        let path = self.credentials_dir.join(DROPBOX_TOKEN_FILE);
        if !path.is_file() {
            return Err(not_configured(CloudService::Dropbox, DROPBOX_TOKEN_FILE));
        }
        let token = fs::read_to_string(&path).read_context(&path)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(auth_failed(CloudService::Dropbox, "token file is empty"));
        }
        Ok(token.to_string())
    }
}

/// Dropbox paths are absolute.
fn dropbox_path(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

impl CloudUploader for DropboxUploader {
    fn service(&self) -> CloudService {
        CloudService::Dropbox
    }

    fn upload(&self, path: &Path, remote_name: Option<&str>) -> Result<UploadResult> {
        const SERVICE: CloudService = CloudService::Dropbox;
        require_file(path)?;
        let token = self.access_token()?;
        let client = http_client()?;

        let remote_path = dropbox_path(&remote_file_name(path, remote_name));
        let api_arg = json!({ "path": remote_path, "mode": "overwrite" }).to_string();
        let content = fs::read(path).read_context(path)?;

        let response = send_with_retry(SERVICE, || {
            client
                .post(DROPBOX_UPLOAD_URL)
                .bearer_auth(&token)
                .header("Dropbox-API-Arg", &api_arg)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(content.clone())
        })?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(auth_failed(SERVICE, "access token rejected"));
        }
        let file: DropboxFile = expect_success(SERVICE, response)?
            .json()
            .map_err(|e| upload_failed(SERVICE, e))?;

        let web_link = send_with_retry(SERVICE, || {
            client
                .post(DROPBOX_SHARE_URL)
                .bearer_auth(&token)
                .json(&json!({ "path": remote_path }))
        })
        .and_then(|r| expect_success(SERVICE, r))
        .and_then(|r| r.json::<DropboxLink>().map_err(|e| upload_failed(SERVICE, e)))
        .map(|link| link.url)
        .map_err(|e| warn!("Dropbox shared link not created: {}", e))
        .ok();

        info!("Uploaded to Dropbox: {}", file.name);
        Ok(UploadResult::uploaded(SERVICE, file.id, file.name, web_link))
    }
}

// ---------------------------------------------------------------------------
// OneDrive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct OneDriveConfig {
    client_id: String,
    client_secret: String,
    tenant_id: String,
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SharingLink {
    link: SharingLinkUrl,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharingLinkUrl {
    web_url: String,
}

/// OneDrive uploader using the client-credentials flow.
#[derive(Debug, Clone)]
pub struct OneDriveUploader {
    credentials_dir: PathBuf,
}

impl OneDriveUploader {
    /// Uploader reading its app registration from `credentials_dir`.
    #[must_use]
    pub fn new(credentials_dir: impl Into<PathBuf>) -> Self {
        Self {
            credentials_dir: credentials_dir.into(),
        }
    }

    fn config(&self) -> Result<OneDriveConfig> {
        let path = self.credentials_dir.join(ONEDRIVE_CONFIG_FILE);
        if !path.is_file() {
            return Err(not_configured(CloudService::OneDrive, ONEDRIVE_CONFIG_FILE));
        }
        let raw = fs::read_to_string(&path).read_context(&path)?;
        serde_json::from_str(&raw).map_err(|e| auth_failed(CloudService::OneDrive, e))
    }

    fn access_token(client: &Client, config: &OneDriveConfig) -> Result<String> {
        const SERVICE: CloudService = CloudService::OneDrive;
        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            config.tenant_id
        );
        let response = send_with_retry(SERVICE, || {
            client.post(&url).form(&[
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("scope", "https://graph.microsoft.com/.default"),
                ("grant_type", "client_credentials"),
            ])
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(auth_failed(SERVICE, format!("{status} - {body}")));
        }
        response
            .json::<AccessTokenResponse>()
            .map(|t| t.access_token)
            .map_err(|e| auth_failed(SERVICE, e))
    }
}

impl CloudUploader for OneDriveUploader {
    fn service(&self) -> CloudService {
        CloudService::OneDrive
    }

    fn upload(&self, path: &Path, remote_name: Option<&str>) -> Result<UploadResult> {
        const SERVICE: CloudService = CloudService::OneDrive;
        require_file(path)?;
        let config = self.config()?;
        let client = http_client()?;
        let token = Self::access_token(&client, &config)?;

        let remote = remote_file_name(path, remote_name);
        let remote = remote.trim_start_matches('/');
        let content = fs::read(path).read_context(path)?;

        let upload_url = format!("{GRAPH_URL}/me/drive/root:/{remote}:/content");
        let response = send_with_retry(SERVICE, || {
            client
                .put(&upload_url)
                .bearer_auth(&token)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(content.clone())
        })?;
        let item: DriveItem = expect_success(SERVICE, response)?
            .json()
            .map_err(|e| upload_failed(SERVICE, e))?;

        let share_url = format!("{GRAPH_URL}/me/drive/items/{}/createLink", item.id);
        let web_link = send_with_retry(SERVICE, || {
            client
                .post(&share_url)
                .bearer_auth(&token)
                .json(&json!({ "type": "view", "scope": "anonymous" }))
        })
        .and_then(|r| expect_success(SERVICE, r))
        .and_then(|r| r.json::<SharingLink>().map_err(|e| upload_failed(SERVICE, e)))
        .map(|shared| shared.link.web_url)
        .map_err(|e| warn!("OneDrive share link not created: {}", e))
        .ok();

        info!("Uploaded to OneDrive: {}", item.name);
        Ok(UploadResult::uploaded(SERVICE, item.id, item.name, web_link))
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Routes uploads to the configured providers.
#[derive(Debug, Clone)]
pub struct CloudUploadManager {
    settings: CloudSettings,
    google: GoogleDriveUploader,
    dropbox: DropboxUploader,
    onedrive: OneDriveUploader,
}

impl CloudUploadManager {
    /// Manager for the given settings.
    #[must_use]
    pub fn new(settings: CloudSettings) -> Self {
        let dir = settings.credentials_directory.clone();
        Self {
            google: GoogleDriveUploader::new(&dir, None),
            dropbox: DropboxUploader::new(&dir),
            onedrive: OneDriveUploader::new(&dir),
            settings,
        }
    }

    /// Directory holding credential files.
    #[must_use]
    pub fn credentials_directory(&self) -> &Path {
        &self.settings.credentials_directory
    }

    /// Providers whose credentials file is present.
    #[must_use]
    pub fn available_services(&self) -> Vec<CloudService> {
        CloudService::ALL
            .into_iter()
            .filter(|service| {
                self.settings
                    .credentials_directory
                    .join(service.credentials_file())
                    .is_file()
            })
            .collect()
    }

    fn uploader(&self, service: CloudService) -> &dyn CloudUploader {
        match service {
            CloudService::GoogleDrive => &self.google,
            CloudService::Dropbox => &self.dropbox,
            CloudService::OneDrive => &self.onedrive,
        }
    }

    /// Upload to one provider, given by identifier.
    #[must_use]
    pub fn upload_to(&self, service: &str, path: &Path, remote_name: Option<&str>) -> UploadResult {
        match service.parse::<CloudService>() {
            Ok(service) => report(service, self.uploader(service).upload(path, remote_name)),
            Err(e) => UploadResult::failed(service, e.to_string()),
        }
    }

    /// Upload to every available provider, keyed by provider id.
    #[must_use]
    pub fn upload_to_all(
        &self,
        path: &Path,
        remote_name: Option<&str>,
    ) -> Vec<(CloudService, UploadResult)> {
        self.available_services()
            .into_iter()
            .map(|service| {
                let result = report(service, self.uploader(service).upload(path, remote_name));
                (service, result)
            })
            .collect()
    }

    /// Default upload: Google Drive, into the folder configured for `format`.
    #[must_use]
    pub fn upload(&self, path: &Path, format: MediaFormat) -> UploadResult {
        let folder = match format {
            MediaFormat::Audio => self.settings.audio_folder_id.as_deref(),
            MediaFormat::Video => self.settings.video_folder_id.as_deref(),
        };
        report(
            CloudService::GoogleDrive,
            self.google.upload_to_folder(path, None, folder),
        )
    }
}

fn report(service: CloudService, result: Result<UploadResult>) -> UploadResult {
    match result {
        Ok(result) => result,
        Err(Error::FileSystem(FileSystemError::NotFound { path })) => {
            warn!("{} upload skipped, file does not exist: {}", service, path.display());
            UploadResult::failed(
                service.display_name(),
                format!("file does not exist: {}", path.display()),
            )
        }
        Err(e) => {
            error!("{} upload failed: {}", service, e);
            UploadResult::failed(service.display_name(), e.to_string())
        }
    }
}
