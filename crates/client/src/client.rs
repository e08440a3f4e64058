//! Typed REST surface over the authenticated-request pipeline.

use std::sync::Arc;
use std::time::Duration;

use lusolve_protocol::{
    ChangePasswordRequest, LoginRequest, MonitoringMetrics, ProfileUpdate, ProgressPoint,
    RefreshRequest, RefreshResponse, RegisterRequest, TaskLogEntry, TaskSnapshot, TaskSummary,
    TokenPair, UserProfile,
};
use reqwest::header::CONTENT_DISPOSITION;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::auth::{AuthPipeline, RefreshTransport, SessionPhase};
use crate::error::{ApiError, classify_http_error};
use crate::store::CredentialStore;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl ApiClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Input for a task submission. Exactly one matrix source; the enum makes
/// providing both or neither unrepresentable.
#[derive(Debug, Clone)]
pub enum TaskInput {
    MatrixText(String),
    SourceFile { filename: String, contents: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub max_n: u32,
    pub save_matrices: bool,
    pub input: TaskInput,
}

/// A downloaded result file.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Refresh exchange over HTTP. Deliberately bypasses the pipeline: the
/// refresh call itself must never trigger another refresh.
struct HttpRefresher {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RefreshTransport for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let url = format!("{}{}", self.base_url, ApiClient::refresh_path());
        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&RefreshRequest {
                refresh: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(|error| ApiError::Request {
                message: error.to_string(),
            })?;
        decode_json_response(response).await
    }
}

/// Client for the task service REST API.
///
/// Every call is routed through the credential pipeline: a valid access
/// token is attached as-is, an expired one is refreshed first, and refresh
/// failure ends the session before the call is ever issued.
pub struct ApiClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
    auth: AuthPipeline<HttpRefresher>,
}

impl ApiClient {
    pub fn new(
        config: ApiClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let timeout = Duration::from_millis(config.timeout_ms.max(250));
        let http = reqwest::Client::new();
        let transport = HttpRefresher {
            http: http.clone(),
            base_url: base_url.clone(),
            timeout,
        };
        Ok(Self {
            base_url,
            timeout,
            http,
            auth: AuthPipeline::new(store, transport),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Observe the session phase; flips to `Ended` on logout or refresh
    /// failure.
    pub fn subscribe_session(&self) -> watch::Receiver<SessionPhase> {
        self.auth.subscribe_session()
    }

    #[must_use]
    pub fn session_phase(&self) -> SessionPhase {
        self.auth.session_phase()
    }

    // --- paths ---

    #[must_use]
    pub fn login_path() -> &'static str {
        "/users/login/"
    }

    #[must_use]
    pub fn refresh_path() -> &'static str {
        "/users/login/refresh/"
    }

    #[must_use]
    pub fn register_path() -> &'static str {
        "/users/register/"
    }

    #[must_use]
    pub fn profile_path() -> &'static str {
        "/users/profile/"
    }

    #[must_use]
    pub fn change_password_path() -> &'static str {
        "/users/change-password/"
    }

    #[must_use]
    pub fn tasks_path() -> &'static str {
        "/tasks/"
    }

    #[must_use]
    pub fn task_path(id: u64) -> String {
        format!("/tasks/{id}/")
    }

    #[must_use]
    pub fn task_cancel_path(id: u64) -> String {
        format!("/tasks/{id}/cancel/")
    }

    #[must_use]
    pub fn task_download_path(id: u64) -> String {
        format!("/tasks/{id}/download/")
    }

    #[must_use]
    pub fn task_progress_path(id: u64) -> String {
        format!("/tasks/{id}/progress/")
    }

    #[must_use]
    pub fn task_logs_path(id: u64) -> String {
        format!("/tasks/{id}/logs/")
    }

    #[must_use]
    pub fn metrics_path() -> &'static str {
        "/monitoring/metrics/"
    }

    #[must_use]
    pub fn all_tasks_path() -> &'static str {
        "/monitoring/all-tasks/"
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    // --- auth operations ---

    /// Exchange username/password for a credential pair and activate the
    /// session.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ApiError> {
        let pair: TokenPair = self
            .post_json_unauthenticated(
                Self::login_path(),
                &LoginRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                },
            )
            .await?;
        self.auth.install(&pair)?;
        debug!("logged in as {username}");
        Ok(pair)
    }

    /// Create the account, then log straight in with the same credentials.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        password2: &str,
    ) -> Result<TokenPair, ApiError> {
        let _created: serde_json::Value = self
            .post_json_unauthenticated(
                Self::register_path(),
                &RegisterRequest {
                    username: username.to_string(),
                    email: email.to_string(),
                    password: password.to_string(),
                    password2: password2.to_string(),
                },
            )
            .await?;
        self.login(username, password).await
    }

    /// Local logout: empty the credential slot and end the session.
    pub fn logout(&self) -> Result<(), ApiError> {
        self.auth.sign_out()
    }

    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        self.get_json(Self::profile_path()).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ApiError> {
        self.patch_json(Self::profile_path(), update).await
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        let _response: serde_json::Value = self
            .put_json(
                Self::change_password_path(),
                &ChangePasswordRequest {
                    old_password: old_password.to_string(),
                    new_password: new_password.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    // --- task operations ---

    pub async fn list_tasks(&self) -> Result<Vec<TaskSummary>, ApiError> {
        self.get_json(Self::tasks_path()).await
    }

    pub async fn task(&self, id: u64) -> Result<TaskSnapshot, ApiError> {
        self.get_json(Self::task_path(id).as_str()).await
    }

    /// Submit a solve task as a multipart form.
    ///
    /// A `queued` snapshot in the response is a success carrying queue
    /// metadata, not an error.
    pub async fn submit_task(&self, task: &NewTask) -> Result<TaskSnapshot, ApiError> {
        let mut form = reqwest::multipart::Form::new()
            .text("name", task.name.clone())
            .text("max_n", task.max_n.to_string())
            .text(
                "save_matrices",
                if task.save_matrices { "true" } else { "false" },
            );

        form = match &task.input {
            TaskInput::MatrixText(text) => {
                if text.trim().is_empty() {
                    return Err(ApiError::InvalidInput(
                        "matrix text must not be empty".to_string(),
                    ));
                }
                form.text("matrix_text", text.clone())
            }
            TaskInput::SourceFile { filename, contents } => {
                if contents.is_empty() {
                    return Err(ApiError::InvalidInput(
                        "source file must not be empty".to_string(),
                    ));
                }
                form.part(
                    "source_file",
                    reqwest::multipart::Part::bytes(contents.clone()).file_name(filename.clone()),
                )
            }
        };

        let url = self
            .endpoint(Self::tasks_path())
            .ok_or(ApiError::InvalidPath)?;
        let mut request = self.http.post(url).timeout(self.timeout).multipart(form);
        if let Some(token) = self.auth.bearer_for_request().await? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|error| ApiError::Request {
            message: error.to_string(),
        })?;
        decode_json_response(response).await
    }

    pub async fn cancel_task(&self, id: u64) -> Result<String, ApiError> {
        #[derive(serde::Deserialize)]
        struct CancelResponse {
            #[serde(default)]
            message: Option<String>,
        }

        let response: CancelResponse = self
            .post_json(Self::task_cancel_path(id).as_str(), &serde_json::json!({}))
            .await?;
        Ok(response
            .message
            .unwrap_or_else(|| "cancellation requested".to_string()))
    }

    /// Fetch the result file. The filename comes from `Content-Disposition`
    /// when the server provides one.
    pub async fn download_result(&self, id: u64) -> Result<DownloadedFile, ApiError> {
        let response = self
            .send_get(Self::task_download_path(id).as_str())
            .await?;
        let status = response.status();

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(content_disposition_filename)
            .unwrap_or_else(|| format!("result_task_{id}.txt"));

        let bytes = response.bytes().await.map_err(|error| ApiError::Read {
            message: error.to_string(),
        })?;

        if !status.is_success() {
            return Err(classify_http_error(status, &bytes));
        }

        Ok(DownloadedFile {
            filename,
            bytes: bytes.to_vec(),
        })
    }

    /// Polling fallback for environments where the live channel is blocked.
    pub async fn task_progress(&self, id: u64) -> Result<Vec<ProgressPoint>, ApiError> {
        self.get_json(Self::task_progress_path(id).as_str()).await
    }

    pub async fn task_logs(&self, id: u64) -> Result<Vec<TaskLogEntry>, ApiError> {
        self.get_json(Self::task_logs_path(id).as_str()).await
    }

    // --- staff operations ---

    pub async fn monitoring_metrics(&self) -> Result<MonitoringMetrics, ApiError> {
        self.get_json(Self::metrics_path()).await
    }

    pub async fn all_tasks(&self) -> Result<Vec<TaskSummary>, ApiError> {
        self.get_json(Self::all_tasks_path()).await
    }

    // --- transport helpers ---

    async fn get_json<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.send_get(path).await?;
        decode_json_response(response).await
    }

    async fn send_get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let url = self.endpoint(path).ok_or(ApiError::InvalidPath)?;
        let mut request = self.http.get(url).timeout(self.timeout);
        if let Some(token) = self.auth.bearer_for_request().await? {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(|error| ApiError::Request {
            message: error.to_string(),
        })
    }

    async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(ApiError::InvalidPath)?;
        let mut request = self.http.post(url).timeout(self.timeout).json(payload);
        if let Some(token) = self.auth.bearer_for_request().await? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|error| ApiError::Request {
            message: error.to_string(),
        })?;
        decode_json_response(response).await
    }

    async fn patch_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(ApiError::InvalidPath)?;
        let mut request = self.http.patch(url).timeout(self.timeout).json(payload);
        if let Some(token) = self.auth.bearer_for_request().await? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|error| ApiError::Request {
            message: error.to_string(),
        })?;
        decode_json_response(response).await
    }

    async fn put_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(ApiError::InvalidPath)?;
        let mut request = self.http.put(url).timeout(self.timeout).json(payload);
        if let Some(token) = self.auth.bearer_for_request().await? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|error| ApiError::Request {
            message: error.to_string(),
        })?;
        decode_json_response(response).await
    }

    async fn post_json_unauthenticated<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(ApiError::InvalidPath)?;
        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|error| ApiError::Request {
                message: error.to_string(),
            })?;
        decode_json_response(response).await
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, ApiError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ApiError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| ApiError::Read {
        message: error.to_string(),
    })?;

    if !status.is_success() {
        return Err(classify_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ApiError::Decode {
        message: error.to_string(),
    })
}

/// Pull a filename out of a `Content-Disposition` header value.
fn content_disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|value| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
