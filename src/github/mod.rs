pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::enrich::types::RepoId;
use types::{Issue, IssueComment, PullFile, RepoCommit, Repository};

const PER_PAGE: u32 = 100;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Classified failure from the hosting API.
///
/// Absence of data is a value (`NotFound`), never a panic path. `RateLimited`
/// and `Transient` are retried inside the client; the rest propagate.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,

    #[error("rate limited by the GitHub API")]
    RateLimited { retry_after: Option<Duration> },

    #[error("unauthorized: check the GitHub token")]
    Unauthorized,

    #[error("transient GitHub API failure: {0}")]
    Transient(String),

    #[error("unexpected GitHub API payload: {0}")]
    Malformed(String),
}

impl ApiError {
    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Transient(_))
    }
}

/// The seam between the orchestrator and the hosting service: one method
/// per API primitive. Implemented by [`GithubClient`] for production and by
/// in-memory fakes in tests.
#[async_trait]
pub trait IssueHost: Send + Sync {
    /// Combined issue/pull-request lookup; the payload's `pull_request`
    /// member distinguishes the two kinds.
    async fn fetch_issue(&self, repo: &RepoId, number: u64) -> Result<Issue, ApiError>;

    /// All comments on an issue, oldest first.
    async fn fetch_comments(&self, repo: &RepoId, number: u64)
        -> Result<Vec<IssueComment>, ApiError>;

    /// Files changed by a pull request.
    async fn fetch_pull_files(&self, repo: &RepoId, number: u64)
        -> Result<Vec<PullFile>, ApiError>;

    /// Raw content of a file at an optional ref.
    async fn fetch_file_content(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<String, ApiError>;

    /// Commits touching `path` with author date >= `since`, newest first.
    async fn fetch_commits_for_path(
        &self,
        repo: &RepoId,
        path: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RepoCommit>, ApiError>;

    /// Repository metadata snapshot.
    async fn fetch_repository(&self, repo: &RepoId) -> Result<Repository, ApiError>;
}

/// Typed GitHub REST client with bounded retries.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    max_attempts: usize,
    base_delay_ms: u64,
}

impl GithubClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("issuesense"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        if let Some(token) = config.github_token() {
            let auth = format!("Bearer {}", token.trim());
            let value = reqwest::header::HeaderValue::from_str(&auth)
                .map_err(|_| ApiError::Unauthorized)?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Transient(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.github.api_base_url.trim_end_matches('/').to_string(),
            max_attempts: config.retry.max_attempts.max(1),
            base_delay_ms: config.retry.base_delay_ms.max(1),
        })
    }

    fn repo_url(&self, repo: &RepoId, tail: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_base, repo.owner, repo.name, tail)
    }

    /// Issue one GET, retrying `RateLimited`/`Transient` with exponential
    /// backoff, and decode the JSON body.
    async fn request_json<T, F>(&self, operation: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(operation, &build).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Malformed(format!("failed to decode {operation}: {e}")))
    }

    /// Same retry discipline, raw text body.
    async fn request_text<F>(&self, operation: &str, build: F) -> Result<String, ApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(operation, &build).await?;
        response
            .text()
            .await
            .map_err(|e| ApiError::Malformed(format!("failed to read {operation} body: {e}")))
    }

    async fn send_with_retry<F>(
        &self,
        operation: &str,
        build: &F,
    ) -> Result<reqwest::Response, ApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt += 1;
            let result = build().send().await;
            let error = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => classify_status(&response),
                Err(e) => classify_transport(&e),
            };

            if attempt < self.max_attempts && error.is_retryable() {
                let retry_after = match &error {
                    ApiError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                let delay = retry_delay(self.base_delay_ms, attempt, retry_after);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying GitHub call"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            debug!(operation, attempt, error = %error, "GitHub call failed");
            return Err(error);
        }
    }

    /// Fetch successive pages of 100 until a short page.
    async fn list_paged<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let mut page = 1_u32;
        let mut rows: Vec<T> = Vec::new();
        loop {
            let chunk: Vec<T> = self
                .request_json(operation, || {
                    self.http
                        .get(url)
                        .query(query)
                        .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())])
                })
                .await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PER_PAGE as usize {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }
}

#[async_trait]
impl IssueHost for GithubClient {
    #[instrument(skip(self), fields(repo = %repo, number))]
    async fn fetch_issue(&self, repo: &RepoId, number: u64) -> Result<Issue, ApiError> {
        let url = self.repo_url(repo, &format!("/issues/{number}"));
        self.request_json("fetch issue", || self.http.get(&url)).await
    }

    #[instrument(skip(self), fields(repo = %repo, number))]
    async fn fetch_comments(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<Vec<IssueComment>, ApiError> {
        let url = self.repo_url(repo, &format!("/issues/{number}/comments"));
        let query = [
            ("sort", "created".to_string()),
            ("direction", "asc".to_string()),
        ];
        self.list_paged("fetch comments", &url, &query).await
    }

    #[instrument(skip(self), fields(repo = %repo, number))]
    async fn fetch_pull_files(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<Vec<PullFile>, ApiError> {
        let url = self.repo_url(repo, &format!("/pulls/{number}/files"));
        self.list_paged("fetch pull files", &url, &[]).await
    }

    #[instrument(skip(self), fields(repo = %repo, path))]
    async fn fetch_file_content(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<String, ApiError> {
        let url = self.repo_url(repo, &format!("/contents/{path}"));
        self.request_text("fetch file content", || {
            let mut request = self
                .http
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/vnd.github.raw+json");
            if let Some(r) = git_ref {
                request = request.query(&[("ref", r)]);
            }
            request
        })
        .await
    }

    #[instrument(skip(self), fields(repo = %repo, path, since = %since))]
    async fn fetch_commits_for_path(
        &self,
        repo: &RepoId,
        path: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RepoCommit>, ApiError> {
        let url = self.repo_url(repo, "/commits");
        let query = [
            ("path", path.to_string()),
            ("since", since.to_rfc3339()),
        ];
        self.list_paged("fetch commits", &url, &query).await
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn fetch_repository(&self, repo: &RepoId) -> Result<Repository, ApiError> {
        let url = self.repo_url(repo, "");
        self.request_json("fetch repository", || self.http.get(&url)).await
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn classify_status(response: &reqwest::Response) -> ApiError {
    let status = response.status();
    match status.as_u16() {
        404 | 410 => ApiError::NotFound,
        401 => ApiError::Unauthorized,
        403 | 429 => {
            let retry_after = parse_retry_after(response.headers());
            // A 403 without rate-limit signals is a permissions problem.
            if status.as_u16() == 403 && retry_after.is_none() && !rate_limit_exhausted(response.headers()) {
                ApiError::Unauthorized
            } else {
                ApiError::RateLimited { retry_after }
            }
        }
        code if code >= 500 => ApiError::Transient(format!("server returned {code}")),
        code => ApiError::Malformed(format!("unexpected status {code}")),
    }
}

fn classify_transport(error: &reqwest::Error) -> ApiError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ApiError::Transient(error.to_string())
    } else {
        ApiError::Malformed(error.to_string())
    }
}

fn rate_limit_exhausted(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        == Some(0)
}

/// Retry-After in seconds, or the delta to X-RateLimit-Reset (epoch seconds).
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    if let Some(seconds) = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(seconds));
    }
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())?;
    let delta = reset - Utc::now().timestamp();
    (delta > 0).then(|| Duration::from_secs(delta as u64))
}

/// Exponential backoff with a cap and a small clock-derived jitter.
/// A server-supplied retry-after wins when it is longer.
fn retry_delay(base_ms: u64, attempt: usize, retry_after: Option<Duration>) -> Duration {
    let shift = attempt.saturating_sub(1).min(5) as u32;
    let exp = base_ms.saturating_mul(1_u64 << shift).min(MAX_BACKOFF_MS);
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_millis()) % (exp / 4 + 1))
        .unwrap_or(0);
    let computed = Duration::from_millis(exp + jitter);
    match retry_after {
        Some(server) if server > computed => server,
        _ => computed,
    }
}
