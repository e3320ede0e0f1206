//! GitHub REST client.
//!
//! Fetches everything a scan needs: open PRs and issues (paginated), PR
//! details, changed files and patches, combined CI status, approving
//! reviews, per-author merged-PR counts and raw repository files.
//!
//! # Rate limits
//!
//! Every response updates the client's [`RateLimitState`] from the
//! `x-ratelimit-*` headers. When the budget is exhausted the next request
//! waits until the reset time (at most [`MAX_RATE_LIMIT_WAIT`]).
//! A 403/429 carrying `retry-after` waits that long and retries. 5xx and
//! network errors retry with exponential backoff.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;

use triage_core::models::{CiStatus, Item, ItemKey, ItemState, RepoId};

use crate::config::GitHubConfig;
use crate::embedding::backoff_delay;

/// Upper bound on a single rate-limit wait.
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);
/// GitHub stops listing PR files after this many pages.
const MAX_FILE_PAGES: u32 = 30;

/// Remaining request budget as last reported by GitHub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    /// Unix seconds at which the budget resets.
    pub reset_at: Option<i64>,
}

impl RateLimitState {
    pub fn update(&mut self, headers: &HeaderMap) {
        if let Some(remaining) = header_u64(headers, "x-ratelimit-remaining") {
            self.remaining = Some(remaining);
        }
        if let Some(reset) = header_u64(headers, "x-ratelimit-reset") {
            self.reset_at = Some(reset as i64);
        }
    }

    /// How long to wait before the next request, if the budget is spent.
    pub fn wait_needed(&self, now: i64) -> Option<Duration> {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset)) if reset > now => {
                Some(Duration::from_secs((reset - now) as u64 + 1).min(MAX_RATE_LIMIT_WAIT))
            }
            _ => None,
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Delay a rate-limited (403/429) response asks for, if any.
pub fn retry_wait(headers: &HeaderMap, now: i64) -> Option<Duration> {
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(Duration::from_secs(secs).min(MAX_RATE_LIMIT_WAIT));
    }
    let mut state = RateLimitState::default();
    state.update(headers);
    state.wait_needed(now)
}

// ============ Wire types ============

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<ApiUser>,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    /// Present when an "issue" is really a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiHead {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiPullDetail {
    #[serde(default)]
    additions: Option<u64>,
    #[serde(default)]
    deletions: Option<u64>,
    #[serde(default)]
    changed_files: Option<u64>,
    head: ApiHead,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrFile {
    pub filename: String,
    #[serde(default)]
    pub patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCombinedStatus {
    state: String,
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct ApiReview {
    #[serde(default)]
    user: Option<ApiUser>,
    state: String,
}

#[derive(Debug, Deserialize)]
struct ApiSearch {
    total_count: u64,
}

/// Diff stats and head commit of a pull request.
#[derive(Debug, Clone, PartialEq)]
pub struct PrDetails {
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
    pub changed_files: Option<u64>,
    pub head_sha: String,
}

fn to_item(raw: ApiIssue, key: ItemKey) -> Item {
    let state = match (raw.state.as_str(), raw.merged_at) {
        (_, Some(_)) => ItemState::Merged,
        ("closed", None) => ItemState::Closed,
        _ => ItemState::Open,
    };
    Item {
        key,
        title: raw.title,
        body: raw.body.unwrap_or_default(),
        author: raw.user.map(|u| u.login).unwrap_or_default(),
        state,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
        labels: raw.labels.into_iter().map(|l| l.name).collect(),
        additions: None,
        deletions: None,
        changed_files: None,
        ci_status: CiStatus::Unknown,
        review_count: 0,
        has_tests: None,
    }
}

/// Whether a PR touches tests, judged by file paths. `None` when there
/// are no files to judge.
pub fn detect_tests(files: &[PrFile]) -> Option<bool> {
    if files.is_empty() {
        return None;
    }
    Some(files.iter().any(|f| is_test_path(&f.filename)))
}

fn is_test_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let file = lower.rsplit('/').next().unwrap_or(&lower);
    let in_test_dir = lower
        .split('/')
        .any(|seg| matches!(seg, "test" | "tests" | "__tests__" | "spec" | "specs" | "testing"));
    in_test_dir
        || file.starts_with("test_")
        || file.contains("_test.")
        || file.contains(".test.")
        || file.contains("_spec.")
        || file.contains(".spec.")
        || file.ends_with("test.java")
        || file.ends_with("tests.cs")
}

/// Concatenate per-file patches into one unified-diff-like text.
pub fn build_diff(files: &[PrFile]) -> String {
    let mut out = String::new();
    for file in files {
        if let Some(patch) = &file.patch {
            out.push_str(&format!("--- a/{0}\n+++ b/{0}\n", file.filename));
            out.push_str(patch);
            if !patch.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

/// Count distinct reviewers whose latest review is an approval.
fn count_approvals(reviews: &[ApiReview]) -> u32 {
    let mut latest: std::collections::HashMap<&str, &str> = std::collections::HashMap::new();
    for review in reviews {
        let Some(user) = &review.user else { continue };
        // Comments don't change a reviewer's verdict.
        if review.state == "COMMENTED" {
            continue;
        }
        latest.insert(user.login.as_str(), review.state.as_str());
    }
    latest.values().filter(|s| **s == "APPROVED").count() as u32
}

fn ci_from_combined(status: &ApiCombinedStatus) -> CiStatus {
    if status.total_count == 0 {
        return CiStatus::Unknown;
    }
    CiStatus::from_db(&status.state)
}

// ============ Client ============

pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    max_retries: u32,
    per_page: u32,
    rate: Mutex<RateLimitState>,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let token = config.token();
        if token.is_none() {
            log::warn!(
                "{} is not set; using unauthenticated GitHub access (60 requests/hour)",
                config.token_env
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            max_retries: config.max_retries,
            per_page: config.per_page,
            rate: Mutex::new(RateLimitState::default()),
        })
    }

    pub fn rate_limit(&self) -> RateLimitState {
        self.rate.lock().map(|s| *s).unwrap_or_default()
    }

    /// GET with rate-limit handling and retries. `Ok(None)` on 404.
    async fn send(&self, path: &str, accept: &str) -> Result<Option<reqwest::Response>> {
        let url = format!("{}{}", self.api_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            let pending_wait = self.rate_limit().wait_needed(Utc::now().timestamp());
            if let Some(wait) = pending_wait {
                log::warn!("GitHub rate limit exhausted, waiting {}s", wait.as_secs());
                tokio::time::sleep(wait).await;
            }

            let mut request = self
                .client
                .get(&url)
                .header(USER_AGENT, concat!("pr-triage/", env!("CARGO_PKG_VERSION")))
                .header(ACCEPT, accept)
                .header("X-GitHub-Api-Version", "2022-11-28");
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if let Ok(mut rate) = self.rate.lock() {
                        rate.update(response.headers());
                    }

                    if status.is_success() {
                        return Ok(Some(response));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }

                    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                        if let Some(wait) = retry_wait(response.headers(), Utc::now().timestamp()) {
                            log::warn!(
                                "GitHub rate limited on {}, retrying in {}s",
                                path,
                                wait.as_secs()
                            );
                            tokio::time::sleep(wait).await;
                            last_err = Some(anyhow::anyhow!("GitHub API rate limited: {}", status));
                            continue;
                        }
                    }

                    if status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("GitHub API error {}: {}", status, body_text));
                    } else {
                        let body_text = response.text().await.unwrap_or_default();
                        bail!("GitHub API error {} for {}: {}", status, path, body_text);
                    }
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!("GitHub connection error: {}", e));
                }
            }

            if attempt < self.max_retries {
                let delay = backoff_delay(attempt + 1);
                log::warn!("GitHub request {} failed, retrying in {}s", path, delay.as_secs());
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("GitHub request failed after retries")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.send(path, "application/vnd.github+json").await? {
            Some(response) => Ok(Some(
                response
                    .json()
                    .await
                    .with_context(|| format!("Invalid GitHub response for {}", path))?,
            )),
            None => Ok(None),
        }
    }

    /// Page through `path` until a short page or `limit` results.
    async fn paginate<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        limit: Option<usize>,
        max_pages: Option<u32>,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let sep = if path.contains('?') { '&' } else { '?' };
        let mut page = 1u32;
        loop {
            let page_path = format!("{}{}per_page={}&page={}", path, sep, self.per_page, page);
            let batch: Vec<T> = self
                .get_json(&page_path)
                .await?
                .with_context(|| format!("GitHub returned 404 for {}", path))?;
            let short = batch.len() < self.per_page as usize;
            out.extend(batch);
            if short
                || limit.is_some_and(|l| out.len() >= l)
                || max_pages.is_some_and(|m| page >= m)
            {
                break;
            }
            page += 1;
        }
        if let Some(l) = limit {
            out.truncate(l);
        }
        Ok(out)
    }
}

/// Where open items and their PR details come from. [`GitHubClient`] is
/// the real implementation; tests substitute a canned source.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Open pull requests, most recently updated first.
    async fn list_open_prs(&self, repo: &RepoId, limit: Option<usize>) -> Result<Vec<Item>>;
    /// Open issues, pull requests excluded.
    async fn list_open_issues(&self, repo: &RepoId, limit: Option<usize>) -> Result<Vec<Item>>;
    async fn pr_details(&self, repo: &RepoId, number: u64) -> Result<PrDetails>;
    async fn pr_files(&self, repo: &RepoId, number: u64) -> Result<Vec<PrFile>>;
    async fn ci_status(&self, repo: &RepoId, sha: &str) -> Result<CiStatus>;
    async fn approval_count(&self, repo: &RepoId, number: u64) -> Result<u32>;
    /// Merged PRs by `author` in `repo`.
    async fn merged_pr_count(&self, repo: &RepoId, author: &str) -> Result<u32>;
    /// Raw contents of a file on the default branch, `None` if absent.
    async fn fetch_file(&self, repo: &RepoId, path: &str) -> Result<Option<String>>;
}

#[async_trait]
impl ItemSource for GitHubClient {
    async fn list_open_prs(&self, repo: &RepoId, limit: Option<usize>) -> Result<Vec<Item>> {
        let raw: Vec<ApiIssue> = self
            .paginate(
                &format!("/repos/{}/pulls?state=open&sort=updated&direction=desc", repo.slug()),
                limit,
                None,
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|r| {
                let key = ItemKey::pr(repo.slug(), r.number);
                to_item(r, key)
            })
            .collect())
    }

    async fn list_open_issues(&self, repo: &RepoId, limit: Option<usize>) -> Result<Vec<Item>> {
        let raw: Vec<ApiIssue> = self
            .paginate(
                &format!("/repos/{}/issues?state=open&sort=updated&direction=desc", repo.slug()),
                limit,
                None,
            )
            .await?;
        Ok(raw
            .into_iter()
            .filter(|r| r.pull_request.is_none())
            .map(|r| {
                let key = ItemKey::issue(repo.slug(), r.number);
                to_item(r, key)
            })
            .collect())
    }

    async fn pr_details(&self, repo: &RepoId, number: u64) -> Result<PrDetails> {
        let raw: ApiPullDetail = self
            .get_json(&format!("/repos/{}/pulls/{}", repo.slug(), number))
            .await?
            .with_context(|| format!("PR #{} not found in {}", number, repo))?;
        Ok(PrDetails {
            additions: raw.additions,
            deletions: raw.deletions,
            changed_files: raw.changed_files,
            head_sha: raw.head.sha,
        })
    }

    async fn pr_files(&self, repo: &RepoId, number: u64) -> Result<Vec<PrFile>> {
        self.paginate(
            &format!("/repos/{}/pulls/{}/files", repo.slug(), number),
            None,
            Some(MAX_FILE_PAGES),
        )
        .await
    }

    async fn ci_status(&self, repo: &RepoId, sha: &str) -> Result<CiStatus> {
        let status: Option<ApiCombinedStatus> = self
            .get_json(&format!("/repos/{}/commits/{}/status", repo.slug(), sha))
            .await?;
        Ok(status.as_ref().map(ci_from_combined).unwrap_or_default())
    }

    async fn approval_count(&self, repo: &RepoId, number: u64) -> Result<u32> {
        let reviews: Vec<ApiReview> = self
            .paginate(
                &format!("/repos/{}/pulls/{}/reviews", repo.slug(), number),
                None,
                None,
            )
            .await?;
        Ok(count_approvals(&reviews))
    }

    async fn merged_pr_count(&self, repo: &RepoId, author: &str) -> Result<u32> {
        let query = format!("repo:{} type:pr is:merged author:{}", repo.slug(), author);
        let result: ApiSearch = self
            .get_json(&format!(
                "/search/issues?q={}&per_page=1",
                encode_query(&query)
            ))
            .await?
            .context("search API unavailable")?;
        Ok(result.total_count.min(u32::MAX as u64) as u32)
    }

    async fn fetch_file(&self, repo: &RepoId, path: &str) -> Result<Option<String>> {
        match self
            .send(
                &format!("/repos/{}/contents/{}", repo.slug(), path),
                "application/vnd.github.raw",
            )
            .await?
        {
            Some(response) => Ok(Some(response.text().await?)),
            None => Ok(None),
        }
    }
}

/// Percent-encode a search query for the `q` parameter.
fn encode_query(q: &str) -> String {
    let mut out = String::with_capacity(q.len());
    for b in q.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
