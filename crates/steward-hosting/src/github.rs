//! GitHub REST/GraphQL implementation of [`HostingApi`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use tokio::sync::OnceCell;

use steward_core::{
    CiState, CiStatus, ExistingComment, FileChange, IssuePayload, PrSnapshot, PrState, RepoRef,
    TaskIssue,
};

use crate::api::{CreatedIssue, HostingApi};
use crate::error::{HostingError, HostingResult};

/// Public GitHub API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PAGE_SIZE: usize = 100;
const MAX_PAGES: u32 = 50;
const MAX_ERROR_BODY: usize = 512;

/// Login of the default Actions token, which cannot call `GET /user`.
pub const ACTIONS_BOT_LOGIN: &str = "github-actions[bot]";

/// Connection settings for [`GitHubClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST root, e.g. `https://api.github.com` or `https://ghe.example/api/v3`.
    pub api_url: String,
    #[serde(skip_serializing)]
    pub token: String,
    /// Per-request timeout (milliseconds).
    pub timeout_ms: u64,
    /// Login the token posts as. Looked up with `GET /user` when unset.
    #[serde(default)]
    pub bot_login: Option<String>,
}

impl GitHubConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            timeout_ms: 30_000,
            bot_login: None,
        }
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_bot_login(mut self, login: Option<String>) -> Self {
        self.bot_login = login.filter(|l| !l.trim().is_empty());
        self
    }
}

/// REST client for one GitHub instance.
pub struct GitHubClient {
    config: GitHubConfig,
    http: reqwest::Client,
    login: OnceCell<String>,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhTeam {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct GhReview {
    #[serde(default)]
    user: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct GhHead {
    #[serde(default)]
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhPull {
    number: u64,
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<GhUser>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    head: GhHead,
    #[serde(default)]
    requested_reviewers: Vec<GhUser>,
    #[serde(default)]
    requested_teams: Vec<GhTeam>,
    #[serde(default)]
    auto_merge: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GhNumber {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct GhFile {
    filename: String,
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
}

#[derive(Debug, Deserialize)]
struct GhCombinedStatus {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

const ENABLE_AUTO_MERGE: &str = "mutation($id: ID!) { enablePullRequestAutoMerge(input: {pullRequestId: $id}) { clientMutationId } }";

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> HostingResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("pr-steward/{}", steward_core::VERSION))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            config,
            http,
            login: OnceCell::new(),
        })
    }

    /// Login the steward's comments are authored by, resolved once.
    pub async fn steward_login(&self) -> &str {
        self.login
            .get_or_init(|| async {
                if let Some(login) = &self.config.bot_login {
                    return login.clone();
                }
                let url = match self.url(&["user"]) {
                    Ok(url) => url,
                    Err(_) => return ACTIONS_BOT_LOGIN.to_string(),
                };
                match self.get_json::<GhUser>(url).await {
                    Ok(user) => user.login,
                    Err(e) => {
                        debug!(error = %e, "token has no user; assuming the Actions bot");
                        ACTIONS_BOT_LOGIN.to_string()
                    }
                }
            })
            .await
    }

    fn url(&self, segments: &[&str]) -> HostingResult<Url> {
        let mut url = Url::parse(&self.config.api_url)
            .map_err(|e| HostingError::Decode(format!("invalid API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| HostingError::Decode("API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_url(&self, repo: &RepoRef, rest: &[&str]) -> HostingResult<Url> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn graphql_url(&self) -> HostingResult<Url> {
        match self.config.api_url.strip_suffix("/api/v3") {
            Some(host) => Url::parse(&format!("{host}/api/graphql"))
                .map_err(|e| HostingError::Decode(format!("invalid GraphQL URL: {e}"))),
            None => self.url(&["graphql"]),
        }
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(&self, req: RequestBuilder) -> HostingResult<Response> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let url = resp.url().to_string();
        let headers = resp.headers().clone();
        let mut body = resp.text().await.unwrap_or_default();
        if is_rate_limited(status, &headers) {
            let retry_after_secs = header_u64(&headers, RETRY_AFTER.as_str());
            warn!(url = %url, ?retry_after_secs, "rate limited");
            return Err(HostingError::RateLimited { retry_after_secs });
        }
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(HostingError::Status {
            status: status.as_u16(),
            url,
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> HostingResult<T> {
        debug!(url = %url, "GET");
        let resp = self.send(self.request(Method::GET, url)).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn get_paged<T: DeserializeOwned>(
        &self,
        base: Url,
        query: &[(&str, &str)],
    ) -> HostingResult<Vec<T>> {
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            let mut url = base.clone();
            url.query_pairs_mut()
                .extend_pairs(query)
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());
            let chunk: Vec<T> = self.get_json(url).await?;
            let len = chunk.len();
            out.extend(chunk);
            if len < PAGE_SIZE {
                break;
            }
        }
        Ok(out)
    }

    async fn send_json(&self, method: Method, url: Url, body: &Value) -> HostingResult<Response> {
        debug!(url = %url, %method, "mutation");
        self.send(self.request(method, url).json(body)).await
    }

    async fn fetch_pull(&self, repo: &RepoRef, pr: u64) -> HostingResult<GhPull> {
        let pr = pr.to_string();
        self.get_json(self.repo_url(repo, &["pulls", &pr])?).await
    }

    async fn fetch_ci_state(&self, repo: &RepoRef, sha: &str) -> CiState {
        if sha.is_empty() {
            return CiState::None;
        }
        let url = match self.repo_url(repo, &["commits", sha, "status"]) {
            Ok(url) => url,
            Err(_) => return CiState::None,
        };
        match self.get_json::<GhCombinedStatus>(url).await {
            Ok(status) => CiState::from_platform(&status.state),
            Err(e) => {
                warn!(repo = %repo, sha = %sha, error = %e, "combined status unavailable");
                CiState::None
            }
        }
    }
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && header_u64(headers, "x-ratelimit-remaining") == Some(0))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn state_from_wire(
    pull: GhPull,
    comments: Vec<GhComment>,
    reviews: Vec<GhReview>,
    steward_login: String,
) -> PrState {
    let mut reviewed_by: Vec<String> = Vec::new();
    for login in reviews.into_iter().filter_map(|r| r.user).map(|u| u.login) {
        if !reviewed_by.contains(&login) {
            reviewed_by.push(login);
        }
    }
    PrState {
        labels: pull.labels.into_iter().map(|l| l.name).collect(),
        requested_reviewers: pull
            .requested_reviewers
            .into_iter()
            .map(|u| u.login)
            .collect(),
        requested_teams: pull.requested_teams.into_iter().map(|t| t.slug).collect(),
        reviewed_by,
        comments: comments
            .into_iter()
            .map(|c| ExistingComment {
                id: c.id,
                body: c.body.unwrap_or_default(),
                author: c.user.map(|u| u.login),
            })
            .collect(),
        author: pull.user.map(|u| u.login),
        steward_login: Some(steward_login),
        auto_merge_enabled: pull.auto_merge.is_some_and(|v| !v.is_null()),
    }
}

fn mutation_error(pr: u64, action: &str, err: HostingError) -> HostingError {
    if err.is_retryable() {
        err
    } else {
        HostingError::Mutation {
            pr,
            action: action.to_string(),
            detail: err.to_string(),
        }
    }
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn list_open_pull_requests(&self, repo: &RepoRef) -> HostingResult<Vec<u64>> {
        let pulls: Vec<GhNumber> = self
            .get_paged(self.repo_url(repo, &["pulls"])?, &[("state", "open")])
            .await?;
        let mut numbers: Vec<u64> = pulls.into_iter().map(|p| p.number).collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    async fn fetch_snapshot(&self, repo: &RepoRef, pr: u64) -> HostingResult<PrSnapshot> {
        let pull = self.fetch_pull(repo, pr).await?;
        let pr_str = pr.to_string();
        let files: Vec<GhFile> = self
            .get_paged(self.repo_url(repo, &["pulls", &pr_str, "files"])?, &[])
            .await?;
        let ci_state = self.fetch_ci_state(repo, &pull.head.sha).await;

        Ok(PrSnapshot {
            id: pull.number,
            title: pull.title,
            url: pull.html_url,
            body: pull.body.filter(|b| !b.trim().is_empty()),
            author: pull.user.map(|u| u.login),
            labels: pull.labels.into_iter().map(|l| l.name).collect(),
            draft: pull.draft,
            created_at: pull.created_at,
            changed_files: files
                .into_iter()
                .map(|f| FileChange::new(f.filename, f.additions, f.deletions))
                .collect(),
            ci: CiStatus::from_state(ci_state),
        })
    }

    async fn fetch_state(&self, repo: &RepoRef, pr: u64) -> HostingResult<PrState> {
        let pull = self.fetch_pull(repo, pr).await?;
        let pr_str = pr.to_string();
        let comments: Vec<GhComment> = self
            .get_paged(self.repo_url(repo, &["issues", &pr_str, "comments"])?, &[])
            .await?;
        let reviews: Vec<GhReview> = self
            .get_paged(self.repo_url(repo, &["pulls", &pr_str, "reviews"])?, &[])
            .await?;
        let steward_login = self.steward_login().await.to_string();
        Ok(state_from_wire(pull, comments, reviews, steward_login))
    }

    async fn add_labels(&self, repo: &RepoRef, pr: u64, labels: &[String]) -> HostingResult<()> {
        let pr_str = pr.to_string();
        let url = self.repo_url(repo, &["issues", &pr_str, "labels"])?;
        self.send_json(Method::POST, url, &json!({ "labels": labels }))
            .await
            .map_err(|e| mutation_error(pr, "add_labels", e))?;
        Ok(())
    }

    async fn remove_label(&self, repo: &RepoRef, pr: u64, label: &str) -> HostingResult<()> {
        let pr_str = pr.to_string();
        let url = self.repo_url(repo, &["issues", &pr_str, "labels", label])?;
        match self.send(self.request(Method::DELETE, url)).await {
            Ok(_) => Ok(()),
            Err(HostingError::Status { status: 404, .. }) => Ok(()),
            Err(e) => Err(mutation_error(pr, "remove_label", e)),
        }
    }

    async fn create_comment(&self, repo: &RepoRef, pr: u64, body: &str) -> HostingResult<u64> {
        let pr_str = pr.to_string();
        let url = self.repo_url(repo, &["issues", &pr_str, "comments"])?;
        let resp = self
            .send_json(Method::POST, url, &json!({ "body": body }))
            .await
            .map_err(|e| mutation_error(pr, "create_comment", e))?;
        let comment: GhComment = resp.json().await?;
        Ok(comment.id)
    }

    async fn update_comment(
        &self,
        repo: &RepoRef,
        comment_id: u64,
        body: &str,
    ) -> HostingResult<()> {
        let id = comment_id.to_string();
        let url = self.repo_url(repo, &["issues", "comments", &id])?;
        self.send_json(Method::PATCH, url, &json!({ "body": body }))
            .await?;
        Ok(())
    }

    async fn request_reviewers(
        &self,
        repo: &RepoRef,
        pr: u64,
        reviewers: &[String],
    ) -> HostingResult<()> {
        // `org/team` handles are team reviewers.
        let (teams, users): (Vec<&String>, Vec<&String>) =
            reviewers.iter().partition(|r| r.contains('/'));
        let team_slugs: Vec<&str> = teams
            .iter()
            .filter_map(|t| t.rsplit_once('/').map(|(_, slug)| slug))
            .collect();
        let pr_str = pr.to_string();
        let url = self.repo_url(repo, &["pulls", &pr_str, "requested_reviewers"])?;
        self.send_json(
            Method::POST,
            url,
            &json!({ "reviewers": users, "team_reviewers": team_slugs }),
        )
        .await
        .map_err(|e| mutation_error(pr, "request_reviewers", e))?;
        Ok(())
    }

    async fn enable_auto_merge(&self, repo: &RepoRef, pr: u64) -> HostingResult<()> {
        let pull = self.fetch_pull(repo, pr).await?;
        if pull.node_id.is_empty() {
            return Err(HostingError::Mutation {
                pr,
                action: "enable_auto_merge".to_string(),
                detail: "pull request has no node id".to_string(),
            });
        }
        let body = json!({
            "query": ENABLE_AUTO_MERGE,
            "variables": { "id": pull.node_id },
        });
        let resp = self
            .send_json(Method::POST, self.graphql_url()?, &body)
            .await
            .map_err(|e| mutation_error(pr, "enable_auto_merge", e))?;
        let parsed: GraphQlResponse = resp.json().await?;
        if !parsed.errors.is_empty() {
            let detail = parsed
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(HostingError::Mutation {
                pr,
                action: "enable_auto_merge".to_string(),
                detail,
            });
        }
        Ok(())
    }

    async fn list_labeled_issues(
        &self,
        repo: &RepoRef,
        label: &str,
    ) -> HostingResult<Vec<TaskIssue>> {
        let issues: Vec<GhIssue> = self
            .get_paged(
                self.repo_url(repo, &["issues"])?,
                &[("state", "open"), ("labels", label)],
            )
            .await?;
        Ok(issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| TaskIssue {
                number: i.number,
                title: i.title,
                body: i.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_open_issue_titles(&self, repo: &RepoRef) -> HostingResult<Vec<String>> {
        let issues: Vec<GhIssue> = self
            .get_paged(self.repo_url(repo, &["issues"])?, &[("state", "open")])
            .await?;
        Ok(issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| i.title)
            .collect())
    }

    async fn create_issue(
        &self,
        repo: &RepoRef,
        payload: &IssuePayload,
    ) -> HostingResult<CreatedIssue> {
        let url = self.repo_url(repo, &["issues"])?;
        let resp = self
            .send_json(Method::POST, url, &serde_json::to_value(payload)?)
            .await?;
        let issue: GhIssue = resp.json().await?;
        Ok(CreatedIssue {
            number: issue.number,
            url: issue.html_url,
        })
    }
}

// ---------------------------------------------------------------------------
// Workflow event payloads
// ---------------------------------------------------------------------------

/// PR number carried by a workflow event payload, if any.
///
/// Understands `pull_request*` events, issue comments on PRs and payloads
/// with a top-level `number`.
pub fn pull_request_from_event(payload: &Value) -> Option<u64> {
    if let Some(n) = payload.pointer("/pull_request/number").and_then(Value::as_u64) {
        return Some(n);
    }
    if payload.pointer("/issue/pull_request").is_some() {
        if let Some(n) = payload.pointer("/issue/number").and_then(Value::as_u64) {
            return Some(n);
        }
    }
    payload.get("number").and_then(Value::as_u64)
}

/// Read an event payload file (e.g. `$GITHUB_EVENT_PATH`).
pub fn load_event(path: &Path) -> HostingResult<Option<u64>> {
    let text = std::fs::read_to_string(path).map_err(|e| HostingError::DataFetch {
        what: format!("event payload {}", path.display()),
        detail: e.to_string(),
    })?;
    let payload: Value = serde_json::from_str(&text)?;
    Ok(pull_request_from_event(&payload))
}
