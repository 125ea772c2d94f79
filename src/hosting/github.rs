use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{HostingPlatform, MergeResult};
use crate::errors::HostingError;
use crate::model::{ChangeRequest, ChangeState, Comment, ItemState, NewChangeRequest, WorkItem};

const USER_AGENT: &str = "steward";
const PER_PAGE: usize = 100;
/// Attempts for idempotent reads.
const READ_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    /// Pull requests also come through the issues endpoint.
    pull_request: Option<serde_json::Value>,
}

impl From<GhIssue> for WorkItem {
    fn from(issue: GhIssue) -> Self {
        Self {
            id: issue.number,
            title: issue.title,
            description: issue.body.unwrap_or_default(),
            state: if issue.state == "open" {
                ItemState::Open
            } else {
                ItemState::Closed
            },
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhPull {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    draft: bool,
    merged_at: Option<String>,
    mergeable: Option<bool>,
    head: GhRef,
    base: GhRef,
}

impl From<GhPull> for ChangeRequest {
    fn from(pull: GhPull) -> Self {
        let state = if pull.merged_at.is_some() {
            ChangeState::Merged
        } else if pull.state == "open" {
            ChangeState::Open
        } else {
            ChangeState::Closed
        };
        Self {
            id: pull.number,
            title: pull.title,
            body: pull.body.unwrap_or_default(),
            branch: pull.head.name,
            base: pull.base.name,
            head_sha: pull.head.sha,
            state,
            draft: pull.draft,
            mergeable: pull.mergeable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    user: Option<GhUser>,
    body: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GhCheckRun {
    status: String,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhCheckRuns {
    check_runs: Vec<GhCheckRun>,
}

#[derive(Debug, Deserialize)]
struct GhMerge {
    sha: Option<String>,
}

/// Parse the `owner/repo` slug from an HTTPS or SSH remote URL.
///
/// Handles `https://github.com/o/r(.git)`, token-embedded
/// `https://x-access-token:T@github.com/o/r.git` and `git@github.com:o/r.git`.
pub fn parse_owner_repo_from_url(url: &str) -> Option<String> {
    let path = if let Some(rest) = url.strip_prefix("https://") {
        let host_and_path = rest.rsplit_once('@').map(|(_, p)| p).unwrap_or(rest);
        host_and_path.split_once('/')?.1
    } else if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':')?.1
    } else {
        return None;
    };
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() == 2 && parts.iter().all(|p| !p.is_empty()) {
        Some(format!("{}/{}", parts[0], parts[1]))
    } else {
        None
    }
}

/// GitHub REST client for one repository.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    repo: String,
    token: Option<String>,
    retry_delay: Duration,
}

impl GitHubClient {
    pub fn new(api_url: &str, repo: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            token,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Base delay of the linear backoff between read attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.repo, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");
        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn check(resp: Response, what: &str) -> Result<Response, HostingError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(HostingError::Unauthorized),
            StatusCode::NOT_FOUND => Err(HostingError::NotFound {
                what: what.to_string(),
            }),
            _ => Err(HostingError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// GET with bounded retry on transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, HostingError> {
        let mut attempt = 1;
        loop {
            let result = async {
                let resp = self.request(Method::GET, url).query(query).send().await?;
                let resp = Self::check(resp, what).await?;
                resp.json::<T>()
                    .await
                    .map_err(|e| HostingError::Decode(e.to_string()))
            }
            .await;
            match result {
                Err(e) if e.is_transient() && attempt < READ_ATTEMPTS => {
                    warn!(attempt, error = %e, url, "transient hosting error, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_json(
        &self,
        method: Method,
        url: &str,
        body: serde_json::Value,
        what: &str,
    ) -> Result<Response, HostingError> {
        let resp = self.request(method, url).json(&body).send().await?;
        Self::check(resp, what).await
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        url: &str,
        mut query: Vec<(&str, String)>,
        what: &str,
    ) -> Result<Vec<T>, HostingError> {
        let mut all = Vec::new();
        let mut page = 1u32;
        query.push(("per_page", PER_PAGE.to_string()));
        loop {
            let mut page_query = query.clone();
            page_query.push(("page", page.to_string()));
            let batch: Vec<T> = self.get_json(url, &page_query, what).await?;
            let count = batch.len();
            all.extend(batch);
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn set_issue_state(&self, id: u64, state: &str) -> Result<(), HostingError> {
        let url = self.repo_url(&format!("issues/{}", id));
        self.send_json(Method::PATCH, &url, json!({ "state": state }), &format!("issue #{}", id))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HostingPlatform for GitHubClient {
    async fn credentials_valid(&self) -> Result<bool, HostingError> {
        if self.token.is_none() {
            return Ok(false);
        }
        let url = format!("{}/user", self.api_url);
        match self.get_json::<serde_json::Value>(&url, &[], "user").await {
            Ok(_) => Ok(true),
            Err(HostingError::Unauthorized) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn work_item(&self, id: u64) -> Result<WorkItem, HostingError> {
        let url = self.repo_url(&format!("issues/{}", id));
        let issue: GhIssue = self.get_json(&url, &[], &format!("issue #{}", id)).await?;
        if issue.pull_request.is_some() {
            return Err(HostingError::NotFound {
                what: format!("issue #{} (it is a pull request)", id),
            });
        }
        Ok(issue.into())
    }

    async fn close_work_item(&self, id: u64) -> Result<(), HostingError> {
        self.set_issue_state(id, "closed").await
    }

    #[instrument(skip(self, body))]
    async fn create_issue(&self, title: &str, body: &str, labels: &[&str]) -> Result<u64, HostingError> {
        #[derive(Deserialize)]
        struct Created {
            number: u64,
        }
        let url = self.repo_url("issues");
        let resp = self
            .send_json(
                Method::POST,
                &url,
                json!({ "title": title, "body": body, "labels": labels }),
                "issues",
            )
            .await?;
        let created: Created = resp
            .json()
            .await
            .map_err(|e| HostingError::Decode(e.to_string()))?;
        Ok(created.number)
    }

    async fn find_issue_by_marker(&self, label: &str, marker: &str) -> Result<Option<u64>, HostingError> {
        let url = self.repo_url("issues");
        let issues: Vec<GhIssue> = self
            .get_paginated(
                &url,
                vec![("state", "open".to_string()), ("labels", label.to_string())],
                "issues",
            )
            .await?;
        Ok(issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .find(|i| i.body.as_deref().is_some_and(|b| b.contains(marker)))
            .map(|i| i.number))
    }

    async fn open_change_requests(&self) -> Result<Vec<ChangeRequest>, HostingError> {
        let url = self.repo_url("pulls");
        let pulls: Vec<GhPull> = self
            .get_paginated(&url, vec![("state", "open".to_string())], "pulls")
            .await?;
        Ok(pulls.into_iter().map(Into::into).collect())
    }

    async fn change_request(&self, id: u64) -> Result<ChangeRequest, HostingError> {
        let url = self.repo_url(&format!("pulls/{}", id));
        let pull: GhPull = self.get_json(&url, &[], &format!("pull request #{}", id)).await?;
        Ok(pull.into())
    }

    #[instrument(skip(self, new), fields(branch = %new.branch))]
    async fn create_change_request(&self, new: &NewChangeRequest) -> Result<ChangeRequest, HostingError> {
        let url = self.repo_url("pulls");
        let resp = self
            .send_json(
                Method::POST,
                &url,
                json!({
                    "title": new.title,
                    "body": new.body,
                    "head": new.branch,
                    "base": new.base,
                    "draft": new.draft,
                }),
                "pulls",
            )
            .await?;
        let pull: GhPull = resp
            .json()
            .await
            .map_err(|e| HostingError::Decode(e.to_string()))?;
        Ok(pull.into())
    }

    async fn close_change_request(&self, id: u64) -> Result<(), HostingError> {
        let url = self.repo_url(&format!("pulls/{}", id));
        self.send_json(Method::PATCH, &url, json!({ "state": "closed" }), &format!("pull request #{}", id))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, title))]
    async fn merge_change_request(
        &self,
        id: u64,
        expected_head: &str,
        title: &str,
    ) -> Result<MergeResult, HostingError> {
        let url = self.repo_url(&format!("pulls/{}/merge", id));
        let resp = self
            .request(Method::PUT, &url)
            .json(&json!({
                "sha": expected_head,
                "merge_method": "squash",
                "commit_title": format!("{} (#{})", title, id),
            }))
            .send()
            .await?;
        match resp.status() {
            StatusCode::CONFLICT => Ok(MergeResult::HeadChanged),
            StatusCode::METHOD_NOT_ALLOWED => Ok(MergeResult::NotMergeable {
                reason: resp.text().await.unwrap_or_default(),
            }),
            _ => {
                let resp = Self::check(resp, &format!("pull request #{}", id)).await?;
                let merged: GhMerge = resp
                    .json()
                    .await
                    .map_err(|e| HostingError::Decode(e.to_string()))?;
                debug!(id, "merged");
                Ok(MergeResult::Merged {
                    sha: merged.sha.unwrap_or_default(),
                })
            }
        }
    }

    async fn comments(&self, id: u64) -> Result<Vec<Comment>, HostingError> {
        let url = self.repo_url(&format!("issues/{}/comments", id));
        let comments: Vec<GhComment> = self
            .get_paginated(&url, Vec::new(), &format!("comments on #{}", id))
            .await?;
        Ok(comments
            .into_iter()
            .map(|c| Comment {
                author: c.user.map(|u| u.login).unwrap_or_default(),
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
            })
            .collect())
    }

    async fn post_comment(&self, id: u64, body: &str) -> Result<(), HostingError> {
        let url = self.repo_url(&format!("issues/{}/comments", id));
        self.send_json(Method::POST, &url, json!({ "body": body }), &format!("#{}", id))
            .await?;
        Ok(())
    }

    async fn add_label(&self, id: u64, label: &str) -> Result<(), HostingError> {
        let url = self.repo_url(&format!("issues/{}/labels", id));
        self.send_json(Method::POST, &url, json!({ "labels": [label] }), &format!("#{}", id))
            .await?;
        Ok(())
    }

    async fn checks_passing(&self, sha: &str) -> Result<Option<bool>, HostingError> {
        let url = self.repo_url(&format!("commits/{}/check-runs", sha));
        let runs: GhCheckRuns = self
            .get_json(&url, &[("per_page", PER_PAGE.to_string())], "check runs")
            .await?;
        Ok(summarize_checks(&runs.check_runs))
    }
}

fn summarize_checks(runs: &[GhCheckRun]) -> Option<bool> {
    const OK: &[&str] = &["success", "neutral", "skipped"];
    let mut pending = false;
    for run in runs {
        if run.status != "completed" {
            pending = true;
            continue;
        }
        match run.conclusion.as_deref() {
            Some(c) if OK.contains(&c) => {}
            _ => return Some(false),
        }
    }
    if pending { None } else { Some(true) }
}
