//! The hosting-platform seam.
//!
//! [`HostingApi`] is everything the steward needs from a code host: read a
//! PR, read its current steward-relevant state, and apply mutations. The
//! GitHub implementation lives in [`crate::github`]; tests use
//! [`crate::fakes::FakeHosting`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use steward_core::{IssuePayload, PrSnapshot, PrState, RepoRef, TaskIssue};

use crate::error::HostingResult;

/// An issue created by [`HostingApi::create_issue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub number: u64,
    pub url: String,
}

/// Injectable hosting platform client.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Numbers of all open pull requests, ascending.
    async fn list_open_pull_requests(&self, repo: &RepoRef) -> HostingResult<Vec<u64>>;

    /// Snapshot of one PR: metadata, changed files and combined CI status.
    async fn fetch_snapshot(&self, repo: &RepoRef, pr: u64) -> HostingResult<PrSnapshot>;

    /// Labels, pending and past reviewers, comments with authors, the PR
    /// author, the steward's own login and the auto-merge flag.
    async fn fetch_state(&self, repo: &RepoRef, pr: u64) -> HostingResult<PrState>;

    async fn add_labels(&self, repo: &RepoRef, pr: u64, labels: &[String]) -> HostingResult<()>;

    /// Removing a label that is not present succeeds.
    async fn remove_label(&self, repo: &RepoRef, pr: u64, label: &str) -> HostingResult<()>;

    /// Returns the new comment id.
    async fn create_comment(&self, repo: &RepoRef, pr: u64, body: &str) -> HostingResult<u64>;

    async fn update_comment(&self, repo: &RepoRef, comment_id: u64, body: &str)
        -> HostingResult<()>;

    async fn request_reviewers(
        &self,
        repo: &RepoRef,
        pr: u64,
        reviewers: &[String],
    ) -> HostingResult<()>;

    /// Turn on the platform's auto-merge for the PR. Never merges directly.
    async fn enable_auto_merge(&self, repo: &RepoRef, pr: u64) -> HostingResult<()>;

    /// Open issues carrying `label` (pull requests excluded).
    async fn list_labeled_issues(&self, repo: &RepoRef, label: &str)
        -> HostingResult<Vec<TaskIssue>>;

    /// Titles of open issues (pull requests excluded).
    async fn list_open_issue_titles(&self, repo: &RepoRef) -> HostingResult<Vec<String>>;

    async fn create_issue(
        &self,
        repo: &RepoRef,
        payload: &IssuePayload,
    ) -> HostingResult<CreatedIssue>;
}
