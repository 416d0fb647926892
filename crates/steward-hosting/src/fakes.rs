//! In-memory hosting platform (testing only)
//!
//! `FakeHosting` satisfies [`HostingApi`] against plain maps. Mutations update
//! the stored PR state, so a second run over the same PRs sees the effects of
//! the first. Failures can be injected per PR and per mutation kind.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use steward_core::{ExistingComment, IssuePayload, PrSnapshot, PrState, RepoRef, TaskIssue};

use crate::api::{CreatedIssue, HostingApi};
use crate::error::{HostingError, HostingResult};

/// One recorded call, e.g. `("add_labels", 7)`.
pub type Call = (String, u64);

/// Login the fake posts comments as.
pub const FAKE_STEWARD_LOGIN: &str = "steward-bot";

#[derive(Debug, Clone)]
struct FakeIssue {
    number: u64,
    title: String,
    body: String,
    labels: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    snapshots: HashMap<u64, PrSnapshot>,
    states: HashMap<u64, PrState>,
    failing_fetch: HashSet<u64>,
    /// Remaining injected failures per action name.
    failing_mutations: HashMap<String, u32>,
    issues: Vec<FakeIssue>,
    calls: Vec<Call>,
    next_id: u64,
}

/// In-memory [`HostingApi`].
#[derive(Debug, Default)]
pub struct FakeHosting {
    inner: Mutex<Inner>,
    fetch_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeHosting {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a PR with an empty current state.
    pub fn with_pr(self, snapshot: PrSnapshot) -> Self {
        let author = snapshot.author.clone();
        {
            let mut inner = self.lock();
            inner.states.insert(
                snapshot.id,
                PrState {
                    author,
                    steward_login: Some(FAKE_STEWARD_LOGIN.to_string()),
                    ..PrState::default()
                },
            );
            inner.snapshots.insert(snapshot.id, snapshot);
        }
        self
    }

    pub fn with_state(self, pr: u64, state: PrState) -> Self {
        self.lock().states.insert(pr, state);
        self
    }

    /// Every fetch for `pr` fails with a 500.
    pub fn with_failing_fetch(self, pr: u64) -> Self {
        self.lock().failing_fetch.insert(pr);
        self
    }

    /// The next `times` calls of `action` fail with a 422.
    pub fn with_failing_mutation(self, action: &str, times: u32) -> Self {
        self.lock()
            .failing_mutations
            .insert(action.to_string(), times);
        self
    }

    /// Add a comment by `author` to a registered PR.
    pub fn with_comment(self, pr: u64, author: &str, body: &str) -> Self {
        {
            let mut inner = self.lock();
            inner.next_id += 1;
            let comment = ExistingComment::new(inner.next_id, body).by(author);
            if let Some(state) = inner.states.get_mut(&pr) {
                state.comments.push(comment);
            }
        }
        self
    }

    pub fn with_open_issue(self, title: &str) -> Self {
        self.with_labeled_issue(title, "", &[])
    }

    pub fn with_labeled_issue(self, title: &str, body: &str, labels: &[&str]) -> Self {
        {
            let mut inner = self.lock();
            inner.next_id += 1;
            let number = 1000 + inner.next_id;
            inner.issues.push(FakeIssue {
                number,
                title: title.to_string(),
                body: body.to_string(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
            });
        }
        self
    }

    /// Each snapshot fetch sleeps this long, to make overlap observable.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn state(&self, pr: u64) -> Option<PrState> {
        self.lock().states.get(&pr).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls other than fetches and listings.
    pub fn mutation_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|(name, _)| !name.starts_with("fetch_") && !name.starts_with("list_"))
            .collect()
    }

    pub fn issue_titles(&self) -> Vec<String> {
        self.lock().issues.iter().map(|i| i.title.clone()).collect()
    }

    /// Highest number of snapshot fetches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, action: &str, pr: u64) -> HostingResult<()> {
        let mut inner = self.lock();
        inner.calls.push((action.to_string(), pr));
        if let Some(remaining) = inner.failing_mutations.get_mut(action) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HostingError::Status {
                    status: 422,
                    url: format!("fake://{action}"),
                    body: "injected failure".to_string(),
                });
            }
        }
        Ok(())
    }

    fn fetch_guard(&self, action: &str, pr: u64) -> HostingResult<()> {
        let mut inner = self.lock();
        inner.calls.push((action.to_string(), pr));
        if inner.failing_fetch.contains(&pr) {
            return Err(HostingError::Status {
                status: 500,
                url: format!("fake://{action}/{pr}"),
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn with_pr_state<R>(&self, pr: u64, f: impl FnOnce(&mut PrState) -> R) -> HostingResult<R> {
        let mut inner = self.lock();
        let state = inner.states.get_mut(&pr).ok_or_else(|| HostingError::Status {
            status: 404,
            url: format!("fake://pulls/{pr}"),
            body: "not found".to_string(),
        })?;
        Ok(f(state))
    }
}

#[async_trait]
impl HostingApi for FakeHosting {
    async fn list_open_pull_requests(&self, _repo: &RepoRef) -> HostingResult<Vec<u64>> {
        let mut prs: Vec<u64> = self.lock().snapshots.keys().copied().collect();
        prs.sort_unstable();
        Ok(prs)
    }

    async fn fetch_snapshot(&self, _repo: &RepoRef, pr: u64) -> HostingResult<PrSnapshot> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.fetch_guard("fetch_snapshot", pr)?;
        self.lock()
            .snapshots
            .get(&pr)
            .cloned()
            .ok_or_else(|| HostingError::Status {
                status: 404,
                url: format!("fake://pulls/{pr}"),
                body: "not found".to_string(),
            })
    }

    async fn fetch_state(&self, _repo: &RepoRef, pr: u64) -> HostingResult<PrState> {
        self.fetch_guard("fetch_state", pr)?;
        self.with_pr_state(pr, |s| s.clone())
    }

    async fn add_labels(&self, _repo: &RepoRef, pr: u64, labels: &[String]) -> HostingResult<()> {
        self.record("add_labels", pr)?;
        self.with_pr_state(pr, |s| {
            for label in labels {
                if !s.labels.contains(label) {
                    s.labels.push(label.clone());
                }
            }
        })
    }

    async fn remove_label(&self, _repo: &RepoRef, pr: u64, label: &str) -> HostingResult<()> {
        self.record("remove_label", pr)?;
        self.with_pr_state(pr, |s| s.labels.retain(|l| l != label))
    }

    async fn create_comment(&self, _repo: &RepoRef, pr: u64, body: &str) -> HostingResult<u64> {
        self.record("create_comment", pr)?;
        let id = {
            let mut inner = self.lock();
            inner.next_id += 1;
            inner.next_id
        };
        self.with_pr_state(pr, |s| {
            s.comments
                .push(ExistingComment::new(id, body).by(FAKE_STEWARD_LOGIN))
        })?;
        Ok(id)
    }

    async fn update_comment(
        &self,
        _repo: &RepoRef,
        comment_id: u64,
        body: &str,
    ) -> HostingResult<()> {
        let mut inner = self.lock();
        let pr = inner
            .states
            .iter()
            .find(|(_, s)| s.comments.iter().any(|c| c.id == comment_id))
            .map(|(pr, _)| *pr)
            .unwrap_or_default();
        drop(inner);
        self.record("update_comment", pr)?;

        inner = self.lock();
        for state in inner.states.values_mut() {
            if let Some(c) = state.comments.iter_mut().find(|c| c.id == comment_id) {
                c.body = body.to_string();
                return Ok(());
            }
        }
        Err(HostingError::Status {
            status: 404,
            url: format!("fake://comments/{comment_id}"),
            body: "not found".to_string(),
        })
    }

    async fn request_reviewers(
        &self,
        _repo: &RepoRef,
        pr: u64,
        reviewers: &[String],
    ) -> HostingResult<()> {
        self.record("request_reviewers", pr)?;
        self.with_pr_state(pr, |s| {
            for r in reviewers {
                let (list, handle) = match r.split_once('/') {
                    Some((_, slug)) => (&mut s.requested_teams, slug.to_string()),
                    None => (&mut s.requested_reviewers, r.clone()),
                };
                if !list.contains(&handle) {
                    list.push(handle);
                }
            }
        })
    }

    async fn enable_auto_merge(&self, _repo: &RepoRef, pr: u64) -> HostingResult<()> {
        self.record("enable_auto_merge", pr)?;
        self.with_pr_state(pr, |s| s.auto_merge_enabled = true)
    }

    async fn list_labeled_issues(
        &self,
        _repo: &RepoRef,
        label: &str,
    ) -> HostingResult<Vec<TaskIssue>> {
        let mut inner = self.lock();
        inner.calls.push(("list_labeled_issues".to_string(), 0));
        Ok(inner
            .issues
            .iter()
            .filter(|i| i.labels.iter().any(|l| l == label))
            .map(|i| TaskIssue {
                number: i.number,
                title: i.title.clone(),
                body: i.body.clone(),
            })
            .collect())
    }

    async fn list_open_issue_titles(&self, _repo: &RepoRef) -> HostingResult<Vec<String>> {
        self.lock().calls.push(("list_open_issues".to_string(), 0));
        Ok(self.issue_titles())
    }

    async fn create_issue(
        &self,
        repo: &RepoRef,
        payload: &IssuePayload,
    ) -> HostingResult<CreatedIssue> {
        self.record("create_issue", 0)?;
        let mut inner = self.lock();
        inner.next_id += 1;
        let number = 1000 + inner.next_id;
        inner.issues.push(FakeIssue {
            number,
            title: payload.title.clone(),
            body: payload.body.clone(),
            labels: payload.labels.clone(),
        });
        Ok(CreatedIssue {
            number,
            url: format!("https://github.com/{repo}/issues/{number}"),
        })
    }
}
