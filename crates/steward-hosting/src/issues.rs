//! Issue-side task flow: [`IssueImporter`] creates issues from a task list,
//! skipping duplicates. [`TaskDispatcher`] turns open task issues into worker
//! request files.

use std::path::Path;

use serde::Serialize;

use steward_core::{
    dispatch_tasks, plan_import, DispatchReport, DispatchSettings, ImportDecision, IssuePayload,
    RepoRef, RunContext, TaskRecord,
};

use crate::api::{CreatedIssue, HostingApi};
use crate::error::HostingResult;
use crate::retry::RetryPolicy;

/// Per-task result of an import.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ImportOutcome {
    Created { title: String, issue: CreatedIssue },
    /// Dry run: the issue would have been created.
    WouldCreate { title: String },
    Skipped { title: String, reason: String },
    Failed { title: String, error: String },
}

impl ImportOutcome {
    pub fn title(&self) -> &str {
        match self {
            Self::Created { title, .. }
            | Self::WouldCreate { title }
            | Self::Skipped { title, .. }
            | Self::Failed { title, .. } => title,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub repo: RepoRef,
    pub dry_run: bool,
    pub outcomes: Vec<ImportOutcome>,
}

impl ImportReport {
    /// Issues created, or that would be created in a dry run.
    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ImportOutcome::Created { .. } | ImportOutcome::WouldCreate { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ImportOutcome::Failed { .. }))
            .count()
    }
}

pub struct IssueImporter<'a> {
    api: &'a dyn HostingApi,
    labels: Vec<String>,
    fetch_retry: RetryPolicy,
    mutation_retry: RetryPolicy,
}

impl<'a> IssueImporter<'a> {
    /// `labels` are applied to every created issue, in addition to each
    /// task's own labels. Pass an empty list to apply none.
    pub fn new(api: &'a dyn HostingApi, labels: Vec<String>) -> Self {
        Self {
            api,
            labels,
            fetch_retry: RetryPolicy::fetch(),
            mutation_retry: RetryPolicy::mutation(),
        }
    }

    pub fn with_retry(mut self, fetch: RetryPolicy, mutation: RetryPolicy) -> Self {
        self.fetch_retry = fetch;
        self.mutation_retry = mutation;
        self
    }

    /// Import `tasks` into `ctx.repo`.
    ///
    /// Fails only when the open-issue listing cannot be fetched; individual
    /// creation failures are recorded in the report.
    pub async fn import(
        &self,
        ctx: &RunContext,
        tasks: &[TaskRecord],
    ) -> HostingResult<ImportReport> {
        let repo = &ctx.repo;
        let (open_titles, _) = self
            .fetch_retry
            .run("list_open_issues", || self.api.list_open_issue_titles(repo))
            .await?;

        let decisions = plan_import(tasks, &open_titles, &self.labels);
        let mut outcomes = Vec::with_capacity(decisions.len());
        for decision in decisions {
            let description = decision.describe(ctx.dry_run);
            tracing::info!(run_id = %ctx.run_id, "{description}");
            let outcome = match decision {
                ImportDecision::Create(payload) if ctx.dry_run => ImportOutcome::WouldCreate {
                    title: payload.title,
                },
                ImportDecision::Create(payload) => self.create(repo, payload).await,
                ImportDecision::SkipExisting { title, .. }
                | ImportDecision::SkipDuplicate { title } => ImportOutcome::Skipped {
                    title,
                    reason: description,
                },
            };
            outcomes.push(outcome);
        }

        Ok(ImportReport {
            repo: repo.clone(),
            dry_run: ctx.dry_run,
            outcomes,
        })
    }

    async fn create(&self, repo: &RepoRef, payload: IssuePayload) -> ImportOutcome {
        let payload = &payload;
        match self
            .mutation_retry
            .run("create_issue", || self.api.create_issue(repo, payload))
            .await
        {
            Ok((issue, _)) => ImportOutcome::Created {
                title: payload.title.clone(),
                issue,
            },
            Err(e) => {
                tracing::warn!(title = %payload.title, error = %e, "issue creation failed");
                ImportOutcome::Failed {
                    title: payload.title.clone(),
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Writes a request file for every open issue carrying the task label.
pub struct TaskDispatcher<'a> {
    api: &'a dyn HostingApi,
    label: String,
    settings: DispatchSettings,
    fetch_retry: RetryPolicy,
}

impl<'a> TaskDispatcher<'a> {
    pub fn new(api: &'a dyn HostingApi, label: impl Into<String>) -> Self {
        Self {
            api,
            label: label.into(),
            settings: DispatchSettings::default(),
            fetch_retry: RetryPolicy::fetch(),
        }
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, fetch: RetryPolicy) -> Self {
        self.fetch_retry = fetch;
        self
    }

    /// One dispatch pass over `ctx.repo`. Request files go to
    /// `requests_dir`; a dry run lists what would be written.
    pub async fn dispatch(
        &self,
        ctx: &RunContext,
        requests_dir: &Path,
    ) -> HostingResult<DispatchReport> {
        let repo = &ctx.repo;
        let label = self.label.as_str();
        let (issues, _) = self
            .fetch_retry
            .run("list_labeled_issues", || {
                self.api.list_labeled_issues(repo, label)
            })
            .await?;
        tracing::info!(
            run_id = %ctx.run_id,
            repo = %repo,
            label,
            issues = issues.len(),
            "scanning task issues"
        );

        Ok(dispatch_tasks(
            &issues,
            &self.settings,
            requests_dir,
            ctx.dry_run,
        )?)
    }
}
