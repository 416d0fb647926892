//! Work dispatch: turn open task issues into worker request files.
//!
//! Each open issue carrying the task label becomes one JSON task definition
//! under the requests directory, named after the issue. A definition that
//! already exists is never rewritten, so a worker that picked it up keeps a
//! stable request.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default location of request files, relative to the workspace root.
pub const DEFAULT_REQUESTS_DIR: &str = "work/requests";

const WORKER_ROLE: &str = "worker";
const DEFAULT_CRITERION: &str = "Check PR description";
const DEFAULT_TEST_STEP: &str = "echo 'No automatic tests defined yet'";
const STOP_CONDITIONS: &[&str] = &["security-sensitive", "secrets-required"];

/// An open issue labelled as a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Limits and locations stamped into every definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Workspace path the worker operates in.
    pub workspace_root: String,
    pub base_ref: String,
    pub deny_globs: Vec<String>,
    pub max_files_changed: u32,
    pub max_additions: u32,
    pub max_deletions: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workspace_root: ".".to_string(),
            base_ref: "main".to_string(),
            deny_globs: vec![".github/workflows/**".to_string()],
            max_files_changed: 10,
            max_additions: 1000,
            max_deletions: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRepo {
    pub path: String,
    pub base_ref: String,
    pub target_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskScope {
    pub allowed_globs: Vec<String>,
    pub deny_globs: Vec<String>,
    pub max_files_changed: u32,
    pub max_additions: u32,
    pub max_deletions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGoal {
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub test_plan: Vec<String>,
}

/// The request a worker receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: String,
    pub role: String,
    pub canonical_language: String,
    pub repo: TaskRepo,
    pub scope: TaskScope,
    pub goal: TaskGoal,
    pub stop_conditions: Vec<String>,
}

/// `issue-<number>`, used for the file name and the worker branch.
pub fn task_id(number: u64) -> String {
    format!("issue-{number}")
}

/// Bullets under an "Acceptance Criteria" line in an issue body.
///
/// The list ends at the first blank line after a bullet or at the next
/// heading. Checkbox markers (`- [ ]`) are dropped.
pub fn acceptance_criteria(body: &str) -> Vec<String> {
    let mut criteria = Vec::new();
    let mut in_list = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if !in_list {
            let label = trimmed
                .trim_start_matches('#')
                .trim()
                .trim_matches('*')
                .trim_end_matches(':')
                .trim();
            in_list = label.eq_ignore_ascii_case("acceptance criteria");
            continue;
        }
        if trimmed.starts_with('#') {
            break;
        }
        let item = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "));
        match item {
            Some(item) => {
                let item = item
                    .strip_prefix("[ ]")
                    .or_else(|| item.strip_prefix("[x]"))
                    .unwrap_or(item)
                    .trim();
                if !item.is_empty() {
                    criteria.push(item.to_string());
                }
            }
            None if trimmed.is_empty() && criteria.is_empty() => {}
            None => break,
        }
    }
    criteria
}

/// Build the worker request for `issue`.
pub fn build_definition(issue: &TaskIssue, settings: &DispatchSettings) -> TaskDefinition {
    let id = task_id(issue.number);
    let mut criteria = acceptance_criteria(&issue.body);
    if criteria.is_empty() {
        criteria.push(DEFAULT_CRITERION.to_string());
    }
    TaskDefinition {
        repo: TaskRepo {
            path: settings.workspace_root.clone(),
            base_ref: settings.base_ref.clone(),
            target_branch: format!("{WORKER_ROLE}/{id}"),
        },
        task_id: id,
        role: WORKER_ROLE.to_string(),
        canonical_language: "en".to_string(),
        scope: TaskScope {
            allowed_globs: vec!["**/*".to_string()],
            deny_globs: settings.deny_globs.clone(),
            max_files_changed: settings.max_files_changed,
            max_additions: settings.max_additions,
            max_deletions: settings.max_deletions,
        },
        goal: TaskGoal {
            title: issue.title.trim().to_string(),
            description: issue.body.clone(),
            acceptance_criteria: criteria,
            test_plan: vec![DEFAULT_TEST_STEP.to_string()],
        },
        stop_conditions: STOP_CONDITIONS.iter().map(|s| s.to_string()).collect(),
    }
}

/// Per-issue result of a dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Written { task_id: String, path: PathBuf },
    /// Dry run: the file would have been written.
    WouldWrite { task_id: String, path: PathBuf },
    AlreadyDispatched { task_id: String, path: PathBuf },
    Failed { task_id: String, error: String },
}

impl DispatchOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Written { task_id, .. }
            | Self::WouldWrite { task_id, .. }
            | Self::AlreadyDispatched { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub dry_run: bool,
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    /// Requests written, or that would be written in a dry run.
    pub fn dispatched(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    DispatchOutcome::Written { .. } | DispatchOutcome::WouldWrite { .. }
                )
            })
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Failed { .. }))
            .count()
    }
}

fn write_new(path: &Path, definition: &TaskDefinition) -> Result<bool> {
    let json = serde_json::to_string_pretty(definition)?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(true)
}

/// Write one request file per issue into `requests_dir`.
///
/// Existing files are left untouched. A dry run reads the directory but
/// creates nothing, not even the directory itself.
pub fn dispatch_tasks(
    issues: &[TaskIssue],
    settings: &DispatchSettings,
    requests_dir: &Path,
    dry_run: bool,
) -> Result<DispatchReport> {
    if !dry_run {
        std::fs::create_dir_all(requests_dir)?;
    }

    let mut outcomes = Vec::with_capacity(issues.len());
    for issue in issues {
        let id = task_id(issue.number);
        let path = requests_dir.join(format!("{id}.json"));
        let outcome = if path.exists() {
            DispatchOutcome::AlreadyDispatched { task_id: id, path }
        } else if dry_run {
            DispatchOutcome::WouldWrite { task_id: id, path }
        } else {
            match write_new(&path, &build_definition(issue, settings)) {
                Ok(true) => {
                    tracing::info!(issue = issue.number, path = %path.display(), "task dispatched");
                    DispatchOutcome::Written { task_id: id, path }
                }
                Ok(false) => DispatchOutcome::AlreadyDispatched { task_id: id, path },
                Err(e) => {
                    tracing::warn!(issue = issue.number, error = %e, "dispatch failed");
                    DispatchOutcome::Failed {
                        task_id: id,
                        error: e.to_string(),
                    }
                }
            }
        };
        outcomes.push(outcome);
    }
    Ok(DispatchReport { dry_run, outcomes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(number: u64, body: &str) -> TaskIssue {
        TaskIssue {
            number,
            title: "Update README with new architecture".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_definition_shape() {
        let body = "Please describe the modes.\n\nAcceptance Criteria:\n- Mention both roles\n- [ ] Update status\n\nThanks";
        let def = build_definition(&issue(101, body), &DispatchSettings::default());
        assert_eq!(def.task_id, "issue-101");
        assert_eq!(def.role, "worker");
        assert_eq!(def.repo.target_branch, "worker/issue-101");
        assert_eq!(def.repo.base_ref, "main");
        assert_eq!(def.scope.deny_globs, vec![".github/workflows/**".to_string()]);
        assert_eq!(def.scope.max_files_changed, 10);
        assert_eq!(
            def.goal.acceptance_criteria,
            vec!["Mention both roles".to_string(), "Update status".to_string()]
        );
        assert_eq!(def.goal.description, body);
        assert_eq!(def.stop_conditions.len(), 2);
    }

    #[test]
    fn test_criteria_default_when_absent() {
        let def = build_definition(&issue(7, "just do it"), &DispatchSettings::default());
        assert_eq!(def.goal.acceptance_criteria, vec![DEFAULT_CRITERION.to_string()]);
    }

    #[test]
    fn test_criteria_under_heading_stop_at_next_heading() {
        let body = "## Acceptance criteria\n\n* one\n* two\n## Notes\n- not a criterion";
        assert_eq!(acceptance_criteria(body), vec!["one", "two"]);
    }

    #[test]
    fn test_dispatch_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let requests = dir.path().join("work").join("requests");
        let issues = vec![issue(1, ""), issue(2, "")];

        let first = dispatch_tasks(&issues, &DispatchSettings::default(), &requests, false).unwrap();
        assert_eq!(first.dispatched(), 2);
        let text = std::fs::read_to_string(requests.join("issue-1.json")).unwrap();
        let parsed: TaskDefinition = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.task_id, "issue-1");

        std::fs::write(requests.join("issue-2.json"), "picked up").unwrap();
        let second =
            dispatch_tasks(&issues, &DispatchSettings::default(), &requests, false).unwrap();
        assert_eq!(second.dispatched(), 0);
        assert!(second
            .outcomes
            .iter()
            .all(|o| matches!(o, DispatchOutcome::AlreadyDispatched { .. })));
        assert_eq!(
            std::fs::read_to_string(requests.join("issue-2.json")).unwrap(),
            "picked up"
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let requests = dir.path().join("requests");
        let report =
            dispatch_tasks(&[issue(3, "")], &DispatchSettings::default(), &requests, true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.dispatched(), 1);
        assert_eq!(report.outcomes[0].task_id(), "issue-3");
        assert!(!requests.exists());
    }
}
