//! Applies an [`ActionPlan`] to a PR, one step at a time.
//!
//! Steps run sequentially in plan order. Each step is retried on its own.
//! Once a step fails, the remaining steps are recorded as skipped and never
//! sent, so auto-merge is not enabled on a PR whose label or verdict comment
//! did not land.

use serde::{Deserialize, Serialize};

use steward_core::metrics::METRICS;
use steward_core::{obs, ActionPlan, MutationStep, RepoRef};

use crate::api::HostingApi;
use crate::error::HostingResult;
use crate::retry::RetryPolicy;

/// Result of one mutation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Applied { attempts: u32 },
    Failed { error: String },
    /// Not attempted because an earlier step failed.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub action: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

impl StepOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, StepStatus::Applied { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, StepStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, StepStatus::Skipped { .. })
    }
}

async fn apply_step(
    api: &dyn HostingApi,
    repo: &RepoRef,
    pr: u64,
    step: &MutationStep,
) -> HostingResult<()> {
    match step {
        MutationStep::RemoveLabel { label } => api.remove_label(repo, pr, label).await,
        MutationStep::AddLabels { labels } => api.add_labels(repo, pr, labels).await,
        MutationStep::CreateComment { body } => api.create_comment(repo, pr, body).await.map(|_| ()),
        MutationStep::UpdateComment { comment_id, body } => {
            api.update_comment(repo, *comment_id, body).await
        }
        MutationStep::RequestReviewers { reviewers } => {
            api.request_reviewers(repo, pr, reviewers).await
        }
        MutationStep::EnableAutoMerge => api.enable_auto_merge(repo, pr).await,
    }
}

/// Apply the steps of `plan` in order, stopping at the first failure.
pub async fn apply_plan(
    api: &dyn HostingApi,
    repo: &RepoRef,
    plan: &ActionPlan,
    retry: &RetryPolicy,
) -> Vec<StepOutcome> {
    let mut outcomes = Vec::new();
    let mut failed_at: Option<&'static str> = None;
    for step in plan.steps() {
        let action = step.name();
        if let Some(failed) = failed_at {
            tracing::warn!(pr = plan.pr_id, action, failed, "mutation skipped");
            outcomes.push(StepOutcome {
                action: action.to_string(),
                status: StepStatus::Skipped {
                    reason: format!("earlier step {failed} failed"),
                },
            });
            continue;
        }
        let step = &step;
        let result = retry
            .run(action, || apply_step(api, repo, plan.pr_id, step))
            .await;
        let status = match result {
            Ok(((), attempts)) => {
                METRICS.inc_mutations_applied();
                obs::emit_mutation_applied(plan.pr_id, action, attempts);
                StepStatus::Applied { attempts }
            }
            Err(e) => {
                METRICS.inc_mutations_failed();
                obs::emit_mutation_failed(plan.pr_id, action, &e);
                failed_at = Some(action);
                StepStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
        outcomes.push(StepOutcome {
            action: action.to_string(),
            status,
        });
    }
    outcomes
}
