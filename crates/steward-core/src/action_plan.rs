//! Action planning: the minimal set of mutations that brings a PR in line
//! with its verdict.
//!
//! Planning compares the verdict against the PR's current state so that
//! re-running the steward on an unchanged PR produces an empty plan.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::risk::RiskLevel;
use crate::verdict::Verdict;

/// Hidden marker identifying the steward's own comment.
pub const VERDICT_MARKER: &str = "<!-- pr-steward:verdict -->";

const DIGEST_PREFIX: &str = "<!-- pr-steward:digest=";

/// An existing issue comment on the PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingComment {
    pub id: u64,
    pub body: String,
    /// Login of the comment's author.
    #[serde(default)]
    pub author: Option<String>,
}

impl ExistingComment {
    pub fn new(id: u64, body: impl Into<String>) -> Self {
        Self {
            id,
            body: body.into(),
            author: None,
        }
    }

    pub fn by(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Current state of a PR as seen on the hosting platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrState {
    #[serde(default)]
    pub labels: Vec<String>,
    /// Pending user review requests.
    #[serde(default)]
    pub requested_reviewers: Vec<String>,
    /// Pending team review requests, as team slugs.
    #[serde(default)]
    pub requested_teams: Vec<String>,
    /// Users who already submitted a review. GitHub drops them from the
    /// pending requests once they review.
    #[serde(default)]
    pub reviewed_by: Vec<String>,
    #[serde(default)]
    pub comments: Vec<ExistingComment>,
    #[serde(default)]
    pub author: Option<String>,
    /// Login the steward posts as. When set, only comments by this login
    /// count as the verdict comment.
    #[serde(default)]
    pub steward_login: Option<String>,
    #[serde(default)]
    pub auto_merge_enabled: bool,
}

impl PrState {
    /// The steward's verdict comment, if one was posted before.
    ///
    /// Anyone can paste the marker into a comment, so the author must match
    /// `steward_login` when it is known.
    pub fn verdict_comment(&self) -> Option<&ExistingComment> {
        self.comments.iter().find(|c| {
            c.body.contains(VERDICT_MARKER)
                && match (&self.steward_login, &c.author) {
                    (None, _) => true,
                    (Some(login), Some(author)) => login.eq_ignore_ascii_case(author),
                    (Some(_), None) => false,
                }
        })
    }

    /// Whether `handle` already has a pending request or a submitted review.
    /// Team handles (`org/team`) are matched by slug.
    pub fn has_reviewer(&self, handle: &str) -> bool {
        match handle.split_once('/') {
            Some((_, slug)) => self
                .requested_teams
                .iter()
                .any(|t| t.eq_ignore_ascii_case(slug)),
            None => self
                .requested_reviewers
                .iter()
                .chain(&self.reviewed_by)
                .any(|r| r.eq_ignore_ascii_case(handle)),
        }
    }
}

/// What to do with the verdict comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommentAction {
    Create { body: String },
    Update { comment_id: u64, body: String },
    Unchanged,
}

/// One mutation, in the order it must be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MutationStep {
    RemoveLabel { label: String },
    AddLabels { labels: Vec<String> },
    CreateComment { body: String },
    UpdateComment { comment_id: u64, body: String },
    RequestReviewers { reviewers: Vec<String> },
    EnableAutoMerge,
}

impl MutationStep {
    /// Short name used in logs and outcome reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RemoveLabel { .. } => "remove_label",
            Self::AddLabels { .. } => "add_labels",
            Self::CreateComment { .. } => "create_comment",
            Self::UpdateComment { .. } => "update_comment",
            Self::RequestReviewers { .. } => "request_reviewers",
            Self::EnableAutoMerge => "enable_auto_merge",
        }
    }
}

/// The planned mutations for one PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub pr_id: u64,
    pub remove_labels: Vec<String>,
    pub add_labels: Vec<String>,
    pub comment: CommentAction,
    pub request_reviewers: Vec<String>,
    pub enable_auto_merge: bool,
}

impl ActionPlan {
    /// Steps in application order: labels, comment, reviewers, auto-merge.
    pub fn steps(&self) -> Vec<MutationStep> {
        let mut steps = Vec::new();
        for label in &self.remove_labels {
            steps.push(MutationStep::RemoveLabel {
                label: label.clone(),
            });
        }
        if !self.add_labels.is_empty() {
            steps.push(MutationStep::AddLabels {
                labels: self.add_labels.clone(),
            });
        }
        match &self.comment {
            CommentAction::Create { body } => {
                steps.push(MutationStep::CreateComment { body: body.clone() })
            }
            CommentAction::Update { comment_id, body } => {
                steps.push(MutationStep::UpdateComment {
                    comment_id: *comment_id,
                    body: body.clone(),
                })
            }
            CommentAction::Unchanged => {}
        }
        if !self.request_reviewers.is_empty() {
            steps.push(MutationStep::RequestReviewers {
                reviewers: self.request_reviewers.clone(),
            });
        }
        if self.enable_auto_merge {
            steps.push(MutationStep::EnableAutoMerge);
        }
        steps
    }

    pub fn is_empty(&self) -> bool {
        self.remove_labels.is_empty()
            && self.add_labels.is_empty()
            && self.comment == CommentAction::Unchanged
            && self.request_reviewers.is_empty()
            && !self.enable_auto_merge
    }
}

fn render_verdict_text(verdict: &Verdict) -> String {
    let mut out = String::new();
    out.push_str(&format!("### PR Steward: risk {}\n\n", verdict.risk_level));
    out.push_str("**Reasons**\n");
    for reason in &verdict.reasons {
        out.push_str(&format!("- {reason}\n"));
    }
    out.push('\n');
    if verdict.missing_sections.is_empty() {
        out.push_str("**Sections**: complete\n");
    } else {
        out.push_str(&format!(
            "**Missing sections**: {}\n",
            verdict.missing_sections.join(", ")
        ));
    }
    out.push_str(&format!(
        "**CI**: {}\n",
        if verdict.ci_passing { "passing" } else { "not passing" }
    ));
    if !verdict.reviewers.is_empty() {
        let handles: Vec<String> = verdict.reviewers.iter().map(|r| format!("@{r}")).collect();
        out.push_str(&format!("**Reviewers**: {}\n", handles.join(", ")));
    }
    let merge = if verdict.auto_merge_eligible {
        "eligible for auto-merge"
    } else {
        "requires human review"
    };
    out.push_str(&format!("**Merge**: {merge}\n"));
    out
}

/// Hex sha256 of the rendered verdict text.
pub fn verdict_digest(verdict: &Verdict) -> String {
    hex::encode(Sha256::digest(render_verdict_text(verdict).as_bytes()))
}

/// Full comment body: marker, digest and rendered verdict.
pub fn render_comment(verdict: &Verdict) -> String {
    format!(
        "{VERDICT_MARKER}\n{DIGEST_PREFIX}{} -->\n{}",
        verdict_digest(verdict),
        render_verdict_text(verdict)
    )
}

/// Digest embedded in a previously posted comment body.
fn embedded_digest(body: &str) -> Option<&str> {
    let start = body.find(DIGEST_PREFIX)? + DIGEST_PREFIX.len();
    let rest = &body[start..];
    let end = rest.find(" -->")?;
    Some(&rest[..end])
}

/// Plan the mutations needed to apply `verdict` to a PR in state `current`.
pub fn plan_actions(verdict: &Verdict, current: &PrState) -> ActionPlan {
    let target = &verdict.label_to_apply;

    let remove_labels: Vec<String> = current
        .labels
        .iter()
        .filter(|l| RiskLevel::is_risk_label(l) && *l != target)
        .cloned()
        .collect();
    let add_labels = if current.labels.iter().any(|l| l == target) {
        Vec::new()
    } else {
        vec![target.clone()]
    };

    let digest = verdict_digest(verdict);
    let comment = match current.verdict_comment() {
        Some(existing) if embedded_digest(&existing.body) == Some(digest.as_str()) => {
            CommentAction::Unchanged
        }
        Some(existing) => CommentAction::Update {
            comment_id: existing.id,
            body: render_comment(verdict),
        },
        None => CommentAction::Create {
            body: render_comment(verdict),
        },
    };

    let author = current.author.as_deref();
    let request_reviewers = verdict
        .reviewers
        .iter()
        .filter(|r| !author.is_some_and(|a| a.eq_ignore_ascii_case(r)))
        .filter(|r| !current.has_reviewer(r))
        .cloned()
        .collect();

    ActionPlan {
        pr_id: verdict.pr_id,
        remove_labels,
        add_labels,
        comment,
        request_reviewers,
        enable_auto_merge: verdict.auto_merge_eligible && !current.auto_merge_enabled,
    }
}
