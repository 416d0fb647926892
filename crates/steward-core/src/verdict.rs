//! Verdict assembly: the merge decision for one PR.
//!
//! [`assemble_verdict`] is a pure function of the change set, the section
//! check, the policy and the CI flag. Re-evaluating identical inputs yields an
//! identical verdict.

use serde::{Deserialize, Serialize};

use crate::change_set::{analyze, ChangeSet};
use crate::classifier::classify;
use crate::policy::{MergeMode, PolicyConfig};
use crate::reviewers::resolve_reviewers;
use crate::risk::RiskLevel;
use crate::sections::{check_sections, SectionCheckResult};
use crate::snapshot::PrSnapshot;

/// Final decision for a single PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub pr_id: u64,
    pub risk_level: RiskLevel,
    /// One entry per fired rule, in evaluation order.
    pub reasons: Vec<String>,
    pub missing_sections: Vec<String>,
    /// Deduplicated, in rule order.
    pub reviewers: Vec<String>,
    pub ci_passing: bool,
    pub auto_merge_eligible: bool,
    /// `risk-<level>`.
    pub label_to_apply: String,
}

impl Verdict {
    /// Short human summary, e.g. `#12 L1 (auto-merge eligible)`.
    pub fn summary(&self) -> String {
        let merge = if self.auto_merge_eligible {
            "auto-merge eligible"
        } else {
            "needs review"
        };
        format!("#{} {} ({merge})", self.pr_id, self.risk_level)
    }
}

/// Combine analyzer and section-checker output into a [`Verdict`].
pub fn assemble_verdict(
    pr_id: u64,
    change_set: &ChangeSet,
    sections: &SectionCheckResult,
    policy: &PolicyConfig,
    ci_passing: bool,
) -> Verdict {
    let classification = classify(change_set, sections, &policy.thresholds);
    let reviewers = resolve_reviewers(change_set.paths(), &policy.reviewer_rules);

    let auto_merge_eligible = policy.merge_mode == MergeMode::AutoMerge
        && policy.auto_merge_levels.contains(&classification.risk_level)
        && sections.is_complete()
        && ci_passing;

    Verdict {
        pr_id,
        label_to_apply: classification.risk_level.label(),
        risk_level: classification.risk_level,
        reasons: classification.reasons,
        missing_sections: sections.missing_sections.clone(),
        reviewers,
        ci_passing,
        auto_merge_eligible,
    }
}

/// Run the whole pipeline for one snapshot.
pub fn evaluate(snapshot: &PrSnapshot, policy: &PolicyConfig) -> Verdict {
    let change_set = analyze(&snapshot.changed_files, &snapshot.labels, policy);
    let sections = check_sections(snapshot.body.as_deref(), &policy.required_sections);
    let verdict = assemble_verdict(
        snapshot.id,
        &change_set,
        &sections,
        policy,
        snapshot.ci.passing,
    );
    tracing::debug!(
        pr = snapshot.id,
        risk = %verdict.risk_level,
        files = change_set.file_count,
        lines = change_set.changed_lines(),
        eligible = verdict.auto_merge_eligible,
        "verdict assembled"
    );
    verdict
}
