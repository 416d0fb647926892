//! Risk classifier: an ordered escalation pipeline.
//!
//! Classification starts from a baseline picked by the first matching
//! [`BaselineRule`], then every [`EscalationRule`] is checked independently.
//! Rules can only raise the level; the result is the maximum reached, and
//! every rule that fired leaves one reason string, in evaluation order.

use serde::{Deserialize, Serialize};

use crate::change_set::ChangeSet;
use crate::policy::RiskThresholds;
use crate::risk::RiskLevel;
use crate::sections::SectionCheckResult;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Baseline rules, evaluated in order; the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BaselineRule {
    /// No files, or documentation-only paths → `L0`.
    EmptyOrDocsOnly,
    /// Few files and few changed lines → `L1`.
    SmallChange,
    /// Anything else → `L2`.
    Fallback,
}

/// Escalation rules, each evaluated against every input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationRule {
    /// Protected path touched → `L2`, or `L3` for high-sensitivity patterns.
    ProtectedPath,
    /// Narrative missing required sections → `L1`.
    MissingSections,
    /// Changed lines above the large-change threshold → `L2`.
    LargeChange,
    /// File count above the large-change threshold → `L2`.
    ManyFiles,
    /// A blocking label is present → `L3`.
    BlockLabel,
}

/// The ordered rule lists used for classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRules {
    pub baseline: Vec<BaselineRule>,
    pub escalations: Vec<EscalationRule>,
}

impl ClassifierRules {
    /// The standard precedence.
    pub fn standard() -> Self {
        Self {
            baseline: vec![
                BaselineRule::EmptyOrDocsOnly,
                BaselineRule::SmallChange,
                BaselineRule::Fallback,
            ],
            escalations: vec![
                EscalationRule::ProtectedPath,
                EscalationRule::MissingSections,
                EscalationRule::LargeChange,
                EscalationRule::ManyFiles,
                EscalationRule::BlockLabel,
            ],
        }
    }

    /// Add an escalation rule at the end of the list.
    pub fn with_escalation(mut self, rule: EscalationRule) -> Self {
        self.escalations.push(rule);
        self
    }
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Which rule fired and what it contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub level: RiskLevel,
    pub reason: String,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
}

/// Inputs shared by every rule.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub change_set: &'a ChangeSet,
    pub sections: &'a SectionCheckResult,
    pub thresholds: &'a RiskThresholds,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Classify with the standard rule lists.
pub fn classify(
    change_set: &ChangeSet,
    sections: &SectionCheckResult,
    thresholds: &RiskThresholds,
) -> Classification {
    classify_with(
        &ClassifierRules::standard(),
        ClassifierInput {
            change_set,
            sections,
            thresholds,
        },
    )
}

/// Classify with explicit rule lists. Total: always yields exactly one level.
///
/// An empty baseline list behaves like `Fallback`.
pub fn classify_with(rules: &ClassifierRules, input: ClassifierInput<'_>) -> Classification {
    let baseline = rules
        .baseline
        .iter()
        .find_map(|rule| check_baseline(*rule, &input))
        .unwrap_or_else(|| fallback(&input));

    let mut level = baseline.level;
    let mut reasons = vec![baseline.reason];

    for rule in &rules.escalations {
        if let Some(finding) = check_escalation(*rule, &input) {
            level = level.max(finding.level);
            reasons.push(finding.reason);
        }
    }

    Classification {
        risk_level: level,
        reasons,
    }
}

fn check_baseline(rule: BaselineRule, input: &ClassifierInput<'_>) -> Option<Finding> {
    let cs = input.change_set;
    let t = input.thresholds;
    match rule {
        BaselineRule::EmptyOrDocsOnly => {
            if cs.is_empty() {
                Some(Finding {
                    level: RiskLevel::L0,
                    reason: "no files changed".to_string(),
                })
            } else if cs.docs_only {
                Some(Finding {
                    level: RiskLevel::L0,
                    reason: format!("docs-only change ({} files)", cs.file_count),
                })
            } else {
                None
            }
        }
        BaselineRule::SmallChange => {
            if cs.file_count <= t.small_change_max_files
                && cs.changed_lines() <= t.small_change_max_lines
            {
                Some(Finding {
                    level: RiskLevel::L1,
                    reason: format!(
                        "small change: {} files, {} lines (limits {} files, {} lines)",
                        cs.file_count,
                        cs.changed_lines(),
                        t.small_change_max_files,
                        t.small_change_max_lines,
                    ),
                })
            } else {
                None
            }
        }
        BaselineRule::Fallback => Some(fallback(input)),
    }
}

fn fallback(input: &ClassifierInput<'_>) -> Finding {
    let cs = input.change_set;
    Finding {
        level: RiskLevel::L2,
        reason: format!(
            "non-trivial change: {} files, {} lines",
            cs.file_count,
            cs.changed_lines()
        ),
    }
}

fn check_escalation(rule: EscalationRule, input: &ClassifierInput<'_>) -> Option<Finding> {
    let cs = input.change_set;
    let t = input.thresholds;
    match rule {
        EscalationRule::ProtectedPath => {
            let first = cs.first_protected_match()?;
            match cs.first_high_sensitivity_match() {
                Some(hs) if hs == first => Some(Finding {
                    level: RiskLevel::L3,
                    reason: format!(
                        "touches high-sensitivity path: {} (pattern '{}')",
                        first.path, first.pattern
                    ),
                }),
                Some(hs) => Some(Finding {
                    level: RiskLevel::L3,
                    reason: format!(
                        "touches protected path: {} (pattern '{}'); high-sensitivity: {} (pattern '{}')",
                        first.path, first.pattern, hs.path, hs.pattern
                    ),
                }),
                None => Some(Finding {
                    level: RiskLevel::L2,
                    reason: format!(
                        "touches protected path: {} (pattern '{}')",
                        first.path, first.pattern
                    ),
                }),
            }
        }
        EscalationRule::MissingSections => {
            if input.sections.is_complete() {
                None
            } else {
                Some(Finding {
                    level: RiskLevel::L1,
                    reason: format!(
                        "missing PR sections: {}",
                        input.sections.missing_sections.join(", ")
                    ),
                })
            }
        }
        EscalationRule::LargeChange => {
            if cs.changed_lines() > t.large_change_lines {
                Some(Finding {
                    level: RiskLevel::L2,
                    reason: format!(
                        "large change: {} lines > {}",
                        cs.changed_lines(),
                        t.large_change_lines
                    ),
                })
            } else {
                None
            }
        }
        EscalationRule::ManyFiles => {
            if cs.file_count > t.large_change_files {
                Some(Finding {
                    level: RiskLevel::L2,
                    reason: format!(
                        "too many files changed: {} > {}",
                        cs.file_count, t.large_change_files
                    ),
                })
            } else {
                None
            }
        }
        EscalationRule::BlockLabel => {
            if cs.blocking_labels.is_empty() {
                None
            } else {
                Some(Finding {
                    level: RiskLevel::L3,
                    reason: format!("blocked by label: {}", cs.blocking_labels.join(", ")),
                })
            }
        }
    }
}
