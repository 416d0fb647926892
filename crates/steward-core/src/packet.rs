//! Meeting packet: a markdown report over every open PR's verdict.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::change_set::analyze;
use crate::policy::PolicyConfig;
use crate::risk::RiskLevel;
use crate::snapshot::{CiState, PrSnapshot};
use crate::verdict::Verdict;

/// Evaluated PR as shown in the packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketItem {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    pub draft: bool,
    pub labels: Vec<String>,
    pub ci_state: CiState,
    pub files_changed: usize,
    pub additions: u64,
    pub deletions: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub risk_level: RiskLevel,
    pub risk_reasons: Vec<String>,
    pub missing_sections: Vec<String>,
    pub dependencies: Vec<u64>,
    pub questions: Vec<String>,
}

impl PacketItem {
    /// Build an item from a snapshot and its verdict.
    pub fn new(snapshot: &PrSnapshot, verdict: &Verdict, policy: &PolicyConfig) -> Self {
        let change_set = analyze(&snapshot.changed_files, &snapshot.labels, policy);
        let dependencies = detect_dependencies(snapshot.body.as_deref().unwrap_or_default());
        let ci_state = snapshot.ci.effective_state();
        let questions = build_questions(
            &verdict.missing_sections,
            ci_state,
            verdict.risk_level,
            &dependencies,
        );
        Self {
            number: snapshot.id,
            title: snapshot.title.clone(),
            url: snapshot.url.clone(),
            author: snapshot.author.clone(),
            draft: snapshot.draft,
            labels: snapshot.labels.clone(),
            ci_state,
            files_changed: change_set.file_count,
            additions: change_set.total_additions,
            deletions: change_set.total_deletions,
            created_at: snapshot.created_at,
            risk_level: verdict.risk_level,
            risk_reasons: verdict.reasons.clone(),
            missing_sections: verdict.missing_sections.clone(),
            dependencies,
            questions,
        }
    }

    pub fn changed_lines(&self) -> u64 {
        self.additions.saturating_add(self.deletions)
    }
}

/// One row of the packet: an evaluated PR, a PR whose data could not be
/// fetched, or a PR skipped because the run was cancelled first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PacketEntry {
    Evaluated(PacketItem),
    EvaluationFailed {
        number: u64,
        title: String,
        url: String,
        error: String,
    },
    Cancelled {
        number: u64,
    },
}

impl PacketEntry {
    pub fn number(&self) -> u64 {
        match self {
            Self::Evaluated(item) => item.number,
            Self::EvaluationFailed { number, .. } | Self::Cancelled { number } => *number,
        }
    }
}

fn dependency_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:depends on|blocked by|after)\s*#(\d+)").ok())
        .as_ref()
}

/// PR numbers declared as dependencies in `body`, sorted and deduplicated.
pub fn detect_dependencies(body: &str) -> Vec<u64> {
    let Some(re) = dependency_regex() else {
        return Vec::new();
    };
    let mut numbers: Vec<u64> = re
        .captures_iter(body)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect();
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}

/// Follow-up questions for the PR author.
pub fn build_questions(
    missing_sections: &[String],
    ci_state: CiState,
    risk: RiskLevel,
    dependencies: &[u64],
) -> Vec<String> {
    let mut questions: Vec<String> = missing_sections
        .iter()
        .map(|s| format!("Please add the missing PR section: {s}."))
        .collect();

    if ci_state.is_failing() {
        questions.push("CI is failing. What is the fix plan and ETA?".to_string());
    } else if !ci_state.is_passing() {
        questions.push("CI has not passed yet. Can you post expected checks/results?".to_string());
    }

    if risk.needs_rollback_plan() {
        questions.push(
            "This change is medium/high risk. Please clarify rollback and verification steps."
                .to_string(),
        );
    }

    if !dependencies.is_empty() {
        let refs: Vec<String> = dependencies.iter().map(|n| format!("#{n}")).collect();
        questions.push(format!(
            "Dependency noted ({}). Confirm merge ordering constraints.",
            refs.join(", ")
        ));
    }
    questions
}

fn merge_order(a: &PacketItem, b: &PacketItem) -> Ordering {
    // Unknown creation time sorts after any known one.
    let created = match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    a.risk_level
        .cmp(&b.risk_level)
        .then(a.changed_lines().cmp(&b.changed_lines()))
        .then(created)
        .then(a.number.cmp(&b.number))
}

/// Evaluated PRs sorted by risk, then changed lines, then creation time,
/// then PR number. Failed and cancelled entries are left out.
pub fn recommended_order(entries: &[PacketEntry]) -> Vec<&PacketItem> {
    let mut items: Vec<&PacketItem> = entries
        .iter()
        .filter_map(|e| match e {
            PacketEntry::Evaluated(item) => Some(item),
            PacketEntry::EvaluationFailed { .. } | PacketEntry::Cancelled { .. } => None,
        })
        .collect();
    items.sort_by(|a, b| merge_order(a, b));
    items
}

fn summary_line<K: std::fmt::Display>(counts: &BTreeMap<K, usize>) -> String {
    counts
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render the packet as markdown.
pub fn render_packet(repo: &str, entries: &[PacketEntry], generated_at: DateTime<Utc>) -> String {
    let mut ci_counts: BTreeMap<CiState, usize> = BTreeMap::new();
    let mut risk_counts: BTreeMap<RiskLevel, usize> = BTreeMap::new();
    let mut failed = 0usize;
    let mut cancelled = 0usize;
    for entry in entries {
        match entry {
            PacketEntry::Evaluated(item) => {
                *ci_counts.entry(item.ci_state).or_default() += 1;
                *risk_counts.entry(item.risk_level).or_default() += 1;
            }
            PacketEntry::EvaluationFailed { .. } => failed += 1,
            PacketEntry::Cancelled { .. } => cancelled += 1,
        }
    }

    let mut lines: Vec<String> = vec![
        "# Meeting Packet".to_string(),
        String::new(),
        format!("- Repo: `{repo}`"),
        format!("- Generated: {}", generated_at.format("%Y-%m-%d %H:%M UTC")),
        format!("- Open PRs: {}", entries.len()),
    ];
    if failed > 0 {
        lines.push(format!("- Evaluation failures: {failed}"));
    }
    if cancelled > 0 {
        lines.push(format!("- Not evaluated (cancelled): {cancelled}"));
    }
    lines.push(String::new());

    if ci_counts.is_empty() {
        lines.push("- CI Summary: n/a".to_string());
        lines.push("- Risk Summary: n/a".to_string());
    } else {
        lines.push(format!("- CI Summary: {}", summary_line(&ci_counts)));
        lines.push(format!("- Risk Summary: {}", summary_line(&risk_counts)));
    }

    lines.push(String::new());
    lines.push("## PR Details".to_string());
    lines.push(String::new());

    if entries.is_empty() {
        lines.push("No open PRs.".to_string());
    } else {
        let mut by_number: Vec<&PacketEntry> = entries.iter().collect();
        by_number.sort_by_key(|e| e.number());
        for entry in by_number {
            match entry {
                PacketEntry::Evaluated(it) => render_item(&mut lines, it),
                PacketEntry::EvaluationFailed {
                    number,
                    title,
                    url,
                    error,
                } => {
                    lines.push(format!("### #{number} - {title}"));
                    lines.push(format!("- URL: {url}"));
                    lines.push(format!("- **Evaluation failed**: {error}"));
                    lines.push("- Excluded from the merge order.".to_string());
                }
                PacketEntry::Cancelled { number } => {
                    lines.push(format!("### #{number}"));
                    lines.push("- **Cancelled before evaluation**".to_string());
                    lines.push("- Excluded from the merge order.".to_string());
                }
            }
            lines.push(String::new());
        }
    }

    lines.push("## Recommended Merge Order".to_string());
    lines.push(String::new());
    let ordered = recommended_order(entries);
    if ordered.is_empty() {
        lines.push("No merge candidates.".to_string());
    } else {
        for (i, it) in ordered.iter().enumerate() {
            lines.push(format!(
                "{}. #{} ({}, ci={}, diff={} files, +{}/-{})",
                i + 1,
                it.number,
                it.risk_level,
                it.ci_state,
                it.files_changed,
                it.additions,
                it.deletions
            ));
        }
    }

    lines.push(String::new());
    lines.push("## Next Actions (suggested)".to_string());
    lines.push(String::new());
    lines.push("- Resolve all failing/pending CI checks before merge decisions.".to_string());
    lines.push("- Require missing PR template sections to be filled.".to_string());
    lines.push(
        "- Merge low-risk, green PRs first unless dependency constraints override.".to_string(),
    );

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn render_item(lines: &mut Vec<String>, it: &PacketItem) {
    let reasons = if it.risk_reasons.is_empty() {
        "n/a".to_string()
    } else {
        it.risk_reasons.join("; ")
    };
    let missing = if it.missing_sections.is_empty() {
        "none".to_string()
    } else {
        it.missing_sections.join(", ")
    };

    lines.push(format!("### #{} - {}", it.number, it.title));
    lines.push(format!("- URL: {}", it.url));
    lines.push(format!(
        "- Author: @{}",
        it.author.as_deref().unwrap_or("unknown")
    ));
    lines.push(format!("- Draft: {}", if it.draft { "yes" } else { "no" }));
    lines.push(format!("- CI: `{}`", it.ci_state));
    lines.push(format!("- Risk: **{}** ({reasons})", it.risk_level));
    lines.push(format!(
        "- Diff: {} files, +{} / -{}",
        it.files_changed, it.additions, it.deletions
    ));
    lines.push(format!("- Missing sections: {missing}"));
    if !it.labels.is_empty() {
        let labels: Vec<String> = it.labels.iter().map(|l| format!("`{l}`")).collect();
        lines.push(format!("- Labels: {}", labels.join(", ")));
    }
    if !it.questions.is_empty() {
        lines.push("- Questions:".to_string());
        for q in &it.questions {
            lines.push(format!("  - {q}"));
        }
    }
}
