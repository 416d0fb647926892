//! Repository policy configuration.
//!
//! Loaded once per process from a YAML file (`.supervisor-agent.yml` by
//! default) and shared read-only for the whole run. Unknown keys, unknown
//! risk levels and unsafe auto-merge levels are configuration errors; a bad
//! glob only drops that glob and leaves a diagnostic behind.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StewardError};
use crate::pattern::{PathPattern, PatternList};
use crate::risk::RiskLevel;

/// Default location of the policy file, relative to the repository root.
pub const DEFAULT_POLICY_PATH: &str = ".supervisor-agent.yml";

/// Whether eligible PRs get auto-merge enabled or only a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    #[default]
    AutoMerge,
    RecommendOnly,
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoMerge => write!(f, "auto_merge"),
            Self::RecommendOnly => write!(f, "recommend_only"),
        }
    }
}

/// A required narrative section and the heading tokens that satisfy it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Name reported in `missing_sections`.
    pub name: String,
    /// Lowercase tokens; a heading containing any of them satisfies the section.
    pub aliases: Vec<String>,
}

/// Extra tokens accepted for well-known section names.
const KNOWN_ALIASES: &[(&str, &[&str])] = &[
    ("test plan", &["tests", "testing"]),
    ("docs", &["documentation"]),
];

impl SectionSpec {
    /// Derive aliases from the section name: the name itself, each
    /// `/`-separated part, and the name with whitespace removed.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_string();
        let lower = name.to_lowercase();
        let mut aliases: Vec<String> = Vec::new();
        let mut push = |alias: String| {
            let alias = alias.trim().to_string();
            if !alias.is_empty() && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        };

        push(lower.clone());
        if lower.contains('/') {
            for part in lower.split('/') {
                push(part.to_string());
            }
        }
        if lower.contains(char::is_whitespace) {
            push(lower.split_whitespace().collect::<String>());
        }
        for (key, extra) in KNOWN_ALIASES {
            if lower.split('/').any(|part| part.trim() == *key) {
                for alias in *extra {
                    push(alias.to_string());
                }
            }
        }

        Self { name, aliases }
    }

    /// Use explicit aliases; the lowercased name is always accepted too.
    pub fn with_aliases(name: &str, aliases: &[String]) -> Self {
        let mut spec = Self {
            name: name.trim().to_string(),
            aliases: vec![name.trim().to_lowercase()],
        };
        for alias in aliases {
            let alias = alias.trim().to_lowercase();
            if !alias.is_empty() && !spec.aliases.contains(&alias) {
                spec.aliases.push(alias);
            }
        }
        spec
    }
}

/// Maps a glob to the reviewers that own the matched area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerRule {
    pub pattern: PathPattern,
    pub reviewers: Vec<String>,
}

impl ReviewerRule {
    pub fn new(pattern: PathPattern, reviewers: Vec<String>) -> Self {
        Self { pattern, reviewers }
    }

    /// Parse the persisted `glob=reviewer1,reviewer2` form.
    ///
    /// Handles are trimmed and a leading `@` is dropped.
    pub fn parse(raw: &str) -> Result<Self> {
        let (glob, handles) = raw.split_once('=').ok_or_else(|| {
            StewardError::MalformedInput(format!(
                "reviewer rule '{raw}' must look like glob=reviewer1,reviewer2"
            ))
        })?;
        let pattern = PathPattern::new(glob)?;
        let mut reviewers: Vec<String> = Vec::new();
        for handle in handles.split(',') {
            let handle = handle.trim().trim_start_matches('@');
            if !handle.is_empty() && !reviewers.iter().any(|r| r == handle) {
                reviewers.push(handle.to_string());
            }
        }
        if reviewers.is_empty() {
            return Err(StewardError::MalformedInput(format!(
                "reviewer rule '{raw}' names no reviewers"
            )));
        }
        Ok(Self { pattern, reviewers })
    }
}

/// Size thresholds for baseline and escalation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// A change is "small" when it touches at most this many files...
    pub small_change_max_files: usize,
    /// ...and at most this many changed lines.
    pub small_change_max_lines: u64,
    /// More changed lines than this escalates to at least `L2`.
    pub large_change_lines: u64,
    /// More files than this escalates to at least `L2`.
    pub large_change_files: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            small_change_max_files: 5,
            small_change_max_lines: 80,
            large_change_lines: 500,
            large_change_files: 20,
        }
    }
}

/// Immutable policy for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyConfig {
    pub merge_mode: MergeMode,
    pub auto_merge_levels: BTreeSet<RiskLevel>,
    /// Any match escalates to at least `L2`.
    pub protected_paths: PatternList,
    /// Subset of `protected_paths` that escalates to `L3`.
    pub high_sensitivity_paths: PatternList,
    pub required_sections: Vec<SectionSpec>,
    pub reviewer_rules: Vec<ReviewerRule>,
    /// Files matching these count as documentation-only.
    pub docs_paths: PatternList,
    /// Labels that force `L3`.
    pub block_labels: Vec<String>,
    pub thresholds: RiskThresholds,
    /// Non-fatal problems found while loading (dropped globs and rules).
    pub diagnostics: Vec<String>,
}

const DEFAULT_PROTECTED_PATHS: &[&str] = &["Dockerfile", "docker-compose.*", "**/migrations/**"];

const DEFAULT_HIGH_SENSITIVITY_PATHS: &[&str] = &[
    ".github/workflows/**",
    "**/auth/**",
    "**/security/**",
    "**/credentials/**",
    "**/secrets/**",
    "**/deploy/**",
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
];

const DEFAULT_DOCS_PATHS: &[&str] = &["docs/**", "doc/**", "**/*.md", "**/*.txt", "**/*.rst"];

const DEFAULT_REQUIRED_SECTIONS: &[&str] =
    &["Intent", "Approach", "Risk/Impact", "Test Plan", "Docs/Notes"];

const DEFAULT_BLOCK_LABELS: &[&str] = &["do-not-merge", "WIP", "blocked", "needs-human"];

impl Default for PolicyConfig {
    fn default() -> Self {
        let (high_sensitivity_paths, _) =
            PatternList::compile_lenient(DEFAULT_HIGH_SENSITIVITY_PATHS);
        let (mut protected_paths, _) = PatternList::compile_lenient(DEFAULT_HIGH_SENSITIVITY_PATHS);
        let (extra, _) = PatternList::compile_lenient(DEFAULT_PROTECTED_PATHS);
        for p in &extra {
            protected_paths.push(p.clone());
        }
        let (docs_paths, _) = PatternList::compile_lenient(DEFAULT_DOCS_PATHS);

        Self {
            merge_mode: MergeMode::AutoMerge,
            auto_merge_levels: [RiskLevel::L0, RiskLevel::L1].into_iter().collect(),
            protected_paths,
            high_sensitivity_paths,
            required_sections: DEFAULT_REQUIRED_SECTIONS
                .iter()
                .map(|s| SectionSpec::from_name(s))
                .collect(),
            reviewer_rules: Vec::new(),
            docs_paths,
            block_labels: DEFAULT_BLOCK_LABELS.iter().map(|s| s.to_string()).collect(),
            thresholds: RiskThresholds::default(),
            diagnostics: Vec::new(),
        }
    }
}

/// Required-section entry as written in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SectionEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        aliases: Vec<String>,
    },
}

/// On-disk shape of the policy. Absent keys fall back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    merge_mode: Option<MergeMode>,
    auto_merge_levels: Option<Vec<String>>,
    protected_paths: Option<Vec<String>>,
    high_sensitivity_paths: Option<Vec<String>>,
    required_sections: Option<Vec<SectionEntry>>,
    reviewer_rules: Option<Vec<String>>,
    docs_paths: Option<Vec<String>>,
    block_labels: Option<Vec<String>>,
    small_change_max_files: Option<usize>,
    small_change_max_lines: Option<u64>,
    large_change_lines: Option<u64>,
    large_change_files: Option<usize>,
}

impl PolicyConfig {
    /// Load and validate the policy file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StewardError::Configuration(format!("cannot read policy file {}: {e}", path.display()))
        })?;
        let policy = Self::from_yaml_str(&text).map_err(|e| match e {
            StewardError::Configuration(msg) => {
                StewardError::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        tracing::info!(
            path = %path.display(),
            merge_mode = %policy.merge_mode,
            protected = policy.protected_paths.len(),
            reviewer_rules = policy.reviewer_rules.len(),
            diagnostics = policy.diagnostics.len(),
            "policy loaded"
        );
        Ok(policy)
    }

    /// Parse and validate a YAML policy document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: PolicyFile = if text.trim().is_empty() {
            PolicyFile::default()
        } else {
            serde_yaml::from_str(text)
                .map_err(|e| StewardError::Configuration(format!("malformed policy: {e}")))?
        };
        Self::from_file(file)
    }

    fn from_file(file: PolicyFile) -> Result<Self> {
        let mut policy = Self::default();
        let mut diagnostics = Vec::new();

        if let Some(mode) = file.merge_mode {
            policy.merge_mode = mode;
        }

        if let Some(levels) = file.auto_merge_levels {
            policy.auto_merge_levels = levels
                .iter()
                .map(|l| l.parse::<RiskLevel>())
                .collect::<Result<BTreeSet<_>>>()?;
        }

        if let Some(raw) = file.high_sensitivity_paths {
            let (list, diags) = PatternList::compile_lenient(&raw);
            policy.high_sensitivity_paths = list;
            diagnostics.extend(diags);
        }

        if let Some(raw) = file.protected_paths {
            let (list, diags) = PatternList::compile_lenient(&raw);
            policy.protected_paths = list;
            diagnostics.extend(diags);
        }
        // High-sensitivity patterns are always protected.
        for p in policy.high_sensitivity_paths.clone().iter() {
            if !policy.protected_paths.contains_source(p.as_str()) {
                policy.protected_paths.push(p.clone());
            }
        }

        if let Some(entries) = file.required_sections {
            policy.required_sections = entries
                .into_iter()
                .filter_map(|entry| match entry {
                    SectionEntry::Name(name) if name.trim().is_empty() => None,
                    SectionEntry::Name(name) => Some(SectionSpec::from_name(&name)),
                    SectionEntry::Detailed { name, aliases } => {
                        Some(SectionSpec::with_aliases(&name, &aliases))
                    }
                })
                .collect();
        }

        if let Some(raw) = file.reviewer_rules {
            for item in raw {
                match ReviewerRule::parse(&item) {
                    Ok(rule) => policy.reviewer_rules.push(rule),
                    Err(e) => {
                        tracing::warn!(rule = %item, error = %e, "dropping reviewer rule");
                        diagnostics.push(e.to_string());
                    }
                }
            }
        }

        if let Some(raw) = file.docs_paths {
            let (list, diags) = PatternList::compile_lenient(&raw);
            policy.docs_paths = list;
            diagnostics.extend(diags);
        }

        if let Some(labels) = file.block_labels {
            policy.block_labels = labels
                .into_iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
        }

        let t = &mut policy.thresholds;
        if let Some(v) = file.small_change_max_files {
            t.small_change_max_files = v;
        }
        if let Some(v) = file.small_change_max_lines {
            t.small_change_max_lines = v;
        }
        if let Some(v) = file.large_change_lines {
            t.large_change_lines = v;
        }
        if let Some(v) = file.large_change_files {
            t.large_change_files = v;
        }

        policy.diagnostics = diagnostics;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject policies that would make the engine unsafe or incoherent.
    pub fn validate(&self) -> Result<()> {
        if self.auto_merge_levels.contains(&RiskLevel::L3) {
            return Err(StewardError::Configuration(
                "auto_merge_levels must not include L3".to_string(),
            ));
        }
        let t = &self.thresholds;
        if t.small_change_max_lines > t.large_change_lines {
            return Err(StewardError::Configuration(format!(
                "small_change_max_lines ({}) exceeds large_change_lines ({})",
                t.small_change_max_lines, t.large_change_lines
            )));
        }
        if t.small_change_max_files > t.large_change_files {
            return Err(StewardError::Configuration(format!(
                "small_change_max_files ({}) exceeds large_change_files ({})",
                t.small_change_max_files, t.large_change_files
            )));
        }
        Ok(())
    }

    /// Whether `pattern` belongs to the high-sensitivity subset.
    pub fn is_high_sensitivity(&self, pattern: &PathPattern) -> bool {
        self.high_sensitivity_paths.contains_source(pattern.as_str())
    }

    /// Default policy path joined onto `root`.
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(DEFAULT_POLICY_PATH)
    }
}
