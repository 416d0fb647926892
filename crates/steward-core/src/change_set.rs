//! Change-set analysis: size and shape facts derived from a PR's file list.

use serde::{Deserialize, Serialize};

use crate::policy::PolicyConfig;
use crate::snapshot::FileChange;

/// A changed file with non-negative counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub additions: u64,
    pub deletions: u64,
}

/// A protected pattern together with the first file that hit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedMatch {
    pub pattern: String,
    pub path: String,
    pub high_sensitivity: bool,
}

/// Derived per evaluation and never cached across PR updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub files: Vec<ChangedFile>,
    pub total_additions: u64,
    pub total_deletions: u64,
    pub file_count: usize,
    pub touches_protected_path: bool,
    /// One entry per matching protected pattern, in policy order.
    pub protected_matches: Vec<ProtectedMatch>,
    /// Every file is documentation by path convention (false when empty).
    pub docs_only: bool,
    /// PR labels that the policy treats as merge blockers, in policy order.
    pub blocking_labels: Vec<String>,
}

impl ChangeSet {
    /// Additions plus deletions.
    pub fn changed_lines(&self) -> u64 {
        self.total_additions.saturating_add(self.total_deletions)
    }

    pub fn is_empty(&self) -> bool {
        self.file_count == 0
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> + Clone {
        self.files.iter().map(|f| f.path.as_str())
    }

    /// First protected match, i.e. the earliest pattern in policy order.
    pub fn first_protected_match(&self) -> Option<&ProtectedMatch> {
        self.protected_matches.first()
    }

    /// First high-sensitivity match in policy order.
    pub fn first_high_sensitivity_match(&self) -> Option<&ProtectedMatch> {
        self.protected_matches.iter().find(|m| m.high_sensitivity)
    }
}

/// Build a [`ChangeSet`] from raw file records and the PR's labels.
///
/// Negative counters are clamped to zero and repeated paths are merged, so a
/// sloppy upstream payload never blocks classification.
pub fn analyze(raw_files: &[FileChange], labels: &[String], policy: &PolicyConfig) -> ChangeSet {
    let mut files: Vec<ChangedFile> = Vec::with_capacity(raw_files.len());
    for raw in raw_files {
        let path = raw.path.trim().trim_start_matches("./").to_string();
        if path.is_empty() {
            tracing::debug!("skipping changed-file record with empty path");
            continue;
        }
        let additions = raw.additions.max(0) as u64;
        let deletions = raw.deletions.max(0) as u64;
        match files.iter_mut().find(|f| f.path == path) {
            Some(existing) => {
                existing.additions = existing.additions.saturating_add(additions);
                existing.deletions = existing.deletions.saturating_add(deletions);
            }
            None => files.push(ChangedFile {
                path,
                additions,
                deletions,
            }),
        }
    }

    let total_additions = files
        .iter()
        .fold(0u64, |acc, f| acc.saturating_add(f.additions));
    let total_deletions = files
        .iter()
        .fold(0u64, |acc, f| acc.saturating_add(f.deletions));

    let mut protected_matches = Vec::new();
    for pattern in &policy.protected_paths {
        if let Some(file) = files.iter().find(|f| pattern.matches(&f.path)) {
            protected_matches.push(ProtectedMatch {
                pattern: pattern.as_str().to_string(),
                path: file.path.clone(),
                high_sensitivity: policy.is_high_sensitivity(pattern),
            });
        }
    }

    let docs_only = !files.is_empty() && files.iter().all(|f| policy.docs_paths.matches(&f.path));

    let blocking_labels = policy
        .block_labels
        .iter()
        .filter(|b| labels.iter().any(|l| l.eq_ignore_ascii_case(b)))
        .cloned()
        .collect();

    ChangeSet {
        file_count: files.len(),
        touches_protected_path: !protected_matches.is_empty(),
        files,
        total_additions,
        total_deletions,
        protected_matches,
        docs_only,
        blocking_labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(items: &[(&str, i64, i64)]) -> Vec<FileChange> {
        items
            .iter()
            .map(|(p, a, d)| FileChange::new(*p, *a, *d))
            .collect()
    }

    #[test]
    fn test_empty_change_set() {
        let cs = analyze(&[], &[], &PolicyConfig::default());
        assert!(cs.is_empty());
        assert_eq!(cs.changed_lines(), 0);
        assert!(!cs.touches_protected_path);
        assert!(!cs.docs_only);
    }

    #[test]
    fn test_totals_and_clamping() {
        let cs = analyze(
            &files(&[("src/a.rs", 10, -3), ("src/b.rs", -1, 4)]),
            &[],
            &PolicyConfig::default(),
        );
        assert_eq!(cs.file_count, 2);
        assert_eq!(cs.total_additions, 10);
        assert_eq!(cs.total_deletions, 4);
        assert_eq!(cs.changed_lines(), 14);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let cs = analyze(
            &files(&[("src/a.rs", i64::MAX, i64::MAX), ("src/b.rs", i64::MAX, 1)]),
            &[],
            &PolicyConfig::default(),
        );
        assert_eq!(cs.total_additions, (i64::MAX as u64) * 2);
        assert_eq!(cs.changed_lines(), u64::MAX);

        let merged = analyze(
            &files(&[("src/a.rs", i64::MAX, 0), ("src/a.rs", i64::MAX, 0), ("src/a.rs", 5, 0)]),
            &[],
            &PolicyConfig::default(),
        );
        assert_eq!(merged.files[0].additions, u64::MAX);
    }

    #[test]
    fn test_repeated_paths_are_merged() {
        let cs = analyze(
            &files(&[("src/a.rs", 1, 0), ("./src/a.rs", 2, 1)]),
            &[],
            &PolicyConfig::default(),
        );
        assert_eq!(cs.file_count, 1);
        assert_eq!(cs.files[0].additions, 3);
        assert_eq!(cs.files[0].deletions, 1);
    }

    #[test]
    fn test_protected_matches_follow_policy_order() {
        let policy = PolicyConfig::from_yaml_str(
            "protected_paths: [\"Dockerfile\", \"src/**\"]\nhigh_sensitivity_paths: [\"src/auth/**\"]\n",
        )
        .unwrap();
        let cs = analyze(
            &files(&[("src/auth/login.rs", 5, 0), ("Dockerfile", 1, 1)]),
            &[],
            &policy,
        );
        assert!(cs.touches_protected_path);
        let patterns: Vec<&str> = cs
            .protected_matches
            .iter()
            .map(|m| m.pattern.as_str())
            .collect();
        assert_eq!(patterns, vec!["Dockerfile", "src/**", "src/auth/**"]);
        assert_eq!(cs.first_protected_match().unwrap().path, "Dockerfile");
        let hs = cs.first_high_sensitivity_match().unwrap();
        assert_eq!(hs.pattern, "src/auth/**");
        assert_eq!(hs.path, "src/auth/login.rs");
    }

    #[test]
    fn test_docs_only_detection() {
        let policy = PolicyConfig::default();
        let cs = analyze(
            &files(&[("README.md", 10, 2), ("docs/guide/setup.html", 5, 0)]),
            &[],
            &policy,
        );
        assert!(cs.docs_only);

        let cs = analyze(
            &files(&[("README.md", 10, 2), ("src/lib.rs", 1, 0)]),
            &[],
            &policy,
        );
        assert!(!cs.docs_only);
    }

    #[test]
    fn test_blocking_labels_case_insensitive() {
        let labels = vec!["wip".to_string(), "enhancement".to_string()];
        let cs = analyze(&[], &labels, &PolicyConfig::default());
        assert_eq!(cs.blocking_labels, vec!["WIP".to_string()]);
    }
}
