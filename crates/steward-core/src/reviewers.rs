//! Reviewer resolution from path-ownership rules.

use crate::policy::ReviewerRule;

/// Collect reviewers for the changed `paths`.
///
/// Every rule that matches at least one path contributes its handles, in rule
/// order; a handle already collected is skipped.
pub fn resolve_reviewers<'a, I>(paths: I, rules: &[ReviewerRule]) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: Clone,
{
    let paths = paths.into_iter();
    let mut reviewers: Vec<String> = Vec::new();
    for rule in rules {
        if !rule.pattern.matches_any(paths.clone()) {
            continue;
        }
        for handle in &rule.reviewers {
            if !reviewers.iter().any(|r| r == handle) {
                reviewers.push(handle.clone());
            }
        }
    }
    reviewers
}
