//! Shared glob matching for repository-relative paths.
//!
//! Protected paths, docs paths and reviewer rules all go through
//! [`PathPattern`] so wildcard semantics are identical everywhere:
//!
//! - `**` matches across `/` separators (including zero segments).
//! - `*` and `?` match within a single path segment.

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, StewardError};

/// A compiled glob pattern that remembers its source text.
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    matcher: GlobMatcher,
}

impl PathPattern {
    /// Compile `pattern`. An invalid glob is [`StewardError::MalformedInput`].
    pub fn new(pattern: &str) -> Result<Self> {
        let source = pattern.trim().to_string();
        if source.is_empty() {
            return Err(StewardError::MalformedInput(
                "empty glob pattern".to_string(),
            ));
        }
        let glob = GlobBuilder::new(&source)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|e| StewardError::MalformedInput(format!("invalid glob '{source}': {e}")))?;
        Ok(Self {
            matcher: glob.compile_matcher(),
            source,
        })
    }

    /// The pattern as written in the policy.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test a repository-relative, forward-slash separated path.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        self.matcher.is_match(path)
    }

    /// Whether any of `paths` matches.
    pub fn matches_any<'a, I>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().any(|p| self.matches(p))
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PathPattern {}

impl Serialize for PathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PathPattern::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Ordered list of patterns. Order matters for which pattern gets reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternList(Vec<PathPattern>);

impl PatternList {
    pub fn new(patterns: Vec<PathPattern>) -> Self {
        Self(patterns)
    }

    /// Compile every pattern, dropping invalid ones.
    ///
    /// Returns the list plus one diagnostic per rejected pattern so a single
    /// bad glob never takes the whole policy down.
    pub fn compile_lenient<S: AsRef<str>>(raw: &[S]) -> (Self, Vec<String>) {
        let mut patterns = Vec::with_capacity(raw.len());
        let mut diagnostics = Vec::new();
        for item in raw {
            match PathPattern::new(item.as_ref()) {
                Ok(p) => patterns.push(p),
                Err(e) => {
                    tracing::warn!(pattern = %item.as_ref(), error = %e, "dropping invalid glob");
                    diagnostics.push(e.to_string());
                }
            }
        }
        (Self(patterns), diagnostics)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathPattern> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_source(&self, source: &str) -> bool {
        self.0.iter().any(|p| p.as_str() == source)
    }

    pub fn push(&mut self, pattern: PathPattern) {
        self.0.push(pattern);
    }

    /// First pattern (in list order) matching `path`.
    pub fn first_match(&self, path: &str) -> Option<&PathPattern> {
        self.0.iter().find(|p| p.matches(path))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.first_match(path).is_some()
    }
}

impl<'a> IntoIterator for &'a PatternList {
    type Item = &'a PathPattern;
    type IntoIter = std::slice::Iter<'a, PathPattern>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(s: &str) -> PathPattern {
        PathPattern::new(s).unwrap()
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let p = pat(".github/workflows/**");
        assert!(p.matches(".github/workflows/ci.yml"));
        assert!(p.matches(".github/workflows/nested/release.yml"));
        assert!(!p.matches("src/index.ts"));
    }

    #[test]
    fn test_leading_double_star_matches_root() {
        let p = pat("**/auth/**");
        assert!(p.matches("auth/token.rs"));
        assert!(p.matches("src/auth/login.ts"));
        assert!(!p.matches("src/utils/auth_helper.ts"));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let p = pat("src/*.rs");
        assert!(p.matches("src/lib.rs"));
        assert!(!p.matches("src/nested/lib.rs"));
    }

    #[test]
    fn test_single_star_matches_dots() {
        let p = pat("docker-compose.*");
        assert!(p.matches("docker-compose.yml"));
        assert!(p.matches("docker-compose.override.yml"));
        assert!(!p.matches("deploy/docker-compose.yml"));
    }

    #[test]
    fn test_lockfile_patterns_do_not_catch_clock() {
        let p = pat("**/*.lock");
        assert!(p.matches("Cargo.lock"));
        assert!(p.matches("web/yarn.lock"));
        assert!(!p.matches("src/clock.ts"));
    }

    #[test]
    fn test_dot_slash_prefix_is_ignored() {
        assert!(pat("Dockerfile").matches("./Dockerfile"));
    }

    #[test]
    fn test_invalid_glob_is_malformed_input() {
        let err = PathPattern::new("src/[unclosed").unwrap_err();
        assert!(matches!(err, StewardError::MalformedInput(_)));
        assert!(PathPattern::new("   ").is_err());
    }

    #[test]
    fn test_compile_lenient_drops_bad_patterns() {
        let (list, diags) = PatternList::compile_lenient(&["docs/**", "a/[b", "**/*.md"]);
        assert_eq!(list.len(), 2);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].contains("a/[b"));
    }

    #[test]
    fn test_first_match_respects_order() {
        let (list, _) = PatternList::compile_lenient(&["src/**", "src/auth/**"]);
        let hit = list.first_match("src/auth/mod.rs").unwrap();
        assert_eq!(hit.as_str(), "src/**");
    }

    #[test]
    fn test_serde_as_string() {
        let p = pat("**/security/**");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"**/security/**\"");
        let back: PathPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<PathPattern>("\"[\"").is_err());
    }
}
