//! Read-only pull-request snapshot consumed by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One changed file as reported by the hosting platform.
///
/// Counts are signed so that malformed upstream data deserializes instead of
/// failing the whole snapshot; the analyzer clamps them to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
}

impl FileChange {
    pub fn new(path: impl Into<String>, additions: i64, deletions: i64) -> Self {
        Self {
            path: path.into(),
            additions,
            deletions,
        }
    }
}

/// Combined commit status for the PR head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiState {
    Success,
    Pending,
    Neutral,
    #[default]
    None,
    Failure,
    Error,
}

impl CiState {
    /// Parse a platform status string; unknown values count as `None`.
    pub fn from_platform(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "pending" => Self::Pending,
            "neutral" => Self::Neutral,
            "failure" => Self::Failure,
            "error" => Self::Error,
            _ => Self::None,
        }
    }

    pub fn is_passing(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failing(self) -> bool {
        matches!(self, Self::Failure | Self::Error)
    }
}

impl std::fmt::Display for CiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Pending => "pending",
            Self::Neutral => "neutral",
            Self::None => "none",
            Self::Failure => "failure",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// CI status supplied by the caller; the engine never computes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CiStatus {
    pub passing: bool,
    #[serde(default)]
    pub state: CiState,
}

impl CiStatus {
    pub fn from_state(state: CiState) -> Self {
        Self {
            passing: state.is_passing(),
            state,
        }
    }

    pub fn passing() -> Self {
        Self::from_state(CiState::Success)
    }

    pub fn failing() -> Self {
        Self::from_state(CiState::Failure)
    }

    /// State consistent with `passing`, which is authoritative. A passing
    /// status reads as `Success` whatever state came with it; a non-passing
    /// one never does.
    pub fn effective_state(&self) -> CiState {
        match (self.passing, self.state) {
            (true, _) => CiState::Success,
            (false, CiState::Success) => CiState::None,
            (false, state) => state,
        }
    }
}

/// Everything the engine needs to know about one PR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrSnapshot {
    /// PR number.
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Narrative body; `None` when the PR has no description.
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changed_files: Vec<FileChange>,
    #[serde(default)]
    pub ci: CiStatus,
}

impl PrSnapshot {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            title: String::new(),
            url: String::new(),
            body: None,
            author: None,
            labels: Vec::new(),
            draft: false,
            created_at: None,
            changed_files: Vec::new(),
            ci: CiStatus::default(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_file(mut self, path: &str, additions: i64, deletions: i64) -> Self {
        self.changed_files
            .push(FileChange::new(path, additions, deletions));
        self
    }

    pub fn with_ci(mut self, ci: CiStatus) -> Self {
        self.ci = ci;
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_snapshot_deserializes() {
        let json = r#"{"id": 7, "changed_files": [{"path": "src/a.rs", "additions": 3}]}"#;
        let snap: PrSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.id, 7);
        assert_eq!(snap.body, None);
        assert_eq!(snap.changed_files[0].deletions, 0);
        assert!(!snap.ci.passing);
        assert_eq!(snap.ci.state, CiState::None);
    }

    #[test]
    fn test_negative_counts_deserialize() {
        let json = r#"{"path": "x", "additions": -4, "deletions": 2}"#;
        let f: FileChange = serde_json::from_str(json).unwrap();
        assert_eq!(f.additions, -4);
    }

    #[test]
    fn test_ci_state_from_platform() {
        assert_eq!(CiState::from_platform("SUCCESS"), CiState::Success);
        assert_eq!(CiState::from_platform("error"), CiState::Error);
        assert_eq!(CiState::from_platform("weird"), CiState::None);
        assert!(CiState::Failure.is_failing());
        assert!(!CiState::Pending.is_passing());
    }

    #[test]
    fn test_effective_state_follows_passing_flag() {
        let only_flag: CiStatus = serde_json::from_str(r#"{"passing": true}"#).unwrap();
        assert_eq!(only_flag.state, CiState::None);
        assert_eq!(only_flag.effective_state(), CiState::Success);

        let contradictory = CiStatus {
            passing: false,
            state: CiState::Success,
        };
        assert_eq!(contradictory.effective_state(), CiState::None);
        assert_eq!(CiStatus::failing().effective_state(), CiState::Failure);
    }
}
