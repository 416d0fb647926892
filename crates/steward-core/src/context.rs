//! Per-run context passed explicitly through batch operations.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StewardError};
use crate::repo::RepoRef;

/// Which side of the contribution loop a run acts for.
///
/// A supervisor labels, comments on and merges PRs, imports tasks and
/// dispatches work. A contributor only reads: evaluations and packets work,
/// mutations are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Supervisor,
    Contributor,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Supervisor => write!(f, "supervisor"),
            Self::Contributor => write!(f, "contributor"),
        }
    }
}

impl FromStr for Role {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supervisor" => Ok(Self::Supervisor),
            "contributor" => Ok(Self::Contributor),
            other => Err(StewardError::Configuration(format!(
                "unknown role '{other}', expected supervisor or contributor"
            ))),
        }
    }
}

/// Identity and mode of one run. Several contexts can be live in one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub repo: RepoRef,
    pub role: Role,
    /// When set, no mutation reaches the hosting platform.
    pub dry_run: bool,
}

impl RunContext {
    pub fn new(repo: RepoRef) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            repo,
            role: Role::default(),
            dry_run: false,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Whether mutations may reach the hosting platform in this run.
    pub fn can_mutate(&self) -> bool {
        self.role == Role::Supervisor && !self.dry_run
    }

    /// Fail unless this run acts as supervisor. Dry runs are always allowed.
    pub fn require_supervisor(&self, action: &str) -> Result<()> {
        if self.dry_run || self.role == Role::Supervisor {
            return Ok(());
        }
        Err(StewardError::RoleNotPermitted {
            role: self.role.to_string(),
            action: action.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_are_independent() {
        let a = RunContext::new(RepoRef::new("acme", "a")).with_dry_run(true);
        let b = RunContext::new(RepoRef::new("acme", "b")).with_role(Role::Contributor);
        assert_ne!(a.run_id, b.run_id);
        assert!(a.dry_run);
        assert!(!b.dry_run);
        assert_eq!(a.role, Role::Supervisor);
        assert_eq!(b.role.to_string(), "contributor");
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Contributor".parse::<Role>().unwrap(), Role::Contributor);
        assert_eq!(" supervisor ".parse::<Role>().unwrap(), Role::Supervisor);
        assert!("worker".parse::<Role>().is_err());
    }

    #[test]
    fn test_contributor_cannot_mutate() {
        let ctx = RunContext::new(RepoRef::new("acme", "a")).with_role(Role::Contributor);
        assert!(!ctx.can_mutate());
        let err = ctx.require_supervisor("apply verdicts").unwrap_err();
        assert!(err.to_string().contains("contributor"));
        assert!(err.to_string().contains("apply verdicts"));

        let dry = ctx.with_dry_run(true);
        assert!(!dry.can_mutate());
        assert!(dry.require_supervisor("apply verdicts").is_ok());

        let sup = RunContext::new(RepoRef::new("acme", "a"));
        assert!(sup.can_mutate());
        assert!(sup.require_supervisor("apply verdicts").is_ok());
    }
}
