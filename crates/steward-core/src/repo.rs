//! Repository references accepted on the command line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StewardError;

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`, `https://github.com/owner/name[.git]` or
    /// `git@github.com:owner/name.git`.
    pub fn parse(raw: &str) -> Result<Self, StewardError> {
        let s = raw.trim();
        let s = s
            .strip_prefix("https://github.com/")
            .or_else(|| s.strip_prefix("http://github.com/"))
            .or_else(|| s.strip_prefix("git@github.com:"))
            .unwrap_or(s);
        let s = s.strip_suffix(".git").unwrap_or(s).trim_end_matches('/');

        let (owner, name) = s
            .split_once('/')
            .ok_or_else(|| StewardError::InvalidRepo(raw.to_string()))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(StewardError::InvalidRepo(raw.to_string()));
        }
        Ok(Self::new(owner, name))
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
