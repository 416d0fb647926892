//! Risk levels used to gate automatic merging.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StewardError;

/// Blast-radius classification of a change, ordered lowest to highest.
///
/// The derived `Ord` is the escalation order: classifier rules can only move
/// a PR towards `L3`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Trivial, no logic change (docs, empty diff).
    L0,
    /// Small, tested, localized.
    L1,
    /// Cross-cutting or unreviewed.
    L2,
    /// Security-sensitive, irreversible, or architectural.
    L3,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [RiskLevel::L0, RiskLevel::L1, RiskLevel::L2, RiskLevel::L3];

    /// The label applied to a PR classified at this level.
    pub fn label(self) -> String {
        format!("risk-{self}")
    }

    /// Whether `label` is any risk label managed by the steward.
    pub fn is_risk_label(label: &str) -> bool {
        label
            .strip_prefix("risk-")
            .is_some_and(|rest| rest.parse::<RiskLevel>().is_ok())
    }

    /// Medium and high risk changes get a rollback question in the packet.
    pub fn needs_rollback_plan(self) -> bool {
        matches!(self, Self::L2 | Self::L3)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::L0 => "L0",
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RiskLevel {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L0" => Ok(Self::L0),
            "L1" => Ok(Self::L1),
            "L2" => Ok(Self::L2),
            "L3" => Ok(Self::L3),
            other => Err(StewardError::Configuration(format!(
                "unknown risk level '{other}' (expected L0..L3)"
            ))),
        }
    }
}
