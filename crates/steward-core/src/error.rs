//! Error taxonomy for the steward core.
//!
//! The classification pipeline itself is total and never returns these;
//! they surface from policy loading and from parsing external inputs.

/// Errors produced while loading inputs for the decision engine.
#[derive(Debug, thiserror::Error)]
pub enum StewardError {
    /// Policy file is missing, unreadable, malformed, or fails validation.
    /// Fatal: a run must abort before evaluating any PR.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single input record could not be understood. Callers degrade by
    /// rejecting only the offending record.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The run's role does not permit the requested operation.
    #[error("role '{role}' cannot {action}; run as supervisor")]
    RoleNotPermitted { role: String, action: String },

    #[error("invalid repository reference '{0}': expected owner/name")]
    InvalidRepo(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for steward core operations.
pub type Result<T> = std::result::Result<T, StewardError>;
