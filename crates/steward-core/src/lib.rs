//! PR Steward core library.
//!
//! Turns a pull-request snapshot plus a repository policy into a risk level,
//! a merge verdict and the minimal set of mutations needed to apply it.
//! Everything here is synchronous and free of I/O apart from policy and task
//! file loading; the hosting side lives in `steward-hosting`.

pub mod action_plan;
pub mod change_set;
pub mod classifier;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod packet;
pub mod pattern;
pub mod policy;
pub mod repo;
pub mod reviewers;
pub mod risk;
pub mod sections;
pub mod snapshot;
pub mod tasks;
pub mod telemetry;
pub mod verdict;

pub use action_plan::{
    plan_actions, render_comment, ActionPlan, CommentAction, ExistingComment, MutationStep,
    PrState, VERDICT_MARKER,
};
pub use change_set::{analyze, ChangeSet, ChangedFile, ProtectedMatch};
pub use classifier::{
    classify, classify_with, BaselineRule, Classification, ClassifierInput, ClassifierRules,
    EscalationRule,
};
pub use context::{Role, RunContext};
pub use dispatch::{
    build_definition, dispatch_tasks, DispatchOutcome, DispatchReport, DispatchSettings,
    TaskDefinition, TaskIssue, DEFAULT_REQUESTS_DIR,
};
pub use error::{Result, StewardError};
pub use packet::{render_packet, recommended_order, PacketEntry, PacketItem};
pub use pattern::{PathPattern, PatternList};
pub use policy::{
    MergeMode, PolicyConfig, ReviewerRule, RiskThresholds, SectionSpec, DEFAULT_POLICY_PATH,
};
pub use repo::RepoRef;
pub use reviewers::resolve_reviewers;
pub use risk::RiskLevel;
pub use sections::{check_sections, SectionCheckResult};
pub use snapshot::{CiState, CiStatus, FileChange, PrSnapshot};
pub use tasks::{
    load_tasks, normalize_title, plan_import, ImportDecision, IssuePayload, ParsedTasks,
    TaskRecord, DEFAULT_TASK_LABEL,
};
pub use verdict::{assemble_verdict, evaluate, Verdict};

/// Crate version from Cargo metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
