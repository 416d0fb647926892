//! Hosting-platform side of PR Steward.
//!
//! The [`HostingApi`] trait is the seam between the pure engine in
//! `steward-core` and a code host. [`GitHubClient`] implements it over the
//! GitHub REST and GraphQL APIs. [`BatchRunner`] fans evaluation out across
//! many PRs with bounded concurrency. [`IssueImporter`] turns task lists
//! into issues, and [`TaskDispatcher`] turns task issues into worker requests.

pub mod api;
pub mod applier;
pub mod batch;
pub mod error;
pub mod fakes;
pub mod github;
pub mod issues;
pub mod retry;

pub use api::{CreatedIssue, HostingApi};
pub use applier::{apply_plan, StepOutcome, StepStatus};
pub use batch::{BatchConfig, BatchReport, BatchRunner, CancelHandle, EvaluatedPr, PrOutcome};
pub use error::{HostingError, HostingResult};
pub use github::{
    load_event, pull_request_from_event, GitHubClient, GitHubConfig, ACTIONS_BOT_LOGIN,
    DEFAULT_API_URL,
};
pub use issues::{ImportOutcome, ImportReport, IssueImporter, TaskDispatcher};
pub use retry::RetryPolicy;
