//! Structured lifecycle events for steward runs.
//!
//! Batch work is instrumented with [`run_span`]; events emitted inside it
//! carry the run id and repository.

use tracing::{info, warn};

use crate::verdict::Verdict;

/// The run-scoped span. Attach it with `Instrument` rather than entering it,
/// since batch work crosses `.await` points.
pub fn run_span(run_id: &str, repo: &str) -> tracing::Span {
    tracing::info_span!("steward.run", service = crate::telemetry::SERVICE_NAME, run_id = %run_id, repo = %repo)
}

pub fn emit_verdict_evaluated(verdict: &Verdict) {
    info!(
        event = "verdict.evaluated",
        pr = verdict.pr_id,
        risk = %verdict.risk_level,
        missing_sections = verdict.missing_sections.len(),
        reviewers = verdict.reviewers.len(),
        ci_passing = verdict.ci_passing,
        auto_merge_eligible = verdict.auto_merge_eligible,
    );
}

/// PR data could not be fetched; the PR is excluded from mutation.
pub fn emit_evaluation_failed(pr: u64, error: &dyn std::fmt::Display) {
    warn!(event = "verdict.evaluation_failed", pr = pr, error = %error);
}

pub fn emit_mutation_applied(pr: u64, action: &str, attempts: u32) {
    info!(event = "mutation.applied", pr = pr, action = %action, attempts = attempts);
}

pub fn emit_mutation_failed(pr: u64, action: &str, error: &dyn std::fmt::Display) {
    warn!(event = "mutation.failed", pr = pr, action = %action, error = %error);
}

pub fn emit_batch_finished(
    run_id: &str,
    duration_ms: u64,
    evaluated: usize,
    failed: usize,
    cancelled: usize,
) {
    info!(
        event = "batch.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        evaluated = evaluated,
        failed = failed,
        cancelled = cancelled,
    );
}
