//! Concurrent evaluation and mutation of many PRs.
//!
//! Each PR runs in its own task under a shared semaphore: fetch snapshot and
//! state, evaluate, plan, then apply the plan's steps in order. The cancel
//! flag is checked right before a PR's mutation sequence starts; a sequence
//! that has started always runs to the end.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

use steward_core::metrics::METRICS;
use steward_core::{
    evaluate, obs, plan_actions, ActionPlan, PacketEntry, PacketItem, PolicyConfig, PrSnapshot,
    RepoRef, RunContext, Verdict,
};

use crate::api::HostingApi;
use crate::applier::{apply_plan, StepOutcome};
use crate::error::HostingError;
use crate::retry::RetryPolicy;

/// Batch-level knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum PRs processed at once.
    pub max_concurrent: usize,
    pub fetch_retry: RetryPolicy,
    pub mutation_retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            fetch_retry: RetryPolicy::fetch(),
            mutation_retry: RetryPolicy::mutation(),
        }
    }
}

/// Requests cancellation of a running batch.
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    /// Stores the flag even when no batch is subscribed yet, so a cancel
    /// issued before `run` is still observed.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// A PR that was fetched and evaluated.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluatedPr {
    pub snapshot: PrSnapshot,
    pub verdict: Verdict,
    pub plan: ActionPlan,
    /// Empty for dry runs and no-op plans.
    pub steps: Vec<StepOutcome>,
}

/// What happened to one PR.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PrOutcome {
    Evaluated(Box<EvaluatedPr>),
    /// Data could not be fetched; nothing was mutated.
    EvaluationFailed { pr: u64, error: String },
    /// Cancelled before mutation. `evaluated` is set when evaluation had
    /// already finished.
    Cancelled {
        pr: u64,
        evaluated: Option<Box<EvaluatedPr>>,
    },
}

impl PrOutcome {
    pub fn pr(&self) -> u64 {
        match self {
            Self::Evaluated(e) => e.verdict.pr_id,
            Self::EvaluationFailed { pr, .. } | Self::Cancelled { pr, .. } => *pr,
        }
    }

    pub fn evaluated(&self) -> Option<&EvaluatedPr> {
        match self {
            Self::Evaluated(e) => Some(e),
            Self::Cancelled { evaluated, .. } => evaluated.as_deref(),
            Self::EvaluationFailed { .. } => None,
        }
    }

    /// Number of mutation steps that failed.
    pub fn failed_steps(&self) -> usize {
        self.count_steps(StepOutcome::is_failed)
    }

    /// Number of steps never attempted because an earlier step failed.
    pub fn skipped_steps(&self) -> usize {
        self.count_steps(StepOutcome::is_skipped)
    }

    fn count_steps(&self, pred: fn(&StepOutcome) -> bool) -> usize {
        match self {
            Self::Evaluated(e) => e.steps.iter().filter(|s| pred(s)).count(),
            _ => 0,
        }
    }
}

/// Outcome of a whole batch, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub repo: RepoRef,
    pub dry_run: bool,
    pub duration_ms: u64,
    pub outcomes: Vec<PrOutcome>,
}

impl BatchReport {
    pub fn evaluated_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PrOutcome::Evaluated(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PrOutcome::EvaluationFailed { .. }))
            .count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PrOutcome::Cancelled { .. }))
            .count()
    }

    pub fn failed_steps(&self) -> usize {
        self.outcomes.iter().map(PrOutcome::failed_steps).sum()
    }

    pub fn skipped_steps(&self) -> usize {
        self.outcomes.iter().map(PrOutcome::skipped_steps).sum()
    }

    /// One packet row per PR, in input order. PRs that failed or were
    /// cancelled before evaluation keep a marker row.
    pub fn packet_entries(&self, policy: &PolicyConfig) -> Vec<PacketEntry> {
        self.outcomes
            .iter()
            .map(|o| match (o, o.evaluated()) {
                (_, Some(e)) => {
                    PacketEntry::Evaluated(PacketItem::new(&e.snapshot, &e.verdict, policy))
                }
                (PrOutcome::EvaluationFailed { pr, error }, None) => {
                    PacketEntry::EvaluationFailed {
                        number: *pr,
                        title: "(unavailable)".to_string(),
                        url: String::new(),
                        error: error.clone(),
                    }
                }
                (other, None) => PacketEntry::Cancelled { number: other.pr() },
            })
            .collect()
    }
}

/// Runs evaluation and mutation across many PRs.
pub struct BatchRunner {
    api: Arc<dyn HostingApi>,
    policy: Arc<PolicyConfig>,
    config: BatchConfig,
    cancel: Arc<watch::Sender<bool>>,
}

impl BatchRunner {
    pub fn new(api: Arc<dyn HostingApi>, policy: Arc<PolicyConfig>, config: BatchConfig) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            api,
            policy,
            config,
            cancel: Arc::new(tx),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Process `prs` and report outcomes in the same order.
    pub async fn run(&self, ctx: &RunContext, prs: &[u64]) -> BatchReport {
        let run_id = ctx.run_id.to_string();
        let span = obs::run_span(&run_id, &ctx.repo.to_string());
        let started = Instant::now();

        let outcomes = self.run_all(ctx, prs).instrument(span).await;

        let report = BatchReport {
            run_id,
            repo: ctx.repo.clone(),
            dry_run: !ctx.can_mutate(),
            duration_ms: started.elapsed().as_millis() as u64,
            outcomes,
        };
        obs::emit_batch_finished(
            &report.run_id,
            report.duration_ms,
            report.evaluated_count(),
            report.failed_count(),
            report.cancelled_count(),
        );
        report
    }

    async fn run_all(&self, ctx: &RunContext, prs: &[u64]) -> Vec<PrOutcome> {
        let sem = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut join_set = JoinSet::new();

        for (idx, pr) in prs.iter().copied().enumerate() {
            let api = Arc::clone(&self.api);
            let policy = Arc::clone(&self.policy);
            let config = self.config;
            let repo = ctx.repo.clone();
            // Contributor runs evaluate like a dry run.
            let dry_run = !ctx.can_mutate();
            let cancel_rx = self.cancel.subscribe();
            let sem = Arc::clone(&sem);

            join_set.spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    let outcome =
                        process_pr(api.as_ref(), &policy, &config, &repo, dry_run, &cancel_rx, pr)
                            .await;
                    (idx, outcome)
                }
                .in_current_span(),
            );
        }

        let mut slots: Vec<Option<PrOutcome>> = vec![None; prs.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "PR task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(prs)
            .map(|(slot, pr)| {
                slot.unwrap_or_else(|| PrOutcome::EvaluationFailed {
                    pr: *pr,
                    error: "evaluation task aborted".to_string(),
                })
            })
            .collect()
    }
}

async fn process_pr(
    api: &dyn HostingApi,
    policy: &PolicyConfig,
    config: &BatchConfig,
    repo: &RepoRef,
    dry_run: bool,
    cancel_rx: &watch::Receiver<bool>,
    pr: u64,
) -> PrOutcome {
    if *cancel_rx.borrow() {
        return PrOutcome::Cancelled {
            pr,
            evaluated: None,
        };
    }

    let fetched = async {
        let (snapshot, _) = config
            .fetch_retry
            .run("fetch_snapshot", || api.fetch_snapshot(repo, pr))
            .await?;
        let (state, _) = config
            .fetch_retry
            .run("fetch_state", || api.fetch_state(repo, pr))
            .await?;
        Ok::<_, HostingError>((snapshot, state))
    }
    .await;

    let (snapshot, state) = match fetched {
        Ok(v) => v,
        Err(e) => {
            let err = HostingError::DataFetch {
                what: format!("PR #{pr}"),
                detail: e.to_string(),
            };
            METRICS.inc_evaluations_failed();
            obs::emit_evaluation_failed(pr, &err);
            return PrOutcome::EvaluationFailed {
                pr,
                error: err.to_string(),
            };
        }
    };

    let verdict = evaluate(&snapshot, policy);
    METRICS.inc_prs_evaluated();
    obs::emit_verdict_evaluated(&verdict);
    let plan = plan_actions(&verdict, &state);
    let mut evaluated = EvaluatedPr {
        snapshot,
        verdict,
        plan,
        steps: Vec::new(),
    };

    if dry_run || evaluated.plan.is_empty() {
        return PrOutcome::Evaluated(Box::new(evaluated));
    }
    if *cancel_rx.borrow() {
        tracing::info!(pr, "cancelled before mutation");
        return PrOutcome::Cancelled {
            pr,
            evaluated: Some(Box::new(evaluated)),
        };
    }

    evaluated.steps = apply_plan(api, repo, &evaluated.plan, &config.mutation_retry).await;
    PrOutcome::Evaluated(Box::new(evaluated))
}
