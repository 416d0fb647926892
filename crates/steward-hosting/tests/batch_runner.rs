//! Batch runner and issue importer against the in-memory hosting fake.

use std::sync::Arc;
use std::time::Duration;

use steward_core::{
    CiStatus, DispatchOutcome, PacketEntry, PolicyConfig, PrSnapshot, RepoRef, RiskLevel, Role,
    RunContext, TaskDefinition, TaskRecord, DEFAULT_TASK_LABEL, VERDICT_MARKER,
};
use steward_hosting::fakes::{FakeHosting, FAKE_STEWARD_LOGIN};
use steward_hosting::{
    BatchConfig, BatchRunner, ImportOutcome, IssueImporter, PrOutcome, RetryPolicy, StepStatus,
    TaskDispatcher,
};

const FULL_BODY: &str =
    "## Intent\nx\n## Approach\nx\n## Risk/Impact\nx\n## Test Plan\nx\n## Docs/Notes\nx\n";

fn repo() -> RepoRef {
    RepoRef::new("acme", "widgets")
}

fn fast_config(max_concurrent: usize) -> BatchConfig {
    BatchConfig {
        max_concurrent,
        fetch_retry: RetryPolicy::fetch().with_backoff_base_ms(1),
        mutation_retry: RetryPolicy::mutation().with_backoff_base_ms(1),
    }
}

fn small_pr(id: u64) -> PrSnapshot {
    PrSnapshot::new(id)
        .with_body(FULL_BODY)
        .with_file("src/utils.ts", 10, 2)
        .with_ci(CiStatus::passing())
}

fn runner(fake: Arc<FakeHosting>, max_concurrent: usize) -> BatchRunner {
    BatchRunner::new(
        fake,
        Arc::new(PolicyConfig::default()),
        fast_config(max_concurrent),
    )
}

fn runner_with_reviewers(fake: Arc<FakeHosting>) -> BatchRunner {
    let policy =
        PolicyConfig::from_yaml_str("reviewer_rules: [\"src/**=acme/platform,alice\"]\n")
            .unwrap();
    BatchRunner::new(fake, Arc::new(policy), fast_config(1))
}

#[tokio::test]
async fn outcomes_follow_input_order() {
    let fake = Arc::new(
        FakeHosting::new()
            .with_pr(small_pr(5))
            .with_pr(small_pr(1))
            .with_pr(small_pr(3))
            .with_fetch_delay(Duration::from_millis(5)),
    );
    let ctx = RunContext::new(repo()).with_dry_run(true);
    let report = runner(fake, 3).run(&ctx, &[5, 1, 3]).await;

    let order: Vec<u64> = report.outcomes.iter().map(PrOutcome::pr).collect();
    assert_eq!(order, vec![5, 1, 3]);
    assert_eq!(report.evaluated_count(), 3);
}

#[tokio::test]
async fn concurrency_is_capped() {
    let mut fake = FakeHosting::new().with_fetch_delay(Duration::from_millis(20));
    for id in 1..=6 {
        fake = fake.with_pr(small_pr(id));
    }
    let fake = Arc::new(fake);
    let ctx = RunContext::new(repo()).with_dry_run(true);
    let report = runner(Arc::clone(&fake), 2)
        .run(&ctx, &[1, 2, 3, 4, 5, 6])
        .await;

    assert_eq!(report.evaluated_count(), 6);
    assert!(fake.max_in_flight() <= 2);
    assert!(fake.max_in_flight() >= 1);
}

#[tokio::test]
async fn fetch_failure_is_isolated_and_mutates_nothing() {
    let fake = Arc::new(
        FakeHosting::new()
            .with_pr(small_pr(1))
            .with_pr(small_pr(2))
            .with_failing_fetch(2),
    );
    let ctx = RunContext::new(repo());
    let report = runner(Arc::clone(&fake), 4).run(&ctx, &[1, 2]).await;

    assert!(matches!(report.outcomes[0], PrOutcome::Evaluated(_)));
    match &report.outcomes[1] {
        PrOutcome::EvaluationFailed { pr, error } => {
            assert_eq!(*pr, 2);
            assert!(error.contains("PR #2"));
        }
        other => panic!("expected evaluation failure, got {other:?}"),
    }
    assert!(fake.mutation_calls().iter().all(|(_, pr)| *pr == 1));
    assert!(fake.state(2).unwrap().labels.is_empty());

    // Retried three times after the first attempt.
    let snapshot_fetches = fake
        .calls()
        .iter()
        .filter(|(name, pr)| name == "fetch_snapshot" && *pr == 2)
        .count();
    assert_eq!(snapshot_fetches, 4);
}

#[tokio::test]
async fn applies_label_comment_and_auto_merge_in_order() {
    let fake = Arc::new(FakeHosting::new().with_pr(small_pr(7)));
    let ctx = RunContext::new(repo());
    let report = runner(Arc::clone(&fake), 1).run(&ctx, &[7]).await;

    let evaluated = report.outcomes[0].evaluated().unwrap();
    assert_eq!(evaluated.verdict.risk_level, RiskLevel::L1);
    let actions: Vec<&str> = evaluated.steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["add_labels", "create_comment", "enable_auto_merge"]
    );

    let state = fake.state(7).unwrap();
    assert_eq!(state.labels, vec!["risk-L1".to_string()]);
    assert!(state.comments[0].body.contains(VERDICT_MARKER));
    assert!(state.auto_merge_enabled);
}

#[tokio::test]
async fn rerun_on_unchanged_pr_is_a_no_op() {
    let fake = Arc::new(FakeHosting::new().with_pr(small_pr(4)));
    let ctx = RunContext::new(repo());
    let runner = runner(Arc::clone(&fake), 2);

    runner.run(&ctx, &[4]).await;
    let mutations_after_first = fake.mutation_calls().len();
    let second = runner.run(&ctx, &[4]).await;

    let evaluated = second.outcomes[0].evaluated().unwrap();
    assert!(evaluated.plan.is_empty());
    assert!(evaluated.steps.is_empty());
    assert_eq!(fake.mutation_calls().len(), mutations_after_first);
}

#[tokio::test]
async fn relabels_when_risk_changes() {
    let fake = Arc::new(FakeHosting::new().with_pr(small_pr(8)));
    let ctx = RunContext::new(repo());
    runner(Arc::clone(&fake), 1).run(&ctx, &[8]).await;

    // The PR grows a workflow change between runs.
    let grown = small_pr(8).with_file(".github/workflows/ci.yml", 3, 0);
    let state = fake.state(8).unwrap();
    let fake = Arc::new(FakeHosting::new().with_pr(grown).with_state(8, state));
    let report = runner(Arc::clone(&fake), 1).run(&ctx, &[8]).await;

    let evaluated = report.outcomes[0].evaluated().unwrap();
    assert_eq!(evaluated.verdict.risk_level, RiskLevel::L3);
    let actions: Vec<&str> = evaluated.steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, vec!["remove_label", "add_labels", "update_comment"]);
    let state = fake.state(8).unwrap();
    assert_eq!(state.labels, vec!["risk-L3".to_string()]);
    assert_eq!(state.comments.len(), 1);
}

#[tokio::test]
async fn failed_comment_skips_auto_merge() {
    let fake = Arc::new(
        FakeHosting::new()
            .with_pr(small_pr(9))
            .with_failing_mutation("create_comment", 2),
    );
    let ctx = RunContext::new(repo());
    let report = runner(Arc::clone(&fake), 1).run(&ctx, &[9]).await;

    let steps = &report.outcomes[0].evaluated().unwrap().steps;
    assert!(steps[0].is_applied());
    let comment = steps.iter().find(|s| s.action == "create_comment").unwrap();
    assert!(matches!(comment.status, StepStatus::Failed { .. }));
    let merge = steps.iter().find(|s| s.action == "enable_auto_merge").unwrap();
    assert!(matches!(merge.status, StepStatus::Skipped { .. }));
    assert_eq!(report.failed_steps(), 1);
    assert_eq!(report.skipped_steps(), 1);

    assert!(!fake
        .mutation_calls()
        .iter()
        .any(|(name, _)| name == "enable_auto_merge"));
    assert!(!fake.state(9).unwrap().auto_merge_enabled);
}

#[tokio::test]
async fn marker_comment_from_another_user_is_not_reused() {
    let forged = format!("{VERDICT_MARKER}\nlooks official");
    let fake = Arc::new(
        FakeHosting::new()
            .with_pr(small_pr(11))
            .with_comment(11, "mallory", &forged),
    );
    let ctx = RunContext::new(repo());
    let report = runner(Arc::clone(&fake), 1).run(&ctx, &[11]).await;

    let actions: Vec<&str> = report.outcomes[0]
        .evaluated()
        .unwrap()
        .steps
        .iter()
        .map(|s| s.action.as_str())
        .collect();
    assert!(actions.contains(&"create_comment"));
    assert!(!actions.contains(&"update_comment"));

    let state = fake.state(11).unwrap();
    assert_eq!(state.comments[0].body, forged);
    assert_eq!(state.comments[1].author.as_deref(), Some(FAKE_STEWARD_LOGIN));
}

#[tokio::test]
async fn rerun_with_team_and_reviewed_reviewers_is_a_no_op() {
    let fake = Arc::new(FakeHosting::new().with_pr(small_pr(12)));
    let runner = runner_with_reviewers(Arc::clone(&fake));
    let ctx = RunContext::new(repo());

    let first = runner.run(&ctx, &[12]).await;
    let plan = &first.outcomes[0].evaluated().unwrap().plan;
    assert_eq!(
        plan.request_reviewers,
        vec!["acme/platform".to_string(), "alice".to_string()]
    );
    assert_eq!(fake.state(12).unwrap().requested_teams, vec!["platform".to_string()]);

    let second = runner.run(&ctx, &[12]).await;
    assert!(second.outcomes[0].evaluated().unwrap().plan.is_empty());

    // Alice reviews: the platform drops her pending request.
    let mut state = fake.state(12).unwrap();
    state.requested_reviewers.clear();
    state.reviewed_by.push("alice".to_string());
    let fake = Arc::new(FakeHosting::new().with_pr(small_pr(12)).with_state(12, state));
    let third = runner_with_reviewers(Arc::clone(&fake))
        .run(&ctx, &[12])
        .await;
    assert!(third.outcomes[0].evaluated().unwrap().plan.is_empty());
    assert!(fake.mutation_calls().is_empty());
}

#[tokio::test]
async fn contributor_run_mutates_nothing() {
    let fake = Arc::new(FakeHosting::new().with_pr(small_pr(13)));
    let ctx = RunContext::new(repo()).with_role(Role::Contributor);
    let report = runner(Arc::clone(&fake), 1).run(&ctx, &[13]).await;

    assert!(report.dry_run);
    let evaluated = report.outcomes[0].evaluated().unwrap();
    assert!(!evaluated.plan.is_empty());
    assert!(evaluated.steps.is_empty());
    assert!(fake.mutation_calls().is_empty());
}

#[tokio::test]
async fn rejected_mutation_is_not_retried() {
    let fake = Arc::new(
        FakeHosting::new()
            .with_pr(small_pr(10))
            .with_failing_mutation("add_labels", 1),
    );
    let ctx = RunContext::new(repo());
    let report = runner(Arc::clone(&fake), 1).run(&ctx, &[10]).await;

    let steps = &report.outcomes[0].evaluated().unwrap().steps;
    // 422 is not retryable, so the step fails on its single attempt.
    assert!(!steps[0].is_applied());
    let add_calls = fake
        .mutation_calls()
        .iter()
        .filter(|(name, _)| name == "add_labels")
        .count();
    assert_eq!(add_calls, 1);
}

#[tokio::test]
async fn dry_run_mutates_nothing() {
    let fake = Arc::new(FakeHosting::new().with_pr(small_pr(1)).with_pr(small_pr(2)));
    let ctx = RunContext::new(repo()).with_dry_run(true);
    let report = runner(Arc::clone(&fake), 2).run(&ctx, &[1, 2]).await;

    assert!(report.dry_run);
    assert!(fake.mutation_calls().is_empty());
    for outcome in &report.outcomes {
        let evaluated = outcome.evaluated().unwrap();
        assert!(!evaluated.plan.is_empty());
        assert!(evaluated.steps.is_empty());
    }
}

#[tokio::test]
async fn cancelled_batch_starts_no_work() {
    let fake = Arc::new(FakeHosting::new().with_pr(small_pr(1)).with_pr(small_pr(2)));
    let runner = runner(Arc::clone(&fake), 2);
    let handle = runner.cancel_handle();
    handle.cancel();
    assert!(handle.is_cancelled());

    let report = runner.run(&RunContext::new(repo()), &[1, 2]).await;
    assert_eq!(report.cancelled_count(), 2);
    assert!(fake.calls().is_empty());

    let entries = report.packet_entries(&PolicyConfig::default());
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .all(|e| matches!(e, PacketEntry::Cancelled { .. })));
}

#[tokio::test]
async fn packet_entries_keep_failed_evaluations() {
    let fake = Arc::new(
        FakeHosting::new()
            .with_pr(small_pr(1))
            .with_pr(small_pr(2))
            .with_failing_fetch(2),
    );
    let policy = PolicyConfig::default();
    let ctx = RunContext::new(repo()).with_dry_run(true);
    let report = runner(fake, 2).run(&ctx, &[1, 2]).await;

    let entries = report.packet_entries(&policy);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].number(), 1);
    assert_eq!(entries[1].number(), 2);
}

// ---- Task import ----

fn task(title: &str) -> TaskRecord {
    TaskRecord {
        title: title.to_string(),
        body: "details".to_string(),
        labels: Vec::new(),
    }
}

#[tokio::test]
async fn task_import_dry_run_creates_nothing() {
    let fake = FakeHosting::new().with_open_issue("Fix Login");
    let ctx = RunContext::new(repo()).with_dry_run(true);
    let importer = IssueImporter::new(&fake, vec![DEFAULT_TASK_LABEL.to_string()]);

    let report = importer
        .import(&ctx, &[task("fix login"), task("Add search"), task("add  search")])
        .await
        .unwrap();

    assert!(matches!(report.outcomes[0], ImportOutcome::Skipped { .. }));
    assert!(matches!(report.outcomes[1], ImportOutcome::WouldCreate { .. }));
    assert!(matches!(report.outcomes[2], ImportOutcome::Skipped { .. }));
    assert_eq!(report.created(), 1);
    assert_eq!(fake.issue_titles(), vec!["Fix Login".to_string()]);
}

#[tokio::test]
async fn task_import_creates_issues() {
    let fake = FakeHosting::new();
    let ctx = RunContext::new(repo());
    let importer = IssueImporter::new(&fake, Vec::new()).with_retry(
        RetryPolicy::fetch().with_backoff_base_ms(1),
        RetryPolicy::mutation().with_backoff_base_ms(1),
    );

    let report = importer
        .import(&ctx, &[task("Task One"), task("Task Two")])
        .await
        .unwrap();

    assert_eq!(report.created(), 2);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.outcomes[1].title(), "Task Two");
    assert_eq!(
        fake.issue_titles(),
        vec!["Task One".to_string(), "Task Two".to_string()]
    );
}

// ---- Task dispatch ----

#[tokio::test]
async fn dispatch_writes_requests_for_labeled_issues_only() {
    let fake = FakeHosting::new()
        .with_labeled_issue(
            "Update README",
            "Acceptance Criteria:\n- Mention roles\n",
            &[DEFAULT_TASK_LABEL],
        )
        .with_labeled_issue("Unrelated bug", "", &["bug"]);
    let dir = tempfile::tempdir().unwrap();
    let requests = dir.path().join("work/requests");
    let ctx = RunContext::new(repo());
    let dispatcher = TaskDispatcher::new(&fake, DEFAULT_TASK_LABEL)
        .with_retry(RetryPolicy::fetch().with_backoff_base_ms(1));

    let report = dispatcher.dispatch(&ctx, &requests).await.unwrap();
    assert_eq!(report.dispatched(), 1);
    let path = match &report.outcomes[0] {
        DispatchOutcome::Written { path, .. } => path.clone(),
        other => panic!("expected a written request, got {other:?}"),
    };
    let definition: TaskDefinition =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(definition.goal.title, "Update README");
    assert_eq!(definition.goal.acceptance_criteria, vec!["Mention roles"]);
    assert_eq!(definition.repo.target_branch, format!("worker/{}", definition.task_id));

    let again = dispatcher.dispatch(&ctx, &requests).await.unwrap();
    assert_eq!(again.dispatched(), 0);
    assert!(fake.mutation_calls().is_empty());
}

#[tokio::test]
async fn dispatch_dry_run_writes_nothing() {
    let fake = FakeHosting::new().with_labeled_issue("Task", "", &[DEFAULT_TASK_LABEL]);
    let dir = tempfile::tempdir().unwrap();
    let requests = dir.path().join("requests");
    let ctx = RunContext::new(repo()).with_dry_run(true);

    let report = TaskDispatcher::new(&fake, DEFAULT_TASK_LABEL)
        .dispatch(&ctx, &requests)
        .await
        .unwrap();
    assert!(matches!(report.outcomes[0], DispatchOutcome::WouldWrite { .. }));
    assert!(!requests.exists());
}
