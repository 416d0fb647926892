//! PR Steward CLI
//!
//! The `steward` command classifies pull requests by risk and applies the
//! resulting merge decision.
//!
//! ## Commands
//!
//! - `evaluate`: Run the pipeline offline on a snapshot file
//! - `supervise`: Evaluate open PRs and apply labels, comments and auto-merge
//! - `packet`: Render a meeting packet for all open PRs
//! - `tasks import`: Import a task list as issues
//! - `tasks dispatch`: Write worker requests for open task issues
//! - `policy`: Validate and print the resolved policy

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use steward_core::metrics::METRICS;
use steward_core::{
    evaluate, load_tasks, plan_actions, render_packet, ActionPlan, DispatchSettings,
    PolicyConfig, PrSnapshot, PrState, RepoRef, Role, RunContext, Verdict, DEFAULT_POLICY_PATH,
    DEFAULT_REQUESTS_DIR, DEFAULT_TASK_LABEL,
};
use steward_hosting::{
    load_event, BatchConfig, BatchReport, BatchRunner, GitHubClient, GitHubConfig, HostingApi,
    IssueImporter, PrOutcome, RetryPolicy, StepStatus, TaskDispatcher, DEFAULT_API_URL,
};

const FALLBACK_TOKEN_ENV: &str = "GH_TOKEN";

#[derive(Parser)]
#[command(name = "steward")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "PR risk classification and merge-decision engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Policy file (default: .supervisor-agent.yml, built-in defaults if absent)
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// Acting role: supervisor applies changes, contributor only reads
    #[arg(long, global = true, env = "STEWARD_ROLE", default_value = "supervisor", value_parser = parse_role)]
    role: Role,

    #[command(subcommand)]
    command: Commands,
}

/// Connection flags shared by every command that talks to GitHub.
#[derive(Args, Debug)]
struct HostingArgs {
    /// Repository as owner/name or a GitHub URL
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repo: String,

    /// Environment variable holding the API token (GH_TOKEN is tried next)
    #[arg(long, default_value = "GITHUB_TOKEN")]
    token_env: String,

    /// REST API root
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Login the token comments as (looked up from the token if omitted)
    #[arg(long, env = "STEWARD_BOT_LOGIN")]
    bot_login: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a PR snapshot offline and print the verdict and action plan
    Evaluate {
        /// PR snapshot (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Current PR state (JSON); an unlabelled, uncommented PR if omitted
        #[arg(long)]
        current_state: Option<PathBuf>,
    },

    /// Evaluate PRs and apply labels, comments, reviewers and auto-merge
    Supervise {
        #[command(flatten)]
        hosting: HostingArgs,

        /// PR numbers to process (default: the event's PR, else all open PRs)
        #[arg(long = "pr")]
        prs: Vec<u64>,

        /// Workflow event payload naming the PR
        #[arg(long, env = "GITHUB_EVENT_PATH")]
        event: Option<PathBuf>,

        /// Evaluate and report without mutating anything
        #[arg(long)]
        dry_run: bool,

        /// Maximum PRs processed at once
        #[arg(long, default_value = "4")]
        max_concurrent: usize,
    },

    /// Render a meeting packet for all open PRs
    Packet {
        #[command(flatten)]
        hosting: HostingArgs,

        /// Output markdown path
        #[arg(short, long, default_value = "docs/MEETING_PACKET.md")]
        out: PathBuf,

        /// Maximum PRs fetched at once
        #[arg(long, default_value = "4")]
        max_concurrent: usize,
    },

    /// Task issues: import a task list, dispatch open tasks to workers
    Tasks {
        #[command(subcommand)]
        action: TaskCommands,
    },

    /// Validate the policy file and print the resolved policy
    Policy,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Import a markdown or JSON task list as issues
    Import {
        #[command(flatten)]
        hosting: HostingArgs,

        /// Task file (markdown or JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Print actions without creating issues
        #[arg(long)]
        dry_run: bool,

        /// Label added to every issue (repeatable, default: agent-task)
        #[arg(long = "label")]
        labels: Vec<String>,

        /// Disable default labels entirely
        #[arg(long, conflicts_with = "labels")]
        no_label: bool,
    },

    /// Write a worker request file for every open task issue
    Dispatch {
        #[command(flatten)]
        hosting: HostingArgs,

        /// Issue label marking tasks
        #[arg(long, default_value = DEFAULT_TASK_LABEL)]
        label: String,

        /// Directory receiving request files
        #[arg(long, default_value = DEFAULT_REQUESTS_DIR)]
        out: PathBuf,

        /// Workspace path recorded in each request
        #[arg(long, default_value = ".")]
        workspace_root: String,

        /// Branch workers start from
        #[arg(long, default_value = "main")]
        base_ref: String,

        /// List requests without writing them
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_role(raw: &str) -> std::result::Result<Role, String> {
    raw.parse().map_err(|e: steward_core::StewardError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    steward_core::telemetry::init_tracing(cli.json, level);

    let policy = load_policy(cli.policy.as_deref())?;

    let result = match cli.command {
        Commands::Evaluate {
            snapshot,
            current_state,
        } => cmd_evaluate(&policy, &snapshot, current_state.as_deref()),
        Commands::Supervise {
            hosting,
            prs,
            event,
            dry_run,
            max_concurrent,
        } => {
            cmd_supervise(
                policy,
                &hosting,
                cli.role,
                prs,
                event.as_deref(),
                dry_run,
                max_concurrent,
                cli.json,
            )
            .await
        }
        Commands::Packet {
            hosting,
            out,
            max_concurrent,
        } => cmd_packet(policy, &hosting, cli.role, &out, max_concurrent).await,
        Commands::Tasks {
            action:
                TaskCommands::Import {
                    hosting,
                    input,
                    dry_run,
                    labels,
                    no_label,
                },
        } => {
            cmd_tasks_import(&hosting, cli.role, &input, dry_run, labels, no_label, cli.json)
                .await
        }
        Commands::Tasks {
            action:
                TaskCommands::Dispatch {
                    hosting,
                    label,
                    out,
                    workspace_root,
                    base_ref,
                    dry_run,
                },
        } => {
            let settings = DispatchSettings {
                workspace_root,
                base_ref,
                ..DispatchSettings::default()
            };
            cmd_tasks_dispatch(&hosting, cli.role, &label, &out, settings, dry_run, cli.json).await
        }
        Commands::Policy => cmd_policy(&policy),
    };

    METRICS.flush();
    result
}

/// Explicitly named policy files must exist; the default one may be absent.
fn load_policy(explicit: Option<&Path>) -> Result<PolicyConfig> {
    let policy = match explicit {
        Some(path) => PolicyConfig::load(path)
            .with_context(|| format!("Failed to load policy from {}", path.display()))?,
        None => {
            let path = Path::new(DEFAULT_POLICY_PATH);
            if path.exists() {
                PolicyConfig::load(path)
                    .with_context(|| format!("Failed to load policy from {}", path.display()))?
            } else {
                info!("No {} found, using built-in policy", DEFAULT_POLICY_PATH);
                PolicyConfig::default()
            }
        }
    };
    for diagnostic in &policy.diagnostics {
        warn!("policy: {}", diagnostic);
    }
    Ok(policy)
}

fn resolve_token(token_env: &str) -> Result<String> {
    [token_env, FALLBACK_TOKEN_ENV]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .with_context(|| {
            format!(
                "Token environment variable '{}' is not set (also tried {})",
                token_env, FALLBACK_TOKEN_ENV
            )
        })
}

fn connect(args: &HostingArgs) -> Result<(RepoRef, GitHubClient)> {
    let repo = RepoRef::parse(&args.repo).context("Invalid --repo")?;
    let token = resolve_token(&args.token_env)?;
    let config = GitHubConfig::new(token)
        .with_api_url(&args.api_url)
        .with_timeout_ms(args.timeout_ms)
        .with_bot_login(args.bot_login.clone());
    let client = GitHubClient::new(config).context("Failed to build GitHub client")?;
    Ok((repo, client))
}

fn batch_config(max_concurrent: usize, timeout_ms: u64) -> BatchConfig {
    BatchConfig {
        max_concurrent,
        fetch_retry: RetryPolicy::fetch().with_timeout_ms(timeout_ms),
        mutation_retry: RetryPolicy::mutation().with_timeout_ms(timeout_ms),
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

#[derive(Debug, Serialize)]
struct EvaluateOutput {
    verdict: Verdict,
    plan: ActionPlan,
}

fn evaluate_files(
    policy: &PolicyConfig,
    snapshot: &Path,
    current_state: Option<&Path>,
) -> Result<EvaluateOutput> {
    let snapshot: PrSnapshot = read_json_file(snapshot)?;
    let state: PrState = match current_state {
        Some(path) => read_json_file(path)?,
        None => PrState {
            author: snapshot.author.clone(),
            ..PrState::default()
        },
    };
    let verdict = evaluate(&snapshot, policy);
    let plan = plan_actions(&verdict, &state);
    Ok(EvaluateOutput { verdict, plan })
}

fn cmd_evaluate(policy: &PolicyConfig, snapshot: &Path, current_state: Option<&Path>) -> Result<()> {
    let output = evaluate_files(policy, snapshot, current_state)?;
    info!("{}", output.verdict.summary());
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// PRs named on the command line win, then the event's PR, then every open PR.
async fn select_prs(
    api: &dyn HostingApi,
    repo: &RepoRef,
    explicit: Vec<u64>,
    event: Option<&Path>,
) -> Result<Vec<u64>> {
    if !explicit.is_empty() {
        return Ok(explicit);
    }
    if let Some(path) = event {
        if let Some(pr) = load_event(path).context("Failed to read event payload")? {
            info!(pr, "PR taken from event payload");
            return Ok(vec![pr]);
        }
    }
    let (prs, _) = RetryPolicy::fetch()
        .run("list_pull_requests", || api.list_open_pull_requests(repo))
        .await
        .context("Failed to list open pull requests")?;
    Ok(prs)
}

fn print_batch_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for outcome in &report.outcomes {
        match outcome {
            PrOutcome::Evaluated(e) => {
                let applied = e.steps.iter().filter(|s| s.is_applied()).count();
                let mode = if report.dry_run { "dry-run" } else { "applied" };
                println!(
                    "{}  [{} {}/{} steps]",
                    e.verdict.summary(),
                    mode,
                    applied,
                    e.plan.steps().len()
                );
                for step in &e.steps {
                    match &step.status {
                        StepStatus::Applied { .. } => {}
                        StepStatus::Failed { error } => {
                            println!("    {} failed: {}", step.action, error)
                        }
                        StepStatus::Skipped { reason } => {
                            println!("    {} skipped: {}", step.action, reason)
                        }
                    }
                }
            }
            PrOutcome::EvaluationFailed { pr, error } => {
                println!("#{}  evaluation failed: {}", pr, error);
            }
            PrOutcome::Cancelled { pr, .. } => println!("#{}  cancelled", pr),
        }
    }
    println!(
        "{} evaluated, {} failed, {} cancelled in {}ms",
        report.evaluated_count(),
        report.failed_count(),
        report.cancelled_count(),
        report.duration_ms
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_supervise(
    policy: PolicyConfig,
    hosting: &HostingArgs,
    role: Role,
    prs: Vec<u64>,
    event: Option<&Path>,
    dry_run: bool,
    max_concurrent: usize,
    json: bool,
) -> Result<()> {
    let (repo, client) = connect(hosting)?;
    let ctx = RunContext::new(repo.clone())
        .with_role(role)
        .with_dry_run(dry_run);
    ctx.require_supervisor("apply verdicts")?;

    let client: Arc<dyn HostingApi> = Arc::new(client);
    let prs = select_prs(client.as_ref(), &repo, prs, event).await?;
    if prs.is_empty() {
        info!("No open pull requests in {}", repo);
        return Ok(());
    }

    let runner = BatchRunner::new(
        client,
        Arc::new(policy),
        batch_config(max_concurrent, hosting.timeout_ms),
    );

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight mutations");
            cancel.cancel();
        }
    });

    let report = runner.run(&ctx, &prs).await;
    print_batch_report(&report, json)?;
    if report.failed_count() > 0 || report.failed_steps() > 0 {
        bail!(
            "{} evaluation(s) and {} mutation step(s) failed, {} step(s) skipped",
            report.failed_count(),
            report.failed_steps(),
            report.skipped_steps()
        );
    }
    Ok(())
}

async fn cmd_packet(
    policy: PolicyConfig,
    hosting: &HostingArgs,
    role: Role,
    out: &Path,
    max_concurrent: usize,
) -> Result<()> {
    let (repo, client) = connect(hosting)?;
    let client: Arc<dyn HostingApi> = Arc::new(client);
    let prs = select_prs(client.as_ref(), &repo, Vec::new(), None).await?;

    let policy = Arc::new(policy);
    let ctx = RunContext::new(repo.clone())
        .with_role(role)
        .with_dry_run(true);
    let runner = BatchRunner::new(
        client,
        Arc::clone(&policy),
        batch_config(max_concurrent, hosting.timeout_ms),
    );
    let report = runner.run(&ctx, &prs).await;

    let entries = report.packet_entries(&policy);
    let markdown = render_packet(&repo.to_string(), &entries, chrono::Utc::now());
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(out, markdown).with_context(|| format!("Failed to write {}", out.display()))?;

    println!("Wrote {} ({} PRs)", out.display(), entries.len());
    if report.failed_count() > 0 {
        warn!("{} PR(s) could not be evaluated", report.failed_count());
    }
    Ok(())
}

fn default_labels(labels: Vec<String>, no_label: bool) -> Vec<String> {
    if no_label {
        Vec::new()
    } else if labels.is_empty() {
        vec![DEFAULT_TASK_LABEL.to_string()]
    } else {
        labels
    }
}

async fn cmd_tasks_import(
    hosting: &HostingArgs,
    role: Role,
    input: &Path,
    dry_run: bool,
    labels: Vec<String>,
    no_label: bool,
    json: bool,
) -> Result<()> {
    let parsed = load_tasks(input)
        .with_context(|| format!("Failed to load tasks from {}", input.display()))?;
    for rejected in &parsed.rejected {
        warn!(index = rejected.index, "Rejected task entry: {}", rejected.reason);
    }
    if parsed.tasks.is_empty() {
        bail!("No valid tasks found in {}", input.display());
    }

    let (repo, client) = connect(hosting)?;
    let ctx = RunContext::new(repo).with_role(role).with_dry_run(dry_run);
    ctx.require_supervisor("create issues")?;
    let importer = IssueImporter::new(&client, default_labels(labels, no_label));
    let report = importer
        .import(&ctx, &parsed.tasks)
        .await
        .context("Failed to import tasks")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for outcome in &report.outcomes {
            println!("{}", serde_json::to_string(outcome)?);
        }
        println!(
            "{} created, {} failed, {} rejected",
            report.created(),
            report.failed(),
            parsed.rejected.len()
        );
    }
    if report.failed() > 0 {
        bail!("{} issue(s) could not be created", report.failed());
    }
    Ok(())
}

async fn cmd_tasks_dispatch(
    hosting: &HostingArgs,
    role: Role,
    label: &str,
    out: &Path,
    settings: DispatchSettings,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let (repo, client) = connect(hosting)?;
    let ctx = RunContext::new(repo).with_role(role).with_dry_run(dry_run);
    ctx.require_supervisor("dispatch tasks")?;

    let report = TaskDispatcher::new(&client, label)
        .with_settings(settings)
        .with_retry(RetryPolicy::fetch().with_timeout_ms(hosting.timeout_ms))
        .dispatch(&ctx, out)
        .await
        .context("Failed to dispatch tasks")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for outcome in &report.outcomes {
            println!("{}", serde_json::to_string(outcome)?);
        }
        println!(
            "{} dispatched, {} failed",
            report.dispatched(),
            report.failed()
        );
    }
    if report.failed() > 0 {
        bail!("{} request(s) could not be written", report.failed());
    }
    Ok(())
}

fn cmd_policy(policy: &PolicyConfig) -> Result<()> {
    policy.validate()?;
    println!("{}", serde_json::to_string_pretty(policy)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_BODY: &str =
        "## Intent\nx\n## Approach\nx\n## Risk/Impact\nx\n## Test Plan\nx\n## Docs/Notes\nx\n";

    #[test]
    fn test_cli_parses_supervise_flags() {
        let cli = Cli::try_parse_from([
            "steward",
            "--verbose",
            "supervise",
            "--repo",
            "acme/widgets",
            "--pr",
            "3",
            "--pr",
            "7",
            "--dry-run",
            "--max-concurrent",
            "2",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Supervise {
                hosting,
                prs,
                dry_run,
                max_concurrent,
                ..
            } => {
                assert_eq!(hosting.repo, "acme/widgets");
                assert_eq!(hosting.token_env, "GITHUB_TOKEN");
                assert_eq!(prs, vec![3, 7]);
                assert!(dry_run);
                assert_eq!(max_concurrent, 2);
            }
            _ => panic!("expected supervise"),
        }
    }

    #[test]
    fn test_label_and_no_label_conflict() {
        let parsed = Cli::try_parse_from([
            "steward", "tasks", "import", "--repo", "a/b", "--input", "t.md", "--label", "x",
            "--no-label",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cli_parses_dispatch_and_role() {
        let cli = Cli::try_parse_from([
            "steward",
            "--role",
            "contributor",
            "tasks",
            "dispatch",
            "--repo",
            "acme/widgets",
            "--bot-login",
            "steward-bot",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.role, Role::Contributor);
        match cli.command {
            Commands::Tasks {
                action:
                    TaskCommands::Dispatch {
                        hosting,
                        label,
                        out,
                        base_ref,
                        dry_run,
                        ..
                    },
            } => {
                assert_eq!(hosting.bot_login.as_deref(), Some("steward-bot"));
                assert_eq!(label, "agent-task");
                assert_eq!(out, PathBuf::from("work/requests"));
                assert_eq!(base_ref, "main");
                assert!(dry_run);
            }
            _ => panic!("expected tasks dispatch"),
        }

        assert!(Cli::try_parse_from(["steward", "--role", "worker", "policy"]).is_err());
    }

    #[test]
    fn test_role_defaults_to_supervisor() {
        let cli = Cli::try_parse_from(["steward", "policy"]).unwrap();
        assert_eq!(cli.role, Role::Supervisor);
    }

    #[test]
    fn test_default_labels() {
        assert_eq!(default_labels(Vec::new(), false), vec!["agent-task"]);
        assert!(default_labels(Vec::new(), true).is_empty());
        assert_eq!(
            default_labels(vec!["infra".to_string()], false),
            vec!["infra"]
        );
    }

    #[test]
    fn test_explicit_missing_policy_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yml");
        let err = load_policy(Some(missing.as_path())).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load policy"));
    }

    #[test]
    fn test_evaluate_files_produces_plan() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = PrSnapshot::new(12)
            .with_body(FULL_BODY)
            .with_file("docs/guide.md", 4, 1);
        let path = dir.path().join("snap.json");
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let output = evaluate_files(&PolicyConfig::default(), &path, None).unwrap();
        assert_eq!(output.verdict.label_to_apply, "risk-L0");
        assert_eq!(output.plan.add_labels, vec!["risk-L0"]);
        // CI was never reported as passing.
        assert!(!output.plan.enable_auto_merge);
    }

    #[test]
    fn test_evaluate_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = evaluate_files(&PolicyConfig::default(), &path, None).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid JSON"));
    }
}
