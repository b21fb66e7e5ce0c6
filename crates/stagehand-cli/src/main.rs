//! Stagehand CLI
//!
//! The `stagehand` command asks a remote planner for a build plan, freezes
//! it, and runs its stages in order.
//!
//! ## Commands
//!
//! - `plan`: acquire a plan (or the fallback) and lock it into the run directory
//! - `exec`: execute the locked plan; never contacts the planner
//! - `run`: `plan` followed by `exec`
//! - `fallback`: print the deterministic fallback plan
//! - `parse`: run the plan parser over a saved planner response

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use planner_client::{GatewayConfig, PlannerGateway, DEFAULT_PLANNER_URL};
use stagehand_ci::{
    execute_locked, plan_and_lock, AcquireOptions, CancellationToken, CommandPreparer,
    EnvironmentPreparer, ExecutionEnvironment, ExecutionReport, NoopPreparer, PlanExecutor,
    RunError, DEFAULT_SHELL,
};
use stagehand_core::{
    capture_branch, capture_last_commit_message, fallback_plan, parse_plan, BuildContext,
    DirArtifactSink, LockHandle, PlanLock, PlanOrigin, RunSpan, StagePolicy,
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Planner-driven build orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Run directory holding the plan lock and artifacts
    #[arg(long, global = true, env = "STAGEHAND_RUN_DIR", default_value = ".stagehand")]
    run_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a plan and lock it into the run directory
    Plan {
        #[command(flatten)]
        context: ContextArgs,

        #[command(flatten)]
        planner: PlannerArgs,
    },

    /// Execute the locked plan in the run directory
    Exec {
        #[command(flatten)]
        context: ContextArgs,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Plan, lock and execute in one go
    Run {
        #[command(flatten)]
        context: ContextArgs,

        #[command(flatten)]
        planner: PlannerArgs,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Print the fallback plan for a build context
    Fallback {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Parse a saved planner response and print the plan
    Parse {
        /// File holding the raw response body
        file: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct ContextArgs {
    /// Repository name (default: name of the source directory)
    #[arg(long, env = "JOB_NAME")]
    repository: Option<String>,

    /// Branch name (default: GIT_BRANCH, then git)
    #[arg(long, env = "BRANCH_NAME")]
    branch: Option<String>,

    /// Build number
    #[arg(long, env = "BUILD_NUMBER", default_value_t = 0)]
    build_number: u64,

    /// Last commit message (default: git)
    #[arg(long, env = "GIT_COMMIT_MESSAGE")]
    commit_message: Option<String>,

    /// Checkout used to fill in missing context from git
    #[arg(long, default_value = ".")]
    source_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct PlannerArgs {
    /// Planner base URL
    #[arg(long, env = "AI_PLANNER_URL", default_value = DEFAULT_PLANNER_URL)]
    planner_url: String,

    /// Probe /healthz before requesting a plan
    #[arg(long, env = "PLANNER_HEALTH_CHECK", default_value_t = true, action = ArgAction::Set)]
    health_check: bool,

    /// Delay in seconds before each attempt, comma-separated
    #[arg(long, env = "PLANNER_RETRY_DELAYS", default_value = "0,2,4")]
    retry_delays: String,

    /// Connect timeout in seconds
    #[arg(long, env = "PLANNER_CONNECT_TIMEOUT", default_value_t = 5)]
    connect_timeout: u64,

    /// Per-request timeout in seconds, generation included
    #[arg(long, env = "PLANNER_REQUEST_TIMEOUT", default_value_t = 120)]
    request_timeout: u64,

    /// Health probe timeout in seconds
    #[arg(long, env = "PLANNER_HEALTH_TIMEOUT", default_value_t = 5)]
    health_timeout: u64,

    /// Overall acquisition budget in seconds
    #[arg(long, env = "PLANNER_BUDGET")]
    budget: Option<u64>,

    /// Substitute the fallback plan when the planner fails
    #[arg(long, env = "PLANNER_FALLBACK", default_value_t = false, action = ArgAction::Set)]
    fallback: bool,

    /// Allowlist sets admitted for remote plans, comma-separated
    #[arg(long, env = "PLANNER_ALLOWLIST")]
    allowlist: Option<String>,

    /// Maximum number of stages in a remote plan
    #[arg(long, env = "PLANNER_MAX_STAGES")]
    max_stages: Option<usize>,

    /// Maximum command length in a remote plan
    #[arg(long, env = "PLANNER_MAX_COMMAND_LEN")]
    max_command_len: Option<usize>,
}

#[derive(Args, Debug, Clone)]
struct ExecArgs {
    /// Working directory with the source checked out
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// One-time preparation command (e.g. "npm ci")
    #[arg(long)]
    prepare: Option<String>,

    /// Dependency cache directory
    #[arg(long, env = "STAGEHAND_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Shell used to interpret stage commands
    #[arg(long, default_value = DEFAULT_SHELL)]
    shell: String,

    /// Per-stage timeout in seconds
    #[arg(long)]
    stage_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stagehand_core::init_tracing(cli.json, level);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Plan { context, planner } => {
            let ctx = resolve_context(&context)?;
            let _span = RunSpan::enter(&ctx);
            cmd_plan(&cli.run_dir, &ctx, &planner, &cancel).await.map(|_| ())
        }
        Commands::Exec { context, exec } => {
            let ctx = resolve_context(&context)?;
            let _span = RunSpan::enter(&ctx);
            cmd_exec(&cli.run_dir, &ctx, &exec, &cancel).await
        }
        Commands::Run {
            context,
            planner,
            exec,
        } => {
            let ctx = resolve_context(&context)?;
            let _span = RunSpan::enter(&ctx);
            cmd_plan(&cli.run_dir, &ctx, &planner, &cancel).await?;
            cmd_exec(&cli.run_dir, &ctx, &exec, &cancel).await
        }
        Commands::Fallback { context } => cmd_fallback(&resolve_context(&context)?),
        Commands::Parse { file } => cmd_parse(&file),
    }
}

async fn cmd_plan(
    run_dir: &Path,
    ctx: &BuildContext,
    args: &PlannerArgs,
    cancel: &CancellationToken,
) -> Result<LockHandle> {
    let gateway = PlannerGateway::new(gateway_config(args)?)
        .context("Failed to configure planner gateway")?;
    let options = AcquireOptions::default()
        .with_fallback(args.fallback)
        .with_policy(stage_policy(args)?);
    let sink = artifact_sink(run_dir)?;

    let planned = tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("Planning cancelled"),
        planned = plan_and_lock(&gateway, ctx, &options, run_dir, &sink) => planned,
    };
    let (handle, origin) = planned.map_err(run_failure)?;

    println!("Plan locked: {}", handle.path().display());
    match origin {
        PlanOrigin::Remote => println!("Origin: planner ({})", args.planner_url),
        PlanOrigin::Fallback { reason } => println!("Origin: fallback ({reason})"),
    }
    Ok(handle)
}

async fn cmd_exec(
    run_dir: &Path,
    ctx: &BuildContext,
    args: &ExecArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let env = execution_environment(ctx, args);
    let preparer: Arc<dyn EnvironmentPreparer> = match &args.prepare {
        Some(command) => Arc::new(CommandPreparer::new(command.clone())),
        None => Arc::new(NoopPreparer),
    };
    let executor = PlanExecutor::new(preparer).with_cancellation(cancel.clone());
    let sink = artifact_sink(run_dir)?;
    let handle = PlanLock::new(run_dir).handle();

    info!(workdir = %env.work_dir.display(), "executing locked plan");
    let report = execute_locked(&handle, &env, &executor, &sink)
        .await
        .map_err(run_failure)?;

    print_report(&report);
    report.into_result().map(|_| ()).map_err(run_failure)
}

fn cmd_fallback(ctx: &BuildContext) -> Result<()> {
    let plan = fallback_plan(ctx);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn cmd_parse(file: &Path) -> Result<()> {
    let body = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let plan = parse_plan(&body).with_context(|| format!("No usable plan in {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn run_failure(err: RunError) -> anyhow::Error {
    anyhow::Error::new(err).context("Run failed")
}

fn print_report(report: &ExecutionReport) {
    println!();
    println!(
        "Status: {}",
        if report.is_success() {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
    println!("Final state: {}", report.final_state);
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for result in &report.results {
        let status = if result.passed() { "✓" } else { "✗" };
        println!(
            "  {} [{}] {} ({}ms, exit status: {})",
            status, result.index, result.name, result.duration_ms, result.exit_status
        );
    }
    if let Some(reason) = &report.prep_error {
        println!("  ✗ preparation: {reason}");
    }
}

/// Build the context from flags/environment, filling gaps from git.
fn resolve_context(args: &ContextArgs) -> Result<BuildContext> {
    let branch = match args
        .branch
        .clone()
        .or_else(|| std::env::var("GIT_BRANCH").ok())
        .filter(|b| !b.trim().is_empty())
    {
        Some(branch) => branch,
        None => capture_branch(&args.source_dir).unwrap_or_else(|e| {
            warn!(error = %e, "could not determine branch, using 'unknown'");
            "unknown".to_string()
        }),
    };

    let commit_message = match args.commit_message.clone() {
        Some(message) => message,
        None => capture_last_commit_message(&args.source_dir).unwrap_or_else(|e| {
            warn!(error = %e, "could not read last commit message");
            String::new()
        }),
    };

    let repository = match args.repository.clone().filter(|r| !r.trim().is_empty()) {
        Some(repository) => repository,
        None => {
            let dir = args
                .source_dir
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", args.source_dir.display()))?;
            dir.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        }
    };

    Ok(BuildContext::new(
        repository,
        branch,
        args.build_number,
        commit_message,
    ))
}

fn gateway_config(args: &PlannerArgs) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::new(&args.planner_url)
        .with_retry_delays(&parse_delays(&args.retry_delays)?)
        .with_timeouts(
            Duration::from_secs(args.connect_timeout),
            Duration::from_secs(args.request_timeout),
        )
        .with_health_timeout(Duration::from_secs(args.health_timeout));
    if !args.health_check {
        config = config.without_health_check();
    }
    if let Some(budget) = args.budget {
        config = config.with_budget(Duration::from_secs(budget));
    }
    Ok(config)
}

fn stage_policy(args: &PlannerArgs) -> Result<StagePolicy> {
    let allowlist = match &args.allowlist {
        Some(list) => StagePolicy::parse_allowlist(list).context("Invalid PLANNER_ALLOWLIST")?,
        None => Vec::new(),
    };
    Ok(StagePolicy {
        max_stages: args.max_stages,
        max_command_len: args.max_command_len,
        allowlist,
    })
}

/// Parse `"0,2,4"` (seconds, fractions allowed) into a delay schedule.
fn parse_delays(list: &str) -> Result<Vec<Duration>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let secs: f64 = s
                .parse()
                .with_context(|| format!("Invalid retry delay '{s}'"))?;
            Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid retry delay '{s}'"))
        })
        .collect()
}

fn execution_environment(ctx: &BuildContext, args: &ExecArgs) -> ExecutionEnvironment {
    let mut env = ExecutionEnvironment::new(&args.workdir)
        .with_context(ctx)
        .with_shell(args.shell.clone());
    if let Some(cache) = &args.cache_dir {
        env = env.with_cache_dir(cache);
    }
    if let Some(secs) = args.stage_timeout {
        env = env.with_stage_timeout(Duration::from_secs(secs));
    }
    env
}

fn artifact_sink(run_dir: &Path) -> Result<DirArtifactSink> {
    DirArtifactSink::new(run_dir.join("artifacts")).context("Failed to create artifacts directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_delays() {
        assert_eq!(
            parse_delays("0,2,4").unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(
            parse_delays(" 0.5 , 1 ").unwrap(),
            vec![Duration::from_millis(500), Duration::from_secs(1)]
        );
        assert!(parse_delays("0,-1").is_err());
        assert!(parse_delays("soon").is_err());
        assert!(parse_delays("1e300").is_err());
        assert!(parse_delays("inf").is_err());
        assert!(parse_delays("NaN").is_err());
    }

    #[test]
    fn test_gateway_config_from_flags() {
        let cli = Cli::try_parse_from([
            "stagehand",
            "plan",
            "--planner-url",
            "http://planner:9000",
            "--health-check",
            "false",
            "--retry-delays",
            "0,1",
            "--budget",
            "30",
        ])
        .unwrap();
        let Commands::Plan { planner, .. } = cli.command else {
            panic!("expected plan command");
        };

        let config = gateway_config(&planner).unwrap();
        assert_eq!(config.base_url, "http://planner:9000");
        assert!(!config.health_check);
        assert_eq!(config.attempts(), 2);
        assert_eq!(config.budget(), Some(Duration::from_secs(30)));
        assert_eq!(config.health_timeout(), Duration::from_secs(5));
        assert!(!planner.fallback);
    }

    #[test]
    fn test_huge_health_timeout_does_not_overflow() {
        let cli = Cli::try_parse_from([
            "stagehand",
            "plan",
            "--health-timeout",
            "18446744073709551615",
        ])
        .unwrap();
        let Commands::Plan { planner, .. } = cli.command else {
            panic!("expected plan command");
        };

        let config = gateway_config(&planner).unwrap();
        assert_eq!(config.health_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_stage_policy_from_flags() {
        let cli = Cli::try_parse_from([
            "stagehand",
            "plan",
            "--allowlist",
            "base,node",
            "--max-stages",
            "5",
        ])
        .unwrap();
        let Commands::Plan { planner, .. } = cli.command else {
            panic!("expected plan command");
        };

        let policy = stage_policy(&planner).unwrap();
        assert_eq!(policy.allowlist.len(), 2);
        assert_eq!(policy.max_stages, Some(5));
    }

    #[test]
    fn test_resolve_context_prefers_flags() {
        let dir = tempfile::tempdir().unwrap();
        let args = ContextArgs {
            repository: Some("demo".to_string()),
            branch: Some("main".to_string()),
            build_number: 7,
            commit_message: Some("feat: x".to_string()),
            source_dir: dir.path().to_path_buf(),
        };

        let ctx = resolve_context(&args).unwrap();
        assert_eq!(ctx, BuildContext::new("demo", "main", 7, "feat: x"));
    }

    #[test]
    fn test_resolve_context_defaults_repository_to_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("widget-service");
        std::fs::create_dir(&checkout).unwrap();
        let args = ContextArgs {
            repository: None,
            branch: Some("main".to_string()),
            build_number: 1,
            commit_message: Some(String::new()),
            source_dir: checkout,
        };

        let ctx = resolve_context(&args).unwrap();
        assert_eq!(ctx.repository_name, "widget-service");
    }
}
