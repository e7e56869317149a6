use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use shamewall::config::Config;
use shamewall::credentials::CredentialPool;
use shamewall::domain::TrackedEntity;
use shamewall::fetch::{FetchOrchestrator, GitHubSource};
use shamewall::github::GitHubClient;
use shamewall::judge::{GitHubReviewService, JudgeWorkflow};
use shamewall::pipeline::{EntityResult, PipelineRunner, Roster, RunSummary, export_leaderboard};
use shamewall::scoring::LexiconScorer;
use shamewall::shutdown::{self, Shutdown};
use shamewall::store::{PhaseStatus, PipelinePhase, StateStore};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shamewall")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("shamewall.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Roster and state store for one invocation.
struct Workspace {
    roster: Roster,
    store: Arc<StateStore>,
}

impl Workspace {
    fn open(config: &Config) -> Result<Self> {
        let roster = Roster::load(&config.roster)?;
        let state_dir = config.resolve_state_dir();
        let store = StateStore::open(&state_dir).context("Failed to open state store")?;
        info!("Using state store at {}", store.path().display());
        Ok(Self {
            roster,
            store: Arc::new(store),
        })
    }

    fn select(&self, logins: &[String]) -> Result<Vec<TrackedEntity>> {
        let entities = self.roster.select(logins);
        if entities.is_empty() {
            return Err(eyre!("No roster entities match {:?}", logins));
        }
        Ok(entities)
    }
}

fn build_fetcher(config: &Config, store: Arc<StateStore>, shutdown: Shutdown) -> Result<Arc<FetchOrchestrator>> {
    let tokens = env::var(&config.github.tokens_env)
        .with_context(|| format!("{} must hold comma-separated GitHub tokens", config.github.tokens_env))?;
    let pool = CredentialPool::from_csv(&tokens, config.github.default_quota)?
        .with_fallback_reset(config.github.fallback_reset());
    info!("Credential pool holds {} tokens", pool.len());

    let source = GitHubSource::new(GitHubClient::new(&config.github)?);
    let fetcher = FetchOrchestrator::new(
        Arc::new(pool),
        Arc::new(source),
        store,
        Arc::new(LexiconScorer::default()),
        config.fetch.clone(),
    )
    .with_shutdown(shutdown);
    Ok(Arc::new(fetcher))
}

fn build_workflow(
    config: &Config,
    store: Arc<StateStore>,
    shutdown: Shutdown,
    no_summary: bool,
) -> Result<Arc<JudgeWorkflow>> {
    let admin = env::var(&config.github.admin_token_env)
        .with_context(|| format!("{} must hold the token used for forks and pull requests", config.github.admin_token_env))?;
    let mut service = GitHubReviewService::new(GitHubClient::new(&config.github)?, admin, config.judge.clone())?;

    let mut summary = config.judge.summary_enabled && !no_summary;
    if summary {
        match env::var(&config.judge.coderabbit_key_env) {
            Ok(key) => service = service.with_report_key(key),
            Err(_) => {
                log::warn!("{} not set, skipping summary reports", config.judge.coderabbit_key_env);
                println!(
                    "{} {} not set, summary reports disabled",
                    "Warning:".yellow(),
                    config.judge.coderabbit_key_env
                );
                summary = false;
            }
        }
    }

    let workflow = JudgeWorkflow::new(Arc::new(service), store)
        .with_backoff(config.fetch.backoff())
        .with_poll_policy(config.judge.poll.policy())
        .with_summary(summary)
        .with_shutdown(shutdown);
    Ok(Arc::new(workflow))
}

/// Trigger shutdown on Ctrl-C.
fn spawn_interrupt_handler() -> Shutdown {
    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n{}", "Interrupted, finishing in-flight writes...".yellow());
            log::warn!("Interrupt received, stopping");
            trigger.trigger();
        }
    });
    shutdown
}

fn print_summary(summary: &RunSummary, verbose: bool) {
    for report in &summary.reports {
        let label = match &report.result {
            EntityResult::Judged(_) | EntityResult::Collected => report.result.label().green(),
            EntityResult::Cancelled | EntityResult::NoActivity => report.result.label().yellow(),
            EntityResult::FetchFailed(_) => report.result.label().red(),
        };
        if verbose {
            println!("  {:<24} {} ({})", report.login, label, report.result);
        } else {
            println!("  {:<24} {}", report.login, label);
        }
    }

    let tally: Vec<String> = summary
        .tally()
        .iter()
        .map(|(label, count)| format!("{} {}", count, label))
        .collect();
    println!("{} {}", "Summary:".cyan(), tally.join(", "));
    if summary.interrupted() > 0 {
        println!("{} {} entities interrupted", "Note:".yellow(), summary.interrupted());
    }
}

async fn handle_pipeline_command(
    cli: &Cli,
    config: &Config,
    logins: &[String],
    fetch: bool,
    judge: bool,
    no_summary: bool,
) -> Result<()> {
    let workspace = Workspace::open(config)?;
    let entities = workspace.select(logins)?;
    let shutdown = spawn_interrupt_handler();

    let mut runner = PipelineRunner::new(workspace.store.clone(), config.judge.parallelism)
        .with_shutdown(shutdown.clone());
    if fetch {
        runner = runner.with_fetcher(build_fetcher(config, workspace.store.clone(), shutdown.clone())?);
    }
    if judge {
        runner = runner.with_workflow(build_workflow(config, workspace.store.clone(), shutdown.clone(), no_summary)?);
    }

    println!("{} {} entities", "Processing:".cyan(), entities.len());
    let summary = runner.run(&entities).await.context("Run aborted")?;
    print_summary(&summary, cli.is_verbose());

    if fetch && judge && !shutdown.is_triggered() {
        handle_export_command(config, &workspace, None)?;
    }
    Ok(())
}

fn handle_export_command(config: &Config, workspace: &Workspace, output: Option<&PathBuf>) -> Result<()> {
    let path = output.unwrap_or(&config.export_path);
    let entries = export_leaderboard(&workspace.store, &workspace.roster.entities, &config.scoring, path)
        .context("Failed to export leaderboard")?;
    println!("{} {} entries to {}", "Exported:".green(), entries.len(), path.display());
    Ok(())
}

fn handle_status_command(workspace: &Workspace, login: Option<&str>) -> Result<()> {
    let logins: Vec<String> = login.map(|l| vec![l.to_string()]).unwrap_or_default();
    for entity in workspace.select(&logins)? {
        let record = workspace.store.load(&entity.id())?;
        let collected = workspace.store.load_activity(&entity.id())?.is_some();

        let progress = match (record.failed_phase(), record.highest_completed()) {
            (Some((phase, entry)), _) => format!(
                "{} {} ({})",
                "failed at".red(),
                phase,
                entry.last_error.as_deref().unwrap_or("unknown error")
            ),
            (None, Some(PipelinePhase::ReportGenerated)) => "done".green().to_string(),
            (None, Some(phase)) => format!("{} {}", "through".yellow(), phase),
            (None, None) => "not started".dimmed().to_string(),
        };
        let attempts: u32 = PipelinePhase::ALL.iter().map(|p| record.entry(*p).attempts).sum();
        let judged = record.status(PipelinePhase::ReviewReceived) == PhaseStatus::Completed;

        println!(
            "  {:<24} {:<10} {:<9} {} [{} attempts]",
            entity.login,
            entity.role.as_str(),
            if collected { "collected" } else { "-" },
            if judged { format!("{} / {}", "judged".green(), progress) } else { progress },
            attempts
        );
    }
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_pipeline_command(cli, config, &[], true, true, false).await,
        Some(Commands::Run { logins, no_summary }) => {
            handle_pipeline_command(cli, config, logins, true, true, *no_summary).await
        }
        Some(Commands::Fetch { logins }) => handle_pipeline_command(cli, config, logins, true, false, false).await,
        Some(Commands::Judge { logins, no_summary }) => {
            handle_pipeline_command(cli, config, logins, false, true, *no_summary).await
        }
        Some(Commands::Export { output }) => {
            let workspace = Workspace::open(config)?;
            handle_export_command(config, &workspace, output.as_ref())
        }
        Some(Commands::Status { login }) => {
            let workspace = Workspace::open(config)?;
            handle_status_command(&workspace, login.as_deref())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(roster) = &cli.roster {
        config.roster = roster.clone();
    }

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
