// ABOUTME: CLI entry point for oracle-duckdb-loader
// ABOUTME: Parses commands, wires config, target, trigger and shutdown hook

use anyhow::Context;
use clap::{Parser, Subcommand};
use oracle_duckdb_loader::config::{Config, RunSettings};
use oracle_duckdb_loader::source::connector_from_config;
use oracle_duckdb_loader::target::TargetDatabase;
use oracle_duckdb_loader::views::ViewSqlTranslator;
use oracle_duckdb_loader::{LoadOrchestrator, RefreshTrigger, ShutdownHook, TriggerResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "oracle-duckdb-loader")]
#[command(about = "Copy an Oracle schema into DuckDB and report discrepancies", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "LOADER_CONFIG", default_value = "loader.toml")]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Source password (overrides the config file and LOADER_SOURCE_PASSWORD)
    #[arg(long = "source-password", global = true)]
    source_password: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full refresh into the target database
    Refresh,
    /// Run one sample refresh into the sample database
    Sample {
        /// Rows per table (non-positive values use the default of 100)
        #[arg(long, allow_negative_numbers = true)]
        row_limit: Option<i64>,
    },
    /// Run full refreshes on a fixed interval until Ctrl+C
    Schedule {
        /// Seconds between refreshes (defaults to loader.schedule_interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Translate Oracle view SQL to DuckDB SQL and print it
    TranslateView {
        /// Owner to strip from qualified names
        #[arg(long)]
        schema: String,
        /// View text (the SELECT statement)
        sql: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::TranslateView { schema, sql } => {
            let translated = ViewSqlTranslator::new(&schema)
                .translate(&sql)
                .context("Translation failed")?;
            println!("{}", translated);
            Ok(())
        }
        Commands::Refresh => {
            let config = load_config(&cli.config, cli.source_password)?;
            let settings = config.full_run();
            run_once(&config, settings, &config.target.path).await
        }
        Commands::Sample { row_limit } => {
            let config = load_config(&cli.config, cli.source_password)?;
            let settings = config.sample_run(row_limit);
            let path = config.sample_path();
            run_once(&config, settings, &path).await
        }
        Commands::Schedule { interval_secs } => {
            let config = load_config(&cli.config, cli.source_password)?;
            let period = Duration::from_secs(
                interval_secs
                    .unwrap_or(config.loader.schedule_interval_secs)
                    .max(1),
            );
            let (trigger, hook) = build_trigger(&config, config.full_run(), &config.target.path)?;

            let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received shutdown signal");
                    let _ = shutdown_tx.send(());
                }
            });

            let result = trigger.run_every(period, shutdown_rx).await;
            hook.fire();
            result.context("Scheduler failed")
        }
    }
}

fn load_config(path: &Path, password: Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if password.is_some() {
        config.source.password = password;
    }
    Ok(config)
}

fn build_trigger(
    config: &Config,
    settings: RunSettings,
    target_path: &str,
) -> anyhow::Result<(RefreshTrigger, ShutdownHook)> {
    let connector = connector_from_config(&config.source)?;
    let target = Arc::new(
        TargetDatabase::open(target_path)
            .with_context(|| format!("Failed to open target database {}", target_path))?,
    );

    let checkpoint_target = target.clone();
    let hook = ShutdownHook::new(move || {
        if let Err(e) = checkpoint_target.checkpoint() {
            tracing::warn!("Failed to checkpoint target on shutdown: {}", e);
        }
    });

    let orchestrator = Arc::new(LoadOrchestrator::new(settings, connector, target));
    Ok((RefreshTrigger::new(orchestrator, config.loader.enabled), hook))
}

async fn run_once(config: &Config, settings: RunSettings, target_path: &str) -> anyhow::Result<()> {
    let (trigger, hook) = build_trigger(config, settings, target_path)?;
    let result = trigger.trigger_startup_refresh("command line").await;
    hook.fire();

    match result.context("Refresh failed")? {
        Some(TriggerResult::Started) => {
            if let Some(summary) = trigger.last_summary() {
                println!("{}", summary.rendered_report);
                if !summary.is_clean() {
                    tracing::warn!(
                        "{} table(s), {} view(s) and {} sequence(s) failed; see report",
                        summary.failed_tables(),
                        summary.view_failures.len(),
                        summary.sequence_failures.len()
                    );
                }
            }
        }
        Some(TriggerResult::Disabled) => {
            println!("Loader is disabled (loader.enabled = false); nothing to do");
        }
        Some(TriggerResult::AlreadyRunning) | None => {}
    }
    Ok(())
}
