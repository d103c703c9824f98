//! Load runner.
//!
//! Sweeps HTTP services across concurrency levels with:
//! - A fixed request count per cell (`concurrency * requests_per_user`)
//! - Reachability probes before each service is loaded
//! - Per-cell error artifacts and a comparison table
//! - An HTTP front-end with per-client result directories

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use load_engine::{
    ComparisonReport, DispatchEngine, LoadConfig, OrchestratorOptions, RunContext,
    RunOrchestrator,
};
use load_runner::server::{run_server, ServerState};
use load_runner::session::SessionManager;

#[derive(Parser, Debug)]
#[command(name = "load-runner")]
#[command(about = "Concurrent HTTP load sweeps across services and concurrency levels")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full sweep from a configuration file
    Run(RunArgs),

    /// Check a configuration file without sending any traffic
    Validate {
        /// Configuration file (YAML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Serve the HTTP front-end
    Serve {
        /// Port to listen on
        #[arg(long, env = "LOAD_RUNNER_PORT", default_value = "5000")]
        port: u16,

        /// Directory holding one subdirectory per session
        #[arg(long, env = "RESULTS_DIR", default_value = "results")]
        results_dir: PathBuf,

        /// Session lifetime in seconds
        #[arg(long, default_value = "3600")]
        session_ttl_secs: u64,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Configuration file (YAML, or JSON by extension)
    #[arg(short, long)]
    config: PathBuf,

    /// Directory for run artifacts; each run gets its own subdirectory
    #[arg(long, env = "RESULTS_DIR", default_value = "results")]
    results_dir: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Override the pause between cells
    #[arg(long)]
    cooldown_secs: Option<f64>,

    /// Override the concurrency levels (comma separated)
    #[arg(long, value_delimiter = ',')]
    concurrent_users: Option<Vec<u32>>,

    /// Override requests per simulated user
    #[arg(long)]
    requests_per_user: Option<u32>,

    /// Skip reachability probes
    #[arg(long)]
    no_probe: bool,

    /// Hide the per-cell progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref(), &args.log_level);

    // stdout is reserved for results
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if args.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    match args.command {
        Command::Run(run) => run_sweep(run).await,
        Command::Validate { config } => validate(config),
        Command::Serve {
            port,
            results_dir,
            session_ttl_secs,
        } => {
            let sessions = Arc::new(SessionManager::new(
                results_dir,
                Duration::from_secs(session_ttl_secs),
            ));
            run_server(Arc::new(ServerState { sessions }), port).await
        }
    }
}

/// `RUST_LOG` wins over `--log-level`; unparsable directives fall back to
/// `info`.
fn log_filter(rust_log: Option<&str>, log_level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(log_level.to_lowercase()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn load_config(path: &PathBuf) -> Result<LoadConfig> {
    LoadConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run_sweep(args: RunArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(cooldown) = args.cooldown_secs {
        config.cooldown_secs = cooldown;
    }
    if let Some(levels) = args.concurrent_users {
        config.concurrent_users = levels;
    }
    if let Some(requests_per_user) = args.requests_per_user {
        config.requests_per_user = requests_per_user;
    }
    if args.no_probe {
        config.probe = false;
    }
    config.validate().context("Invalid configuration")?;

    let run_id = Uuid::new_v4().simple().to_string();
    let run_dir = args.results_dir.join(format!(
        "run_{}_{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        &run_id[..8]
    ));
    let ctx = RunContext::create(&run_dir)
        .with_context(|| format!("Failed to create {}", run_dir.display()))?;

    let show_progress = !args.no_progress && matches!(args.format, OutputFormat::Table);
    let engine = DispatchEngine::new(config.request_timeout())?.with_progress(show_progress);
    let orchestrator = RunOrchestrator::new(
        engine,
        OrchestratorOptions {
            cooldown: config.cooldown(),
            probe: config.probe,
            probe_timeout: config.probe_timeout(),
        },
    );

    info!(
        services = config.services.len(),
        levels = ?config.concurrent_users,
        requests_per_user = config.requests_per_user,
        artifact_dir = %run_dir.display(),
        "Starting sweep"
    );

    let report = orchestrator.execute_config(&config, &ctx).await?;

    for target in &report.unreachable {
        warn!(service = %target.service_name, reason = %target.reason, "Service skipped");
    }
    if report.summaries.is_empty() {
        bail!("No service was reachable; nothing was measured");
    }

    let csv_path = ComparisonReport::write_csv(&ctx, &report.summaries)?;
    info!(path = %csv_path.display(), "Comparison table written");

    match args.format {
        OutputFormat::Table => {
            println!("{}", ComparisonReport::format_table(&report));
            println!("\nResults: {}", csv_path.display());
        }
        OutputFormat::Json => println!("{}", ComparisonReport::format_json(&report)?),
        OutputFormat::Csv => print!("{}", ComparisonReport::to_csv(&report.summaries)?),
    }

    Ok(())
}

fn validate(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;
    let matrix = RunOrchestrator::plan(&config).context("Invalid configuration")?;

    for target in &matrix {
        let total: u64 = target
            .concurrency_levels
            .iter()
            .map(|&c| config.total_requests(c))
            .sum();
        println!(
            "{} ({}) {} - {} cells, {} requests",
            target.spec.service_name,
            target.spec.request_type().as_str(),
            target.spec.url,
            target.concurrency_levels.len(),
            total
        );
    }
    println!("Configuration OK");

    Ok(())
}
