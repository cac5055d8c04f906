//! Binary entry point for taweret.
//!
//! This binary runs the retention loop against the cluster, or a single
//! evaluation cycle on demand.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use taweret::config::TaweretConfig;
use taweret::observability::{self, InitOptions, ObservabilityHandle, PrometheusSink};
use taweret::retention::Evaluator;
use taweret::store::{ConfigProvider, KubeClient};
use taweret::{Error, Result};
use tracing::{error, info, warn};

/// Longest uninterrupted sleep between shutdown checks.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Taweret - retention enforcement for Kanister backups.
#[derive(Parser)]
#[command(name = "taweret")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "TAWERET_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Evaluate every schedule now, then on each interval until interrupted.
    Run,

    /// Evaluate once and exit. Exits non-zero if any schedule failed.
    Evaluate {
        /// Only evaluate this schedule.
        #[arg(short, long)]
        schedule: Option<String>,

        /// Print the metrics recorded by this evaluation in Prometheus text format.
        #[arg(long)]
        metrics: bool,
    },

    /// Manage configuration.
    Config {
        /// Show the effective configuration and the retention policies.
        #[arg(long)]
        show: bool,
    },
}

fn main() -> ExitCode {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let expose_metrics = matches!(cli.command, Commands::Run);
    let observability = match observability::init_from_config(
        &config,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: expose_metrics,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, &config, &observability) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, kind = e.kind(), "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Loads and validates configuration.
fn load_config(path: Option<&Path>) -> Result<TaweretConfig> {
    let config = match path {
        Some(path) => TaweretConfig::load_from_file(path)?,
        None => TaweretConfig::load_default()?,
    };
    config.validate()?;
    Ok(config)
}

/// Runs the selected command.
fn run_command(
    command: Commands,
    config: &TaweretConfig,
    observability: &ObservabilityHandle,
) -> Result<ExitCode> {
    match command {
        Commands::Run => cmd_run(config),
        Commands::Evaluate { schedule, metrics } => {
            let code = cmd_evaluate(config, schedule.as_deref())?;
            if metrics {
                print_metrics(observability);
            }
            Ok(code)
        },
        Commands::Config { show } => cmd_config(config, show),
    }
}

/// Builds an evaluator over the cluster client.
fn evaluator<'a>(
    client: &'a KubeClient,
    sink: &'a PrometheusSink,
    config: &TaweretConfig,
) -> Evaluator<'a> {
    Evaluator::new(client, client, sink, config.deletion.poll_config())
        .with_prefix(config.deletion.name_prefix.clone())
}

fn cmd_run(config: &TaweretConfig) -> Result<ExitCode> {
    let client = KubeClient::from_config(config)?;
    let sink = PrometheusSink::new();
    let evaluator = evaluator(&client, &sink, config);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).map_err(|e| {
        Error::OperationFailed {
            operation: "install_signal_handler".to_string(),
            cause: e.to_string(),
        }
    })?;

    let interval = config.evaluation_interval();
    info!(
        api_server = client.base_url(),
        interval_secs = interval.as_secs(),
        metrics_port = config.metrics.port,
        "starting retention loop"
    );

    let mut first_cycle = true;
    loop {
        match evaluator.run_cycle(&client) {
            Ok(report) => info!(
                schedules = report.outcomes.len(),
                failed = report.failed().count(),
                deleted = report.deleted_count(),
                "evaluation cycle finished"
            ),
            // Policies that cannot be loaded at startup are fatal.
            Err(e) if first_cycle => return Err(e),
            Err(e) => warn!(error = %e, "cannot load retention configs, skipping cycle"),
        }
        first_cycle = false;

        if !sleep_unless_shutdown(interval, &shutdown) {
            break;
        }
    }

    info!("shutdown requested, exiting");
    Ok(ExitCode::SUCCESS)
}

/// Sleeps for `interval`. Returns `false` as soon as shutdown is requested.
fn sleep_unless_shutdown(interval: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(SHUTDOWN_POLL));
    }
}

fn cmd_evaluate(config: &TaweretConfig, schedule: Option<&str>) -> Result<ExitCode> {
    let client = KubeClient::from_config(config)?;
    let sink = PrometheusSink::new();
    let report = evaluator(&client, &sink, config).run_cycle_for(&client, schedule)?;

    println!("{}", report.summary());
    for outcome in &report.outcomes {
        if outcome.is_success() {
            println!(
                "  {}: {} in use, {} deleted",
                outcome.schedule,
                outcome.in_use,
                outcome.deleted.len()
            );
        }
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_metrics(observability: &ObservabilityHandle) {
    match observability.render_metrics() {
        Some(rendered) => {
            println!();
            print!("{rendered}");
        },
        None => println!("Metrics are disabled"),
    }
}

fn cmd_config(config: &TaweretConfig, show: bool) -> Result<ExitCode> {
    if !show {
        println!("Use --show to display configuration");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("Evaluation Interval: {}s", config.evaluation_interval_secs);
    println!(
        "Retention Configs: {}/configmaps[{}]",
        config.config_namespace, config.config_key
    );
    println!();
    println!("Cluster:");
    println!(
        "  API Server: {}",
        config.cluster.api_server.as_deref().unwrap_or("(in-cluster)")
    );
    println!("  Token: {}", config.cluster.token_path.display());
    println!("  CA: {}", config.cluster.ca_cert_path.display());
    println!("  Timeout: {}ms", config.cluster.timeout_ms);
    println!();
    println!("Deletion:");
    println!("  Name Prefix: {}", config.deletion.name_prefix);
    println!(
        "  Poll: {}ms initial, {}ms max, x{} backoff, {}s budget",
        config.deletion.initial_poll_ms,
        config.deletion.max_poll_ms,
        config.deletion.backoff_multiplier,
        config.deletion.max_wait_secs
    );
    println!();
    println!("Metrics:");
    println!("  Enabled: {}", config.metrics.enabled);
    println!("  Port: {}", config.metrics.port);
    println!();

    println!("Retention Policies:");
    let policies = KubeClient::from_config(config).and_then(|client| client.retention_configs());
    match policies {
        Ok(policies) if policies.is_empty() => println!("  (none)"),
        Ok(policies) => {
            for policy in policies {
                println!(
                    "  {} (namespace {}): keep {} within {}, blueprint '{}', profile '{}'",
                    policy.name,
                    policy.namespace,
                    policy.max_backups,
                    policy.max_age,
                    policy.blueprint_ref,
                    policy.profile_ref
                );
            }
        },
        Err(e) => println!("  (unavailable: {e})"),
    }

    Ok(ExitCode::SUCCESS)
}
