// Jailkeeper - Main Entry Point
//
// Command-line front end for the jail reconciler:
// - reconcile: one run, meant for cron or a systemd timer
// - plan: dry run printing the action each tenant would get
// - status: persisted per-tenant state
// - check-config: load, validate and print the configuration
//
// Exit codes: 0 clean run, 1 some tenants failed or the run was cut short,
// 2 fatal (bad configuration, tenant source unavailable, lock held).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jailkeeper::config::{Config, SourceKind, DEFAULT_CONFIG_PATH};
use jailkeeper::jail::error::{LockError, ReconcileError};
use jailkeeper::jail::lock::RunLock;
use jailkeeper::jail::{
    self, CommandSource, ConfigSource, FileSource, FileStateStore, HostProber, HostRunner,
    JailExecutor, JailStateStore, PrivilegedRunner, ReconcileOptions, Reconciler, RunReport,
    TracingSink,
};
use jailkeeper::logging::LogLevel;
use jailkeeper::metrics;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EXIT_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;

/// Jailkeeper: chroot jail reconciler for multi-tenant hosting
#[derive(Parser, Debug)]
#[command(name = "jailkeeper")]
#[command(author = "Jailkeeper Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Converges tenant chroot jails with the hosting panel's settings", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "JAILKEEPER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one reconciliation
    Reconcile {
        /// Probe and plan only; execute and persist nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the action each tenant would get (same as reconcile --dry-run)
    Plan,
    /// Show the persisted per-tenant state
    Status,
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load_from_path(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if let Err(e) = init_logging(&config, args.verbose) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    let result = match args.command {
        Commands::Reconcile { dry_run } => reconcile(&config, dry_run).await,
        Commands::Plan => reconcile(&config, true).await,
        Commands::Status => status(&config).await,
        Commands::CheckConfig => check_config(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let mut logging = config.logging.clone();
    if verbose {
        logging.level = LogLevel::Debug;
    }
    logging.init()
}

/// Wire the host implementations of every reconciler seam
fn build_reconciler(config: &Config, dry_run: bool) -> Result<Reconciler> {
    let runner: Arc<dyn PrivilegedRunner> =
        Arc::new(HostRunner::new(config.jail.process_timeout()));

    let source: Arc<dyn ConfigSource> = match config.source.kind {
        SourceKind::File => {
            let path = config
                .source
                .path
                .clone()
                .context("source.path is not set")?;
            Arc::new(FileSource::new(path))
        }
        SourceKind::Command => Arc::new(CommandSource::new(
            config.source.command.clone(),
            Arc::new(HostRunner::new(Duration::from_secs(
                config.source.timeout_secs,
            ))),
        )),
    };

    let store: Arc<dyn JailStateStore> = Arc::new(FileStateStore::new(&config.state.dir));
    let prober = Arc::new(HostProber::new(
        &config.jail.base_dir,
        &config.jail.mountinfo_path,
    ));
    let executor = Arc::new(JailExecutor::new(config.jail.clone(), runner));

    Ok(Reconciler::new(
        source,
        store,
        prober,
        executor,
        Arc::new(TracingSink),
        ReconcileOptions {
            max_workers: config.reconcile.max_workers,
            dry_run,
        },
    ))
}

async fn reconcile(config: &Config, dry_run: bool) -> Result<ExitCode> {
    // A dry run changes nothing, so it may run beside a real one
    let _lock = if dry_run {
        None
    } else {
        match RunLock::acquire(&config.reconcile.lock_path) {
            Ok(lock) => Some(lock),
            Err(LockError::Held(path)) => {
                error!("Another reconciliation is running (lock {:?})", path);
                return Ok(ExitCode::from(EXIT_FATAL));
            }
            Err(e) => return Err(e).context("Failed to take the run lock"),
        }
    };

    if config.metrics.enabled {
        metrics::init().context("Failed to register metrics")?;
    }

    let reconciler = build_reconciler(config, dry_run)?;
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());
    if let Some(limit) = config.reconcile.run_timeout() {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!("Run time limit of {:?} reached, not starting more tenants", limit);
            cancel.cancel();
        });
    }

    let report = match reconciler.run(cancel).await {
        Ok(report) => report,
        Err(e @ ReconcileError::FatalConfig(_)) => {
            error!("{}", e);
            write_metrics(config, dry_run);
            return Ok(ExitCode::from(EXIT_FATAL));
        }
    };

    write_metrics(config, dry_run);
    print_report(&report, dry_run);

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILED))
    }
}

/// Cancel the run on SIGINT or SIGTERM
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        warn!("Shutdown requested, finishing in-flight tenants");
        cancel.cancel();
    });
}

fn write_metrics(config: &Config, dry_run: bool) {
    if !config.metrics.enabled || dry_run {
        return;
    }
    match metrics::write_textfile(&config.metrics.textfile_path) {
        Ok(()) => info!("Metrics written to {}", config.metrics.textfile_path.display()),
        Err(e) => warn!("Failed to write metrics: {:#}", e),
    }
}

fn print_report(report: &RunReport, dry_run: bool) {
    let result_header = if dry_run { "PLAN" } else { "RESULT" };
    println!(
        "{:<10} {:<32} {:<8} {}",
        "TENANT", "LOGIN", "ACTION", result_header
    );
    for outcome in &report.outcomes {
        let result = match &outcome.result {
            Ok(()) if dry_run => "ok".to_string(),
            Ok(()) => "success".to_string(),
            Err(reason) => reason.to_string(),
        };
        println!(
            "{:<10} {:<32} {:<8} {}",
            outcome.tenant_id,
            outcome.login_name,
            outcome.action.as_str(),
            result
        );
    }

    let s = &report.summary;
    println!();
    println!("Run {} ({})", report.run_id, report.status.as_str());
    println!(
        "created={} updated={} removed={} noop={} failed={} skipped={}",
        s.created, s.updated, s.removed, s.noop, s.failed, s.skipped
    );
}

async fn status(config: &Config) -> Result<ExitCode> {
    let store = FileStateStore::new(&config.state.dir);
    let records = store
        .list()
        .await
        .with_context(|| format!("Failed to read state from {:?}", config.state.dir))?;

    println!(
        "{:<10} {:<8} {:<8} {:<26} {:<10} {}",
        "TENANT", "PRESENT", "ACTION", "LAST ATTEMPT", "RESULT", "FINGERPRINT"
    );
    for record in &records {
        let result = match &record.last_action_result {
            jail::store::ActionOutcome::Success => "success".to_string(),
            jail::store::ActionOutcome::Failed { kind, .. } => format!("{}", kind),
        };
        let fingerprint = record
            .applied_fingerprint
            .as_ref()
            .map(|f| f.as_str().chars().take(19).collect::<String>())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<8} {:<8} {:<26} {:<10} {}",
            record.tenant_id,
            record.jail_present,
            record.last_action.as_str(),
            record.last_attempt_time.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            result,
            fingerprint
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn check_config(config: &Config) -> Result<ExitCode> {
    if let Err(e) = jail::verify_helpers_installed(&config.jail) {
        warn!("{:#}", e);
    }

    let text = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{}", text);
    Ok(ExitCode::SUCCESS)
}
