//! mssql-parallel-copy CLI - partitioned parallel table copy between SQL Server databases.

use clap::{Parser, Subcommand};
use mssql_parallel_copy::{Config, ConnectionConfig, CopyError, Orchestrator, RunStatus};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

const DEFAULT_CONFIG: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "mssql-parallel-copy")]
#[command(about = "Partitioned parallel table copy between SQL Server databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file [default: config.yaml if present]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Source connection string (ADO.NET format), overrides the file
    #[arg(long, global = true)]
    source: Option<String>,

    /// Destination connection string (ADO.NET format), overrides the file
    #[arg(long, global = true)]
    destination: Option<String>,

    /// Table to copy (repeatable), replaces the file's table list
    #[arg(long = "table", global = true)]
    tables: Vec<String>,

    /// Override number of workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Override number of logical partitions for unpartitioned tables
    #[arg(long, global = true)]
    logical_partitions: Option<u32>,

    /// Exit with code 2 when any partition fails to copy
    #[arg(long, global = true)]
    strict: bool,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    /// Seconds to wait for in-flight partitions after SIGINT/SIGTERM
    #[arg(long, default_value = "60", global = true)]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Truncate destination tables and copy every partition
    Run,

    /// Show the partition plan without changing anything
    Plan,

    /// Compare source and destination row counts
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), CopyError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => {
            let cancel_token = setup_signal_handler(cli.shutdown_timeout);
            let mut orchestrator = Orchestrator::connect(config)?;
            let report = orchestrator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                let status_msg = match report.status {
                    RunStatus::Completed => "Copy completed!",
                    RunStatus::CompletedWithFailures => "Copy completed with failures!",
                    RunStatus::Cancelled => "Copy cancelled!",
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!(
                    "  Partitions: {}/{} ({} failed, {} skipped)",
                    report.tasks_succeeded,
                    report.tasks_total,
                    report.tasks_failed,
                    report.tasks_skipped
                );
                println!("  Rows: {}", report.rows_copied);
                println!("  Throughput: {:.0} rows/sec", report.rows_per_second);
                for table in &report.tables {
                    println!(
                        "    {}: {} rows, {} {} partitions ({} failed)",
                        table.table,
                        table.rows_copied,
                        table.partitions,
                        table.strategy,
                        table.partitions_failed
                    );
                }
                if !report.failed_partitions.is_empty() {
                    println!("  Failed partitions:");
                    for failed in &report.failed_partitions {
                        println!(
                            "    {} p{}: {}",
                            failed.table, failed.partition, failed.error
                        );
                    }
                }
            }

            report.ensure_complete(cli.strict)?;
        }

        Commands::Plan => {
            let mut orchestrator = Orchestrator::connect(config)?;
            let tasks = orchestrator.plan().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                println!("Partition plan ({} tasks):", tasks.len());
                for task in &tasks {
                    println!(
                        "  {:<40} {:<8} WHERE {}",
                        task.to_string(),
                        task.strategy.kind(),
                        task.predicate()?
                    );
                }
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::connect(config)?;
            let results = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Row count validation:");
                for r in &results {
                    println!(
                        "  {}: source={} destination={} {}",
                        r.table,
                        r.source_rows,
                        r.destination_rows,
                        if r.matches { "OK" } else { "MISMATCH" }
                    );
                }
            }

            let mismatched = results.iter().filter(|r| !r.matches).count();
            if mismatched > 0 {
                return Err(CopyError::Config(format!(
                    "Row counts differ for {} of {} tables",
                    mismatched,
                    results.len()
                )));
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::connect(config)?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Destination: {} ({}ms)",
                    if result.destination_connected { "OK" } else { "FAILED" },
                    result.destination_latency_ms
                );
                if let Some(ref err) = result.destination_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(CopyError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

/// Read the config file (explicit, or `config.yaml` if present), apply
/// command line overrides, then validate.
fn load_config(cli: &Cli) -> Result<Config, CopyError> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load_unvalidated(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            let config = Config::load_unvalidated(DEFAULT_CONFIG)?;
            info!("Loaded configuration from {}", DEFAULT_CONFIG);
            config
        }
        None => Config::default(),
    };

    if let Some(ado) = &cli.source {
        config.source = ConnectionConfig::from_ado(ado.clone());
    }
    if let Some(ado) = &cli.destination {
        config.destination = ConnectionConfig::from_ado(ado.clone());
    }
    if !cli.tables.is_empty() {
        config.copy.tables = cli.tables.clone();
    }
    if let Some(w) = cli.workers {
        config.copy.workers = w;
    }
    if let Some(n) = cli.logical_partitions {
        config.copy.logical_partitions = n;
    }

    config.validate()?;
    Ok(config)
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Exit if in-flight partitions have not finished `timeout_secs` after a
/// shutdown request.
fn spawn_shutdown_deadline(timeout_secs: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        eprintln!(
            "In-flight partitions did not finish within {}s; exiting",
            timeout_secs
        );
        std::process::exit(i32::from(mssql_parallel_copy::error::EXIT_CANCELLED));
    });
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to set up {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Finishing in-flight partitions (timeout: {}s)...",
                name, shutdown_timeout
            );
            token.cancel();
            spawn_shutdown_deadline(shutdown_timeout);
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to set up Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Finishing in-flight partitions...");
        token.cancel();
        spawn_shutdown_deadline(shutdown_timeout);
    });

    cancel_token
}
