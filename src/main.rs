use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fieldclimate_db::common::AppState;
use fieldclimate_db::config::{Config, MAX_BACKFILL_DAYS};
use fieldclimate_db::error::{AppError, AppResult};
use fieldclimate_db::fieldclimate::{FieldClimateClient, StationApi};
use fieldclimate_db::routes;
use fieldclimate_db::storage;
use fieldclimate_db::sync::{self, CollectOptions, Outcome, RunSummary, StationReport};

#[derive(Debug, Parser)]
#[command(name = "fieldclimate-db", version, about = "Collect FieldClimate station data into SQLite")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Collect new measurements for every enabled station (default).
    Collect,
    /// Collect a single station.
    Station {
        station_id: String,
        /// Backfill this many days regardless of the last stored reading.
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_BACKFILL_DAYS))]
        days: Option<i64>,
        /// Re-run sensor discovery first.
        #[arg(long)]
        refresh: bool,
    },
    /// Print storage statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Collect every INTERVAL_MINUTES until interrupted.
    Schedule,
    /// Serve the store over a read-only HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command.unwrap_or(Command::Collect), config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "debug"
    } else {
        "info,fieldclimate_db=debug"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn run(command: Command, config: Config) -> AppResult<ExitCode> {
    tracing::info!(
        database = %config.database_path.display(),
        stations = config.stations.len(),
        "Configuration loaded"
    );
    let db = storage::open(&config).await?;

    match command {
        Command::Collect => {
            let client = FieldClimateClient::from_config(&config)?;
            let summary = sync::worker::run_all(&db, &client, &config).await?;
            print_summary(&summary);
            Ok(exit_code(&summary))
        }
        Command::Station {
            station_id,
            days,
            refresh,
        } => {
            let client = FieldClimateClient::from_config(&config)?;
            let options = CollectOptions {
                backfill_days: days,
                force_refresh: refresh,
            };
            let report =
                sync::worker::run_station(&db, &client, &config, &station_id, options).await?;
            print_report(&report);
            let failed = report.outcome == Outcome::Failed;
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Command::Stats { json } => {
            let stats = storage::stats(&db, Some(&config.database_path)).await?;
            if json {
                let rendered = serde_json::to_string_pretty(&stats)
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                println!("{rendered}");
            } else {
                println!("Stations:      {} ({} enabled)", stats.station_count, stats.enabled_station_count);
                println!("Sensors:       {}", stats.sensor_count);
                println!("Measurements:  {}", stats.measurement_count);
                if let Some(bytes) = stats.database_size_bytes {
                    println!("Database size: {:.2} MiB", bytes as f64 / (1024.0 * 1024.0));
                }
                for station in &stats.stations {
                    println!(
                        "  {:<12} {:<24} {:>8} sensors {:>10} rows  last {}{}",
                        station.id,
                        station.name,
                        station.sensor_count,
                        station.measurement_count,
                        station
                            .last_updated
                            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
                        if station.enabled { "" } else { "  (disabled)" },
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Schedule => {
            let client: Arc<dyn StationApi> = Arc::new(FieldClimateClient::from_config(&config)?);
            let shutdown = CancellationToken::new();
            let scheduler = tokio::spawn(sync::scheduler::run_scheduler(
                db,
                client,
                Arc::new(config),
                shutdown.clone(),
            ));

            shutdown_signal().await;
            shutdown.cancel();
            if let Err(e) = scheduler.await {
                tracing::error!(error = %e, "Scheduler task panicked");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            let addr = config.bind_address();
            let app = routes::build_router(AppState::new(db, Arc::new(config)));

            tracing::info!(address = %addr, "Starting read-only API");
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| AppError::Internal(format!("Cannot bind {addr}: {e}")))?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;

            tracing::info!("Server shut down gracefully");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_report(report: &StationReport) {
    println!(
        "{:<12} {:<9} stored {:>7}  batches {:>3}  new sensors {:>2}  {:.1}s",
        report.station_id,
        report.outcome,
        report.measurements_stored,
        report.batches_committed,
        report.sensors_discovered,
        report.elapsed.as_secs_f64(),
    );
    if report.readings_skipped > 0 {
        println!("             skipped {} readings of unregistered sensors", report.readings_skipped);
    }
    for error in &report.errors {
        println!("             error: {error}");
    }
}

fn print_summary(summary: &RunSummary) {
    for report in &summary.stations {
        print_report(report);
    }
    println!(
        "{} succeeded, {} partial, {} failed; {} measurements stored in {:.1}s",
        summary.count(Outcome::Succeeded),
        summary.count(Outcome::Partial),
        summary.count(Outcome::Failed),
        summary.measurements_stored(),
        summary.elapsed.as_secs_f64(),
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}
