use clap::{Parser, Subcommand};
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use locatrack::config::Config;
use locatrack::device::StaticDeviceInfo;
use locatrack::dispatch::{DispatchScheduler, HttpDispatcher, JobTable};
use locatrack::source::StationarySource;
use locatrack::store::JsonLinesStore;
use locatrack::tracking::{Capabilities, RestartGuard, TrackingController};
use locatrack::web::{self, AppState};
use locatrack::StateStore;

#[derive(Parser)]
#[command(name = "locatrack")]
#[command(about = "Periodic location capture and dispatch")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate { config: String },
    /// Run the tracker with a configuration file
    Run { config: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Run { config } => run(&config).await,
    }
}

fn init_logging(verbose: u8) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

fn validate(path: &str) -> ExitCode {
    match Config::from_file(path) {
        Ok(config) => {
            println!(
                "Configuration is valid ({} endpoint(s))",
                config.tracking.endpoints.len()
            );
            for endpoint in &config.tracking.endpoints {
                println!("  {} ({} header(s))", endpoint.url(), endpoint.headers().len());
            }
            println!(
                "  capture every {}, dispatch every {}, accuracy {}",
                humantime::format_duration(config.tracking.capture_interval),
                humantime::format_duration(config.tracking.dispatch_interval),
                config.tracking.accuracy
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &str) -> ExitCode {
    let config = match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (controller, guard) = match start(&config).await {
        Ok(parts) => parts,
        Err(e) => {
            log::error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = config.web.clone().map(|web_config| {
        let state = AppState {
            config: Arc::new(config.clone()),
            controller: controller.clone(),
        };
        tokio::spawn(async move { web::run_server(&web_config.bind, state).await })
    });

    let outcome = match server {
        Some(server) => tokio::select! {
            result = server => match result {
                Ok(Ok(())) => ExitCode::SUCCESS,
                Ok(Err(e)) => {
                    log::error!("Server error: {}", e);
                    ExitCode::FAILURE
                }
                Err(e) => {
                    log::error!("Server task failed: {}", e);
                    ExitCode::FAILURE
                }
            },
            _ = tokio::signal::ctrl_c() => ExitCode::SUCCESS,
        },
        None => match tokio::signal::ctrl_c().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("Failed to listen for shutdown signal: {}", e);
                ExitCode::FAILURE
            }
        },
    };

    log::info!("Shutting down");
    guard.on_task_removed();
    outcome
}

async fn start(
    config: &Config,
) -> Result<(Arc<TrackingController>, RestartGuard), Box<dyn std::error::Error>> {
    fs::create_dir_all(&config.state.directory)?;

    let source = StationarySource::from_coordinates(
        &config.source.coordinates,
        config.source.altitude_m,
        config.source.accuracy_m,
    )
    .ok_or_else(|| format!("invalid source coordinates {:?}", config.source.coordinates))?;

    let store = Arc::new(JsonLinesStore::open(config.state.buffer_file())?);
    let state = Arc::new(StateStore::open(config.state.state_file())?);
    let scheduler = Arc::new(DispatchScheduler::new(
        store.clone(),
        Arc::new(HttpDispatcher::new()?),
        JobTable::new(config.state.job_table()),
    ));
    scheduler.restore()?;

    let capabilities = Capabilities {
        source: Arc::new(source),
        store,
        device: Arc::new(StaticDeviceInfo::from_config(&config.device)),
    };
    let controller = TrackingController::builder(capabilities, scheduler, state).build();

    controller.initialize(config.tracking_options()).await?;
    let guard = RestartGuard::new(controller.clone());
    guard.recover();

    if config.tracking.autostart && !controller.is_tracking() {
        if let Err(e) = controller.start_tracking().await {
            log::warn!("Tracking did not start: {}", e);
        }
    }

    Ok((controller, guard))
}
