//! Foundry service binary.
//!
//! Subcommands: `serve` (chat loop), `worker --kind deploy|engineering`
//! (consumer-group job worker), `container-manager` (control-plane server plus
//! TTL reaper). Exit codes: 0 normal shutdown, 1 fatal config error,
//! 2 unrecoverable dependency failure.

mod wiring;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use config::{LogFormat, Settings};

/// Fatal config error (missing env var, bad value).
const EXIT_CONFIG: i32 = 1;
/// Unrecoverable dependency failure (Redis, Docker).
const EXIT_DEPENDENCY: i32 = 2;

#[derive(Parser)]
#[command(name = "foundryd", about = "Autonomous software-delivery orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum WorkerKind {
    Deploy,
    Engineering,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat service: incoming stream → session lock → coordinator graph.
    Serve,
    /// Run one job worker loop for the given kind.
    Worker {
        #[arg(long, value_enum)]
        kind: WorkerKind,
    },
    /// Serve the container control plane and the TTL reaper.
    ContainerManager,
}

fn init_tracing(settings: &Settings) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    match settings.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

/// Cancellation token wired to SIGINT/SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = config::load_and_apply("foundry", None) {
        eprintln!("config load failed: {}", e);
        std::process::exit(EXIT_CONFIG);
    }
    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("config error: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };
    init_tracing(&settings);

    let redis = match wiring::connect_redis(&settings).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "redis unavailable");
            std::process::exit(EXIT_DEPENDENCY);
        }
    };

    let shutdown = shutdown_token();
    let outcome = match cli.command {
        Command::Serve => wiring::serve(&settings, redis, shutdown).await,
        Command::Worker { kind } => {
            let kind = match kind {
                WorkerKind::Deploy => foundry::jobs::JobKind::Deploy,
                WorkerKind::Engineering => foundry::jobs::JobKind::Engineering,
            };
            wiring::worker(&settings, redis, kind, shutdown).await
        }
        Command::ContainerManager => wiring::container_manager(redis, shutdown).await,
    };

    match outcome {
        Ok(()) => info!("normal shutdown"),
        Err(e) => {
            error!(error = %e, "fatal dependency failure");
            std::process::exit(EXIT_DEPENDENCY);
        }
    }
}
