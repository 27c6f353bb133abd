use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ingest_gateway::config::Config;
use ingest_gateway::state::AppState;
use ingest_gateway::{http, mode, workers};

#[derive(Parser)]
#[command(
    name = "ingest-gateway",
    version,
    about = "Event ingest gateway — accepts events at HTTP speed, forwards reliably in the background"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override PORT for `serve` (also the implicit default command)
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default if no subcommand is given)
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one queue-worker tick against the configured sink and exit
    Sync,
    /// Run one replay-worker tick against the configured webhook and exit
    Replay,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest_gateway=info,tower_http=info".into()),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command.unwrap_or(Commands::Serve { port: cli.port }) {
        Commands::Serve { port } => {
            let mut config = Config::from_env()?;
            if let Some(p) = port {
                config.port = p;
            }
            rt.block_on(serve(config))
        }
        Commands::Sync => rt.block_on(run_sync_once()),
        Commands::Replay => rt.block_on(run_replay_once()),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let mode_label = mode::ModeMachine::from_config(&config).mode_label();
    let state = Arc::new(AppState::new(config)?);

    tracing::info!(mode = mode_label, addr = %addr, "starting ingest gateway");

    spawn_workers(state.clone());

    let app = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("ingest gateway shut down");
    Ok(())
}

/// Spawn the queue worker and replay worker as independent periodic tasks,
/// each gated by the mode machine exactly once at startup (spec §4.9/§4.10 —
/// the worker is "never started" unless its toggles are armed; rather than
/// have a running task no-op on every tick forever, we just don't spawn it).
fn spawn_workers(state: Arc<AppState>) {
    if state.mode.sync_enabled() {
        let interval_ms = state.config.worker_interval_ms;
        let worker_state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tick.tick().await;
                if worker_state.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                let result = workers::queue_worker::tick_once(&worker_state).await;
                if let Some(err) = &result.error {
                    tracing::warn!(error = %err, detail = ?result.detail, "queue worker tick failed");
                }
            }
        });
    } else {
        tracing::info!("queue worker not started (OPS_MODE != FULL or EXTERNAL_SYNC != ON)");
    }

    if state.mode.jsonl_enabled() && state.mode.replay_enabled() {
        let interval_ms = state.config.replay_interval_ms;
        let worker_state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tick.tick().await;
                if worker_state.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                let result = workers::replay_worker::tick_once(&worker_state).await;
                if result.failed > 0 {
                    tracing::warn!(failed = result.failed, "replay worker tick had a failure");
                }
            }
        });
    } else {
        tracing::info!("replay worker not started (JSONL/REPLAY_ENABLED not both armed)");
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM, then flip the shared shutdown flag so
/// in-flight ticks finish but no new tick starts (spec §5: "implementations
/// should drain in-flight ticks and flush the spool writer before exit").
async fn shutdown_signal(state: Arc<AppState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    state.shutting_down.store(true, Ordering::Release);
    tracing::info!("shutdown signal received, draining in-flight ticks");
}

/// One-shot `sync` CLI command: build a fresh `AppState` from the
/// environment, run a single queue-worker tick, print the JSON result.
async fn run_sync_once() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let state = Arc::new(AppState::new(config)?);
    let result = workers::queue_worker::tick_once(&state).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// One-shot `replay` CLI command, mirroring `run_sync_once`.
async fn run_replay_once() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let state = Arc::new(AppState::new(config)?);
    let result = workers::replay_worker::tick_once(&state).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
