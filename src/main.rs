//! Rustscape Game Core
//!
//! Boots the game service: loads configuration, starts the worker runtime
//! and the game thread, and shuts everything down gracefully on Ctrl+C,
//! SIGTERM or a system update.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use rustscape_core::config::ServerConfig;
use rustscape_core::game::persistence::{JsonPlayerSaver, PlayerSaver};
use rustscape_core::game::world::{World, WorldSettings};
use rustscape_core::service::{GameService, ServiceSettings};
use rustscape_core::VERSION;

fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("╔══════════════════════════════════════════════╗");
    info!("║        Rustscape Game Core v{}               ║", VERSION);
    info!("╚══════════════════════════════════════════════╝");

    // Configuration decides how the worker runtime is sized
    let config = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(ServerConfig::load())?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker.core_threads)
        .max_blocking_threads(config.worker.max_threads)
        .thread_name(config.worker.thread_name.clone())
        .enable_all()
        .build()?;

    let service = GameService::new(ServiceSettings::from(&config), runtime.handle().clone());

    let saver: Arc<dyn PlayerSaver> = Arc::new(JsonPlayerSaver::new(config.players_path())?);
    let world_settings = WorldSettings::from_config(&config);
    let game_thread =
        service.spawn(move |service| World::with_settings(service, world_settings, saver))?;

    info!("Server startup complete!");
    info!("World {} is running", config.world_id);

    runtime.block_on(async {
        tokio::select! {
            _ = wait_for_shutdown() => {
                service.stop();
            }
            _ = service.wait_for_termination() => {
                info!("Game service stopped on its own");
            }
        }
    });

    info!("Shutting down server...");

    if game_thread.join().is_err() {
        error!(fatal = true, "Game thread panicked during shutdown");
    }
    drop(runtime);

    info!("Server shutdown complete. Goodbye!");
    std::process::exit(0);
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rustscape_core=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
