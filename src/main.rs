use std::sync::Arc;

use tracing::{error, info};

use feedrelay::{Config, LogPlatform, RelayService, StateHandle};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = feedrelay::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedrelay::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // A corrupt state file must refuse to start polling.
    let state = match StateHandle::load(&config.storage.path) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to load persisted state: {e}");
            std::process::exit(1);
        }
    };

    let service = match RelayService::from_config(&config, state, Arc::new(LogPlatform)) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to assemble relay service: {e}");
            std::process::exit(1);
        }
    };

    match service.restore_all().await {
        Ok(count) => info!("feedrelay running with {count} scheduled subscription(s)"),
        Err(e) => {
            error!("Failed to restore schedules: {e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for shutdown signal: {e}");
    }

    info!("Shutting down, cancelling scheduled jobs");
    service.shutdown();
}
