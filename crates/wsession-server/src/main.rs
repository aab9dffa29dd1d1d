//! WebSocket session server entry point
//!
//! Run with:
//! ```bash
//! cargo run -p wsession-server
//! ```
//!
//! Configuration is loaded from environment variables.

use tracing::{error, info};
use wsession_common::{try_init_tracing, try_init_tracing_with_config, AppConfig, AppResult};

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            if let Err(e) = try_init_tracing() {
                eprintln!("Warning: Failed to initialize tracing: {e}");
            }
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Initialize tracing
    if let Err(e) = try_init_tracing_with_config(config.tracing_config()) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config).await {
        error!(error = %e, code = e.error_code(), "Server failed");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> AppResult<()> {
    info!(
        name = %config.app.name,
        env = ?config.app.env,
        address = %config.websocket.address(),
        path = %config.websocket.path,
        "Starting WebSocket session server"
    );

    wsession_server::run(config).await?;

    info!("Server shut down");
    Ok(())
}
