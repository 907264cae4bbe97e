//! Bazaar relay server: real-time direct messages and read receipts.
//!
//! An axum WebSocket server that routes chat events between marketplace
//! users. Each user id is a room; messages sent to a user are delivered to
//! every connection currently joined as that user and dropped otherwise.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! cargo run --bin bazaar-relay
//!
//! # Run on a custom port, accepting the production storefront
//! cargo run --bin bazaar-relay -- --port 8080 --allowed-origin https://shop.example.com
//!
//! # Or via environment variables
//! PORT=8080 RELAY_ALLOWED_ORIGIN=https://shop.example.com cargo run --bin bazaar-relay
//! ```

use std::sync::Arc;
use std::time::Duration;

use bazaar_relay::config::{RelayCliArgs, RelayConfig};
use bazaar_relay::relay::{self, RelayState};
use clap::Parser;

/// How long close frames get to flush before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let bind_addr = config.bind_addr();
    tracing::info!(
        addr = %bind_addr,
        allowed_origin = %config.allowed_origin,
        "starting bazaar relay"
    );

    let state = Arc::new(RelayState::with_config(&config));

    let (bound_addr, mut handle) =
        match relay::start_server_with_state(&bind_addr, Arc::clone(&state)).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to start relay server");
                std::process::exit(1);
            }
        };
    tracing::info!(addr = %bound_addr, "relay listening");

    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down, closing connections");
            state.close_all_connections();
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            handle.abort();
        }
    }
}
