//! Huddle relay server: multi-room WebSocket signaling for meetings.
//!
//! Participants connect to `/ws/{room_id}/{client_id}` and exchange JSON
//! signaling envelopes (offer/answer/ICE/presence) with the rest of their
//! room. The relay never interprets SDP or ICE payloads.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin huddle-relay
//!
//! # Run on custom address
//! cargo run --bin huddle-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! HUDDLE_ADDR=127.0.0.1:8080 cargo run --bin huddle-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use huddle_relay::config::{RelayCliArgs, RelayConfig};
use huddle_relay::relay::{self, RelayState};

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

    tracing::info!(addr = %config.bind_addr, "starting huddle relay server");

    let state = Arc::new(RelayState::with_config(&config));

    let shutdown_state = Arc::clone(&state);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested, closing all rooms");
        shutdown_state.coordinator.close_all().await;
    };

    match relay::start_server_with_shutdown(&config.bind_addr, state, shutdown).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
