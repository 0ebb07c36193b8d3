//! # ADS-over-MQTT Agent
//!
//! Bridge runtime that talks ADS to one PLC through an MQTT broker.
//!
//! ## Architecture
//!
//! The agent runs two concurrent loops:
//! 1. **Pump**: polls the MQTT event loop, dispatches ADS responses and
//!    forwards liveness notifications and reconnects
//! 2. **Main**: loads the symbol table on connect, polls the symbol version,
//!    reloads on change events and runs the optional cyclic sum read

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting ADS-over-MQTT Agent"
    );

    let config = AgentConfig::from_env()?;
    tracing::info!(
        namespace = %config.ads.namespace,
        local = %config.ads.local_net_id,
        target = %config.ads.target_net_id,
        "Agent initialized"
    );

    Agent::new(config).run().await?;

    Ok(())
}
