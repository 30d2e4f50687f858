//! Multi-tenant WAF gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────────────────┐
//!                         │                        GATEWAY                             │
//!                         │                                                            │
//!   Client Request        │  ┌────────┐   ┌──────────┐   ┌─────────┐   ┌──────────┐   │
//!   ──────────────────────┼─▶│  net   │──▶│   http   │──▶│ domain  │──▶│   cdn    │   │
//!                         │  │ TLS/SNI│   │ dispatch │   │resolver │   │ (assets) │   │
//!                         │  └────────┘   └──────────┘   └─────────┘   └────┬─────┘   │
//!                         │                                                 │ dynamic │
//!                         │                                                 ▼         │
//!                         │                 ┌──────────┐   ┌─────────┐   ┌──────────┐ │
//!   Client Response       │                 │  proxy   │◀──│  auth   │◀──│   waf    │ │
//!   ◀─────────────────────┼─────────────────│ static / │   │ OAuth   │   │ CC/policy│ │
//!                         │                 │ fcgi/http│   └─────────┘   └──────────┘ │
//!                         │                 └────┬─────┘                              │
//!                         │                      ▼                                    │
//!                         │                   Backends                                │
//!                         │                                                            │
//!                         │  ┌──────────────────────────────────────────────────────┐ │
//!                         │  │ Cross-cutting: config · data (file / RPC) · store ·  │ │
//!                         │  │ observability · lifecycle (signals, reload, shutdown) │ │
//!                         │  └──────────────────────────────────────────────────────┘ │
//!                         └───────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use waf_gateway::config::load_or_default;
use waf_gateway::lifecycle;
use waf_gateway::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "waf-gateway", version, about = "Multi-tenant WAF reverse proxy gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_or_default(&args.config)?;
    logging::init(&config.observability.log_level);

    tracing::info!("waf-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    if !args.config.exists() {
        tracing::warn!(path = ?args.config, "Config file not found, using defaults");
    }
    tracing::info!(
        http_address = %config.listener.http_address,
        https_address = ?config.listener.https_address,
        role = ?config.node.role,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    lifecycle::run(config).await?;
    Ok(())
}
