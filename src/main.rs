//! ==============================================================================
//! main.rs - pressure bridge entry point
//! ==============================================================================
//!
//! purpose:
//!     relays pressure readings from a serial-attached microcontroller to a
//!     browser dashboard, and relays the dashboard's target values back.
//!
//! responsibilities:
//!     - load configuration (host.toml + command line overrides)
//!     - start the session event loop (batching, liveness, settings)
//!     - keep the serial link open, reopening after a fixed delay
//!     - serve the dashboard, its api and the websocket push channel
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                     pressure bridge                          │
//!     │  ┌─────────────┐    ┌──────────────┐    ┌────────────────┐   │
//!     │  │ serial link │───▶│   session    │───▶│   web server   │   │
//!     │  │  (link.rs)  │◀───│ (session.rs) │◀───│  (server.rs)   │   │
//!     │  └──────┬──────┘    └──────────────┘    └───────┬────────┘   │
//!     │         │       samples ▶  ◀ settings lines      │            │
//!     └─────────┼────────────────────────────────────────┼───────────┘
//!               │ "119.98\n"                             │ ws / http
//!        ┌──────┴──────┐                          ┌──────┴──────┐
//!        │ micro-      │                          │  dashboard  │
//!        │ controller  │  ◀ "120,80,75,-1,-1\n"   │  (browser)  │
//!        └─────────────┘                          └─────────────┘
//!
//! ==============================================================================

mod batch;
mod config;
mod domain;
mod link;
mod liveness;
mod protocol;
mod server;
mod session;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/host.toml if present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial device to open, overrides [serial].port
    #[arg(short, long, value_name = "PATH")]
    port: Option<String>,

    /// Baud rate, overrides [serial].baud_rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Log at debug level regardless of [logging].level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // startup banner
    println!("===========================================================");
    println!("  Pressure Bridge - serial sensor to live dashboard");
    println!("  line protocol v{}", protocol::PROTOCOL_VERSION);
    println!("===========================================================");

    // step 1: load configuration
    let mut config = match &cli.config {
        Some(path) => config::HostConfig::load(path)?,
        None => config::HostConfig::load_or_default(),
    };
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    config.print_summary();

    // step 2: logging
    init_logging(&config.logging.level);

    // step 3: session owns batch, liveness and settings
    let session = session::spawn(&config);

    // step 4: serial link, reopened forever on failure
    let serial = link::SerialLink::new(config.serial.port.clone(), config.serial.baud_rate);
    tokio::spawn(link::run(serial, config.serial.reopen_delay(), session.events()));

    // step 5: dashboard until ctrl-c
    tokio::select! {
        result = server::run_server(&config.server, session) => {
            if let Err(e) = &result {
                error!("web server error: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pressure_bridge={},tower_http=warn", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
