//! # Register Tree Server
//!
//! Builds the register tree from a TOML file and serves it over the remote
//! protocol (and the optional string endpoint) until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default config
//! regtree_server --config config/tree.toml
//!
//! # Verbose JSON logging
//! regtree_server --config config/tree.toml -v --json
//! ```

use clap::Parser;
use regtree_hal::core::TreeCore;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Register tree server
#[derive(Parser, Debug)]
#[command(name = "regtree_server")]
#[command(version)]
#[command(about = "Register tree server: remote and string control endpoints")]
#[command(long_about = None)]
struct Args {
    /// Path to the tree configuration file
    #[arg(short, long, default_value = "config/tree.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("server startup failed: {}", e);
        eprintln!("regtree_server: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = TreeCore::load_config(&args.config)?;

    setup_tracing(&args, config.shared.log_level.as_directive());

    info!(
        "Register tree server v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let mut core = TreeCore::new(config)?;

    let running = core.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    core.init()?;
    if let Err(e) = core.run() {
        error!("serve loop error: {}", e);
    }
    core.shutdown()?;

    info!("Register tree server shutdown complete");
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: &str) {
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
