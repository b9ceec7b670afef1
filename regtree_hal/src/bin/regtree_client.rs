//! # Register Tree Client
//!
//! One-shot remote access to a running `regtree_server`.
//!
//! # Usage
//!
//! ```bash
//! regtree_client get bench.board.Gain
//! regtree_client --addr 10.0.0.2:9099 set bench.board.Gain 0x10
//! regtree_client exec bench.board.Reset
//! regtree_client dump > snapshot.toml
//! ```

use clap::{Parser, Subcommand};
use regtree_common::consts::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_SERVER_PORT};
use regtree_hal::remote::RemoteClient;
use serde_json::Value;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Register tree client
#[derive(Parser, Debug)]
#[command(name = "regtree_client")]
#[command(version)]
#[command(about = "Query and drive a register tree server")]
struct Args {
    /// Server address
    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_SERVER_PORT}"))]
    addr: String,

    /// Connection handshake bound in milliseconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    op: Op,
}

#[derive(Subcommand, Debug)]
enum Op {
    /// Read a variable from hardware (display string)
    Get {
        /// Absolute path
        path: String,
    },
    /// Shadow value of a variable (display string)
    Value {
        /// Absolute path
        path: String,
    },
    /// Assign a variable from a display string
    Set {
        /// Absolute path
        path: String,
        /// Display string
        value: String,
    },
    /// Invoke a command
    Exec {
        /// Absolute path
        path: String,
        /// Optional argument, parsed as JSON when possible
        arg: Option<String>,
    },
    /// Print the configuration dump of the whole tree
    Dump,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let client = match RemoteClient::connect(&args.addr, Duration::from_millis(args.timeout_ms)) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("regtree_client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let answer = match &args.op {
        Op::Get { path } => client.get_display(path),
        Op::Value { path } => client.value_display(path),
        Op::Set { path, value } => client.set_display(path, value).then(String::new),
        Op::Exec { path, arg } => {
            let arg = arg
                .as_deref()
                .map(|a| serde_json::from_str(a).unwrap_or_else(|_| Value::from(a)));
            match client.exec(path, arg) {
                Some(Value::String(text)) => Some(text),
                Some(other) => Some(other.to_string()),
                None => Some(String::new()),
            }
        }
        Op::Dump => client.get_config(),
    };

    match answer {
        Some(text) => {
            if !text.is_empty() {
                println!("{text}");
            }
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("regtree_client: request failed");
            ExitCode::FAILURE
        }
    }
}
