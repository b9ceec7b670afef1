//! Remote proxy protocol.
//!
//! A client sends `{path, attr, args, kwargs, raw_str}` envelopes to a
//! server owning the tree and gets one reply per request.
//!
//! - [`envelope`] - JSON request/reply types
//! - [`transport`] - framed TCP channel, in-process channel, listeners
//! - [`server`] - request dispatch onto a [`Root`](crate::tree::Root)
//! - [`client`] - proxy with swallow-and-log call semantics

pub mod client;
pub mod envelope;
pub mod server;
pub mod transport;

pub use client::RemoteClient;
pub use envelope::{Reply, Request};
pub use server::RemoteServer;
pub use transport::{LocalChannel, RequestChannel, RequestHandler, ServerHandle, TcpChannel};

use std::time::Duration;
use thiserror::Error;

/// Remote protocol failures.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Socket error.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope could not be (de)serialized.
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    /// Frame length above the limit.
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    /// Server reported an error.
    #[error("server: {0}")]
    Server(String),

    /// No root description within the handshake bound.
    #[error("no answer from {addr} within {timeout:?}")]
    ConnectTimeout {
        /// Peer
        addr: String,
        /// Bound
        timeout: Duration,
    },

    /// Peer closed the connection.
    #[error("connection closed")]
    Closed,
}
