//! Request dispatch onto a tree.

use crate::boundary::catch_panic;
use crate::error::NodeError;
use crate::remote::envelope::{Reply, Request};
use crate::remote::transport::RequestHandler;
use crate::tree::{Attribute, Root};
use regtree_common::Value;
use regtree_common::consts::ROOT_PATH_SENTINEL;
use tracing::{debug, warn};

/// Answers envelopes against one tree.
///
/// Unknown paths and attributes answer `null`. Failures of the call itself,
/// including panics, answer [`Reply::Error`]; nothing escapes `handle`.
#[derive(Clone)]
pub struct RemoteServer {
    root: Root,
}

impl RemoteServer {
    /// Serve `root`.
    pub fn new(root: Root) -> Self {
        Self { root }
    }

    /// Tree served.
    pub fn root(&self) -> &Root {
        &self.root
    }

    fn dispatch(&self, request: &Request) -> Result<Value, NodeError> {
        if request.path == ROOT_PATH_SENTINEL {
            return serde_json::to_value(self.root.describe())
                .map_err(|e| NodeError::InvalidArgument(e.to_string()));
        }
        let Some(node) = self.root.get_node(&request.path) else {
            debug!(path = %request.path, "unknown path");
            return Ok(Value::Null);
        };
        let Some(attr) = &request.attr else {
            return serde_json::to_value(node.info())
                .map_err(|e| NodeError::InvalidArgument(e.to_string()));
        };
        match node.attribute(attr) {
            None => {
                debug!(path = %request.path, attr = %attr, "unknown attribute");
                Ok(Value::Null)
            }
            Some(Attribute::Value(value)) => Ok(value),
            Some(Attribute::Method(method)) => node.invoke(method, &request.args, &request.kwargs),
        }
    }
}

impl RequestHandler for RemoteServer {
    fn handle(&self, raw: &[u8]) -> Vec<u8> {
        let request = match Request::decode(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("undecodable request: {e}");
                return Reply::Error {
                    message: e.to_string(),
                }
                .encode();
            }
        };
        debug!(path = %request.path, attr = ?request.attr, "request");

        let reply = match catch_panic(|| self.dispatch(&request)) {
            // Text that would read back as an envelope goes out wrapped.
            Ok(Ok(Value::String(text)))
                if request.raw_str && Reply::decode(text.as_bytes()).is_err() =>
            {
                return text.into_bytes();
            }
            Ok(Ok(value)) => Reply::Ok { value },
            Ok(Err(e)) => Reply::Error {
                message: e.to_string(),
            },
            Err(panic) => {
                warn!(path = %request.path, "request panicked: {panic}");
                Reply::Error {
                    message: format!("panicked: {panic}"),
                }
            }
        };
        reply.encode()
    }
}
