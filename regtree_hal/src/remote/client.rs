//! Remote proxy client.
//!
//! `call` and its wrappers never fail: transport, codec and server errors
//! are logged with `warn!` and come back as `None`. `try_call` keeps the
//! error for callers that need it.

use crate::remote::RemoteError;
use crate::remote::envelope::{Reply, Request};
use crate::remote::transport::{RequestChannel, TcpChannel};
use regtree_common::Value;
use regtree_common::consts::{CONNECT_RETRY_INTERVAL_MS, ROOT_PATH_SENTINEL};
use serde_json::Map;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Proxy to a remote tree.
pub struct RemoteClient {
    channel: Box<dyn RequestChannel>,
    root: Value,
}

impl RemoteClient {
    /// Connect over TCP, waiting up to `timeout` for the server.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Self::with_channel(Box::new(TcpChannel::new(addr)), timeout)
    }

    /// Use an existing channel. Polls `__ROOT__` until a root description
    /// arrives or `timeout` elapses.
    pub fn with_channel(
        channel: Box<dyn RequestChannel>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let started = Instant::now();
        let probe = Request::new(ROOT_PATH_SENTINEL, None).encode()?;
        loop {
            match channel
                .request(&probe)
                .and_then(|bytes| Reply::decode(&bytes))
                .and_then(Reply::into_result)
            {
                Ok(root) if !root.is_null() => {
                    info!(peer = %channel.peer(), root = %root["path"], "connected to tree");
                    return Ok(Self { channel, root });
                }
                Ok(_) => debug!(peer = %channel.peer(), "empty root description"),
                Err(e) => debug!(peer = %channel.peer(), "root probe failed: {e}"),
            }
            if started.elapsed() >= timeout {
                return Err(RemoteError::ConnectTimeout {
                    addr: channel.peer(),
                    timeout,
                });
            }
            thread::sleep(Duration::from_millis(CONNECT_RETRY_INTERVAL_MS));
        }
    }

    /// Root description received at connect time.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Root path.
    pub fn root_path(&self) -> &str {
        self.root["path"].as_str().unwrap_or_default()
    }

    /// Send one envelope and return the decoded result.
    pub fn try_call(
        &self,
        path: &str,
        attr: Option<&str>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, RemoteError> {
        let request = Request::new(path, attr).with_args(args).with_kwargs(kwargs);
        let bytes = self.channel.request(&request.encode()?)?;
        Reply::decode(&bytes)?.into_result()
    }

    /// Send one envelope. `None` for `null` results and for any failure.
    pub fn call(
        &self,
        path: &str,
        attr: Option<&str>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Option<Value> {
        match self.try_call(path, attr, args, kwargs) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path, attr, "remote call failed: {e}");
                None
            }
        }
    }

    /// Call with raw text passthrough. Non-text results are rendered as
    /// JSON text. The server wraps text that would parse as an envelope,
    /// so decoding a reply first never misreads a raw string.
    pub fn call_raw(&self, path: &str, attr: Option<&str>, args: Vec<Value>) -> Option<String> {
        let request = Request::new(path, attr).with_args(args).raw();
        let result = request
            .encode()
            .and_then(|payload| self.channel.request(&payload));
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path, attr, "remote call failed: {e}");
                return None;
            }
        };
        match Reply::decode(&bytes) {
            Ok(Reply::Ok { value: Value::Null }) => None,
            Ok(Reply::Ok { value: Value::String(text) }) => Some(text),
            Ok(Reply::Ok { value }) => Some(value.to_string()),
            Ok(Reply::Error { message }) => {
                warn!(path, attr, "remote call failed: {message}");
                None
            }
            Err(_) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    /// Hardware read.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.call(path, Some("get"), Vec::new(), Map::new())
    }

    /// Hardware read as display string.
    pub fn get_display(&self, path: &str) -> Option<String> {
        self.call_raw(path, Some("getDisp"), Vec::new())
    }

    /// Shadow value.
    pub fn value(&self, path: &str) -> Option<Value> {
        self.call(path, Some("value"), Vec::new(), Map::new())
    }

    /// Shadow value as display string.
    pub fn value_display(&self, path: &str) -> Option<String> {
        self.call_raw(path, Some("valueDisp"), Vec::new())
    }

    /// Assign a value. `false` on failure.
    pub fn set(&self, path: &str, value: Value) -> bool {
        self.acknowledged(path, "set", value)
    }

    /// Assign from a display string. `false` on failure.
    pub fn set_display(&self, path: &str, text: &str) -> bool {
        self.acknowledged(path, "setDisp", Value::from(text))
    }

    /// Invoke a command.
    pub fn exec(&self, path: &str, arg: Option<Value>) -> Option<Value> {
        self.call(path, Some("exec"), arg.into_iter().collect(), Map::new())
    }

    /// Configuration dump of the remote tree.
    pub fn get_config(&self) -> Option<String> {
        self.call_raw(self.root_path(), Some("getConfig"), Vec::new())
    }

    /// Apply a configuration dump. Returns the number of variables set.
    pub fn set_config(&self, text: &str) -> Option<u64> {
        self.call(
            self.root_path(),
            Some("setConfig"),
            vec![Value::from(text)],
            Map::new(),
        )
        .and_then(|v| v.as_u64())
    }

    fn acknowledged(&self, path: &str, attr: &str, value: Value) -> bool {
        match self.try_call(path, Some(attr), vec![value], Map::new()) {
            Ok(_) => true,
            Err(e) => {
                warn!(path, attr, "remote call failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::server::RemoteServer;
    use crate::remote::transport::{LocalChannel, RequestHandler};
    use crate::tree::{Device, Root, VariableBuilder};
    use serde_json::json;
    use std::sync::Arc;

    struct Silent;

    impl RequestHandler for Silent {
        fn handle(&self, _request: &[u8]) -> Vec<u8> {
            Reply::Ok { value: Value::Null }.encode()
        }
    }

    fn client() -> RemoteClient {
        let root = Root::new("root", "");
        let dev = root.device().add_device(Device::new("dev", "")).unwrap();
        dev.add_variable(VariableBuilder::new("A").value(json!(1)))
            .unwrap();
        let channel = LocalChannel::new(Arc::new(RemoteServer::new(root)));
        RemoteClient::with_channel(Box::new(channel), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_connect_reads_root() {
        let client = client();
        assert_eq!(client.root_path(), "root");
    }

    #[test]
    fn test_connect_times_out() {
        let channel = LocalChannel::new(Arc::new(Silent));
        let started = Instant::now();
        let result = RemoteClient::with_channel(Box::new(channel), Duration::from_millis(250));
        assert!(matches!(result, Err(RemoteError::ConnectTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wrappers() {
        let client = client();
        assert_eq!(client.get("root.dev.A"), Some(json!(1)));
        assert!(client.set("root.dev.A", json!(4)));
        assert_eq!(client.value("root.dev.A"), Some(json!(4)));
        assert!(client.set_display("root.dev.A", "0x10"));
        assert_eq!(client.get_display("root.dev.A").as_deref(), Some("16"));
        assert!(!client.set("root.dev.A", json!("bogus")));
        assert_eq!(client.get("root.none"), None);
    }

    #[test]
    fn test_config_round_trip() {
        let client = client();
        let text = client.get_config().unwrap();
        assert!(client.set("root.dev.A", json!(9)));
        assert_eq!(client.set_config(&text), Some(1));
        assert_eq!(client.value("root.dev.A"), Some(json!(1)));
    }
}
