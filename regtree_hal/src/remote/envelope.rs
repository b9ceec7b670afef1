//! Request and reply envelopes (JSON).

use crate::remote::RemoteError;
use regtree_common::Value;
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};

/// One remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Absolute node path, or `__ROOT__`.
    pub path: String,
    /// Attribute name; the node description when absent.
    #[serde(default)]
    pub attr: Option<String>,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// Reply with raw text when the result is a string.
    #[serde(default)]
    pub raw_str: bool,
}

impl Request {
    /// Request for `attr` on `path` without arguments.
    pub fn new(path: impl Into<String>, attr: Option<&str>) -> Self {
        Self {
            path: path.into(),
            attr: attr.map(str::to_string),
            args: Vec::new(),
            kwargs: Map::new(),
            raw_str: false,
        }
    }

    /// Positional arguments.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Keyword arguments.
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Ask for raw text passthrough.
    pub fn raw(mut self) -> Self {
        self.raw_str = true;
        self
    }

    /// Serialize.
    pub fn encode(&self) -> Result<Vec<u8>, RemoteError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize.
    pub fn decode(bytes: &[u8]) -> Result<Self, RemoteError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Server answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    /// Call succeeded.
    Ok {
        /// Result, `null` for unknown paths and attributes
        value: Value,
    },
    /// Call failed on the server.
    Error {
        /// Rendered error
        message: String,
    },
}

impl Reply {
    /// Serialize. Never fails: values are already JSON.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self)
            .unwrap_or_else(|e| error_bytes(&format!("reply encoding failed: {e}")))
    }

    /// Deserialize.
    pub fn decode(bytes: &[u8]) -> Result<Self, RemoteError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Turn a server error into `RemoteError::Server`.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self {
            Self::Ok { value } => Ok(value),
            Self::Error { message } => Err(RemoteError::Server(message)),
        }
    }
}

/// Error reply built from a plain JSON value, which always serializes.
fn error_bytes(message: &str) -> Vec<u8> {
    json!({ "status": "error", "message": message })
        .to_string()
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = Request::decode(br#"{"path":"root.a"}"#).unwrap();
        assert_eq!(req, Request::new("root.a", None));
    }

    #[test]
    fn test_error_fallback_escapes_message() {
        let bytes = error_bytes(r#"bad "quoted" \ path"#);
        assert_eq!(
            Reply::decode(&bytes).unwrap(),
            Reply::Error {
                message: r#"bad "quoted" \ path"#.to_string()
            }
        );
    }

    #[test]
    fn test_reply_wire_shape() {
        let bytes = Reply::Ok { value: json!(3) }.encode();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"status":"ok","value":3}"#);
        let err = Reply::decode(br#"{"status":"error","message":"x"}"#).unwrap();
        assert!(matches!(err.into_result(), Err(RemoteError::Server(m)) if m == "x"));
    }
}
