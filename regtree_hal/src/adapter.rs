//! String control adapter.
//!
//! Maps `get`/`set`/`exec`/`value` string operations onto a [`Root`], for
//! control front-ends that only exchange text. The line form
//! `"<op> <path> [arg]"` is served over TCP by
//! [`serve_lines`](crate::remote::transport::serve_lines).

use crate::error::NodeError;
use crate::remote::transport::LineHandler;
use crate::tree::Root;
use regtree_common::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Operation requested by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// Hardware read, display string
    Get,
    /// Assign from display string
    Set,
    /// Invoke a command
    Exec,
    /// Shadow value, display string
    Value,
}

impl FromStr for ControlOp {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "set" => Ok(Self::Set),
            "exec" => Ok(Self::Exec),
            "value" => Ok(Self::Value),
            other => Err(NodeError::InvalidArgument(format!(
                "unknown operation `{other}`"
            ))),
        }
    }
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Exec => "exec",
            Self::Value => "value",
        };
        f.write_str(name)
    }
}

/// Text front-end over a tree.
#[derive(Clone)]
pub struct ControlAdapter {
    root: Root,
}

impl ControlAdapter {
    /// Adapter over `root`.
    pub fn new(root: Root) -> Self {
        Self { root }
    }

    /// Run one operation. `Set` answers an empty string; `Exec` answers an
    /// empty string when the command returns nothing.
    pub fn handle(&self, op: ControlOp, path: &str, arg: Option<&str>) -> Result<String, NodeError> {
        debug!(%op, path, arg, "control request");
        match op {
            ControlOp::Get => self.root.get_display(path),
            ControlOp::Value => self.root.value_display(path),
            ControlOp::Set => {
                let text = arg.ok_or(NodeError::MissingArgument("value"))?;
                self.root.set_display(path, text)?;
                Ok(String::new())
            }
            ControlOp::Exec => {
                let result = self.root.exec(path, arg.map(Value::from))?;
                Ok(match result {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(text)) => text,
                    Some(other) => other.to_string(),
                })
            }
        }
    }
}

impl LineHandler for ControlAdapter {
    fn handle_line(&self, line: &str) -> String {
        let mut parts = line.trim().splitn(3, char::is_whitespace);
        let op = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        let result = op
            .parse::<ControlOp>()
            .and_then(|op| {
                if path.is_empty() {
                    Err(NodeError::MissingArgument("path"))
                } else {
                    self.handle(op, path, arg)
                }
            });
        result.unwrap_or_else(|e| {
            warn!(line, "control request failed: {e}");
            format!("ERROR: {e}")
        })
    }
}
