//! Named node attributes.
//!
//! The remote protocol addresses nodes by path and attribute name. Each
//! attribute is either a plain value or a [`Method`] invoked with
//! positional and keyword arguments.
//!
//! | class    | values                                   | methods |
//! |----------|------------------------------------------|---------|
//! | all      | `name` `path` `description` `class`      | |
//! | Device   | `enable` `nodes`                         | `writeBlocks` `verifyBlocks` `checkBlocks` `setEnable` |
//! | root     |                                          | `getConfig` `setConfig` |
//! | Variable | `mode` `units` `disp`                    | `get` `getDisp` `value` `valueDisp` `set` `setDisp` `post` |
//! | Command  |                                          | `exec` `call` `get` `value` `set` `post` |

use crate::error::NodeError;
use crate::tree::Node;
use regtree_common::Value;
use serde_json::Map;

/// Attribute resolved on a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Plain value
    Value(Value),
    /// Callable
    Method(Method),
}

/// Callable attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Hardware read
    Get,
    /// Hardware read as display string
    GetDisp,
    /// Shadow value
    Value,
    /// Shadow value as display string
    ValueDisp,
    /// Assign (`value`)
    Set,
    /// Assign from display string (`value`)
    SetDisp,
    /// Posted write (`value`)
    Post,
    /// Invoke command (`arg`)
    Exec,
    /// Commit blocks (`force`, `recurse`)
    WriteBlocks,
    /// Issue read-back (`recurse`)
    VerifyBlocks,
    /// Compare read-back (`recurse`)
    CheckBlocks,
    /// Change enable flag (`enable`)
    SetEnable,
    /// Dump configuration text
    GetConfig,
    /// Apply configuration text (`text`)
    SetConfig,
}

impl Node {
    /// Resolve an attribute by name. `None` when the node has none.
    pub fn attribute(&self, name: &str) -> Option<Attribute> {
        let value = match name {
            "name" => Some(Value::from(self.name())),
            "path" => Some(Value::from(self.path())),
            "description" => Some(Value::from(self.description())),
            "class" => Some(Value::from(self.class())),
            _ => None,
        };
        if let Some(value) = value {
            return Some(Attribute::Value(value));
        }

        match self {
            Node::Device(dev) => match name {
                "enable" => Some(Attribute::Value(Value::Bool(dev.is_enabled()))),
                "nodes" => Some(Attribute::Value(Value::from(
                    dev.children()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect::<Vec<_>>(),
                ))),
                "writeBlocks" => Some(Attribute::Method(Method::WriteBlocks)),
                "verifyBlocks" => Some(Attribute::Method(Method::VerifyBlocks)),
                "checkBlocks" => Some(Attribute::Method(Method::CheckBlocks)),
                "setEnable" => Some(Attribute::Method(Method::SetEnable)),
                "getConfig" if dev.parent().is_none() => Some(Attribute::Method(Method::GetConfig)),
                "setConfig" if dev.parent().is_none() => Some(Attribute::Method(Method::SetConfig)),
                _ => None,
            },
            Node::Variable(var) => match name {
                "mode" => Some(Attribute::Value(Value::from(var.mode().to_string()))),
                "units" => Some(Attribute::Value(
                    var.units().map_or(Value::Null, Value::from),
                )),
                "disp" => Some(Attribute::Value(
                    serde_json::to_value(var.disp()).unwrap_or(Value::Null),
                )),
                "get" => Some(Attribute::Method(Method::Get)),
                "getDisp" => Some(Attribute::Method(Method::GetDisp)),
                "value" => Some(Attribute::Method(Method::Value)),
                "valueDisp" => Some(Attribute::Method(Method::ValueDisp)),
                "set" => Some(Attribute::Method(Method::Set)),
                "setDisp" => Some(Attribute::Method(Method::SetDisp)),
                "post" => Some(Attribute::Method(Method::Post)),
                _ => None,
            },
            Node::Command(_) => match name {
                "exec" | "call" => Some(Attribute::Method(Method::Exec)),
                "get" => Some(Attribute::Method(Method::Get)),
                "value" => Some(Attribute::Method(Method::Value)),
                "set" => Some(Attribute::Method(Method::Set)),
                "post" => Some(Attribute::Method(Method::Post)),
                _ => None,
            },
        }
    }

    /// Invoke a method. Arguments are taken by position first, then by
    /// keyword.
    pub fn invoke(
        &self,
        method: Method,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, NodeError> {
        let arg = |idx: usize, name: &'static str| args.get(idx).or_else(|| kwargs.get(name));
        let required = |idx: usize, name: &'static str| {
            arg(idx, name)
                .cloned()
                .ok_or(NodeError::MissingArgument(name))
        };
        let flag = |idx: usize, name: &'static str, default: bool| match arg(idx, name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            Some(other) => Err(NodeError::InvalidArgument(format!(
                "{name} must be a boolean, got {other}"
            ))),
        };
        let text = |idx: usize, name: &'static str| {
            required(idx, name).map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
        };

        match method {
            Method::Get => self.get(),
            Method::GetDisp => self.get_display().map(Value::from),
            Method::Value => self.value(),
            Method::ValueDisp => self.value_display().map(Value::from),
            Method::Set => self.set(required(0, "value")?).map(|()| Value::Null),
            Method::SetDisp => self.set_display(&text(0, "value")?).map(|()| Value::Null),
            Method::Post => self.post(required(0, "value")?).map(|()| Value::Null),
            Method::Exec => {
                let result = self.exec(arg(0, "arg").cloned())?;
                Ok(result.unwrap_or(Value::Null))
            }
            Method::WriteBlocks => {
                let dev = self.device_or_err()?;
                let issued = dev.write_blocks(flag(0, "force", false)?, flag(1, "recurse", true)?)?;
                Ok(Value::from(issued))
            }
            Method::VerifyBlocks => {
                let dev = self.device_or_err()?;
                Ok(Value::from(dev.verify_blocks(flag(0, "recurse", true)?)?))
            }
            Method::CheckBlocks => {
                let dev = self.device_or_err()?;
                Ok(Value::Bool(dev.check_blocks(flag(0, "recurse", true)?)?))
            }
            Method::SetEnable => {
                let dev = self.device_or_err()?;
                dev.set_enabled(flag(0, "enable", true)?);
                Ok(Value::Null)
            }
            Method::GetConfig => {
                let dev = self.device_or_err()?;
                crate::tree::Root::from_device(dev)
                    .get_config()
                    .map(Value::from)
            }
            Method::SetConfig => {
                let dev = self.device_or_err()?;
                let assigned = crate::tree::Root::from_device(dev).set_config(&text(0, "text")?)?;
                Ok(Value::from(assigned))
            }
        }
    }

    fn device_or_err(&self) -> Result<&std::sync::Arc<crate::tree::Device>, NodeError> {
        self.as_device().ok_or_else(|| self.wrong_kind("Device"))
    }
}
