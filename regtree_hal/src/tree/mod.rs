//! Node tree.
//!
//! The tree is a hierarchy of [`Device`]s holding [`Variable`]s,
//! [`Command`]s and further devices. Every node has a dotted path
//! (`root.dev.var`). Parents own their children; children keep a weak
//! back-reference so paths and owning devices can be resolved without
//! cycles.
//!
//! - [`device`] - containers, block ownership, recursive block operations
//! - [`variable`] - typed leaves, local or register backed
//! - [`root`] - path-addressed entry point
//! - [`attr`] - named attributes and methods used by the remote protocol
//! - [`build`] - tree construction from `TreeConfig`

pub mod attr;
pub mod build;
pub mod device;
pub mod root;
pub mod variable;

pub use attr::{Attribute, Method};
pub use device::Device;
pub use root::Root;
pub use variable::{Variable, VariableBuilder};

use crate::command::Command;
use crate::error::NodeError;
use regtree_common::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handle to any node.
#[derive(Clone)]
pub enum Node {
    /// Container
    Device(Arc<Device>),
    /// Typed leaf
    Variable(Arc<Variable>),
    /// Invocable leaf
    Command(Arc<Command>),
}

/// Resolves dotted paths to nodes.
///
/// Devices resolve paths relative to themselves, the root resolves absolute
/// paths.
pub trait NodeLookup {
    /// Node at `path`, if any.
    fn lookup(&self, path: &str) -> Option<Node>;
}

/// Serializable node description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Dotted path
    pub path: String,
    /// `Device`, `Variable` or `Command`
    pub class: String,
    /// Free text
    pub description: String,
    /// Child names, devices only
    pub children: Vec<String>,
}

impl Node {
    /// Node name.
    pub fn name(&self) -> &str {
        match self {
            Self::Device(d) => d.name(),
            Self::Variable(v) => v.name(),
            Self::Command(c) => c.name(),
        }
    }

    /// Dotted path.
    pub fn path(&self) -> String {
        match self {
            Self::Device(d) => d.path(),
            Self::Variable(v) => v.path(),
            Self::Command(c) => c.path(),
        }
    }

    /// Free text.
    pub fn description(&self) -> &str {
        match self {
            Self::Device(d) => d.description(),
            Self::Variable(v) => v.description(),
            Self::Command(c) => c.description(),
        }
    }

    /// Class name.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Device(_) => "Device",
            Self::Variable(_) => "Variable",
            Self::Command(_) => "Command",
        }
    }

    /// Description record.
    pub fn info(&self) -> NodeInfo {
        let children = match self {
            Self::Device(d) => d.children().iter().map(|c| c.name().to_string()).collect(),
            _ => Vec::new(),
        };
        NodeInfo {
            name: self.name().to_string(),
            path: self.path(),
            class: self.class().to_string(),
            description: self.description().to_string(),
            children,
        }
    }

    /// Device handle, if this is a device.
    pub fn as_device(&self) -> Option<&Arc<Device>> {
        match self {
            Self::Device(d) => Some(d),
            _ => None,
        }
    }

    /// Variable handle, if this is a variable.
    pub fn as_variable(&self) -> Option<&Arc<Variable>> {
        match self {
            Self::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Command handle, if this is a command.
    pub fn as_command(&self) -> Option<&Arc<Command>> {
        match self {
            Self::Command(c) => Some(c),
            _ => None,
        }
    }

    /// Read the current value (hardware read for registers).
    pub fn get(&self) -> Result<Value, NodeError> {
        match self {
            Self::Variable(v) => v.get(),
            Self::Command(c) => c.get(),
            Self::Device(_) => Err(self.wrong_kind("Variable")),
        }
    }

    /// Display string of [`get`](Self::get).
    pub fn get_display(&self) -> Result<String, NodeError> {
        match self {
            Self::Variable(v) => v.get_display(),
            Self::Command(c) => c.cell().get_display(),
            Self::Device(_) => Err(self.wrong_kind("Variable")),
        }
    }

    /// Last known value without touching hardware.
    pub fn value(&self) -> Result<Value, NodeError> {
        match self {
            Self::Variable(v) => Ok(v.value()),
            Self::Command(c) => Ok(c.value()),
            Self::Device(_) => Err(self.wrong_kind("Variable")),
        }
    }

    /// Display string of [`value`](Self::value).
    pub fn value_display(&self) -> Result<String, NodeError> {
        match self {
            Self::Variable(v) => Ok(v.value_display()),
            Self::Command(c) => Ok(c.cell().value_display()),
            Self::Device(_) => Err(self.wrong_kind("Variable")),
        }
    }

    /// Assign a value.
    pub fn set(&self, value: Value) -> Result<(), NodeError> {
        match self {
            Self::Variable(v) => v.set(value),
            Self::Command(c) => c.set(value),
            Self::Device(_) => Err(self.wrong_kind("Variable")),
        }
    }

    /// Assign from a display string.
    pub fn set_display(&self, text: &str) -> Result<(), NodeError> {
        match self {
            Self::Variable(v) => v.set_display(text),
            Self::Command(c) => c.cell().set_display(text),
            Self::Device(_) => Err(self.wrong_kind("Variable")),
        }
    }

    /// Posted (non-blocking) write.
    pub fn post(&self, value: Value) -> Result<(), NodeError> {
        match self {
            Self::Variable(v) => v.post(value),
            Self::Command(c) => c.post(value),
            Self::Device(_) => Err(self.wrong_kind("Variable")),
        }
    }

    /// Invoke a command.
    pub fn exec(&self, arg: Option<Value>) -> Result<Option<Value>, NodeError> {
        match self {
            Self::Command(c) => Ok(c.call(arg)),
            _ => Err(self.wrong_kind("Command")),
        }
    }

    pub(crate) fn wrong_kind(&self, expected: &'static str) -> NodeError {
        NodeError::WrongKind {
            path: self.path(),
            class: self.class(),
            expected,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.class(), self.path())
    }
}
