//! Path-addressed entry point of a tree.

use crate::error::NodeError;
use crate::tree::device::Device;
use crate::tree::{Node, NodeInfo, NodeLookup};
use regtree_common::Value;
use regtree_common::consts::PATH_SEPARATOR;
use std::sync::Arc;
use tracing::info;

/// Top of a node tree.
///
/// `Root` is a cheap handle; clones share the same tree. Paths given to its
/// methods are absolute and start with the root name.
#[derive(Clone)]
pub struct Root {
    device: Arc<Device>,
}

impl Root {
    /// Empty tree.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            device: Arc::new(Device::new(name, description)),
        }
    }

    /// Treat `device` as the top of a tree.
    pub fn from_device(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
        }
    }

    /// Root device.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Root name.
    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// Node at an absolute path.
    pub fn get_node(&self, path: &str) -> Option<Node> {
        match path.split_once(PATH_SEPARATOR) {
            None if path == self.name() => Some(Node::Device(Arc::clone(&self.device))),
            Some((head, rest)) if head == self.name() => self.device.node(rest),
            _ => None,
        }
    }

    /// Node at an absolute path, or `NodeError::NotFound`.
    pub fn require(&self, path: &str) -> Result<Node, NodeError> {
        self.get_node(path)
            .ok_or_else(|| NodeError::NotFound(path.to_string()))
    }

    /// Read a variable.
    pub fn get(&self, path: &str) -> Result<Value, NodeError> {
        self.require(path)?.get()
    }

    /// Read a variable as a display string.
    pub fn get_display(&self, path: &str) -> Result<String, NodeError> {
        self.require(path)?.get_display()
    }

    /// Shadow value of a variable.
    pub fn value(&self, path: &str) -> Result<Value, NodeError> {
        self.require(path)?.value()
    }

    /// Shadow value as a display string.
    pub fn value_display(&self, path: &str) -> Result<String, NodeError> {
        self.require(path)?.value_display()
    }

    /// Assign a variable.
    pub fn set(&self, path: &str, value: Value) -> Result<(), NodeError> {
        self.require(path)?.set(value)
    }

    /// Assign a variable from a display string.
    pub fn set_display(&self, path: &str, text: &str) -> Result<(), NodeError> {
        self.require(path)?.set_display(text)
    }

    /// Invoke a command.
    pub fn exec(&self, path: &str, arg: Option<Value>) -> Result<Option<Value>, NodeError> {
        self.require(path)?.exec(arg)
    }

    /// Description of the root device.
    pub fn describe(&self) -> NodeInfo {
        Node::Device(Arc::clone(&self.device)).info()
    }

    /// Dump every variable shadow as TOML text keyed by path.
    pub fn get_config(&self) -> Result<String, NodeError> {
        let mut top = toml::Table::new();
        top.insert(
            self.name().to_string(),
            toml::Value::Table(self.device.config_table()),
        );
        toml::to_string(&top).map_err(|e| NodeError::ConfigText(e.to_string()))
    }

    /// Apply TOML text produced by [`get_config`](Self::get_config).
    /// Returns the number of variables assigned.
    pub fn set_config(&self, text: &str) -> Result<usize, NodeError> {
        let top: toml::Table =
            toml::from_str(text).map_err(|e| NodeError::ConfigText(e.to_string()))?;
        let mut assigned = 0;
        for (key, value) in &top {
            match value {
                toml::Value::Table(table) if key == self.name() => {
                    assigned += self.device.apply_config_table(table)?;
                }
                _ => return Err(NodeError::NotFound(key.clone())),
            }
        }
        info!(root = %self.name(), assigned, "configuration applied");
        Ok(assigned)
    }
}

impl NodeLookup for Root {
    fn lookup(&self, path: &str) -> Option<Node> {
        self.get_node(path)
    }
}
