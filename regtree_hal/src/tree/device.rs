//! Container nodes.

use crate::block::{BlockError, MemoryBlock};
use crate::command::{Command, CommandBuilder};
use crate::error::NodeError;
use crate::memory::MemoryTransport;
use crate::tree::variable::{Variable, VariableBuilder};
use crate::tree::{Node, NodeLookup};
use parking_lot::RwLock;
use regtree_common::Value;
use regtree_common::consts::PATH_SEPARATOR;
use regtree_common::tree_config::BlockSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info};

/// Container of variables, commands and further devices.
///
/// A device may own a [`MemoryBlock`]; its register variables and commands
/// map onto words of that block. The enable flag is shared with the block.
pub struct Device {
    name: String,
    description: String,
    offset: u64,
    parent: Weak<Device>,
    enabled: Arc<AtomicBool>,
    block: OnceLock<Arc<MemoryBlock>>,
    children: RwLock<Vec<Node>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Detached device at offset 0, enabled.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            offset: 0,
            parent: Weak::new(),
            enabled: Arc::new(AtomicBool::new(true)),
            block: OnceLock::new(),
            children: RwLock::new(Vec::new()),
        }
    }

    /// Base offset relative to the parent device.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Initial enable flag.
    pub fn with_enabled(self, enabled: bool) -> Self {
        self.enabled.store(enabled, Ordering::Release);
        self
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free text.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Offset relative to the parent.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Absolute address of this device.
    pub fn base(&self) -> u64 {
        self.parent().map_or(0, |p| p.base()) + self.offset
    }

    /// Parent device; `None` for the root.
    pub fn parent(&self) -> Option<Arc<Device>> {
        self.parent.upgrade()
    }

    /// Dotted path.
    pub fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}{PATH_SEPARATOR}{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }

    /// Current enable flag.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable register traffic.
    pub fn set_enabled(&self, enabled: bool) {
        info!(device = %self.path(), enabled, "enable changed");
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Memory block, if attached.
    pub fn block(&self) -> Option<&Arc<MemoryBlock>> {
        self.block.get()
    }

    /// Create this device's memory block at its absolute base address.
    ///
    /// Attach after the device has been added to its parent so the block
    /// picks up the full path and base.
    pub fn attach_block(
        &self,
        settings: BlockSettings,
        transport: Arc<dyn MemoryTransport>,
    ) -> Result<Arc<MemoryBlock>, NodeError> {
        let path = self.path();
        let block = MemoryBlock::new(
            path.clone(),
            self.base(),
            settings,
            transport,
            Arc::clone(&self.enabled),
        )
        .map_err(|source| NodeError::Block {
            path: path.clone(),
            source,
        })?;
        let block = Arc::new(block);
        self.block
            .set(Arc::clone(&block))
            .map_err(|_| NodeError::InvalidArgument(format!("{path} already has a block")))?;
        debug!(device = %path, base = block.base(), "block attached");
        Ok(block)
    }

    /// Add a child device.
    pub fn add_device(self: &Arc<Self>, mut child: Device) -> Result<Arc<Device>, NodeError> {
        child.parent = Arc::downgrade(self);
        let child = Arc::new(child);
        self.insert(Node::Device(Arc::clone(&child)))?;
        Ok(child)
    }

    /// Add a variable.
    pub fn add_variable(
        self: &Arc<Self>,
        builder: VariableBuilder,
    ) -> Result<Arc<Variable>, NodeError> {
        self.ensure_free(builder.name())?;
        let var = Arc::new(builder.build(self)?);
        self.insert(Node::Variable(Arc::clone(&var)))?;
        Ok(var)
    }

    /// Add a command.
    pub fn add_command(self: &Arc<Self>, builder: CommandBuilder) -> Result<Arc<Command>, NodeError> {
        self.ensure_free(builder.name())?;
        let cmd = Arc::new(builder.build(self)?);
        self.insert(Node::Command(Arc::clone(&cmd)))?;
        Ok(cmd)
    }

    /// Snapshot of the children, in insertion order.
    pub fn children(&self) -> Vec<Node> {
        self.children.read().clone()
    }

    /// Direct child by name.
    pub fn child(&self, name: &str) -> Option<Node> {
        self.children
            .read()
            .iter()
            .find(|node| node.name() == name)
            .cloned()
    }

    /// Node at a path relative to this device.
    pub fn node(&self, path: &str) -> Option<Node> {
        let mut segments = path.split(PATH_SEPARATOR);
        let mut current = self.child(segments.next()?)?;
        for segment in segments {
            current = match &current {
                Node::Device(d) => d.child(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Direct child variables.
    pub fn variables(&self) -> Vec<Arc<Variable>> {
        self.children
            .read()
            .iter()
            .filter_map(|n| n.as_variable().cloned())
            .collect()
    }

    /// Direct child devices.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.children
            .read()
            .iter()
            .filter_map(|n| n.as_device().cloned())
            .collect()
    }

    /// Commit staged block data. With `force`, every writable register
    /// variable restages its shadow first. Returns the number of write
    /// transactions issued.
    pub fn write_blocks(&self, force: bool, recurse: bool) -> Result<usize, NodeError> {
        let mut issued = 0;
        if let Some(block) = self.block() {
            if force {
                for var in self.variables() {
                    if let (Some(offset), true) = (var.register_offset(), var.mode().writable()) {
                        let word = var.model().to_word(&var.value()).map_err(|source| {
                            NodeError::Model {
                                path: var.path(),
                                source,
                            }
                        })?;
                        block.stage_word(offset, word).map_err(|e| self.block_error(e))?;
                    }
                }
            }
            issued += block.commit(force).map_err(|e| self.block_error(e))?;
        }
        if recurse {
            for child in self.devices() {
                issued += child.write_blocks(force, true)?;
            }
        }
        Ok(issued)
    }

    /// Issue read-back transactions. Returns the number issued.
    pub fn verify_blocks(&self, recurse: bool) -> Result<usize, NodeError> {
        let mut issued = match self.block() {
            Some(block) => block.verify().map_err(|e| self.block_error(e))?,
            None => 0,
        };
        if recurse {
            for child in self.devices() {
                issued += child.verify_blocks(true)?;
            }
        }
        Ok(issued)
    }

    /// Check read-back data. `Ok(false)` when any block reported a
    /// mismatch.
    pub fn check_blocks(&self, recurse: bool) -> Result<bool, NodeError> {
        let mut clean = match self.block() {
            Some(block) => block.check().map_err(|e| self.block_error(e))?.is_clean(),
            None => true,
        };
        if recurse {
            for child in self.devices() {
                clean &= child.check_blocks(true)?;
            }
        }
        Ok(clean)
    }

    /// Variable shadows of this subtree as a TOML table.
    pub fn config_table(&self) -> toml::Table {
        let mut table = toml::Table::new();
        for node in self.children() {
            match node {
                Node::Variable(var) => match toml_value(&var.value()) {
                    Some(value) => {
                        table.insert(var.name().to_string(), value);
                    }
                    None => debug!(variable = %var.path(), "value not representable in TOML"),
                },
                Node::Device(dev) => {
                    table.insert(dev.name().to_string(), toml::Value::Table(dev.config_table()));
                }
                Node::Command(_) => {}
            }
        }
        table
    }

    /// Assign variables from a table shaped like [`config_table`](Self::config_table).
    /// Read-only variables are skipped. Returns the number assigned.
    pub fn apply_config_table(&self, table: &toml::Table) -> Result<usize, NodeError> {
        let mut assigned = 0;
        for (key, value) in table {
            match (self.child(key), value) {
                (Some(Node::Device(dev)), toml::Value::Table(sub)) => {
                    assigned += dev.apply_config_table(sub)?;
                }
                (Some(Node::Variable(var)), value) => {
                    if !var.mode().writable() {
                        debug!(variable = %var.path(), "skipping read-only variable");
                        continue;
                    }
                    let value = serde_json::to_value(value)
                        .map_err(|e| NodeError::ConfigText(e.to_string()))?;
                    var.set(value)?;
                    assigned += 1;
                }
                (Some(node), _) => {
                    return Err(NodeError::ConfigText(format!(
                        "cannot assign {} from configuration",
                        node.path()
                    )));
                }
                (None, _) => {
                    return Err(NodeError::NotFound(format!(
                        "{}{PATH_SEPARATOR}{key}",
                        self.path()
                    )));
                }
            }
        }
        Ok(assigned)
    }

    fn block_error(&self, source: BlockError) -> NodeError {
        NodeError::Block {
            path: self.path(),
            source,
        }
    }

    fn ensure_free(&self, name: &str) -> Result<(), NodeError> {
        if self.child(name).is_some() {
            return Err(NodeError::Duplicate {
                parent: self.path(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn insert(&self, node: Node) -> Result<(), NodeError> {
        let mut children = self.children.write();
        if children.iter().any(|c| c.name() == node.name()) {
            return Err(NodeError::Duplicate {
                parent: self.path(),
                name: node.name().to_string(),
            });
        }
        children.push(node);
        Ok(())
    }
}

fn toml_value(value: &Value) -> Option<toml::Value> {
    match value {
        Value::Bool(b) => Some(toml::Value::Boolean(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(toml::Value::Integer)
            .or_else(|| n.as_f64().map(toml::Value::Float)),
        Value::String(s) => Some(toml::Value::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(toml_value)
            .collect::<Option<Vec<_>>>()
            .map(toml::Value::Array),
        Value::Null | Value::Object(_) => None,
    }
}

impl NodeLookup for Device {
    fn lookup(&self, path: &str) -> Option<Node> {
        self.node(path)
    }
}
