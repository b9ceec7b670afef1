//! Typed leaf nodes.
//!
//! A variable either keeps its value locally or maps onto one word of its
//! device's memory block. Register variables keep a shadow of the last
//! value written or read: `get` goes to hardware, `value` returns the
//! shadow.

use crate::block::{BlockError, CheckOutcome, MemoryBlock};
use crate::error::NodeError;
use crate::tree::device::Device;
use parking_lot::Mutex;
use regtree_common::Value;
use regtree_common::consts::PATH_SEPARATOR;
use regtree_common::model::{DisplayFormat, Mode, Model, ModelError, ModelKind};
use regtree_common::tree_config::VariableConfig;
use std::sync::{Arc, Weak};

enum Storage {
    Local,
    Register { offset: u64, block: Arc<MemoryBlock> },
}

/// Typed leaf.
pub struct Variable {
    name: String,
    description: String,
    parent: Weak<Device>,
    model: Model,
    mode: Mode,
    disp: DisplayFormat,
    units: Option<String>,
    enums: Vec<(i64, String)>,
    storage: Storage,
    shadow: Mutex<Value>,
}

/// Builder passed to [`Device::add_variable`].
#[derive(Debug, Clone)]
pub struct VariableBuilder {
    name: String,
    description: String,
    model: Model,
    mode: Mode,
    offset: Option<u64>,
    disp: DisplayFormat,
    units: Option<String>,
    enums: Vec<(i64, String)>,
    initial: Option<Value>,
}

impl VariableBuilder {
    /// Local, read-write, 32-bit unsigned variable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model: Model::UINT32,
            mode: Mode::RW,
            offset: None,
            disp: DisplayFormat::Dec,
            units: None,
            enums: Vec::new(),
            initial: None,
        }
    }

    /// Builder from a configuration entry.
    pub fn from_config(config: &VariableConfig) -> Result<Self, NodeError> {
        let model = Model::new(config.kind, config.bits).map_err(|source| NodeError::Model {
            path: config.name.clone(),
            source,
        })?;
        let enums = config
            .enum_table()
            .map_err(|e| NodeError::ConfigText(e.to_string()))?;
        let initial = config
            .value
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| NodeError::ConfigText(e.to_string()))?;
        Ok(Self {
            name: config.name.clone(),
            description: config.description.clone(),
            model,
            mode: config.mode,
            offset: config.offset,
            disp: config.disp,
            units: config.units.clone(),
            enums,
            initial,
        })
    }

    /// Free text.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Value codec.
    pub fn model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// Access mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Map onto the device block at `offset`.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Display radix.
    pub fn disp(mut self, disp: DisplayFormat) -> Self {
        self.disp = disp;
        self
    }

    /// Engineering units.
    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Add a display name for an integer value.
    pub fn enum_entry(mut self, key: i64, name: impl Into<String>) -> Self {
        self.enums.push((key, name.into()));
        self
    }

    /// Initial value.
    pub fn value(mut self, value: Value) -> Self {
        self.initial = Some(value);
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn build(self, parent: &Arc<Device>) -> Result<Variable, NodeError> {
        let path = format!("{}{PATH_SEPARATOR}{}", parent.path(), self.name);
        let storage = match self.offset {
            None => Storage::Local,
            Some(offset) => {
                if self.model.kind() == ModelKind::Str {
                    return Err(NodeError::InvalidArgument(format!(
                        "{path}: string variables cannot be register backed"
                    )));
                }
                let block = parent
                    .block()
                    .ok_or_else(|| NodeError::NoMemory(path.clone()))?;
                let word_bits = block.model().bits();
                if self.model.bits() > word_bits {
                    return Err(NodeError::InvalidArgument(format!(
                        "{path}: {}-bit value does not fit a {word_bits}-bit block word",
                        self.model.bits()
                    )));
                }
                Storage::Register {
                    offset,
                    block: Arc::clone(block),
                }
            }
        };
        let mut var = Variable {
            name: self.name,
            description: self.description,
            parent: Arc::downgrade(parent),
            model: self.model,
            mode: self.mode,
            disp: self.disp,
            units: self.units,
            enums: self.enums,
            storage,
            shadow: Mutex::new(self.model.default_value()),
        };
        if let Some(initial) = self.initial {
            let value = var.coerce(initial)?;
            *var.shadow.get_mut() = value;
        }
        Ok(var)
    }
}

impl Variable {
    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free text.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Dotted path.
    pub fn path(&self) -> String {
        match self.parent.upgrade() {
            Some(parent) => format!("{}{PATH_SEPARATOR}{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }

    /// Owning device.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.parent.upgrade()
    }

    /// Value codec.
    pub fn model(&self) -> Model {
        self.model
    }

    /// Access mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Display radix.
    pub fn disp(&self) -> DisplayFormat {
        self.disp
    }

    /// Engineering units.
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    /// Block offset of a register variable.
    pub fn register_offset(&self) -> Option<u64> {
        match &self.storage {
            Storage::Register { offset, .. } => Some(*offset),
            Storage::Local => None,
        }
    }

    /// Assign a value. Register variables stage, commit, verify and check
    /// their block before returning; a read-back mismatch is an error and
    /// leaves the shadow unchanged.
    pub fn set(&self, value: Value) -> Result<(), NodeError> {
        if !self.mode.writable() {
            return Err(NodeError::ReadOnly(self.path()));
        }
        let value = self.coerce(value)?;
        if let Storage::Register { offset, block } = &self.storage {
            let word = self.word(&value)?;
            let to_node = |source| NodeError::Block {
                path: self.path(),
                source,
            };
            block.stage_word(*offset, word).map_err(to_node)?;
            block.commit(false).map_err(to_node)?;
            block.verify().map_err(to_node)?;
            if let CheckOutcome::Mismatch(mismatch) = block.check().map_err(to_node)? {
                return Err(to_node(BlockError::Verify(mismatch)));
            }
        }
        *self.shadow.lock() = value;
        Ok(())
    }

    /// Posted write; does not wait for completion.
    pub fn post(&self, value: Value) -> Result<(), NodeError> {
        if !self.mode.writable() {
            return Err(NodeError::ReadOnly(self.path()));
        }
        let value = self.coerce(value)?;
        if let Storage::Register { offset, block } = &self.storage {
            let word = self.word(&value)?;
            block
                .post_word(*offset, word)
                .map_err(|source| NodeError::Block {
                    path: self.path(),
                    source,
                })?;
        }
        *self.shadow.lock() = value;
        Ok(())
    }

    /// Current value. Register variables read hardware and refresh the
    /// shadow.
    pub fn get(&self) -> Result<Value, NodeError> {
        if !self.mode.readable() {
            return Err(NodeError::WriteOnly(self.path()));
        }
        match &self.storage {
            Storage::Local => Ok(self.value()),
            Storage::Register { offset, block } => {
                let word = block
                    .read_word(*offset)
                    .map_err(|source| NodeError::Block {
                        path: self.path(),
                        source,
                    })?;
                let value = self.model.from_word(word);
                *self.shadow.lock() = value.clone();
                Ok(value)
            }
        }
    }

    /// Shadow value.
    pub fn value(&self) -> Value {
        self.shadow.lock().clone()
    }

    /// Assign from a display string (enum names accepted).
    pub fn set_display(&self, text: &str) -> Result<(), NodeError> {
        let value = self.parse(text)?;
        self.set(value)
    }

    /// Display string of [`get`](Self::get).
    pub fn get_display(&self) -> Result<String, NodeError> {
        let value = self.get()?;
        Ok(self.render(&value))
    }

    /// Display string of the shadow value.
    pub fn value_display(&self) -> String {
        self.render(&self.value())
    }

    /// Render `value` with the enum table and display radix.
    pub fn render(&self, value: &Value) -> String {
        if let Some(key) = value.as_i64() {
            if let Some((_, name)) = self.enums.iter().find(|(k, _)| *k == key) {
                return name.clone();
            }
        }
        self.model.display(value, self.disp)
    }

    /// Parse a display string.
    pub fn parse(&self, text: &str) -> Result<Value, NodeError> {
        let trimmed = text.trim();
        if let Some((key, _)) = self.enums.iter().find(|(_, name)| name == trimmed) {
            return self.coerce(Value::from(*key));
        }
        let value = self.model.parse_display(text).map_err(|e| self.model_error(e))?;
        if self.model.kind() == ModelKind::Str {
            return Ok(value);
        }
        self.coerce(value)
    }

    /// Normalize `value` to this variable's model. Strings are parsed as
    /// display text for non-string models.
    fn coerce(&self, value: Value) -> Result<Value, NodeError> {
        match (self.model.kind(), &value) {
            (ModelKind::Str, _) => {
                self.model.encode(&value).map_err(|e| self.model_error(e))?;
                Ok(value)
            }
            (_, Value::String(text)) => self.parse(text),
            _ => {
                let word = self.word(&value)?;
                Ok(self.model.from_word(word))
            }
        }
    }

    fn word(&self, value: &Value) -> Result<u64, NodeError> {
        self.model.to_word(value).map_err(|e| self.model_error(e))
    }

    fn model_error(&self, source: ModelError) -> NodeError {
        NodeError::Model {
            path: self.path(),
            source,
        }
    }
}
