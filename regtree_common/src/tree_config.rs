//! Register tree configuration types.
//!
//! This module contains the configuration loaded from the server TOML file:
//! - `TreeConfig` - top level file
//! - `ServerConfig` - remote and string endpoints
//! - `MemoryConfig` - memory transport selection
//! - `DeviceConfig` / `VariableConfig` / `CommandConfig` - the node tree
//! - `SlaveBinding` - command slave address map

use crate::config::{ConfigError, SharedConfig};
use crate::consts::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_EMULATOR_SIZE, DEFAULT_MAX_ACCESS, DEFAULT_SERVER_PORT,
    DEFAULT_STRIDE, DEFAULT_WORD_BITS, PATH_SEPARATOR, SLEEP_STEP_KEY,
};
use crate::model::{DisplayFormat, Mode, Model, ModelKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

fn default_bind() -> String {
    format!("127.0.0.1:{DEFAULT_SERVER_PORT}")
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_driver() -> String {
    "emulator".to_string()
}

fn default_memory_size() -> u64 {
    DEFAULT_EMULATOR_SIZE
}

fn default_max_access() -> usize {
    DEFAULT_MAX_ACCESS
}

fn default_word_bits() -> u32 {
    DEFAULT_WORD_BITS
}

fn default_stride() -> usize {
    DEFAULT_STRIDE
}

fn default_kind() -> ModelKind {
    ModelKind::UInt
}

fn default_true() -> bool {
    true
}

/// Main configuration loaded from the server TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Common `[shared]` section.
    pub shared: SharedConfig,

    /// Network endpoints.
    #[serde(default)]
    pub server: ServerConfig,

    /// Memory transport.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Root node.
    pub root: RootConfig,

    /// Top level devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Command slave address map.
    #[serde(default)]
    pub slave: Vec<SlaveBinding>,
}

/// Remote protocol endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Request/reply endpoint.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Optional line-oriented control endpoint.
    #[serde(default)]
    pub string_bind: Option<String>,

    /// Upper bound on the client connection handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            string_bind: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

/// Memory transport selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Registered transport name.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Addressable size in bytes.
    #[serde(default = "default_memory_size")]
    pub size: u64,

    /// Largest single transaction.
    #[serde(default = "default_max_access")]
    pub max_access: usize,

    /// Artificial completion latency (emulator only).
    #[serde(default)]
    pub latency_us: u64,

    /// Transport specific settings.
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            size: DEFAULT_EMULATOR_SIZE,
            max_access: DEFAULT_MAX_ACCESS,
            latency_us: 0,
            options: BTreeMap::new(),
        }
    }
}

/// Root node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    /// Root name, first element of every path.
    pub name: String,

    /// Free text.
    #[serde(default)]
    pub description: String,
}

/// Memory block geometry of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSettings {
    /// Bits per word.
    #[serde(default = "default_word_bits")]
    pub word_bits: u32,

    /// Byte spacing between words.
    #[serde(default = "default_stride")]
    pub stride: usize,

    /// Read back every write.
    #[serde(default = "default_true")]
    pub verify: bool,

    /// Word type.
    #[serde(default = "default_kind")]
    pub kind: ModelKind,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            word_bits: DEFAULT_WORD_BITS,
            stride: DEFAULT_STRIDE,
            verify: true,
            kind: ModelKind::UInt,
        }
    }
}

/// One device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Node name.
    pub name: String,

    /// Free text.
    #[serde(default)]
    pub description: String,

    /// Base offset, relative to the parent device.
    #[serde(default)]
    pub offset: u64,

    /// Initial enable flag.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Present when the device owns registers.
    #[serde(default)]
    pub block: Option<BlockSettings>,

    /// Leaf variables.
    #[serde(default)]
    pub variables: Vec<VariableConfig>,

    /// Leaf commands.
    #[serde(default)]
    pub commands: Vec<CommandConfig>,

    /// Child devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableConfig {
    /// Node name.
    pub name: String,

    /// Free text.
    #[serde(default)]
    pub description: String,

    /// Access mode.
    #[serde(default)]
    pub mode: Mode,

    /// Value type.
    #[serde(default = "default_kind")]
    pub kind: ModelKind,

    /// Value width.
    #[serde(default = "default_word_bits")]
    pub bits: u32,

    /// Register offset inside the device; local variable when absent.
    #[serde(default)]
    pub offset: Option<u64>,

    /// Display radix.
    #[serde(default)]
    pub disp: DisplayFormat,

    /// Engineering units.
    #[serde(default)]
    pub units: Option<String>,

    /// Initial value.
    #[serde(default)]
    pub value: Option<toml::Value>,

    /// Display names of integer values.
    #[serde(default, rename = "enum")]
    pub enum_names: BTreeMap<String, String>,
}

impl VariableConfig {
    /// Parsed enum table.
    pub fn enum_table(&self) -> Result<Vec<(i64, String)>, ConfigError> {
        self.enum_names
            .iter()
            .map(|(key, name)| {
                key.parse::<i64>()
                    .map(|k| (k, name.clone()))
                    .map_err(|_| {
                        ConfigError::ValidationError(format!(
                            "variable {}: enum key '{}' is not an integer",
                            self.name, key
                        ))
                    })
            })
            .collect()
    }
}

/// Built-in native command actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinAction {
    /// Does nothing.
    Nothing,
    /// Writes 1 then 0.
    Toggle,
    /// Writes the argument, or 1.
    Touch,
    /// Writes 0.
    TouchZero,
    /// Writes 1.
    TouchOne,
    /// Posts the argument, or 1, without waiting.
    PostTouch,
}

/// One command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Node name.
    pub name: String,

    /// Free text.
    #[serde(default)]
    pub description: String,

    /// Register written by toggle/touch actions.
    #[serde(default)]
    pub offset: Option<u64>,

    /// Register width.
    #[serde(default = "default_word_bits")]
    pub bits: u32,

    /// Built-in native action.
    #[serde(default)]
    pub action: Option<BuiltinAction>,

    /// Ordered `target = value` micro-op program.
    #[serde(default)]
    pub sequence: Option<toml::Table>,

    /// Lua body, owning device bound as `dev`.
    #[serde(default)]
    pub script: Option<String>,
}

/// Command slave address binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveBinding {
    /// Bus address.
    pub address: u64,

    /// Absolute path of the bound command.
    pub command: String,

    /// Payload type.
    #[serde(default = "default_kind")]
    pub kind: ModelKind,

    /// Payload width.
    #[serde(default = "default_word_bits")]
    pub bits: u32,
}

impl TreeConfig {
    /// Validate the whole file.
    ///
    /// # Validation Rules
    /// 1. `[shared]` is valid
    /// 2. node names are non-empty, contain no path separator, unique per device
    /// 3. block geometry: `word_bits` in 1..=64, `stride` holds a word
    /// 4. register variables/commands only inside devices with a block, no wider than its word
    /// 5. each command declares at most one action form, sequence pauses are numeric
    /// 6. slave addresses are unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        check_name(&self.root.name)?;

        if self.memory.max_access == 0 {
            return Err(ConfigError::ValidationError(
                "memory.max_access must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(duplicate(&self.root.name, &device.name));
            }
            device.validate(&self.root.name)?;
        }

        let mut addresses = HashSet::new();
        for binding in &self.slave {
            if !addresses.insert(binding.address) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate slave address {:#x}",
                    binding.address
                )));
            }
            Model::new(binding.kind, binding.bits).map_err(|e| {
                ConfigError::ValidationError(format!("slave {:#x}: {e}", binding.address))
            })?;
        }
        Ok(())
    }
}

impl DeviceConfig {
    fn validate(&self, parent: &str) -> Result<(), ConfigError> {
        check_name(&self.name)?;
        let path = format!("{parent}{PATH_SEPARATOR}{}", self.name);

        if let Some(block) = &self.block {
            let word = Model::new(block.kind, block.word_bits)
                .map_err(|e| ConfigError::ValidationError(format!("{path}: {e}")))?;
            if block.stride == 0 || block.stride < word.byte_size() {
                return Err(ConfigError::ValidationError(format!(
                    "{path}: stride {} cannot hold a {}-bit word",
                    block.stride, block.word_bits
                )));
            }
        }

        let mut names = HashSet::new();
        for var in &self.variables {
            check_name(&var.name)?;
            if !names.insert(var.name.as_str()) {
                return Err(duplicate(&path, &var.name));
            }
            Model::new(var.kind, var.bits)
                .map_err(|e| ConfigError::ValidationError(format!("{path}.{}: {e}", var.name)))?;
            if var.offset.is_some() {
                check_register(&path, &var.name, var.bits, self.block.as_ref())?;
            }
            var.enum_table()?;
        }

        for cmd in &self.commands {
            check_name(&cmd.name)?;
            if !names.insert(cmd.name.as_str()) {
                return Err(duplicate(&path, &cmd.name));
            }
            if cmd.offset.is_some() {
                check_register(&path, &cmd.name, cmd.bits, self.block.as_ref())?;
            }
            cmd.validate(&path)?;
        }

        for child in &self.devices {
            if !names.insert(child.name.as_str()) {
                return Err(duplicate(&path, &child.name));
            }
            child.validate(&path)?;
        }
        Ok(())
    }
}

impl CommandConfig {
    fn validate(&self, parent: &str) -> Result<(), ConfigError> {
        let forms = [
            self.action.is_some(),
            self.sequence.is_some(),
            self.script.is_some(),
        ];
        if forms.iter().filter(|f| **f).count() > 1 {
            return Err(ConfigError::ValidationError(format!(
                "{parent}.{}: a command takes one of action, sequence or script",
                self.name
            )));
        }
        if let Some(sequence) = &self.sequence {
            if let Some(pause) = sequence.get(SLEEP_STEP_KEY) {
                if pause.as_integer().is_none_or(|us| us < 0) {
                    return Err(ConfigError::ValidationError(format!(
                        "{parent}.{}: {SLEEP_STEP_KEY} needs a non-negative integer",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_register(
    parent: &str,
    name: &str,
    bits: u32,
    block: Option<&BlockSettings>,
) -> Result<(), ConfigError> {
    let Some(block) = block else {
        return Err(ConfigError::ValidationError(format!(
            "{parent}.{name}: register node in a device without a block"
        )));
    };
    if bits > block.word_bits {
        return Err(ConfigError::ValidationError(format!(
            "{parent}.{name}: {bits}-bit value does not fit a {}-bit block word",
            block.word_bits
        )));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains(PATH_SEPARATOR) || name.contains(char::is_whitespace) {
        return Err(ConfigError::ValidationError(format!(
            "invalid node name '{name}'"
        )));
    }
    Ok(())
}

fn duplicate(parent: &str, name: &str) -> ConfigError {
    ConfigError::ValidationError(format!("duplicate node name '{name}' under {parent}"))
}
