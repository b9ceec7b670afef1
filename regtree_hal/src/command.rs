//! Command engine.
//!
//! A [`Command`] is a tree leaf that runs an action against its owning
//! device. The action is fixed at construction:
//!
//! - `Native`: a Rust closure `(device, command, arg) -> Result<Option<Value>>`
//! - `Sequence`: ordered `target = value` steps, `usleep` pauses
//! - `Script`: a Lua body with the device bound as `dev`
//!
//! [`Command::call`] runs the action inside a fault boundary: errors and
//! panics are logged and yield `None`. [`Command::try_call`] exposes the
//! error instead.

use crate::boundary;
use crate::error::NodeError;
use crate::script::{self, ScriptError};
use crate::tree::device::Device;
use crate::tree::variable::{Variable, VariableBuilder};
use crate::tree::{Node, NodeLookup};
use regtree_common::Value;
use regtree_common::consts::{PATH_SEPARATOR, SLEEP_STEP_KEY};
use regtree_common::model::{Model, ModelKind};
use regtree_common::tree_config::{BuiltinAction, CommandConfig};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Native action signature.
pub type NativeAction = Arc<
    dyn Fn(&Arc<Device>, &Command, Option<&Value>) -> Result<Option<Value>, CommandError>
        + Send
        + Sync,
>;

/// Command failures.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Owning device dropped.
    #[error("command '{0}' is detached from its device")]
    Detached(String),

    /// Sequence step names no node.
    #[error("{device}: no sequence target '{path}'")]
    UnknownTarget {
        /// Owning device path
        device: String,
        /// Step key
        path: String,
    },

    /// Sequence step names a device.
    #[error("'{0}' cannot be assigned by a sequence step")]
    NotAssignable(String),

    /// Pause duration is not a non-negative integer.
    #[error("{SLEEP_STEP_KEY} needs a non-negative integer, got {0}")]
    InvalidPause(String),

    /// Tree operation failed.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Script failed.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Action reported a failure.
    #[error("{0}")]
    Failed(String),
}

/// One sequence step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Block the invoking thread.
    Pause(Duration),
    /// Invoke a command or assign a variable, relative to the owning device.
    Target {
        /// Relative path
        path: String,
        /// Argument or value
        value: Value,
    },
}

/// Action run by a command.
#[derive(Clone)]
pub enum CommandAction {
    /// Rust closure
    Native(NativeAction),
    /// Ordered steps
    Sequence(Vec<Step>),
    /// Lua body
    Script(String),
}

impl CommandAction {
    /// Wrap a closure.
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&Arc<Device>, &Command, Option<&Value>) -> Result<Option<Value>, CommandError>
            + Send
            + Sync
            + 'static,
    {
        Self::Native(Arc::new(f))
    }

    /// One of the built-in actions.
    pub fn builtin(action: BuiltinAction) -> Self {
        match action {
            BuiltinAction::Nothing => Self::native(actions::nothing),
            BuiltinAction::Toggle => Self::native(actions::toggle),
            BuiltinAction::Touch => Self::native(actions::touch),
            BuiltinAction::TouchZero => Self::native(actions::touch_zero),
            BuiltinAction::TouchOne => Self::native(actions::touch_one),
            BuiltinAction::PostTouch => Self::native(actions::post_touch),
        }
    }

    /// Sequence from a `target = value` table, in declaration order.
    pub fn sequence(table: &toml::Table) -> Result<Self, CommandError> {
        let steps = table
            .iter()
            .map(|(key, value)| {
                if key == SLEEP_STEP_KEY {
                    let us = value
                        .as_integer()
                        .and_then(|us| u64::try_from(us).ok())
                        .ok_or_else(|| CommandError::InvalidPause(value.to_string()))?;
                    return Ok(Step::Pause(Duration::from_micros(us)));
                }
                let value =
                    serde_json::to_value(value).map_err(|e| CommandError::Failed(e.to_string()))?;
                Ok(Step::Target {
                    path: key.clone(),
                    value,
                })
            })
            .collect::<Result<Vec<_>, CommandError>>()?;
        Ok(Self::Sequence(steps))
    }

    /// Lua body.
    pub fn script(body: impl Into<String>) -> Self {
        Self::Script(body.into())
    }
}

impl Default for CommandAction {
    fn default() -> Self {
        Self::builtin(BuiltinAction::Nothing)
    }
}

impl fmt::Debug for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native"),
            Self::Sequence(steps) => f.debug_tuple("Sequence").field(steps).finish(),
            Self::Script(body) => f.debug_tuple("Script").field(body).finish(),
        }
    }
}

/// Invocable leaf.
pub struct Command {
    name: String,
    description: String,
    parent: Weak<Device>,
    action: CommandAction,
    cell: Variable,
}

/// Builder passed to [`Device::add_command`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    name: String,
    description: String,
    action: CommandAction,
    offset: Option<u64>,
    model: Model,
}

impl CommandBuilder {
    /// No-op command with a local 32-bit cell.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            action: CommandAction::default(),
            offset: None,
            model: Model::UINT32,
        }
    }

    /// Builder from a configuration entry.
    pub fn from_config(config: &CommandConfig) -> Result<Self, CommandError> {
        let action = if let Some(action) = config.action {
            CommandAction::builtin(action)
        } else if let Some(table) = &config.sequence {
            CommandAction::sequence(table)?
        } else if let Some(body) = &config.script {
            CommandAction::script(body.clone())
        } else {
            CommandAction::default()
        };
        let model = Model::new(ModelKind::UInt, config.bits).map_err(
            |source| NodeError::Model {
                path: config.name.clone(),
                source,
            },
        )?;
        Ok(Self {
            name: config.name.clone(),
            description: config.description.clone(),
            action,
            offset: config.offset,
            model,
        })
    }

    /// Free text.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Action to run.
    pub fn action(mut self, action: CommandAction) -> Self {
        self.action = action;
        self
    }

    /// Bind the value cell to a register of the device block.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Value cell codec.
    pub fn model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn build(self, parent: &Arc<Device>) -> Result<Command, NodeError> {
        let mut cell = VariableBuilder::new(self.name.clone()).model(self.model);
        if let Some(offset) = self.offset {
            cell = cell.offset(offset);
        }
        Ok(Command {
            cell: cell.build(parent)?,
            name: self.name,
            description: self.description,
            parent: Arc::downgrade(parent),
            action: self.action,
        })
    }
}

impl Command {
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

    /// Action.
    pub fn action(&self) -> &CommandAction {
        &self.action
    }

    /// Value cell written by toggle/touch helpers.
    pub fn cell(&self) -> &Variable {
        &self.cell
    }

    /// Run the action. Failures are logged and yield `None`.
    pub fn call(&self, arg: Option<Value>) -> Option<Value> {
        boundary::contain(&self.path(), || self.try_call(arg.as_ref())).flatten()
    }

    /// Run the action, discarding its result.
    pub fn invoke(&self, arg: Option<Value>) {
        let _ = self.call(arg);
    }

    /// Run the action and report failures.
    pub fn try_call(&self, arg: Option<&Value>) -> Result<Option<Value>, CommandError> {
        let device = self
            .parent
            .upgrade()
            .ok_or_else(|| CommandError::Detached(self.name.clone()))?;
        debug!(command = %self.path(), action = ?self.action, "invoke");
        match &self.action {
            CommandAction::Native(f) => f(&device, self, arg),
            CommandAction::Sequence(steps) => {
                run_sequence(&device, steps)?;
                Ok(None)
            }
            CommandAction::Script(body) => Ok(script::run(&device, body, arg)?),
        }
    }

    /// Assign the value cell.
    pub fn set(&self, value: Value) -> Result<(), NodeError> {
        self.cell.set(value)
    }

    /// Posted write of the value cell.
    pub fn post(&self, value: Value) -> Result<(), NodeError> {
        self.cell.post(value)
    }

    /// Read the value cell.
    pub fn get(&self) -> Result<Value, NodeError> {
        self.cell.get()
    }

    /// Shadow of the value cell.
    pub fn value(&self) -> Value {
        self.cell.value()
    }
}

fn run_sequence(device: &Arc<Device>, steps: &[Step]) -> Result<(), CommandError> {
    for step in steps {
        match step {
            Step::Pause(pause) => {
                trace!(device = %device.path(), ?pause, "sequence pause");
                thread::sleep(*pause);
            }
            Step::Target { path, value } => match device.lookup(path) {
                Some(Node::Command(cmd)) => {
                    cmd.try_call(Some(value))?;
                }
                Some(Node::Variable(var)) => var.set(value.clone())?,
                Some(node) => return Err(CommandError::NotAssignable(node.path())),
                None => {
                    return Err(CommandError::UnknownTarget {
                        device: device.path(),
                        path: path.clone(),
                    });
                }
            },
        }
    }
    Ok(())
}

/// Built-in native actions.
pub mod actions {
    use super::{Command, CommandError};
    use crate::tree::device::Device;
    use regtree_common::Value;
    use std::sync::Arc;

    /// Does nothing.
    pub fn nothing(
        _dev: &Arc<Device>,
        _cmd: &Command,
        _arg: Option<&Value>,
    ) -> Result<Option<Value>, CommandError> {
        Ok(None)
    }

    /// Writes 1 then 0.
    pub fn toggle(
        _dev: &Arc<Device>,
        cmd: &Command,
        _arg: Option<&Value>,
    ) -> Result<Option<Value>, CommandError> {
        cmd.set(Value::from(1))?;
        cmd.set(Value::from(0))?;
        Ok(None)
    }

    /// Writes the argument, or 1.
    pub fn touch(
        _dev: &Arc<Device>,
        cmd: &Command,
        arg: Option<&Value>,
    ) -> Result<Option<Value>, CommandError> {
        cmd.set(arg.cloned().unwrap_or_else(|| Value::from(1)))?;
        Ok(None)
    }

    /// Writes 0.
    pub fn touch_zero(
        _dev: &Arc<Device>,
        cmd: &Command,
        _arg: Option<&Value>,
    ) -> Result<Option<Value>, CommandError> {
        cmd.set(Value::from(0))?;
        Ok(None)
    }

    /// Writes 1.
    pub fn touch_one(
        _dev: &Arc<Device>,
        cmd: &Command,
        _arg: Option<&Value>,
    ) -> Result<Option<Value>, CommandError> {
        cmd.set(Value::from(1))?;
        Ok(None)
    }

    /// Posts the argument, or 1, without waiting for completion.
    pub fn post_touch(
        _dev: &Arc<Device>,
        cmd: &Command,
        arg: Option<&Value>,
    ) -> Result<Option<Value>, CommandError> {
        cmd.post(arg.cloned().unwrap_or_else(|| Value::from(1)))?;
        Ok(None)
    }
}
