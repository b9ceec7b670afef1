//! Lua command bodies.
//!
//! Each invocation gets a fresh Lua 5.4 state with three globals:
//!
//! - `dev` - owning device: `dev:path()`, `dev:get(p)`, `dev:value(p)`,
//!   `dev:set(p, v)`, `dev:exec(p, arg)`; `p` is relative to the device
//! - `arg` - invocation argument, `nil` when absent
//! - `usleep(us)` - blocking pause
//!
//! The body is dedented first so it can be written indented inside a TOML
//! multi-line string. Its return value becomes the command result.

use crate::error::NodeError;
use crate::tree::device::Device;
use crate::tree::{Node, NodeLookup};
use mlua::{Lua, LuaSerdeExt, UserData, UserDataMethods, Value as LuaValue};
use regtree_common::Value;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Script failures.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Compile or runtime error, including errors raised by `dev` methods.
    #[error("lua: {0}")]
    Lua(#[from] mlua::Error),
}

struct DeviceHandle(Arc<Device>);

impl DeviceHandle {
    fn node(&self, path: &str) -> mlua::Result<Node> {
        self.0.lookup(path).ok_or_else(|| {
            mlua::Error::external(NodeError::NotFound(format!("{}.{path}", self.0.path())))
        })
    }
}

impl UserData for DeviceHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("path", |_, this, ()| Ok(this.0.path()));

        methods.add_method("get", |lua, this, path: String| {
            let value = this.node(&path)?.get().map_err(mlua::Error::external)?;
            lua.to_value(&value)
        });

        methods.add_method("value", |lua, this, path: String| {
            let value = this.node(&path)?.value().map_err(mlua::Error::external)?;
            lua.to_value(&value)
        });

        methods.add_method("set", |lua, this, (path, value): (String, LuaValue)| {
            let value: Value = lua.from_value(value)?;
            this.node(&path)?.set(value).map_err(mlua::Error::external)
        });

        methods.add_method(
            "exec",
            |lua, this, (path, arg): (String, Option<LuaValue>)| {
                let node = this.node(&path)?;
                let Node::Command(cmd) = &node else {
                    return Err(mlua::Error::external(node.wrong_kind("Command")));
                };
                let arg: Option<Value> = arg.map(|v| lua.from_value(v)).transpose()?;
                match cmd.try_call(arg.as_ref()).map_err(mlua::Error::external)? {
                    Some(result) => lua.to_value(&result),
                    None => Ok(LuaValue::Nil),
                }
            },
        );
    }
}

/// Run `body` with `device` bound as `dev`.
pub fn run(device: &Arc<Device>, body: &str, arg: Option<&Value>) -> Result<Option<Value>, ScriptError> {
    let lua = Lua::new();
    let globals = lua.globals();

    globals.set("dev", lua.create_userdata(DeviceHandle(Arc::clone(device)))?)?;
    let arg = match arg {
        Some(value) => lua.to_value(value)?,
        None => LuaValue::Nil,
    };
    globals.set("arg", arg)?;
    globals.set(
        "usleep",
        lua.create_function(|_, us: u64| {
            thread::sleep(Duration::from_micros(us));
            Ok(())
        })?,
    )?;

    let source = dedent(body);
    let result: LuaValue = lua.load(source.as_str()).set_name(device.path()).eval()?;
    if result.is_nil() {
        return Ok(None);
    }
    Ok(Some(lua.from_value(result)?))
}

/// Remove the common leading indentation of non-blank lines.
pub fn dedent(body: &str) -> String {
    let indent = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    body.lines()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandAction, CommandBuilder};
    use crate::tree::{Root, VariableBuilder};
    use regtree_common::tree_config::BuiltinAction;
    use serde_json::json;

    fn device() -> (Root, Arc<Device>) {
        let root = Root::new("root", "");
        let dev = root.device().add_device(Device::new("dev", "")).unwrap();
        dev.add_variable(VariableBuilder::new("A")).unwrap();
        dev.add_command(
            CommandBuilder::new("Load").action(CommandAction::builtin(BuiltinAction::Touch)),
        )
        .unwrap();
        (root, dev)
    }

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("    a = 1\n\n      b = 2\n"), "a = 1\n\n  b = 2");
        assert_eq!(dedent("x"), "x");
    }

    #[test]
    fn test_script_reads_and_writes_device() {
        let (_root, dev) = device();
        let body = "
            dev:set('A', 5)
            return dev:get('A') + arg
        ";
        assert_eq!(run(&dev, body, Some(&json!(1))).unwrap(), Some(json!(6)));
        assert_eq!(dev.node("A").unwrap().value().unwrap(), json!(5));
    }

    #[test]
    fn test_script_exec_and_path() {
        let (_root, dev) = device();
        let body = "dev:exec('Load', 3)\nreturn dev:path()";
        assert_eq!(run(&dev, body, None).unwrap(), Some(json!("root.dev")));
        assert_eq!(dev.node("Load").unwrap().value().unwrap(), json!(3));
    }

    #[test]
    fn test_script_errors_surface() {
        let (_root, dev) = device();
        assert!(run(&dev, "dev:set('Nope', 1)", None).is_err());
        assert!(run(&dev, "this is not lua", None).is_err());
        assert_eq!(run(&dev, "usleep(10)", None).unwrap(), None);
    }

    #[test]
    fn test_script_command_contained() {
        let (_root, dev) = device();
        let cmd = dev
            .add_command(CommandBuilder::new("Bad").action(CommandAction::script("error('x')")))
            .unwrap();
        assert_eq!(cmd.call(None), None);
        let good = dev
            .add_command(CommandBuilder::new("Good").action(CommandAction::script("return 7")))
            .unwrap();
        assert_eq!(good.call(None), Some(json!(7)));
    }
}
