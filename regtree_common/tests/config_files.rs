//! Tree configuration files read from disk.

use regtree_common::config::{ConfigError, ConfigLoader, LogLevel};
use regtree_common::model::{DisplayFormat, Mode, ModelKind};
use regtree_common::tree_config::{BuiltinAction, TreeConfig};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn shipped_server_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../regtree_hal/config/tree.toml");
    let config = TreeConfig::load(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.root.name, "bench");
    let board = &config.devices[0];
    assert_eq!(board.offset, 0x1000);
    assert!(board.block.is_some());
    assert_eq!(board.devices[0].name, "adc");
    assert_eq!(config.slave.len(), 2);
}

#[test]
fn nested_devices_and_variable_fields() {
    let file = write_config(
        r#"
[shared]
log_level = "trace"
service_name = "rig"

[server]
bind = "0.0.0.0:7000"
connect_timeout_ms = 250

[memory]
driver = "emulator"
size = 0x2000
latency_us = 5

[root]
name = "rig"
description = "two level"

[[devices]]
name = "top"
offset = 0x100
block = { word_bits = 16, stride = 2, verify = false }

[[devices.variables]]
name = "Ctrl"
offset = 0
bits = 16
mode = "WO"
disp = "hex"
units = "mV"

[[devices.commands]]
name = "Kick"
offset = 2
bits = 16
action = "post_touch"

[[devices.devices]]
name = "inner"
enabled = false

[[devices.devices.variables]]
name = "Note"
kind = "str"
bits = 64
value = "hello"
"#,
    );

    let config = TreeConfig::load(file.path()).unwrap();
    config.validate().unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Trace);
    assert_eq!(config.server.connect_timeout_ms, 250);
    assert!(config.server.string_bind.is_none());
    assert_eq!(config.memory.size, 0x2000);

    let top = &config.devices[0];
    let block = top.block.as_ref().unwrap();
    assert_eq!((block.word_bits, block.stride, block.verify), (16, 2, false));

    let ctrl = &top.variables[0];
    assert_eq!(ctrl.mode, Mode::WO);
    assert_eq!(ctrl.disp, DisplayFormat::Hex);
    assert_eq!(ctrl.units.as_deref(), Some("mV"));
    assert_eq!(top.commands[0].action, Some(BuiltinAction::PostTouch));

    let inner = &top.devices[0];
    assert!(!inner.enabled);
    assert_eq!(inner.variables[0].kind, ModelKind::Str);
    assert_eq!(inner.variables[0].value.as_ref().and_then(|v| v.as_str()), Some("hello"));
}

#[test]
fn load_does_not_validate() {
    let file = write_config(
        "[shared]\nservice_name = \" \"\n\n[root]\nname = \"r\"\n",
    );
    let config = TreeConfig::load(file.path()).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn unknown_action_is_a_parse_error() {
    let file = write_config(
        "[shared]\nservice_name = \"x\"\n\n[root]\nname = \"r\"\n\n[[devices]]\nname = \"d\"\n\n[[devices.commands]]\nname = \"C\"\naction = \"explode\"\n",
    );
    assert!(matches!(
        TreeConfig::load(file.path()),
        Err(ConfigError::ParseError(_))
    ));
}
