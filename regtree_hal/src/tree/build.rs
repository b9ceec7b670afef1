//! Tree construction from configuration.

use crate::command::CommandBuilder;
use crate::error::NodeError;
use crate::memory::MemoryTransport;
use crate::tree::device::Device;
use crate::tree::root::Root;
use crate::tree::variable::VariableBuilder;
use regtree_common::tree_config::{DeviceConfig, TreeConfig};
use std::sync::Arc;
use tracing::{debug, info};

impl Root {
    /// Build the node tree described by `config`.
    ///
    /// Devices with a `block` section get a memory block on `transport`;
    /// register variables and commands of other devices are rejected.
    pub fn from_config(
        config: &TreeConfig,
        transport: Arc<dyn MemoryTransport>,
    ) -> Result<Root, NodeError> {
        let root = Root::new(config.root.name.clone(), config.root.description.clone());
        for device in &config.devices {
            build_device(root.device(), device, &transport)?;
        }
        info!(
            root = %root.name(),
            devices = config.devices.len(),
            transport = transport.name(),
            "tree built"
        );
        Ok(root)
    }
}

fn build_device(
    parent: &Arc<Device>,
    config: &DeviceConfig,
    transport: &Arc<dyn MemoryTransport>,
) -> Result<(), NodeError> {
    let device = parent.add_device(
        Device::new(config.name.clone(), config.description.clone())
            .with_offset(config.offset)
            .with_enabled(config.enabled),
    )?;
    if let Some(settings) = config.block {
        device.attach_block(settings, Arc::clone(transport))?;
    }

    for variable in &config.variables {
        device.add_variable(VariableBuilder::from_config(variable)?)?;
    }
    for command in &config.commands {
        let builder = CommandBuilder::from_config(command).map_err(|e| {
            NodeError::ConfigText(format!("{}: {e}", device.path()))
        })?;
        device.add_command(builder)?;
    }
    debug!(
        device = %device.path(),
        base = device.base(),
        variables = config.variables.len(),
        commands = config.commands.len(),
        "device built"
    );

    for child in &config.devices {
        build_device(&device, child, transport)?;
    }
    Ok(())
}
