//! Memory transport implementations.
//!
//! - [`emulator`] - Sparse RAM model for development and testing
//!
//! # Adding New Transports
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `MemoryTransport` trait from `crate::memory`
//! 3. Register a factory in [`register_builtin_transports`]

pub mod emulator;

use crate::transport_registry::{TransportRegistry, TransportRegistryError};

/// Register every built-in transport factory.
pub fn register_builtin_transports(
    registry: &mut TransportRegistry,
) -> Result<(), TransportRegistryError> {
    registry.register("emulator", emulator::create_transport)?;
    Ok(())
}
