//! # Register Tree Control Plane
//!
//! Hierarchical device/variable/command tree over memory-mapped registers,
//! with a staged block write pipeline, a command engine, a memory-mapped
//! command slave and a remote proxy protocol.
//!
//! # Module Structure
//!
//! - [`tree`] - Devices, variables, root, attributes, construction from config
//! - [`block`] - Staged/committed/verified register blocks
//! - [`command`] - Command actions: native, sequence, Lua script
//! - [`script`] - Lua bindings for script commands
//! - [`slave`] - Address-routed command slave
//! - [`memory`] - `MemoryTransport` trait
//! - [`drivers`] - Transport implementations
//! - [`transport_registry`] - Transport factory registration
//! - [`remote`] - Envelope protocol, server, client
//! - [`adapter`] - String control adapter
//! - [`boundary`] - Fault containment policy
//! - [`core`] - TreeCore, server lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        regtree_hal                               │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ RemoteServer │──►│     Root     │◄──│   ControlAdapter     │  │
//! │  │ (framed TCP) │   │ Device tree  │   │   (line TCP)         │  │
//! │  └──────────────┘   └──────┬───────┘   └──────────────────────┘  │
//! │                            │ stage / commit / verify             │
//! │                            ▼                                     │
//! │                   ┌────────────────┐                             │
//! │                   │  MemoryBlock   │                             │
//! │                   └───────┬────────┘                             │
//! │                           │ Transaction                          │
//! │                           ▼                                      │
//! │                   ┌────────────────┐    ┌─────────────────────┐  │
//! │                   │MemoryTransport │◄───│ Transport Registry  │  │
//! │                   │ (trait object) │    └─────────────────────┘  │
//! │                   └────────────────┘                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod adapter;
pub mod block;
pub mod boundary;
pub mod command;
pub mod core;
pub mod drivers;
pub mod error;
pub mod memory;
pub mod remote;
pub mod script;
pub mod slave;
pub mod transport_registry;
pub mod tree;

// Re-export key types for convenience
pub use crate::adapter::{ControlAdapter, ControlOp};
pub use crate::block::MemoryBlock;
pub use crate::command::{Command, CommandAction, CommandBuilder};
pub use crate::core::{CoreError, TreeCore};
pub use crate::error::NodeError;
pub use crate::memory::MemoryTransport;
pub use crate::remote::{RemoteClient, RemoteServer};
pub use crate::slave::CommandSlave;
pub use crate::transport_registry::TransportRegistry;
pub use crate::tree::{Device, Root, Variable, VariableBuilder};

static_assertions::assert_impl_all!(Root: Send, Sync, Clone);
static_assertions::assert_impl_all!(MemoryBlock: Send, Sync);
static_assertions::assert_impl_all!(CommandSlave: Send, Sync);
