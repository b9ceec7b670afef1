//! Server core: tree construction and endpoint lifecycle.
//!
//! `TreeCore` is the main entry point of the server binary. It creates the
//! memory transport, builds the tree, binds the command slave and serves
//! the remote and string endpoints until the running flag is cleared.

use crate::adapter::ControlAdapter;
use crate::error::NodeError;
use crate::memory::MemoryTransport;
use crate::remote::RemoteError;
use crate::remote::server::RemoteServer;
use crate::remote::transport::{ServerHandle, serve_lines, serve_tcp};
use crate::slave::{CommandSlave, SlaveError};
use crate::transport_registry::{TransportRegistry, TransportRegistryError};
use crate::tree::Root;
use regtree_common::config::{ConfigError, ConfigLoader};
use regtree_common::model::{Model, ModelError};
use regtree_common::tree_config::TreeConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Server core failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration file unreadable or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unknown memory transport.
    #[error(transparent)]
    Transport(#[from] TransportRegistryError),

    /// Tree construction failed.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Endpoint could not be bound.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Slave table rejected a binding.
    #[error(transparent)]
    Slave(#[from] SlaveError),

    /// Slave binding has an invalid codec.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// `run` or `start` called before `init`.
    #[error("core is not initialized")]
    NotInitialized,
}

/// Owns the tree and its endpoints.
pub struct TreeCore {
    config: TreeConfig,
    registry: TransportRegistry,
    transport: Option<Arc<dyn MemoryTransport>>,
    root: Option<Root>,
    slave: Option<Arc<CommandSlave>>,
    server: Option<ServerHandle>,
    string_server: Option<ServerHandle>,
    running: Arc<AtomicBool>,
}

impl TreeCore {
    /// Create a core from a validated configuration.
    ///
    /// # Errors
    /// Returns error if configuration validation fails.
    pub fn new(config: TreeConfig) -> Result<Self, CoreError> {
        config.validate()?;
        info!(
            root = %config.root.name,
            devices = config.devices.len(),
            driver = %config.memory.driver,
            "TreeCore created"
        );
        Ok(Self {
            config,
            registry: TransportRegistry::with_builtins(),
            transport: None,
            root: None,
            slave: None,
            server: None,
            string_server: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Load the server configuration from a TOML file.
    pub fn load_config(path: &Path) -> Result<TreeConfig, CoreError> {
        info!("Loading configuration from {:?}", path);
        let config = TreeConfig::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the transport registry (before `init`).
    pub fn with_registry(mut self, registry: TransportRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Create the transport, build the tree and the slave table.
    pub fn init(&mut self) -> Result<(), CoreError> {
        let transport = self.registry.create(&self.config.memory)?;
        info!(transport = transport.name(), "memory transport created");
        let root = Root::from_config(&self.config, Arc::clone(&transport))?;

        // Push configured shadows of writable registers to hardware.
        let issued = root.device().write_blocks(true, true)?;
        root.device().verify_blocks(true)?;
        if !root.device().check_blocks(true)? {
            warn!(root = %root.name(), "initial register contents failed verification");
        }
        debug!(issued, "initial register image written");

        if !self.config.slave.is_empty() {
            let mut slave = CommandSlave::new(format!("{}-slave", root.name()));
            for binding in &self.config.slave {
                let node = root.require(&binding.command)?;
                let command = node
                    .as_command()
                    .cloned()
                    .ok_or_else(|| node.wrong_kind("Command"))?;
                let codec = Model::new(binding.kind, binding.bits)?;
                slave.register_command(binding.address, codec, command)?;
            }
            info!(bindings = self.config.slave.len(), "command slave ready");
            self.slave = Some(Arc::new(slave));
        }

        self.transport = Some(transport);
        self.root = Some(root);
        info!("TreeCore initialized successfully");
        Ok(())
    }

    /// Bind the endpoints and raise the running flag.
    pub fn start(&mut self) -> Result<SocketAddr, CoreError> {
        let root = self.root.clone().ok_or(CoreError::NotInitialized)?;
        if let Some(server) = &self.server {
            return Ok(server.local_addr());
        }

        let server = serve_tcp(
            self.config.server.bind.as_str(),
            Arc::new(RemoteServer::new(root.clone())),
        )?;
        let addr = server.local_addr();
        self.server = Some(server);

        if let Some(bind) = &self.config.server.string_bind {
            let lines = serve_lines(bind.as_str(), Arc::new(ControlAdapter::new(root)))?;
            self.string_server = Some(lines);
        }
        self.running.store(true, Ordering::SeqCst);
        info!(%addr, "TreeCore serving");
        Ok(addr)
    }

    /// Serve until the running flag is cleared.
    pub fn run(&mut self) -> Result<(), CoreError> {
        self.start()?;
        while self.running.load(Ordering::SeqCst) {
            thread::sleep(IDLE_POLL);
        }
        debug!("run loop left");
        Ok(())
    }

    /// Stop the endpoints.
    pub fn shutdown(&mut self) -> Result<(), CoreError> {
        info!("Shutdown requested");
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut server) = self.server.take() {
            server.shutdown();
        }
        if let Some(mut lines) = self.string_server.take() {
            lines.shutdown();
        }
        Ok(())
    }

    /// Running flag for signal handlers.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Loaded configuration.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Tree, once initialized.
    pub fn root(&self) -> Option<&Root> {
        self.root.as_ref()
    }

    /// Memory transport, once initialized.
    pub fn transport(&self) -> Option<&Arc<dyn MemoryTransport>> {
        self.transport.as_ref()
    }

    /// Command slave, when `[[slave]]` bindings are configured.
    pub fn slave(&self) -> Option<&Arc<CommandSlave>> {
        self.slave.as_ref()
    }

    /// Bound string endpoint, if any.
    pub fn string_addr(&self) -> Option<SocketAddr> {
        self.string_server.as_ref().map(ServerHandle::local_addr)
    }
}
