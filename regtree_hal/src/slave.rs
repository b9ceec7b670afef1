//! Memory-mapped command slave.
//!
//! [`CommandSlave`] is a [`MemoryTransport`] that routes each transaction by
//! address to a registered handler. Writes decode the payload and pass it
//! to the handler; reads call the handler without an argument and encode
//! its return value into the transaction buffer.
//!
//! The table is populated at startup and read-only afterwards.

use crate::boundary::catch_panic;
use crate::command::Command;
use crate::memory::MemoryTransport;
use regtree_common::Value;
use regtree_common::model::{Model, ModelError};
use regtree_common::transaction::Transaction;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Slave handler: `Some(value)` on writes, `None` on reads.
pub type SlaveHandler =
    Arc<dyn Fn(Option<Value>) -> Result<Option<Value>, String> + Send + Sync>;

/// Slave failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlaveError {
    /// Address registered twice.
    #[error("address {0:#x} is already registered")]
    DuplicateAddress(u64),

    /// No handler at the address.
    #[error("no handler registered at {0:#x}")]
    UnknownAddress(u64),

    /// Handler reported an error.
    #[error("handler at {address:#x} failed: {message}")]
    Handler {
        /// Bus address
        address: u64,
        /// Handler message
        message: String,
    },

    /// Payload conversion failed.
    #[error("codec at {address:#x}: {source}")]
    Model {
        /// Bus address
        address: u64,
        /// Codec error
        source: ModelError,
    },

    /// Transaction size does not match the codec.
    #[error("transaction at {address:#x} carries {actual} bytes, codec needs {expected}")]
    SizeMismatch {
        /// Bus address
        address: u64,
        /// Codec size
        expected: usize,
        /// Transaction size
        actual: usize,
    },

    /// Handler panicked.
    #[error("handler at {address:#x} panicked: {message}")]
    Panicked {
        /// Bus address
        address: u64,
        /// Panic message
        message: String,
    },
}

struct SlaveEntry {
    codec: Model,
    handler: SlaveHandler,
}

/// Address to handler dispatch table.
pub struct CommandSlave {
    name: String,
    entries: HashMap<u64, SlaveEntry>,
}

impl CommandSlave {
    /// Empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
        }
    }

    /// Register a handler at `address`.
    pub fn register<F>(&mut self, address: u64, codec: Model, handler: F) -> Result<(), SlaveError>
    where
        F: Fn(Option<Value>) -> Result<Option<Value>, String> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&address) {
            return Err(SlaveError::DuplicateAddress(address));
        }
        self.entries.insert(
            address,
            SlaveEntry {
                codec,
                handler: Arc::new(handler),
            },
        );
        debug!(slave = %self.name, address, "handler registered");
        Ok(())
    }

    /// Register a command: writes invoke it with the decoded value, reads
    /// invoke it without an argument and return its result.
    pub fn register_command(
        &mut self,
        address: u64,
        codec: Model,
        command: Arc<Command>,
    ) -> Result<(), SlaveError> {
        info!(slave = %self.name, address, command = %command.path(), "binding command");
        self.register(address, codec, move |arg| {
            command.try_call(arg.as_ref()).map_err(|e| e.to_string())
        })
    }

    /// Registered addresses, sorted.
    pub fn addresses(&self) -> Vec<u64> {
        let mut addresses: Vec<_> = self.entries.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    fn dispatch(&self, txn: &Transaction) -> Result<(), SlaveError> {
        let address = txn.address();
        let entry = self
            .entries
            .get(&address)
            .ok_or(SlaveError::UnknownAddress(address))?;
        let expected = entry.codec.byte_size();
        if txn.size() != expected {
            return Err(SlaveError::SizeMismatch {
                address,
                expected,
                actual: txn.size(),
            });
        }
        let model_err = |source| SlaveError::Model { address, source };

        let handler = Arc::clone(&entry.handler);
        if txn.kind().is_write() {
            let value = entry.codec.decode(&txn.data()).map_err(model_err)?;
            run_handler(address, move || handler(Some(value)))?;
        } else {
            let result = run_handler(address, move || handler(None))?.unwrap_or(Value::Null);
            let bytes = if result.is_null() {
                vec![0; expected]
            } else {
                entry.codec.encode(&result).map_err(model_err)?
            };
            txn.set_data(0, &bytes).map_err(|e| SlaveError::Handler {
                address,
                message: e.message,
            })?;
        }
        Ok(())
    }
}

fn run_handler(
    address: u64,
    f: impl FnOnce() -> Result<Option<Value>, String>,
) -> Result<Option<Value>, SlaveError> {
    match catch_panic(f) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(SlaveError::Handler { address, message }),
        Err(message) => Err(SlaveError::Panicked { address, message }),
    }
}

impl MemoryTransport for CommandSlave {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, txn: Arc<Transaction>) {
        match self.dispatch(&txn) {
            Ok(()) => {
                txn.done();
            }
            Err(e) => {
                warn!(slave = %self.name, id = txn.id(), "{e}");
                txn.error(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use regtree_common::transaction::{TransactionKind, TransactionState};
    use serde_json::json;

    #[test]
    fn test_duplicate_address_rejected() {
        let mut slave = CommandSlave::new("slave");
        slave.register(0x10, Model::UINT32, |_| Ok(None)).unwrap();
        assert_eq!(
            slave.register(0x10, Model::UINT32, |_| Ok(None)),
            Err(SlaveError::DuplicateAddress(0x10))
        );
        assert_eq!(slave.addresses(), vec![0x10]);
    }

    #[test]
    fn test_unknown_address_errors() {
        let slave = CommandSlave::new("slave");
        let txn = Transaction::new(0x99, TransactionKind::Write, 4);
        slave.submit(Arc::clone(&txn));
        let err = txn.wait().unwrap_err();
        assert!(err.message.contains("0x99"));
    }

    #[test]
    fn test_write_decodes_for_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut slave = CommandSlave::new("slave");
        slave
            .register(0x20, Model::UINT32, move |arg| {
                sink.lock().push(arg);
                Ok(None)
            })
            .unwrap();
        let txn = Transaction::with_data(0x20, TransactionKind::Write, vec![7, 0, 0, 0]);
        slave.submit(Arc::clone(&txn));
        assert!(txn.wait().is_ok());
        assert_eq!(*seen.lock(), vec![Some(json!(7))]);
    }

    #[test]
    fn test_read_encodes_handler_result() {
        let mut slave = CommandSlave::new("slave");
        slave
            .register(0x30, Model::UINT32, |_| Ok(Some(json!(0x0102))))
            .unwrap();
        let txn = Transaction::new(0x30, TransactionKind::Read, 4);
        slave.submit(Arc::clone(&txn));
        txn.wait().unwrap();
        assert_eq!(txn.data(), vec![2, 1, 0, 0]);
    }

    #[test]
    fn test_read_runs_bound_command() {
        use crate::command::{CommandAction, CommandBuilder};
        use crate::tree::{Device, Root};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let root = Root::new("root", "");
        let dev = root.device().add_device(Device::new("dev", "")).unwrap();
        let status = dev
            .add_command(CommandBuilder::new("Status").action(CommandAction::native(
                move |_, _, arg| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(arg.cloned().unwrap_or(json!(77))))
                },
            )))
            .unwrap();

        let mut slave = CommandSlave::new("slave");
        slave.register_command(0x10, Model::UINT32, status).unwrap();

        let read = Transaction::new(0x10, TransactionKind::Read, 4);
        slave.submit(Arc::clone(&read));
        read.wait().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(read.data(), vec![77, 0, 0, 0]);

        let write = Transaction::with_data(0x10, TransactionKind::Write, vec![5, 0, 0, 0]);
        slave.submit(Arc::clone(&write));
        write.wait().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_failure_and_panic_terminate_once() {
        let mut slave = CommandSlave::new("slave");
        slave
            .register(0x40, Model::UINT32, |_| Err("refused".to_string()))
            .unwrap();
        slave
            .register(0x44, Model::UINT32, |_| panic!("handler bug"))
            .unwrap();

        let refused = Transaction::new(0x40, TransactionKind::Write, 4);
        slave.submit(Arc::clone(&refused));
        assert!(matches!(refused.state(), TransactionState::Error(m) if m.contains("refused")));

        let panicked = Transaction::new(0x44, TransactionKind::Read, 4);
        slave.submit(Arc::clone(&panicked));
        assert!(matches!(panicked.state(), TransactionState::Error(m) if m.contains("handler bug")));
        assert!(!panicked.done());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut slave = CommandSlave::new("slave");
        slave.register(0x50, Model::UINT32, |_| Ok(None)).unwrap();
        let txn = Transaction::new(0x50, TransactionKind::Write, 8);
        slave.submit(Arc::clone(&txn));
        assert!(txn.wait().is_err());
    }
}
