//! Memory transport trait.
//!
//! A memory transport is the collaborator that performs the actual bus
//! access. The tree never touches hardware itself: it builds
//! [`Transaction`]s and hands them to a transport, which completes each one
//! with `done()` or `error()`, synchronously or from another thread.
//!
//! # Implementations
//!
//! - [`crate::drivers::emulator::MemoryEmulator`] - sparse RAM model for development and tests
//! - [`crate::slave::CommandSlave`] - routes addresses to registered command handlers

use regtree_common::consts::DEFAULT_MAX_ACCESS;
use regtree_common::transaction::Transaction;
use std::sync::Arc;

/// Interface of a transaction endpoint.
///
/// # Contract
///
/// Every submitted transaction must eventually reach exactly one terminal
/// state. Requesters block on [`Transaction::wait`] and would hang
/// otherwise.
pub trait MemoryTransport: Send + Sync {
    /// Short identifier used in logs (e.g. "emulator").
    fn name(&self) -> &str;

    /// Accept a transaction for processing.
    fn submit(&self, txn: Arc<Transaction>);

    /// Largest transaction, in bytes, this transport accepts.
    ///
    /// Requesters split larger accesses into chunks.
    fn max_access(&self) -> usize {
        DEFAULT_MAX_ACCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regtree_common::transaction::TransactionKind;

    struct NullTransport;

    impl MemoryTransport for NullTransport {
        fn name(&self) -> &str {
            "null"
        }

        fn submit(&self, txn: Arc<Transaction>) {
            txn.done();
        }
    }

    #[test]
    fn test_default_max_access() {
        assert_eq!(NullTransport.max_access(), DEFAULT_MAX_ACCESS);
    }

    #[test]
    fn test_trait_object_submit() {
        let transport: Arc<dyn MemoryTransport> = Arc::new(NullTransport);
        let txn = Transaction::new(0, TransactionKind::Write, 4);
        transport.submit(Arc::clone(&txn));
        assert!(txn.wait().is_ok());
        assert_eq!(transport.name(), "null");
    }
}
