//! Memory transactions.
//!
//! A [`Transaction`] is one outstanding bus operation. It is created by the
//! requester, handed to a memory transport, and completed exactly once with
//! either [`Transaction::done`] or [`Transaction::error`]. Requesters block
//! on [`Transaction::wait`].

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Operation carried by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Read into the transaction buffer.
    Read,
    /// Write the transaction buffer, completion awaited.
    Write,
    /// Write the transaction buffer, nobody waits for completion.
    Post,
    /// Read back previously written data for comparison.
    Verify,
}

impl TransactionKind {
    /// True for `Write` and `Post`.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::Post)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    /// Submitted, not yet terminated.
    Pending,
    /// Completed successfully.
    Done,
    /// Terminated with an error message.
    Error(String),
}

/// Error attached to a failed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} transaction {id} at {address:#010x} ({size} bytes) failed: {message}")]
pub struct TransactionError {
    /// Transaction id
    pub id: u64,
    /// Absolute address
    pub address: u64,
    /// Size in bytes
    pub size: usize,
    /// Operation
    pub kind: TransactionKind,
    /// Message given to `Transaction::error`
    pub message: String,
}

/// One bus operation with a single terminal state.
pub struct Transaction {
    id: u64,
    address: u64,
    kind: TransactionKind,
    data: Mutex<Vec<u8>>,
    state: Mutex<TransactionState>,
    completed: Condvar,
}

assert_impl_all!(Transaction: Send, Sync);

impl Transaction {
    /// Create a transaction with a zeroed buffer of `size` bytes.
    pub fn new(address: u64, kind: TransactionKind, size: usize) -> Arc<Self> {
        Self::with_data(address, kind, vec![0; size])
    }

    /// Create a transaction carrying `data` (size taken from the buffer).
    pub fn with_data(address: u64, kind: TransactionKind, data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            address,
            kind,
            data: Mutex::new(data),
            state: Mutex::new(TransactionState::Pending),
            completed: Condvar::new(),
        })
    }

    /// Unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Absolute address.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Operation.
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Buffer size in bytes.
    pub fn size(&self) -> usize {
        self.data.lock().len()
    }

    /// Copy of the buffer.
    pub fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Overwrite `bytes.len()` bytes of the buffer starting at `offset`.
    pub fn set_data(&self, offset: usize, bytes: &[u8]) -> Result<(), TransactionError> {
        let mut data = self.data.lock();
        let end = offset + bytes.len();
        if end > data.len() {
            let size = data.len();
            drop(data);
            return Err(self.failure(format!(
                "write of {} bytes at buffer offset {} exceeds {} byte buffer",
                bytes.len(),
                offset,
                size
            )));
        }
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state.lock().clone()
    }

    /// True once `done` or `error` has been signalled.
    pub fn is_complete(&self) -> bool {
        *self.state.lock() != TransactionState::Pending
    }

    /// Terminate successfully. Returns `false` if already terminated.
    pub fn done(&self) -> bool {
        self.terminate(TransactionState::Done)
    }

    /// Terminate with an error. Returns `false` if already terminated.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.terminate(TransactionState::Error(message.into()))
    }

    /// Block until terminated.
    pub fn wait(&self) -> Result<(), TransactionError> {
        let mut state = self.state.lock();
        while *state == TransactionState::Pending {
            self.completed.wait(&mut state);
        }
        self.outcome(&state)
    }

    /// Block until terminated or `timeout` elapses. `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), TransactionError>> {
        let mut state = self.state.lock();
        if *state == TransactionState::Pending {
            let _ = self
                .completed
                .wait_while_for(&mut state, |s| *s == TransactionState::Pending, timeout);
        }
        match *state {
            TransactionState::Pending => None,
            ref terminal => Some(self.outcome(terminal)),
        }
    }

    fn terminate(&self, next: TransactionState) -> bool {
        let mut state = self.state.lock();
        if *state != TransactionState::Pending {
            tracing::debug!(
                id = self.id,
                address = self.address,
                "ignoring second completion of transaction"
            );
            return false;
        }
        *state = next;
        self.completed.notify_all();
        true
    }

    fn outcome(&self, state: &TransactionState) -> Result<(), TransactionError> {
        match state {
            TransactionState::Error(message) => Err(self.failure(message.clone())),
            _ => Ok(()),
        }
    }

    fn failure(&self, message: String) -> TransactionError {
        TransactionError {
            id: self.id,
            address: self.address,
            size: self.size_hint(),
            kind: self.kind,
            message,
        }
    }

    fn size_hint(&self) -> usize {
        self.data.try_lock().map_or(0, |d| d.len())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("address", &format_args!("{:#x}", self.address))
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_terminal_state_wins() {
        let txn = Transaction::new(0x100, TransactionKind::Write, 4);
        assert!(txn.done());
        assert!(!txn.error("late"));
        assert_eq!(txn.state(), TransactionState::Done);
        assert!(txn.wait().is_ok());
    }

    #[test]
    fn test_error_is_reported_by_wait() {
        let txn = Transaction::new(0x40, TransactionKind::Read, 4);
        txn.error("bus timeout");
        let err = txn.wait().unwrap_err();
        assert_eq!(err.address, 0x40);
        assert_eq!(err.kind, TransactionKind::Read);
        assert!(err.to_string().contains("bus timeout"));
    }

    #[test]
    fn test_wait_blocks_until_done_from_other_thread() {
        let txn = Transaction::new(0, TransactionKind::Read, 2);
        let remote = Arc::clone(&txn);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.set_data(0, &[0xAA, 0x55]).unwrap();
            remote.done();
        });
        txn.wait().unwrap();
        assert_eq!(txn.data(), vec![0xAA, 0x55]);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_on_pending() {
        let txn = Transaction::new(0, TransactionKind::Read, 4);
        assert!(txn.wait_timeout(Duration::from_millis(5)).is_none());
        txn.done();
        assert!(matches!(txn.wait_timeout(Duration::from_millis(5)), Some(Ok(()))));
    }

    #[test]
    fn test_set_data_out_of_bounds() {
        let txn = Transaction::new(0, TransactionKind::Read, 4);
        assert!(txn.set_data(2, &[1, 2, 3]).is_err());
        assert!(!txn.is_complete());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Transaction::new(0, TransactionKind::Post, 1);
        let b = Transaction::new(0, TransactionKind::Post, 1);
        assert_ne!(a.id(), b.id());
        assert!(TransactionKind::Post.is_write());
        assert!(!TransactionKind::Verify.is_write());
    }
}
