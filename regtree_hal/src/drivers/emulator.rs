//! Emulated register memory.
//!
//! `MemoryEmulator` implements [`MemoryTransport`] over a sparse, page
//! allocated byte array. It records every access and supports fault
//! injection (failing addresses, corrupted read-back) so verification and
//! error paths can be exercised without hardware.

use crate::memory::MemoryTransport;
use parking_lot::Mutex;
use regtree_common::consts::DEFAULT_MAX_ACCESS;
use regtree_common::transaction::{Transaction, TransactionKind};
use regtree_common::tree_config::MemoryConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

const PAGE_SIZE: usize = 4096;

/// One recorded access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    /// Transaction id
    pub id: u64,
    /// Absolute address
    pub address: u64,
    /// Size in bytes
    pub size: usize,
    /// Operation
    pub kind: TransactionKind,
}

struct EmulatorState {
    size: u64,
    pages: Mutex<HashMap<u64, Box<[u8; PAGE_SIZE]>>>,
    readback_faults: Mutex<HashMap<u64, u8>>,
    failing: Mutex<HashMap<u64, String>>,
    log: Mutex<Vec<AccessRecord>>,
}

/// Sparse RAM transport.
pub struct MemoryEmulator {
    state: Arc<EmulatorState>,
    max_access: usize,
    latency: Option<Duration>,
}

/// Factory used by the transport registry.
pub fn create_transport(config: &MemoryConfig) -> Arc<dyn MemoryTransport> {
    Arc::new(MemoryEmulator::from_config(config))
}

impl MemoryEmulator {
    /// Emulate `size` bytes of zeroed memory.
    pub fn new(size: u64) -> Self {
        Self {
            state: Arc::new(EmulatorState {
                size,
                pages: Mutex::new(HashMap::new()),
                readback_faults: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashMap::new()),
                log: Mutex::new(Vec::new()),
            }),
            max_access: DEFAULT_MAX_ACCESS,
            latency: None,
        }
    }

    /// Build from the `[memory]` configuration section.
    pub fn from_config(config: &MemoryConfig) -> Self {
        let mut emulator = Self::new(config.size).with_max_access(config.max_access);
        if config.latency_us > 0 {
            emulator = emulator.with_latency(Duration::from_micros(config.latency_us));
        }
        emulator
    }

    /// Limit the size of a single transaction.
    pub fn with_max_access(mut self, max_access: usize) -> Self {
        self.max_access = max_access.max(1);
        self
    }

    /// Complete transactions from a helper thread after `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Read memory directly, bypassing transactions.
    pub fn peek(&self, address: u64, len: usize) -> Vec<u8> {
        self.state.read(address, len)
    }

    /// Write memory directly, bypassing transactions.
    pub fn poke(&self, address: u64, bytes: &[u8]) {
        self.state.write(address, bytes);
    }

    /// Make `Verify` transactions see `bytes` at `address` instead of memory.
    pub fn corrupt_readback(&self, address: u64, bytes: &[u8]) {
        let mut faults = self.state.readback_faults.lock();
        for (idx, byte) in bytes.iter().enumerate() {
            faults.insert(address + idx as u64, *byte);
        }
    }

    /// Fail every transaction starting at `address`.
    pub fn fail_at(&self, address: u64, message: impl Into<String>) {
        self.state.failing.lock().insert(address, message.into());
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.state.readback_faults.lock().clear();
        self.state.failing.lock().clear();
    }

    /// Accesses seen so far.
    pub fn accesses(&self) -> Vec<AccessRecord> {
        self.state.log.lock().clone()
    }

    /// Number of accesses of one kind.
    pub fn access_count(&self, kind: TransactionKind) -> usize {
        self.state.log.lock().iter().filter(|r| r.kind == kind).count()
    }

    /// Forget recorded accesses.
    pub fn clear_log(&self) {
        self.state.log.lock().clear();
    }
}

impl MemoryTransport for MemoryEmulator {
    fn name(&self) -> &str {
        "emulator"
    }

    fn submit(&self, txn: Arc<Transaction>) {
        self.state.log.lock().push(AccessRecord {
            id: txn.id(),
            address: txn.address(),
            size: txn.size(),
            kind: txn.kind(),
        });
        match self.latency {
            Some(latency) => {
                let state = Arc::clone(&self.state);
                thread::spawn(move || {
                    thread::sleep(latency);
                    state.process(&txn);
                });
            }
            None => self.state.process(&txn),
        }
    }

    fn max_access(&self) -> usize {
        self.max_access
    }
}

impl EmulatorState {
    fn process(&self, txn: &Transaction) {
        let address = txn.address();
        let size = txn.size();
        trace!(id = txn.id(), address, size, kind = %txn.kind(), "emulator access");

        if address.saturating_add(size as u64) > self.size {
            txn.error(format!(
                "access {:#x}+{} beyond end of memory ({:#x} bytes)",
                address, size, self.size
            ));
            return;
        }
        if let Some(message) = self.failing.lock().get(&address) {
            debug!(address, "injected failure");
            txn.error(message.clone());
            return;
        }

        match txn.kind() {
            TransactionKind::Write | TransactionKind::Post => {
                self.write(address, &txn.data());
                txn.done();
            }
            TransactionKind::Read | TransactionKind::Verify => {
                let mut bytes = self.read(address, size);
                if txn.kind() == TransactionKind::Verify {
                    let faults = self.readback_faults.lock();
                    for (idx, byte) in bytes.iter_mut().enumerate() {
                        if let Some(fault) = faults.get(&(address + idx as u64)) {
                            *byte = *fault;
                        }
                    }
                }
                match txn.set_data(0, &bytes) {
                    Ok(()) => {
                        txn.done();
                    }
                    Err(e) => {
                        txn.error(e.message);
                    }
                }
            }
        }
    }

    fn read(&self, address: u64, len: usize) -> Vec<u8> {
        let pages = self.pages.lock();
        (0..len as u64)
            .map(|i| {
                let at = address + i;
                pages
                    .get(&(at / PAGE_SIZE as u64))
                    .map_or(0, |page| page[(at % PAGE_SIZE as u64) as usize])
            })
            .collect()
    }

    fn write(&self, address: u64, bytes: &[u8]) {
        let mut pages = self.pages.lock();
        for (i, byte) in bytes.iter().enumerate() {
            let at = address + i as u64;
            let page = pages
                .entry(at / PAGE_SIZE as u64)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
            page[(at % PAGE_SIZE as u64) as usize] = *byte;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let emu = MemoryEmulator::new(0x1000);
        let write = Transaction::with_data(0x10, TransactionKind::Write, vec![1, 2, 3, 4]);
        emu.submit(Arc::clone(&write));
        write.wait().unwrap();

        let read = Transaction::new(0x10, TransactionKind::Read, 4);
        emu.submit(Arc::clone(&read));
        read.wait().unwrap();
        assert_eq!(read.data(), vec![1, 2, 3, 4]);
        assert_eq!(emu.access_count(TransactionKind::Write), 1);
        assert_eq!(emu.access_count(TransactionKind::Read), 1);
    }

    #[test]
    fn test_out_of_range_errors() {
        let emu = MemoryEmulator::new(0x20);
        let txn = Transaction::new(0x1E, TransactionKind::Read, 4);
        emu.submit(Arc::clone(&txn));
        assert!(txn.wait().is_err());
    }

    #[test]
    fn test_readback_fault_only_affects_verify() {
        let emu = MemoryEmulator::new(0x100);
        emu.poke(0x8, &[0xAA]);
        emu.corrupt_readback(0x8, &[0x55]);

        let read = Transaction::new(0x8, TransactionKind::Read, 1);
        emu.submit(Arc::clone(&read));
        read.wait().unwrap();
        assert_eq!(read.data(), vec![0xAA]);

        let verify = Transaction::new(0x8, TransactionKind::Verify, 1);
        emu.submit(Arc::clone(&verify));
        verify.wait().unwrap();
        assert_eq!(verify.data(), vec![0x55]);
    }

    #[test]
    fn test_injected_failure() {
        let emu = MemoryEmulator::new(0x100);
        emu.fail_at(0x40, "bus error");
        let txn = Transaction::new(0x40, TransactionKind::Write, 4);
        emu.submit(Arc::clone(&txn));
        let err = txn.wait().unwrap_err();
        assert_eq!(err.message, "bus error");

        emu.clear_faults();
        let txn = Transaction::new(0x40, TransactionKind::Write, 4);
        emu.submit(Arc::clone(&txn));
        assert!(txn.wait().is_ok());
    }

    #[test]
    fn test_latency_completes_asynchronously() {
        let emu = MemoryEmulator::new(0x100).with_latency(Duration::from_millis(10));
        let txn = Transaction::new(0, TransactionKind::Read, 4);
        emu.submit(Arc::clone(&txn));
        assert!(!txn.is_complete());
        assert!(txn.wait().is_ok());
    }

    #[test]
    fn test_from_config() {
        let config = MemoryConfig {
            max_access: 16,
            ..MemoryConfig::default()
        };
        let emu = MemoryEmulator::from_config(&config);
        assert_eq!(emu.max_access(), 16);
        assert_eq!(emu.peek(0, 2), vec![0, 0]);
    }
}
