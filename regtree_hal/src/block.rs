//! Memory block pipeline.
//!
//! A [`MemoryBlock`] owns the staged register data of one memory-backed
//! device. Writes go through four steps:
//!
//! ```text
//! stage ──► set map ──commit──► write snapshot ──verify──► verify map
//!                        │                          │
//!                        ▼                          ▼
//!                  Write txns              Verify txns (read-back)
//!                                                   │
//!                                            check ◄┘  mask + decode + compare
//! ```
//!
//! All maps live behind one per-block mutex. The set map is swapped out the
//! moment it is handed to the transport, so concurrent stagers either land
//! in this commit or the next one, never half of each. Waiting for
//! completion happens without the lock.
//!
//! Transactions are submitted while the map lock is held. A transport must
//! therefore not re-enter the issuing block from inside `submit`.

use crate::memory::MemoryTransport;
use parking_lot::Mutex;
use regtree_common::model::{DisplayFormat, Model, ModelError, ModelKind, Value, mask_words};
use regtree_common::transaction::{
    Transaction, TransactionError, TransactionKind, TransactionState,
};
use regtree_common::tree_config::BlockSettings;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Block pipeline errors.
#[derive(Debug, Clone, Error)]
pub enum BlockError {
    /// Geometry rejected.
    #[error("block configuration: {0}")]
    Config(String),

    /// Value could not be converted to a word.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A transaction issued by this block failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Read-back differed from the data written.
    #[error("{0}")]
    Verify(VerifyMismatch),
}

/// Result of [`MemoryBlock::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Nothing was pending verification.
    NotChecked,
    /// Every read-back matched.
    Verified {
        /// Offsets compared
        offsets: Vec<u64>,
    },
    /// At least one offset read back different data.
    Mismatch(VerifyMismatch),
}

impl CheckOutcome {
    /// False only for a mismatch.
    pub fn is_clean(&self) -> bool {
        !matches!(self, Self::Mismatch(_))
    }
}

/// One differing offset.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchEntry {
    /// Offset inside the block
    pub offset: u64,
    /// Values written
    pub expected: Vec<Value>,
    /// Values read back
    pub actual: Vec<Value>,
}

/// Verification report.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyMismatch {
    /// Block name (device path)
    pub block: String,
    /// Word model used for rendering
    pub model: Model,
    /// Differing offsets
    pub entries: Vec<MismatchEntry>,
}

impl fmt::Display for VerifyMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "verify mismatch in {}:", self.block)?;
        let render = |values: &[Value]| {
            values
                .iter()
                .map(|v| self.model.display(v, DisplayFormat::Hex))
                .collect::<Vec<_>>()
                .join(" ")
        };
        for entry in &self.entries {
            write!(
                f,
                "\n  {:#010x}  wrote {}\n              read  {}",
                entry.offset,
                render(&entry.expected),
                render(&entry.actual)
            )?;
        }
        Ok(())
    }
}

struct VerifyRead {
    len: usize,
    chunks: Vec<(usize, Arc<Transaction>)>,
}

#[derive(Default)]
struct BlockMaps {
    set: BTreeMap<u64, Vec<Value>>,
    write: BTreeMap<u64, Vec<Value>>,
    written: BTreeMap<u64, Vec<u8>>,
    verify_data: BTreeMap<u64, VerifyRead>,
    verify: BTreeMap<u64, Vec<Value>>,
}

/// Staged register data of one device.
pub struct MemoryBlock {
    name: String,
    base: u64,
    settings: BlockSettings,
    model: Model,
    transport: Arc<dyn MemoryTransport>,
    enabled: Arc<AtomicBool>,
    maps: Mutex<BlockMaps>,
    tracker: Mutex<Vec<Arc<Transaction>>>,
}

impl MemoryBlock {
    /// Create a block at absolute address `base`.
    ///
    /// `enabled` is shared with the owning device; commits and verifies are
    /// no-ops while it is cleared.
    pub fn new(
        name: impl Into<String>,
        base: u64,
        settings: BlockSettings,
        transport: Arc<dyn MemoryTransport>,
        enabled: Arc<AtomicBool>,
    ) -> Result<Self, BlockError> {
        if settings.kind == ModelKind::Str {
            return Err(BlockError::Config("string words are not supported".into()));
        }
        let model = Model::new(settings.kind, settings.word_bits)?;
        if settings.stride == 0 || settings.stride < model.byte_size() {
            return Err(BlockError::Config(format!(
                "stride {} cannot hold a {}-bit word",
                settings.stride, settings.word_bits
            )));
        }
        Ok(Self {
            name: name.into(),
            base,
            settings,
            model,
            transport,
            enabled,
            maps: Mutex::new(BlockMaps::default()),
            tracker: Mutex::new(Vec::new()),
        })
    }

    /// Block name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute base address.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Word model.
    pub fn model(&self) -> Model {
        self.model
    }

    /// Geometry.
    pub fn settings(&self) -> BlockSettings {
        self.settings
    }

    /// Current enable flag.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Record `(offset, words)` pairs into the set map.
    ///
    /// All pairs land under one lock acquisition. A later stage of the
    /// same offset before the next commit replaces the earlier one.
    pub fn stage(&self, pairs: &[(u64, Vec<Value>)]) -> Result<(), BlockError> {
        let normalized = pairs
            .iter()
            .map(|(offset, values)| {
                values
                    .iter()
                    .map(|v| Ok(self.model.from_word(self.model.to_word(v)?)))
                    .collect::<Result<Vec<_>, ModelError>>()
                    .map(|words| (*offset, words))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut maps = self.maps.lock();
        for (offset, words) in normalized {
            trace!(block = %self.name, offset, words = words.len(), "stage");
            maps.set.insert(offset, words);
        }
        Ok(())
    }

    /// Stage one raw word.
    pub fn stage_word(&self, offset: u64, word: u64) -> Result<(), BlockError> {
        self.stage(&[(offset, vec![self.model.from_word(word)])])
    }

    /// Stage comma separated display strings at `offset`.
    pub fn stage_display(&self, offset: u64, text: &str) -> Result<(), BlockError> {
        let values = text
            .split(',')
            .map(|part| self.model.parse_display(part))
            .collect::<Result<Vec<_>, _>>()?;
        self.stage(&[(offset, values)])
    }

    /// Hand the staged data to the transport.
    ///
    /// Returns the number of write transactions issued. `force` does not
    /// change block behaviour; devices use it to restage their shadows
    /// before calling here.
    pub fn commit(&self, force: bool) -> Result<usize, BlockError> {
        if !self.is_enabled() {
            debug!(block = %self.name, "commit skipped, block disabled");
            return Ok(0);
        }
        let max = self.transport.max_access().max(1);

        let mut maps = self.maps.lock();
        if maps.set.is_empty() {
            return Ok(0);
        }
        // An encode failure leaves the set map untouched and issues nothing.
        let encoded = maps
            .set
            .iter()
            .map(|(offset, values)| Ok((*offset, self.encode_words(values)?)))
            .collect::<Result<Vec<_>, BlockError>>()?;
        let staged = mem::take(&mut maps.set);

        let mut issued = 0;
        let mut tracker = self.tracker.lock();
        for (offset, bytes) in encoded {
            for (idx, chunk) in bytes.chunks(max).enumerate() {
                let address = self.base + offset + (idx * max) as u64;
                let txn = Transaction::with_data(address, TransactionKind::Write, chunk.to_vec());
                debug!(block = %self.name, id = txn.id(), address, size = chunk.len(), "write");
                self.transport.submit(Arc::clone(&txn));
                tracker.push(txn);
                issued += 1;
            }
            if self.settings.verify {
                maps.written.insert(offset, bytes);
            }
        }
        maps.write = staged;
        trace!(block = %self.name, force, issued, "commit");
        Ok(issued)
    }

    /// Issue read-back transactions for everything written since the last
    /// verify. Returns the number issued.
    pub fn verify(&self) -> Result<usize, BlockError> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let max = self.transport.max_access().max(1);

        let mut maps = self.maps.lock();
        let written = mem::take(&mut maps.written);
        let mut issued = 0;
        let mut tracker = self.tracker.lock();
        for (offset, bytes) in written {
            let len = bytes.len();
            let mut chunks = Vec::new();
            for start in (0..len).step_by(max) {
                let size = max.min(len - start);
                let address = self.base + offset + start as u64;
                let txn = Transaction::new(address, TransactionKind::Verify, size);
                debug!(block = %self.name, id = txn.id(), address, size, "verify read");
                self.transport.submit(Arc::clone(&txn));
                tracker.push(Arc::clone(&txn));
                chunks.push((start, txn));
                issued += 1;
            }
            maps.verify_data.insert(offset, VerifyRead { len, chunks });
        }
        let write = mem::take(&mut maps.write);
        if self.settings.verify {
            maps.verify.extend(write);
        }
        Ok(issued)
    }

    /// Wait for every outstanding transaction and compare read-back data.
    ///
    /// Verify state is cleared before waiting, so a failed check never
    /// leaves stale entries behind.
    pub fn check(&self) -> Result<CheckOutcome, BlockError> {
        let (verify_data, expected) = {
            let mut maps = self.maps.lock();
            (mem::take(&mut maps.verify_data), mem::take(&mut maps.verify))
        };
        let pending = mem::take(&mut *self.tracker.lock());

        let mut failure = None;
        for txn in &pending {
            if let Err(e) = txn.wait() {
                failure.get_or_insert(e);
            }
        }
        if let Some(e) = failure {
            warn!(block = %self.name, "{e}");
            return Err(BlockError::Transaction(e));
        }
        if expected.is_empty() {
            return Ok(CheckOutcome::NotChecked);
        }

        let mut offsets = Vec::new();
        let mut entries = Vec::new();
        for (offset, want) in expected {
            let Some(read) = verify_data.get(&offset) else {
                continue;
            };
            let mut buf = vec![0u8; read.len];
            for (start, txn) in &read.chunks {
                let data = txn.data();
                let end = (*start + data.len()).min(read.len);
                buf[*start..end].copy_from_slice(&data[..end - start]);
            }
            mask_words(&mut buf, self.settings.word_bits, self.settings.stride);
            let got = self.decode_words(&buf)?;
            if got == want {
                offsets.push(offset);
            } else {
                entries.push(MismatchEntry {
                    offset,
                    expected: want,
                    actual: got,
                });
            }
        }

        if entries.is_empty() {
            Ok(CheckOutcome::Verified { offsets })
        } else {
            let mismatch = VerifyMismatch {
                block: self.name.clone(),
                model: self.model,
                entries,
            };
            warn!("{mismatch}");
            Ok(CheckOutcome::Mismatch(mismatch))
        }
    }

    /// Blocking read of `count` words at `offset`.
    pub fn read(&self, offset: u64, count: usize) -> Result<Vec<Value>, BlockError> {
        let len = count * self.settings.stride;
        let max = self.transport.max_access().max(1);
        let mut buf = vec![0u8; len];
        for start in (0..len).step_by(max) {
            let size = max.min(len - start);
            let txn = Transaction::new(self.base + offset + start as u64, TransactionKind::Read, size);
            self.transport.submit(Arc::clone(&txn));
            txn.wait()?;
            let data = txn.data();
            buf[start..start + size].copy_from_slice(&data[..size.min(data.len())]);
        }
        mask_words(&mut buf, self.settings.word_bits, self.settings.stride);
        self.decode_words(&buf)
    }

    /// Blocking read of one raw word.
    pub fn read_word(&self, offset: u64) -> Result<u64, BlockError> {
        let values = self.read(offset, 1)?;
        match values.first() {
            Some(value) => Ok(self.model.to_word(value)?),
            None => Err(BlockError::Config("empty read".into())),
        }
    }

    /// Posted write of one raw word. Completion is collected by the next
    /// [`check`](Self::check).
    pub fn post_word(&self, offset: u64, word: u64) -> Result<(), BlockError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let bytes = self.encode_words(&[self.model.from_word(word)])?;
        let txn = Transaction::with_data(self.base + offset, TransactionKind::Post, bytes);
        debug!(block = %self.name, id = txn.id(), offset, "post");
        self.transport.submit(Arc::clone(&txn));
        let mut tracker = self.tracker.lock();
        // Failed posts stay until check reports them.
        tracker.retain(|t| t.state() != TransactionState::Done);
        tracker.push(txn);
        Ok(())
    }

    /// One-line description of pending state, for diagnostics.
    pub fn state_summary(&self) -> String {
        let maps = self.maps.lock();
        format!(
            "{}: set={} write={} written={} verify={} outstanding={}",
            self.name,
            maps.set.len(),
            maps.write.len(),
            maps.written.len(),
            maps.verify.len(),
            self.tracker.lock().len()
        )
    }

    /// True when nothing is staged, retained or outstanding.
    pub fn is_idle(&self) -> bool {
        let maps = self.maps.lock();
        maps.set.is_empty()
            && maps.write.is_empty()
            && maps.written.is_empty()
            && maps.verify_data.is_empty()
            && maps.verify.is_empty()
            && self.tracker.lock().is_empty()
    }

    fn encode_words(&self, values: &[Value]) -> Result<Vec<u8>, BlockError> {
        let stride = self.settings.stride;
        let mut out = Vec::with_capacity(values.len() * stride);
        for value in values {
            let mut word = self.model.encode(value)?;
            word.resize(stride, 0);
            out.extend_from_slice(&word);
        }
        Ok(out)
    }

    fn decode_words(&self, buf: &[u8]) -> Result<Vec<Value>, BlockError> {
        buf.chunks(self.settings.stride)
            .map(|chunk| self.model.decode(chunk).map_err(BlockError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::emulator::MemoryEmulator;
    use serde_json::json;

    fn block_with(emu: &Arc<MemoryEmulator>, settings: BlockSettings) -> MemoryBlock {
        MemoryBlock::new(
            "root.dev",
            0x100,
            settings,
            Arc::clone(emu) as Arc<dyn MemoryTransport>,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap()
    }

    #[test]
    fn test_commit_writes_little_endian_words() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let block = block_with(&emu, BlockSettings::default());
        block.stage(&[(0x4, vec![json!(0x11223344), json!(5)])]).unwrap();
        assert_eq!(block.commit(false).unwrap(), 1);
        assert_eq!(emu.peek(0x104, 8), vec![0x44, 0x33, 0x22, 0x11, 5, 0, 0, 0]);
    }

    #[test]
    fn test_commit_chunks_by_max_access() {
        let emu = Arc::new(MemoryEmulator::new(0x1000).with_max_access(4));
        let block = block_with(&emu, BlockSettings::default());
        block.stage(&[(0, vec![json!(1), json!(2), json!(3)])]).unwrap();
        assert_eq!(block.commit(false).unwrap(), 3);
        let addresses: Vec<_> = emu.accesses().iter().map(|a| a.address).collect();
        assert_eq!(addresses, vec![0x100, 0x104, 0x108]);
    }

    #[test]
    fn test_stage_masks_values() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let settings = BlockSettings {
            word_bits: 12,
            ..BlockSettings::default()
        };
        let block = block_with(&emu, settings);
        block.stage_word(0, 0xFFFF).unwrap();
        block.commit(false).unwrap();
        assert_eq!(emu.peek(0x100, 4), vec![0xFF, 0x0F, 0, 0]);
    }

    #[test]
    fn test_stage_display_list() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let block = block_with(&emu, BlockSettings::default());
        block.stage_display(0, "0x10, 7").unwrap();
        block.commit(false).unwrap();
        assert_eq!(block.read(0, 2).unwrap(), vec![json!(16), json!(7)]);
        assert!(block.stage_display(0, "seven").is_err());
    }

    #[test]
    fn test_disabled_block_is_inert() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let enabled = Arc::new(AtomicBool::new(false));
        let block = MemoryBlock::new(
            "root.off",
            0,
            BlockSettings::default(),
            Arc::clone(&emu) as Arc<dyn MemoryTransport>,
            Arc::clone(&enabled),
        )
        .unwrap();
        block.stage_word(0, 1).unwrap();
        assert_eq!(block.commit(false).unwrap(), 0);
        assert_eq!(block.verify().unwrap(), 0);
        assert!(emu.accesses().is_empty());

        enabled.store(true, Ordering::Release);
        assert_eq!(block.commit(false).unwrap(), 1);
    }

    #[test]
    fn test_verify_round_trip() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let block = block_with(&emu, BlockSettings::default());
        block.stage(&[(0x8, vec![json!(42)])]).unwrap();
        block.commit(false).unwrap();
        assert_eq!(block.verify().unwrap(), 1);
        assert_eq!(
            block.check().unwrap(),
            CheckOutcome::Verified { offsets: vec![0x8] }
        );
        assert!(block.is_idle());
    }

    #[test]
    fn test_verify_ignores_bits_above_word() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let settings = BlockSettings {
            word_bits: 8,
            ..BlockSettings::default()
        };
        let block = block_with(&emu, settings);
        block.stage_word(0, 0x5A).unwrap();
        block.commit(false).unwrap();
        emu.corrupt_readback(0x101, &[0xEE]);
        block.verify().unwrap();
        assert!(block.check().unwrap().is_clean());
    }

    #[test]
    fn test_check_reports_mismatch_and_clears() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let block = block_with(&emu, BlockSettings::default());
        block.stage_word(0, 5).unwrap();
        block.commit(false).unwrap();
        emu.corrupt_readback(0x100, &[0x45]);
        block.verify().unwrap();
        let CheckOutcome::Mismatch(report) = block.check().unwrap() else {
            panic!("expected mismatch");
        };
        assert_eq!(report.entries[0].expected, vec![json!(5)]);
        assert_eq!(report.entries[0].actual, vec![json!(0x45)]);
        assert!(report.to_string().contains("0x45"));
        assert!(block.is_idle());
        assert_eq!(block.check().unwrap(), CheckOutcome::NotChecked);
    }

    #[test]
    fn test_check_surfaces_transaction_error_once() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        emu.fail_at(0x100, "nack");
        let block = block_with(&emu, BlockSettings::default());
        block.stage_word(0, 1).unwrap();
        block.commit(false).unwrap();
        block.verify().unwrap();
        assert!(matches!(block.check(), Err(BlockError::Transaction(_))));
        assert_eq!(block.check().unwrap(), CheckOutcome::NotChecked);
    }

    #[test]
    fn test_completed_posts_are_not_retained() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let block = block_with(&emu, BlockSettings::default());
        emu.fail_at(0x110, "fifo full");
        block.post_word(0x10, 1).unwrap();
        for i in 0..64 {
            block.post_word(0x20, i).unwrap();
        }
        assert!(block.state_summary().ends_with("outstanding=2"));
        let err = block.check().unwrap_err();
        assert!(err.to_string().contains("fifo full"));
        assert!(block.is_idle());
    }

    #[test]
    fn test_post_collected_by_check() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let block = block_with(&emu, BlockSettings::default());
        block.post_word(0xC, 9).unwrap();
        assert_eq!(block.check().unwrap(), CheckOutcome::NotChecked);
        assert_eq!(block.read_word(0xC).unwrap(), 9);
        assert_eq!(emu.access_count(TransactionKind::Post), 1);
    }

    #[test]
    fn test_string_words_rejected() {
        let emu = Arc::new(MemoryEmulator::new(0x1000));
        let settings = BlockSettings {
            kind: ModelKind::Str,
            word_bits: 32,
            ..BlockSettings::default()
        };
        let result = MemoryBlock::new(
            "root.s",
            0,
            settings,
            emu as Arc<dyn MemoryTransport>,
            Arc::new(AtomicBool::new(true)),
        );
        assert!(matches!(result, Err(BlockError::Config(_))));
    }
}
