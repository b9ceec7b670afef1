//! Stage / commit / verify / check behaviour of memory blocks, alone and
//! through the device tree.

use parking_lot::Mutex;
use regtree_common::model::{Model, ModelKind};
use regtree_common::transaction::{Transaction, TransactionKind};
use regtree_common::tree_config::BlockSettings;
use regtree_hal::block::{CheckOutcome, MemoryBlock};
use regtree_hal::drivers::emulator::MemoryEmulator;
use regtree_hal::error::NodeError;
use regtree_hal::memory::MemoryTransport;
use regtree_hal::tree::{Device, Root, VariableBuilder};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const BASE: u64 = 0x400;

fn block(emu: &Arc<MemoryEmulator>) -> Arc<MemoryBlock> {
    Arc::new(
        MemoryBlock::new(
            "bench.dev",
            BASE,
            BlockSettings::default(),
            Arc::clone(emu) as Arc<dyn MemoryTransport>,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap(),
    )
}

#[test]
fn concurrent_stages_are_written_exactly_once() {
    const WRITERS: u64 = 4;
    const PER_WRITER: u64 = 64;

    let emu = Arc::new(MemoryEmulator::new(0x10000));
    let block = block(&emu);
    let staging = Arc::new(AtomicBool::new(true));

    let committer = {
        let block = Arc::clone(&block);
        let staging = Arc::clone(&staging);
        thread::spawn(move || {
            let mut issued = 0;
            while staging.load(Ordering::SeqCst) {
                issued += block.commit(false).unwrap();
                thread::yield_now();
            }
            issued
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let block = Arc::clone(&block);
            thread::spawn(move || {
                for i in 0..PER_WRITER {
                    let slot = w * PER_WRITER + i;
                    block.stage(&[(slot * 4, vec![json!(slot + 1)])]).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    staging.store(false, Ordering::SeqCst);
    let issued = committer.join().unwrap() + block.commit(false).unwrap();

    assert_eq!(issued as u64, WRITERS * PER_WRITER);
    let mut per_address: HashMap<u64, usize> = HashMap::new();
    for record in emu.accesses() {
        assert_eq!(record.kind, TransactionKind::Write);
        *per_address.entry(record.address).or_default() += 1;
    }
    assert_eq!(per_address.len() as u64, WRITERS * PER_WRITER);
    assert!(per_address.values().all(|&count| count == 1));

    for slot in 0..WRITERS * PER_WRITER {
        let word = emu.peek(BASE + slot * 4, 4);
        assert_eq!(u32::from_le_bytes([word[0], word[1], word[2], word[3]]) as u64, slot + 1);
    }
}

/// Completes writes immediately and keeps their payloads in order.
#[derive(Default)]
struct WriteLog {
    writes: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl MemoryTransport for WriteLog {
    fn name(&self) -> &str {
        "write-log"
    }

    fn submit(&self, txn: Arc<Transaction>) {
        self.writes.lock().push((txn.address(), txn.data()));
        txn.done();
    }
}

#[test]
fn multi_offset_stage_lands_in_one_commit() {
    const ROUNDS: u32 = 500;

    let log = Arc::new(WriteLog::default());
    let settings = BlockSettings {
        verify: false,
        ..BlockSettings::default()
    };
    let block = Arc::new(
        MemoryBlock::new(
            "bench.pair",
            0,
            settings,
            Arc::clone(&log) as Arc<dyn MemoryTransport>,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap(),
    );
    let staging = Arc::new(AtomicBool::new(true));

    let committer = {
        let block = Arc::clone(&block);
        let staging = Arc::clone(&staging);
        thread::spawn(move || {
            while staging.load(Ordering::SeqCst) {
                block.commit(false).unwrap();
                thread::yield_now();
            }
        })
    };
    for round in 1..=ROUNDS {
        block
            .stage(&[(0x0, vec![json!(round)]), (0x40, vec![json!(round)])])
            .unwrap();
    }
    staging.store(false, Ordering::SeqCst);
    committer.join().unwrap();
    block.commit(false).unwrap();

    let writes = log.writes.lock();
    assert!(!writes.is_empty());
    assert_eq!(writes.len() % 2, 0);
    for pair in writes.chunks(2) {
        assert_eq!(pair[0].0, 0x0);
        assert_eq!(pair[1].0, 0x40);
        assert_eq!(pair[0].1, pair[1].1);
    }
    let last = writes.last().unwrap();
    assert_eq!(last.1, ROUNDS.to_le_bytes().to_vec());
}

#[test]
fn variable_wider_than_block_word_is_rejected() {
    let emu = Arc::new(MemoryEmulator::new(0x1000));
    let root = Root::new("bench", "");
    let dev = root.device().add_device(Device::new("dev", "")).unwrap();
    let settings = BlockSettings {
        word_bits: 16,
        stride: 2,
        ..BlockSettings::default()
    };
    dev.attach_block(settings, Arc::clone(&emu) as Arc<dyn MemoryTransport>)
        .unwrap();

    let wide = dev.add_variable(VariableBuilder::new("Gain").offset(0x4));
    assert!(matches!(wide, Err(NodeError::InvalidArgument(_))));
    assert!(dev.child("Gain").is_none());

    let gain = dev
        .add_variable(
            VariableBuilder::new("Gain")
                .model(Model::new(ModelKind::UInt, 16).unwrap())
                .offset(0x4),
        )
        .unwrap();
    gain.set(json!(0x2345)).unwrap();
    assert_eq!(emu.peek(0x4, 2), vec![0x45, 0x23]);
    assert_eq!(gain.get().unwrap(), gain.value());
}

#[test]
fn later_stage_of_same_offset_wins() {
    let emu = Arc::new(MemoryEmulator::new(0x1000));
    let block = block(&emu);
    block.stage_word(0, 1).unwrap();
    block.stage_word(0, 2).unwrap();
    assert_eq!(block.commit(false).unwrap(), 1);
    assert_eq!(emu.peek(BASE, 4), vec![2, 0, 0, 0]);
}

#[test]
fn empty_commit_issues_nothing() {
    let emu = Arc::new(MemoryEmulator::new(0x1000));
    let block = block(&emu);
    assert_eq!(block.commit(false).unwrap(), 0);
    assert_eq!(block.commit(true).unwrap(), 0);

    block.stage_word(8, 3).unwrap();
    assert_eq!(block.commit(false).unwrap(), 1);
    assert_eq!(block.commit(false).unwrap(), 0);
    assert_eq!(emu.accesses().len(), 1);
}

#[test]
fn verify_round_trip_reads_back_written_words() {
    let emu = Arc::new(MemoryEmulator::new(0x1000));
    let block = block(&emu);
    block
        .stage(&[(0x10, vec![json!(7), json!(8)]), (0x40, vec![json!(9)])])
        .unwrap();
    assert_eq!(block.commit(false).unwrap(), 2);
    assert_eq!(block.verify().unwrap(), 2);
    assert_eq!(emu.access_count(TransactionKind::Verify), 2);

    let CheckOutcome::Verified { mut offsets } = block.check().unwrap() else {
        panic!("expected a clean verify");
    };
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0x10, 0x40]);
    assert!(block.is_idle());
}

#[test]
fn check_without_verify_compares_nothing() {
    let emu = Arc::new(MemoryEmulator::new(0x1000));
    let block = block(&emu);
    block.stage_word(0, 5).unwrap();
    block.commit(false).unwrap();
    assert_eq!(block.check().unwrap(), CheckOutcome::NotChecked);
    assert_eq!(emu.access_count(TransactionKind::Verify), 0);
}

#[test]
fn mismatch_is_reported_then_state_is_cleared() {
    let emu = Arc::new(MemoryEmulator::new(0x1000));
    let block = block(&emu);
    emu.corrupt_readback(BASE + 4, &[0xEE]);

    block.stage(&[(4, vec![json!(0x11)])]).unwrap();
    block.commit(false).unwrap();
    block.verify().unwrap();
    let CheckOutcome::Mismatch(mismatch) = block.check().unwrap() else {
        panic!("expected a mismatch");
    };
    assert_eq!(mismatch.entries.len(), 1);
    assert_eq!(mismatch.entries[0].offset, 4);
    assert_eq!(mismatch.entries[0].expected, vec![json!(0x11)]);
    assert_eq!(mismatch.entries[0].actual, vec![json!(0xEE)]);
    assert!(mismatch.to_string().contains("0xee"));

    assert!(block.is_idle());
    assert_eq!(block.check().unwrap(), CheckOutcome::NotChecked);

    emu.clear_faults();
    block.stage(&[(4, vec![json!(0x11)])]).unwrap();
    block.commit(false).unwrap();
    block.verify().unwrap();
    assert!(block.check().unwrap().is_clean());
}

#[test]
fn failed_write_surfaces_from_check() {
    let emu = Arc::new(MemoryEmulator::new(0x1000));
    let block = block(&emu);
    emu.fail_at(BASE, "bus timeout");
    block.stage_word(0, 1).unwrap();
    block.commit(false).unwrap();
    let err = block.check().unwrap_err();
    assert!(err.to_string().contains("bus timeout"));
    assert!(block.check().is_ok());
}

#[test]
fn variables_drive_the_device_block() {
    let emu = Arc::new(MemoryEmulator::new(0x1000));
    let root = Root::new("bench", "");
    let dev = root
        .device()
        .add_device(Device::new("dev", "").with_offset(0x200))
        .unwrap();
    dev.attach_block(BlockSettings::default(), Arc::clone(&emu) as Arc<dyn MemoryTransport>)
        .unwrap();
    dev.add_variable(VariableBuilder::new("Gain").offset(0x4).value(json!(3)))
        .unwrap();
    dev.add_variable(VariableBuilder::new("Trim").offset(0x8).value(json!(9)))
        .unwrap();

    root.set("bench.dev.Gain", json!(0x55)).unwrap();
    assert_eq!(emu.peek(0x204, 4), vec![0x55, 0, 0, 0]);
    assert_eq!(emu.access_count(TransactionKind::Verify), 1);

    emu.poke(0x204, &[0x66]);
    assert_eq!(root.value("bench.dev.Gain").unwrap(), json!(0x55));
    assert_eq!(root.get("bench.dev.Gain").unwrap(), json!(0x66));
    assert_eq!(root.value("bench.dev.Gain").unwrap(), json!(0x66));

    emu.clear_log();
    assert_eq!(dev.write_blocks(true, true).unwrap(), 2);
    assert_eq!(emu.peek(0x208, 4), vec![9, 0, 0, 0]);
    assert_eq!(dev.verify_blocks(true).unwrap(), 2);
    assert!(dev.check_blocks(true).unwrap());
}
