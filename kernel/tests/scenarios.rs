// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scenarios exercising each subsystem's round-trip behavior
//! against the `hal::sim` backend.

use abi::{DoorFlags, Priority, TaskState};

use avrix_kernel::hal::sim::SimHal;
use avrix_kernel::hal::Hal;
use avrix_kernel::sched::Scheduler;
use avrix_kernel::sync::FastLock;
use avrix_kernel::{door, eepfs, mem, romfs, vfs};

fn stack() -> &'static mut [u8] {
    Box::leak(Box::new([0u8; 128]))
}

fn noop() {}

/// Two tasks (prio 1 and prio 2) each increment a shared counter 1000 times
/// behind a `FastLock`; the final count is 2000.
///
/// Run as real concurrent OS threads (rather than `Scheduler`'s
/// cooperative single-core model, which `hal::sim` can't actually
/// preempt — see that module's doc comment) so the property under test,
/// mutual exclusion, is exercised against genuine concurrency. Each
/// thread gets its own `SimHal`, since the atomics it wraps operate on
/// the `FastLock`'s own cell, not on any HAL-owned state.
#[test]
fn s1_fast_lock_serializes_a_shared_counter() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    static LOCK: FastLock = FastLock::new();
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    COUNTER.store(0, Ordering::SeqCst);

    thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                let hal = SimHal::new();
                for _ in 0..1000 {
                    LOCK.lock(&hal);
                    let v = COUNTER.load(Ordering::Relaxed);
                    COUNTER.store(v + 1, Ordering::Relaxed);
                    LOCK.unlock(&hal);
                }
            });
        }
    });

    assert_eq!(COUNTER.load(Ordering::SeqCst), 2000);
}

/// A task sleeps 50ms while another spins; it is not scheduled again until
/// at least 50 ticks (at 1kHz, 50ms) have elapsed, and resumes within the
/// next tick after that.
#[test]
fn s2_sleep_blocks_for_at_least_the_requested_duration() {
    let hal = SimHal::new();
    let mut sched = Scheduler::new(&hal);
    sched.init();
    let a = sched.task_create(noop, stack(), Priority(1)).unwrap();
    let b = sched.task_create(noop, stack(), Priority(1)).unwrap();
    sched.switch_to(a);
    assert_eq!(sched.current_tid(), a);

    sched.sleep(50);
    assert_eq!(sched.current_tid(), b);
    assert_eq!(sched.task_state(a), Some(TaskState::Sleeping));

    for t in 0..49 {
        sched.tick();
        assert_eq!(
            sched.task_state(a),
            Some(TaskState::Sleeping),
            "A woke early, at tick {t}"
        );
    }
    sched.tick();
    assert_eq!(sched.task_state(a), Some(TaskState::Ready));
}

/// `alloc(16)` twice returns distinct pointers; freeing the first and
/// allocating again returns the same pointer.
#[test]
fn s3_freed_block_is_reused_by_a_same_size_alloc() {
    let heap: mem::HeapArena<256> = mem::HeapArena::new();
    let p1 = heap.alloc(16).unwrap();
    let p2 = heap.alloc(16).unwrap();
    assert_ne!(p1, p2);

    heap.free(Some(p1));
    let p3 = heap.alloc(16).unwrap();
    assert_eq!(p1, p3);
}

/// Task A installs a Door descriptor targeting B (4 words, CRC on), writes
/// bytes `[0x01..0x20]`, and calls; B verifies the bytes and CRC, writes
/// the reversed bytes as its reply, and returns. A observes the reversed
/// buffer.
#[test]
fn s4_door_call_round_trips_a_reversed_reply() {
    let hal = SimHal::new();
    let mut sched = Scheduler::new(&hal);
    sched.init();
    let a = sched.task_create(noop, stack(), Priority(1)).unwrap();
    let b = sched.task_create(noop, stack(), Priority(1)).unwrap();
    sched.switch_to(a);

    door::register(&mut sched, a, 0, b, 4, DoorFlags::CRC);

    let mut buf: [u8; 32] = core::array::from_fn(|i| (i + 1) as u8);
    let sent = buf;

    door::call(&hal, &mut sched, 0, &mut buf, |sched| {
        assert_eq!(sched.current_tid(), b);
        let payload = &door::message()[..32];
        assert_eq!(payload, &sent[..]);
        assert_eq!(door::message()[32], abi::crc8_maxim(payload));

        let mut reversed = sent;
        reversed.reverse();
        door::message_mut()[..32].copy_from_slice(&reversed);
        door::return_(&hal, sched);
    });

    assert_eq!(sched.current_tid(), a);
    let mut expected = sent;
    expected.reverse();
    assert_eq!(buf, expected);
}

/// `put(42, 7)`, `put(42, 9)`, `put(100, 3)`, `del(42)`; then `get(42)` is
/// `NotFound` and `get(100)` is `3`. Remounting (simulating a reboot) over
/// the same backing bytes reproduces identical answers.
#[test]
fn s5_eeprom_log_survives_a_simulated_reboot() {
    let hal = SimHal::new();
    eepfs::init(&hal);

    eepfs::put(&hal, 42, 7).unwrap();
    eepfs::put(&hal, 42, 9).unwrap();
    eepfs::put(&hal, 100, 3).unwrap();
    eepfs::del(&hal, 42).unwrap();

    assert_eq!(eepfs::get(&hal, 42), Err(abi::Error::NotFound));
    assert_eq!(eepfs::get(&hal, 100), Ok(3));

    // "Remount": the backing EEPROM bytes are untouched, so re-running
    // `init` against the same `hal` must reconstruct the same state.
    eepfs::init(&hal);
    assert_eq!(eepfs::get(&hal, 42), Err(abi::Error::NotFound));
    assert_eq!(eepfs::get(&hal, 100), Ok(3));
}

static VERSION_TXT: &[u8] = b"1.0\n";
static ROMFS_FILES: [romfs::File; 1] = [romfs::File { data: VERSION_TXT }];
static ROMFS_CONFIG_ENTRIES: [romfs::Entry; 1] = [romfs::Entry {
    name: b"version.txt",
    kind: romfs::EntryKind::File(0),
}];
static ROMFS_ETC_ENTRIES: [romfs::Entry; 1] = [romfs::Entry {
    name: b"config",
    kind: romfs::EntryKind::Dir(2),
}];
static ROMFS_ROOT_ENTRIES: [romfs::Entry; 1] = [romfs::Entry {
    name: b"etc",
    kind: romfs::EntryKind::Dir(1),
}];
static ROMFS_DIRS: [romfs::Directory; 3] = [
    romfs::Directory {
        entries: &ROMFS_ROOT_ENTRIES,
    },
    romfs::Directory {
        entries: &ROMFS_ETC_ENTRIES,
    },
    romfs::Directory {
        entries: &ROMFS_CONFIG_ENTRIES,
    },
];
static ROMFS_IMAGE: romfs::Image = romfs::Image::new(&ROMFS_DIRS, &ROMFS_FILES, 0);

/// A ROMFS image containing `/etc/config/version.txt` = `"1.0\n"`; `open`
/// succeeds, a 16-byte read from offset 0 returns exactly that string, and
/// a read from offset 4 (end of file) returns nothing.
#[test]
fn s6_romfs_read_matches_the_image_exactly() {
    let hal = SimHal::new();

    let handle = ROMFS_IMAGE.open(&hal, b"/etc/config/version.txt").unwrap();
    let mut buf = [0u8; 16];
    let n = ROMFS_IMAGE.read(&hal, handle, 0, &mut buf);
    assert_eq!(&buf[..n], b"1.0\n");
    assert_eq!(ROMFS_IMAGE.read(&hal, handle, 4, &mut buf), 0);
}

/// The same ROMFS image, reached through the VFS dispatch layer mounted at
/// `/etc`, exercising path resolution end-to-end rather than calling the
/// backing directly.
#[test]
fn s6_romfs_is_reachable_through_the_vfs_mount_table() {
    let hal = SimHal::new();
    let mut fs = vfs::KernelVfs::new();
    fs.init();
    fs.mount(b"/etc", vfs::Backing::Romfs(&ROMFS_IMAGE)).unwrap();

    let fd = fs.open(&hal, b"/etc/config/version.txt").unwrap();
    let mut buf = [0u8; 16];
    let n = fs.read(&hal, fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"1.0\n");
    fs.close(fd).unwrap();
}
