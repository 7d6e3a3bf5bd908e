// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zero-copy synchronous Door RPC between tasks
//!
//! Each task owns a small table of up to `DOOR_SLOTS` [`Descriptor`]s
//! (installed by [`register`]); there is exactly one process-wide payload
//! [`Slab`], since only one Door call is ever in flight at a time. [`call`]
//! copies the caller's buffer into the slab, publishes the call's metadata,
//! and performs the scheduler's directed switch to the target task;
//! [`return_`] is the callee's half, switching back to the caller.
//!
//! `hal::sim` cannot truly suspend a caller's stack across a directed
//! switch and resume it later (its own module doc comment explains why:
//! there is no real machine state to save), so on real hardware `call`'s
//! directed switch simply doesn't return until the callee has run and
//! invoked `return_` — the caller's own stack frame, including `buf`, is
//! untouched the whole time. To make that same round trip host-testable,
//! `call` takes the callee's behavior as a closure, run at exactly the
//! point a real HAL's `context_switch` would hand control to the callee;
//! this is the one place this module's API shape departs from a plain
//! `call(idx, buf)` signature, to stay exercisable against `sim`.
//!
//! Both the CRC and non-CRC paths always copy through the slab in this
//! implementation, rather than pointing a non-CRC transfer directly at
//! `buf`: the two are observationally identical (bit-for-bit payload
//! transport either way), and avoiding the copy would need the kind of raw
//! pointer aliasing this port otherwise steers clear of. See DESIGN.md.

use core::cell::{Cell, UnsafeCell};

use abi::{crc8_maxim, DoorFlags, TaskId};

use crate::config;
use crate::hal::Hal;
use crate::sched::Scheduler;

/// A two-byte Door descriptor. Wire layout:
/// `{tgt_tid:4, words:4, flags:4, reserved:4}`. The 4-bit `tgt_tid` field
/// caps addressable targets at 16 regardless of `config::MAX_TASKS`,
/// which is a property of this RPC's wire format, not of the scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Descriptor(u16);

impl Descriptor {
    pub const EMPTY: Descriptor = Descriptor(0);

    /// Packs a descriptor. Returns `None` if `target`'s index or `words`
    /// doesn't fit in 4 bits — the caller (`DoorTable::register`) treats
    /// that as one more reason to silently ignore the registration.
    fn new(target: TaskId, words: u8, flags: DoorFlags) -> Option<Self> {
        if target.index() > 0xF || words == 0 || words > 0xF {
            return None;
        }
        let tgt = (target.index() as u16) & 0xF;
        let w = (words as u16) & 0xF;
        let f = (flags.bits() as u16) & 0xF;
        Some(Descriptor((tgt << 12) | (w << 8) | (f << 4)))
    }

    pub fn target(self) -> TaskId {
        TaskId::new(((self.0 >> 12) & 0xF) as usize)
    }

    pub fn words(self) -> u8 {
        ((self.0 >> 8) & 0xF) as u8
    }

    pub fn flags(self) -> DoorFlags {
        DoorFlags::from_bits_truncate(((self.0 >> 4) & 0xF) as u8)
    }

    pub fn is_empty(self) -> bool {
        self.words() == 0
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Descriptor::EMPTY
    }
}

/// One task's table of outbound Door descriptors
#[derive(Copy, Clone)]
pub struct DoorTable {
    slots: [Descriptor; config::DOOR_SLOTS],
}

impl DoorTable {
    pub const fn new() -> Self {
        DoorTable {
            slots: [Descriptor::EMPTY; config::DOOR_SLOTS],
        }
    }

    /// Installs a descriptor. Ignored if `idx` is out of
    /// range, `words == 0`, or the payload (plus a CRC trailer byte, when
    /// the `CRC` flag is set) wouldn't fit in the slab.
    pub fn register(&mut self, idx: usize, target: TaskId, words: u8, flags: DoorFlags) {
        if idx >= config::DOOR_SLOTS {
            return;
        }
        let needed = words as usize * 8 + usize::from(flags.contains(DoorFlags::CRC));
        if words == 0 || needed > config::DOOR_SLAB_SIZE {
            return;
        }
        if let Some(d) = Descriptor::new(target, words, flags) {
            self.slots[idx] = d;
        }
    }

    /// The descriptor at `idx`, if the slot is installed (non-empty).
    pub fn get(&self, idx: usize) -> Option<Descriptor> {
        self.slots.get(idx).copied().filter(|d| !d.is_empty())
    }
}

impl Default for DoorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone)]
struct Meta {
    caller: TaskId,
    words: u8,
    flags: DoorFlags,
}

impl Meta {
    const fn empty() -> Self {
        Meta {
            caller: TaskId::new(0),
            words: 0,
            flags: DoorFlags::empty(),
        }
    }
}

/// The one process-wide Door payload buffer. Invariant: at most one call
/// owns it at a time.
struct Slab {
    bytes: UnsafeCell<[u8; config::DOOR_SLAB_SIZE]>,
    meta: Cell<Meta>,
}

// Safety: the single-outstanding-call invariant is what makes
// shared access to `bytes` sound; see the module doc comment.
unsafe impl Sync for Slab {}

impl Slab {
    const fn new() -> Self {
        Slab {
            bytes: UnsafeCell::new([0; config::DOOR_SLAB_SIZE]),
            meta: Cell::new(Meta::empty()),
        }
    }

    fn write_payload(&self, data: &[u8]) {
        // Safety: see the `Sync` impl above.
        let bytes = unsafe { &mut *self.bytes.get() };
        bytes[..data.len()].copy_from_slice(data);
    }

    fn read_payload(&self, out: &mut [u8]) {
        // Safety: see the `Sync` impl above.
        let bytes = unsafe { &*self.bytes.get() };
        out.copy_from_slice(&bytes[..out.len()]);
    }

    fn set_byte(&self, idx: usize, v: u8) {
        // Safety: see the `Sync` impl above.
        let bytes = unsafe { &mut *self.bytes.get() };
        bytes[idx] = v;
    }

    fn payload(&self, len: usize) -> &[u8] {
        // Safety: see the `Sync` impl above.
        let bytes = unsafe { &*self.bytes.get() };
        &bytes[..len]
    }

    fn publish(&self, caller: TaskId, words: u8, flags: DoorFlags) {
        self.meta.set(Meta { caller, words, flags });
    }
}

static SLAB: Slab = Slab::new();

/// Installs a Door descriptor in `tid`'s table. No-op if `tid` doesn't name
/// a live task.
pub fn register(
    sched: &mut Scheduler<'_>,
    tid: TaskId,
    idx: usize,
    target: TaskId,
    words: u8,
    flags: DoorFlags,
) {
    if let Some(table) = sched.door_table_mut(tid) {
        table.register(idx, target, words, flags);
    }
}

/// Performs a Door call from the currently running task: copies `buf` into
/// the slab (appending a CRC-8 trailer if the descriptor's `CRC` flag is
/// set), publishes the call metadata, and directs the scheduler to the
/// target. `callee` runs at the point a real directed switch would hand
/// control to the target task — see the module doc comment — and is
/// expected to call [`return_`] before returning. Once it does, the slab is
/// copied back into `buf`.
///
/// A no-op if slot `idx` in the caller's table is empty.
pub fn call<H: Hal>(
    hal: &H,
    sched: &mut Scheduler<'_>,
    idx: usize,
    buf: &mut [u8],
    callee: impl FnOnce(&mut Scheduler<'_>),
) {
    let caller = sched.current_tid();
    let Some(desc) = sched.door_table(caller).and_then(|t| t.get(idx)) else {
        return;
    };
    let len = desc.words() as usize * 8;

    SLAB.write_payload(&buf[..len]);
    if desc.flags().contains(DoorFlags::CRC) {
        let crc = crc8_maxim(SLAB.payload(len));
        SLAB.set_byte(len, crc);
    }
    SLAB.publish(caller, desc.words(), desc.flags());
    hal.memory_barrier();

    sched.switch_to(desc.target());
    callee(sched);

    SLAB.read_payload(&mut buf[..len]);
}

/// The callee's half: switches back to the call's caller. The callee must
/// have already written its reply into the slab (via [`message_mut`]).
pub fn return_<H: Hal>(hal: &H, sched: &mut Scheduler<'_>) {
    hal.memory_barrier();
    let caller = SLAB.meta.get().caller;
    sched.switch_to(caller);
}

/// The slab's full payload region, for the callee to inspect an in-flight
/// call. Meaningful only while a call is outstanding.
pub fn message() -> &'static [u8] {
    // Safety: see `Slab`'s `Sync` impl.
    unsafe { &*SLAB.bytes.get() }
}

/// Mutable access to the slab, for the callee to write its reply before
/// calling [`return_`].
#[allow(clippy::mut_from_ref)]
pub fn message_mut() -> &'static mut [u8] {
    // Safety: see `Slab`'s `Sync` impl.
    unsafe { &mut *SLAB.bytes.get() }
}

/// The `words` field published by the in-flight call's descriptor.
pub fn words() -> u8 {
    SLAB.meta.get().words
}

/// The `flags` field published by the in-flight call's descriptor.
pub fn flags() -> DoorFlags {
    SLAB.meta.get().flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimHal;
    use abi::Priority;

    fn stack() -> &'static mut [u8] {
        Box::leak(Box::new([0u8; 128]))
    }

    fn noop() {}

    #[test]
    fn register_ignores_out_of_range_slot() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        let a = sched.task_create(noop, stack(), Priority(1)).unwrap();
        register(&mut sched, a, config::DOOR_SLOTS, a, 1, DoorFlags::empty());
        assert!(sched.door_table(a).unwrap().get(0).is_none());
    }

    #[test]
    fn register_ignores_zero_words() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        let a = sched.task_create(noop, stack(), Priority(1)).unwrap();
        register(&mut sched, a, 0, a, 0, DoorFlags::empty());
        assert!(sched.door_table(a).unwrap().get(0).is_none());
    }

    #[test]
    fn call_is_noop_on_empty_slot() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        let a = sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.current_tid(); // currently task 0 by construction below
        let mut buf = [0u8; 8];
        let before = sched.current_tid();
        call(&hal, &mut sched, 0, &mut buf, |_| panic!("callee must not run"));
        assert_eq!(sched.current_tid(), before);
        let _ = a;
    }

    /// A calls B with 4 words and CRC on; B verifies the bytes and CRC,
    /// writes a reversed reply, and returns; A observes the reversed
    /// buffer.
    #[test]
    fn door_call_round_trips_with_crc() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        let a = sched.task_create(noop, stack(), Priority(1)).unwrap();
        let b = sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.switch_to(a);
        assert_eq!(sched.current_tid(), a);

        register(&mut sched, a, 0, b, 4, DoorFlags::CRC);

        let mut buf: [u8; 32] = core::array::from_fn(|i| i as u8 + 1);
        let original = buf;

        call(&hal, &mut sched, 0, &mut buf, |sched| {
            assert_eq!(sched.current_tid(), b);
            let payload = &message()[..32];
            assert_eq!(payload, &original[..]);
            let crc = message()[32];
            assert_eq!(crc, crc8_maxim(payload));
            assert_eq!(words(), 4);
            assert!(flags().contains(DoorFlags::CRC));

            let reply = message_mut();
            let mut reversed = original;
            reversed.reverse();
            reply[..32].copy_from_slice(&reversed);

            return_(&hal, sched);
        });

        assert_eq!(sched.current_tid(), a);
        let mut expected = original;
        expected.reverse();
        assert_eq!(buf, expected);
    }

    #[test]
    fn door_call_without_crc_skips_trailer() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        let a = sched.task_create(noop, stack(), Priority(1)).unwrap();
        let b = sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.switch_to(a);

        register(&mut sched, a, 0, b, 1, DoorFlags::empty());
        let mut buf = [0xAAu8; 8];

        call(&hal, &mut sched, 0, &mut buf, |sched| {
            assert!(!flags().contains(DoorFlags::CRC));
            return_(&hal, sched);
        });

        assert_eq!(buf, [0xAAu8; 8]);
    }
}
