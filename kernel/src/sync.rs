// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The atomic spinlock family
//!
//! Four lock shapes, each built on the one below it:
//!
//! - [`FastLock`]: a single test-and-set byte. The primitive everything else
//!   is built from.
//! - [`TicketLock`] (feature `qlock`): FIFO-ordered head/tail counters.
//!   Independent of `FastLock` — an alternative, not a wrapper.
//! - [`SmartLock`]: `FastLock` plus, with feature `lattice`, golden-ratio
//!   ticket fairness layered on top of it; carries a `dag_mask`/`rt_mode`
//!   pair of fields that it never writes itself (see below).
//! - [`CompositeLock`]: wraps a `SmartLock` and enforces ordering against
//!   the process-wide [`Bkl`].
//!
//! All lock operations take `&H: Hal` so a port without hardware atomics can
//! route them through `irq_save`/`irq_restore`; `hal::sim`
//! uses the default bodies backed by `core::sync::atomic`.
//!
//! # `dag_mask` / `rt_mode` live on `SmartLock`, written only by `CompositeLock`
//!
//! Only `CompositeLock`'s `lock`/`unlock` ever write `s.dag_mask` and
//! `s.rt_mode`, which only makes sense if those fields belong to the smart
//! lock `s` that the composite wraps — so that's where this port puts them.
//! `SmartLock::lock`/`unlock`, used standalone (no BKL), never touch either
//! field; only `CompositeLock` does. `dag_mask` is recorded for debugging
//! and cycle detection; the scheduler's `dep_wait`/`dep_signal` is the
//! actual blocking mechanism, so this lock family does not re-implement
//! dependency blocking on top of it.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
#[cfg(feature = "lattice")]
use core::sync::atomic::AtomicU32;

use crate::config;
use crate::hal::Hal;

/// One byte, test-and-set.
pub struct FastLock(AtomicU8);

impl FastLock {
    pub const fn new() -> Self {
        FastLock(AtomicU8::new(0))
    }

    /// Spins until the lock is acquired.
    pub fn lock<H: Hal>(&self, hal: &H) {
        while !hal.test_and_set_u8(&self.0) {
            core::hint::spin_loop();
        }
    }

    /// Single attempt; returns whether it succeeded.
    pub fn try_lock<H: Hal>(&self, hal: &H) -> bool {
        hal.test_and_set_u8(&self.0)
    }

    pub fn unlock<H: Hal>(&self, hal: &H) {
        hal.exchange_u8(&self.0, 0);
        hal.memory_barrier();
    }

    /// Whether the lock currently appears held. For diagnostics/tests only;
    /// racy by construction against a concurrent `lock`/`unlock`.
    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

impl Default for FastLock {
    fn default() -> Self {
        Self::new()
    }
}

/// FIFO-served lock via `head`/`tail` counters. Compiled
/// in only when the `qlock` feature is on.
#[cfg(feature = "qlock")]
pub struct TicketLock {
    head: AtomicU8,
    tail: AtomicU8,
}

#[cfg(feature = "qlock")]
impl TicketLock {
    pub const fn new() -> Self {
        TicketLock {
            head: AtomicU8::new(0),
            tail: AtomicU8::new(0),
        }
    }

    pub fn lock<H: Hal>(&self, hal: &H) {
        let my = fetch_add_u8(hal, &self.tail, 1);
        while self.head.load(Ordering::Acquire) != my {
            core::hint::spin_loop();
        }
        hal.memory_barrier();
    }

    pub fn unlock<H: Hal>(&self, hal: &H) {
        hal.memory_barrier();
        let cur = self.head.load(Ordering::Relaxed);
        self.head.store(cur.wrapping_add(1), Ordering::Release);
    }
}

#[cfg(feature = "qlock")]
impl Default for TicketLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Emulates a `u8` fetch-add via a compare-exchange loop: the HAL's atomic
/// surface only offers CAS/exchange at 8 bits, not fetch-add, since
/// that's the smallest instruction set a bare `test_and_set`-only MCU needs
/// to provide.
#[cfg(feature = "qlock")]
fn fetch_add_u8<H: Hal>(hal: &H, cell: &AtomicU8, delta: u8) -> u8 {
    let mut cur = cell.load(Ordering::Acquire);
    loop {
        match hal.compare_exchange_u8(cell, cur, cur.wrapping_add(delta)) {
            Ok(prev) => return prev,
            Err(actual) => cur = actual,
        }
    }
}

/// `FastLock` core, plus optional golden-ratio ticket fairness (feature
/// `lattice`). Also carries the `dag_mask`/`rt_mode` storage that
/// [`CompositeLock`] publishes into — see the module doc comment.
pub struct SmartLock {
    core: FastLock,
    #[cfg(feature = "lattice")]
    ticket: AtomicU32,
    #[cfg(feature = "lattice")]
    owner: AtomicU32,
    dag_mask: AtomicU8,
    rt_mode: AtomicBool,
}

impl SmartLock {
    pub const fn new() -> Self {
        SmartLock {
            core: FastLock::new(),
            #[cfg(feature = "lattice")]
            ticket: AtomicU32::new(0),
            #[cfg(feature = "lattice")]
            owner: AtomicU32::new(0),
            dag_mask: AtomicU8::new(0),
            rt_mode: AtomicBool::new(false),
        }
    }

    /// Standalone acquire. With `lattice` on: reserves a ticket, then spins
    /// on the `FastLock` core until `owner` matches it, releasing and
    /// retrying between attempts so unrelated unlocks can make
    /// progress while this ticket waits its turn.
    pub fn lock<H: Hal>(&self, hal: &H) {
        #[cfg(feature = "lattice")]
        {
            let my = hal.fetch_add_u32(&self.ticket, config::LATTICE_DELTA);
            loop {
                self.core.lock(hal);
                if self.owner.load(Ordering::Acquire) == my {
                    break;
                }
                self.core.unlock(hal);
                core::hint::spin_loop();
            }
        }
        #[cfg(not(feature = "lattice"))]
        {
            self.core.lock(hal);
        }
    }

    /// Bypasses lattice fairness entirely: a single attempt on the raw
    /// `FastLock` core, matching the way `CompositeLock::try_lock` uses
    /// `s.core` directly.
    pub fn try_lock<H: Hal>(&self, hal: &H) -> bool {
        self.core.try_lock(hal)
    }

    pub fn unlock<H: Hal>(&self, hal: &H) {
        #[cfg(feature = "lattice")]
        {
            let cur = self.owner.load(Ordering::Relaxed);
            self.owner
                .store(cur.wrapping_add(config::LATTICE_DELTA), Ordering::Release);
        }
        self.core.unlock(hal);
    }

    pub fn dag_mask(&self) -> u8 {
        self.dag_mask.load(Ordering::Relaxed)
    }

    pub fn is_rt(&self) -> bool {
        self.rt_mode.load(Ordering::Relaxed)
    }
}

impl Default for SmartLock {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide Big Kernel Lock: exactly one instance,
/// of the smart-lock variant.
pub struct Bkl(SmartLock);

impl Bkl {
    pub const fn new() -> Self {
        Bkl(SmartLock::new())
    }

    /// Resets lattice fairness counters. Idempotent; intended for boot-time
    /// setup and test fixtures, not for use while any task might be holding
    /// the lock.
    pub fn init(&self) {
        #[cfg(feature = "lattice")]
        {
            self.0.ticket.store(0, Ordering::Relaxed);
            self.0.owner.store(0, Ordering::Relaxed);
        }
    }

    pub fn acquire<H: Hal>(&self, hal: &H) {
        self.0.lock(hal);
    }

    pub fn try_acquire<H: Hal>(&self, hal: &H) -> bool {
        self.0.try_lock(hal)
    }

    pub fn release<H: Hal>(&self, hal: &H) {
        self.0.unlock(hal);
    }
}

impl Default for Bkl {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel's one Big Kernel Lock. Non-RT composite-lock critical sections
/// serialize through this.
pub static BKL: Bkl = Bkl::new();

/// Wraps a [`SmartLock`] with BKL ordering and a real-time bypass. The
/// 16-byte scratch area backs a "COW snapshot scratch" whose existence is
/// part of the lock's data model but whose consumer is left unspecified, so
/// this port exposes it as plain storage (`scratch`/`scratch_mut`) for a
/// board-specific copy-on-write scheme to use, and otherwise leaves it
/// untouched by the lock protocol itself.
pub struct CompositeLock {
    s: SmartLock,
    scratch: UnsafeCell<[u8; 16]>,
}

// Safety: `scratch` is only ever accessed by the task currently holding this
// lock (the composite lock's own critical section serializes access to it),
// matching the single-owner discipline the rest of this module already
// relies on for `FastLock`/`SmartLock`.
unsafe impl Sync for CompositeLock {}

impl CompositeLock {
    pub const fn new() -> Self {
        CompositeLock {
            s: SmartLock::new(),
            scratch: UnsafeCell::new([0; 16]),
        }
    }

    /// Acquires the BKL, then the underlying `FastLock` core, then publishes
    /// `mask` and clears the real-time flag.
    pub fn lock<H: Hal>(&self, hal: &H, mask: u8) {
        BKL.acquire(hal);
        self.s.core.lock(hal);
        self.s.dag_mask.store(mask, Ordering::Relaxed);
        self.s.rt_mode.store(false, Ordering::Relaxed);
        hal.memory_barrier();
    }

    /// Try-acquire the BKL, then the core; unwinds and returns `false` on
    /// any failure along the way.
    pub fn try_lock<H: Hal>(&self, hal: &H, mask: u8) -> bool {
        if !BKL.try_acquire(hal) {
            return false;
        }
        if !self.s.core.try_lock(hal) {
            BKL.release(hal);
            return false;
        }
        self.s.dag_mask.store(mask, Ordering::Relaxed);
        self.s.rt_mode.store(false, Ordering::Relaxed);
        hal.memory_barrier();
        true
    }

    /// Memory barrier, clear `mask`/`rt_mode`, release the core, release the
    /// BKL.
    ///
    /// Debug-asserts that the lock isn't currently held in RT mode: per the
    /// data model invariant, a non-RT acquire must be released non-RT.
    pub fn unlock<H: Hal>(&self, hal: &H) {
        debug_assert!(
            !self.s.rt_mode.load(Ordering::Relaxed),
            "CompositeLock::unlock called on an RT-mode acquisition; use unlock_rt"
        );
        hal.memory_barrier();
        self.s.dag_mask.store(0, Ordering::Relaxed);
        self.s.rt_mode.store(false, Ordering::Relaxed);
        self.s.core.unlock(hal);
        BKL.release(hal);
    }

    /// Real-time variant: skips the BKL entirely. Policy: RT
    /// sections must not nest with non-RT ones on the same lock.
    pub fn lock_rt<H: Hal>(&self, hal: &H) {
        self.s.core.lock(hal);
        self.s.rt_mode.store(true, Ordering::Relaxed);
    }

    pub fn try_lock_rt<H: Hal>(&self, hal: &H) -> bool {
        if self.s.core.try_lock(hal) {
            self.s.rt_mode.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Debug-asserts that the lock is currently held in RT mode: the
    /// counterpart check to `unlock`'s assertion.
    pub fn unlock_rt<H: Hal>(&self, hal: &H) {
        debug_assert!(
            self.s.rt_mode.load(Ordering::Relaxed),
            "CompositeLock::unlock_rt called on a non-RT acquisition; use unlock"
        );
        self.s.rt_mode.store(false, Ordering::Relaxed);
        self.s.core.unlock(hal);
    }

    pub fn dag_mask(&self) -> u8 {
        self.s.dag_mask()
    }

    pub fn is_rt(&self) -> bool {
        self.s.is_rt()
    }

    /// Read access to the COW scratch area. Caller must already hold this
    /// lock.
    pub fn scratch(&self) -> &[u8; 16] {
        // Safety: see the `Sync` impl above; the caller holding this lock is
        // the single-owner discipline that makes shared access sound here.
        unsafe { &*self.scratch.get() }
    }

    /// Mutable access to the COW scratch area. Caller must already hold this
    /// lock.
    #[allow(clippy::mut_from_ref)]
    pub fn scratch_mut(&self) -> &mut [u8; 16] {
        // Safety: see `scratch`.
        unsafe { &mut *self.scratch.get() }
    }
}

impl Default for CompositeLock {
    fn default() -> Self {
        Self::new()
    }
}
