// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware Abstraction Layer
//!
//! Everything above this module is written against the [`Hal`] trait, never
//! against a concrete MCU. A board provides one implementation; this crate
//! ships exactly one, [`sim`], an in-memory host backend that exists to make
//! the rest of the kernel testable without real hardware.
//!
//! Failure semantics: `reset` is the only HAL call that can be
//! thought of as "failing" (it doesn't return), everything else is
//! infallible at the HAL layer — a HAL that can't honor a request (no
//! EEPROM, no MPU) reports that through its `Capabilities`/`eeprom_available`
//! rather than an `Err`.

pub mod sim;

use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use abi::{Capabilities, ResetReason};

/// Opaque snapshot of whether interrupts were enabled before an
/// `irq_save`, for use with the matching `irq_restore`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IrqState(pub(crate) bool);

/// Hardware abstraction layer capability set
///
/// `context_switch` is interruptible only between fully consistent states
/// (either the full source state is saved, or none of it is) — in practice,
/// this means disabling interrupts for its duration.
pub trait Hal {
    /// Per-task saved machine state. Opaque to everything outside the HAL;
    /// `task`/`sched` only ever move it between `context_init` and
    /// `context_switch`.
    type Context: Default;

    // --- System -----------------------------------------------------
    fn init(&self);
    /// Resets the MCU. Never returns.
    fn reset(&self) -> !;
    /// Waits for an interrupt with the core otherwise idle.
    fn idle(&self);
    fn reset_reason(&self) -> ResetReason;
    fn capabilities(&self) -> Capabilities;

    // --- Interrupts ---------------------------------------------------
    fn irq_enable(&self);
    fn irq_disable(&self);
    fn irq_save(&self) -> IrqState;
    fn irq_restore(&self, state: IrqState);

    // --- Timer ----------------------------------------------------------
    /// Programs a periodic tick at `freq_hz` that drives the scheduler's
    /// tick handler.
    fn timer_init(&self, freq_hz: u32);
    /// Monotonic tick counter; wraps.
    fn timer_ticks(&self) -> u32;
    fn delay_us(&self, us: u32);
    fn delay_ms(&self, ms: u32);

    // --- Context switch ---------------------------------------------
    /// Prepares `stack` so that the first `context_switch` into `ctx`
    /// resumes execution at `entry` with interrupts enabled.
    fn context_init(&self, ctx: &mut Self::Context, entry: fn(), stack: &mut [u8]);
    /// Saves the caller's machine state into `from`, restores `to`. Must run
    /// with interrupts disabled.
    fn context_switch(&self, from: &mut Self::Context, to: &mut Self::Context);

    // --- Memory ----------------------------------------------------------
    fn memory_barrier(&self);
    /// Reads one byte of read-only program memory.
    fn pgm_read_byte(&self, addr: *const u8) -> u8;
    /// Copies `dst.len()` bytes from program memory starting at `src`.
    fn memcpy_from_rom(&self, dst: &mut [u8], src: *const u8);
    fn eeprom_available(&self) -> bool;
    fn eeprom_read_byte(&self, addr: u32) -> u8;
    fn eeprom_update_byte(&self, addr: u32, value: u8);

    // --- Atomics (u8/u16/u32) -------------------------------------------
    //
    // Default bodies use the platform's native atomic instructions; a port
    // without hardware CAS overrides these to wrap the body in
    // `irq_save`/`irq_restore` instead.
    fn test_and_set_u8(&self, cell: &AtomicU8) -> bool {
        cell.swap(1, Ordering::AcqRel) == 0
    }
    fn exchange_u8(&self, cell: &AtomicU8, value: u8) -> u8 {
        cell.swap(value, Ordering::AcqRel)
    }
    fn compare_exchange_u8(
        &self,
        cell: &AtomicU8,
        current: u8,
        new: u8,
    ) -> Result<u8, u8> {
        cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
    fn fetch_add_u16(&self, cell: &AtomicU16, delta: u16) -> u16 {
        cell.fetch_add(delta, Ordering::AcqRel)
    }
    fn compare_exchange_u16(
        &self,
        cell: &AtomicU16,
        current: u16,
        new: u16,
    ) -> Result<u16, u16> {
        cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
    fn fetch_add_u32(&self, cell: &AtomicU32, delta: u32) -> u32 {
        cell.fetch_add(delta, Ordering::AcqRel)
    }
    fn compare_exchange_u32(
        &self,
        cell: &AtomicU32,
        current: u32,
        new: u32,
    ) -> Result<u32, u32> {
        cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// The concrete HAL this image is built against.
///
/// `task`/`sched`/`door`/`vfs` are written against [`Hal`], but a given
/// firmware image is linked against exactly one implementation, chosen the
/// same way the board picks its target at build time — so the rest of the
/// kernel names it through this alias instead of threading a `Hal` type
/// parameter through every struct. A real board port replaces this alias
/// with its own implementation; this repository ships only [`sim`].
pub type Board = sim::SimHal;

/// Per-task saved machine state for [`Board`].
pub type Context = <Board as Hal>::Context;
