// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory simulated HAL backend.
//!
//! This is the one concrete HAL this repository ships. It exists so the
//! rest of the kernel can be exercised on a host without real hardware, and
//! to serve as a worked example for a real port. It has no interrupt
//! controller to mask, so `irq_*` are bookkeeping only, and no real second
//! core of execution, so `context_switch` doesn't transfer control the way
//! a bare-metal port's assembly would — callers drive task bodies
//! themselves (see `kernel/tests/scenarios.rs`) and treat `context_switch`
//! as the point at which that handoff is recorded.

use core::cell::Cell;
use core::sync::atomic::{fence, Ordering};

use abi::{Capabilities, ResetReason};

use super::{Hal, IrqState};
use crate::config;

/// Saved state for a simulated task. Carries a stack-pointer-shaped value
/// and the entry point, for bookkeeping and test assertions; no real
/// machine state is ever recovered from it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    sp: usize,
    entry: Option<fn()>,
}

pub struct SimHal {
    ticks: Cell<u32>,
    irq_enabled: Cell<bool>,
    eeprom: core::cell::RefCell<[u8; config::EEPROM_ROWS * config::EEPROM_ROW_SIZE]>,
}

impl SimHal {
    pub fn new() -> Self {
        SimHal {
            ticks: Cell::new(0),
            irq_enabled: Cell::new(false),
            eeprom: core::cell::RefCell::new(
                [0xFF; config::EEPROM_ROWS * config::EEPROM_ROW_SIZE],
            ),
        }
    }

    /// Test/board-driver hook: advances the simulated tick counter by one,
    /// standing in for the periodic timer interrupt firing on real
    /// hardware. Callers pair this with invoking the scheduler's tick
    /// handler.
    pub fn bump_tick(&self) {
        self.ticks.set(self.ticks.get().wrapping_add(1));
    }
}

impl Default for SimHal {
    fn default() -> Self {
        Self::new()
    }
}

impl Hal for SimHal {
    type Context = Context;

    fn init(&self) {}

    fn reset(&self) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn idle(&self) {
        core::hint::spin_loop();
    }

    fn reset_reason(&self) -> ResetReason {
        ResetReason::PowerOn
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            has_mpu: false,
            has_fpu: true,
            cores: 1,
            cpu_hz: 0,
            word_size: core::mem::size_of::<usize>() as u8,
        }
    }

    fn irq_enable(&self) {
        self.irq_enabled.set(true);
    }

    fn irq_disable(&self) {
        self.irq_enabled.set(false);
    }

    fn irq_save(&self) -> IrqState {
        IrqState(self.irq_enabled.replace(false))
    }

    fn irq_restore(&self, state: IrqState) {
        self.irq_enabled.set(state.0);
    }

    fn timer_init(&self, _freq_hz: u32) {}

    fn timer_ticks(&self) -> u32 {
        self.ticks.get()
    }

    fn delay_us(&self, _us: u32) {}

    fn delay_ms(&self, _ms: u32) {}

    fn context_init(&self, ctx: &mut Context, entry: fn(), stack: &mut [u8]) {
        ctx.entry = Some(entry);
        ctx.sp = stack.as_ptr() as usize + stack.len();
    }

    fn context_switch(&self, _from: &mut Context, _to: &mut Context) {
        // A real backend saves the live machine state into `*_from` here
        // and restores `*_to`. `sim` has no live registers to save — task
        // bodies are driven by the test harness, not by resuming `_to`'s
        // stack — so this is purely the point at which the handoff is
        // recorded (see `diag::event_context_switch` in `sched`).
    }

    fn memory_barrier(&self) {
        fence(Ordering::SeqCst);
    }

    fn pgm_read_byte(&self, addr: *const u8) -> u8 {
        // Safety: callers only ever pass addresses from a `&'static [u8]`
        // image, which is ordinary readable memory on the host.
        unsafe { *addr }
    }

    fn memcpy_from_rom(&self, dst: &mut [u8], src: *const u8) {
        // Safety: see `pgm_read_byte`.
        unsafe { core::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) }
    }

    fn eeprom_available(&self) -> bool {
        true
    }

    fn eeprom_read_byte(&self, addr: u32) -> u8 {
        self.eeprom.borrow()[addr as usize]
    }

    fn eeprom_update_byte(&self, addr: u32, value: u8) {
        self.eeprom.borrow_mut()[addr as usize] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eeprom_starts_erased() {
        let hal = SimHal::new();
        assert_eq!(hal.eeprom_read_byte(0), 0xFF);
        assert_eq!(hal.eeprom_read_byte((config::EEPROM_ROWS * config::EEPROM_ROW_SIZE - 1) as u32), 0xFF);
    }

    #[test]
    fn eeprom_read_after_write() {
        let hal = SimHal::new();
        hal.eeprom_update_byte(10, 0x42);
        assert_eq!(hal.eeprom_read_byte(10), 0x42);
    }

    #[test]
    fn irq_save_disables_and_restore_reverts() {
        let hal = SimHal::new();
        hal.irq_enable();
        let state = hal.irq_save();
        assert!(!hal.irq_enabled.get());
        hal.irq_restore(state);
        assert!(hal.irq_enabled.get());
    }

    #[test]
    fn context_init_records_entry_and_stack_top() {
        let hal = SimHal::new();
        let mut ctx = Context::default();
        let mut stack = [0u8; 64];
        fn entry_fn() {}
        hal.context_init(&mut ctx, entry_fn, &mut stack);
        assert!(ctx.entry.is_some());
        assert_eq!(ctx.sp, stack.as_ptr() as usize + 64);
    }
}
