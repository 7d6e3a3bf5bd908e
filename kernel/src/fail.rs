// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recording kernel crashes so they can be found post-mortem by tooling:
//! the halt path for the `Fatal` error class.
//!
//! This module defines a binary interface a debugger can rely on:
//!
//! - `avrix_kernel::fail::KERNEL_HAS_FAILED` is cleared before kernel entry
//!   and set the moment `die` runs (explicitly or via a `panic!`).
//! - `avrix_kernel::fail::KERNEL_EPITAPH` holds as much of the failure
//!   reason as fits, UTF-8, NUL-padded. A debugger reads this out of a
//!   crashed image without needing symbols for the panic message itself.

use core::fmt::{Display, Write};
use core::sync::atomic::{fence, Ordering};

/// Set to `true` the moment the kernel gives up. Any other value means the
/// kernel hasn't failed yet, or its memory is corrupted.
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

/// Bounded description of why the kernel died, truncated if it doesn't fit.
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: called only from `die_impl`, which is only reachable via
    // `die` or the panic handler, neither of which run concurrently with
    // interrupts enabled on this single core.
    let already_failed = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if already_failed {
        // Recursive failure while recording a failure. Don't try to report
        // it again; just stop.
        loop {
            fence(Ordering::SeqCst);
        }
    }
    // Safety: the flag we just set guarantees only one caller ever reaches
    // this line.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

/// Halts the kernel, recording `msg` as the epitaph.
///
/// Disables interrupts (implicitly: nothing after this point ever resumes
/// task execution) and parks forever. This is the kernel's only concession
/// to logging a failure; it is meant to be read post-mortem, not observed
/// while running.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Eulogist { dest: buf };
    write!(writer, "{msg}").ok();

    loop {
        fence(Ordering::SeqCst);
    }
}

struct Eulogist<'a> {
    dest: &'a mut [u8],
}

impl Write for Eulogist<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftover) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftover;
        Ok(())
    }
}

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
