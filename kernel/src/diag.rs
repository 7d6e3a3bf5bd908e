// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diagnostics: ring buffers and event hooks.
//!
//! The kernel never does buffered text formatting or blocking I/O from
//! kernel context, so this is the substitute for a `log`/`tracing` backend: a
//! small fixed-size circular buffer of `Copy` entries per subsystem, recorded
//! in O(1) with no allocation and no blocking. A debugger (or, on `hal::sim`,
//! test code) reads the buffer back out after the fact; nothing in the
//! kernel ever reads its own ring buffers.
//!
//! Recording only happens from task context or with interrupts disabled, so
//! there is never concurrent access to a given ring buffer; that single-
//! writer invariant is what makes the interior mutability below sound.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicPtr, Ordering};

/// One recorded event: the source line that recorded it, the payload, and a
/// de-duplication count for consecutive identical entries.
#[derive(Copy, Clone, Debug)]
pub struct Entry<T: Copy> {
    pub line: u32,
    pub payload: T,
    pub count: u32,
}

/// Fixed-capacity circular buffer of the last `N` diagnostic events.
pub struct Ringbuf<T: Copy, const N: usize> {
    last: Option<usize>,
    /// Number of slots ever written, saturating at `N` once the buffer has
    /// wrapped at least once.
    filled: usize,
    buffer: [Entry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Ringbuf {
            last: None,
            filled: 0,
            buffer: [Entry {
                line: 0,
                payload: init,
                count: 0,
            }; N],
        }
    }

    /// Records `payload`, collapsing into the previous entry's count if it
    /// was recorded at the same line with an equal payload.
    pub fn record(&mut self, line: u32, payload: T) {
        if let Some(last) = self.last {
            let ent = &mut self.buffer[last];
            if ent.line == line && ent.payload == payload {
                ent.count = ent.count.saturating_add(1);
                return;
            }
        }
        let next = match self.last {
            Some(last) if last + 1 < N => last + 1,
            _ => 0,
        };
        self.buffer[next] = Entry {
            line,
            payload,
            count: 1,
        };
        self.last = Some(next);
        self.filled = (self.filled + 1).min(N);
    }

    /// Returns the entries in oldest-to-newest order, for test inspection.
    pub fn entries(&self) -> impl Iterator<Item = &Entry<T>> {
        let len = self.filled;
        let start = match self.last {
            Some(last) if len == N => (last + 1) % N,
            _ => 0,
        };
        (0..len).map(move |i| &self.buffer[(start + i) % N])
    }
}

/// A ring buffer wrapped for use as a `static`.
///
/// Single-writer discipline (task context, or interrupts disabled) makes the
/// `UnsafeCell` access sound without a lock; see the module doc comment.
pub struct Cell<T: Copy, const N: usize>(UnsafeCell<Ringbuf<T, N>>);

// Safety: the kernel only ever records into a given ring buffer from a
// single logical writer at a time (task context, or with interrupts
// disabled across a critical section); see the module doc comment.
unsafe impl<T: Copy, const N: usize> Sync for Cell<T, N> {}

impl<T: Copy + PartialEq, const N: usize> Cell<T, N> {
    pub const fn new(init: T) -> Self {
        Cell(UnsafeCell::new(Ringbuf::new(init)))
    }

    pub fn record(&self, line: u32, payload: T) {
        // Safety: see the `Sync` impl above.
        unsafe { (*self.0.get()).record(line, payload) }
    }

    /// For test and post-mortem inspection only.
    pub fn with<R>(&self, f: impl FnOnce(&Ringbuf<T, N>) -> R) -> R {
        // Safety: see the `Sync` impl above.
        f(unsafe { &*self.0.get() })
    }
}

/// Declares a named diagnostic ring buffer in the current module.
///
/// `diag::ringbuf!(NAME, Type, N, init)` makes a `N`-entry ring buffer of
/// `Type`, all slots initially `init`.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        static $name: $crate::diag::Cell<$t, $n> =
            $crate::diag::Cell::new($init);
    };
}

/// Records `payload` into the named ring buffer, tagged with the call site's
/// source line.
#[macro_export]
macro_rules! ringbuf_entry {
    ($name:expr, $payload:expr) => {
        $name.record(line!(), $payload)
    };
}

/// Board-supplied zero-cost hooks invoked at well-known kernel events.
///
/// Defaults to a no-op table, so the hooks compile away entirely when a
/// board doesn't configure one. A typical implementation toggles a GPIO on
/// entry/exit so timing can be observed with a logic analyzer; keep the
/// handlers fast, since they run with interrupts disabled.
pub struct EventHooks {
    pub context_switch: fn(usize),
    pub isr_enter: fn(),
    pub isr_exit: fn(),
    pub timer_isr_enter: fn(),
    pub timer_isr_exit: fn(),
}

const NOOP_HOOKS: EventHooks = EventHooks {
    context_switch: |_| (),
    isr_enter: || (),
    isr_exit: || (),
    timer_isr_enter: || (),
    timer_isr_exit: || (),
};

static EVENT_HOOKS: AtomicPtr<EventHooks> =
    AtomicPtr::new(core::ptr::null_mut());

/// Installs the board's event hook table. May be called more than once; the
/// most recent call wins.
pub fn configure_event_hooks(table: &'static EventHooks) {
    EVENT_HOOKS.store(table as *const _ as *mut _, Ordering::Relaxed);
}

fn hooks() -> &'static EventHooks {
    let p = EVENT_HOOKS.load(Ordering::Relaxed);
    if p.is_null() {
        &NOOP_HOOKS
    } else {
        // Safety: only ever written from a `&'static EventHooks` by
        // `configure_event_hooks`.
        unsafe { &*p }
    }
}

pub(crate) fn event_context_switch(idx: usize) {
    (hooks().context_switch)(idx)
}

pub(crate) fn event_isr_enter() {
    (hooks().isr_enter)()
}

pub(crate) fn event_isr_exit() {
    (hooks().isr_exit)()
}

pub(crate) fn event_timer_isr_enter() {
    (hooks().timer_isr_enter)()
}

pub(crate) fn event_timer_isr_exit() {
    (hooks().timer_isr_exit)()
}
