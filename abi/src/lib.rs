// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared ABI types for the Avrix kernel core.
//!
//! These are plain old data: newtypes, small enums, and the error taxonomy.
//! Everything here is `Copy` and carries no logic beyond a handful of
//! inherent helpers, so that it can be depended on by the kernel crate, by a
//! board layer, and by host-side test code alike without pulling in any of
//! the kernel's internal state.

#![cfg_attr(target_os = "none", no_std)]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Upper bound on the number of schedulable tasks any single image can
/// configure. `TaskId` reserves enough bits to index this many slots; raising
/// it is an ABI change.
pub const MAX_TASKS: usize = 64;

/// Identifies a single task by its slot in the scheduler's task table.
///
/// This exists as a distinct type (rather than a bare `usize`) specifically
/// so that "the task a DAG dependency names" and "the task a lock is held on
/// behalf of" can't be accidentally swapped for a raw index used for
/// something else; see the kernel's `sched` module for how it is produced and
/// consumed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct TaskId(pub u8);

impl TaskId {
    /// Constructs a `TaskId` from a table index, panicking if it doesn't fit.
    ///
    /// # Panics
    ///
    /// If `index >= MAX_TASKS`.
    pub const fn new(index: usize) -> Self {
        assert!(index < MAX_TASKS);
        TaskId(index as u8)
    }

    /// Returns the table index this id names.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Priority of a task, in `[0, 63]`.
///
/// Numerically lower priorities are more important: 0 is scheduled ahead of
/// 1, and so on. This type deliberately omits `PartialOrd`/`Ord` so that
/// `a > b` can never be misread as "a is more important"; use
/// [`Priority::is_more_important_than`] instead.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// The most important priority a task may hold.
    pub const HIGHEST: Priority = Priority(0);
    /// The least important priority this implementation allows.
    pub const LOWEST: Priority = Priority(63);

    /// Checks whether `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Scheduling state of a task.
///
/// `Ready -> Running -> {Ready, Sleeping, Blocked, Terminated}` with
/// `Terminated` absorbing. Transitions are driven entirely by the scheduler
/// and by the owning task's own syscalls.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    Ready,
    Running,
    Sleeping,
    Blocked,
    Terminated,
}

impl TaskState {
    /// Whether a task in this state is a candidate for `find_next`.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Ready)
    }
}

/// Reason the MCU last came out of reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ResetReason {
    #[default]
    Unknown,
    PowerOn,
    External,
    Watchdog,
    Software,
    Brownout,
}

/// Static capability set a HAL reports about the MCU it runs on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct Capabilities {
    pub has_mpu: bool,
    pub has_fpu: bool,
    pub cores: u8,
    pub cpu_hz: u32,
    pub word_size: u8,
}

/// Tag identifying which backing filesystem a VFS mount resolves to.
///
/// New backings are added to this closed set at compile time: the VFS
/// dispatches on a tagged union rather than on indirect calls through an
/// unchecked vtable built at image time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FsTag {
    Romfs,
    Eepfs,
}

/// Unified error taxonomy for the kernel core
///
/// Not every subsystem can produce every variant (the allocator, for
/// instance, never returns `BadPath`), but sharing one type lets every
/// fallible operation in the kernel return `Result<T, Error>` and compose
/// with `?` across module boundaries instead of each module inventing its
/// own error enum and a thicket of `From` impls to match.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    // Resource exhaustion.
    /// The task table is full; `task_create` cannot add another task.
    TooManyTasks,
    /// A requested stack is smaller than the minimum the kernel allows.
    InvalidStack,
    /// No space remains to satisfy an allocation or descriptor request.
    NoSpace,

    // Bad arguments.
    /// A task entry point, descriptor, or other caller-supplied value is
    /// structurally invalid.
    InvalidArg,
    /// The named resource (file, key, mount, fd) does not exist.
    NotFound,
    /// A path failed to resolve against any mount.
    BadPath,

    // Storage.
    /// An I/O operation against a backing store failed.
    IoError,
    /// A write was attempted against a read-only backing store.
    ReadOnly,
    /// A stored record failed its CRC check.
    CrcMismatch,

    // Support.
    /// The requested feature was compiled out of this image.
    Unsupported,

    // Fatal (non-recoverable; reported via `fail::die`, never returned to a
    // caller that can act on it).
    /// A task's stack canary was found corrupted.
    StackOverflow,
    /// An internal invariant was violated.
    AssertFailure,
}

impl Error {
    /// Whether this error represents a fatal condition that must halt rather
    /// than be returned to a caller.
    pub fn is_fatal(self) -> bool {
        matches!(self, Error::StackOverflow | Error::AssertFailure)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Error::TooManyTasks => "too many tasks",
            Error::InvalidStack => "invalid stack",
            Error::NoSpace => "no space",
            Error::InvalidArg => "invalid argument",
            Error::NotFound => "not found",
            Error::BadPath => "bad path",
            Error::IoError => "I/O error",
            Error::ReadOnly => "read-only",
            Error::CrcMismatch => "CRC mismatch",
            Error::Unsupported => "unsupported",
            Error::StackOverflow => "stack overflow",
            Error::AssertFailure => "assertion failure",
        };
        f.write_str(s)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

bitflags::bitflags! {
    /// Per-descriptor flag nibble for a Door registration.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
    #[repr(transparent)]
    pub struct DoorFlags: u8 {
        /// Append and verify a Dallas/Maxim CRC-8 trailer on the payload.
        const CRC = 1 << 0;
        const RESERVED = !1;
    }
}

/// Dallas/Maxim CRC-8 (polynomial 0x31, initial value 0x00, no final XOR).
///
/// This is the classic one-wire CRC8: bits are consumed LSB-first, which is
/// why the table-free form below shifts right and uses the bit-reflected
/// polynomial 0x8C rather than 0x31 directly.
///
/// Shared by the Door RPC's optional trailer and the EEPROM log's per-record
/// checksum so both follow one normative definition.
pub fn crc8_maxim(bytes: &[u8]) -> u8 {
    const POLY_REFLECTED: u8 = 0x8C;
    let mut crc: u8 = 0x00;
    for &b in bytes {
        crc ^= b;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_inverted() {
        assert!(Priority(0).is_more_important_than(Priority(1)));
        assert!(!Priority(1).is_more_important_than(Priority(0)));
        assert!(!Priority(3).is_more_important_than(Priority(3)));
    }

    #[test]
    fn task_id_round_trips_index() {
        let id = TaskId::new(5);
        assert_eq!(id.index(), 5);
    }

    #[test]
    fn crc8_is_zero_for_empty_input() {
        assert_eq!(crc8_maxim(&[]), 0);
    }

    #[test]
    fn crc8_matches_known_vector() {
        // Single byte 0x00 run through the Maxim polynomial with zero seed
        // should come back as zero: an all-zero message has no odd-parity
        // terms to flip any bit.
        assert_eq!(crc8_maxim(&[0x00]), 0x00);
        // Non-trivial vector, cross-checked against a reference Dallas/Maxim
        // CRC-8 implementation.
        assert_eq!(crc8_maxim(&[0x01, 0x02, 0x03, 0x04]), 0xF4);
    }
}
