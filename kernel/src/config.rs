// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time tunables
//!
//! There is no per-application descriptor compiler in this kernel (that is
//! explicitly a board-layer concern), so these are plain `const`s rather than
//! a generated file. A board that needs different numbers edits this file and
//! rebuilds.

use static_assertions::const_assert;

/// Maximum number of schedulable tasks. Mirrors `abi::MAX_TASKS` but this is
/// the *configured* ceiling for a given image, which may be lower.
pub const MAX_TASKS: usize = 8;
const_assert!(MAX_TASKS <= abi::MAX_TASKS);

/// Default stack size, in bytes, for a task that doesn't ask for more.
pub const STACK_SIZE: usize = 128;
const_assert!(STACK_SIZE >= 64);

/// Length of a scheduling quantum, in milliseconds, before the scheduler
/// re-evaluates whether to preempt the running task.
pub const QUANTUM_MS: u32 = 10;

/// Frequency of the HAL periodic tick, in hertz.
pub const TICK_HZ: u32 = 1000;

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "16")] {
        /// Size, in bytes, of the fixed heap arena `mem` manages.
        pub const HEAP_SIZE: usize = 512;
        /// Word size, in bytes, that `mem::alloc` rounds payload sizes up
        /// to. 8-bit targets share the 16-bit target's 2-byte word.
        pub const WORD_SIZE: usize = 2;
    } else {
        /// Size, in bytes, of the fixed heap arena `mem` manages.
        pub const HEAP_SIZE: usize = 2048;
        /// Word size, in bytes, that `mem::alloc` rounds payload sizes up
        /// to (including the 64-bit host this crate's tests run on).
        pub const WORD_SIZE: usize = 4;
    }
}

/// Per-task Door descriptor slots. Hard ceiling of 15, since the descriptor
/// nibble layout reserves 4 bits for `words`.
pub const DOOR_SLOTS: usize = 8;
const_assert!(DOOR_SLOTS <= 15);

/// Size, in bytes, of the single process-wide Door payload slab. Must be a
/// multiple of 8 words-to-bytes packing used by the descriptor's `words`
/// field.
pub const DOOR_SLAB_SIZE: usize = 128;
const_assert!(DOOR_SLAB_SIZE % 8 == 0);

/// Number of rows in the EEPROM log (TinyLog-4)
pub const EEPROM_ROWS: usize = 16;
/// Bytes per EEPROM row, including the two-byte trailer.
pub const EEPROM_ROW_SIZE: usize = 64;
/// Bytes per EEPROM data block (`tag`, `d0`, `d1`, `crc8`).
pub const EEPROM_BLOCK_SIZE: usize = 4;
/// Data blocks per row: the row holds `ROW_SIZE / BLOCK_SIZE` slots total,
/// minus one slot's worth of space given up to the two-byte trailer.
pub const EEPROM_BLOCKS_PER_ROW: usize =
    (EEPROM_ROW_SIZE - 2) / EEPROM_BLOCK_SIZE;
const_assert!(EEPROM_BLOCKS_PER_ROW == 15);

/// Row trailer tag byte marking a row as the most recently written.
pub const EEPROM_TAG_ROW: u8 = 0x7F;
/// Data block tag for a stored value.
pub const EEPROM_TAG_PUT: u8 = 0x01;
/// Data block tag for a tombstone.
pub const EEPROM_TAG_DEL: u8 = 0x02;

/// Exclusive upper bound on EEPROM keys (11 bits).
pub const EEPROM_MAX_KEY: u16 = 1 << 11;
/// Exclusive upper bound on EEPROM values (5 bits).
pub const EEPROM_MAX_VALUE: u8 = 1 << 5;

/// Maximum simultaneous VFS mounts.
pub const VFS_MAX_MOUNTS: usize = 4;
/// Maximum simultaneously open VFS file descriptors.
pub const VFS_MAX_FDS: usize = 8;

/// Per-tick advance of the smart lock's lattice ticket counter:
/// `round(phi * 2^k)`.
///
/// `k=10` (16-bit counters) and `k=20` (32-bit counters) are both valid
/// per-port choices, selected by conditional compilation. This port always
/// uses 32-bit counters: the HAL's atomic surface only offers `u8`/`u16`/
/// `u32` primitives uniformly across word sizes, and a single representation
/// avoids duplicating the lattice arithmetic per target class for a quantity
/// (starvation-free spacing) that doesn't depend on it. See DESIGN.md.
pub const LATTICE_DELTA: u32 = 1_696_632;
