// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Avrix kernel core.
//!
//! This is the portable part of a tiny operating-system core for
//! resource-constrained microcontrollers: a hardware abstraction layer, a
//! preemptive priority scheduler, a composable spinlock family, a
//! fixed-arena heap allocator, a zero-copy Door RPC, and a virtual
//! filesystem dispatch layer with ROM and EEPROM backings.
//!
//! # Design principles
//!
//! 1. One portable core, many boards. Everything here is written against
//!    the [`hal::Hal`] trait; a board supplies a concrete implementation and
//!    links it in. This crate ships exactly one, [`hal::sim`], which exists
//!    to make the rest of the kernel host-testable.
//! 2. Static configuration. Task counts, stack sizes, and feature sets are
//!    fixed at compile time (`config`, Cargo features); there is no dynamic
//!    loading or demand paging.
//! 3. A strong preference for safe code where reasonable. `unsafe` is
//!    confined to the HAL boundary and to a handful of documented,
//!    single-writer data structures (`diag`, `fail`).
//! 4. Simple and clear algorithms over fast and clever ones, since clever
//!    usually means `unsafe`, and this kernel runs on hardware with no MMU
//!    to catch mistakes.

#![cfg_attr(target_os = "none", no_std)]

pub mod atomic;
pub mod config;
pub mod diag;
pub mod door;
pub mod eepfs;
pub mod err;
pub mod fail;
pub mod hal;
pub mod mem;
pub mod romfs;
pub mod sched;
pub mod sync;
pub mod task;
pub mod time;
pub mod util;
pub mod vfs;

pub use abi::{Error, Result};
