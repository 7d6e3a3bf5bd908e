// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error propagation boundary
//!
//! The error taxonomy itself lives in `abi::Error` so every fallible
//! operation in the kernel shares one `Result<T, Error>` shape and composes
//! with `?` across module boundaries. This module is the thin seam between
//! that shared type and the two ways an error actually leaves a module:
//! returned to a caller that can act on it (`Resource`/`Argument`/`Storage`/
//! `Support`), or diverted to the halt path because it's one of the `Fatal`
//! variants, reported by halt/reset rather than handed back.

use abi::Error;

/// Wraps a recoverable error for return to a caller.
///
/// Debug-asserts that `e` is not one of the `Fatal` variants: those never
/// reach a caller through a `Result`, they go through [`fault`] instead. No
/// global state is mutated on this path.
pub fn recoverable<T>(e: Error) -> Result<T, Error> {
    debug_assert!(!e.is_fatal(), "recoverable() called with fatal error {e:?}");
    Err(e)
}

/// Diverts a `Fatal`-class error to the kernel's halt path (`fail::die`):
/// interrupts disabled, a platform panic indicator, idle forever. Never
/// returns.
///
/// Debug-asserts that `e` actually is fatal, since calling this on a
/// recoverable error would turn something a caller could otherwise handle
/// into an unrecoverable halt.
pub fn fault(e: Error) -> ! {
    debug_assert!(e.is_fatal(), "fault() called with non-fatal error {e:?}");
    crate::fail::die(e)
}
