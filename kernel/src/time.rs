// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel time.

/// Converts a millisecond duration to a tick count at the configured tick
/// frequency, rounding up so any positive `ms` advances by at least one
/// tick. `sched` uses this both for the quantum length and for `sleep(ms)`.
pub fn ms_to_ticks(ms: u32) -> u32 {
    let ticks = (u64::from(ms) * u64::from(crate::config::TICK_HZ)) / 1000;
    ticks.max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_ticks_at_1khz_is_identity() {
        assert_eq!(ms_to_ticks(50), 50);
    }

    #[test]
    fn ms_to_ticks_rounds_up_to_one() {
        assert_eq!(ms_to_ticks(0), 1);
    }
}
