// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Task Control Block
//!
//! A `Task` is deliberately thin: no generation numbers (this kernel has no
//! task-restart semantics; `Terminated` is absorbing, full stop), no region
//! tables, no IPC argument-register proxying. Door RPC and `dep_wait`/
//! `dep_signal` cover the cross-task communication asks for, so there
//! is no argument-marshalling layer living in the TCB itself.

use abi::{Priority, TaskState};

use crate::door::DoorTable;
use crate::hal;

/// Byte value the stack-guard canary is filled with. Chosen to look
/// unmistakably wrong if ever printed as an instruction.
const CANARY_BYTE: u8 = 0xA5;

/// One schedulable thread of execution.
pub struct Task {
    pub(crate) ctx: hal::Context,
    pub(crate) state: TaskState,
    pub(crate) priority: Priority,
    /// Ticks remaining before a `Sleeping` task becomes `Ready`. Unused
    /// outside that state.
    pub(crate) sleep_ticks: u32,
    /// Outstanding `dep_wait` count; only meaningful with the `dag` feature.
    #[cfg(feature = "dag")]
    pub(crate) deps: u8,
    /// This task's outbound Door descriptor table
    pub(crate) door: DoorTable,
    /// The task's stack, canary bytes included at both ends when
    /// `stack-guard` is enabled. Retained for the lifetime of the task so
    /// its bounds can be re-checked on every switch.
    pub(crate) stack: &'static mut [u8],
}

impl Task {
    /// Builds a new `Task` whose first `context_switch` into it resumes at
    /// `entry` with interrupts enabled.
    pub(crate) fn new(
        hal: &hal::Board,
        entry: fn(),
        stack: &'static mut [u8],
        priority: Priority,
    ) -> Self {
        #[cfg(feature = "stack-guard")]
        write_canaries(stack);

        let mut ctx = hal::Context::default();
        {
            use crate::hal::Hal;
            hal.context_init(&mut ctx, entry, stack);
        }

        Task {
            ctx,
            state: TaskState::Ready,
            priority,
            sleep_ticks: 0,
            #[cfg(feature = "dag")]
            deps: 0,
            door: DoorTable::new(),
            stack,
        }
    }

    pub fn is_runnable(&self) -> bool {
        let ready = self.state.is_runnable();
        #[cfg(feature = "dag")]
        {
            ready && self.deps == 0
        }
        #[cfg(not(feature = "dag"))]
        {
            ready
        }
    }

    /// Checks the stack canaries, if `stack-guard` is enabled. Always `true`
    /// otherwise.
    pub(crate) fn stack_intact(&self) -> bool {
        #[cfg(feature = "stack-guard")]
        {
            check_canaries(self.stack)
        }
        #[cfg(not(feature = "stack-guard"))]
        {
            true
        }
    }
}

#[cfg(feature = "stack-guard")]
fn write_canaries(stack: &mut [u8]) {
    let w = core::mem::size_of::<usize>();
    if stack.len() < 2 * w {
        return;
    }
    let len = stack.len();
    stack[..w].fill(CANARY_BYTE);
    stack[len - w..].fill(CANARY_BYTE);
}

#[cfg(feature = "stack-guard")]
fn check_canaries(stack: &[u8]) -> bool {
    let w = core::mem::size_of::<usize>();
    if stack.len() < 2 * w {
        return true;
    }
    let len = stack.len();
    stack[..w].iter().all(|&b| b == CANARY_BYTE)
        && stack[len - w..].iter().all(|&b| b == CANARY_BYTE)
}

/// Return value for operations that can have scheduling implications.
/// `#[must_use]` because forgetting to act on it would silently skip a
/// reschedule a caller asked for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextTask {
    /// Keep running whatever was already running.
    Same,
    /// A switch is needed but this routine hasn't concluded which task;
    /// the scheduler's selection algorithm decides.
    Other,
    /// A switch is needed, and the target is already known (the Door RPC's
    /// directed switch, or a `dep_signal` that just unblocked someone).
    Specific(usize),
}

impl NextTask {
    pub fn combine(self, other: Self) -> Self {
        use NextTask::*;
        match (self, other) {
            (x, y) if x == y => x,
            (Specific(_), Specific(_)) => Other,
            (Specific(x), _) | (_, Specific(x)) => Specific(x),
            (Other, _) | (_, Other) => Other,
            (Same, Same) => Same,
        }
    }
}

/// Scans `tasks` for the next index, after `previous`, that holds a task
/// satisfying `pred` (empty slots never match). Among matches, picks the
/// numerically smallest priority; ties go to whichever comes first in scan
/// order, which gives round-robin fairness among equal priorities.
///
/// # Panics
///
/// If `previous >= tasks.len()`.
pub fn priority_scan(
    previous: usize,
    tasks: &[Option<Task>],
    pred: impl Fn(&Task) -> bool,
) -> Option<usize> {
    assert!(previous < tasks.len());
    let search_order = (previous + 1..tasks.len()).chain(0..=previous);
    let mut choice: Option<(usize, Priority)> = None;
    for i in search_order {
        let Some(task) = &tasks[i] else { continue };
        if !pred(task) {
            continue;
        }
        if let Some((_, prio)) = choice {
            if !task.priority.is_more_important_than(prio) {
                continue;
            }
        }
        choice = Some((i, task.priority));
    }
    choice.map(|(idx, _)| idx)
}

/// Decrements `sleep_ticks` on every `Sleeping` task, waking any that reach
/// zero. Called once per HAL tick.
pub fn process_timers(tasks: &mut [Option<Task>]) -> NextTask {
    let mut hint = NextTask::Same;
    for (index, slot) in tasks.iter_mut().enumerate() {
        let Some(task) = slot else { continue };
        if task.state == TaskState::Sleeping {
            task.sleep_ticks = task.sleep_ticks.saturating_sub(1);
            if task.sleep_ticks == 0 {
                task.state = TaskState::Ready;
                hint = hint.combine(NextTask::Specific(index));
            }
        }
    }
    hint
}
