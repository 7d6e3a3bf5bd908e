// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler
//!
//! `Scheduler` owns the whole task table; there is no free-floating global
//! task table behind it. A board constructs one `Scheduler` over its
//! `hal::Board` and calls `init`/`run` from its entry point.
//!
//! Directed switches (`switch_to`, used by Door RPC) and priority-driven
//! reschedules (`yield_now`, quantum expiry, sleep wakeups) both funnel
//! through `reschedule`, which is the one place that decides whether an
//! actual `context_switch` happens.

use abi::{Error, Priority, Result, TaskId, TaskState};

use crate::hal::{self, Hal};
use crate::task::{self, NextTask, Task};
use crate::time;
use crate::util;
use crate::{config, diag};

pub struct Scheduler<'h> {
    hal: &'h hal::Board,
    tasks: [Option<Task>; config::MAX_TASKS],
    count: usize,
    current: usize,
    quantum: u32,
}

impl<'h> Scheduler<'h> {
    pub fn new(hal: &'h hal::Board) -> Self {
        Scheduler {
            hal,
            tasks: core::array::from_fn(|_| None),
            count: 0,
            current: 0,
            quantum: time::ms_to_ticks(config::QUANTUM_MS),
        }
    }

    /// Programs the HAL timer and resets scheduling state. Call once,
    /// before `run` and before any task-table mutation.
    pub fn init(&mut self) {
        self.hal.timer_init(config::TICK_HZ);
        self.quantum = time::ms_to_ticks(config::QUANTUM_MS);
        self.current = 0;
    }

    /// Registers a new task. `stack` must outlive the scheduler; in
    /// practice it is a `'static` array the board declares.
    pub fn task_create(
        &mut self,
        entry: fn(),
        stack: &'static mut [u8],
        priority: Priority,
    ) -> Result<TaskId> {
        if self.count >= config::MAX_TASKS {
            return Err(Error::TooManyTasks);
        }
        if stack.len() < 64 {
            return Err(Error::InvalidStack);
        }
        let idx = self.count;
        self.tasks[idx] = Some(Task::new(self.hal, entry, stack, priority));
        self.count += 1;
        Ok(TaskId::new(idx))
    }

    pub fn current_tid(&self) -> TaskId {
        TaskId::new(self.current)
    }

    pub fn task_state(&self, tid: TaskId) -> Option<TaskState> {
        self.tasks.get(tid.index())?.as_ref().map(|t| t.state)
    }

    /// `tid`'s Door descriptor table, for the Door RPC (`crate::door`).
    pub fn door_table(&self, tid: TaskId) -> Option<&crate::door::DoorTable> {
        self.tasks.get(tid.index())?.as_ref().map(|t| &t.door)
    }

    pub fn door_table_mut(&mut self, tid: TaskId) -> Option<&mut crate::door::DoorTable> {
        self.tasks.get_mut(tid.index())?.as_mut().map(|t| &mut t.door)
    }

    /// Enables interrupts and begins scheduling. Never returns: this is the
    /// board's main loop, not something host tests drive directly (see the
    /// module-level doc comment on `hal::sim`).
    pub fn run(&mut self) -> ! {
        self.current = task::priority_scan(0, &self.tasks, |t| t.is_runnable())
            .unwrap_or(0);
        if let Some(t) = self.tasks[self.current].as_mut() {
            t.state = TaskState::Running;
        }
        self.hal.irq_enable();
        loop {
            let running = self.tasks[self.current]
                .as_ref()
                .is_some_and(|t| t.state == TaskState::Running);
            if !running {
                self.hal.idle();
            }
        }
    }

    /// Called once per HAL tick (from the timer ISR, or from a test driver
    /// standing in for it). Advances sleep timers and the quantum; switches
    /// tasks if either demands it.
    pub fn tick(&mut self) {
        diag::event_timer_isr_enter();
        let timer_hint = task::process_timers(&mut self.tasks);
        self.quantum = self.quantum.saturating_sub(1);
        let mut hint = timer_hint;
        if self.quantum == 0 {
            hint = hint.combine(NextTask::Other);
            // A new quantum window starts at the re-selection point,
            // whether or not a different task actually wins it.
            self.quantum = time::ms_to_ticks(config::QUANTUM_MS);
        }
        if hint != NextTask::Same {
            self.reschedule(hint);
        }
        diag::event_timer_isr_exit();
    }

    /// Voluntary reschedule: ends the current quantum immediately.
    pub fn yield_now(&mut self) {
        self.quantum = 0;
        let irq = self.hal.irq_save();
        self.reschedule(NextTask::Other);
        self.hal.irq_restore(irq);
    }

    /// Blocks the calling task for at least `ms` milliseconds.
    /// `sleep(0)` is equivalent to `yield_now`
    pub fn sleep(&mut self, ms: u32) {
        if ms == 0 {
            self.yield_now();
            return;
        }
        let ticks = time::ms_to_ticks(ms);
        let cur = self.current;
        if let Some(t) = self.tasks[cur].as_mut() {
            t.state = TaskState::Sleeping;
            t.sleep_ticks = ticks;
        }
        self.reschedule(NextTask::Other);
    }

    /// Directed switch to `tid`, used by the Door RPC's synchronous call.
    /// Silently ignored if `tid` is out of range or not `Ready`.
    pub fn switch_to(&mut self, tid: TaskId) {
        let idx = tid.index();
        if idx >= config::MAX_TASKS {
            return;
        }
        if !self.tasks[idx].as_ref().is_some_and(|t| t.is_runnable()) {
            return;
        }
        self.reschedule(NextTask::Specific(idx));
    }

    /// Marks the calling task `Terminated` and reschedules. A real task
    /// entry trampoline wraps this with `loop { hal.idle() }`, since on real
    /// hardware control never returns here once the target switch lands;
    /// `sim` has no live stack to resume, so this returns normally (see
    /// `hal::sim`'s module doc comment) to keep it usable from host tests.
    pub fn task_exit(&mut self) {
        let cur = self.current;
        if let Some(t) = self.tasks[cur].as_mut() {
            t.state = TaskState::Terminated;
        }
        self.reschedule(NextTask::Other);
    }

    /// Blocks the calling task until `k` `dep_signal`s have been delivered
    /// to it. `dep_wait(0)` does not block.
    #[cfg(feature = "dag")]
    pub fn dep_wait(&mut self, k: u8) {
        let cur = self.current;
        if let Some(t) = self.tasks[cur].as_mut() {
            t.deps = k;
            if k > 0 {
                t.state = TaskState::Blocked;
            }
        }
        if k > 0 {
            self.reschedule(NextTask::Other);
        }
    }

    /// Decrements `id`'s pending dependency count; wakes it if it reaches
    /// zero while `Blocked`.
    #[cfg(feature = "dag")]
    pub fn dep_signal(&mut self, id: TaskId) {
        let idx = id.index();
        if idx >= config::MAX_TASKS {
            return;
        }
        let mut hint = NextTask::Same;
        if let Some(t) = self.tasks[idx].as_mut() {
            if t.deps > 0 {
                t.deps -= 1;
                if t.deps == 0 && t.state == TaskState::Blocked {
                    t.state = TaskState::Ready;
                    hint = NextTask::Specific(idx);
                }
            }
        }
        if hint != NextTask::Same {
            self.reschedule(hint);
        }
    }

    /// Resolves a scheduling hint to a target task and switches into it if
    /// that target differs from `current`. A `Specific` hint naming a
    /// no-longer-runnable task falls back to priority selection, same as
    /// `Other`.
    fn reschedule(&mut self, hint: NextTask) {
        let target = match hint {
            NextTask::Specific(idx)
                if self.tasks[idx].as_ref().is_some_and(|t| t.is_runnable()) =>
            {
                idx
            }
            NextTask::Same => self.current,
            _ => self.find_next(),
        };
        if target != self.current {
            self.switch(target);
        }
    }

    /// Selection algorithm: scan starting after `current` for
    /// the most important `Ready` task. If none is ready, stay on `current`
    /// if it's still `Running` (the real idle wait happens in `run`, not
    /// here, since this must never block).
    fn find_next(&self) -> usize {
        if let Some(idx) = task::priority_scan(self.current, &self.tasks, |t| t.is_runnable()) {
            return idx;
        }
        self.current
    }

    fn switch(&mut self, target: usize) {
        if target == self.current {
            return;
        }
        #[cfg(feature = "stack-guard")]
        if let Some(outgoing) = self.tasks[self.current].as_ref() {
            if !outgoing.stack_intact() {
                crate::fail::die("stack overflow");
            }
        }

        let (from_slot, to_slot) =
            util::index2_distinct(&mut self.tasks, self.current, target);
        let from = from_slot.as_mut().expect("current task slot empty");
        let to = to_slot.as_mut().expect("target task slot empty");

        if from.state == TaskState::Running {
            from.state = TaskState::Ready;
        }
        to.state = TaskState::Running;

        diag::event_context_switch(target);
        self.hal.context_switch(&mut from.ctx, &mut to.ctx);

        self.current = target;
        self.quantum = time::ms_to_ticks(config::QUANTUM_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimHal;

    fn stack() -> &'static mut [u8] {
        Box::leak(Box::new([0u8; 128]))
    }

    fn noop() {}

    #[test]
    fn task_create_assigns_increasing_ids() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        let a = sched.task_create(noop, stack(), Priority(1)).unwrap();
        let b = sched.task_create(noop, stack(), Priority(2)).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
    }

    #[test]
    fn task_create_rejects_undersized_stack() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        let tiny: &'static mut [u8] = Box::leak(Box::new([0u8; 8]));
        assert_eq!(
            sched.task_create(noop, tiny, Priority(0)),
            Err(Error::InvalidStack)
        );
    }

    #[test]
    fn task_create_fails_once_table_is_full() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        for _ in 0..config::MAX_TASKS {
            sched.task_create(noop, stack(), Priority(1)).unwrap();
        }
        assert_eq!(
            sched.task_create(noop, stack(), Priority(1)),
            Err(Error::TooManyTasks)
        );
    }

    #[test]
    fn yield_now_prefers_more_important_ready_task() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        sched.task_create(noop, stack(), Priority(5)).unwrap();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.current = 0;
        sched.tasks[0].as_mut().unwrap().state = TaskState::Running;

        sched.yield_now();
        assert_eq!(sched.current_tid().index(), 1);
    }

    #[test]
    fn sleep_blocks_until_ticks_elapse() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.current = 0;
        sched.tasks[0].as_mut().unwrap().state = TaskState::Running;

        sched.sleep(30);
        assert_eq!(sched.current_tid().index(), 1);
        assert_eq!(
            sched.task_state(TaskId::new(0)),
            Some(TaskState::Sleeping)
        );

        for _ in 0..29 {
            sched.tick();
        }
        assert_eq!(
            sched.task_state(TaskId::new(0)),
            Some(TaskState::Sleeping)
        );

        sched.tick();
        assert_eq!(sched.task_state(TaskId::new(0)), Some(TaskState::Ready));
    }

    #[test]
    fn sleep_zero_behaves_like_yield() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.current = 0;
        sched.tasks[0].as_mut().unwrap().state = TaskState::Running;

        sched.sleep(0);
        assert_eq!(sched.current_tid().index(), 1);
        assert_eq!(sched.task_state(TaskId::new(0)), Some(TaskState::Ready));
    }

    #[test]
    fn switch_to_ignores_non_ready_target() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.current = 0;
        sched.tasks[0].as_mut().unwrap().state = TaskState::Running;
        sched.tasks[1].as_mut().unwrap().state = TaskState::Blocked;

        sched.switch_to(TaskId::new(1));
        assert_eq!(sched.current_tid().index(), 0);
    }

    #[test]
    fn switch_to_directed_switch_ignores_priority() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        sched.task_create(noop, stack(), Priority(0)).unwrap();
        sched.task_create(noop, stack(), Priority(63)).unwrap();
        sched.current = 0;
        sched.tasks[0].as_mut().unwrap().state = TaskState::Running;

        sched.switch_to(TaskId::new(1));
        assert_eq!(sched.current_tid().index(), 1);
    }

    #[test]
    fn task_exit_marks_terminated_and_switches_away() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.current = 0;
        sched.tasks[0].as_mut().unwrap().state = TaskState::Running;

        sched.task_exit();
        assert_eq!(
            sched.task_state(TaskId::new(0)),
            Some(TaskState::Terminated)
        );
        assert_eq!(sched.current_tid().index(), 1);
    }

    #[test]
    fn tick_switches_on_quantum_expiry() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.current = 0;
        sched.tasks[0].as_mut().unwrap().state = TaskState::Running;

        let quantum_ticks = time::ms_to_ticks(config::QUANTUM_MS);
        for _ in 0..quantum_ticks {
            sched.tick();
        }
        assert_eq!(sched.current_tid().index(), 1);
    }

    #[cfg(feature = "dag")]
    #[test]
    fn dep_wait_blocks_until_signaled() {
        let hal = SimHal::new();
        let mut sched = Scheduler::new(&hal);
        sched.init();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.task_create(noop, stack(), Priority(1)).unwrap();
        sched.current = 0;
        sched.tasks[0].as_mut().unwrap().state = TaskState::Running;

        sched.dep_wait(2);
        assert_eq!(sched.current_tid().index(), 1);
        assert_eq!(sched.task_state(TaskId::new(0)), Some(TaskState::Blocked));

        sched.dep_signal(TaskId::new(0));
        assert_eq!(sched.task_state(TaskId::new(0)), Some(TaskState::Blocked));

        sched.dep_signal(TaskId::new(0));
        assert_eq!(sched.task_state(TaskId::new(0)), Some(TaskState::Ready));
    }
}
