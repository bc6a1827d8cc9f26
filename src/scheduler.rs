//! # Scheduler Core
//!
//! Earliest-Deadline-First scheduling of periodic tasks layered over
//! priority scheduling of aperiodic tasks, with fixed per-job CPU budgets
//! enforced by a one-shot hardware timer.
//!
//! ## Queues
//!
//! Four [`HybridQueue`]s carry every schedulable task:
//!
//! - **ready** — periodic tasks with a released, unfinished job, sorted by
//!   absolute deadline. The head is the EDF winner and stays linked while
//!   it runs.
//! - **wait** — periodic tasks whose next job has not released, sorted by
//!   absolute release time.
//! - **aperiodic_ready** — aperiodic tasks, sorted by static priority
//!   (smaller = higher), FIFO among equals.
//! - **blocked** — periodic tasks blocked on a resource, sorted by the
//!   deadline they would have had, so misses keep being counted while the
//!   task cannot run.
//!
//! A periodic task is linked into exactly one of {ready, wait, blocked}
//! at any instant; the block/unblock transitions are the only code that
//! moves tasks between them.
//!
//! ## Interrupt paths
//!
//! The periodic-interval timer fires every `TICK_PERIOD_US`:
//! advance the virtual clock, charge the interrupted task and detect
//! budget exhaustion, sweep missed deadlines off the ready head and the
//! blocked queue, release every job whose time has come, dispatch.
//!
//! The budget timer fires at the earlier of "running job out of budget"
//! or "running job past its deadline": charge, detect, dispatch.
//!
//! All entry points run with interrupts masked and return a [`Dispatch`]
//! describing the selected task and the budget-timer programming; the
//! arch layer applies both and performs the context switch.

use crate::config::{MAX_TASKS, MIN_BUDGET_US, MIN_STACK_SIZE, STACK_SIZE, TICK_PERIOD_US, UTILIZATION_SCALE};
use crate::error::KernelError;
use crate::queue::HybridQueue;
use crate::task::{
    PeriodicParams, ProcessId, TaskAttrs, TaskClass, TaskEntry, TaskId, TaskRecord, TaskStats,
};
use crate::timer::KernelClock;

// ---------------------------------------------------------------------------
// Dispatch decision
// ---------------------------------------------------------------------------

/// Budget-timer programming chosen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetArm {
    /// Fire once after this many microseconds: the earlier of budget
    /// exhaustion and deadline expiry for the selected periodic task.
    OneShot(u64),
    /// Arm at the hardware maximum. Aperiodic and idle selections have no
    /// budget limit; the timer keeps running only to meter elapsed time.
    MaxTimeout,
}

/// Outcome of a scheduling pass, applied by the arch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Task to run next; `None` means idle.
    pub next: Option<TaskId>,
    pub arm: BudgetArm,
}

/// Which scheduler queue a task currently occupies. Debug/monitor surface;
/// a task blocked on a semaphore additionally sits in that semaphore's
/// private wait list, which this does not see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLocation {
    Ready,
    Wait,
    Blocked,
    AperiodicReady,
    Done,
}

/// System-wide counters exposed through the admin syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalStats {
    pub idle_time_us: u64,
    pub total_time_us: u64,
    pub interval_interrupts: u32,
    pub budget_interrupts: u32,
    pub context_switches: u32,
    pub max_scheduler_latency_us: u64,
}

impl GlobalStats {
    pub const fn new() -> Self {
        Self {
            idle_time_us: 0,
            total_time_us: 0,
            interval_interrupts: 0,
            budget_interrupts: 0,
            context_switches: 0,
            max_scheduler_latency_us: 0,
        }
    }
}

/// Utilization contribution of one periodic task in parts per million,
/// rounded up so admission stays conservative.
fn job_utilization_ppm(budget_us: u64, period_us: u64, deadline_us: u64) -> u64 {
    let denom = period_us.min(deadline_us);
    (budget_us * UTILIZATION_SCALE + denom - 1) / denom
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The central scheduler state: the fixed task pool, the five queues, the
/// virtual clock and the aggregate counters. Stored as a single global in
/// `kernel.rs` and only ever mutated inside a critical section.
pub struct Scheduler {
    /// Fixed task pool; the slot index is the task id.
    pub(crate) tasks: [TaskRecord; MAX_TASKS],
    task_count: usize,
    ready: HybridQueue,
    wait: HybridQueue,
    aperiodic_ready: HybridQueue,
    blocked: HybridQueue,
    /// Completed aperiodic tasks. Their pool slots are never reclaimed.
    done: HybridQueue,
    current: Option<TaskId>,
    clock: KernelClock,
    /// Precomputed start of the next interval.
    next_period_us: u64,
    /// Intra-interval offset at the moment the budget timer was last
    /// armed; elapsed readings are relative to this point.
    offset_at_arm_us: u64,
    utilization_ppm: u64,
    started: bool,
    stats: GlobalStats,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskRecord::EMPTY; MAX_TASKS],
            task_count: 0,
            ready: HybridQueue::new(),
            wait: HybridQueue::new(),
            aperiodic_ready: HybridQueue::new(),
            blocked: HybridQueue::new(),
            done: HybridQueue::new(),
            current: None,
            clock: KernelClock::new(),
            next_period_us: TICK_PERIOD_US,
            offset_at_arm_us: 0,
            utilization_ppm: 0,
            started: false,
            stats: GlobalStats::new(),
        }
    }

    // -- admission ---------------------------------------------------------

    /// Admit a periodic task. Rejected tasks enter no queue.
    #[allow(clippy::too_many_arguments)]
    pub fn create_periodic_task(
        &mut self,
        name: &'static str,
        owner: ProcessId,
        attrs: TaskAttrs,
        params: PeriodicParams,
        entry: TaskEntry,
        arg: usize,
        stack_size: usize,
    ) -> Result<TaskId, KernelError> {
        if params.period_us == 0 || params.period_us % TICK_PERIOD_US != 0 {
            return Err(KernelError::InvalidPeriod);
        }
        if params.phase_us % TICK_PERIOD_US != 0 {
            return Err(KernelError::InvalidPhase);
        }
        if params.deadline_us == 0 || params.deadline_us > params.period_us {
            return Err(KernelError::InvalidDeadline);
        }
        if params.budget_us < MIN_BUDGET_US || params.budget_us > params.deadline_us {
            return Err(KernelError::InvalidBudget);
        }
        check_stack(stack_size)?;

        let util = job_utilization_ppm(params.budget_us, params.period_us, params.deadline_us);
        if self.utilization_ppm + util >= UTILIZATION_SCALE {
            log::warn!(
                "periodic task '{}' rejected: would reach the utilization bound",
                name
            );
            return Err(KernelError::ExceedsMaxCpu);
        }

        let id = self.alloc_slot()?;
        self.tasks[id].init_periodic(id, name, owner, attrs, params, entry, arg, stack_size);

        // First release. After start, round up to the next boundary on the
        // task's own release grid so the release lands exactly on a period
        // start, as the admission loop requires.
        let first_release = if self.started {
            let mut r = params.phase_us;
            while r < self.next_period_us {
                r += params.period_us;
            }
            r
        } else {
            params.phase_us
        };
        self.tasks[id].periodic_mut().job_release_us = first_release;

        self.utilization_ppm += util;
        self.wait.priority_insert(&mut self.tasks, id, first_release);
        log::debug!(
            "admitted periodic task '{}' (id {}), first release at {}us",
            name,
            id,
            first_release
        );
        Ok(id)
    }

    /// Admit an aperiodic task; eligible to run immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn create_aperiodic_task(
        &mut self,
        name: &'static str,
        owner: ProcessId,
        attrs: TaskAttrs,
        priority: u32,
        entry: TaskEntry,
        arg: usize,
        stack_size: usize,
    ) -> Result<TaskId, KernelError> {
        check_stack(stack_size)?;
        let id = self.alloc_slot()?;
        self.tasks[id].init_aperiodic(id, name, owner, attrs, priority, entry, arg, stack_size);
        self.aperiodic_ready
            .priority_insert(&mut self.tasks, id, priority as u64);
        log::debug!("admitted aperiodic task '{}' (id {}), priority {}", name, id, priority);
        Ok(id)
    }

    fn alloc_slot(&mut self) -> Result<TaskId, KernelError> {
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::PoolExhausted);
        }
        let id = self.task_count;
        self.task_count += 1;
        Ok(id)
    }

    // -- interrupt entry points --------------------------------------------

    /// Launch the scheduler at virtual time zero: release every job with
    /// phase zero and pick the first task.
    pub fn start(&mut self) -> Dispatch {
        assert!(!self.started, "scheduler started twice");
        self.started = true;
        self.clock.begin_period(0);
        self.next_period_us = TICK_PERIOD_US;
        log::info!(
            "scheduler started: {} tasks, utilization {}ppm",
            self.task_count,
            self.utilization_ppm
        );
        self.release_due_jobs();
        self.select()
    }

    /// Periodic-interval timer expiry. `budget_elapsed_us` is the budget
    /// timer's elapsed reading at handler entry, i.e. the CPU time the
    /// interrupted task consumed since it was last dispatched.
    pub fn on_interval_tick(&mut self, budget_elapsed_us: u64) -> Dispatch {
        debug_assert!(self.started, "interval tick before start");
        self.stats.interval_interrupts += 1;

        let start = self.next_period_us;
        self.clock.begin_period(start);
        self.next_period_us = start + TICK_PERIOD_US;
        self.offset_at_arm_us = 0;
        self.stats.total_time_us = start;

        self.account_current(budget_elapsed_us);
        self.sweep_blocked();
        self.release_due_jobs();
        self.select()
    }

    /// Budget timer expiry: the running job ran out of budget or crossed
    /// its deadline while still running.
    pub fn on_budget_timer(&mut self, elapsed_us: u64) -> Dispatch {
        debug_assert!(self.started, "budget expiry before start");
        self.stats.budget_interrupts += 1;
        self.refresh_offset(elapsed_us);
        self.account_current(elapsed_us);
        self.select()
    }

    // -- overrun detection -------------------------------------------------

    /// Charge `spent_us` of CPU to the task active at interrupt time and
    /// handle the consequences: budget exhaustion for the charged task,
    /// then deadline misses for everything overdue at the ready head.
    fn account_current(&mut self, spent_us: u64) {
        let now = self.clock.now_us();
        match self.current {
            None => self.stats.idle_time_us += spent_us,
            Some(id) => {
                self.tasks[id].accumulated_budget_us += spent_us;
                if self.tasks[id].attrs.contains(TaskAttrs::IDLE) {
                    self.stats.idle_time_us += spent_us;
                }
                if self.tasks[id].class.is_periodic() {
                    // Clamp: tick rounding can overshoot the remaining
                    // budget by a few microseconds.
                    let exhausted = {
                        let st = self.tasks[id].periodic_mut();
                        let charged = spent_us.min(st.remaining_budget_us);
                        st.remaining_budget_us -= charged;
                        st.remaining_budget_us == 0
                    };
                    if exhausted {
                        {
                            let st = self.tasks[id].periodic_mut();
                            st.tbe_count += 1;
                            st.exec_count += 1;
                        }
                        log::trace!("task {} exceeded its job budget", id);
                        self.ready.priority_remove(&mut self.tasks, id);
                        self.rotate_job(id);
                        self.current = None;
                    }
                }
            }
        }
        self.sweep_ready_deadlines(now);
    }

    /// Pop every ready entry whose absolute deadline has passed. Fires
    /// zero, one or many times per interrupt: consecutive misses pile up
    /// under sustained overload and are all rotated here.
    fn sweep_ready_deadlines(&mut self, now_us: u64) {
        while let Some((id, key)) = self.ready.priority_peek(&self.tasks) {
            if key > now_us {
                break;
            }
            self.ready.priority_remove(&mut self.tasks, id);
            {
                let st = self.tasks[id].periodic_mut();
                st.dline_miss_count += 1;
                st.exec_count += 1;
            }
            log::trace!("task {} missed its deadline", id);
            self.rotate_job(id);
            if self.current == Some(id) {
                self.current = None;
            }
        }
    }

    /// Deadline bookkeeping for tasks blocked on a resource: count the
    /// miss, rotate the job, keep the task blocked. Only an explicit
    /// unblock moves it out of the blocked queue.
    fn sweep_blocked(&mut self) {
        let now = self.clock.period_start_us();
        while let Some((id, key)) = self.blocked.priority_peek(&self.tasks) {
            if key > now {
                break;
            }
            self.blocked.priority_remove(&mut self.tasks, id);
            let new_key = {
                let st = self.tasks[id].periodic_mut();
                st.dline_miss_count += 1;
                st.refill_budget();
                st.advance_job();
                st.absolute_deadline_us()
            };
            log::trace!("blocked task {} missed its deadline", id);
            self.blocked.priority_insert(&mut self.tasks, id, new_key);
        }
    }

    /// Advance a task to its next job and re-queue it: straight back into
    /// ready when the new job is already due, otherwise into wait until
    /// its release time.
    fn rotate_job(&mut self, id: TaskId) {
        let period_start = self.clock.period_start_us();
        let (release, deadline) = {
            let st = self.tasks[id].periodic_mut();
            st.advance_job();
            st.refill_budget();
            (st.job_release_us, st.deadline_us)
        };
        if release <= period_start {
            self.ready
                .priority_insert(&mut self.tasks, id, release + deadline);
        } else {
            self.wait.priority_insert(&mut self.tasks, id, release);
        }
    }

    /// EDF admission: move every waiting task whose release time has come
    /// into the ready queue, keyed by absolute deadline.
    fn release_due_jobs(&mut self) {
        let period_start = self.clock.period_start_us();
        while let Some((id, release)) = self.wait.priority_peek(&self.tasks) {
            if release > period_start {
                break;
            }
            // Releases land exactly on period boundaries; anything else
            // means the wait queue was fed a bad release time.
            assert!(
                release == period_start,
                "task {}: release {}us not on period boundary {}us",
                id,
                release,
                period_start
            );
            self.wait.priority_remove(&mut self.tasks, id);
            let deadline = {
                let st = self.tasks[id].periodic_mut();
                st.refill_budget();
                st.deadline_us
            };
            self.ready
                .priority_insert(&mut self.tasks, id, release + deadline);
        }
    }

    // -- dispatcher --------------------------------------------------------

    /// Pick the next task: the EDF head if any periodic job is ready,
    /// otherwise the highest-priority aperiodic task, otherwise idle.
    /// Periodic jobs strictly dominate aperiodic tasks.
    fn select(&mut self) -> Dispatch {
        let now = self.clock.now_us();
        let d = if let Some((id, deadline)) = self.ready.priority_peek(&self.tasks) {
            let remaining = self.tasks[id].periodic().remaining_budget_us;
            // A task unblocked mid-interval can come back with its
            // deadline already expired; arm minimally so the expiry is
            // detected on the next budget interrupt.
            let timeout = deadline
                .min(now + remaining)
                .saturating_sub(now)
                .max(1);
            Dispatch {
                next: Some(id),
                arm: BudgetArm::OneShot(timeout),
            }
        } else if let Some((id, _)) = self.aperiodic_ready.priority_peek(&self.tasks) {
            Dispatch {
                next: Some(id),
                arm: BudgetArm::MaxTimeout,
            }
        } else {
            Dispatch {
                next: None,
                arm: BudgetArm::MaxTimeout,
            }
        };
        if d.next != self.current {
            self.stats.context_switches += 1;
        }
        self.current = d.next;
        self.offset_at_arm_us = self.clock.offset_us();
        d
    }

    fn refresh_offset(&mut self, elapsed_us: u64) {
        self.clock.set_offset(self.offset_at_arm_us + elapsed_us);
    }

    /// Re-run the dispatcher without new accounting. Callers of the
    /// block/unblock primitives (semaphore post and free, driver wakeups)
    /// use this to fold a newly-ready task into the running decision.
    pub fn redispatch(&mut self) -> Dispatch {
        self.select()
    }

    // -- voluntary scheduling points ---------------------------------------

    /// Voluntary yield: the running job finished its work for this period.
    /// This is the only way a periodic job finishes early — accounting is
    /// unconditional, the job rotates, and the next task is picked.
    pub fn yield_current(&mut self, elapsed_us: u64) -> Dispatch {
        self.refresh_offset(elapsed_us);
        if let Some(id) = self.current {
            self.tasks[id].accumulated_budget_us += elapsed_us;
            if self.tasks[id].attrs.contains(TaskAttrs::IDLE) {
                self.stats.idle_time_us += elapsed_us;
            }
            if self.tasks[id].class.is_periodic() {
                {
                    let st = self.tasks[id].periodic_mut();
                    let charged = elapsed_us.min(st.remaining_budget_us);
                    st.remaining_budget_us -= charged;
                    st.exec_count += 1;
                }
                self.ready.priority_remove(&mut self.tasks, id);
                self.rotate_job(id);
            } else {
                // Round-robin among equal-priority aperiodic tasks: the
                // stable insert re-queues behind every peer with the same
                // priority.
                let prio = match self.tasks[id].class.as_aperiodic() {
                    Some(st) => st.priority as u64,
                    None => unreachable!(),
                };
                self.aperiodic_ready.priority_remove(&mut self.tasks, id);
                self.aperiodic_ready.priority_insert(&mut self.tasks, id, prio);
            }
            self.current = None;
        }
        self.select()
    }

    /// Park an aperiodic task that returned from its body. The record
    /// moves to the done queue and its pool slot is never reclaimed.
    pub fn complete_current(&mut self) -> Dispatch {
        if let Some(id) = self.current {
            assert!(
                !self.tasks[id].class.is_periodic(),
                "periodic task {} cannot complete; jobs end with yield",
                id
            );
            self.aperiodic_ready.priority_remove(&mut self.tasks, id);
            self.done.nonpriority_append(&mut self.tasks, id);
            if let TaskClass::Aperiodic(st) = &mut self.tasks[id].class {
                st.completed = true;
            }
            self.current = None;
        }
        self.select()
    }

    // -- block / unblock primitives ----------------------------------------

    /// Remove the current task from its ready queue ahead of blocking on a
    /// resource. Periodic tasks additionally enter the blocked queue keyed
    /// by their current absolute deadline so miss tracking continues. The
    /// caller owns inserting the task into its private wait structure and
    /// redispatching.
    pub fn block_current(&mut self, elapsed_us: u64) -> Option<TaskId> {
        let id = self.current?;
        self.refresh_offset(elapsed_us);
        self.tasks[id].accumulated_budget_us += elapsed_us;
        if self.tasks[id].class.is_periodic() {
            let key = {
                let st = self.tasks[id].periodic_mut();
                let charged = elapsed_us.min(st.remaining_budget_us);
                st.remaining_budget_us -= charged;
                st.absolute_deadline_us()
            };
            self.ready.priority_remove(&mut self.tasks, id);
            self.blocked.priority_insert(&mut self.tasks, id, key);
        } else {
            self.aperiodic_ready.priority_remove(&mut self.tasks, id);
        }
        self.current = None;
        Some(id)
    }

    /// Make a blocked task schedulable again: back into ready if its job
    /// already released, into wait otherwise. Does not redispatch — the
    /// caller decides when the newly-ready task gets considered.
    pub fn unblock(&mut self, id: TaskId) {
        assert!(self.tasks[id].active, "unblock of inactive task {}", id);
        if self.tasks[id].class.is_periodic() {
            self.blocked.priority_remove(&mut self.tasks, id);
            let (release, deadline) = {
                let st = self.tasks[id].periodic();
                (st.job_release_us, st.deadline_us)
            };
            if release <= self.clock.period_start_us() {
                self.ready
                    .priority_insert(&mut self.tasks, id, release + deadline);
            } else {
                self.wait.priority_insert(&mut self.tasks, id, release);
            }
        } else {
            let prio = match self.tasks[id].class.as_aperiodic() {
                Some(st) => st.priority as u64,
                None => unreachable!(),
            };
            self.aperiodic_ready.priority_insert(&mut self.tasks, id, prio);
        }
    }

    // -- introspection -----------------------------------------------------

    #[inline]
    pub fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRecord> {
        if id < self.task_count {
            Some(&self.tasks[id])
        } else {
            None
        }
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    #[inline]
    pub fn clock(&self) -> &KernelClock {
        &self.clock
    }

    /// Aggregate admitted utilization in parts per million.
    #[inline]
    pub fn utilization_ppm(&self) -> u64 {
        self.utilization_ppm
    }

    /// Which scheduler queue `id` is linked into right now.
    pub fn task_location(&self, id: TaskId) -> Option<TaskLocation> {
        if id >= self.task_count {
            return None;
        }
        if self.ready.priority_contains(&self.tasks, id) {
            Some(TaskLocation::Ready)
        } else if self.wait.priority_contains(&self.tasks, id) {
            Some(TaskLocation::Wait)
        } else if self.blocked.priority_contains(&self.tasks, id) {
            Some(TaskLocation::Blocked)
        } else if self.aperiodic_ready.priority_contains(&self.tasks, id) {
            Some(TaskLocation::AperiodicReady)
        } else if self.done.nonpriority_contains(&self.tasks, id) {
            Some(TaskLocation::Done)
        } else {
            None
        }
    }

    /// Per-task counters for the admin syscall.
    pub fn task_stats(&self, id: TaskId) -> Result<TaskStats, KernelError> {
        match self.task(id) {
            Some(t) if t.active => Ok(t.stats()),
            _ => Err(KernelError::BadArgument),
        }
    }

    /// System-wide counters, with total time refreshed from the clock.
    pub fn global_stats(&self) -> GlobalStats {
        let mut s = self.stats;
        s.total_time_us = self.clock.now_us();
        s
    }

    /// Record one observed scheduler-path latency; keeps the maximum.
    pub fn record_scheduler_latency(&mut self, latency_us: u64) {
        if latency_us > self.stats.max_scheduler_latency_us {
            self.stats.max_scheduler_latency_us = latency_us;
        }
    }
}

fn check_stack(stack_size: usize) -> Result<(), KernelError> {
    if stack_size < MIN_STACK_SIZE || stack_size > STACK_SIZE {
        return Err(KernelError::StackTooSmall);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop_entry(_arg: usize) -> ! {
        loop {}
    }

    fn periodic(
        s: &mut Scheduler,
        name: &'static str,
        period: u64,
        deadline: u64,
        budget: u64,
        phase: u64,
    ) -> TaskId {
        s.create_periodic_task(
            name,
            ProcessId(1),
            TaskAttrs::empty(),
            PeriodicParams {
                period_us: period,
                deadline_us: deadline,
                budget_us: budget,
                phase_us: phase,
            },
            noop_entry,
            0,
            512,
        )
        .unwrap()
    }

    fn aperiodic(s: &mut Scheduler, name: &'static str, priority: u32) -> TaskId {
        s.create_aperiodic_task(
            name,
            ProcessId(1),
            TaskAttrs::empty(),
            priority,
            noop_entry,
            0,
            512,
        )
        .unwrap()
    }

    fn pstate(s: &Scheduler, id: TaskId) -> crate::task::PeriodicState {
        *s.task(id).unwrap().periodic()
    }

    // -- event-driven micro-simulation -------------------------------------

    /// Replays the hardware's view of the kernel: fires the interval tick
    /// every `TICK_PERIOD_US`, fires the budget timer when its armed
    /// timeout elapses, and yields the running periodic task once it has
    /// performed its configured per-job work. `u64::MAX` work means the
    /// task busy-loops and never yields.
    struct Sim {
        sched: Scheduler,
        now: u64,
        armed_at: u64,
        armed_timeout: u64,
        next_tick: u64,
        work_us: [u64; MAX_TASKS],
        done_us: [u64; MAX_TASKS],
    }

    impl Sim {
        fn new(sched: Scheduler) -> Self {
            Self {
                sched,
                now: 0,
                armed_at: 0,
                armed_timeout: u64::MAX,
                next_tick: TICK_PERIOD_US,
                work_us: [u64::MAX; MAX_TASKS],
                done_us: [0; MAX_TASKS],
            }
        }

        fn set_work(&mut self, id: TaskId, work_us: u64) {
            self.work_us[id] = work_us;
        }

        fn start(&mut self) {
            let d = self.sched.start();
            self.apply(d);
        }

        fn apply(&mut self, d: Dispatch) {
            self.armed_at = self.now;
            self.armed_timeout = match d.arm {
                BudgetArm::OneShot(t) => t,
                BudgetArm::MaxTimeout => u64::MAX,
            };
        }

        fn run_until(&mut self, end_us: u64) {
            while self.now < end_us {
                let tick_at = self.next_tick;
                let budget_at = self.armed_at.saturating_add(self.armed_timeout);
                let finish_at = match self.sched.current_task() {
                    Some(id)
                        if self.sched.task(id).unwrap().class.is_periodic()
                            && self.work_us[id] != u64::MAX =>
                    {
                        Some(self.now + (self.work_us[id] - self.done_us[id]))
                    }
                    _ => None,
                };

                let evt = tick_at
                    .min(budget_at)
                    .min(finish_at.unwrap_or(u64::MAX));
                if evt > end_us {
                    self.now = end_us;
                    break;
                }

                let running = self.sched.current_task();
                if let Some(id) = running {
                    self.done_us[id] += evt - self.now;
                }
                let elapsed = evt - self.armed_at;
                self.now = evt;

                let d = if evt == tick_at {
                    self.next_tick += TICK_PERIOD_US;
                    self.sched.on_interval_tick(elapsed)
                } else if evt == budget_at {
                    // Forced rotation starts the next job from scratch.
                    if let Some(id) = running {
                        self.done_us[id] = 0;
                    }
                    self.sched.on_budget_timer(elapsed)
                } else {
                    let id = running.unwrap();
                    self.done_us[id] = 0;
                    self.sched.yield_current(elapsed)
                };
                self.apply(d);
            }
        }
    }

    // -- admission ---------------------------------------------------------

    #[test]
    fn test_admission_validates_parameters() {
        let mut s = Scheduler::new();
        let base = PeriodicParams {
            period_us: 1_000,
            deadline_us: 1_000,
            budget_us: 300,
            phase_us: 0,
        };
        let create = |s: &mut Scheduler, p: PeriodicParams, stack: usize| {
            s.create_periodic_task(
                "t",
                ProcessId(1),
                TaskAttrs::empty(),
                p,
                noop_entry,
                0,
                stack,
            )
        };

        let mut p = base;
        p.period_us = 750; // not a multiple of the tick period
        assert_eq!(create(&mut s, p, 512), Err(KernelError::InvalidPeriod));

        p = base;
        p.phase_us = 250;
        assert_eq!(create(&mut s, p, 512), Err(KernelError::InvalidPhase));

        p = base;
        p.deadline_us = 1_500; // deadline > period
        assert_eq!(create(&mut s, p, 512), Err(KernelError::InvalidDeadline));

        p = base;
        p.budget_us = 1_001; // budget > deadline
        assert_eq!(create(&mut s, p, 512), Err(KernelError::InvalidBudget));

        p = base;
        p.budget_us = MIN_BUDGET_US - 1;
        assert_eq!(create(&mut s, p, 512), Err(KernelError::InvalidBudget));

        assert_eq!(create(&mut s, base, 64), Err(KernelError::StackTooSmall));
        assert_eq!(
            create(&mut s, base, STACK_SIZE + 1),
            Err(KernelError::StackTooSmall)
        );

        // Nothing was admitted.
        assert_eq!(s.task_count(), 0);
        assert_eq!(s.utilization_ppm(), 0);
    }

    #[test]
    fn test_admission_enforces_cpu_bound() {
        let mut s = Scheduler::new();
        periodic(&mut s, "a", 1_000, 1_000, 600, 0); // 0.6
        // 0.6 + 0.4 == 1.0 exactly: must be rejected, the bound is strict.
        let r = s.create_periodic_task(
            "b",
            ProcessId(1),
            TaskAttrs::empty(),
            PeriodicParams {
                period_us: 1_000,
                deadline_us: 1_000,
                budget_us: 400,
                phase_us: 0,
            },
            noop_entry,
            0,
            512,
        );
        assert_eq!(r, Err(KernelError::ExceedsMaxCpu));
        // 0.6 + 0.399 stays below.
        periodic(&mut s, "c", 1_000, 1_000, 399, 0);
        assert_eq!(s.task_count(), 2);
    }

    #[test]
    fn test_admission_uses_min_of_period_and_deadline() {
        let mut s = Scheduler::new();
        // budget/deadline = 400/500 = 0.8 even though budget/period = 0.2.
        periodic(&mut s, "a", 2_000, 500, 400, 0);
        let r = s.create_periodic_task(
            "b",
            ProcessId(1),
            TaskAttrs::empty(),
            PeriodicParams {
                period_us: 1_000,
                deadline_us: 1_000,
                budget_us: 250,
                phase_us: 0,
            },
            noop_entry,
            0,
            512,
        );
        assert_eq!(r, Err(KernelError::ExceedsMaxCpu));
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut s = Scheduler::new();
        for i in 0..MAX_TASKS {
            let _ = aperiodic(&mut s, "x", i as u32);
        }
        let r = s.create_aperiodic_task(
            "overflow",
            ProcessId(1),
            TaskAttrs::empty(),
            0,
            noop_entry,
            0,
            512,
        );
        assert_eq!(r, Err(KernelError::PoolExhausted));
    }

    // -- EDF dispatch ------------------------------------------------------

    #[test]
    fn test_phase_release_and_edf_order() {
        let mut s = Scheduler::new();
        let a = periodic(&mut s, "a", 1_000, 1_000, 300, 0);
        let b = periodic(&mut s, "b", 2_000, 1_500, 400, 500);

        // t=0: only A has released; deadline 1000.
        let d = s.start();
        assert_eq!(d.next, Some(a));
        assert_eq!(d.arm, BudgetArm::OneShot(300));
        assert_eq!(s.task_location(b), Some(TaskLocation::Wait));

        // A finishes after 250us of work.
        let d = s.yield_current(250);
        assert_eq!(d.next, None);
        assert_eq!(s.task_location(a), Some(TaskLocation::Wait));

        // t=500: B releases with absolute deadline 2000.
        let d = s.on_interval_tick(0);
        assert_eq!(d.next, Some(b));
        assert_eq!(d.arm, BudgetArm::OneShot(400));
        assert_eq!(s.clock().now_us(), 500);
    }

    #[test]
    fn test_equal_deadline_tie_break_is_fifo() {
        let mut s = Scheduler::new();
        let a = periodic(&mut s, "a", 1_000, 1_000, 300, 1_000);
        let b = periodic(&mut s, "b", 2_000, 1_500, 600, 500);

        let d = s.start();
        assert_eq!(d.next, None);
        let d = s.on_interval_tick(0); // t=500: B releases, deadline 2000
        assert_eq!(d.next, Some(b));

        // t=1000: A releases with deadline 2000 — equal keys. B was
        // inserted first and keeps the CPU.
        let d = s.on_interval_tick(500);
        assert_eq!(d.next, Some(b));
        // B consumed 500 of its 600us budget: expiry in 100us.
        assert_eq!(d.arm, BudgetArm::OneShot(100));

        // t=1100: B exhausts its budget; A takes over.
        let d = s.on_budget_timer(100);
        assert_eq!(d.next, Some(a));
        assert_eq!(d.arm, BudgetArm::OneShot(300));
        let st = pstate(&s, b);
        assert_eq!(st.tbe_count, 1);
        assert_eq!(st.job_release_us, 2_500);
        assert_eq!(st.remaining_budget_us, 600);
        assert_eq!(s.task_location(b), Some(TaskLocation::Wait));
    }

    #[test]
    fn test_no_overruns_below_utilization_bound() {
        let mut s = Scheduler::new();
        let a = periodic(&mut s, "a", 1_000, 1_000, 300, 0);
        let b = periodic(&mut s, "b", 2_000, 1_500, 400, 500);

        let mut sim = Sim::new(s);
        sim.set_work(a, 250);
        sim.set_work(b, 350);
        sim.start();
        sim.run_until(20_000);

        let sa = pstate(&sim.sched, a);
        let sb = pstate(&sim.sched, b);
        assert_eq!(sa.tbe_count, 0);
        assert_eq!(sa.dline_miss_count, 0);
        assert_eq!(sb.tbe_count, 0);
        assert_eq!(sb.dline_miss_count, 0);
        assert!(sa.exec_count >= 19, "A completed {} jobs", sa.exec_count);
        assert!(sb.exec_count >= 9, "B completed {} jobs", sb.exec_count);
    }

    #[test]
    fn test_budget_enforcement_one_tbe_per_job() {
        let mut s = Scheduler::new();
        let a = periodic(&mut s, "hog", 1_000, 1_000, 300, 0);

        let mut sim = Sim::new(s);
        // Busy-loops forever: every job must be rotated by the budget
        // timer, exactly once each.
        sim.set_work(a, u64::MAX);
        sim.start();
        sim.run_until(10_100);

        let st = pstate(&sim.sched, a);
        assert_eq!(st.tbe_count, 10);
        assert_eq!(st.exec_count, 10);
        assert_eq!(st.dline_miss_count, 0);
        // Release advanced by exactly one period per rotation.
        assert_eq!(st.job_release_us, 10 * 1_000);
        // The next job starts with a fresh budget.
        assert_eq!(st.remaining_budget_us, 300);
    }

    #[test]
    fn test_deadline_miss_counted_from_ready_queue() {
        let mut s = Scheduler::new();
        let a = periodic(&mut s, "a", 2_000, 1_500, 600, 0);
        s.start();
        s.block_current(100);
        s.on_interval_tick(0); // 500
        s.on_interval_tick(0); // 1000

        // Unblocked before its deadline: back into ready, deadline 1500.
        s.unblock(a);
        assert_eq!(s.task_location(a), Some(TaskLocation::Ready));

        // Nothing runs it before t=1500; the ready-head sweep rotates it.
        let d = s.on_interval_tick(0);
        assert_eq!(d.next, None);
        let st = pstate(&s, a);
        assert_eq!(st.dline_miss_count, 1);
        assert_eq!(st.exec_count, 1);
        assert_eq!(st.job_release_us, 2_000);
        assert_eq!(s.task_location(a), Some(TaskLocation::Wait));
    }

    #[test]
    fn test_ready_sweep_rotates_every_overdue_task() {
        let mut s = Scheduler::new();
        let a = periodic(&mut s, "a", 2_000, 1_500, 600, 0);
        let b = periodic(&mut s, "b", 2_000, 1_500, 500, 0);
        s.start();

        // Park both on the blocked queue, then make them ready again with
        // their original deadline of 1500 still pending.
        s.block_current(0); // A was selected first
        s.redispatch();
        s.block_current(0); // then B
        s.unblock(a);
        s.unblock(b);

        s.on_interval_tick(0); // 500
        s.on_interval_tick(0); // 1000
        // One interrupt, two overdue entries: the sweep rotates both.
        let d = s.on_interval_tick(0); // 1500
        assert_eq!(d.next, None);
        for id in [a, b] {
            let st = pstate(&s, id);
            assert_eq!(st.dline_miss_count, 1);
            assert_eq!(st.job_release_us, 2_000);
            assert_eq!(s.task_location(id), Some(TaskLocation::Wait));
        }
    }

    // -- blocked-queue bookkeeping -----------------------------------------

    #[test]
    fn test_blocked_task_accrues_misses_without_unblocking() {
        let mut s = Scheduler::new();
        let a = periodic(&mut s, "a", 1_000, 1_000, 300, 0);
        s.start();
        let blocked = s.block_current(100);
        assert_eq!(blocked, Some(a));
        assert_eq!(s.task_location(a), Some(TaskLocation::Blocked));

        s.on_interval_tick(0); // t=500
        assert_eq!(pstate(&s, a).dline_miss_count, 0);
        s.on_interval_tick(0); // t=1000: first deadline passes
        assert_eq!(pstate(&s, a).dline_miss_count, 1);
        s.on_interval_tick(0); // t=1500
        s.on_interval_tick(0); // t=2000: second deadline passes
        let st = pstate(&s, a);
        assert_eq!(st.dline_miss_count, 2);
        assert_eq!(st.job_release_us, 2 * 1_000);
        // Still blocked: the sweep only tracks statistics.
        assert_eq!(s.task_location(a), Some(TaskLocation::Blocked));

        // Only an explicit unblock makes it schedulable again, with a
        // fresh budget and its released job's deadline.
        s.unblock(a);
        assert_eq!(s.task_location(a), Some(TaskLocation::Ready));
        assert_eq!(pstate(&s, a).remaining_budget_us, 300);
        let d = s.redispatch();
        assert_eq!(d.next, Some(a));
    }

    #[test]
    fn test_unblock_before_release_goes_to_wait() {
        let mut s = Scheduler::new();
        // Deadline far below the period: after one blocked miss the next
        // release is in the future.
        let a = periodic(&mut s, "a", 2_000, 500, 200, 0);
        s.start();
        s.block_current(100);

        s.on_interval_tick(0); // t=500: would-be deadline passes
        let st = pstate(&s, a);
        assert_eq!(st.dline_miss_count, 1);
        assert_eq!(st.job_release_us, 2_000);

        s.unblock(a);
        assert_eq!(s.task_location(a), Some(TaskLocation::Wait));

        // The job releases normally at t=2000.
        s.on_interval_tick(0); // 1000
        s.on_interval_tick(0); // 1500
        let d = s.on_interval_tick(0); // 2000
        assert_eq!(d.next, Some(a));
        assert_eq!(s.task_location(a), Some(TaskLocation::Ready));
    }

    // -- aperiodic scheduling ----------------------------------------------

    #[test]
    fn test_periodic_dominates_aperiodic() {
        let mut s = Scheduler::new();
        let a = periodic(&mut s, "a", 1_000, 1_000, 300, 0);
        let x = aperiodic(&mut s, "x", 5);

        let d = s.start();
        assert_eq!(d.next, Some(a));

        // A yields; only then does the aperiodic task run, without a
        // budget limit.
        let d = s.yield_current(200);
        assert_eq!(d.next, Some(x));
        assert_eq!(d.arm, BudgetArm::MaxTimeout);
    }

    #[test]
    fn test_aperiodic_priority_and_round_robin() {
        let mut s = Scheduler::new();
        let x = aperiodic(&mut s, "x", 5);
        let y = aperiodic(&mut s, "y", 2);
        let z = aperiodic(&mut s, "z", 2);

        let d = s.start();
        assert_eq!(d.next, Some(y)); // smaller value = higher priority

        // Yield rotates among the equal-priority pair.
        let d = s.yield_current(100);
        assert_eq!(d.next, Some(z));
        let d = s.yield_current(100);
        assert_eq!(d.next, Some(y));
        assert_eq!(s.task_location(x), Some(TaskLocation::AperiodicReady));
    }

    #[test]
    fn test_aperiodic_completion_parks_forever() {
        let mut s = Scheduler::new();
        let x = aperiodic(&mut s, "x", 1);
        let y = aperiodic(&mut s, "y", 2);

        let d = s.start();
        assert_eq!(d.next, Some(x));
        let d = s.complete_current();
        assert_eq!(d.next, Some(y));
        assert_eq!(s.task_location(x), Some(TaskLocation::Done));
        assert!(s.task(x).unwrap().class.as_aperiodic().unwrap().completed);
        // The slot is retained: the pool does not shrink.
        assert_eq!(s.task_count(), 2);
    }

    // -- late creation and idle accounting ---------------------------------

    #[test]
    fn test_late_creation_rounds_release_forward() {
        let mut s = Scheduler::new();
        s.start();
        s.on_interval_tick(0); // t=500
        s.on_interval_tick(0); // t=1000

        let a = periodic(&mut s, "late", 1_000, 1_000, 300, 0);
        // phase 0 has long passed; the first release snaps to the next
        // boundary on the task's grid.
        assert_eq!(pstate(&s, a).job_release_us, 2_000);
        assert_eq!(s.task_location(a), Some(TaskLocation::Wait));

        s.on_interval_tick(0); // 1500
        let d = s.on_interval_tick(0); // 2000: released
        assert_eq!(d.next, Some(a));
    }

    #[test]
    fn test_idle_time_accounting() {
        let mut s = Scheduler::new();
        let d = s.start();
        assert_eq!(d.next, None);
        assert_eq!(d.arm, BudgetArm::MaxTimeout);
        s.on_interval_tick(500);
        s.on_interval_tick(500);
        let g = s.global_stats();
        assert_eq!(g.idle_time_us, 1_000);
        assert_eq!(g.interval_interrupts, 2);
        assert_eq!(g.total_time_us, 1_000);
    }

    #[test]
    fn test_scheduler_latency_keeps_maximum() {
        let mut s = Scheduler::new();
        s.record_scheduler_latency(7);
        s.record_scheduler_latency(3);
        s.record_scheduler_latency(12);
        assert_eq!(s.global_stats().max_scheduler_latency_us, 12);
    }
}
