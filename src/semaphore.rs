//! # Semaphores
//!
//! Counting and binary semaphores built directly on the scheduler's
//! block/unblock primitives. Each semaphore owns one [`HybridQueue`] used
//! for both waiter classes at once: periodic waiters sit on the
//! non-priority side in arrival order, aperiodic waiters on the priority
//! side sorted by static priority. A blocked periodic task keeps its
//! priority links free for the scheduler's blocked queue, so the same
//! record is tracked in both places without extra storage.
//!
//! Post-time fairness: the periodic wait list is deliberately unordered,
//! and every post does a linear scan for the waiter with the earliest
//! deadline among released jobs. Periodic waiters always beat aperiodic
//! waiters when both are eligible.
//!
//! Semaphores are not shared across processes: every operation is checked
//! against the creating process.

use crate::config::MAX_SEMAPHORES;
use crate::error::KernelError;
use crate::queue::HybridQueue;
use crate::scheduler::Scheduler;
use crate::task::{ProcessId, TaskId};

/// Handle into the fixed semaphore table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemHandle(pub usize);

/// Outcome of a wait: either the caller got a unit immediately, or it has
/// been blocked and enqueued and must not run until a post selects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Acquired,
    Blocked,
}

/// One semaphore slot.
///
/// Invariant: `count > 0` implies both wait lists are empty; a non-empty
/// wait list implies `count == 0`.
pub struct Semaphore {
    count: u32,
    binary: bool,
    owner: ProcessId,
    open: bool,
    /// np side: periodic waiters (unordered); p side: aperiodic waiters
    /// (priority-sorted).
    waiters: HybridQueue,
}

impl Semaphore {
    const CLOSED: Self = Self {
        count: 0,
        binary: false,
        owner: ProcessId(0),
        open: false,
        waiters: HybridQueue::new(),
    };

    #[inline]
    pub fn value(&self) -> u32 {
        self.count
    }

    /// Non-blocking fast path, or block the current task and enqueue it.
    fn wait(&mut self, sched: &mut Scheduler, elapsed_us: u64) -> WaitOutcome {
        if self.count > 0 {
            self.count -= 1;
            return WaitOutcome::Acquired;
        }
        let id = match sched.block_current(elapsed_us) {
            Some(id) => id,
            None => panic!("semaphore wait with no current task"),
        };
        if sched.tasks[id].class.is_periodic() {
            self.waiters.nonpriority_append(&mut sched.tasks, id);
        } else {
            let prio = match sched.tasks[id].class.as_aperiodic() {
                Some(st) => st.priority as u64,
                None => unreachable!(),
            };
            self.waiters.priority_insert(&mut sched.tasks, id, prio);
        }
        WaitOutcome::Blocked
    }

    /// Release one unit. If a waiter is eligible the unit transfers to it
    /// directly — `count` stays at zero — and the woken task id is
    /// returned so the caller can redispatch.
    fn post(&mut self, sched: &mut Scheduler) -> Option<TaskId> {
        if self.count == 0 {
            if let Some(id) = self.select_waiter(sched) {
                if sched.tasks[id].class.is_periodic() {
                    self.waiters.nonpriority_remove(&mut sched.tasks, id);
                } else {
                    self.waiters.priority_remove(&mut sched.tasks, id);
                }
                sched.tasks[id].pending = Some(Ok(0));
                sched.unblock(id);
                return Some(id);
            }
        }
        if self.binary {
            self.count = 1;
        } else {
            self.count += 1;
        }
        None
    }

    /// Pick the waiter to wake: the minimum-deadline periodic waiter whose
    /// job has released, else the highest-priority aperiodic waiter.
    fn select_waiter(&self, sched: &Scheduler) -> Option<TaskId> {
        let period_start = sched.clock().period_start_us();
        let mut best: Option<(TaskId, u64)> = None;
        let mut cur = self.waiters.nonpriority_peek();
        while let Some(id) = cur {
            let st = sched.tasks[id].periodic();
            if st.job_release_us <= period_start {
                let deadline = st.absolute_deadline_us();
                let better = match best {
                    Some((_, d)) => deadline < d,
                    None => true,
                };
                if better {
                    best = Some((id, deadline));
                }
            }
            cur = sched.tasks[id].node.nonpriority_next();
        }
        if let Some((id, _)) = best {
            return Some(id);
        }
        self.waiters.priority_peek(&sched.tasks).map(|(id, _)| id)
    }

    /// Destroy the semaphore: every waiter is unblocked with a
    /// `ResourceDeleted` result in its pending slot — the abnormal-wakeup
    /// signal, distinct from a normal post.
    fn free(&mut self, sched: &mut Scheduler) {
        while let Some(id) = self.waiters.nonpriority_pop_front(&mut sched.tasks) {
            sched.tasks[id].pending = Some(Err(KernelError::ResourceDeleted));
            sched.unblock(id);
        }
        while let Some((id, _)) = self.waiters.priority_pop_front(&mut sched.tasks) {
            sched.tasks[id].pending = Some(Err(KernelError::ResourceDeleted));
            sched.unblock(id);
        }
        self.count = 0;
        self.open = false;
        log::debug!("semaphore freed, waiters drained");
    }
}

// ---------------------------------------------------------------------------
// Semaphore table
// ---------------------------------------------------------------------------

/// Fixed pool of semaphores. Handles are slot indices; slots are reusable
/// after a free. All entry points validate the handle, the open state and
/// the calling process before touching the semaphore.
pub struct SemTable {
    sems: [Semaphore; MAX_SEMAPHORES],
}

impl SemTable {
    pub const fn new() -> Self {
        Self {
            sems: [Semaphore::CLOSED; MAX_SEMAPHORES],
        }
    }

    /// Open a new semaphore. Binary semaphores admit an initial count of
    /// at most one.
    pub fn alloc(
        &mut self,
        initial: u32,
        binary: bool,
        owner: ProcessId,
    ) -> Result<SemHandle, KernelError> {
        if binary && initial > 1 {
            return Err(KernelError::BadArgument);
        }
        for (i, slot) in self.sems.iter_mut().enumerate() {
            if !slot.open {
                *slot = Semaphore {
                    count: initial,
                    binary,
                    owner,
                    open: true,
                    waiters: HybridQueue::new(),
                };
                return Ok(SemHandle(i));
            }
        }
        Err(KernelError::PoolExhausted)
    }

    fn checked(&mut self, h: SemHandle, caller: ProcessId) -> Result<&mut Semaphore, KernelError> {
        let slot = self.sems.get_mut(h.0).ok_or(KernelError::BadArgument)?;
        if !slot.open {
            return Err(KernelError::ResourceNotOpen);
        }
        if slot.owner != caller {
            return Err(KernelError::ResourceNotOwned);
        }
        Ok(slot)
    }

    pub fn wait(
        &mut self,
        h: SemHandle,
        caller: ProcessId,
        sched: &mut Scheduler,
        elapsed_us: u64,
    ) -> Result<WaitOutcome, KernelError> {
        let sem = self.checked(h, caller)?;
        Ok(sem.wait(sched, elapsed_us))
    }

    pub fn post(
        &mut self,
        h: SemHandle,
        caller: ProcessId,
        sched: &mut Scheduler,
    ) -> Result<Option<TaskId>, KernelError> {
        let sem = self.checked(h, caller)?;
        Ok(sem.post(sched))
    }

    pub fn get_value(&mut self, h: SemHandle, caller: ProcessId) -> Result<i32, KernelError> {
        let sem = self.checked(h, caller)?;
        Ok(sem.value() as i32)
    }

    pub fn free(
        &mut self,
        h: SemHandle,
        caller: ProcessId,
        sched: &mut Scheduler,
    ) -> Result<(), KernelError> {
        let sem = self.checked(h, caller)?;
        sem.free(sched);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskLocation;
    use crate::task::{PeriodicParams, TaskAttrs};

    extern "C" fn noop_entry(_arg: usize) -> ! {
        loop {}
    }

    const OWNER: ProcessId = ProcessId(1);

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
            OWNER,
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
        s.create_aperiodic_task(name, OWNER, TaskAttrs::empty(), priority, noop_entry, 0, 512)
            .unwrap()
    }

    #[test]
    fn test_fast_path_decrements_without_blocking() {
        let mut sched = Scheduler::new();
        periodic(&mut sched, "a", 1_000, 1_000, 300, 0);
        sched.start();

        let mut t = SemTable::new();
        let h = t.alloc(2, false, OWNER).unwrap();
        assert_eq!(t.wait(h, OWNER, &mut sched, 10), Ok(WaitOutcome::Acquired));
        assert_eq!(t.get_value(h, OWNER), Ok(1));
        assert_eq!(t.wait(h, OWNER, &mut sched, 10), Ok(WaitOutcome::Acquired));
        assert_eq!(t.get_value(h, OWNER), Ok(0));
    }

    #[test]
    fn test_post_without_waiters_increments() {
        let mut sched = Scheduler::new();
        let mut t = SemTable::new();
        let h = t.alloc(0, false, OWNER).unwrap();
        assert_eq!(t.post(h, OWNER, &mut sched), Ok(None));
        assert_eq!(t.post(h, OWNER, &mut sched), Ok(None));
        assert_eq!(t.get_value(h, OWNER), Ok(2));

        // Binary semaphores saturate at one.
        let b = t.alloc(1, true, OWNER).unwrap();
        assert_eq!(t.post(b, OWNER, &mut sched), Ok(None));
        assert_eq!(t.get_value(b, OWNER), Ok(1));
    }

    #[test]
    fn test_wait_blocks_and_post_transfers_ownership() {
        let mut sched = Scheduler::new();
        let a = periodic(&mut sched, "a", 1_000, 1_000, 300, 0);
        let d = sched.start();
        assert_eq!(d.next, Some(a));

        let mut t = SemTable::new();
        let h = t.alloc(0, true, OWNER).unwrap();
        assert_eq!(t.wait(h, OWNER, &mut sched, 50), Ok(WaitOutcome::Blocked));
        assert_eq!(sched.current_task(), None);
        assert_eq!(sched.task_location(a), Some(TaskLocation::Blocked));

        let woken = t.post(h, OWNER, &mut sched).unwrap();
        assert_eq!(woken, Some(a));
        // The unit transferred directly to the woken task.
        assert_eq!(t.get_value(h, OWNER), Ok(0));
        assert_eq!(sched.task_location(a), Some(TaskLocation::Ready));
        assert_eq!(
            sched.tasks[a].pending,
            Some(Ok(0)),
            "normal post delivers success"
        );
    }

    #[test]
    fn test_post_wakes_earliest_deadline_periodic_waiter() {
        let mut sched = Scheduler::new();
        // Same period, different deadlines: d2 (1500) beats d1 (2000).
        let d1 = periodic(&mut sched, "d1", 2_000, 2_000, 300, 0);
        let d2 = periodic(&mut sched, "d2", 2_000, 1_500, 300, 0);
        let x = aperiodic(&mut sched, "x", 0);
        sched.start();

        let mut t = SemTable::new();
        let h = t.alloc(0, false, OWNER).unwrap();

        // d2 runs first (earlier deadline) and blocks; then d1; then the
        // aperiodic task. All three end up waiting on the same semaphore.
        assert_eq!(sched.current_task(), Some(d2));
        t.wait(h, OWNER, &mut sched, 10).unwrap();
        let d = sched.redispatch();
        assert_eq!(d.next, Some(d1));
        t.wait(h, OWNER, &mut sched, 10).unwrap();
        let d = sched.redispatch();
        assert_eq!(d.next, Some(x));
        t.wait(h, OWNER, &mut sched, 10).unwrap();

        // A single post wakes the earliest-deadline periodic waiter —
        // never d1, never the aperiodic task.
        let woken = t.post(h, OWNER, &mut sched).unwrap();
        assert_eq!(woken, Some(d2));
        assert_eq!(sched.task_location(d2), Some(TaskLocation::Ready));
        assert_eq!(sched.task_location(d1), Some(TaskLocation::Blocked));
    }

    #[test]
    fn test_post_prefers_unreleased_periodic_fallback_to_aperiodic() {
        let mut sched = Scheduler::new();
        // Short deadline, long period: after one blocked-sweep rotation
        // the waiter's next job lies in the future, making it ineligible.
        let a = periodic(&mut sched, "a", 2_000, 500, 200, 0);
        let x = aperiodic(&mut sched, "x", 3);
        sched.start();

        let mut t = SemTable::new();
        let h = t.alloc(0, false, OWNER).unwrap();
        assert_eq!(sched.current_task(), Some(a));
        t.wait(h, OWNER, &mut sched, 10).unwrap();
        let d = sched.redispatch();
        assert_eq!(d.next, Some(x));
        t.wait(h, OWNER, &mut sched, 10).unwrap();

        // t=500: a's would-be deadline passes; its next release is 2000.
        sched.on_interval_tick(0);
        assert_eq!(sched.tasks[a].periodic().job_release_us, 2_000);

        // The periodic waiter's job has not released: the aperiodic
        // waiter gets the unit instead.
        let woken = t.post(h, OWNER, &mut sched).unwrap();
        assert_eq!(woken, Some(x));
        assert_eq!(sched.task_location(x), Some(TaskLocation::AperiodicReady));
        assert_eq!(sched.task_location(a), Some(TaskLocation::Blocked));
    }

    #[test]
    fn test_free_drains_waiters_with_deleted_result() {
        let mut sched = Scheduler::new();
        let a = periodic(&mut sched, "a", 1_000, 1_000, 300, 0);
        let x = aperiodic(&mut sched, "x", 1);
        sched.start();

        let mut t = SemTable::new();
        let h = t.alloc(0, false, OWNER).unwrap();
        t.wait(h, OWNER, &mut sched, 0).unwrap();
        sched.redispatch();
        t.wait(h, OWNER, &mut sched, 0).unwrap();

        t.free(h, OWNER, &mut sched).unwrap();
        assert_eq!(
            sched.tasks[a].pending,
            Some(Err(KernelError::ResourceDeleted))
        );
        assert_eq!(
            sched.tasks[x].pending,
            Some(Err(KernelError::ResourceDeleted))
        );
        assert_eq!(sched.task_location(a), Some(TaskLocation::Ready));
        assert_eq!(sched.task_location(x), Some(TaskLocation::AperiodicReady));

        // The handle is dead afterwards.
        assert_eq!(
            t.get_value(h, OWNER),
            Err(KernelError::ResourceNotOpen)
        );
    }

    #[test]
    fn test_protocol_errors() {
        let mut sched = Scheduler::new();
        let mut t = SemTable::new();
        let h = t.alloc(1, false, OWNER).unwrap();

        assert_eq!(
            t.wait(SemHandle(999), OWNER, &mut sched, 0),
            Err(KernelError::BadArgument)
        );
        assert_eq!(
            t.post(h, ProcessId(9), &mut sched),
            Err(KernelError::ResourceNotOwned)
        );
        assert_eq!(t.alloc(2, true, OWNER), Err(KernelError::BadArgument));

        t.free(h, OWNER, &mut sched).unwrap();
        assert_eq!(
            t.post(h, OWNER, &mut sched),
            Err(KernelError::ResourceNotOpen)
        );
    }

    #[test]
    fn test_slots_are_reusable_and_bounded() {
        let mut sched = Scheduler::new();
        let mut t = SemTable::new();
        let mut handles = [SemHandle(0); MAX_SEMAPHORES];
        for h in handles.iter_mut() {
            *h = t.alloc(0, false, OWNER).unwrap();
        }
        assert_eq!(t.alloc(0, false, OWNER), Err(KernelError::PoolExhausted));

        t.free(handles[3], OWNER, &mut sched).unwrap();
        assert_eq!(t.alloc(5, false, OWNER), Ok(handles[3]));
    }
}
