//! # Syscall Dispatch
//!
//! Thin marshalling layer between task bodies and the kernel: a typed
//! request enum and a single `match`, dispatching into the scheduler and
//! the semaphore table. Same flat dispatch cost as an index-into-table,
//! without void-pointer argument marshalling.
//!
//! A call that blocks (`SemWait` on a contended semaphore) returns to the
//! arch layer with a fresh [`Dispatch`]; the blocked task's eventual
//! result is delivered through its pending-result slot when a post or
//! free resumes it, and read back by [`take_resumed_result`].

use crate::error::KernelError;
use crate::scheduler::{Dispatch, GlobalStats, Scheduler};
use crate::semaphore::{SemHandle, SemTable, WaitOutcome};
use crate::task::{PendingResult, TaskAttrs, TaskId, TaskStats};

/// A request from a task body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Yield,
    SemAlloc { initial: u32, binary: bool },
    SemWait(SemHandle),
    SemPost(SemHandle),
    SemFree(SemHandle),
    SemGetValue(SemHandle),
    /// Admin-only: per-task counters.
    TaskStats(TaskId),
    /// Admin-only: system-wide counters.
    GlobalStats,
}

/// Successful reply payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysReply {
    /// Nothing to report (yield, post, free, or a wait that blocked — the
    /// blocked wait's real result arrives through the pending slot).
    None,
    Sem(SemHandle),
    Value(i32),
    TaskStats(TaskStats),
    GlobalStats(GlobalStats),
}

/// Reply plus an optional rescheduling decision for the arch layer to
/// apply (budget timer programming and, when the task changed, a context
/// switch).
pub struct SyscallResult {
    pub reply: Result<SysReply, KernelError>,
    pub resched: Option<Dispatch>,
}

impl SyscallResult {
    fn done(reply: Result<SysReply, KernelError>) -> Self {
        Self {
            reply,
            resched: None,
        }
    }
}

/// Dispatch one syscall on behalf of the current task. `elapsed_us` is
/// the budget timer's elapsed reading at trap entry; it is consumed only
/// by paths that re-arm the timer (yield and a blocking wait).
pub fn dispatch(
    sched: &mut Scheduler,
    sems: &mut SemTable,
    call: Syscall,
    elapsed_us: u64,
) -> SyscallResult {
    let caller = match sched.current_task() {
        Some(id) => id,
        None => return SyscallResult::done(Err(KernelError::BadArgument)),
    };
    let owner = sched.tasks[caller].owner;
    let attrs = sched.tasks[caller].attrs;

    match call {
        Syscall::Yield => {
            let d = sched.yield_current(elapsed_us);
            SyscallResult {
                reply: Ok(SysReply::None),
                resched: Some(d),
            }
        }
        Syscall::SemAlloc { initial, binary } => {
            SyscallResult::done(sems.alloc(initial, binary, owner).map(SysReply::Sem))
        }
        Syscall::SemWait(h) => match sems.wait(h, owner, sched, elapsed_us) {
            Ok(WaitOutcome::Acquired) => SyscallResult::done(Ok(SysReply::None)),
            Ok(WaitOutcome::Blocked) => {
                let d = sched.redispatch();
                SyscallResult {
                    reply: Ok(SysReply::None),
                    resched: Some(d),
                }
            }
            Err(e) => SyscallResult::done(Err(e)),
        },
        Syscall::SemPost(h) => match sems.post(h, owner, sched) {
            Ok(_woken) => {
                let d = sched.redispatch();
                SyscallResult {
                    reply: Ok(SysReply::None),
                    resched: Some(d),
                }
            }
            Err(e) => SyscallResult::done(Err(e)),
        },
        Syscall::SemFree(h) => match sems.free(h, owner, sched) {
            Ok(()) => {
                let d = sched.redispatch();
                SyscallResult {
                    reply: Ok(SysReply::None),
                    resched: Some(d),
                }
            }
            Err(e) => SyscallResult::done(Err(e)),
        },
        Syscall::SemGetValue(h) => {
            SyscallResult::done(sems.get_value(h, owner).map(SysReply::Value))
        }
        Syscall::TaskStats(id) => {
            if !attrs.contains(TaskAttrs::SYSTEM) {
                return SyscallResult::done(Err(KernelError::ResourceNotOwned));
            }
            SyscallResult::done(sched.task_stats(id).map(SysReply::TaskStats))
        }
        Syscall::GlobalStats => {
            if !attrs.contains(TaskAttrs::SYSTEM) {
                return SyscallResult::done(Err(KernelError::ResourceNotOwned));
            }
            SyscallResult::done(Ok(SysReply::GlobalStats(sched.global_stats())))
        }
    }
}

/// Result delivery for a task resumed after blocking mid-syscall: the
/// trampoline calls this on the resumed task before returning to it.
pub fn take_resumed_result(sched: &mut Scheduler, id: TaskId) -> Option<PendingResult> {
    sched.tasks[id].take_pending()
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
