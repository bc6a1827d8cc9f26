//! # Task Record
//!
//! The per-task control structure. Every schedulable entity is either a
//! *periodic* task — released once per period, metered against a fixed CPU
//! budget and an absolute deadline — or an *aperiodic* task scheduled
//! purely by static priority whenever no periodic job is eligible.
//!
//! Records live in a fixed pool inside the scheduler; the slot index is
//! the task's identity and the embedded [`QueueNode`] lets the same record
//! sit in a deadline-sorted queue and an unordered wait list at once.
//! Slots are allocated once at creation time and never returned — a
//! completed aperiodic task parks on the done queue and keeps its slot.

use bitflags::bitflags;

use crate::config::STACK_SIZE;
use crate::error::KernelError;
use crate::queue::{Linked, QueueNode};

/// Pool-slot identity of a task.
pub type TaskId = usize;

/// Owning process of a task or semaphore. Process bookkeeping itself is
/// external to the kernel core; the scheduler only ever compares these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessId(pub u16);

/// Kernel's own process, owner of system tasks.
pub const KERNEL_PROCESS: ProcessId = ProcessId(0);

/// Task entry point. The argument is the creator-supplied word.
pub type TaskEntry = extern "C" fn(usize) -> !;

bitflags! {
    /// Attribute bits carried by every task.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskAttrs: u8 {
        /// Periodic (EDF-scheduled) rather than aperiodic.
        const PERIODIC = 1 << 0;
        /// System task: may call the admin-only statistics syscalls.
        const SYSTEM = 1 << 1;
        /// The built-in idle task; its CPU time is accounted as idle.
        const IDLE = 1 << 2;
    }
}

/// Per-task stack memory, aligned as required by the ARM AAPCS.
#[repr(align(8))]
pub struct TaskStack(pub [u8; STACK_SIZE]);

impl TaskStack {
    pub const fn zeroed() -> Self {
        Self([0u8; STACK_SIZE])
    }
}

// ---------------------------------------------------------------------------
// Scheduling-class state
// ---------------------------------------------------------------------------

/// Creation-time parameters of a periodic task, all in microseconds.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicParams {
    pub period_us: u64,
    /// Relative deadline, ≤ period.
    pub deadline_us: u64,
    /// Per-job CPU budget, ∈ [`MIN_BUDGET_US`, deadline].
    pub budget_us: u64,
    /// Offset from system start of the first release.
    pub phase_us: u64,
}

/// Mutable scheduling state of a periodic task.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicState {
    pub period_us: u64,
    pub deadline_us: u64,
    pub budget_us: u64,
    pub phase_us: u64,
    /// Budget left for the current job. Monotonically decreasing while the
    /// task runs; refilled to `budget_us` exactly once per job release.
    pub remaining_budget_us: u64,
    /// Absolute time of the current/next job's period start.
    pub job_release_us: u64,
    /// Completed or forcibly rotated jobs.
    pub exec_count: u32,
    /// Task-budget-exceeded events.
    pub tbe_count: u32,
    /// Deadline misses, including those accrued while blocked.
    pub dline_miss_count: u32,
}

impl PeriodicState {
    fn from_params(p: PeriodicParams) -> Self {
        Self {
            period_us: p.period_us,
            deadline_us: p.deadline_us,
            budget_us: p.budget_us,
            phase_us: p.phase_us,
            remaining_budget_us: p.budget_us,
            job_release_us: p.phase_us,
            exec_count: 0,
            tbe_count: 0,
            dline_miss_count: 0,
        }
    }

    /// Absolute deadline of the current job.
    #[inline]
    pub fn absolute_deadline_us(&self) -> u64 {
        self.job_release_us + self.deadline_us
    }

    /// Refill the job budget. Idempotent within one release.
    #[inline]
    pub fn refill_budget(&mut self) {
        self.remaining_budget_us = self.budget_us;
    }

    /// Advance to the next job. One period exactly, never skipped — K
    /// consecutive rotations leave `job_release_us` at
    /// `initial + K * period`.
    #[inline]
    pub fn advance_job(&mut self) {
        self.job_release_us += self.period_us;
    }
}

/// Mutable scheduling state of an aperiodic task.
#[derive(Debug, Clone, Copy)]
pub struct AperiodicState {
    /// Static priority; smaller values run first.
    pub priority: u32,
    /// Set when the task body finished; the record keeps its pool slot.
    pub completed: bool,
}

/// Scheduling class of a task.
#[derive(Debug, Clone, Copy)]
pub enum TaskClass {
    Periodic(PeriodicState),
    Aperiodic(AperiodicState),
}

impl TaskClass {
    #[inline]
    pub fn is_periodic(&self) -> bool {
        matches!(self, TaskClass::Periodic(_))
    }

    #[inline]
    pub fn as_periodic(&self) -> Option<&PeriodicState> {
        match self {
            TaskClass::Periodic(st) => Some(st),
            TaskClass::Aperiodic(_) => None,
        }
    }

    #[inline]
    pub fn as_periodic_mut(&mut self) -> Option<&mut PeriodicState> {
        match self {
            TaskClass::Periodic(st) => Some(st),
            TaskClass::Aperiodic(_) => None,
        }
    }

    #[inline]
    pub fn as_aperiodic(&self) -> Option<&AperiodicState> {
        match self {
            TaskClass::Aperiodic(st) => Some(st),
            TaskClass::Periodic(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// Statistics snapshot returned by the admin syscall. Aperiodic tasks
/// report zero for the periodic-only fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
    pub exec_count: u32,
    pub tbe_count: u32,
    pub dline_miss_count: u32,
    pub accumulated_budget_us: u64,
    pub period_us: u64,
    pub budget_us: u64,
}

/// Result delivered to a task that blocked mid-syscall and was later
/// resumed: `Ok` from a normal post, `Err(ResourceDeleted)` when the
/// resource it waited on was freed underneath it.
pub type PendingResult = Result<i32, KernelError>;

/// The per-task control structure.
pub struct TaskRecord {
    /// Pool slot index; doubles as the task's identity.
    pub id: TaskId,
    pub name: &'static str,
    pub attrs: TaskAttrs,
    /// Non-owning back-reference to the creating process.
    pub owner: ProcessId,
    pub class: TaskClass,
    /// Dual-ordering queue linkage.
    pub node: QueueNode,
    pub entry: Option<TaskEntry>,
    pub arg: usize,
    /// Saved PSP. Updated on every context switch; points into `stack`.
    pub stack_pointer: *mut u32,
    /// Stack bytes actually granted to the task, ≤ `STACK_SIZE`.
    pub stack_size: usize,
    pub stack: TaskStack,
    /// Lifetime CPU consumption in microseconds, periodic and aperiodic
    /// alike.
    pub accumulated_budget_us: u64,
    /// Result slot for a syscall the task blocked inside.
    pub pending: Option<PendingResult>,
    /// Whether this pool slot is allocated.
    pub active: bool,
}

// Safety: the raw stack pointer always points into the record's own stack
// array, and records are only touched inside critical sections or from
// interrupt context on a single core.
unsafe impl Send for TaskRecord {}
unsafe impl Sync for TaskRecord {}

impl Linked for TaskRecord {
    fn node(&self) -> &QueueNode {
        &self.node
    }
    fn node_mut(&mut self) -> &mut QueueNode {
        &mut self.node
    }
}

impl TaskRecord {
    /// An unallocated pool slot.
    pub const EMPTY: Self = Self {
        id: 0,
        name: "",
        attrs: TaskAttrs::empty(),
        owner: KERNEL_PROCESS,
        class: TaskClass::Aperiodic(AperiodicState {
            priority: u32::MAX,
            completed: false,
        }),
        node: QueueNode::new(),
        entry: None,
        arg: 0,
        stack_pointer: core::ptr::null_mut(),
        stack_size: 0,
        stack: TaskStack::zeroed(),
        accumulated_budget_us: 0,
        pending: None,
        active: false,
    };

    /// Populate this slot as a periodic task. Parameter validation is the
    /// scheduler's admission job; this only fills fields.
    #[allow(clippy::too_many_arguments)]
    pub fn init_periodic(
        &mut self,
        id: TaskId,
        name: &'static str,
        owner: ProcessId,
        attrs: TaskAttrs,
        params: PeriodicParams,
        entry: TaskEntry,
        arg: usize,
        stack_size: usize,
    ) {
        self.id = id;
        self.name = name;
        self.attrs = attrs | TaskAttrs::PERIODIC;
        self.owner = owner;
        self.class = TaskClass::Periodic(PeriodicState::from_params(params));
        self.node = QueueNode::new();
        self.entry = Some(entry);
        self.arg = arg;
        self.stack_pointer = core::ptr::null_mut();
        self.stack_size = stack_size;
        self.accumulated_budget_us = 0;
        self.pending = None;
        self.active = true;
    }

    /// Populate this slot as an aperiodic task.
    #[allow(clippy::too_many_arguments)]
    pub fn init_aperiodic(
        &mut self,
        id: TaskId,
        name: &'static str,
        owner: ProcessId,
        attrs: TaskAttrs,
        priority: u32,
        entry: TaskEntry,
        arg: usize,
        stack_size: usize,
    ) {
        self.id = id;
        self.name = name;
        self.attrs = attrs - TaskAttrs::PERIODIC;
        self.owner = owner;
        self.class = TaskClass::Aperiodic(AperiodicState {
            priority,
            completed: false,
        });
        self.node = QueueNode::new();
        self.entry = Some(entry);
        self.arg = arg;
        self.stack_pointer = core::ptr::null_mut();
        self.stack_size = stack_size;
        self.accumulated_budget_us = 0;
        self.pending = None;
        self.active = true;
    }

    /// Periodic state, or halt: callers reach this only on paths where the
    /// scheduler's queue discipline guarantees the class.
    pub fn periodic(&self) -> &PeriodicState {
        match &self.class {
            TaskClass::Periodic(st) => st,
            TaskClass::Aperiodic(_) => {
                panic!("task {}: periodic state requested on aperiodic task", self.id)
            }
        }
    }

    /// Mutable variant of [`TaskRecord::periodic`].
    pub fn periodic_mut(&mut self) -> &mut PeriodicState {
        match &mut self.class {
            TaskClass::Periodic(st) => st,
            TaskClass::Aperiodic(_) => {
                panic!("task {}: periodic state requested on aperiodic task", self.id)
            }
        }
    }

    /// Statistics snapshot for the admin syscall.
    pub fn stats(&self) -> TaskStats {
        match &self.class {
            TaskClass::Periodic(st) => TaskStats {
                exec_count: st.exec_count,
                tbe_count: st.tbe_count,
                dline_miss_count: st.dline_miss_count,
                accumulated_budget_us: self.accumulated_budget_us,
                period_us: st.period_us,
                budget_us: st.budget_us,
            },
            TaskClass::Aperiodic(_) => TaskStats {
                exec_count: 0,
                tbe_count: 0,
                dline_miss_count: 0,
                accumulated_budget_us: self.accumulated_budget_us,
                period_us: 0,
                budget_us: 0,
            },
        }
    }

    /// Take the result a post/free delivered while this task was blocked.
    pub fn take_pending(&mut self) -> Option<PendingResult> {
        self.pending.take()
    }
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

    const PARAMS: PeriodicParams = PeriodicParams {
        period_us: 1_000,
        deadline_us: 1_000,
        budget_us: 300,
        phase_us: 500,
    };

    #[test]
    fn test_empty_slot_is_inactive() {
        let t = TaskRecord::EMPTY;
        assert!(!t.active);
        assert!(t.entry.is_none());
        assert!(!t.node.is_priority_linked());
        assert!(!t.node.is_nonpriority_linked());
    }

    #[test]
    fn test_init_periodic_fields() {
        let mut t = TaskRecord::EMPTY;
        t.init_periodic(
            3,
            "sensor",
            ProcessId(7),
            TaskAttrs::SYSTEM,
            PARAMS,
            noop_entry,
            0xbeef,
            512,
        );
        assert!(t.active);
        assert_eq!(t.id, 3);
        assert_eq!(t.owner, ProcessId(7));
        assert!(t.attrs.contains(TaskAttrs::PERIODIC | TaskAttrs::SYSTEM));
        assert_eq!(t.arg, 0xbeef);
        let st = t.periodic();
        assert_eq!(st.job_release_us, 500);
        assert_eq!(st.remaining_budget_us, 300);
        assert_eq!(st.absolute_deadline_us(), 1_500);
    }

    #[test]
    fn test_job_rotation_arithmetic() {
        let mut st = PeriodicState::from_params(PARAMS);
        st.remaining_budget_us = 0;
        for _ in 0..4 {
            st.advance_job();
            st.refill_budget();
        }
        assert_eq!(st.job_release_us, 500 + 4 * 1_000);
        assert_eq!(st.remaining_budget_us, 300);
    }

    #[test]
    fn test_aperiodic_never_periodic() {
        let mut t = TaskRecord::EMPTY;
        t.init_aperiodic(
            1,
            "logger",
            KERNEL_PROCESS,
            TaskAttrs::empty(),
            4,
            noop_entry,
            0,
            512,
        );
        assert!(!t.attrs.contains(TaskAttrs::PERIODIC));
        assert_eq!(t.class.as_aperiodic().unwrap().priority, 4);
        assert!(t.class.as_periodic().is_none());
    }

    #[test]
    fn test_stats_snapshot() {
        let mut t = TaskRecord::EMPTY;
        t.init_periodic(
            0,
            "ctl",
            KERNEL_PROCESS,
            TaskAttrs::empty(),
            PARAMS,
            noop_entry,
            0,
            512,
        );
        t.accumulated_budget_us = 1234;
        {
            let st = t.periodic_mut();
            st.exec_count = 9;
            st.tbe_count = 2;
            st.dline_miss_count = 1;
        }
        let s = t.stats();
        assert_eq!(s.exec_count, 9);
        assert_eq!(s.tbe_count, 2);
        assert_eq!(s.dline_miss_count, 1);
        assert_eq!(s.accumulated_budget_us, 1234);
        assert_eq!(s.period_us, 1_000);
        assert_eq!(s.budget_us, 300);
    }

    #[test]
    fn test_pending_result_roundtrip() {
        let mut t = TaskRecord::EMPTY;
        assert!(t.take_pending().is_none());
        t.pending = Some(Err(KernelError::ResourceDeleted));
        assert_eq!(t.take_pending(), Some(Err(KernelError::ResourceDeleted)));
        assert!(t.take_pending().is_none());
    }
}
