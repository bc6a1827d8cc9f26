//! # Kernel Error Taxonomy
//!
//! Synchronous error values returned from task admission and the syscall
//! surface. Runtime scheduling faults (budget exceeded, deadline miss) are
//! NOT errors — they are recorded as per-task counters and handled by
//! forced job rotation. Fatal invariant violations (a corrupted scheduler
//! queue) halt the system via `panic!`; there is no recovery path, since a
//! corrupted queue cannot be trusted to keep making timing decisions.

/// Errors surfaced synchronously to a task creator or syscall caller.
/// No kernel state is mutated when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Period is zero or not a multiple of the tick granularity.
    InvalidPeriod,
    /// Deadline is zero or exceeds the period.
    InvalidDeadline,
    /// Budget is below the configured minimum or exceeds the deadline.
    InvalidBudget,
    /// Phase is not a multiple of the tick granularity.
    InvalidPhase,
    /// Requested stack is below the minimum or above the per-task slot.
    StackTooSmall,
    /// The fixed task or semaphore pool has no free slot.
    PoolExhausted,
    /// Admitting the task would push aggregate utilization to 1.0 or above.
    ExceedsMaxCpu,
    /// Handle or parameter out of range.
    BadArgument,
    /// The semaphore handle does not refer to an open semaphore.
    ResourceNotOpen,
    /// The resource is owned by a different process, or the caller lacks
    /// the system attribute required for an admin-only call.
    ResourceNotOwned,
    /// The resource was freed while the caller was blocked on it.
    ResourceDeleted,
}

impl KernelError {
    /// Numeric syscall return code. User-mode callers see these as
    /// negative values; success is zero or a positive payload.
    pub const fn code(self) -> i32 {
        match self {
            KernelError::InvalidPeriod => -1,
            KernelError::InvalidDeadline => -2,
            KernelError::InvalidBudget => -3,
            KernelError::InvalidPhase => -4,
            KernelError::StackTooSmall => -5,
            KernelError::PoolExhausted => -6,
            KernelError::ExceedsMaxCpu => -7,
            KernelError::BadArgument => -8,
            KernelError::ResourceNotOpen => -9,
            KernelError::ResourceNotOwned => -10,
            KernelError::ResourceDeleted => -11,
        }
    }
}
