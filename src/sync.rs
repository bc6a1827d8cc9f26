//! # Critical Sections
//!
//! Interrupt-masked execution for the Cortex-M4. Every mutation of the
//! scheduler's queues, the virtual clock or the semaphore table that is
//! reachable from interrupt context must run inside a critical section for
//! its entire duration: a queue caught half-spliced by a timer interrupt
//! would corrupt the shared ready/wait structures. The lock is never held
//! across a context switch — handlers finish their queue work first, then
//! pend the switch.

use cortex_m::interrupt;

/// Execute a closure with interrupts disabled.
///
/// This is the single global scheduler lock: one critical section guards
/// the whole kernel state. Interrupts are disabled on entry and restored
/// on exit.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // Mutate kernel state safely
/// });
/// ```
///
/// # Performance
/// Keep sections short — the longest one bounds interrupt latency, which
/// feeds straight into the scheduler-latency statistic.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}
