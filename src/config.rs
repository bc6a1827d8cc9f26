//! # EdfOS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time — no dynamic allocation.

use static_assertions::const_assert;

/// Maximum number of tasks the system can manage simultaneously.
/// This bounds the static task pool. Increase with care — each task
/// consumes `STACK_SIZE` bytes of RAM.
pub const MAX_TASKS: usize = 8;

/// Maximum number of semaphores in the fixed semaphore table.
pub const MAX_SEMAPHORES: usize = 8;

/// Period of the periodic-interval timer in microseconds. This is the
/// system-wide minimum schedulable granularity: every task period and
/// phase must be an exact multiple of it.
pub const TICK_PERIOD_US: u64 = 500;

/// Minimum per-job budget in microseconds. Budgets below this would make
/// the budget-timer interrupt overhead comparable to the useful work it
/// meters.
pub const MIN_BUDGET_US: u64 = 100;

/// Admission-control scale: utilization is accounted in parts per million,
/// and the aggregate `Σ budget / min(period, deadline)` must stay strictly
/// below this value (i.e. below 1.0).
pub const UTILIZATION_SCALE: u64 = 1_000_000;

/// Per-task stack size in bytes. Must be large enough for the deepest
/// call chain plus the hardware exception frame (32 bytes) and the
/// software-saved context (32 bytes for R4–R11).
pub const STACK_SIZE: usize = 1024;

/// Minimum stack a creator may request: exception frame, software-saved
/// context, and call headroom.
pub const MIN_STACK_SIZE: usize = 256;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// APB1 timer clock in Hz, feeding the one-shot budget timer (TIM2).
/// With no APB prescaler this equals the system clock.
pub const APB1_TIMER_CLOCK_HZ: u32 = SYSTEM_CLOCK_HZ;

const_assert!(MIN_BUDGET_US > 0);
const_assert!(MIN_BUDGET_US <= TICK_PERIOD_US);
const_assert!(MIN_STACK_SIZE <= STACK_SIZE);
// The budget timer counts whole microseconds; the core clock must divide
// down to a 1 MHz timer tick exactly.
const_assert!(APB1_TIMER_CLOCK_HZ % 1_000_000 == 0);
