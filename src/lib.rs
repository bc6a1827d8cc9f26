//! # EdfOS — an Earliest-Deadline-First RTOS for ARM Cortex-M4
//!
//! EdfOS schedules hard-real-time *periodic* tasks by Earliest Deadline
//! First and background *aperiodic* tasks by static priority, with every
//! periodic job metered against a fixed CPU budget. Two hardware timers
//! drive the kernel:
//!
//! - the **periodic-interval timer** fires at the fixed system
//!   granularity and admits newly released jobs;
//! - the **one-shot budget timer** fires at the earlier of "job out of
//!   budget" or "job past its deadline" and forces the job's rotation.
//!
//! A job that overruns is never killed: it loses the rest of its current
//! execution window, its counters record the event, and its next job
//! starts on schedule with a fresh budget.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Application Tasks                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  Kernel API (kernel.rs)                      │
//! │   init() · create_*_task() · start() · task_yield() · sem_* │
//! ├──────────────────┬──────────────────────┬───────────────────┤
//! │  Syscall enum    │   Scheduler Core     │  Semaphores       │
//! │  syscall.rs      │   scheduler.rs       │  semaphore.rs     │
//! │  ─ dispatch()    │   ─ on_interval_tick │  ─ wait()/post()  │
//! │                  │   ─ on_budget_timer  │  ─ free()         │
//! │                  │   ─ yield/block      │                   │
//! ├──────────────────┴──────────────────────┴───────────────────┤
//! │        Task Record (task.rs) · Hybrid Queue (queue.rs)       │
//! │        Timer contracts + virtual clock (timer.rs)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │             Arch Port (arch/cortex_m4.rs)                    │
//! │   PendSV · SysTick interval · TIM2 one-shot · Stack Init    │
//! ├─────────────────────────────────────────────────────────────┤
//! │            ARM Cortex-M4 Hardware (Thumb-2)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! Periodic tasks declare `(period, deadline ≤ period, budget ≤ deadline,
//! phase)`, all in microseconds, with period and phase exact multiples of
//! the tick granularity. Admission enforces
//! `Σ budget / min(period, deadline) < 1.0`; a task set under that bound
//! that yields within budget never misses a deadline.
//!
//! Aperiodic tasks run only when no periodic job is eligible — a strict
//! two-level hierarchy, not a blended one — ordered by static priority
//! (smaller value first, FIFO among equals).
//!
//! One hybrid queue structure underlies every list in the kernel: each
//! task record embeds a node that can sit in one key-sorted list and one
//! unordered list simultaneously, so a task blocked on a semaphore is
//! tracked by the semaphore's wait list and the scheduler's blocked queue
//! at once, without allocation.
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed pools**: `[TaskRecord; MAX_TASKS]`, `[Semaphore; MAX_SEMAPHORES]`
//! - **Per-task stack**: `[u8; STACK_SIZE]` inline in the record
//! - **One lock**: `cortex_m::interrupt::free()` guards all kernel state

#![no_std]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod queue;
pub mod scheduler;
pub mod semaphore;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod timer;
