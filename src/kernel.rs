//! # Kernel
//!
//! Top-level kernel state and the public firmware API. The kernel bundles
//! the scheduler and the semaphore table into one global instance guarded
//! by a single critical-section lock; the arch layer's interrupt handlers
//! reach it through `KERNEL_PTR`.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()                  ← Global state
//!         ├─► kernel::create_periodic_task()  ← Admit tasks (×N)
//!         ├─► kernel::create_aperiodic_task()
//!         └─► kernel::start()                 ← Launch (no return)
//!               ├─► Install the idle task
//!               ├─► Configure interval + budget timers
//!               └─► arch::start_first_task()
//! ```

use crate::arch;
use crate::error::KernelError;
use crate::scheduler::{GlobalStats, Scheduler};
use crate::semaphore::{SemHandle, SemTable};
use crate::sync;
use crate::syscall::{self, SysReply, Syscall};
use crate::task::{PeriodicParams, ProcessId, TaskAttrs, TaskEntry, TaskId, TaskStats};

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// The whole kernel state: scheduler, semaphore table, and the identity of
/// the task whose context is live on the CPU (which lags the scheduler's
/// selection until the pended context switch runs).
pub struct Kernel {
    pub sched: Scheduler,
    pub sems: SemTable,
    pub running: Option<TaskId>,
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            sched: Scheduler::new(),
            sems: SemTable::new(),
            running: None,
        }
    }
}

/// Global kernel instance.
///
/// # Safety
/// Accessed via `KERNEL_PTR`, set once during `init()`. All access is
/// inside critical sections or from interrupt context, where interrupts
/// are serialized by priority on a single core.
static mut KERNEL: Kernel = Kernel::new();

/// Raw pointer to the global kernel, for the arch layer's handlers.
///
/// # Safety
/// Set once during `init()`, read from ISR context afterwards.
#[no_mangle]
pub static mut KERNEL_PTR: *mut Kernel = core::ptr::null_mut();

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel. Must be called exactly once, before any other
/// kernel function. The kernel state itself is statically initialized;
/// this only publishes the pointer the interrupt handlers use.
pub fn init() {
    unsafe {
        KERNEL_PTR = core::ptr::addr_of_mut!(KERNEL);
    }
}

/// Admit a periodic task: released every `params.period_us`, metered
/// against `params.budget_us` of CPU per job and an absolute deadline of
/// release + `params.deadline_us`.
pub fn create_periodic_task(
    name: &'static str,
    owner: ProcessId,
    params: PeriodicParams,
    entry: TaskEntry,
    arg: usize,
    stack_size: usize,
) -> Result<TaskId, KernelError> {
    sync::critical_section(|_cs| unsafe {
        let k = &mut *KERNEL_PTR;
        let id = k.sched.create_periodic_task(
            name,
            owner,
            TaskAttrs::empty(),
            params,
            entry,
            arg,
            stack_size,
        )?;
        arch::init_task_stack(&mut k.sched.tasks[id]);
        Ok(id)
    })
}

/// Admit an aperiodic task scheduled by static priority (smaller value =
/// higher priority) whenever no periodic job is eligible.
pub fn create_aperiodic_task(
    name: &'static str,
    owner: ProcessId,
    priority: u32,
    entry: TaskEntry,
    arg: usize,
    stack_size: usize,
) -> Result<TaskId, KernelError> {
    sync::critical_section(|_cs| unsafe {
        let k = &mut *KERNEL_PTR;
        let id = k.sched.create_aperiodic_task(
            name,
            owner,
            TaskAttrs::empty(),
            priority,
            entry,
            arg,
            stack_size,
        )?;
        arch::init_task_stack(&mut k.sched.tasks[id]);
        Ok(id)
    })
}

/// Start the scheduler. **Does not return.**
///
/// Installs the built-in idle task, releases every phase-zero job,
/// configures both hardware timers and launches the first task.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(core_peripherals: cortex_m::Peripherals) -> ! {
    use crate::config::{MIN_STACK_SIZE, TICK_PERIOD_US};
    use crate::task::KERNEL_PROCESS;
    use crate::timer::IntervalTimer;

    let first_sp = sync::critical_section(|_cs| unsafe {
        let k = &mut *KERNEL_PTR;
        let idle = match k.sched.create_aperiodic_task(
            "idle",
            KERNEL_PROCESS,
            TaskAttrs::SYSTEM | TaskAttrs::IDLE,
            u32::MAX,
            idle_task,
            0,
            MIN_STACK_SIZE,
        ) {
            Ok(id) => id,
            Err(e) => panic!("idle task admission failed: {:?}", e),
        };
        arch::init_task_stack(&mut k.sched.tasks[idle]);

        let d = k.sched.start();
        arch::apply_dispatch(&d);
        let id = match d.next {
            Some(id) => id,
            None => idle,
        };
        k.running = Some(id);
        k.sched.tasks[id].stack_pointer as *const u32
    });

    let mut interval = arch::cortex_m4::SysTickInterval::new(core_peripherals.SYST);
    interval.start(TICK_PERIOD_US);
    arch::cortex_m4::init_budget_timer();
    arch::cortex_m4::set_interrupt_priorities();

    unsafe { arch::cortex_m4::start_first_task(first_sp) }
}

/// The built-in idle task: lowest aperiodic priority, sleeps the core.
#[cfg(all(target_arch = "arm", target_os = "none"))]
extern "C" fn idle_task(_arg: usize) -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Create a semaphore during system setup, before the scheduler starts.
/// Task bodies use the `SemAlloc` syscall instead.
pub fn sem_create(
    initial: u32,
    binary: bool,
    owner: ProcessId,
) -> Result<SemHandle, KernelError> {
    sync::critical_section(|_cs| unsafe {
        let k = &mut *KERNEL_PTR;
        k.sems.alloc(initial, binary, owner)
    })
}

// ---------------------------------------------------------------------------
// Syscall surface
// ---------------------------------------------------------------------------

/// Execute one syscall on behalf of the current task: dispatch under the
/// kernel lock, apply any rescheduling decision, and pend the context
/// switch if the selected task changed.
pub fn syscall(call: Syscall) -> Result<SysReply, KernelError> {
    sync::critical_section(|_cs| unsafe {
        let k = &mut *KERNEL_PTR;
        let elapsed = arch::budget_elapsed_us();
        let r = syscall::dispatch(&mut k.sched, &mut k.sems, call, elapsed);
        if let Some(d) = r.resched {
            arch::apply_dispatch(&d);
            if d.next != k.running {
                arch::request_context_switch();
            }
        }
        r.reply
    })
}

/// Voluntarily end the current job's work for this period. The primary
/// cooperative mechanism: this is how a periodic job finishes early.
pub fn task_yield() {
    let _ = syscall(Syscall::Yield);
}

pub fn sem_alloc(initial: u32, binary: bool) -> Result<SemHandle, KernelError> {
    match syscall(Syscall::SemAlloc { initial, binary })? {
        SysReply::Sem(h) => Ok(h),
        _ => Err(KernelError::BadArgument),
    }
}

pub fn sem_wait(h: SemHandle) -> Result<(), KernelError> {
    syscall(Syscall::SemWait(h)).map(|_| ())
}

pub fn sem_post(h: SemHandle) -> Result<(), KernelError> {
    syscall(Syscall::SemPost(h)).map(|_| ())
}

pub fn sem_free(h: SemHandle) -> Result<(), KernelError> {
    syscall(Syscall::SemFree(h)).map(|_| ())
}

pub fn sem_get_value(h: SemHandle) -> Result<i32, KernelError> {
    match syscall(Syscall::SemGetValue(h))? {
        SysReply::Value(v) => Ok(v),
        _ => Err(KernelError::BadArgument),
    }
}

/// Admin-only: per-task scheduling counters.
pub fn get_task_stat_counters(id: TaskId) -> Result<TaskStats, KernelError> {
    match syscall(Syscall::TaskStats(id))? {
        SysReply::TaskStats(s) => Ok(s),
        _ => Err(KernelError::BadArgument),
    }
}

/// Admin-only: system-wide counters.
pub fn get_global_stat_counters() -> Result<GlobalStats, KernelError> {
    match syscall(Syscall::GlobalStats)? {
        SysReply::GlobalStats(s) => Ok(s),
        _ => Err(KernelError::BadArgument),
    }
}
