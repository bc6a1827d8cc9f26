//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! context switching via PendSV, the SysTick-based periodic-interval
//! timer, the TIM2-based one-shot budget timer, stack frame construction
//! and interrupt priorities.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): tasks in Thread mode
//!
//! On exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR
//! onto the process stack; the PendSV handler saves and restores R4–R11,
//! completing the context. The scheduling *decision* is made earlier, in
//! the timer handlers or the syscall path — PendSV only moves the CPU to
//! the task the scheduler already selected.
//!
//! ## Timers
//!
//! SysTick fires every `TICK_PERIOD_US` and drives job admission and the
//! deadline sweeps. TIM2 (32-bit, 1 MHz tick) is re-armed one-shot at
//! every dispatch and doubles as the elapsed-execution meter. TIM2's
//! interrupt (IRQ 28 on STM32F4) must be routed to the `TIM2` symbol by
//! the target's vector table, as device crates' `device.x` does.
//!
//! ## Interrupt Priorities
//!
//! SysTick, TIM2 and PendSV all run at the lowest priority: handlers
//! never preempt each other, so the kernel state they touch is serialized
//! without extra locking, and PendSV runs only once no other ISR is
//! active.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{APB1_TIMER_CLOCK_HZ, STACK_SIZE, SYSTEM_CLOCK_HZ};
use crate::kernel::KERNEL_PTR;
use crate::scheduler::{BudgetArm, Dispatch};
use crate::task::TaskRecord;
use crate::timer::{BudgetTimer, IntervalTimer};

// ---------------------------------------------------------------------------
// SysTick: periodic-interval timer
// ---------------------------------------------------------------------------

/// SysTick viewed through the interval-timer contract.
pub struct SysTickInterval {
    syst: cortex_m::peripheral::SYST,
}

impl SysTickInterval {
    pub fn new(syst: cortex_m::peripheral::SYST) -> Self {
        Self { syst }
    }
}

impl IntervalTimer for SysTickInterval {
    fn start(&mut self, period_us: u64) {
        let ticks_per_us = SYSTEM_CLOCK_HZ / 1_000_000;
        let reload = ticks_per_us * period_us as u32 - 1;
        self.syst.set_reload(reload);
        self.syst.clear_current();
        self.syst.set_clock_source(SystClkSource::Core);
        self.syst.enable_counter();
        self.syst.enable_interrupt();
    }

    fn ack(&mut self) {
        // COUNTFLAG clears on CSR read and the exception pend bit clears
        // on handler entry; nothing further to do.
    }
}

// ---------------------------------------------------------------------------
// TIM2: one-shot budget timer
// ---------------------------------------------------------------------------

const TIM2_BASE: usize = 0x4000_0000;
const TIM2_CR1: *mut u32 = TIM2_BASE as *mut u32;
const TIM2_DIER: *mut u32 = (TIM2_BASE + 0x0C) as *mut u32;
const TIM2_SR: *mut u32 = (TIM2_BASE + 0x10) as *mut u32;
const TIM2_EGR: *mut u32 = (TIM2_BASE + 0x14) as *mut u32;
const TIM2_CNT: *mut u32 = (TIM2_BASE + 0x24) as *mut u32;
const TIM2_PSC: *mut u32 = (TIM2_BASE + 0x28) as *mut u32;
const TIM2_ARR: *mut u32 = (TIM2_BASE + 0x2C) as *mut u32;

/// RCC APB1 peripheral clock enable; bit 0 gates TIM2.
const RCC_APB1ENR: *mut u32 = 0x4002_3840 as *mut u32;

const CR1_CEN: u32 = 1 << 0;
const CR1_URS: u32 = 1 << 2;
const CR1_OPM: u32 = 1 << 3;
const SR_UIF: u32 = 1 << 0;
const DIER_UIE: u32 = 1 << 0;

/// Timeout last armed, reported as the elapsed value once the one-shot
/// has expired (the hardware counter stops at the update event).
static mut BUDGET_ARMED_US: u64 = 0;

/// Bring TIM2 up as a stopped 1 MHz one-shot counter.
pub fn init_budget_timer() {
    unsafe {
        let enr = core::ptr::read_volatile(RCC_APB1ENR);
        core::ptr::write_volatile(RCC_APB1ENR, enr | 1);

        core::ptr::write_volatile(TIM2_CR1, CR1_OPM | CR1_URS);
        core::ptr::write_volatile(TIM2_PSC, APB1_TIMER_CLOCK_HZ / 1_000_000 - 1);
        core::ptr::write_volatile(TIM2_DIER, DIER_UIE);
    }
}

/// Largest timeout TIM2 can represent: its counter is 32 bits wide.
pub fn budget_max_timeout_us() -> u64 {
    u32::MAX as u64
}

/// Arm the one-shot: reset the count, load the timeout, start.
pub fn arm_budget_timer(timeout_us: u64) {
    let ticks = timeout_us.min(budget_max_timeout_us()) as u32;
    unsafe {
        let cr1 = core::ptr::read_volatile(TIM2_CR1);
        core::ptr::write_volatile(TIM2_CR1, cr1 & !CR1_CEN);
        core::ptr::write_volatile(TIM2_ARR, ticks);
        // UG reloads the prescaler and zeroes the count; URS keeps it from
        // raising an interrupt of its own.
        core::ptr::write_volatile(TIM2_EGR, 1);
        core::ptr::write_volatile(TIM2_SR, 0);
        BUDGET_ARMED_US = timeout_us.min(budget_max_timeout_us());
        core::ptr::write_volatile(TIM2_CR1, cr1 | CR1_CEN);
    }
}

/// Microseconds since the budget timer was last armed. After expiry the
/// counter has stopped; the armed timeout is the elapsed value.
pub fn budget_elapsed_us() -> u64 {
    unsafe {
        let cr1 = core::ptr::read_volatile(TIM2_CR1);
        if cr1 & CR1_CEN == 0 {
            BUDGET_ARMED_US
        } else {
            core::ptr::read_volatile(TIM2_CNT) as u64
        }
    }
}

/// Acknowledge a pending TIM2 update interrupt. Status bits clear on
/// write-zero; the rest are left untouched.
pub fn ack_budget_timer() {
    unsafe {
        core::ptr::write_volatile(TIM2_SR, !SR_UIF);
    }
}

/// TIM2 viewed through the budget-timer contract.
pub struct Tim2Budget;

impl BudgetTimer for Tim2Budget {
    fn arm(&mut self, timeout_us: u64) {
        arm_budget_timer(timeout_us)
    }
    fn elapsed_us(&self) -> u64 {
        budget_elapsed_us()
    }
    fn max_timeout_us(&self) -> u64 {
        budget_max_timeout_us()
    }
    fn ack(&mut self) {
        ack_budget_timer()
    }
}

/// Program the budget timer from a dispatch decision.
pub fn apply_dispatch(d: &Dispatch) {
    let mut timer = Tim2Budget;
    match d.arm {
        BudgetArm::OneShot(us) => timer.arm(us),
        BudgetArm::MaxTimeout => {
            let max = timer.max_timeout_us();
            timer.arm(max)
        }
    }
}

// ---------------------------------------------------------------------------
// PendSV trigger and interrupt priorities
// ---------------------------------------------------------------------------

/// Pend a context switch. PendSV runs at the lowest priority, once no
/// other handler is active.
#[inline]
pub fn request_context_switch() {
    // ICSR address: 0xE000_ED04, PENDSVSET = bit 28
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

/// Set PendSV, SysTick and TIM2 to the lowest interrupt priority.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority, [31:24] = SysTick priority.
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        core::ptr::write_volatile(shpr3, val | (0xFF << 16) | (0xFF << 24));

        // NVIC IPR7 byte 0 holds IRQ 28 (TIM2 on STM32F4).
        let ipr7: *mut u32 = (0xE000_E400 + 28) as *mut u32;
        let val = core::ptr::read_volatile(ipr7);
        core::ptr::write_volatile(ipr7, val | 0xFF);

        // NVIC ISER0 bit 28: enable the TIM2 interrupt.
        let iser0: *mut u32 = 0xE000_E100 as *mut u32;
        core::ptr::write_volatile(iser0, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// Stack frame construction
// ---------------------------------------------------------------------------

/// Pre-populate a task's stack with the frame a PendSV return expects.
///
/// The hardware restores R0–R3, R12, LR, PC and xPSR on exception exit;
/// PendSV itself pops R4–R11 first. The entry function receives the
/// task's argument word in R0.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_exit)
///   R12   (0)
///   R3    (0)
///   R2    (0)
///   R1    (0)
///   R0    (task argument)
/// [Software saved context]
///   R11 … R4 (0)           <- stack_pointer after init
/// ```
pub fn init_task_stack(task: &mut TaskRecord) {
    let entry = match task.entry {
        Some(f) => f,
        None => panic!("task {}: stack built before entry was set", task.id),
    };
    let stack_top = task.stack.0.as_ptr() as usize + STACK_SIZE;
    // Align to 8 bytes (AAPCS requirement)
    let aligned_top = stack_top & !0x07;
    // 16 registers: 8 hardware-stacked + 8 software-saved
    let frame_ptr = (aligned_top - 16 * 4) as *mut u32;

    unsafe {
        // Software-saved registers R4–R11
        for i in 0..8 {
            *frame_ptr.add(i) = 0;
        }
        *frame_ptr.add(8) = task.arg as u32; // R0 — entry argument
        *frame_ptr.add(9) = 0; // R1
        *frame_ptr.add(10) = 0; // R2
        *frame_ptr.add(11) = 0; // R3
        *frame_ptr.add(12) = 0; // R12
        *frame_ptr.add(13) = task_exit as u32; // LR
        *frame_ptr.add(14) = entry as u32; // PC
        *frame_ptr.add(15) = 0x0100_0000; // xPSR — Thumb bit
    }

    task.stack_pointer = frame_ptr;
}

/// Landing pad for an aperiodic task body that returns: park the record
/// on the done queue and hand the CPU on. Periodic bodies never return.
extern "C" fn task_exit() -> ! {
    crate::sync::critical_section(|_cs| unsafe {
        let k = &mut *KERNEL_PTR;
        let d = k.sched.complete_current();
        apply_dispatch(&d);
        request_context_switch();
    });
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Switch Thread mode onto the PSP and branch into the first task.
/// Called once from `kernel::start()`; never returns.
///
/// # Safety
/// Must only be called once, with a stack pointer produced by
/// `init_task_stack`.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the software-saved R4-R11 (8 x 4 bytes)
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Pop the hardware frame manually; this is not an exception return
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR slot (task_exit; bodies are noreturn)
        "pop {{r5}}",          // PC - task entry
        "pop {{r6}}",          // xPSR (discarded)

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the context switch to the task the
/// scheduler selected.
///
/// 1. Save R4–R11 onto the outgoing task's process stack
/// 2. Store the PSP into the outgoing task's record
/// 3. Fetch the selected task's saved PSP
/// 4. Restore R4–R11 and resume it via exception return
///
/// # Safety
/// Called only by the NVIC; follows the Cortex-M4 exception ABI exactly.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        "bl {save_context}",   // save_outgoing_context(psp)
        "bl {next_context}",   // returns the incoming PSP in r0

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        // Return to Thread mode on the process stack
        "ldr r0, =0xFFFFFFFD",
        "bx r0",

        save_context = sym save_outgoing_context,
        next_context = sym next_task_context,
    );
}

/// Store the outgoing task's stack pointer. Called from PendSV.
///
/// # Safety
/// Assembly context, interrupts effectively serialized at lowest priority.
#[no_mangle]
unsafe extern "C" fn save_outgoing_context(psp: *mut u32) {
    let k = &mut *KERNEL_PTR;
    if let Some(id) = k.running {
        k.sched.tasks[id].stack_pointer = psp;
    }
}

/// Hand back the stack pointer of the task the scheduler selected, and
/// record it as the running task. Called from PendSV.
///
/// # Safety
/// Assembly context; the dispatcher guarantees a selected task exists
/// whenever a switch is pended (the idle task backstops every decision).
#[no_mangle]
unsafe extern "C" fn next_task_context() -> *mut u32 {
    let k = &mut *KERNEL_PTR;
    let id = match k.sched.current_task() {
        Some(id) => id,
        None => panic!("context switch pended with no selected task"),
    };
    k.running = Some(id);
    k.sched.tasks[id].stack_pointer
}

// ---------------------------------------------------------------------------
// Timer interrupt handlers
// ---------------------------------------------------------------------------

/// SysTick handler: the periodic-interval timer tick.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    let k = &mut *KERNEL_PTR;
    let entry_elapsed = budget_elapsed_us();

    let d = k.sched.on_interval_tick(entry_elapsed);

    // Handler time spent deciding, measured before the re-arm resets the
    // meter.
    let latency = budget_elapsed_us().saturating_sub(entry_elapsed);
    k.sched.record_scheduler_latency(latency);

    apply_dispatch(&d);
    if d.next != k.running {
        request_context_switch();
    }
}

/// TIM2 handler: the running job exhausted its budget or crossed its
/// deadline.
#[no_mangle]
pub unsafe extern "C" fn TIM2() {
    let k = &mut *KERNEL_PTR;
    ack_budget_timer();
    let entry_elapsed = budget_elapsed_us();

    let d = k.sched.on_budget_timer(entry_elapsed);

    let latency = budget_elapsed_us().saturating_sub(entry_elapsed);
    k.sched.record_scheduler_latency(latency);

    apply_dispatch(&d);
    if d.next != k.running {
        request_context_switch();
    }
}
