//! # EdfOS Example Firmware
//!
//! Demonstrates the EDF kernel with a small mixed task set:
//!
//! | Task        | Class     | Parameters                           | Behavior                      |
//! |-------------|-----------|--------------------------------------|-------------------------------|
//! | `sample`    | Periodic  | period 1ms, deadline 1ms, budget 300µs | samples, posts a semaphore  |
//! | `control`   | Periodic  | period 2ms, deadline 1.5ms, budget 400µs | control-loop work         |
//! | `consumer`  | Aperiodic | priority 2                           | drains the sample semaphore   |
//! | `background`| Aperiodic | priority 8                           | housekeeping, yields often    |
//!
//! Utilization is 0.3 + 0.267 = 0.567, comfortably under the admission
//! bound: with both periodic bodies yielding within budget, the counters
//! read back by a system task would show zero TBE and zero deadline
//! misses, while the consumer runs in the slack.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use cortex_m_rt::entry;
    use panic_halt as _;

    use edfos::kernel;
    use edfos::semaphore::SemHandle;
    use edfos::task::{PeriodicParams, ProcessId};

    const APP: ProcessId = ProcessId(1);

    /// Handle of the samples semaphore, fixed at startup before the
    /// scheduler runs.
    static mut SAMPLES: SemHandle = SemHandle(0);

    /// **Sampler** — periodic, 1 ms period. Reads a sensor (simulated),
    /// posts one unit per job, yields well inside its 300 µs budget.
    extern "C" fn sample_task(_arg: usize) -> ! {
        loop {
            let mut _acc: u32 = 0;
            for i in 0..400u32 {
                _acc = _acc.wrapping_add(i);
            }
            let h = unsafe { SAMPLES };
            let _ = kernel::sem_post(h);
            kernel::task_yield();
        }
    }

    /// **Control loop** — periodic, 2 ms period, 1.5 ms deadline. Heavier
    /// computation, still bounded by its 400 µs budget.
    extern "C" fn control_task(_arg: usize) -> ! {
        loop {
            let mut _acc: u32 = 1;
            for i in 1..900u32 {
                _acc = _acc.wrapping_mul(i | 1);
            }
            kernel::task_yield();
        }
    }

    /// **Consumer** — aperiodic, runs in periodic slack. Blocks on the
    /// samples semaphore and processes one unit per wakeup.
    extern "C" fn consumer_task(_arg: usize) -> ! {
        let h = unsafe { SAMPLES };
        loop {
            if kernel::sem_wait(h).is_err() {
                // Semaphore deleted: nothing left to consume.
                kernel::task_yield();
                continue;
            }
            let mut _acc: u32 = 0;
            for i in 0..200u32 {
                _acc = _acc.wrapping_add(i * i);
            }
        }
    }

    /// **Background** — lowest-priority housekeeping; yields constantly
    /// so equal-priority peers (if added) would round-robin.
    extern "C" fn background_task(_arg: usize) -> ! {
        loop {
            let mut _acc: u32 = 0;
            for i in 0..100u32 {
                _acc = _acc.wrapping_add(i);
            }
            kernel::task_yield();
        }
    }

    #[entry]
    fn main() -> ! {
        let cp = cortex_m::Peripherals::take().unwrap();

        kernel::init();

        let samples = kernel::sem_create(0, false, APP).expect("semaphore table full");
        unsafe { SAMPLES = samples };

        kernel::create_periodic_task(
            "sample",
            APP,
            PeriodicParams {
                period_us: 1_000,
                deadline_us: 1_000,
                budget_us: 300,
                phase_us: 0,
            },
            sample_task,
            0,
            768,
        )
        .expect("sample task rejected");

        kernel::create_periodic_task(
            "control",
            APP,
            PeriodicParams {
                period_us: 2_000,
                deadline_us: 1_500,
                budget_us: 400,
                phase_us: 500,
            },
            control_task,
            0,
            768,
        )
        .expect("control task rejected");

        kernel::create_aperiodic_task("consumer", APP, 2, consumer_task, 0, 768)
            .expect("consumer task rejected");

        kernel::create_aperiodic_task("background", APP, 8, background_task, 0, 512)
            .expect("background task rejected");

        kernel::start(cp)
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    // Firmware entry exists only for the embedded target; host builds of
    // this binary are a no-op so `cargo test` can compile the package.
}
