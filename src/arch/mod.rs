//! Architecture support. The Cortex-M4 port owns every instruction-level
//! detail: context switching, stack frame construction, timer hardware,
//! interrupt priorities. Host builds (the test suite) get inert stubs —
//! the scheduler core itself is target-independent.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::{apply_dispatch, budget_elapsed_us, init_task_stack, request_context_switch};

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod host;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use host::{apply_dispatch, budget_elapsed_us, init_task_stack, request_context_switch};
