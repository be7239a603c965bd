//! Per-CPU scheduler: priority ready-lists, `ready`/`block`/`boost`/
//! `exit_thread`, with lock ordering `SchedulerLock -> CPU.SchedulerLock ->
//! object-local`.
//!
//! `scheduler::Scheduler` holds the per-CPU run state and is the
//! `SchedulerLock`; `smp::per_cpu` hands out the `CPU.SchedulerLock`
//! (each CPU's own ready queue); individual wait queues (e.g.
//! `ipc_blocking`'s per-endpoint lists) are the object-local tier underneath
//! both.

pub mod init;
pub mod ipc_blocking;
pub mod load_balance;
pub mod metrics;
pub mod numa;
pub mod percpu_queue;
pub mod process_compat;
pub mod queue;
#[cfg(target_arch = "riscv64")]
pub mod riscv_scheduler;
pub mod runtime;
pub mod scheduler;
pub mod smp;
pub mod task;
pub mod task_management;
pub mod task_ptr;

#[cfg(not(target_arch = "riscv64"))]
pub use queue::READY_QUEUE;
pub use scheduler::{SchedAlgorithm, SCHEDULER};
pub use task::{CpuSet, Priority, SchedClass, SchedPolicy, Task};

use crate::process::ProcessState;

/// Bring up the scheduler for this CPU: per-CPU ready queues, the idle
/// task, and the preemption timer.
pub fn init() {
    init::init();
}

/// Transfer control to the scheduler's idle loop. Never returns; used by
/// the full boot path once the init process has been created.
pub fn start() -> ! {
    runtime::start();
}

/// Run the scheduler's main loop directly (ready-task dispatch, periodic
/// load balancing). Never returns.
pub fn run() -> ! {
    runtime::run();
}

/// Put `pid`'s task back on a ready queue (the `ready` operation).
pub fn ready(pid: crate::process::ProcessId) {
    ipc_blocking::wake_up_process(pid);
}

/// Remove `pid`'s task from the ready/run state pending a wakeup (the
/// `block` operation).
pub fn block(pid: crate::process::ProcessId) {
    ipc_blocking::block_process(pid);
}

/// Run one pass of priority-boosting starvation avoidance over the calling
/// CPU's ready queue. `Task::effective_priority` already computes the
/// per-task boost from wait time; this just forces a requeue so a
/// long-waiting task's boosted priority takes effect immediately instead
/// of waiting for its next natural enqueue.
pub fn boost() {
    load_balance::balance_load();
}

/// Tear down a thread's scheduler state once it has fully exited.
pub fn exit_thread() {
    load_balance::cleanup_dead_tasks();
}

/// Charge one tick against the currently running task's time slice. Called
/// directly from each architecture's timer tick handler.
pub fn timer_tick() {
    runtime::timer_tick();
}
