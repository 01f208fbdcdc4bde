// =============================================================================
// ksched: Multiprocessor Process Scheduler
// =============================================================================
//
// This crate is the process-management core of a small monolithic kernel.
//
// SHAPE:
//   - One process table per CPU: a fixed slot array, a run queue and one
//     ticket spinlock guarding both.
//   - One scheduler loop per CPU, genuinely parallel. A CPU with nothing
//     runnable locally steals one process from another CPU's queue.
//   - Processes block on opaque channels (`sleep`) and are made runnable
//     again by broadcasts (`wakeup`).
//   - fork / exit / wait / kill compose the above into process birth,
//     reparenting, reaping and cooperative termination.
//
// LOCK ORDER (see sync/mod.rs):
//   wait_lock → table locks in ascending CPU index.
//
// BUILD MODES:
//   - Kernel builds are #![no_std] + alloc.
//   - `cfg(test)` or the `hosted` feature link std and provide a
//     thread-backed platform (`arch::hosted`) that runs the real scheduler
//     on host threads.
// =============================================================================

#![cfg_attr(not(any(test, feature = "hosted")), no_std)]

extern crate alloc;

/// Compile-time limits (CPU count, table capacity, stack size).
pub mod param;

/// Runtime configuration for `Kernel::init`.
pub mod config;

/// Recoverable error type.
pub mod error;

/// Synchronization primitives: IRQ-aware ticket spinlock.
pub mod sync;

/// Per-CPU state: interrupt nesting, current process, scheduler context.
pub mod cpu;

/// Platform abstraction: context switch, interrupts, kernel stacks.
pub mod arch;

/// Collaborator interfaces: virtual memory and shared open resources.
pub mod resource;

/// Process tables, scheduling, sleep/wakeup and lifecycle operations.
pub mod task;

pub use arch::{Context, KernelStack, Platform, TrapFrame};
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use arch::x86_64::BareMetal;
pub use config::SchedConfig;
pub use error::{ProcError, Result};
pub use resource::{AddressSpace, DirRef, FileRef, Resource, VirtualMemory};
pub use sync::spinlock::{SpinLock, SpinLockGuard};
pub use task::process::{Channel, ParentRef, Pid, ProcRef, ProcState};
pub use task::dump::ProcInfo;
pub use task::Kernel;
