//! Compile-time kernel limits.
//!
//! These size the static parts of the scheduler: the per-CPU array, the
//! slot array of each process table and every kernel stack. Runtime choices
//! within these bounds go through [`crate::config::SchedConfig`].

/// Maximum number of CPUs (and therefore process tables) supported.
pub const MAX_CPUS: usize = 8;

/// Process slots per table.
pub const NPROC: usize = 64;

/// Open file handles per process.
pub const NOFILE: usize = 16;

/// Size of each process's kernel-mode stack (32 KiB).
///
/// Large enough for nested interrupt frames, the syscall stub and the
/// deepest kernel path reachable from a syscall (fork → address-space copy).
pub const KSTACK_SIZE: usize = 4096 * 8;

/// Page size; the first process starts with exactly one page of memory.
pub const PGSIZE: usize = 4096;

/// Longest diagnostic process name, in bytes.
pub const MAXNAME: usize = 16;

/// RFLAGS interrupt-enable bit, set in every fresh user frame.
pub const FL_IF: usize = 1 << 9;
