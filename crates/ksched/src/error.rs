//! Recoverable, caller-visible errors.
//!
//! Violated scheduler invariants are not represented here: they panic and
//! stop the CPU (see `task::sched`).

use core::fmt;

/// Errors returned by process operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
	/// The local process table has no FREE slot.
	NoFreeSlot,
	/// A kernel stack could not be allocated.
	OutOfStacks,
	/// The virtual-memory collaborator could not satisfy the request.
	OutOfMemory,
	/// `wait` was called by a process with no children.
	NoChildren,
	/// `wait` was abandoned because the caller has been killed.
	Interrupted,
	/// `kill` found no live process with the given pid.
	NoSuchProcess,
	/// `SchedConfig` is outside the compile-time limits.
	InvalidConfig(&'static str),
}

impl fmt::Display for ProcError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProcError::NoFreeSlot => f.write_str("process table full"),
			ProcError::OutOfStacks => f.write_str("out of kernel stacks"),
			ProcError::OutOfMemory => f.write_str("out of memory"),
			ProcError::NoChildren => f.write_str("no children"),
			ProcError::Interrupted => f.write_str("interrupted"),
			ProcError::NoSuchProcess => f.write_str("no such process"),
			ProcError::InvalidConfig(why) => write!(f, "invalid config: {}", why),
		}
	}
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, ProcError>;
