//! Per-CPU state.
//!
//! Each CPU owns one [`Cpu`] record: its interrupt-disable nesting depth,
//! the interrupt state to restore when that depth returns to zero, the
//! process it is currently running and the saved continuation of its
//! scheduler loop.
//!
//! A record is only touched by the flow of execution currently running on
//! that CPU, with interrupts disabled, so no lock is needed.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;

use crate::arch::{Context, Platform};
use crate::param::MAX_CPUS;
use crate::task::process::ProcRef;

/// Per-CPU scheduling state.
pub struct Cpu {
	/// Depth of `push_off` nesting.
	pub ncli: usize,
	/// Were interrupts enabled before the outermost `push_off`?
	pub intena: bool,
	/// The process running on this CPU, if any.
	pub proc: Option<ProcRef>,
	/// Saved continuation of this CPU's scheduler loop.
	pub scheduler: Context,
}

impl Cpu {
	const fn new() -> Self {
		Self {
			ncli: 0,
			intena: false,
			proc: None,
			scheduler: Context::empty(),
		}
	}
}

/// The set of per-CPU records for one kernel instance.
///
/// Sized for `MAX_CPUS` regardless of how many CPUs run a scheduler, so
/// every CPU index the platform can report has a record.
pub struct CpuSet {
	platform: &'static dyn Platform,
	cpus: Box<[UnsafeCell<Cpu>]>,
}

// SAFETY: each record is only accessed by the CPU it describes, with
// interrupts disabled.
unsafe impl Sync for CpuSet {}

impl CpuSet {
	/// Create the per-CPU records for a platform.
	pub fn new(platform: &'static dyn Platform) -> Self {
		let cpus: Vec<UnsafeCell<Cpu>> = (0..MAX_CPUS).map(|_| UnsafeCell::new(Cpu::new())).collect();
		Self {
			platform,
			cpus: cpus.into_boxed_slice(),
		}
	}

	/// The platform this CPU set runs on.
	pub fn platform(&self) -> &'static dyn Platform {
		self.platform
	}

	/// Index of the CPU executing the caller.
	///
	/// Only stable while interrupts are disabled; otherwise the caller may
	/// be moved to another CPU right after reading it.
	#[inline]
	pub fn id(&self) -> usize {
		self.platform.cpu_id()
	}

	/// The current CPU's record.
	///
	/// # Safety
	/// Interrupts must be disabled, and the returned reference must not be
	/// held across a context switch.
	#[allow(clippy::mut_from_ref)]
	pub unsafe fn this(&self) -> &mut Cpu {
		assert!(!self.platform.interrupts_enabled(), "mycpu interrupts enabled");
		let id = self.id();
		assert!(id < MAX_CPUS, "mycpu: bad cpu index {}", id);
		unsafe { &mut *self.cpus[id].get() }
	}

	/// Disable interrupts, remembering whether they were on.
	///
	/// Nests: it takes as many `pop_off` calls to undo as there were
	/// `push_off` calls.
	pub fn push_off(&self) {
		let old = self.platform.interrupts_enabled();
		self.platform.disable_interrupts();
		// SAFETY: interrupts are now disabled.
		let cpu = unsafe { self.this() };
		if cpu.ncli == 0 {
			cpu.intena = old;
		}
		cpu.ncli += 1;
	}

	/// Undo one `push_off`, re-enabling interrupts at the outermost level
	/// if they were enabled to begin with.
	pub fn pop_off(&self) {
		if self.platform.interrupts_enabled() {
			panic!("pop_off - interruptible");
		}
		// SAFETY: interrupts are disabled (checked above).
		let cpu = unsafe { self.this() };
		if cpu.ncli < 1 {
			panic!("pop_off");
		}
		cpu.ncli -= 1;
		if cpu.ncli == 0 && cpu.intena {
			self.platform.enable_interrupts();
		}
	}

	/// The process running on the current CPU.
	pub fn current_proc(&self) -> Option<ProcRef> {
		self.push_off();
		// SAFETY: interrupts are disabled between push_off and pop_off.
		let proc = unsafe { self.this() }.proc;
		self.pop_off();
		proc
	}
}
