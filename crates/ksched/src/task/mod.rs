// =============================================================================
// ksched: Process Management
// =============================================================================
//
// One `Kernel` value owns everything the scheduler shares between CPUs:
//
//   tables[c]  : CPU c's process table: slot array + run queue + lock
//   next_pid   : global atomic pid counter (never reused, never 0)
//   wait_lock  : serializes parent/child relationships (exit vs. wait)
//   init       : the first process, parent of every orphan
//
// Submodules:
//   process.rs  : the process slot and the names used to refer to it
//   runq.rs     : ordered run queue with duplicate detection
//   table.rs    : per-CPU table: slot allocation, enqueue/dequeue
//   sched.rs    : scheduler loop, sched(), yield, work stealing, forkret
//   sleep.rs    : sleep / wakeup on channels
//   lifecycle.rs: first process, fork, exit, wait, kill, grow_memory
//   dump.rs     : procdump and structured snapshots
//
// A process's slot lives in its owning table forever; that table's lock
// guards the slot and is the lock held across every switch into or out of
// the process, whichever CPU runs it.
// =============================================================================

pub mod dump;
pub mod lifecycle;
pub mod process;
pub mod runq;
pub mod sched;
pub mod sleep;
pub mod table;


use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::{Platform, TrapFrame};
use crate::config::SchedConfig;
use crate::cpu::CpuSet;
use crate::error::Result;
use crate::resource::{FileRef, VirtualMemory};
use crate::sync::spinlock::SpinLock;

use self::process::{ParentRef, Pid, ProcRef};
use self::table::{ProcTable, TableGuard};

/// The process-management state of one kernel instance.
pub struct Kernel {
	config: SchedConfig,
	cpus: &'static CpuSet,
	platform: &'static dyn Platform,
	vm: &'static dyn VirtualMemory,
	/// One table per configured CPU, indexed by CPU.
	tables: Box<[ProcTable]>,
	next_pid: AtomicU64,
	/// Set once by `bootstrap_first_process`.
	init: spin::Once<ParentRef>,
	/// Held by exit while it reparents and wakes, and by wait across its
	/// scan and sleep. Always taken before any table lock.
	wait_lock: SpinLock<()>,
}

impl Kernel {
	/// Build the per-CPU tables (`initialize_tables`).
	///
	/// Must run once, before any CPU enters [`Kernel::scheduler_loop`].
	/// The kernel lives for the rest of the system's lifetime.
	pub fn init(
		config: SchedConfig,
		platform: &'static dyn Platform,
		vm: &'static dyn VirtualMemory,
	) -> Result<&'static Kernel> {
		config.validate()?;

		let cpus: &'static CpuSet = Box::leak(Box::new(CpuSet::new(platform)));
		// Steals can gather every process of the system into one queue.
		let queue_capacity = config.cpus * config.slots_per_cpu;
		let tables: Vec<ProcTable> = (0..config.cpus)
			.map(|index| ProcTable::new(index, config.slots_per_cpu, queue_capacity, cpus))
			.collect();

		let kernel = Box::leak(Box::new(Kernel {
			config,
			cpus,
			platform,
			vm,
			tables: tables.into_boxed_slice(),
			next_pid: AtomicU64::new(1),
			init: spin::Once::new(),
			wait_lock: SpinLock::new((), cpus),
		}));

		log::info!(
			"ksched: {} process tables x {} slots",
			config.cpus,
			config.slots_per_cpu
		);
		Ok(kernel)
	}

	/// Number of CPUs (and process tables).
	pub fn ncpu(&self) -> usize {
		self.tables.len()
	}

	pub fn config(&self) -> &SchedConfig {
		&self.config
	}

	/// A spinlock that interoperates with this kernel's interrupt nesting,
	/// suitable as the condition lock passed to [`Kernel::sleep`].
	pub fn spinlock<T>(&self, value: T) -> SpinLock<T> {
		SpinLock::new(value, self.cpus)
	}

	/// The process running on this CPU, if any (`myproc`).
	pub fn current(&self) -> Option<ProcRef> {
		self.cpus.current_proc()
	}

	/// Pid of the calling process.
	pub fn pid(&self) -> Pid {
		let me = self.me("pid");
		self.table(me.table).lock().slots[me.slot].pid
	}

	/// Has the calling process been killed?
	pub fn killed(&self) -> bool {
		let me = self.me("killed");
		self.table(me.table).lock().slots[me.slot].killed
	}

	/// Run `f` on the calling process's saved user frame.
	pub fn with_trapframe<R>(&self, f: impl FnOnce(&mut TrapFrame) -> R) -> R {
		let me = self.me("with_trapframe");
		let mut table = self.table(me.table).lock();
		f(&mut table.slots[me.slot].tf)
	}

	/// Rename the calling process (exec does this).
	pub fn set_name(&self, name: &str) {
		let me = self.me("set_name");
		self.table(me.table).lock().slots[me.slot].set_name(name);
	}

	/// Put `file` in the lowest free descriptor of the calling process
	/// (`fdalloc`). Returns `None` when all `NOFILE` are taken.
	pub fn install_file(&self, file: FileRef) -> Option<usize> {
		let me = self.me("install_file");
		let mut table = self.table(me.table).lock();
		let files = &mut table.slots[me.slot].files;
		let fd = files.iter().position(|f| f.is_none())?;
		files[fd] = Some(file);
		Some(fd)
	}

	/// Take descriptor `fd` out of the calling process's table. The caller
	/// drops it, outside any scheduler lock.
	pub fn close_file(&self, fd: usize) -> Option<FileRef> {
		let me = self.me("close_file");
		let mut table = self.table(me.table).lock();
		table.slots[me.slot].files.get_mut(fd)?.take()
	}

	// ── Internal helpers ────────────────────────────────────────

	/// The calling process; panics outside process context.
	fn me(&self, what: &str) -> ProcRef {
		match self.current() {
			Some(p) => p,
			None => panic!("{}: no current process", what),
		}
	}

	fn table(&self, index: usize) -> &ProcTable {
		&self.tables[index]
	}

	/// Index of this CPU's table.
	fn local_table(&self) -> usize {
		self.cpus.push_off();
		let id = self.cpus.id();
		self.cpus.pop_off();
		assert!(id < self.tables.len(), "cpu {} has no process table", id);
		id
	}

	/// A fresh, never-before-used pid.
	fn alloc_pid(&self) -> Pid {
		Pid(self.next_pid.fetch_add(1, Ordering::Relaxed))
	}

	/// Lock two distinct tables in ascending order, returning the guards
	/// in argument order.
	fn lock_two(&self, a: usize, b: usize) -> (TableGuard<'_>, TableGuard<'_>) {
		assert_ne!(a, b, "lock_two: same table");
		if a < b {
			let ga = self.table(a).lock();
			let gb = self.table(b).lock();
			(ga, gb)
		} else {
			let gb = self.table(b).lock();
			let ga = self.table(a).lock();
			(ga, gb)
		}
	}

	/// The init process, once bootstrapped.
	fn init_proc(&self) -> Option<ParentRef> {
		self.init.get().copied()
	}
}
