// =============================================================================
// ksched: Scheduler Loop, Context Switch Protocol and Work Stealing
// =============================================================================
//
// Every CPU runs `scheduler_loop` forever. Control passes between the loop
// and processes only through `Platform::switch`, and always with the
// process's OWNING table lock held:
//
//   scheduler ──lock(owner)──► switch ──► process resumes in sched() or
//                                         starts in forkret()
//   process   ──lock(owner)──► sched() ─► scheduler resumes after switch,
//                                         releases the lock
//
// The flow that takes the lock is not the flow that releases it. The lock
// records the CPU, not the flow, so this is sound as long as both halves
// run on the same CPU, which the switch guarantees.
//
// RUN QUEUES AND STEALING:
//   A process is enqueued on its owning table's queue. A CPU with nothing
//   to run takes a home entry from another CPU's queue into its own queue
//   (the slot stays where it is). When it later picks that foreign entry,
//   it locks its own table and the owner's in ascending order, unlinks
//   the entry, and runs the process under the owner's lock.
// =============================================================================

use super::process::{ProcRef, ProcState};
use super::table::TableGuard;
use super::Kernel;
use crate::arch::Context;

impl Kernel {
	/// Per-CPU scheduler. Call once on each CPU after platform bring-up.
	pub fn scheduler_loop(&'static self) -> ! {
		let cpu = self.local_table();
		log::info!("cpu {}: scheduler started", cpu);
		loop {
			// Let devices interrupt an idle CPU.
			self.platform.enable_interrupts();

			if self.run_next(cpu) {
				continue;
			}
			if !self.steal_into(cpu) {
				self.platform.wait_for_interrupt();
			}
		}
	}

	/// Run the entry at the front of `cpu`'s queue, if there is one.
	fn run_next(&self, cpu: usize) -> bool {
		let mut local = self.table(cpu).lock();
		let p = match local.runq.front() {
			Some(p) => p,
			None => return false,
		};

		if p.table == cpu {
			local.dequeue(p);
			self.run(p, local);
			return true;
		}

		// Stolen entry: its slot is guarded by the owner's lock.
		drop(local);
		let (mut local, owner) = self.lock_two(cpu, p.table);
		if local.dequeue(p) {
			drop(local);
			self.run(p, owner);
		}
		true
	}

	/// Switch into `p` and come back once it gives up the CPU.
	fn run(&self, p: ProcRef, mut owner: TableGuard<'_>) {
		let proc = owner.slot_mut(p);
		if proc.state != ProcState::Runnable {
			panic!("scheduler: pid {} queued while {}", proc.pid, proc.state.as_str().trim_end());
		}
		proc.state = ProcState::Running;
		if let Some(space) = &proc.space {
			space.activate();
		}
		log::trace!("running: pid {} ({}) from table {}", proc.pid, proc.name, p.table);
		let to: *const Context = &proc.context;

		// SAFETY: interrupts are disabled while a table lock is held.
		let cpu = unsafe { self.cpus.this() };
		cpu.proc = Some(p);
		let from: *mut Context = &mut cpu.scheduler;
		// SAFETY: the process's context was filled by `prepare` or by its
		// last `sched`, and the owner lock keeps anyone else from running it.
		unsafe { self.platform.switch(from, to) };

		// The process is no longer RUNNING; it left itself RUNNABLE,
		// SLEEPING or ZOMBIE.
		self.vm.activate_kernel();
		// SAFETY: as above; the record is fetched again after the switch.
		unsafe { self.cpus.this() }.proc = None;
		drop(owner);
	}

	/// Give up the CPU to the scheduler loop.
	///
	/// The caller holds its owning table's lock (`owner`) and has already
	/// moved itself out of RUNNING. The guard comes back when the process
	/// is next scheduled.
	pub(super) fn sched<'a>(&self, mut owner: TableGuard<'a>, me: ProcRef) -> TableGuard<'a> {
		if !self.table(me.table).holding() {
			panic!("sched ptable lock");
		}
		if self.platform.interrupts_enabled() {
			panic!("sched interruptible");
		}
		// SAFETY: interrupts are disabled (checked above).
		let cpu = unsafe { self.cpus.this() };
		if cpu.ncli != 1 {
			panic!("sched locks");
		}
		let proc = owner.slot_mut(me);
		if proc.state == ProcState::Running {
			panic!("sched running");
		}

		let intena = cpu.intena;
		let from: *mut Context = &mut proc.context;
		let to: *const Context = &cpu.scheduler;
		// SAFETY: the scheduler context was saved when it switched to us.
		unsafe { self.platform.switch(from, to) };
		// SAFETY: still inside the owner lock's critical section.
		unsafe { self.cpus.this() }.intena = intena;
		owner
	}

	/// Give up the CPU for one scheduling round (`yield`).
	///
	/// Also a cancellation point: a killed process does not come back from
	/// here.
	pub fn yield_cpu(&'static self) {
		let me = self.me("yield");
		let mut owner = self.table(me.table).lock();
		owner.enqueue(me);
		let owner = self.sched(owner, me);
		let killed = owner.slot(me).killed;
		drop(owner);
		if killed {
			self.exit();
		}
	}

	/// Move one runnable process from another CPU's queue onto this CPU's.
	pub fn steal(&self) -> bool {
		self.steal_into(self.local_table())
	}

	/// Scan the other tables, starting after `thief`, for a queued process
	/// they own, and move its queue entry to `thief`'s queue.
	pub(super) fn steal_into(&self, thief: usize) -> bool {
		let n = self.ncpu();
		for k in 1..n {
			let victim = (thief + k) % n;
			let (mut mine, mut theirs) = self.lock_two(thief, victim);
			let found = theirs
				.runq
				.iter()
				.find(|&e| e.table == victim && theirs.slot(e).state == ProcState::Runnable);
			if let Some(p) = found {
				theirs.dequeue(p);
				if !mine.runq.push(p) {
					panic!("steal: pid {} queued twice", theirs.slot(p).pid);
				}
				log::debug!("steal: cpu {} took pid {} from cpu {}", thief, theirs.slot(p).pid, victim);
				return true;
			}
		}
		false
	}
}

/// First code run by every new process (`forkret`).
///
/// `arg` is the kernel's address, passed through `Platform::prepare`.
pub(super) extern "C" fn forkret(arg: usize) -> ! {
	// SAFETY: `allocate_in` passes a `&'static Kernel`.
	let kernel: &'static Kernel = unsafe { &*(arg as *const Kernel) };
	let me = kernel.me("forkret");

	// The scheduler that switched here took the owner lock; its guard
	// stays behind in the scheduler's flow.
	// SAFETY: this CPU holds the lock and this flow owns no guard for it.
	unsafe { kernel.table(me.table).force_unlock() };

	let frame = kernel.table(me.table).lock().slot(me).tf;
	kernel.platform.enter_user(kernel, frame)
}
