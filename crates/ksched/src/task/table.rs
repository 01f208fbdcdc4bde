//! Per-CPU process tables and the allocator.
//!
//! A table is a fixed slot array plus a run queue, both behind one ticket
//! spinlock. Slots never migrate between tables; only run-queue entries do
//! (see `Kernel::steal`).

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::process::{Pid, Proc, ProcRef, ProcState};
use super::runq::RunQueue;
use super::{sched, Kernel};
use crate::arch::Context;
use crate::cpu::CpuSet;
use crate::error::{ProcError, Result};
use crate::sync::spinlock::{SpinLock, SpinLockGuard};

/// A locked table.
pub type TableGuard<'a> = SpinLockGuard<'a, TableInner>;

/// One CPU's process table.
pub struct ProcTable {
	index: usize,
	inner: SpinLock<TableInner>,
}

/// The lock-protected part of a table.
pub struct TableInner {
	index: usize,
	pub slots: Box<[Proc]>,
	pub runq: RunQueue,
}

impl ProcTable {
	pub fn new(index: usize, slots: usize, queue_capacity: usize, cpus: &'static CpuSet) -> Self {
		let slots: Vec<Proc> = (0..slots).map(|_| Proc::free()).collect();
		Self {
			index,
			inner: SpinLock::new(
				TableInner {
					index,
					slots: slots.into_boxed_slice(),
					runq: RunQueue::with_capacity(queue_capacity),
				},
				cpus,
			),
		}
	}

	pub fn index(&self) -> usize {
		self.index
	}

	pub fn lock(&self) -> TableGuard<'_> {
		self.inner.lock()
	}

	/// Does this CPU hold the table lock?
	pub fn holding(&self) -> bool {
		self.inner.holding()
	}

	/// Release the lock taken on behalf of a process by the scheduler
	/// that first switched into it.
	///
	/// # Safety
	/// See [`SpinLock::force_unlock`].
	pub unsafe fn force_unlock(&self) {
		unsafe { self.inner.force_unlock() };
	}
}

impl TableInner {
	/// Mark a slot of this table RUNNABLE and put it at the front of this
	/// table's run queue.
	///
	/// A process that is already RUNNABLE is already queued (possibly in
	/// another table's queue after a steal), so the request is refused and
	/// logged. Returns whether the process was inserted.
	pub fn enqueue(&mut self, p: ProcRef) -> bool {
		debug_assert_eq!(p.table, self.index, "enqueue: slot of another table");
		let proc = &mut self.slots[p.slot];
		if proc.state == ProcState::Runnable {
			log::warn!("enqueue: pid {} already on a run queue", proc.pid);
			return false;
		}
		// Not RUNNABLE means not queued anywhere.
		let pushed = self.runq.push(p);
		debug_assert!(pushed, "enqueue: pid {} queued while {:?}", proc.pid, proc.state);
		proc.state = ProcState::Runnable;
		log::trace!("add to run: pid {} on queue {}", proc.pid, self.index);
		true
	}

	/// Remove `p` from this table's run queue; no-op if absent.
	pub fn dequeue(&mut self, p: ProcRef) -> bool {
		self.runq.remove(p)
	}

	/// Slot index of the live process with id `pid`.
	pub fn find(&self, pid: Pid) -> Option<usize> {
		self.slots.iter().position(|p| p.is_live() && p.pid == pid)
	}

	/// The slot a reference names.
	pub fn slot(&self, p: ProcRef) -> &Proc {
		debug_assert_eq!(p.table, self.index);
		&self.slots[p.slot]
	}

	pub fn slot_mut(&mut self, p: ProcRef) -> &mut Proc {
		debug_assert_eq!(p.table, self.index);
		&mut self.slots[p.slot]
	}

	/// Number of non-FREE slots.
	pub fn live(&self) -> usize {
		self.slots.iter().filter(|p| p.is_live()).count()
	}
}

// ── Allocator ───────────────────────────────────────────────────

impl Kernel {
	/// Allocate a process in this CPU's table (`allocproc`).
	pub(super) fn allocate(&'static self) -> Result<ProcRef> {
		self.allocate_in(self.local_table())
	}

	/// Claim a FREE slot of `table` as an EMBRYO with a fresh pid, then
	/// give it a kernel stack and a first continuation that enters
	/// `forkret`.
	///
	/// The stack is acquired with the table unlocked. An EMBRYO is never
	/// queued, so the scheduler cannot see the half-built process.
	pub(super) fn allocate_in(&'static self, table: usize) -> Result<ProcRef> {
		let p = {
			let mut inner = self.table(table).lock();
			let slot = inner
				.slots
				.iter()
				.position(|s| s.state == ProcState::Free)
				.ok_or(ProcError::NoFreeSlot)?;
			let proc = &mut inner.slots[slot];
			proc.state = ProcState::Embryo;
			proc.pid = self.alloc_pid();
			ProcRef { table, slot }
		};

		let mut stack = match self.platform.alloc_stack() {
			Some(stack) => stack,
			None => {
				let _ = self.table(table).lock().slots[p.slot].reset();
				return Err(ProcError::OutOfStacks);
			}
		};

		let mut context = Context::empty();
		// SAFETY: the stack is moved into the slot below and stays there
		// until the process is reaped, after its last switch.
		unsafe {
			self.platform.prepare(
				&mut context,
				&mut stack,
				sched::forkret,
				self as *const Kernel as usize,
			);
		}

		let mut inner = self.table(table).lock();
		let proc = &mut inner.slots[p.slot];
		proc.kstack = Some(stack);
		proc.context = context;
		Ok(p)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::arch::hosted::HostedPlatform;

	fn table(slots: usize) -> ProcTable {
		let platform: &'static HostedPlatform = Box::leak(Box::new(HostedPlatform::new(1)));
		let cpus: &'static CpuSet = Box::leak(Box::new(CpuSet::new(platform)));
		ProcTable::new(0, slots, slots, cpus)
	}

	fn embryo(inner: &mut TableInner, slot: usize, pid: u64) -> ProcRef {
		let p = ProcRef { table: 0, slot };
		let proc = inner.slot_mut(p);
		proc.pid = Pid(pid);
		proc.state = ProcState::Embryo;
		p
	}

	#[test]
	fn enqueue_marks_runnable_and_pushes_front() {
		let t = table(4);
		let mut inner = t.lock();
		let a = embryo(&mut inner, 0, 1);
		let b = embryo(&mut inner, 1, 2);
		assert!(inner.enqueue(a));
		assert!(inner.enqueue(b));
		assert_eq!(inner.slot(a).state, ProcState::Runnable);
		assert_eq!(inner.runq.front(), Some(b));
	}

	#[test]
	fn enqueue_twice_leaves_one_entry() {
		let t = table(4);
		let mut inner = t.lock();
		let a = embryo(&mut inner, 2, 9);
		assert!(inner.enqueue(a));
		assert!(!inner.enqueue(a));
		assert_eq!(inner.runq.len(), 1);
		assert_eq!(inner.runq.iter().filter(|&e| e == a).count(), 1);
	}

	#[test]
	fn enqueue_refuses_runnable_entry_held_elsewhere() {
		let t = table(4);
		let mut inner = t.lock();
		let a = embryo(&mut inner, 1, 4);
		assert!(inner.enqueue(a));
		// As after a steal: still RUNNABLE, queued on the thief.
		assert!(inner.dequeue(a));
		assert!(!inner.enqueue(a));
		assert!(!inner.runq.contains(a));
		assert_eq!(inner.slot(a).state, ProcState::Runnable);
	}

	#[test]
	fn dequeue_keeps_state_and_tolerates_absence() {
		let t = table(4);
		let mut inner = t.lock();
		let a = embryo(&mut inner, 0, 1);
		assert!(!inner.dequeue(a));
		inner.enqueue(a);
		assert!(inner.dequeue(a));
		assert!(inner.runq.is_empty());
		assert_eq!(inner.slot(a).state, ProcState::Runnable);
	}

	#[test]
	fn find_ignores_free_slots() {
		let t = table(4);
		let mut inner = t.lock();
		embryo(&mut inner, 3, 5);
		assert_eq!(inner.find(Pid(5)), Some(3));
		assert_eq!(inner.find(Pid(0)), None);
		assert_eq!(inner.live(), 1);
	}
}
