//! Sleep and wakeup.
//!
//! A sleeper holds a condition lock while checking its condition, and
//! trades it for its owning table lock before giving up the CPU. A waker
//! changes the condition under the same condition lock and then needs the
//! table lock to make the sleeper runnable. Between the two, a wakeup sent
//! after the sleeper's check cannot slip past it.

use super::process::{Channel, ProcRef, ProcState};
use super::Kernel;
use crate::sync::spinlock::SpinLockGuard;

impl Kernel {
	/// Atomically release `guard` and block on `chan`; reacquire the lock
	/// before returning.
	///
	/// The return does not mean the condition holds: wakeups are
	/// broadcasts and `kill` wakes sleepers spuriously, so callers loop.
	pub fn sleep<'a, T>(&self, chan: Channel, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
		match self.sleep_on(chan, guard, false) {
			Ok(guard) | Err(guard) => guard,
		}
	}

	/// Like [`Kernel::sleep`], but give up without blocking if the caller
	/// has been killed. `Err` hands back `guard`, never released.
	pub(super) fn sleep_unless_killed<'a, T>(
		&self,
		chan: Channel,
		guard: SpinLockGuard<'a, T>,
	) -> Result<SpinLockGuard<'a, T>, SpinLockGuard<'a, T>> {
		self.sleep_on(chan, guard, true)
	}

	fn sleep_on<'a, T>(
		&self,
		chan: Channel,
		guard: SpinLockGuard<'a, T>,
		unless_killed: bool,
	) -> Result<SpinLockGuard<'a, T>, SpinLockGuard<'a, T>> {
		let me = match self.current() {
			Some(p) => p,
			None => panic!("sleep: no current process"),
		};

		// Once we hold the table lock no wakeup or kill can run for us, so
		// the condition lock can go.
		let mut owner = self.table(me.table).lock();
		if unless_killed && owner.slot(me).killed {
			drop(owner);
			return Err(guard);
		}
		let cond = SpinLockGuard::unlock(guard);

		owner.dequeue(me);
		let proc = owner.slot_mut(me);
		proc.chan = Some(chan);
		proc.state = ProcState::Sleeping;

		let mut owner = self.sched(owner, me);

		owner.slot_mut(me).chan = None;
		drop(owner);
		Ok(cond.lock())
	}

	/// Make every process sleeping on `chan`, in every table, runnable.
	///
	/// Takes each table lock in turn, in ascending order; the caller must
	/// hold none.
	pub fn wakeup(&self, chan: Channel) {
		for table in self.tables.iter() {
			let mut inner = table.lock();
			for slot in 0..inner.slots.len() {
				let proc = &inner.slots[slot];
				if proc.state == ProcState::Sleeping && proc.chan == Some(chan) {
					inner.enqueue(ProcRef {
						table: table.index(),
						slot,
					});
				}
			}
		}
	}
}
