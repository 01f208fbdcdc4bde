// =============================================================================
// ksched: Ticket Spinlock
// =============================================================================
//
// A ticket spinlock provides mutual exclusion in a multi-core kernel.
// It's the simplest fair lock: CPUs acquire the lock in FIFO order,
// preventing starvation.
//
// HOW IT WORKS:
//   - Two counters: `next_ticket` and `now_serving`
//   - To lock: atomically increment `next_ticket`, get your ticket number.
//     Spin until `now_serving` equals your ticket.
//   - To unlock: increment `now_serving`, which lets the next waiter proceed.
//
// IRQ SAFETY:
//   Interrupts are disabled on the current CPU before spinning. Unlike a
//   lock that stores the previous interrupt state in its guard, the state
//   is kept per CPU (`push_off` / `pop_off` nesting in cpu.rs). The
//   scheduler acquires a table lock in one flow of execution and the
//   process it switches to releases it, so the "previous state" belongs to
//   the CPU, not to the guard.
//
// OWNERSHIP:
//   The lock records which CPU holds it. `holding()` answers "does THIS
//   CPU hold the lock", which is what the scheduler's entry checks need.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::cpu::CpuSet;

/// `holder` value while the lock is free.
const NO_HOLDER: usize = usize::MAX;

/// A ticket-based spinlock that disables interrupts while held.
pub struct SpinLock<T> {
	/// The next ticket to be dispensed.
	next_ticket: AtomicU32,
	/// The ticket currently being served (incremented on unlock).
	now_serving: AtomicU32,
	/// CPU index of the current holder, or `NO_HOLDER`.
	holder: AtomicUsize,
	/// Per-CPU interrupt nesting state shared by every lock of one kernel.
	cpus: &'static CpuSet,
	data: UnsafeCell<T>,
}

// SAFETY: the lock ensures only one CPU accesses T at a time.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
	/// Creates a new, unlocked spinlock bound to a kernel's CPU set.
	pub fn new(value: T, cpus: &'static CpuSet) -> Self {
		Self {
			next_ticket: AtomicU32::new(0),
			now_serving: AtomicU32::new(0),
			holder: AtomicUsize::new(NO_HOLDER),
			cpus,
			data: UnsafeCell::new(value),
		}
	}

	/// Acquires the lock, disabling interrupts on the current CPU.
	///
	/// Re-acquiring a lock this CPU already holds is a deadlock and panics.
	pub fn lock(&self) -> SpinLockGuard<'_, T> {
		self.cpus.push_off();
		if self.holding() {
			panic!("acquire: already held");
		}

		let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
		while self.now_serving.load(Ordering::Acquire) != my_ticket {
			self.cpus.platform().relax();
		}

		self.holder.store(self.cpus.id(), Ordering::Relaxed);
		SpinLockGuard { lock: self }
	}

	/// Does the current CPU hold this lock?
	pub fn holding(&self) -> bool {
		self.cpus.push_off();
		let held = self.holder.load(Ordering::Relaxed) == self.cpus.id();
		self.cpus.pop_off();
		held
	}

	/// Releases a lock whose guard lives in another flow of execution.
	///
	/// A freshly created process starts running with its table lock held
	/// by the scheduler that switched to it; it has no guard to drop.
	///
	/// # Safety
	/// The current CPU must hold the lock and no guard for this
	/// acquisition may be dropped afterwards.
	pub unsafe fn force_unlock(&self) {
		unsafe { self.release() };
	}

	unsafe fn release(&self) {
		if !self.holding() {
			panic!("release: not held");
		}
		self.holder.store(NO_HOLDER, Ordering::Relaxed);
		// Release ordering publishes our writes to the next holder.
		self.now_serving.fetch_add(1, Ordering::Release);
		self.cpus.pop_off();
	}
}

/// RAII guard for a held spinlock.
///
/// Dropping the guard releases the lock and undoes one level of interrupt
/// disabling on the CPU that drops it.
pub struct SpinLockGuard<'a, T> {
	lock: &'a SpinLock<T>,
}

impl<'a, T> SpinLockGuard<'a, T> {
	/// Release the lock, handing back the lock itself for re-acquisition.
	pub fn unlock(guard: Self) -> &'a SpinLock<T> {
		let lock = guard.lock;
		drop(guard);
		lock
	}
}

impl<T> Deref for SpinLockGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &T {
		// SAFETY: we hold the lock.
		unsafe { &*self.lock.data.get() }
	}
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		// SAFETY: we hold the lock.
		unsafe { &mut *self.lock.data.get() }
	}
}

impl<T> Drop for SpinLockGuard<'_, T> {
	fn drop(&mut self) {
		unsafe { self.lock.release() };
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::arch::hosted::HostedPlatform;
	use crate::arch::Platform;
	use std::boxed::Box;
	use std::sync::Arc;
	use std::thread;
	use std::vec::Vec;

	fn cpus(n: usize) -> (&'static HostedPlatform, &'static CpuSet) {
		let platform: &'static HostedPlatform = Box::leak(Box::new(HostedPlatform::new(n)));
		let set: &'static CpuSet = Box::leak(Box::new(CpuSet::new(platform)));
		(platform, set)
	}

	#[test]
	fn guard_disables_and_restores_interrupts() {
		let (platform, set) = cpus(1);
		let lock = SpinLock::new(0u32, set);
		platform.enable_interrupts();
		{
			let mut g = lock.lock();
			*g += 1;
			assert!(!platform.interrupts_enabled());
			assert!(lock.holding());
		}
		assert!(platform.interrupts_enabled());
		assert!(!lock.holding());
	}

	#[test]
	fn nested_locks_restore_only_at_outermost_release() {
		let (platform, set) = cpus(1);
		let a = SpinLock::new((), set);
		let b = SpinLock::new((), set);
		platform.enable_interrupts();
		let ga = a.lock();
		let gb = b.lock();
		drop(ga);
		assert!(!platform.interrupts_enabled());
		drop(gb);
		assert!(platform.interrupts_enabled());
	}

	#[test]
	#[should_panic(expected = "acquire: already held")]
	fn relocking_on_the_same_cpu_panics() {
		let (_, set) = cpus(1);
		let lock = SpinLock::new((), set);
		let _g = lock.lock();
		let _again = lock.lock();
	}

	#[test]
	fn unlock_returns_the_lock() {
		let (_, set) = cpus(1);
		let lock = SpinLock::new(5u8, set);
		let g = lock.lock();
		let l = SpinLockGuard::unlock(g);
		assert!(!l.holding());
		assert_eq!(*l.lock(), 5);
	}

	#[test]
	fn counter_is_exact_under_contention() {
		let (platform, set) = cpus(4);
		let lock = Arc::new(SpinLock::new(0u64, set));
		let handles: Vec<_> = (0..4)
			.map(|cpu| {
				let lock = lock.clone();
				thread::spawn(move || {
					platform.bind_current_thread(cpu);
					for _ in 0..10_000 {
						*lock.lock() += 1;
					}
				})
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(*lock.lock(), 40_000);
	}

	#[test]
	fn waiters_get_through_behind_a_stalled_holder() {
		let (platform, set) = cpus(7);
		let lock = Arc::new(SpinLock::new(Vec::new(), set));
		platform.bind_current_thread(0);
		let held = lock.lock();
		let handles: Vec<_> = (1..7)
			.map(|cpu| {
				let lock = lock.clone();
				thread::spawn(move || {
					platform.bind_current_thread(cpu);
					for _ in 0..200 {
						lock.lock().push(cpu);
					}
				})
			})
			.collect();
		thread::sleep(std::time::Duration::from_millis(50));
		drop(held);
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(lock.lock().len(), 6 * 200);
	}
}
