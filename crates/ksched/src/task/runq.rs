//! Per-table run queue.
//!
//! An explicit ordered list of slot references, separate from the slot
//! array. New entries go to the front, so the most recently readied
//! process runs soonest. Duplicate insertion is detected and refused.
//!
//! Entries usually name slots of the owning table; after a work steal a
//! queue also holds entries whose slots live in another table.

use alloc::collections::VecDeque;

use super::process::ProcRef;

pub struct RunQueue {
	entries: VecDeque<ProcRef>,
}

impl RunQueue {
	/// A queue able to hold `capacity` entries without reallocating.
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			entries: VecDeque::with_capacity(capacity),
		}
	}

	/// Insert at the front. Returns `false` (and changes nothing) if the
	/// entry is already queued.
	pub fn push(&mut self, p: ProcRef) -> bool {
		if self.contains(p) {
			return false;
		}
		self.entries.push_front(p);
		true
	}

	/// Remove by identity. Returns whether the entry was present.
	pub fn remove(&mut self, p: ProcRef) -> bool {
		match self.entries.iter().position(|&q| q == p) {
			Some(i) => {
				self.entries.remove(i);
				true
			}
			None => false,
		}
	}

	pub fn contains(&self, p: ProcRef) -> bool {
		self.entries.iter().any(|&q| q == p)
	}

	/// The entry that should run next.
	pub fn front(&self) -> Option<ProcRef> {
		self.entries.front().copied()
	}

	pub fn iter(&self) -> impl Iterator<Item = ProcRef> + '_ {
		self.entries.iter().copied()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::vec::Vec;

	fn p(slot: usize) -> ProcRef {
		ProcRef { table: 0, slot }
	}

	#[test]
	fn most_recent_runs_first() {
		let mut q = RunQueue::with_capacity(4);
		q.push(p(1));
		q.push(p(2));
		q.push(p(3));
		assert_eq!(q.iter().collect::<Vec<_>>(), [p(3), p(2), p(1)]);
		assert_eq!(q.front(), Some(p(3)));
	}

	#[test]
	fn push_is_idempotent() {
		let mut q = RunQueue::with_capacity(4);
		assert!(q.push(p(1)));
		assert!(q.push(p(2)));
		assert!(!q.push(p(1)));
		assert_eq!(q.len(), 2);
		assert_eq!(q.iter().filter(|&e| e == p(1)).count(), 1);
	}

	#[test]
	fn remove_absent_is_a_no_op() {
		let mut q = RunQueue::with_capacity(4);
		q.push(p(1));
		assert!(!q.remove(p(9)));
		assert!(q.remove(p(1)));
		assert!(q.is_empty());
		assert!(!q.remove(p(1)));
	}

	#[test]
	fn same_slot_in_other_table_is_distinct() {
		let mut q = RunQueue::with_capacity(4);
		q.push(ProcRef { table: 0, slot: 1 });
		assert!(q.push(ProcRef { table: 1, slot: 1 }));
		assert_eq!(q.len(), 2);
	}
}
