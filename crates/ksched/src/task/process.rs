//! The process entity: one schedulable unit and the names used to refer
//! to it.

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

use crate::arch::{Context, KernelStack, TrapFrame};
use crate::param::{MAXNAME, NOFILE};
use crate::resource::{AddressSpace, DirRef, FileRef};

// ── Identifiers ─────────────────────────────────────────────────

/// Process identifier. Unique among all non-FREE processes, never 0 for a
/// live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

impl fmt::Display for Pid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Where a process's slot lives: table index + slot index.
///
/// Valid only while the slot holds the same process; anything that may
/// outlive a slot's reuse keeps a [`ParentRef`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcRef {
	pub table: usize,
	pub slot: usize,
}

/// A reference to a parent by identity rather than by slot.
///
/// Resolved by looking the pid up in `table` under that table's lock, so a
/// recycled slot can never be mistaken for the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
	pub pid: Pid,
	pub table: usize,
}

/// What a sleeping process is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
	/// Events concerning a process (its children exiting).
	Proc(Pid),
	/// Any other kernel object, by address.
	Addr(usize),
}

// ── Process state ───────────────────────────────────────────────

/// The lifecycle states of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcState {
	/// Slot unused.
	#[default]
	Free,
	/// Allocated, stack and context being prepared.
	Embryo,
	/// Blocked on a channel.
	Sleeping,
	/// Ready; present in exactly one run queue.
	Runnable,
	/// Executing on some CPU.
	Running,
	/// Exited, waiting to be reaped.
	Zombie,
}

impl ProcState {
	/// Fixed-width label for diagnostic listings.
	pub fn as_str(&self) -> &'static str {
		match self {
			ProcState::Free => "unused",
			ProcState::Embryo => "embryo",
			ProcState::Sleeping => "sleep ",
			ProcState::Runnable => "runble",
			ProcState::Running => "run   ",
			ProcState::Zombie => "zombie",
		}
	}
}

// ── Process slot ────────────────────────────────────────────────

/// One slot of a process table. Every field is guarded by the owning
/// table's lock.
pub struct Proc {
	pub pid: Pid,
	pub state: ProcState,
	/// Sleep channel; meaningful only while `Sleeping`.
	pub chan: Option<Channel>,
	/// Sticky cancellation request.
	pub killed: bool,
	pub parent: Option<ParentRef>,
	pub name: String,
	/// Saved kernel continuation.
	pub context: Context,
	/// User frame resumed into on return from the kernel.
	pub tf: TrapFrame,
	pub kstack: Option<Box<KernelStack>>,
	pub space: Option<Box<dyn AddressSpace>>,
	/// Bytes of user memory.
	pub size: usize,
	pub files: [Option<FileRef>; NOFILE],
	pub cwd: Option<DirRef>,
}

impl Proc {
	/// An unused slot.
	pub fn free() -> Self {
		Self {
			pid: Pid(0),
			state: ProcState::Free,
			chan: None,
			killed: false,
			parent: None,
			name: String::new(),
			context: Context::empty(),
			tf: TrapFrame::default(),
			kstack: None,
			space: None,
			size: 0,
			files: [const { None }; NOFILE],
			cwd: None,
		}
	}

	/// Set the diagnostic name, truncated to `MAXNAME` bytes on a
	/// character boundary.
	pub fn set_name(&mut self, name: &str) {
		let mut end = name.len().min(MAXNAME);
		while !name.is_char_boundary(end) {
			end -= 1;
		}
		self.name.clear();
		self.name.push_str(&name[..end]);
	}

	/// Return the slot to FREE, handing back the resources the caller
	/// must release outside the table lock.
	pub fn reset(&mut self) -> (Option<Box<KernelStack>>, Option<Box<dyn AddressSpace>>) {
		let stack = self.kstack.take();
		let space = self.space.take();
		self.pid = Pid(0);
		self.state = ProcState::Free;
		self.chan = None;
		self.killed = false;
		self.parent = None;
		self.name.clear();
		self.context = Context::empty();
		self.tf = TrapFrame::default();
		self.size = 0;
		(stack, space)
	}

	/// Is this slot in use?
	#[inline]
	pub fn is_live(&self) -> bool {
		self.state != ProcState::Free
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_are_truncated_on_char_boundaries() {
		let mut p = Proc::free();
		p.set_name("initcode");
		assert_eq!(p.name, "initcode");
		p.set_name("a-very-long-process-name");
		assert_eq!(p.name.len(), MAXNAME);
		p.set_name("ééééééééé");
		assert!(p.name.len() <= MAXNAME);
		assert!(p.name.chars().all(|c| c == 'é'));
	}

	#[test]
	fn reset_clears_identity_and_returns_resources() {
		let mut p = Proc::free();
		p.pid = Pid(7);
		p.state = ProcState::Zombie;
		p.killed = true;
		p.parent = Some(ParentRef { pid: Pid(1), table: 0 });
		p.set_name("sh");
		p.kstack = KernelStack::try_new();
		let (stack, space) = p.reset();
		assert!(stack.is_some());
		assert!(space.is_none());
		assert_eq!(p.pid, Pid(0));
		assert_eq!(p.state, ProcState::Free);
		assert!(!p.killed);
		assert!(p.parent.is_none());
		assert!(p.name.is_empty());
	}
}
