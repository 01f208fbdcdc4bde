// =============================================================================
// ksched: Platform Abstraction
// =============================================================================
//
// Everything the scheduler needs from the CPU it runs on:
//   - which CPU am I?                       (cpu_id)
//   - interrupt flag control                (enable/disable/query)
//   - idle until something happens          (wait_for_interrupt)
//   - kernel stacks + initial continuations (alloc_stack, prepare)
//   - the context-switch primitive          (switch)
//   - the final drop into user mode         (enter_user)
//
// Backends:
//   x86_64.rs: bare metal, callee-saved register switch in global_asm!
//   hosted.rs: host threads, one per flow of execution, baton hand-off
// =============================================================================

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;

use alloc::boxed::Box;

use crate::param::KSTACK_SIZE;
use crate::task::Kernel;

// ── Saved continuation ──────────────────────────────────────────

/// A suspended flow of execution.
///
/// On bare metal this is the kernel stack pointer left behind by the
/// switch routine (the callee-saved registers live on that stack). The
/// hosted backend stores its flow token in the same field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Context {
	pub sp: usize,
}

impl Context {
	/// A context that has never been saved into.
	pub const fn empty() -> Self {
		Self { sp: 0 }
	}
}

// ── User entry frame ────────────────────────────────────────────

/// The user-mode register state a process resumes into.
///
/// The trap collaborator fills it on kernel entry and consumes it on the
/// way back out; the scheduler copies it on fork and builds the first one
/// for the init process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
	/// User instruction pointer to resume at.
	pub pc: usize,
	/// User stack pointer.
	pub sp: usize,
	/// Syscall return register (fork reports 0 here in the child).
	pub ret: usize,
	/// User flags register.
	pub flags: usize,
}

// ── Kernel stack ────────────────────────────────────────────────

/// An aligned kernel stack.
#[repr(C, align(16))]
pub struct KernelStack {
	pub data: [u8; KSTACK_SIZE],
}

impl KernelStack {
	/// Allocate a zeroed stack directly on the heap.
	///
	/// Never builds the array on the current stack first, which would
	/// blow a kernel stack when called from syscall context.
	pub fn try_new() -> Option<Box<KernelStack>> {
		let layout = core::alloc::Layout::new::<KernelStack>();
		// SAFETY: the layout is non-zero sized; a null result is handled.
		unsafe {
			let ptr = alloc::alloc::alloc_zeroed(layout) as *mut KernelStack;
			if ptr.is_null() {
				return None;
			}
			Some(Box::from_raw(ptr))
		}
	}

	/// Top of the stack (stacks grow downward).
	pub fn top(&self) -> usize {
		self.data.as_ptr() as usize + KSTACK_SIZE
	}
}

/// Entry point of a new flow: receives the argument given to `prepare`.
pub type FlowEntry = extern "C" fn(usize) -> !;

/// The CPU-facing half of the kernel.
pub trait Platform: Sync {
	/// Index of the CPU executing the caller.
	fn cpu_id(&self) -> usize;

	/// Is the interrupt flag set on this CPU?
	fn interrupts_enabled(&self) -> bool;

	/// Set the interrupt flag on this CPU.
	fn enable_interrupts(&self);

	/// Clear the interrupt flag on this CPU.
	fn disable_interrupts(&self);

	/// Idle until an interrupt (or, hosted, a short while) has passed.
	fn wait_for_interrupt(&self);

	/// Back off inside a spin-wait loop.
	fn relax(&self) {
		core::hint::spin_loop();
	}

	/// Acquire a kernel stack for a new process.
	fn alloc_stack(&self) -> Option<Box<KernelStack>> {
		KernelStack::try_new()
	}

	/// Build a continuation in `ctx` that, when first switched to, runs
	/// `entry(arg)` on `stack`.
	///
	/// # Safety
	/// `stack` must stay allocated until the flow has switched away for
	/// the last time.
	unsafe fn prepare(&self, ctx: &mut Context, stack: &mut KernelStack, entry: FlowEntry, arg: usize);

	/// Save the current flow into `from` and resume `to`.
	///
	/// Returns when some other flow switches back to `from`, possibly on a
	/// different CPU.
	///
	/// # Safety
	/// Interrupts must be disabled; `to` must hold a live continuation.
	unsafe fn switch(&self, from: *mut Context, to: *const Context);

	/// Leave the kernel for user mode with `frame`. Never returns.
	fn enter_user(&self, kernel: &'static Kernel, frame: TrapFrame) -> !;
}
