// =============================================================================
// ksched: Bare-Metal x86_64 Backend
// =============================================================================
//
// CONTEXT SWITCH:
//   Each suspended flow leaves its callee-saved registers on its own kernel
//   stack and only the stack pointer in its `Context`:
//
//     ctx.sp ─► r15 r14 r13 r12 rbx rbp rip
//
//   Caller-saved registers are already spilled by the compiler around the
//   `switch` call, so these six plus the return address are all there is.
//
// FIRST ENTRY:
//   `prepare` fakes that frame on a fresh stack with rip pointing at
//   `ksched_flow_entry`, r12 = argument and r13 = entry function. The first
//   switch "returns" into the trampoline, which calls entry(arg).
//
// CPU IDENTITY:
//   GS base points at the per-core block set up during SMP bring-up; its
//   first u32 is the core index.
// =============================================================================

use core::arch::{asm, global_asm};

use ::x86_64::instructions::{hlt, interrupts};

use super::{Context, FlowEntry, KernelStack, Platform, TrapFrame};
use crate::task::Kernel;

/// Drops to ring 3 with the given frame; supplied by the kernel image,
/// which owns the GDT, TSS and syscall entry.
pub type UserEntry = fn(&'static Kernel, TrapFrame) -> !;

/// The x86_64 [`Platform`].
pub struct BareMetal {
	enter_user: UserEntry,
}

impl BareMetal {
	pub const fn new(enter_user: UserEntry) -> Self {
		Self { enter_user }
	}
}

global_asm!(
	".global ksched_switch",
	"ksched_switch:",
	// rdi = &mut old.sp
	// rsi = new.sp
	"push rbp",
	"push rbx",
	"push r12",
	"push r13",
	"push r14",
	"push r15",
	"mov [rdi], rsp",
	"mov rsp, rsi",
	"pop r15",
	"pop r14",
	"pop r13",
	"pop r12",
	"pop rbx",
	"pop rbp",
	"ret",
	"",
	".global ksched_flow_entry",
	"ksched_flow_entry:",
	"mov rdi, r12",
	"call r13",
	// FlowEntry never returns.
	"ud2",
);

extern "C" {
	fn ksched_switch(old_sp: *mut usize, new_sp: usize);
	fn ksched_flow_entry();
}

/// Words in a switch frame: six callee-saved registers and rip.
const FRAME_WORDS: usize = 7;

impl Platform for BareMetal {
	#[inline]
	fn cpu_id(&self) -> usize {
		let id: u32;
		// SAFETY: GS base is set on every core before it schedules.
		unsafe {
			asm!(
				"mov {:e}, gs:[0]",
				out(reg) id,
				options(nostack, preserves_flags, readonly)
			);
		}
		id as usize
	}

	fn interrupts_enabled(&self) -> bool {
		interrupts::are_enabled()
	}

	fn enable_interrupts(&self) {
		interrupts::enable();
	}

	fn disable_interrupts(&self) {
		interrupts::disable();
	}

	fn wait_for_interrupt(&self) {
		hlt();
	}

	unsafe fn prepare(&self, ctx: &mut Context, stack: &mut KernelStack, entry: FlowEntry, arg: usize) {
		let sp = stack.top() - FRAME_WORDS * 8;
		// SAFETY: the frame lies inside the caller's stack, which is
		// 16-byte aligned at its top.
		unsafe {
			let frame = sp as *mut usize;
			// Must match the pop order in ksched_switch.
			frame.add(0).write(0); // r15
			frame.add(1).write(0); // r14
			frame.add(2).write(entry as usize); // r13
			frame.add(3).write(arg); // r12
			frame.add(4).write(0); // rbx
			frame.add(5).write(0); // rbp
			frame.add(6).write(ksched_flow_entry as usize); // rip
		}
		ctx.sp = sp;
	}

	unsafe fn switch(&self, from: *mut Context, to: *const Context) {
		// SAFETY: guaranteed by the caller.
		unsafe { ksched_switch(core::ptr::addr_of_mut!((*from).sp), (*to).sp) };
	}

	fn enter_user(&self, kernel: &'static Kernel, frame: TrapFrame) -> ! {
		(self.enter_user)(kernel, frame)
	}
}
