//! Diagnostic listings (`procdump`) and structured snapshots.
//!
//! Both lock every table, in ascending order, for a consistent view.
//! Meant for a console key or a debugger, not for hot paths.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use super::process::{Pid, ProcRef, ProcState};
use super::table::TableGuard;
use super::Kernel;

/// One live process as seen by [`Kernel::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
	pub pid: Pid,
	pub state: ProcState,
	pub name: String,
	/// Owning table.
	pub table: usize,
	pub parent: Option<Pid>,
	pub killed: bool,
	/// Bytes of user memory.
	pub size: usize,
	/// Every run queue holding this process.
	pub queued_on: Vec<usize>,
}

impl Kernel {
	fn lock_all(&self) -> Vec<TableGuard<'_>> {
		self.tables.iter().map(|t| t.lock()).collect()
	}

	/// Every non-FREE process of every table.
	pub fn snapshot(&self) -> Vec<ProcInfo> {
		let tables = self.lock_all();
		let mut out = Vec::new();
		for (t, inner) in tables.iter().enumerate() {
			for (slot, proc) in inner.slots.iter().enumerate() {
				if !proc.is_live() {
					continue;
				}
				let p = ProcRef { table: t, slot };
				out.push(ProcInfo {
					pid: proc.pid,
					state: proc.state,
					name: proc.name.clone(),
					table: t,
					parent: proc.parent.map(|r| r.pid),
					killed: proc.killed,
					size: proc.size,
					queued_on: tables
						.iter()
						.enumerate()
						.filter(|(_, g)| g.runq.contains(p))
						.map(|(q, _)| q)
						.collect(),
				});
			}
		}
		out
	}

	/// Human-readable listing of `cpu`'s table and run queue.
	pub fn dump(&self, cpu: usize) -> String {
		let tables = self.lock_all();
		let mut out = String::new();
		let inner = match tables.get(cpu) {
			Some(inner) => inner,
			None => {
				let _ = writeln!(out, "proc table cpu {}: no such table", cpu);
				return out;
			}
		};

		let _ = writeln!(out, "proc table cpu {}", cpu);
		for proc in inner.slots.iter().filter(|p| p.is_live()) {
			let _ = writeln!(out, "{} {} {}", proc.pid, proc.state.as_str(), proc.name);
		}

		let _ = writeln!(out, "runq: ");
		for p in inner.runq.iter() {
			// Stolen entries live in their owner's table.
			let proc = tables[p.table].slot(p);
			let _ = writeln!(out, "{} {} {}", proc.pid, proc.state.as_str(), proc.name);
		}
		out
	}

	/// Log every CPU's listing.
	pub fn dump_all(&self) {
		for cpu in 0..self.ncpu() {
			log::info!("\n{}", self.dump(cpu));
		}
	}
}
