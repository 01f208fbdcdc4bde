// =============================================================================
// ksched: Process Lifecycle
// =============================================================================
//
// Birth:   bootstrap_first_process (init), fork
// Death:   exit → ZOMBIE → reaped by the parent's wait (or by init)
// Signals: kill (sticky flag, wakes sleepers)
// Memory:  grow_memory
//
// Parent links are (pid, table) pairs and are only changed with wait_lock
// held, so a parent scanning for children in wait() and a child exiting
// cannot miss each other.
// =============================================================================

use super::process::{Channel, ParentRef, Pid, ProcRef, ProcState};
use super::Kernel;
use crate::arch::TrapFrame;
use crate::error::{ProcError, Result};
use crate::param::{FL_IF, PGSIZE};
use crate::resource::DirRef;

impl Kernel {
	/// Create the init process in table 0 from `image` and make it
	/// runnable (`userinit`).
	///
	/// Init starts at address 0 with one page of memory and its stack at
	/// the top of that page. It adopts every orphan and must never exit.
	pub fn bootstrap_first_process(&'static self, image: &[u8], cwd: DirRef) -> Result<Pid> {
		if self.init.get().is_some() {
			panic!("userinit: init already exists");
		}

		let p = self.allocate_in(0)?;
		let space = match self.vm.create(image) {
			Some(space) => space,
			None => {
				self.release_slot(p);
				return Err(ProcError::OutOfMemory);
			}
		};

		let mut table = self.table(0).lock();
		let proc = table.slot_mut(p);
		proc.space = Some(space);
		proc.size = PGSIZE;
		proc.tf = TrapFrame {
			pc: 0,
			sp: PGSIZE,
			ret: 0,
			flags: FL_IF,
		};
		proc.set_name("initcode");
		proc.cwd = Some(cwd);
		let pid = proc.pid;
		self.init.call_once(|| ParentRef { pid, table: 0 });
		table.enqueue(p);
		drop(table);

		log::info!("userinit: init is pid {}", pid);
		Ok(pid)
	}

	/// Create a copy of the calling process.
	///
	/// Returns the child's pid to the caller; the child resumes from the
	/// same user frame with `ret == 0`.
	pub fn fork(&'static self) -> Result<Pid> {
		let me = self.me("fork");
		let child = self.allocate()?;

		// Copy memory with no lock held. Only this process touches its
		// own address space while it is running.
		let (space, size) = {
			let mut table = self.table(me.table).lock();
			let proc = table.slot_mut(me);
			(proc.space.take(), proc.size)
		};
		let copy = space.as_ref().and_then(|s| s.duplicate(size));
		self.table(me.table).lock().slot_mut(me).space = space;
		let copy = match copy {
			Some(copy) => copy,
			None => {
				self.release_slot(child);
				return Err(ProcError::OutOfMemory);
			}
		};

		let (pid, tf, files, cwd, name) = {
			let table = self.table(me.table).lock();
			let proc = table.slot(me);
			(proc.pid, proc.tf, proc.files.clone(), proc.cwd.clone(), proc.name.clone())
		};

		let mut table = self.table(child.table).lock();
		let proc = table.slot_mut(child);
		proc.space = Some(copy);
		proc.size = size;
		proc.tf = TrapFrame { ret: 0, ..tf };
		proc.files = files;
		proc.cwd = cwd;
		proc.name = name;
		proc.parent = Some(ParentRef { pid, table: me.table });
		let child_pid = proc.pid;
		table.enqueue(child);
		drop(table);

		log::debug!("fork: pid {} -> pid {} (table {})", pid, child_pid, child.table);
		Ok(child_pid)
	}

	/// Terminate the calling process. Never returns.
	///
	/// The process stays a ZOMBIE until its parent (or init, if the parent
	/// exits first) reaps it in `wait`.
	pub fn exit(&'static self) -> ! {
		let me = self.me("exit");
		let init = self.init_proc();

		let (pid, files, cwd) = {
			let mut table = self.table(me.table).lock();
			let proc = table.slot_mut(me);
			if init.map(|i| i.pid) == Some(proc.pid) {
				panic!("init exiting");
			}
			(proc.pid, core::mem::take(&mut proc.files), proc.cwd.take())
		};
		// Close everything outside the table lock: the last reference may
		// have real work to do.
		drop(files);
		drop(cwd);

		let wait_guard = self.wait_lock.lock();

		// Our parent may have exited and handed us to init since we
		// started; only the link read under wait_lock is current.
		let parent = self.table(me.table).lock().slot(me).parent;

		// A parent blocked in wait() sleeps on its own pid.
		if let Some(parent) = parent {
			self.wakeup(Channel::Proc(parent.pid));
		}

		if let Some(init) = init {
			let me_ref = ParentRef { pid, table: me.table };
			let mut orphan_zombie = false;
			for table in self.tables.iter() {
				let mut inner = table.lock();
				for proc in inner.slots.iter_mut() {
					if proc.is_live() && proc.parent == Some(me_ref) {
						proc.parent = Some(init);
						orphan_zombie |= proc.state == ProcState::Zombie;
					}
				}
			}
			if orphan_zombie {
				self.wakeup(Channel::Proc(init.pid));
			}
		}

		let mut owner = self.table(me.table).lock();
		owner.dequeue(me);
		owner.slot_mut(me).state = ProcState::Zombie;
		log::debug!("exit: pid {}", pid);
		drop(wait_guard);

		let _owner = self.sched(owner, me);
		panic!("zombie exit");
	}

	/// Wait for a child to exit and reap it. Returns the child's pid.
	pub fn wait(&self) -> Result<Pid> {
		let me = self.me("wait");
		let pid = self.table(me.table).lock().slot(me).pid;
		let me_ref = ParentRef { pid, table: me.table };

		let mut guard = self.wait_lock.lock();
		loop {
			let mut have_kids = false;
			for table in self.tables.iter() {
				let mut inner = table.lock();
				let mut reaped = None;
				for proc in inner.slots.iter_mut() {
					if !proc.is_live() || proc.parent != Some(me_ref) {
						continue;
					}
					have_kids = true;
					if proc.state == ProcState::Zombie {
						let child = proc.pid;
						reaped = Some((child, proc.reset()));
						break;
					}
				}
				drop(inner);

				if let Some((child, resources)) = reaped {
					drop(guard);
					drop(resources);
					log::debug!("wait: pid {} reaped pid {}", pid, child);
					return Ok(child);
				}
			}

			if !have_kids {
				return Err(ProcError::NoChildren);
			}

			// Children exiting wake us on our own pid. The killed flag is
			// checked under the same table lock that marks us SLEEPING, so
			// a kill cannot land in between.
			guard = match self.sleep_unless_killed(Channel::Proc(pid), guard) {
				Ok(guard) => guard,
				Err(_) => return Err(ProcError::Interrupted),
			};
		}
	}

	/// Mark the process `pid` killed; a sleeping target is made runnable so
	/// it notices at its next cancellation point.
	pub fn kill(&self, pid: Pid) -> Result<()> {
		for table in self.tables.iter() {
			let mut inner = table.lock();
			if let Some(slot) = inner.find(pid) {
				let p = ProcRef {
					table: table.index(),
					slot,
				};
				let proc = inner.slot_mut(p);
				proc.killed = true;
				if proc.state == ProcState::Sleeping {
					inner.enqueue(p);
				}
				return Ok(());
			}
		}
		Err(ProcError::NoSuchProcess)
	}

	/// Grow (or, with a negative `delta`, shrink) the calling process's
	/// memory by `delta` bytes (`growproc`). Returns the new size.
	///
	/// On failure the size and the address space are unchanged.
	pub fn grow_memory(&self, delta: isize) -> Result<usize> {
		let me = self.me("grow_memory");
		let (space, old) = {
			let mut table = self.table(me.table).lock();
			let proc = table.slot_mut(me);
			(proc.space.take(), proc.size)
		};
		let mut space = match space {
			Some(space) => space,
			None => return Err(ProcError::OutOfMemory),
		};

		let resized = old.checked_add_signed(delta).and_then(|new| space.resize(old, new));
		if resized.is_some() {
			space.activate();
		}

		let mut table = self.table(me.table).lock();
		let proc = table.slot_mut(me);
		proc.space = Some(space);
		match resized {
			Some(size) => {
				proc.size = size;
				Ok(size)
			}
			None => Err(ProcError::OutOfMemory),
		}
	}

	/// Return a slot that never became runnable to FREE.
	fn release_slot(&self, p: ProcRef) {
		let (stack, space) = self.table(p.table).lock().slot_mut(p).reset();
		drop(stack);
		drop(space);
	}
}
