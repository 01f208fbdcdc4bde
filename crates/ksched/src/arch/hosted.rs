//! Hosted platform: the scheduler on ordinary host threads.
//!
//! Every flow of execution (each CPU's scheduler loop, each process) is a
//! host thread. Exactly one flow per simulated CPU is allowed to run at a
//! time: `switch` hands a baton to the target flow, tagged with the CPU it
//! is to run on, and parks the caller until someone hands the baton back.
//! CPUs therefore run genuinely in parallel while each CPU stays strictly
//! sequential, which is the property the scheduler's locking relies on.
//!
//! Threads that are not bound to a CPU (a test's main thread) run as the
//! "observer" CPU, `MAX_CPUS - 1`, so they can take table locks to inspect
//! state. Only one observer thread per kernel may do so at a time.
//!
//! Also here: a simulated virtual-memory collaborator, a counted resource
//! for file/directory handles, a `log` backend, and [`Machine`], which
//! boots a complete hosted kernel for tests.

use std::boxed::Box;
use std::cell::Cell;
use std::format;
use std::string::String;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};
use std::vec::Vec;

use crate::arch::{Context, FlowEntry, KernelStack, Platform, TrapFrame};
use crate::config::SchedConfig;
use crate::param::MAX_CPUS;
use crate::resource::{AddressSpace, Resource, VirtualMemory};
use crate::task::dump::ProcInfo;
use crate::task::Kernel;

/// CPU index reported by threads not bound to a simulated CPU.
pub const OBSERVER_CPU: usize = MAX_CPUS - 1;

/// How long an idle CPU sleeps before rescanning.
const IDLE_NAP: Duration = Duration::from_micros(100);

std::thread_local! {
	static CPU: Cell<Option<usize>> = const { Cell::new(None) };
	static FLOW: Cell<usize> = const { Cell::new(0) };
}

/// A user program: called with the frame the process resumes into.
/// Returning from it exits the process.
pub type Program = Box<dyn Fn(&'static Kernel, TrapFrame) + Send + Sync>;

// ── Baton ───────────────────────────────────────────────────────

/// Permission to run, carrying the CPU to run on.
struct Baton {
	cpu: Mutex<Option<usize>>,
	ready: Condvar,
}

impl Baton {
	fn new() -> Self {
		Self {
			cpu: Mutex::new(None),
			ready: Condvar::new(),
		}
	}

	fn give(&self, cpu: usize) {
		let mut slot = self.cpu.lock().unwrap_or_else(|e| e.into_inner());
		*slot = Some(cpu);
		self.ready.notify_one();
	}

	fn take(&self) -> usize {
		let mut slot = self.cpu.lock().unwrap_or_else(|e| e.into_inner());
		loop {
			if let Some(cpu) = slot.take() {
				return cpu;
			}
			slot = self.ready.wait(slot).unwrap_or_else(|e| e.into_inner());
		}
	}
}

// ── Platform ────────────────────────────────────────────────────

/// Thread-backed [`Platform`].
pub struct HostedPlatform {
	cpus: usize,
	irq: [AtomicBool; MAX_CPUS],
	/// Flow batons, indexed by flow token. Token 0 means "no flow".
	flows: Mutex<Vec<Arc<Baton>>>,
	program: Option<Program>,
	fail_stacks: AtomicBool,
}

impl HostedPlatform {
	/// A platform with `cpus` schedulable CPUs (plus the observer).
	pub fn new(cpus: usize) -> Self {
		assert!(cpus < MAX_CPUS, "hosted: cpu {} is reserved for observers", OBSERVER_CPU);
		Self {
			cpus,
			irq: [const { AtomicBool::new(false) }; MAX_CPUS],
			flows: Mutex::new(std::vec![Arc::new(Baton::new())]),
			program: None,
			fail_stacks: AtomicBool::new(false),
		}
	}

	/// Install the user program every process runs.
	pub fn with_program(mut self, program: impl Fn(&'static Kernel, TrapFrame) + Send + Sync + 'static) -> Self {
		self.program = Some(Box::new(program));
		self
	}

	/// Make subsequent kernel stack allocations fail (or succeed again).
	pub fn fail_stacks(&self, fail: bool) {
		self.fail_stacks.store(fail, Ordering::SeqCst);
	}

	/// Bind the calling thread to a simulated CPU.
	pub fn bind_current_thread(&self, cpu: usize) {
		assert!(cpu < self.cpus, "hosted: no cpu {}", cpu);
		CPU.with(|c| c.set(Some(cpu)));
	}

	/// Start one scheduler thread per CPU.
	pub fn start_cpus(&'static self, kernel: &'static Kernel) {
		for cpu in 0..self.cpus {
			let flow = self.new_flow();
			thread::Builder::new()
				.name(format!("cpu{}", cpu))
				.spawn(move || {
					CPU.with(|c| c.set(Some(cpu)));
					FLOW.with(|f| f.set(flow));
					kernel.scheduler_loop()
				})
				.expect("hosted: spawn cpu thread");
		}
	}

	fn new_flow(&self) -> usize {
		let mut flows = self.flows.lock().unwrap_or_else(|e| e.into_inner());
		flows.push(Arc::new(Baton::new()));
		flows.len() - 1
	}

	fn baton(&self, flow: usize) -> Arc<Baton> {
		let flows = self.flows.lock().unwrap_or_else(|e| e.into_inner());
		flows[flow].clone()
	}
}

impl Platform for HostedPlatform {
	fn cpu_id(&self) -> usize {
		CPU.with(|c| c.get()).unwrap_or(OBSERVER_CPU)
	}

	fn interrupts_enabled(&self) -> bool {
		self.irq[self.cpu_id()].load(Ordering::SeqCst)
	}

	fn enable_interrupts(&self) {
		self.irq[self.cpu_id()].store(true, Ordering::SeqCst);
	}

	fn disable_interrupts(&self) {
		self.irq[self.cpu_id()].store(false, Ordering::SeqCst);
	}

	fn wait_for_interrupt(&self) {
		thread::sleep(IDLE_NAP);
	}

	// A preempted ticket holder is another host thread: let it run.
	fn relax(&self) {
		thread::yield_now();
	}

	fn alloc_stack(&self) -> Option<Box<KernelStack>> {
		if self.fail_stacks.load(Ordering::SeqCst) {
			return None;
		}
		KernelStack::try_new()
	}

	unsafe fn prepare(&self, ctx: &mut Context, _stack: &mut KernelStack, entry: FlowEntry, arg: usize) {
		let flow = self.new_flow();
		let baton = self.baton(flow);
		thread::Builder::new()
			.name(format!("flow{}", flow))
			.spawn(move || {
				FLOW.with(|f| f.set(flow));
				let cpu = baton.take();
				CPU.with(|c| c.set(Some(cpu)));
				entry(arg)
			})
			.expect("hosted: spawn flow thread");
		ctx.sp = flow;
	}

	unsafe fn switch(&self, from: *mut Context, to: *const Context) {
		let me = FLOW.with(|f| f.get());
		assert!(me != 0, "hosted: switch from a thread with no flow");
		let cpu = self.cpu_id();
		// SAFETY: the caller guarantees both contexts are valid.
		let target = unsafe {
			(*from).sp = me;
			(*to).sp
		};
		let mine = self.baton(me);
		self.baton(target).give(cpu);
		let cpu = mine.take();
		CPU.with(|c| c.set(Some(cpu)));
	}

	fn enter_user(&self, kernel: &'static Kernel, frame: TrapFrame) -> ! {
		if let Some(program) = &self.program {
			program(kernel, frame);
		}
		kernel.exit()
	}
}

// ── Virtual memory ──────────────────────────────────────────────

/// Simulated virtual-memory collaborator with failure injection.
#[derive(Default)]
pub struct HostedVm {
	state: Arc<VmState>,
}

#[derive(Default)]
struct VmState {
	live: AtomicUsize,
	fail_copy: AtomicBool,
	fail_grow: AtomicBool,
}

impl HostedVm {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of address spaces currently alive.
	pub fn live_spaces(&self) -> usize {
		self.state.live.load(Ordering::SeqCst)
	}

	/// Make address-space duplication fail.
	pub fn fail_copy(&self, fail: bool) {
		self.state.fail_copy.store(fail, Ordering::SeqCst);
	}

	/// Make resizing fail.
	pub fn fail_grow(&self, fail: bool) {
		self.state.fail_grow.store(fail, Ordering::SeqCst);
	}
}

impl VmState {
	fn space(self: &Arc<Self>, size: usize) -> Box<dyn AddressSpace> {
		self.live.fetch_add(1, Ordering::SeqCst);
		Box::new(HostedSpace {
			state: self.clone(),
			size,
		})
	}
}

impl VirtualMemory for HostedVm {
	fn create(&self, image: &[u8]) -> Option<Box<dyn AddressSpace>> {
		Some(self.state.space(image.len()))
	}

	fn activate_kernel(&self) {}
}

struct HostedSpace {
	state: Arc<VmState>,
	size: usize,
}

impl AddressSpace for HostedSpace {
	fn duplicate(&self, size: usize) -> Option<Box<dyn AddressSpace>> {
		if self.state.fail_copy.load(Ordering::SeqCst) {
			return None;
		}
		Some(self.state.space(size))
	}

	fn resize(&mut self, old: usize, new: usize) -> Option<usize> {
		debug_assert_eq!(old, self.size, "hosted: resize from a stale size");
		if self.state.fail_grow.load(Ordering::SeqCst) {
			return None;
		}
		self.size = new;
		Some(new)
	}

	fn activate(&self) {}
}

impl Drop for HostedSpace {
	fn drop(&mut self) {
		self.state.live.fetch_sub(1, Ordering::SeqCst);
	}
}

// ── Resources ───────────────────────────────────────────────────

/// A file or directory handle that counts its releases.
pub struct CountedResource {
	released: Arc<AtomicUsize>,
}

impl CountedResource {
	/// A resource bumping `released` when the last reference goes away.
	pub fn new(released: Arc<AtomicUsize>) -> Self {
		Self { released }
	}
}

impl Resource for CountedResource {}

impl Drop for CountedResource {
	fn drop(&mut self) {
		self.released.fetch_add(1, Ordering::SeqCst);
	}
}

// ── Logging ─────────────────────────────────────────────────────

struct HostLogger;

impl HostLogger {
	fn color(level: log::Level) -> &'static str {
		match level {
			log::Level::Trace => "\x1b[90m",
			log::Level::Debug => "\x1b[36m",
			log::Level::Info => "\x1b[32m",
			log::Level::Warn => "\x1b[33m",
			log::Level::Error => "\x1b[31m",
		}
	}
}

impl log::Log for HostLogger {
	fn enabled(&self, metadata: &log::Metadata) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &log::Record) {
		if self.enabled(record.metadata()) {
			std::eprintln!(
				"{}[{:>5}]\x1b[0m {}",
				Self::color(record.level()),
				record.level(),
				record.args()
			);
		}
	}

	fn flush(&self) {}
}

static LOGGER: HostLogger = HostLogger;

/// Install the stderr logger once. `KSCHED_LOG` picks the level
/// (default `warn`).
pub fn init_logging() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let level = std::env::var("KSCHED_LOG")
			.ok()
			.and_then(|v| v.parse().ok())
			.unwrap_or(log::LevelFilter::Warn);
		if log::set_logger(&LOGGER).is_ok() {
			log::set_max_level(level);
		}
	});
}

// ── Machine ─────────────────────────────────────────────────────

/// Image handed to the simulated VM for the first process.
pub const INITCODE: &[u8] = &[0u8; crate::param::PGSIZE];

/// A booted hosted kernel: tables initialised, init process created,
/// one scheduler thread per CPU running.
pub struct Machine {
	pub kernel: &'static Kernel,
	pub platform: &'static HostedPlatform,
	pub vm: &'static HostedVm,
	/// Releases of the init process's current directory handle.
	pub root_released: Arc<AtomicUsize>,
}

impl Machine {
	/// Boot a machine whose processes all run `program`.
	pub fn boot(config: SchedConfig, program: impl Fn(&'static Kernel, TrapFrame) + Send + Sync + 'static) -> Machine {
		init_logging();
		let platform: &'static HostedPlatform = Box::leak(Box::new(HostedPlatform::new(config.cpus).with_program(program)));
		let vm: &'static HostedVm = Box::leak(Box::new(HostedVm::new()));
		let kernel = Kernel::init(config, platform, vm).expect("hosted: valid config");
		let root_released = Arc::new(AtomicUsize::new(0));
		kernel
			.bootstrap_first_process(INITCODE, Arc::new(CountedResource::new(root_released.clone())))
			.expect("hosted: init process");
		platform.start_cpus(kernel);
		Machine {
			kernel,
			platform,
			vm,
			root_released,
		}
	}

	/// Poll the process snapshot until `pred` holds; panics after 10 s.
	pub fn wait_for(&self, what: &str, pred: impl Fn(&[ProcInfo]) -> bool) -> Vec<ProcInfo> {
		let deadline = Instant::now() + Duration::from_secs(10);
		loop {
			let snap = self.kernel.snapshot();
			if pred(&snap) {
				return snap;
			}
			if Instant::now() > deadline {
				let tables: String = (0..self.kernel.ncpu()).map(|c| self.kernel.dump(c)).collect();
				panic!("timed out waiting for {}\n{}", what, tables);
			}
			thread::sleep(Duration::from_millis(1));
		}
	}
}
