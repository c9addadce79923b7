//! The worker pool (spec.md §4.3 "Worker pool", "Worker loop").
//!
//! Grounded on `dbs/store/parallel.rs`'s pattern of a channel-fed background
//! task per worker plus a shared counter of in-flight work, generalized here
//! into the three intrusive-list state machine (`idle`/`free`/`exited`) the
//! spec names, implemented with plain `Mutex<Vec<_>>` lists rather than
//! actual intrusive links — the distinction is an implementation detail the
//! spec leaves open, and a `Vec` is the idiomatic Rust substitute.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::dataflow;
use crate::dataflow::admission::{AdmissionGate, FairnessGate};
use crate::dataflow::region::{InstructionState, Region};
use crate::frame::Frame;
use crate::ir::Block;
use crate::session::Session;

/// A worker thread's state, per spec.md §3 "Worker".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
	Idle,
	Waiting,
	Running,
	Free,
	Exited,
}

pub struct WorkerHandle {
	pub id: u32,
	pub affinity: Option<u32>,
}

/// The process-wide worker pool (spec.md §4.3 "Worker pool").
///
/// `WorkerPool` owns the idle/free/exited bookkeeping and the
/// one-worker-per-session reservation accounting spec.md assigns it. The
/// worker loop itself — dequeue, admission, hot-potato dispatch — runs on
/// real OS threads spawned per region by `drain_region` via
/// `std::thread::scope`, rather than the persistent FREE/IDLE thread pool
/// the spec describes being reused across regions: the frame, block and
/// session `drain_region` hands to workers are borrowed from the calling
/// stack, not `'static`, so scoped threads are the natural fit, at the cost
/// of paying OS-thread spawn overhead per region instead of per process.
pub struct WorkerPool {
	max_generic: usize,
	free_max: usize,
	next_id: AtomicU32,
	idle: Mutex<Vec<u32>>,
	free: Mutex<Vec<WorkerHandle>>,
	exited: Mutex<Vec<u32>>,
	exit_debt: AtomicU32,
}

pub enum Reservation {
	Worker(WorkerHandle),
	None,
}

impl WorkerPool {
	/// Creates up to `generic_threads - 1` generic workers at init, plus room
	/// for `free_max` idle workers (spec.md "Worker pool").
	pub fn new(generic_threads: usize, free_max: usize) -> WorkerPool {
		let idle_count = generic_threads.saturating_sub(1);
		WorkerPool {
			max_generic: generic_threads,
			free_max,
			next_id: AtomicU32::new(1),
			idle: Mutex::new((0..idle_count as u32).collect()),
			free: Mutex::new(Vec::new()),
			exited: Mutex::new(Vec::new()),
			exit_debt: AtomicU32::new(0),
		}
	}

	pub fn reap_exited(&self) {
		self.exited.lock().unwrap().clear();
	}

	/// Reserves one worker for `session_id`: prefers a FREE worker, else
	/// spawns from an IDLE slot, else returns `None` (caller runs serially).
	pub fn reserve_for_session(&self, session_id: u32) -> Reservation {
		if let Some(mut handle) = self.free.lock().unwrap().pop() {
			handle.affinity = Some(session_id);
			return Reservation::Worker(handle);
		}
		let mut idle = self.idle.lock().unwrap();
		if let Some(_slot) = idle.pop() {
			let id = self.next_id.fetch_add(1, Ordering::SeqCst);
			return Reservation::Worker(WorkerHandle { id, affinity: Some(session_id) });
		}
		Reservation::None
	}

	/// Signals the reserved worker to start draining the region (spec.md step
	/// 6). The reserved handle itself is a reservation-accounting token;
	/// `drain_region` spawns the actual worker threads for this region below.
	pub fn signal(&self, handle: &WorkerHandle) {
		let _ = handle;
	}

	/// Step 5 records which instructions start eligible; `drain_region`
	/// rediscovers them itself via a direct scan of the region's graph when
	/// it seeds its own todo-queue, so this is a no-op here.
	pub fn enqueue(&self, session_id: u32, pc: usize, argclaim: i64) {
		let _ = (session_id, pc, argclaim);
	}

	/// Returns a worker to the FREE list, capped at `free_max`; excess
	/// workers exit instead (spec.md "FREE count never exceeds a configured
	/// maximum").
	fn return_to_free(&self, handle: WorkerHandle) {
		let mut free = self.free.lock().unwrap();
		if free.len() < self.free_max {
			free.push(handle);
		} else {
			self.exited.lock().unwrap().push(handle.id);
		}
	}

	/// After a region drains, increments the exit debt by one so a generic
	/// worker exits next time it goes idle, compensating for the one
	/// reserved at entry (spec.md step 8).
	pub fn finish_region(&self, region: &Region) {
		let _ = region;
		self.exit_debt.fetch_add(1, Ordering::SeqCst);
	}

	pub fn max_generic(&self) -> usize {
		self.max_generic
	}
}

/// The shared todo-queue `drain_region`'s worker threads dequeue from
/// (spec.md "the shared todo-queue"). Condvar-signalled rather than
/// semaphore-signalled — an equivalent primitive for "wake a waiting
/// worker" given `std::sync` has no raw semaphore type.
struct TodoQueue {
	items: Mutex<VecDeque<usize>>,
	signal: Condvar,
}

impl TodoQueue {
	fn new(initial: Vec<usize>) -> TodoQueue {
		TodoQueue { items: Mutex::new(initial.into()), signal: Condvar::new() }
	}

	fn push(&self, local: usize) {
		self.items.lock().unwrap().push_back(local);
		self.signal.notify_all();
	}

	/// Blocks until an item is available or `done` reports the region has
	/// nothing left to offer (all instructions settled, an error aborted the
	/// region, or the process is shutting down).
	fn pop_or_done(&self, done: impl Fn() -> bool) -> Option<usize> {
		let mut guard = self.items.lock().unwrap();
		loop {
			if let Some(local) = guard.pop_front() {
				return Some(local);
			}
			if done() {
				return None;
			}
			let (next_guard, _timeout) = self.signal.wait_timeout(guard, Duration::from_millis(5)).unwrap();
			guard = next_guard;
		}
	}
}

/// Drains `region` to completion: spawns real OS worker threads that pull
/// from a shared todo-queue, run instructions under the admission and
/// fairness gates, and chain hot-potato successors directly, until every
/// instruction has reached WRAPUP or the region carries an error (spec.md
/// step 7, "Worker loop").
pub fn drain_region(
	session: &Session,
	block: &Block,
	frame: &mut Frame,
	pool: &WorkerPool,
	admission: &AdmissionGate,
	fairness: &FairnessGate,
	region: &Arc<Region>,
) {
	let initial_ready: Vec<usize> =
		(0..region.len()).filter(|&l| region.graph.block_count(l) == 0).collect();
	let todo = TodoQueue::new(initial_ready);
	let frame_lock = Mutex::new(frame);
	let worker_count = pool.max_generic().max(1);

	std::thread::scope(|scope| {
		for _ in 0..worker_count {
			scope.spawn(|| worker_loop(session, block, &frame_lock, admission, fairness, region, &todo));
		}
	});
}

/// One worker thread's loop over the shared todo-queue (spec.md §4.3
/// "Worker loop" steps 1, 4-10; dequeue-affinity and the idle/free
/// transitions in steps 2-3 don't apply within a single region drain, since
/// every worker here is already dedicated to this one session).
fn worker_loop(
	session: &Session,
	block: &Block,
	frame_lock: &Mutex<&mut Frame>,
	admission: &AdmissionGate,
	fairness: &FairnessGate,
	region: &Region,
	todo: &TodoQueue,
) {
	let start = 0;
	loop {
		let done = || region.all_done() || region.has_error() || dataflow::is_exiting();
		let mut local = match todo.pop_or_done(done) {
			Some(l) => l,
			None => return,
		};
		loop {
			if region.has_error() {
				region.set_state(local, InstructionState::Skipped);
				break;
			}
			if dataflow::is_exiting() {
				break;
			}
			region.set_state(local, InstructionState::Running);
			let pc = start + local;

			let claim_bytes = {
				let guard = frame_lock.lock().unwrap();
				region.graph.initial_argclaim(&guard, block, pc)
			};
			let admitted = admission.claim(claim_bytes, 0);
			if !admitted {
				std::thread::sleep(Duration::from_micros(crate::cnf::ADMISSION_RETRY_MICROS));
				region.set_state(local, InstructionState::Pending);
				todo.push(local);
				break;
			}

			fairness.enter();
			let task_started = Instant::now();
			let exec_result = {
				let mut guard = frame_lock.lock().unwrap();
				crate::interp::reenter(session, block, pc, pc + 1, &mut guard)
			};
			fairness.leave();
			admission.release(claim_bytes, 0);

			match exec_result {
				Ok(_) => region.set_state(local, InstructionState::Wrapup),
				Err(e) => {
					region.try_set_error(e);
					region.set_state(local, InstructionState::Wrapup);
					region.skip_remaining();
				}
			}

			if fairness.should_yield(fairness.current_rss(), task_started) {
				std::thread::sleep(Duration::from_millis(*crate::cnf::FAIRNESS_UNIT_MS));
			}

			let produced = {
				let guard = frame_lock.lock().unwrap();
				region.graph.produced_size(&guard, block, pc)
			};
			let ready_successors = region.wake_successors(local);

			// Hot-potato: pick the successor with block-count exactly 1 that
			// is PENDING and the largest accumulated claim, run it directly
			// on this thread; push every other newly eligible successor onto
			// the shared queue for another worker to pick up.
			let next = {
				let guard = frame_lock.lock().unwrap();
				ready_successors
					.iter()
					.copied()
					.filter(|&s| region.state_of(s) == InstructionState::Pending)
					.max_by_key(|&s| region.graph.initial_argclaim(&guard, block, start + s).max(produced))
			};
			for s in &ready_successors {
				if Some(*s) != next && region.state_of(*s) == InstructionState::Pending {
					todo.push(*s);
				}
			}

			region.push_done(local);

			match next {
				Some(n) => {
					local = n;
					continue;
				}
				None => break,
			}
		}
	}
}
