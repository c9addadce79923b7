//! A dataflow region: the live state of one `run_dataflow` call (spec.md §3
//! "Dataflow Region", §4.3).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};

use crate::dataflow::graph::DependencyGraph;
use crate::err::Error;

/// Per-instruction lifecycle state (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InstructionState {
	Pending = 0,
	Running = 1,
	Wrapup = 2,
	Retry = 3,
	Skipped = 4,
}

impl InstructionState {
	fn from_u8(v: u8) -> InstructionState {
		match v {
			0 => InstructionState::Pending,
			1 => InstructionState::Running,
			2 => InstructionState::Wrapup,
			3 => InstructionState::Retry,
			_ => InstructionState::Skipped,
		}
	}
}

/// A guarded sub-range `[start, stop)` of an IR block, with its dependency
/// graph, shared error slot, and done queue.
pub struct Region {
	pub graph: DependencyGraph,
	states: Vec<AtomicU8>,
	/// Set at most once via compare-and-swap; later errors are discarded.
	error_slot: Mutex<Option<Error>>,
	done: Mutex<VecDeque<usize>>,
	done_signal: Condvar,
	remaining: std::sync::atomic::AtomicUsize,
}

impl Region {
	pub fn new(graph: DependencyGraph, len: usize) -> Region {
		Region {
			graph,
			states: (0..len).map(|_| AtomicU8::new(InstructionState::Pending as u8)).collect(),
			error_slot: Mutex::new(None),
			done: Mutex::new(VecDeque::new()),
			done_signal: Condvar::new(),
			remaining: std::sync::atomic::AtomicUsize::new(len),
		}
	}

	pub fn len(&self) -> usize {
		self.states.len()
	}

	pub fn state_of(&self, local: usize) -> InstructionState {
		InstructionState::from_u8(self.states[local].load(Ordering::SeqCst))
	}

	pub fn set_state(&self, local: usize, s: InstructionState) {
		self.states[local].store(s as u8, Ordering::SeqCst);
	}

	/// Compare-and-swap: only the first error wins; later callers' errors are
	/// discarded (spec.md "the error slot is set at most once").
	pub fn try_set_error(&self, err: Error) {
		let mut slot = self.error_slot.lock().unwrap();
		if slot.is_none() {
			*slot = Some(err);
		}
	}

	pub fn has_error(&self) -> bool {
		self.error_slot.lock().unwrap().is_some()
	}

	pub fn take_error(&self) -> Option<Error> {
		self.error_slot.lock().unwrap().take()
	}

	/// Marks every instruction not yet WRAPUP as SKIPPED (spec.md "on error,
	/// remaining instructions in the region transition to SKIPPED").
	pub fn skip_remaining(&self) {
		for i in 0..self.states.len() {
			if self.state_of(i) != InstructionState::Wrapup {
				self.set_state(i, InstructionState::Skipped);
			}
		}
	}

	/// Decrements successors' block-counts and enqueues newly eligible ones
	/// onto the region's own wake list (distinct from the pool's todo-queue;
	/// the scheduler reads this to requeue work, per spec.md step 7).
	pub fn wake_successors(&self, local: usize) -> Vec<usize> {
		let mut ready = Vec::new();
		for &succ in &self.graph.wakeup_list(local) {
			if self.graph.decrement(succ) == 0 {
				ready.push(succ);
			}
		}
		ready
	}

	/// Pushes a completed local index onto the region's done queue, waking
	/// the scheduler thread draining it. The queue is a LIFO (spec.md §4.3,
	/// matching `mal_dataflow.c`'s "keep a simple LIFO queue"): the
	/// most-recently-finished instruction is the one most likely to have
	/// just unblocked a hot-potato successor, so it is drained first.
	pub fn push_done(&self, local: usize) {
		self.done.lock().unwrap().push_back(local);
		self.done_signal.notify_one();
		self.remaining.fetch_sub(1, Ordering::SeqCst);
	}

	pub fn all_done(&self) -> bool {
		self.remaining.load(Ordering::SeqCst) == 0
	}
}
