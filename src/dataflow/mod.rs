//! The dataflow scheduler (spec.md §4.3).
//!
//! Grounded on the teacher's `dbs/store/parallel.rs` (a channel-fed worker
//! task spawned with `tokio::spawn`) and `dbs/processor.rs` (enum-dispatched
//! unit of work); generalized from "one executor task per document batch" to
//! "one worker pool shared by every dataflow region in the process".

pub mod admission;
pub mod graph;
pub mod region;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::instrument;

use crate::err::Error;
use crate::frame::Frame;
use crate::ir::Block;
use crate::session::Session;

pub use admission::{AdmissionGate, FairnessGate};
pub use graph::DependencyGraph;
pub use region::{InstructionState, Region};
pub use worker::WorkerPool;

/// *run_dataflow(session, block, start, stop, frame)*: executes instructions
/// `[start, stop)` of `block` in parallel, respecting data dependencies.
#[instrument(level = "debug", name = "dataflow", skip(session, block, frame, pool, admission, fairness))]
pub fn run_dataflow(
	session: &Session,
	block: &Block,
	start: usize,
	stop: usize,
	frame: &mut Frame,
	pool: &WorkerPool,
	admission: &AdmissionGate,
	fairness: &FairnessGate,
) -> Result<(), Error> {
	if stop <= start {
		return Err(Error::EmptyDataflowBlock);
	}

	// Step 1: join any EXITED workers.
	pool.reap_exited();

	// Step 2: reserve one worker for this session.
	let reservation = pool.reserve_for_session(session.id);

	// Step 4: build the dependency graph.
	let graph = DependencyGraph::build(block, start, stop);
	let region = Arc::new(Region::new(graph, stop - start));

	// Step 5: enqueue every instruction whose block-count is zero.
	for pc in start..stop {
		let local = pc - start;
		if region.graph.block_count(local) == 0 {
			let argclaim = region.graph.initial_argclaim(frame, block, pc);
			pool.enqueue(session.id, pc, argclaim);
		}
	}

	// Step 6: signal the reserved worker (or run serially if none available).
	match reservation {
		worker::Reservation::Worker(handle) => {
			pool.signal(&handle);
		}
		worker::Reservation::None => {
			run_serially(session, block, start, stop, frame, &region)?;
			pool.finish_region(&region);
			return region.take_error().map_or(Ok(()), Err);
		}
	}

	// Step 7: drain the region's done queue until every instruction has
	// reached WRAPUP or an error aborts the remainder.
	worker::drain_region(session, block, frame, pool, admission, fairness, &region);

	// Step 8: destroy the graph, compensate the pool by one exit.
	pool.finish_region(&region);

	region.take_error().map_or(Ok(()), Err)
}

/// Fallback path when no worker could be reserved: executes the range on the
/// calling thread instruction by instruction, still respecting the graph's
/// topological order by repeatedly scanning for ready instructions.
fn run_serially(
	session: &Session,
	block: &Block,
	start: usize,
	stop: usize,
	frame: &mut Frame,
	region: &Region,
) -> Result<(), Error> {
	let mut remaining = stop - start;
	while remaining > 0 {
		let local = (0..stop - start)
			.find(|&l| region.state_of(l) == InstructionState::Pending && region.graph.block_count(l) == 0);
		let local = match local {
			Some(l) => l,
			None => break,
		};
		region.set_state(local, InstructionState::Running);
		let pc = start + local;
		match crate::interp::reenter(session, block, pc, pc + 1, frame) {
			Ok(_) => {
				region.set_state(local, InstructionState::Wrapup);
			}
			Err(e) => {
				region.try_set_error(e);
				region.set_state(local, InstructionState::Wrapup);
				region.skip_remaining();
				break;
			}
		}
		region.wake_successors(local);
		remaining -= 1;
	}
	Ok(())
}

/// A process-wide flag polled at dequeue and at each wrap-up (spec.md §5
/// "Cancellation & timeouts").
pub static EXITING: AtomicBool = AtomicBool::new(false);

pub fn request_shutdown() {
	EXITING.store(true, Ordering::SeqCst);
}

pub fn is_exiting() -> bool {
	EXITING.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ir::{Instruction, Opcode, Variable, VarType};
	use crate::session::SessionTable;

	#[test]
	fn empty_range_raises_empty_dataflow_block() {
		let table = SessionTable::init(2);
		let console = table.console();
		let block = Block::new("user", "f");
		let mut frame = crate::frame::Frame::prepare_stack(Arc::new(block.clone()), 1);
		let pool = WorkerPool::new(2, 4);
		let admission = AdmissionGate::new(1 << 20);
		let fairness = FairnessGate::new();
		let result = run_dataflow(&console, &block, 3, 3, &mut frame, &pool, &admission, &fairness);
		assert!(matches!(result, Err(Error::EmptyDataflowBlock)));
	}

	#[test]
	fn serial_fallback_runs_independent_instructions() {
		let table = SessionTable::init(2);
		let console = table.console();
		let mut block = Block::new("user", "f");
		block.push_var(Variable::new("a", VarType::Int64));
		let mut noop = Instruction::new(Opcode::Noop);
		noop.retc = 0;
		block.push_instr(noop);
		let arc_block = Arc::new(block.clone());
		let mut frame = crate::frame::Frame::prepare_stack(arc_block, 2);
		let pool = WorkerPool::new(0, 0);
		let admission = AdmissionGate::new(1 << 20);
		let fairness = FairnessGate::new();
		let result = run_dataflow(&console, &block, 0, 1, &mut frame, &pool, &admission, &fairness);
		assert!(result.is_ok());
	}
}
