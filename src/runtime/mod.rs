//! The process-wide runtime singleton (spec.md §9 REDESIGN FLAGS:
//! "Encapsulate global mutable state — the session table, worker pool, and
//! admission pool — in a single `Runtime` struct instead of free-standing
//! process globals").
//!
//! Grounded on the teacher's `Datastore` in `core/src/kvs/ds.rs`, which plays
//! the same role of an `Arc`-held top-level handle wiring together the
//! transaction layer, capabilities, and node registration.

use std::sync::Arc;

use crate::cnf;
use crate::dataflow::admission::{AdmissionGate, FairnessGate};
use crate::dataflow::worker::WorkerPool;
use crate::err::Error;
use crate::ir::Block;
use crate::session::{Session, SessionTable};

/// Owns every piece of process-wide mutable state this crate needs: the
/// client table, the worker pool, the memory admission gate, and the
/// fairness gate.
pub struct Runtime {
	sessions: SessionTable,
	workers: WorkerPool,
	admission: AdmissionGate,
	fairness: FairnessGate,
}

impl Runtime {
	pub fn new() -> Runtime {
		Runtime {
			sessions: SessionTable::init(*cnf::MAX_CLIENTS),
			workers: WorkerPool::new(*cnf::GDK_NR_THREADS, *cnf::DATAFLOW_MAX_FREE),
			admission: AdmissionGate::new(*cnf::MEMORY_THRESHOLD_BYTES),
			fairness: FairnessGate::new(),
		}
	}

	pub fn sessions(&self) -> &SessionTable {
		&self.sessions
	}

	pub fn workers(&self) -> &WorkerPool {
		&self.workers
	}

	pub fn admission(&self) -> &AdmissionGate {
		&self.admission
	}

	pub fn fairness(&self) -> &FairnessGate {
		&self.fairness
	}

	/// Convenience wrapper running a dataflow block on a freshly created
	/// client session, tearing the session down afterward regardless of
	/// outcome.
	pub fn run_once(&self, block: Arc<Block>) -> Result<(), Error> {
		let session = self.sessions.new_client()?;
		let end = block.instructions.len();
		let mut frame = crate::frame::Frame::prepare_stack(block.clone(), 0);
		let result = crate::dataflow::run_dataflow(
			&session,
			&block,
			0,
			end,
			&mut frame,
			&self.workers,
			&self.admission,
			&self.fairness,
		);
		let _ = self.sessions.close(session.id);
		result
	}

	pub fn shutdown(&self) {
		crate::dataflow::request_shutdown();
		self.sessions.stop_all(0);
	}
}

impl Default for Runtime {
	fn default() -> Self {
		Runtime::new()
	}
}
