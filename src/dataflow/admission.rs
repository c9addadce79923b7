//! The memory admission gate and fairness gate (spec.md §4.3 "Memory
//! admission").
//!
//! No single teacher file owns an admission controller; this is composed
//! from the counting/claim pattern in `dbs/store/parallel.rs` (tracking
//! in-flight work with an atomic counter) plus `tracing` spans at each
//! claim/refusal so admission pressure is observable, per SPEC_FULL.md §3.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tracing::{instrument, trace};

use crate::cnf;

/// A process-wide gate governing how many concurrent "expensive" dataflow
/// instructions may run at once.
pub struct AdmissionGate {
	pool: AtomicI64,
	claims: AtomicU32,
}

impl AdmissionGate {
	pub fn new(initial_pool: i64) -> AdmissionGate {
		AdmissionGate { pool: AtomicI64::new(initial_pool), claims: AtomicU32::new(0) }
	}

	/// *claim(argument_bytes, hot_bytes)*: admits immediately if both
	/// arguments are zero; otherwise admits only if there are no active
	/// claims or the pool can cover the request.
	#[instrument(level = "trace", skip(self))]
	pub fn claim(&self, argument_bytes: i64, hot_bytes: i64) -> bool {
		if argument_bytes == 0 && hot_bytes == 0 {
			return true;
		}
		let need = argument_bytes + hot_bytes;
		loop {
			let active = self.claims.load(Ordering::SeqCst);
			let pool = self.pool.load(Ordering::SeqCst);
			if active != 0 && pool < need {
				trace!(need, pool, active, "admission refused");
				return false;
			}
			let new_pool = pool - need;
			if self
				.pool
				.compare_exchange(pool, new_pool, Ordering::SeqCst, Ordering::SeqCst)
				.is_ok()
			{
				self.claims.fetch_add(1, Ordering::SeqCst);
				trace!(need, new_pool, "admission granted");
				return true;
			}
		}
	}

	/// *release(argument_bytes, hot_bytes)*: adds the bytes back and
	/// decrements the claim count.
	pub fn release(&self, argument_bytes: i64, hot_bytes: i64) {
		if argument_bytes == 0 && hot_bytes == 0 {
			return;
		}
		self.pool.fetch_add(argument_bytes + hot_bytes, Ordering::SeqCst);
		self.claims.fetch_sub(1, Ordering::SeqCst);
	}

	pub fn active_claims(&self) -> u32 {
		self.claims.load(Ordering::SeqCst)
	}

	pub fn pool_remaining(&self) -> i64 {
		self.pool.load(Ordering::SeqCst)
	}
}

/// A separate fairness gate: delays worker threads when process RSS exceeds
/// the threshold and the current operation has run longer than a fairness
/// unit, briefly yielding so one thread always remains active.
pub struct FairnessGate {
	running: AtomicU32,
	/// Last RSS sample reported by an external monitor (spec.md §1: reading
	/// actual process memory is out of this crate's scope). Defaults to zero,
	/// which keeps `should_yield` inert until something calls `report_rss`.
	sampled_rss: AtomicI64,
}

impl FairnessGate {
	pub fn new() -> FairnessGate {
		FairnessGate { running: AtomicU32::new(0), sampled_rss: AtomicI64::new(0) }
	}

	pub fn enter(&self) {
		self.running.fetch_add(1, Ordering::SeqCst);
	}

	pub fn leave(&self) {
		self.running.fetch_sub(1, Ordering::SeqCst);
	}

	/// Records the process RSS as measured by an external collaborator.
	pub fn report_rss(&self, bytes: i64) {
		self.sampled_rss.store(bytes, Ordering::SeqCst);
	}

	pub fn current_rss(&self) -> i64 {
		self.sampled_rss.load(Ordering::SeqCst)
	}

	/// Returns `true` if the caller should yield: RSS pressure is simulated
	/// by the caller passing an externally sampled byte count, since this
	/// crate does not read `/proc` itself (out of scope, an external
	/// collaborator's concern per spec.md §1).
	pub fn should_yield(&self, rss_bytes: i64, task_started: Instant) -> bool {
		if rss_bytes < *cnf::MEMORY_THRESHOLD_BYTES {
			return false;
		}
		if self.running.load(Ordering::SeqCst) <= 1 {
			return false;
		}
		task_started.elapsed() > Duration::from_millis(*cnf::FAIRNESS_UNIT_MS)
	}
}

impl Default for FairnessGate {
	fn default() -> Self {
		FairnessGate::new()
	}
}
