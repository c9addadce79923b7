//! Process-wide configuration knobs.
//!
//! Every value here can be overridden through an environment variable at
//! process start; if the variable is absent or fails to parse, the documented
//! default is used. This mirrors the teacher's `cnf` module, which uses the
//! same `lazy_env_parse!` pattern for every tunable.

use once_cell::sync::Lazy;

/// Concurrent sessions, not counting the console session (spec.md §6).
pub static MAX_CLIENTS: Lazy<usize> = lazy_env_parse!("QFLOW_MAX_CLIENTS", usize, 64);

/// Maximum idle worker threads the scheduler retains before they self-terminate.
/// Defaults to `max(4, num_cpus)` per spec.md §6; the environment override
/// replaces the whole computed default rather than adjusting it.
pub static DATAFLOW_MAX_FREE: Lazy<usize> = Lazy::new(|| {
	std::env::var("QFLOW_DATAFLOW_MAX_FREE")
		.ok()
		.and_then(|s| s.parse::<usize>().ok())
		.unwrap_or_else(|| std::cmp::max(4, num_cpus::get()))
});

/// Number of process-wide worker threads in the generic pool, excluding the one
/// session-affinitised worker created per dataflow-region entry.
pub static GDK_NR_THREADS: Lazy<usize> =
	Lazy::new(|| std::env::var("QFLOW_NR_THREADS").ok().and_then(|s| s.parse().ok()).unwrap_or_else(num_cpus::get));

/// Default prompt shown to terminal sessions.
pub const MONET_PROMPT: &str = "qflow>";

/// Maximum nested IR-function call depth (spec.md §4.2, §7).
pub const MAX_CALL_DEPTH: u32 = 256;

/// Number of interpreter iterations between client-liveness probes (spec.md §4.2 step 2).
pub const LIVENESS_PROBE_INTERVAL: u64 = 1000;

/// Interval, in microseconds, between "query still running" notices once a
/// query timeout has been configured (spec.md §4.2 step 3).
pub static QP_TIMEOUT_USEC: Lazy<u64> = lazy_env_parse!("QFLOW_QP_TIMEOUT_USEC", u64, 5_000_000);

/// Default per-session query timeout, in microseconds. `0` means unbounded.
pub static DEFAULT_QUERY_TIMEOUT_USEC: Lazy<u64> =
	lazy_env_parse!("QFLOW_QUERY_TIMEOUT_USEC", u64, 0);

/// Default per-session idle timeout, in microseconds. `0` means unbounded.
pub static DEFAULT_SESSION_TIMEOUT_USEC: Lazy<u64> =
	lazy_env_parse!("QFLOW_SESSION_TIMEOUT_USEC", u64, 0);

/// The memory admission pool size, in bytes, governing how many concurrent
/// "expensive" dataflow instructions may run at once (spec.md §4.3).
pub static MEMORY_THRESHOLD_BYTES: Lazy<i64> =
	lazy_env_parse!("QFLOW_MEMORY_THRESHOLD_BYTES", i64, 1 << 30);

/// How long an admission-refused worker sleeps before retrying its claim.
pub const ADMISSION_RETRY_MICROS: u64 = 500;

/// Duration, in milliseconds, of one "fairness unit" — once a task has held a
/// worker this long while process RSS exceeds the threshold, it yields.
pub static FAIRNESS_UNIT_MS: Lazy<u64> = lazy_env_parse!("QFLOW_FAIRNESS_UNIT_MS", u64, 50);

/// Fixed stack-backup size used for short instruction ranges (spec.md §8
/// Boundary behaviours: "startpc + 1 == stoppc ... fixed size 16").
pub const STACK_BACKUP_INLINE: usize = 16;

/// Safety bound on fixpoint iterations of the optimizer pipeline (spec.md §4.4).
pub const PLANNER_FIXPOINT_LIMIT: u32 = 20;

/// Colon-separated search path for loadable native module libraries.
pub static MONET_MOD_PATH: Lazy<String> =
	Lazy::new(|| std::env::var("QFLOW_MOD_PATH").unwrap_or_else(|_| "/usr/local/lib/qflow".to_owned()));

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		assert_eq!(*MAX_CLIENTS, 64);
		assert!(*DATAFLOW_MAX_FREE >= 4);
		assert_eq!(MAX_CALL_DEPTH, 256);
		assert_eq!(STACK_BACKUP_INLINE, 16);
	}
}
