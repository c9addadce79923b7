//! The crate-wide error type.
//!
//! Grounded on the teacher's `GqlError` (`core/src/gql/error.rs`): a flat
//! `thiserror` enum with one variant per failure class, formatted with
//! `#[error(...)]` rather than a bespoke `Display` impl.

use thiserror::Error;

/// Errors produced anywhere in the planner, interpreter or scheduler.
///
/// `to_user_string` renders the three-letter-category + module + function
/// form described in spec.md §7; the `Display` impl (via `#[error]`) is the
/// plain, developer-facing message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
	// -- Session manager (spec.md §4.1) --
	#[error("session table is full")]
	SessionTableFull,
	#[error("invalid session id {0}")]
	InvalidSessionId(u32),
	#[error("a child session cannot destroy its parent")]
	ChildCannotDestroyParent,
	#[error("shutdown in progress")]
	ShutdownInProgress,

	// -- IR / interpreter (spec.md §4.2, §7) --
	#[error("prematurely stopped client")]
	ClientDisconnected,
	#[error("query timeout exceeded")]
	QueryTimeout,
	#[error("session timeout exceeded")]
	SessionTimeout,
	#[error("call depth exceeded the maximum of {max}")]
	StackOverflow { max: u32 },
	#[error("type mismatch: expected {expected}, found {found}")]
	TypeMismatch { expected: String, found: String },
	#[error("unknown instruction at pc {pc}")]
	UnknownInstruction { pc: usize },
	#[error("missing native function for {module}.{function}")]
	MissingNative { module: String, function: String },
	#[error("{message}")]
	Raised { name: String, message: String },
	#[error("unhandled exception: {0}")]
	UnhandledException(String),
	#[error("out of memory")]
	OutOfMemory,

	// -- Dataflow scheduler (spec.md §4.3) --
	#[error("empty dataflow block")]
	EmptyDataflowBlock,
	#[error("admission refused for {bytes} bytes")]
	AdmissionRefused { bytes: i64 },
	#[error("dataflow region aborted: {0}")]
	RegionAborted(String),

	// -- Relational planner (spec.md §4.4) --
	#[error("unresolved name: {0}")]
	UnresolvedName(String),
	#[error("not enough privileges: {0}")]
	PermissionDenied(String),
	#[error("query too complex")]
	QueryTooComplex,
	#[error("partition violation: value(s) outside declared bounds for {table}")]
	PartitionViolation { table: String },
	#[error("merge table {0} has no members")]
	MergeTableEmpty(String),
	#[error("updating the partitioning column requires DELETE + INSERT decomposition, which is not supported for {table}")]
	UnsupportedPartitionUpdate { table: String },

	// -- Generic --
	#[error("internal error: {0}")]
	Internal(String),
}

impl Error {
	/// Renders the SQLSTATE-bracketed, category-prefixed user-visible form
	/// described in spec.md §7, e.g. `GDK00001!mal.dataflow: empty dataflow block`.
	pub fn to_user_string(&self, module: &str, function: &str) -> String {
		let (category, sqlstate) = self.category();
		format!("{category}!{module}.{function}: {self} SQLSTATE({sqlstate})")
	}

	/// A three-letter category code and a SQLSTATE-ish five-character code,
	/// used only for the user-visible formatting above.
	fn category(&self) -> (&'static str, &'static str) {
		use Error::*;
		match self {
			SessionTableFull | InvalidSessionId(_) | ChildCannotDestroyParent
			| ShutdownInProgress => ("SES", "08004"),
			ClientDisconnected => ("NET", "08006"),
			QueryTimeout | SessionTimeout => ("TIM", "57014"),
			StackOverflow { .. } => ("MAL", "54001"),
			TypeMismatch { .. } => ("TYP", "42804"),
			UnknownInstruction { .. } | MissingNative { .. } => ("MAL", "42883"),
			Raised { .. } | UnhandledException(_) => ("USR", "P0001"),
			OutOfMemory => ("MAL", "HY001"),
			EmptyDataflowBlock | AdmissionRefused { .. } | RegionAborted(_) => ("MAL", "40000"),
			UnresolvedName(_) => ("SQL", "42883"),
			PermissionDenied(_) => ("SQL", "42501"),
			QueryTooComplex => ("SQL", "54001"),
			PartitionViolation { .. } => ("SQL", "23514"),
			MergeTableEmpty(_) => ("SQL", "42P01"),
			UnsupportedPartitionUpdate { .. } => ("SQL", "0A000"),
			Internal(_) => ("GDK", "XX000"),
		}
	}

	/// Chains a newly caught error's message onto a prior one, joined by
	/// `\n!`, per spec.md §7 "Propagation policy".
	pub fn chain(prior: &str, new: &Error) -> String {
		format!("{prior}\n!{new}")
	}

	/// The exception-variable name a forward `catch` scan matches against
	/// (spec.md §4.2 step 7). Errors not tied to a specific IR variable only
	/// match a catch-all `ANYexception`.
	pub fn exception_name(&self) -> &str {
		match self {
			Error::Raised { name, .. } => name,
			_ => "ANYexception",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_string_has_category_and_sqlstate() {
		let e = Error::EmptyDataflowBlock;
		let s = e.to_user_string("mal", "dataflow");
		assert!(s.starts_with("MAL!mal.dataflow:"));
		assert!(s.contains("SQLSTATE(40000)"));
	}

	#[test]
	fn chain_concatenates_with_bang() {
		let chained = Error::chain("first failure", &Error::QueryTimeout);
		assert_eq!(chained, "first failure\n!query timeout exceeded");
	}
}
