//! The external column-buffer collaborator interface (spec.md §1/§3).
//!
//! Column storage itself is out of scope: this module only defines the handle
//! shape the planner and interpreter pass around. Shaped after the teacher's
//! transaction handles — an opaque, refcounted, `Arc`-wrapped resource with
//! explicit acquire/release rather than Drop-only cleanup, since callers need
//! to observe when the last reference is released.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// The element type stored in a column buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
	Bool,
	Int32,
	Int64,
	Float64,
	Str,
	Date,
	Decimal { scale: u8 },
	Oid,
}

/// Aggregate statistics the planner consults for constant folding and
/// partition pruning, without touching the buffer's contents directly.
#[derive(Debug, Default, Clone)]
pub struct ColumnStats {
	pub count: i64,
	pub min: Option<i64>,
	pub max: Option<i64>,
	pub sorted: bool,
	pub unique: bool,
	pub duplicate_eliminated: bool,
}

struct Inner {
	tag: TypeTag,
	stats: ColumnStats,
	refcount: AtomicI64,
}

/// An opaque handle to an externally managed column buffer.
///
/// Acquiring a handle bumps an internal refcount; releasing it decrements the
/// same counter. The backing storage's lifetime is not owned by this crate —
/// `release` only reports whether this was the last known reference, it does
/// not free anything.
#[derive(Clone)]
pub struct ColumnHandle {
	inner: Arc<Inner>,
	id: usize,
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

impl ColumnHandle {
	pub fn new(tag: TypeTag, stats: ColumnStats) -> Self {
		Self {
			inner: Arc::new(Inner { tag, stats, refcount: AtomicI64::new(1) }),
			id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
		}
	}

	pub fn id(&self) -> usize {
		self.id
	}

	pub fn type_tag(&self) -> TypeTag {
		self.inner.tag
	}

	pub fn stats(&self) -> &ColumnStats {
		&self.inner.stats
	}

	pub fn count(&self) -> i64 {
		self.inner.stats.count
	}

	/// Bumps the handle's refcount, returning the count observed after the bump.
	pub fn acquire(&self) -> i64 {
		self.inner.refcount.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// Decrements the handle's refcount. Returns `true` if this was the last
	/// known reference (refcount reached zero); the caller is then responsible
	/// for notifying the external storage layer.
	pub fn release(&self) -> bool {
		self.inner.refcount.fetch_sub(1, Ordering::SeqCst) - 1 <= 0
	}
}

impl std::fmt::Debug for ColumnHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ColumnHandle")
			.field("id", &self.id)
			.field("tag", &self.inner.tag)
			.field("count", &self.inner.stats.count)
			.finish()
	}
}
