//! The relational algebra planner (spec.md §4.4).
//!
//! Grounded on the teacher's `idx/planner/mod.rs` (building a tree over
//! multiple candidate access paths) for the overall tree shape, and
//! `idx/planner/rewriter.rs` for the recursive "rewrite and return
//! `Option<T>` if changed" idiom used throughout the optimization passes.

pub mod expr;
pub mod fold;
pub mod merge_table;
pub mod passes;
pub mod planner;
pub mod visitor;

use std::sync::Arc;

pub use expr::RelExpr;

/// The operator kind of a [`RelNode`] (spec.md §3 "Relational Node").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
	BaseTable,
	TableFunc,
	Select,
	Project,
	GroupBy,
	TopN,
	Sample,
	Join,
	LeftOuter,
	RightOuter,
	FullOuter,
	Semi,
	Anti,
	Union,
	Intersect,
	Except,
	Insert,
	Update,
	Delete,
	Truncate,
	Merge,
	Ddl,
}

impl OpKind {
	pub fn is_outer_join(self) -> bool {
		matches!(self, OpKind::LeftOuter | OpKind::RightOuter | OpKind::FullOuter)
	}

	pub fn is_set_op(self) -> bool {
		matches!(self, OpKind::Union | OpKind::Intersect | OpKind::Except)
	}
}

/// A node in the algebraic tree (spec.md §3 "Relational Node").
///
/// Per spec.md §9's "Cyclic, pointer-heavy relational graphs" note, children
/// are owned (`Box`) rather than reference-counted: sibling sharing
/// (`rel_is_ref`) is modeled explicitly via the `shared` flag plus the
/// `Arc`-wrapped [`SharedNode`] variant, so rewriters can detect aliasing and
/// copy-on-write instead of mutating through a second parent.
#[derive(Debug, Clone)]
pub struct RelNode {
	pub op: OpKind,
	pub left: Option<Box<RelNode>>,
	pub right: Option<Box<RelNode>>,
	pub exprs: Vec<RelExpr>,
	/// order-by for project, group-by keys for groupby, etc.
	pub secondary: Vec<RelExpr>,
	pub cardinality_hint: Option<u64>,
	pub nrcols: usize,
	pub properties: Vec<expr::Property>,
	pub distinct: bool,
	pub single_row: bool,
	pub dependent_scope: bool,
	pub refcount: u32,
	pub processed: bool,
	/// Present on `BaseTable` nodes.
	pub table: Option<TableRef>,
	/// Present on `TopN`/`Sample` nodes.
	pub limit: Option<u64>,
	pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
	pub schema: String,
	pub table: String,
	pub alias: Option<String>,
}

impl RelNode {
	pub fn new(op: OpKind) -> RelNode {
		RelNode {
			op,
			left: None,
			right: None,
			exprs: Vec::new(),
			secondary: Vec::new(),
			cardinality_hint: None,
			nrcols: 0,
			properties: Vec::new(),
			distinct: false,
			single_row: false,
			dependent_scope: false,
			refcount: 1,
			processed: false,
			table: None,
			limit: None,
			offset: None,
		}
	}

	pub fn base_table(table: TableRef) -> RelNode {
		let mut n = RelNode::new(OpKind::BaseTable);
		n.table = Some(table);
		n
	}

	pub fn with_left(mut self, child: RelNode) -> RelNode {
		self.left = Some(Box::new(child));
		self
	}

	pub fn with_right(mut self, child: RelNode) -> RelNode {
		self.right = Some(Box::new(child));
		self
	}

	pub fn has_property(&self, p: &expr::Property) -> bool {
		self.properties.contains(p)
	}

	/// Shallow node count across this subtree, used by the recursion-depth
	/// guard ("over-deep recursion aborts with 'query too complex'").
	pub fn depth(&self) -> u32 {
		1 + self.left.as_ref().map(|n| n.depth()).unwrap_or(0).max(self.right.as_ref().map(|n| n.depth()).unwrap_or(0))
	}
}

/// Counts gathered by the property pass (spec.md §4.4 "Property pass").
#[derive(Debug, Default, Clone)]
pub struct Properties {
	pub op_counts: ahash::AHashMap<OpKind, u32>,
	pub has_merge_table: bool,
	pub has_remote: bool,
	pub has_replica: bool,
	pub has_distinct: bool,
	pub has_window: bool,
}

/// A preliminary top-down walk that counts operator kinds and notes
/// merge/remote/replica/distinct flags, gating later passes.
pub fn gather_properties(root: &RelNode, catalog: &dyn crate::rel::merge_table::Catalog) -> Properties {
	let mut props = Properties::default();
	walk_properties(root, catalog, &mut props);
	props
}

fn walk_properties(node: &RelNode, catalog: &dyn crate::rel::merge_table::Catalog, props: &mut Properties) {
	*props.op_counts.entry(node.op).or_insert(0) += 1;
	if node.distinct {
		props.has_distinct = true;
	}
	if let Some(t) = &node.table {
		if catalog.is_merge_table(&t.schema, &t.table) {
			props.has_merge_table = true;
		}
		if catalog.is_remote(&t.schema, &t.table) {
			props.has_remote = true;
		}
		if catalog.is_replica(&t.schema, &t.table) {
			props.has_replica = true;
		}
	}
	if node.exprs.iter().any(has_window_function) || node.secondary.iter().any(has_window_function) {
		props.has_window = true;
	}
	if let Some(l) = &node.left {
		walk_properties(l, catalog, props);
	}
	if let Some(r) = &node.right {
		walk_properties(r, catalog, props);
	}
}

fn has_window_function(e: &RelExpr) -> bool {
	matches!(e, RelExpr::Function { order_by, .. } if !order_by.is_empty())
}

/// A human-readable tree dump, grounded on the teacher's `dbs/plan.rs`
/// `Explanation` collector style. Debug tooling only; plumbed through
/// `tracing::debug!` at each fixpoint iteration, never user-facing.
pub fn explain(node: &RelNode, indent: usize) -> String {
	let pad = "  ".repeat(indent);
    let mut out = format!("{pad}{:?}", node.op);
	if let Some(t) = &node.table {
		out.push_str(&format!(" {}.{}", t.schema, t.table));
	}
	out.push('\n');
	if let Some(l) = &node.left {
		out.push_str(&explain(l, indent + 1));
	}
	if let Some(r) = &node.right {
		out.push_str(&explain(r, indent + 1));
	}
	out
}

pub type SharedNode = Arc<RelNode>;
