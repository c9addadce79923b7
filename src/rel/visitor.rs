//! Tree rewriters (spec.md §4.4 "Optimization passes").
//!
//! Grounded on `idx/planner/rewriter.rs`'s `KnnConditionRewriter`: a rewrite
//! function takes `&RelExpr`/`&RelNode` and returns `Option<T>`, `Some` only
//! when it actually changed something, so the fixpoint driver below can tell
//! whether another iteration is worth running without a separate dirty flag
//! threaded through every pass.

use crate::cnf;
use crate::rel::expr::RelExpr;
use crate::rel::RelNode;

/// Walks every expression reachable from `node` (its own `exprs`/`secondary`
/// plus its children's), replacing each with `f(&expr)` when it returns
/// `Some`. Returns whether anything changed.
pub fn rewrite_exprs_bottom_up<F>(node: &mut RelNode, f: &mut F) -> bool
where
	F: FnMut(&RelExpr) -> Option<RelExpr>,
{
	let mut changed = false;
	if let Some(l) = &mut node.left {
		changed |= rewrite_exprs_bottom_up(l, f);
	}
	if let Some(r) = &mut node.right {
		changed |= rewrite_exprs_bottom_up(r, f);
	}
	for e in node.exprs.iter_mut().chain(node.secondary.iter_mut()) {
		if let Some(rewritten) = rewrite_expr_tree(e, f) {
			*e = rewritten;
			changed = true;
		}
	}
	changed
}

/// Applies `f` to every subexpression of `expr` bottom-up, returning `Some`
/// with the rewritten tree if anything below or at the root changed.
pub fn rewrite_expr_tree<F>(expr: &RelExpr, f: &mut F) -> Option<RelExpr>
where
	F: FnMut(&RelExpr) -> Option<RelExpr>,
{
	let mut changed = false;
	let mut current = expr.clone();

	macro_rules! rewrite_child {
		($child:expr) => {
			if let Some(new_child) = rewrite_expr_tree($child, f) {
				*$child = Box::new(new_child);
				changed = true;
			}
		};
	}

	match &mut current {
		RelExpr::Function { args, order_by, .. } => {
			for a in args.iter_mut().chain(order_by.iter_mut()) {
				if let Some(n) = rewrite_expr_tree(a, f) {
					*a = n;
					changed = true;
				}
			}
		}
		RelExpr::Aggregate { args, .. } => {
			for a in args.iter_mut() {
				if let Some(n) = rewrite_expr_tree(a, f) {
					*a = n;
					changed = true;
				}
			}
		}
		RelExpr::Compare { left, right, third, .. } => {
			rewrite_child!(left);
			rewrite_child!(right);
			if let Some(t) = third {
				rewrite_child!(t);
			}
		}
		RelExpr::Convert { source, .. } => rewrite_child!(source),
		_ => {}
	}

	if let Some(top) = f(&current) {
		current = top;
		changed = true;
	}

	if changed {
		Some(current)
	} else {
		None
	}
}

/// A single optimization pass over a `RelNode` tree: returns whether it
/// changed anything, so the driver can decide whether to keep iterating.
pub trait Pass {
	fn name(&self) -> &'static str;
	fn run(&self, root: &mut RelNode) -> bool;
}

/// Runs every pass in order, repeating the whole sequence until a full pass
/// produces no change or `cnf::PLANNER_FIXPOINT_LIMIT` iterations are spent
/// (spec.md §4.4 "the rewrite loop runs to a fixpoint, bounded").
pub fn run_to_fixpoint(root: &mut RelNode, passes: &[Box<dyn Pass>]) -> u32 {
	let mut iterations = 0;
	loop {
		let mut changed = false;
		for pass in passes {
			if pass.run(root) {
				changed = true;
				tracing::debug!(pass = pass.name(), iteration = iterations, "pass changed tree");
			}
		}
		iterations += 1;
		if !changed || iterations >= cnf::PLANNER_FIXPOINT_LIMIT {
			break;
		}
	}
	iterations
}

/// Visits every node in the tree, top-down, calling `f` once per node.
pub fn walk_top_down<F: FnMut(&mut RelNode)>(node: &mut RelNode, f: &mut F) {
	f(node);
	if let Some(l) = &mut node.left {
		walk_top_down(l, f);
	}
	if let Some(r) = &mut node.right {
		walk_top_down(r, f);
	}
}

/// Visits every node bottom-up (children before parent), used by passes that
/// need child properties already settled (e.g. DCE, CSE).
pub fn walk_bottom_up<F: FnMut(&mut RelNode)>(node: &mut RelNode, f: &mut F) {
	if let Some(l) = &mut node.left {
		walk_bottom_up(l, f);
	}
	if let Some(r) = &mut node.right {
		walk_bottom_up(r, f);
	}
	f(node);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rel::expr::CmpOp;
	use crate::rel::OpKind;

	#[test]
	fn rewrite_expr_tree_rewrites_nested_column() {
		let tree = RelExpr::cmp(CmpOp::Eq, RelExpr::column("a"), RelExpr::column("b"));
		let mut renamed = 0;
		let out = rewrite_expr_tree(&tree, &mut |e| match e {
			RelExpr::Column { name, .. } if name == "a" => {
				renamed += 1;
				Some(RelExpr::column("renamed"))
			}
			_ => None,
		});
		assert!(out.is_some());
		assert_eq!(renamed, 1);
	}

	#[test]
	fn fixpoint_stops_when_a_full_round_makes_no_change() {
		struct OnceOnly {
			fired: std::cell::Cell<bool>,
		}
		impl Pass for OnceOnly {
			fn name(&self) -> &'static str {
				"once"
			}
			fn run(&self, _root: &mut RelNode) -> bool {
				if self.fired.get() {
					false
				} else {
					self.fired.set(true);
					true
				}
			}
		}
		let mut root = RelNode::new(OpKind::Project);
		let passes: Vec<Box<dyn Pass>> = vec![Box::new(OnceOnly { fired: std::cell::Cell::new(false) })];
		let iterations = run_to_fixpoint(&mut root, &passes);
		assert_eq!(iterations, 2);
	}
}
