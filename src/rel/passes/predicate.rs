use crate::ir::Literal;
use crate::rel::expr::{CmpOp, RelExpr};
use crate::rel::visitor::{rewrite_exprs_bottom_up, Pass};
use crate::rel::RelNode;

/// Collapses a chain of `x = c1 OR x = c2 OR ...` into a single `x IN
/// (c1, c2, ...)` (spec.md "merge or-chains into IN").
pub struct OrChainToIn;

impl Pass for OrChainToIn {
	fn name(&self) -> &'static str {
		"or_chain_to_in"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		rewrite_exprs_bottom_up(root, &mut |e| match e {
			RelExpr::Compare { op: CmpOp::Or, .. } => flatten_or_chain(e),
			_ => None,
		})
	}
}

fn flatten_or_chain(expr: &RelExpr) -> Option<RelExpr> {
	let mut arms = Vec::new();
	collect_or_arms(expr, &mut arms);
	if arms.len() < 2 {
		return None;
	}
	let column = match &arms[0] {
		RelExpr::Compare { op: CmpOp::Eq, left, .. } => left.as_ref().clone(),
		_ => return None,
	};
	let mut values = Vec::new();
	for arm in &arms {
		match arm {
			RelExpr::Compare { op: CmpOp::Eq, left, right, .. } if left.structurally_eq(&column) => {
				values.push(right.as_ref().clone());
			}
			_ => return None,
		}
	}
	Some(RelExpr::Compare {
		op: CmpOp::In,
		left: Box::new(column),
		right: Box::new(RelExpr::Function {
			subfunc: "tuple".to_owned(),
			args: values,
			order_by: Vec::new(),
			alias: None,
			flags: Default::default(),
		}),
		third: None,
		anti: false,
		symmetric: false,
		alias: None,
		flags: Default::default(),
	})
}

fn collect_or_arms(expr: &RelExpr, out: &mut Vec<RelExpr>) {
	match expr {
		RelExpr::Compare { op: CmpOp::Or, left, right, .. } => {
			collect_or_arms(left, out);
			collect_or_arms(right, out);
		}
		other => out.push(other.clone()),
	}
}

/// Merges two range comparisons on the same column (`x >= lo AND x <= hi`)
/// into a single `Between` (spec.md "range merge").
pub struct RangeMerge;

impl Pass for RangeMerge {
	fn name(&self) -> &'static str {
		"range_merge"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		crate::rel::visitor::walk_bottom_up(root, &mut |node| {
			// AND is represented as a node's predicate list rather than a
			// boolean AND node, so range merge operates across it directly.
			if let Some(merged) = try_merge_pair(&node.exprs) {
				node.exprs = merged;
				changed = true;
			}
		});
		changed
	}
}

fn try_merge_pair(exprs: &[RelExpr]) -> Option<Vec<RelExpr>> {
	if exprs.len() != 2 {
		return None;
	}
	let (lo, hi) = match (&exprs[0], &exprs[1]) {
		(
			RelExpr::Compare { op: CmpOp::Ge, left: l1, right: r1, .. },
			RelExpr::Compare { op: CmpOp::Le, left: l2, right: r2, .. },
		) if l1.structurally_eq(l2) => (r1.as_ref().clone(), r2.as_ref().clone()),
		_ => return None,
	};
	let column = match &exprs[0] {
		RelExpr::Compare { left, .. } => left.as_ref().clone(),
		_ => return None,
	};
	Some(vec![RelExpr::Compare {
		op: CmpOp::Between,
		left: Box::new(column),
		right: Box::new(lo),
		third: Some(Box::new(hi)),
		anti: false,
		symmetric: false,
		alias: None,
		flags: Default::default(),
	}])
}

/// Folds constant subexpressions and simplifies always-true/always-false
/// comparisons (spec.md "predicate simplification / constant folding");
/// delegates the arithmetic itself to [`crate::rel::fold`].
pub struct PredicateSimplification;

impl Pass for PredicateSimplification {
	fn name(&self) -> &'static str {
		"predicate_simplification"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		rewrite_exprs_bottom_up(root, &mut |e| crate::rel::fold::try_fold(e))
	}
}

/// Rewrites a `LIKE` pattern with no wildcard characters into a plain
/// equality comparison (spec.md "like-select simplification").
pub struct LikeSelectSimplification;

impl Pass for LikeSelectSimplification {
	fn name(&self) -> &'static str {
		"like_select_simplification"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		rewrite_exprs_bottom_up(root, &mut |e| match e {
			RelExpr::Function { subfunc, args, .. } if subfunc == "like" && args.len() == 2 => {
				if let RelExpr::Atom { value: Literal::Str(pattern), .. } = &args[1] {
					if !pattern.contains('%') && !pattern.contains('_') {
						return Some(RelExpr::cmp(CmpOp::Eq, args[0].clone(), args[1].clone()));
					}
				}
				None
			}
			_ => None,
		})
	}
}
