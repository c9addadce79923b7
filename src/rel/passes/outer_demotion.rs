use crate::rel::expr::RelExpr;
use crate::rel::visitor::{walk_top_down, Pass};
use crate::rel::{OpKind, RelNode, TableRef};

/// Demotes an outer join to an inner join when a `Select` directly above it
/// carries a predicate that rejects nulls on the nullable-producing side
/// (spec.md "outer-to-inner demotion").
pub struct OuterJoinDemotion;

impl Pass for OuterJoinDemotion {
	fn name(&self) -> &'static str {
		"outer_join_demotion"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_top_down(root, &mut |node| {
			if node.op != OpKind::Select {
				return;
			}
			let Some(child) = node.left.as_deref_mut() else { return };
			if !child.op.is_outer_join() {
				return;
			}
			let nullable_side_table = nullable_side_table(child);
			let Some(table) = nullable_side_table else { return };
			let rejects_null = node.exprs.iter().any(|e| null_rejecting_on(e, &table));
			if rejects_null {
				child.op = OpKind::Join;
				changed = true;
			}
		});
		changed
	}
}

fn nullable_side_table(join: &RelNode) -> Option<TableRef> {
	let side = match join.op {
		OpKind::LeftOuter => &join.right,
		OpKind::RightOuter => &join.left,
		OpKind::FullOuter => &join.right,
		_ => return None,
	};
	side.as_ref().and_then(|n| n.table.clone())
}

fn null_rejecting_on(expr: &RelExpr, table: &TableRef) -> bool {
	let alias = table.alias.as_deref().unwrap_or(&table.table);
	match expr {
		RelExpr::Compare { op, left, right, anti: false, .. } => {
			use crate::rel::expr::CmpOp::*;
			matches!(op, Eq | Ne | Lt | Le | Ge | Gt)
				&& (column_from_table(left, alias) || column_from_table(right, alias))
		}
		_ => false,
	}
}

fn column_from_table(expr: &RelExpr, alias: &str) -> bool {
	matches!(expr, RelExpr::Column { qualifier: Some(q), .. } if q == alias)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ir::Literal;
	use crate::rel::expr::CmpOp;

	#[test]
	fn select_rejecting_nulls_demotes_left_outer_to_inner() {
		let left = RelNode::base_table(TableRef { schema: "s".into(), table: "orders".into(), alias: None });
		let right = RelNode::base_table(TableRef { schema: "s".into(), table: "returns".into(), alias: None });
		let join = RelNode::new(OpKind::LeftOuter).with_left(left).with_right(right);

		let mut select = RelNode::new(OpKind::Select).with_left(join);
		select.exprs = vec![RelExpr::cmp(
			CmpOp::Gt,
			RelExpr::qualified_column("returns", "amount"),
			RelExpr::atom(Literal::Int(0)),
		)];

		let changed = OuterJoinDemotion.run(&mut select);
		assert!(changed);
		assert_eq!(select.left.unwrap().op, OpKind::Join);
	}
}
