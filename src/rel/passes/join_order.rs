use crate::rel::expr::Property;
use crate::rel::visitor::{walk_bottom_up, Pass};
use crate::rel::{OpKind, RelNode};

/// Reorders a join's operands so the side carrying a primary-key or
/// join-index property is probed (kept on the right, the build side in the
/// teacher's hash-join convention) while the larger, unindexed side streams
/// through on the left (spec.md "join reordering: FK/PK scoring, JOINIDX
/// property").
pub struct JoinReordering;

impl Pass for JoinReordering {
	fn name(&self) -> &'static str {
		"join_reordering"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_bottom_up(root, &mut |node| {
			if node.op != OpKind::Join {
				return;
			}
			let (left_score, right_score) = match (&node.left, &node.right) {
				(Some(l), Some(r)) => (score(l), score(r)),
				_ => return,
			};
			if left_score > right_score {
				std::mem::swap(&mut node.left, &mut node.right);
				changed = true;
			}
		});
		changed
	}
}

fn score(node: &RelNode) -> i64 {
	let mut s = node.cardinality_hint.map(|c| c as i64).unwrap_or(i64::MAX / 2);
	if node.has_property(&Property::PrimaryKey) {
		s -= 1_000_000;
	}
	if node.has_property(&Property::JoinIndex) {
		s -= 500_000;
	}
	if node.has_property(&Property::ForeignKey) {
		s += 100_000;
	}
	s
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rel::TableRef;

	#[test]
	fn primary_key_side_moves_to_the_right() {
		let mut big = RelNode::base_table(TableRef { schema: "s".into(), table: "fact".into(), alias: None });
		big.cardinality_hint = Some(10_000_000);
		let mut small = RelNode::base_table(TableRef { schema: "s".into(), table: "dim".into(), alias: None });
		small.cardinality_hint = Some(10);
		small.properties.push(Property::PrimaryKey);

		let mut join = RelNode::new(OpKind::Join).with_left(small).with_right(big);
		let changed = JoinReordering.run(&mut join);
		assert!(changed);
		assert_eq!(join.right.unwrap().table.unwrap().table, "dim");
	}
}
