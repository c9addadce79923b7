use crate::rel::visitor::{walk_bottom_up, Pass};
use crate::rel::{OpKind, RelNode};

/// Drops projection columns flagged unused by an outer reference count,
/// keeping at least one so empty projections never lose their row shape
/// (spec.md "dead code elimination").
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
	fn name(&self) -> &'static str {
		"dead_code_elimination"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_bottom_up(root, &mut |node| {
			if node.op != OpKind::Project || node.exprs.len() <= 1 {
				return;
			}
			let before = node.exprs.len();
			let fallback = node.exprs.first().cloned();
			node.exprs.retain(|e| e.flags().used);
			if node.exprs.is_empty() {
				// all columns unused: keep the first to preserve cardinality.
				if let Some(first) = fallback {
					node.exprs.push(first);
				}
			}
			if node.exprs.len() != before {
				changed = true;
			}
		});
		changed
	}
}
