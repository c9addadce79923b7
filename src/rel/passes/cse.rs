use crate::rel::expr::{Alias, RelExpr};
use crate::rel::visitor::{walk_bottom_up, Pass};
use crate::rel::{OpKind, RelNode};

/// Common subexpression elimination within a single projection's expression
/// list: when two non-cheap expressions are structurally identical, the
/// second is replaced with a reference to the first's alias (spec.md "CSE in
/// projections").
pub struct CommonSubexprElimination;

impl Pass for CommonSubexprElimination {
	fn name(&self) -> &'static str {
		"cse_in_projections"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_bottom_up(root, &mut |node| {
			if node.op != OpKind::Project {
				return;
			}
			changed |= dedup_exprs(node);
		});
		changed
	}
}

fn dedup_exprs(node: &mut RelNode) -> bool {
	let mut changed = false;
	let mut seen: Vec<(RelExpr, String)> = Vec::new();
	for expr in node.exprs.iter_mut() {
		if expr.is_cheap() {
			continue;
		}
		if let Some((_, label)) = seen.iter().find(|(e, _)| e.structurally_eq(expr)) {
			let replacement = RelExpr::Column {
				qualifier: None,
				name: label.clone(),
				alias: expr.alias().cloned(),
				flags: Default::default(),
			};
			*expr = replacement;
			changed = true;
			continue;
		}
		let label = match expr.alias() {
			Some(Alias::Named { column, .. }) => column.clone(),
			Some(Alias::Label(n)) => format!("L{n}"),
			None => continue,
		};
		seen.push((expr.clone(), label));
	}
	changed
}
