use crate::rel::expr::RelExpr;
use crate::rel::visitor::{walk_bottom_up, walk_top_down, Pass};
use crate::rel::{OpKind, RelNode};

/// Collapses a `Project` whose only child is another `Project` into one node
/// (spec.md "merge nested projections").
pub struct MergeNestedProjections;

impl Pass for MergeNestedProjections {
	fn name(&self) -> &'static str {
		"merge_nested_projections"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_bottom_up(root, &mut |node| {
			if node.op != OpKind::Project {
				return;
			}
			let Some(child) = node.left.as_deref() else { return };
			if child.op != OpKind::Project {
				return;
			}
			node.left = child.left.clone();
			changed = true;
		});
		changed
	}
}

/// Pushes a `Project` below a `Join` onto whichever side its columns
/// reference, when every column references a single side (spec.md "push
/// project down").
pub struct PushProjectDown;

impl Pass for PushProjectDown {
	fn name(&self) -> &'static str {
		"push_project_down"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_top_down(root, &mut |node| {
			if node.op != OpKind::Project {
				return;
			}
			let Some(child) = node.left.as_deref_mut() else { return };
			if child.op != OpKind::Join {
				return;
			}
			let Some(left_alias) = child.left.as_ref().and_then(|n| n.table.as_ref()).map(table_alias) else { return };
			if node.exprs.iter().all(|e| references_only(e, &left_alias)) {
				let mut pushed = RelNode::new(OpKind::Project);
				pushed.exprs = node.exprs.clone();
				pushed.left = child.left.take();
				child.left = Some(Box::new(pushed));
				changed = true;
			}
		});
		changed
	}
}

fn table_alias(t: &crate::rel::TableRef) -> String {
	t.alias.clone().unwrap_or_else(|| t.table.clone())
}

fn references_only(expr: &RelExpr, alias: &str) -> bool {
	match expr {
		RelExpr::Column { qualifier: Some(q), .. } => q == alias,
		RelExpr::Column { qualifier: None, .. } => true,
		_ => true,
	}
}

/// Pushes a `Select` predicate below a `Join` or `Union` onto the side(s) it
/// exclusively references (spec.md "push selects down").
pub struct PushSelectDown;

impl Pass for PushSelectDown {
	fn name(&self) -> &'static str {
		"push_select_down"
	}

	fn run(&self, root: &mut RelNode) -> bool {
		let mut changed = false;
		walk_top_down(root, &mut |node| {
			if node.op != OpKind::Select {
				return;
			}
			let Some(mut child) = node.left.take() else { return };
			match child.op {
				OpKind::Join | OpKind::LeftOuter | OpKind::RightOuter | OpKind::FullOuter => {
					push_into_join(node, &mut child, &mut changed);
				}
				OpKind::Union => {
					push_into_union(node, &mut child, &mut changed);
				}
				_ => {}
			}
			node.left = Some(child);
		});
		changed
	}
}

fn push_into_join(select: &mut RelNode, join: &mut RelNode, changed: &mut bool) {
	let left_alias = join.left.as_ref().and_then(|n| n.table.as_ref()).map(table_alias);
	let Some(alias) = left_alias else { return };
	let (pushable, remaining): (Vec<_>, Vec<_>) =
		select.exprs.drain(..).partition(|e| references_only(e, &alias) && !is_trivially_true_ref(e));
	if pushable.is_empty() {
		select.exprs = remaining;
		return;
	}
	if let Some(left) = join.left.as_deref_mut() {
		let mut inner_select = RelNode::new(OpKind::Select);
		inner_select.exprs = pushable;
		inner_select.left = Some(Box::new(left.clone()));
		*left = inner_select;
		*changed = true;
	}
	select.exprs = remaining;
}

fn is_trivially_true_ref(_e: &RelExpr) -> bool {
	false
}

fn push_into_union(select: &RelNode, union: &mut RelNode, changed: &mut bool) {
	for side in [&mut union.left, &mut union.right] {
		if let Some(child) = side {
			let mut wrapped = RelNode::new(OpKind::Select);
			wrapped.exprs = select.exprs.clone();
			wrapped.left = Some(child.clone());
			**child = wrapped;
		}
	}
	*changed = true;
}
