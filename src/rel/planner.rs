//! The planner entry point wiring the property pass, the fixpoint-driven
//! optimization pipeline, and merge-table expansion together (spec.md §4.4).

use tracing::{debug, instrument};

use crate::err::Error;
use crate::rel::merge_table::Catalog;
use crate::rel::passes::default_pipeline;
use crate::rel::visitor::run_to_fixpoint;
use crate::rel::{explain, gather_properties, RelNode};

const MAX_TREE_DEPTH: u32 = 4096;

/// Runs the full planning pipeline over `root`: gather properties, expand
/// merge tables, then rewrite to a fixpoint.
#[instrument(level = "debug", skip(root, catalog))]
pub fn plan(mut root: RelNode, catalog: &dyn Catalog) -> Result<RelNode, Error> {
	if root.depth() > MAX_TREE_DEPTH {
		return Err(Error::QueryTooComplex);
	}

	let props = gather_properties(&root, catalog);
	debug!(has_merge_table = props.has_merge_table, has_window = props.has_window, "property pass complete");

	if props.has_merge_table {
		root = crate::rel::merge_table::expand(&root, catalog)?;
	}

	let passes = default_pipeline();
	let iterations = run_to_fixpoint(&mut root, &passes);
	debug!(iterations, tree = %explain(&root, 0), "optimization pipeline converged");

	Ok(root)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rel::merge_table::Partition;
	use crate::rel::{OpKind, TableRef};

	struct EmptyCatalog;
	impl Catalog for EmptyCatalog {
		fn is_merge_table(&self, _: &str, _: &str) -> bool {
			false
		}
		fn is_remote(&self, _: &str, _: &str) -> bool {
			false
		}
		fn is_replica(&self, _: &str, _: &str) -> bool {
			false
		}
		fn partitions(&self, _: &str, _: &str) -> Vec<Partition> {
			Vec::new()
		}
	}

	#[test]
	fn plan_rejects_absurdly_deep_trees() {
		let mut node = RelNode::base_table(TableRef { schema: "s".into(), table: "t".into(), alias: None });
		for _ in 0..(MAX_TREE_DEPTH + 1) {
			node = RelNode::new(OpKind::Select).with_left(node);
		}
		let result = plan(node, &EmptyCatalog);
		assert!(matches!(result, Err(Error::QueryTooComplex)));
	}

	#[test]
	fn plan_passes_through_simple_tree() {
		let base = RelNode::base_table(TableRef { schema: "s".into(), table: "t".into(), alias: None });
		let root = RelNode::new(OpKind::Project).with_left(base);
		let result = plan(root, &EmptyCatalog).unwrap();
		assert_eq!(result.op, OpKind::Project);
	}

	struct RangePartitionedCatalog;
	impl Catalog for RangePartitionedCatalog {
		fn is_merge_table(&self, _: &str, t: &str) -> bool {
			t == "orders"
		}
		fn is_remote(&self, _: &str, _: &str) -> bool {
			false
		}
		fn is_replica(&self, _: &str, _: &str) -> bool {
			false
		}
		fn partitions(&self, schema: &str, _: &str) -> Vec<Partition> {
			vec![
				Partition {
					table: TableRef { schema: schema.into(), table: "orders_2024".into(), alias: None },
					kind: crate::rel::merge_table::PartitionKind::Range { low: Some(0), high: Some(100) },
					allows_null: false,
				},
				Partition {
					table: TableRef { schema: schema.into(), table: "orders_2025".into(), alias: None },
					kind: crate::rel::merge_table::PartitionKind::Range { low: Some(100), high: Some(200) },
					allows_null: false,
				},
			]
		}
	}

	/// The real entry point must prune using the predicate of the `Select`
	/// sitting directly above the merge-table `BaseTable`, not drop pruning
	/// entirely because `plan` itself never sees a predicate argument.
	#[test]
	fn plan_prunes_merge_table_using_its_enclosing_select_predicate() {
		use crate::ir::Literal;
		use crate::rel::expr::{CmpOp, RelExpr};

		let base = RelNode::base_table(TableRef { schema: "sys".into(), table: "orders".into(), alias: None });
		let mut select = RelNode::new(OpKind::Select).with_left(base);
		select.exprs = vec![RelExpr::cmp(CmpOp::Eq, RelExpr::column("id"), RelExpr::atom(Literal::Int(50)))];
		let root = RelNode::new(OpKind::Project).with_left(select);

		let result = plan(root, &RangePartitionedCatalog).unwrap();
		let select = result.left.unwrap();
		let base = select.left.unwrap();
		assert_eq!(base.op, OpKind::BaseTable, "a single surviving partition should be emitted directly, not a Union");
		assert_eq!(base.table.unwrap().table, "orders_2024");
	}
}
