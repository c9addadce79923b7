//! Merge-table (partitioned table) expansion (spec.md §4.4 "Merge-table
//! expansion").
//!
//! Grounded on the teacher's `dbs/capabilities.rs` style of trait-gated
//! external collaborator lookups: the catalog itself (which tables are
//! partitioned, and how) lives outside this crate's scope (spec.md §1
//! "column-buffer storage... out of scope"), so it is modeled as a trait the
//! host process implements, the same way the teacher gates SQL capabilities
//! through a small trait rather than hardcoding the lookup.

use crate::err::Error;
use crate::ir::Literal;
use crate::rel::expr::{Alias, CmpOp, RelExpr};
use crate::rel::{OpKind, RelNode, TableRef};

/// How a merge table is partitioned.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionKind {
	Range { low: Option<i64>, high: Option<i64> },
	List(Vec<i64>),
	/// No partitioning predicate could be derived; always included.
	Column,
}

#[derive(Debug, Clone)]
pub struct Partition {
	pub table: TableRef,
	pub kind: PartitionKind,
	pub allows_null: bool,
}

/// The external catalog a host process supplies so this crate can expand
/// merge tables without owning storage metadata itself.
pub trait Catalog {
	fn is_merge_table(&self, schema: &str, table: &str) -> bool;
	fn is_remote(&self, schema: &str, table: &str) -> bool;
	fn is_replica(&self, schema: &str, table: &str) -> bool;
	fn partitions(&self, schema: &str, table: &str) -> Vec<Partition>;

	/// The enclosing partitioned table this one is nested under, if any
	/// (spec.md "nested partitioning"). Default: not nested.
	fn partition_parent(&self, _schema: &str, _table: &str) -> Option<TableRef> {
		None
	}
}

/// Replaces every `BaseTable` node referring to a merge table with a `Union`
/// of its partitions, pruned against the predicate of its nearest enclosing
/// `Select` (spec.md "range/list/column partition pruning"). Each merge
/// table is pruned against its own local predicate, found by walking down
/// from `node` and remembering the last `Select`'s predicates seen along the
/// way — not one global predicate threaded in from the caller.
pub fn expand(node: &RelNode, catalog: &dyn Catalog) -> Result<RelNode, Error> {
	expand_under(node, catalog, &[])
}

fn expand_under(node: &RelNode, catalog: &dyn Catalog, enclosing_predicates: &[RelExpr]) -> Result<RelNode, Error> {
	if let Some(table) = &node.table {
		if node.op == OpKind::BaseTable && catalog.is_merge_table(&table.schema, &table.table) {
			return expand_merge_table(table, catalog, enclosing_predicates);
		}
	}
	let mut expanded = node.clone();
	// A `Select`'s own predicates become the enclosing context for whatever
	// is below it; anything further down that isn't itself a new `Select`
	// keeps inheriting this one's predicates.
	let left_predicates: &[RelExpr] = if node.op == OpKind::Select { &node.exprs } else { enclosing_predicates };
	if let Some(l) = &node.left {
		expanded.left = Some(Box::new(expand_under(l, catalog, left_predicates)?));
	}
	if let Some(r) = &node.right {
		expanded.right = Some(Box::new(expand_under(r, catalog, enclosing_predicates)?));
	}
	Ok(expanded)
}

fn expand_merge_table(table: &TableRef, catalog: &dyn Catalog, predicates: &[RelExpr]) -> Result<RelNode, Error> {
	let all = catalog.partitions(&table.schema, &table.table);
	let pruned: Vec<&Partition> =
		all.iter().filter(|p| predicates.iter().all(|pred| survives_pruning(p, Some(pred)))).collect();

	if pruned.is_empty() {
		return Ok(empty_result(table));
	}
	if pruned.len() == 1 {
		return Ok(RelNode::base_table(pruned[0].table.clone()));
	}

	let mut iter = pruned.into_iter();
	let mut acc = RelNode::base_table(iter.next().unwrap().table.clone());
	for part in iter {
		let right = RelNode::base_table(part.table.clone());
		let mut union = RelNode::new(OpKind::Union);
		union.left = Some(Box::new(acc));
		union.right = Some(Box::new(right));
		union.exprs = alias_preserving_columns(table);
		acc = union;
	}
	Ok(acc)
}

fn alias_preserving_columns(table: &TableRef) -> Vec<RelExpr> {
	let alias = table.alias.clone().unwrap_or_else(|| table.table.clone());
	vec![RelExpr::Column {
		qualifier: Some(alias.clone()),
		name: "*".to_owned(),
		alias: Some(Alias::Named { table: Some(alias), column: "*".to_owned() }),
		flags: Default::default(),
	}]
}

/// A dummy project over no rows, used when every partition is pruned away
/// (spec.md "empty-result dummy project").
fn empty_result(table: &TableRef) -> RelNode {
	let mut project = RelNode::new(OpKind::Project);
	project.single_row = false;
	project.cardinality_hint = Some(0);
	project.table = Some(table.clone());
	project
}

fn survives_pruning(partition: &Partition, predicate: Option<&RelExpr>) -> bool {
	let predicate = match predicate {
		Some(p) => p,
		None => return true,
	};
	match &partition.kind {
		PartitionKind::Range { low, high } => range_can_match(predicate, *low, *high, partition.allows_null),
		PartitionKind::List(values) => list_can_match(predicate, values, partition.allows_null),
		PartitionKind::Column => true,
	}
}

fn range_can_match(predicate: &RelExpr, low: Option<i64>, high: Option<i64>, allows_null: bool) -> bool {
	if let RelExpr::Compare { op, right, .. } = predicate {
		if let RelExpr::Atom { value, .. } = right.as_ref() {
			if let crate::ir::Literal::Int(v) = value {
				use crate::rel::expr::CmpOp::*;
				return match op {
					Eq => low.map(|l| *v >= l).unwrap_or(true) && high.map(|h| *v < h).unwrap_or(true),
					Lt => low.map(|l| l < *v).unwrap_or(true),
					Le => low.map(|l| l <= *v).unwrap_or(true),
					Gt => high.map(|h| *v < h).unwrap_or(true),
					Ge => high.map(|h| *v <= h).unwrap_or(true),
					_ => true,
				};
			}
			if matches!(value, crate::ir::Literal::Null) {
				return allows_null;
			}
		}
	}
	true
}

fn list_can_match(predicate: &RelExpr, values: &[i64], allows_null: bool) -> bool {
	if let RelExpr::Compare { op, right, .. } = predicate {
		if let RelExpr::Atom { value, .. } = right.as_ref() {
			if let crate::ir::Literal::Int(v) = value {
				if matches!(op, crate::rel::expr::CmpOp::Eq) {
					return values.contains(v);
				}
			}
			if matches!(value, crate::ir::Literal::Null) {
				return allows_null;
			}
		}
	}
	true
}

/// Validates that an UPDATE does not touch the partitioning column of a merge
/// table (spec.md "partitioning-column UPDATE is rejected").
pub fn check_partition_update(table: &TableRef, updated_columns: &[String], partition_column: &str) -> Result<(), Error> {
	if updated_columns.iter().any(|c| c == partition_column) {
		return Err(Error::UnsupportedPartitionUpdate { table: format!("{}.{}", table.schema, table.table) });
	}
	Ok(())
}

/// The predicate asserting a row's `column` value falls within `partition`'s
/// declared bounds, as a conjunction (spec.md §3 "AND is represented as a
/// node's predicate list" convention used throughout `rel::passes`).
fn membership_predicate(partition: &Partition, column: &str) -> Vec<RelExpr> {
	match &partition.kind {
		PartitionKind::Range { low, high } => {
			let mut preds = Vec::new();
			if let Some(l) = low {
				preds.push(RelExpr::cmp(CmpOp::Ge, RelExpr::column(column), RelExpr::atom(Literal::Int(*l))));
			}
			if let Some(h) = high {
				preds.push(RelExpr::cmp(CmpOp::Lt, RelExpr::column(column), RelExpr::atom(Literal::Int(*h))));
			}
			preds
		}
		PartitionKind::List(values) => vec![in_list(column, values, false)],
		PartitionKind::Column => Vec::new(),
	}
}

/// The predicate asserting a row's `column` value falls OUTSIDE `partition`'s
/// declared bounds — the negation of [`membership_predicate`], used both by
/// the per-partition exception relation and by the merge-table-wide
/// anti-predicate (spec.md "Partition-insert validation", "Partition-routed
/// DML").
fn partition_anti_predicate(partition: &Partition, column: &str) -> RelExpr {
	match &partition.kind {
		PartitionKind::Range { low: Some(l), high: Some(h) } => RelExpr::cmp(
			CmpOp::Or,
			RelExpr::cmp(CmpOp::Lt, RelExpr::column(column), RelExpr::atom(Literal::Int(*l))),
			RelExpr::cmp(CmpOp::Ge, RelExpr::column(column), RelExpr::atom(Literal::Int(*h))),
		),
		PartitionKind::Range { low: Some(l), high: None } => {
			RelExpr::cmp(CmpOp::Lt, RelExpr::column(column), RelExpr::atom(Literal::Int(*l)))
		}
		PartitionKind::Range { low: None, high: Some(h) } => {
			RelExpr::cmp(CmpOp::Ge, RelExpr::column(column), RelExpr::atom(Literal::Int(*h)))
		}
		PartitionKind::Range { low: None, high: None } => RelExpr::atom(Literal::Bool(false)),
		PartitionKind::List(values) => in_list(column, values, true),
		PartitionKind::Column => RelExpr::atom(Literal::Bool(false)),
	}
}

fn in_list(column: &str, values: &[i64], anti: bool) -> RelExpr {
	RelExpr::Compare {
		op: if anti { CmpOp::NotIn } else { CmpOp::In },
		left: Box::new(RelExpr::column(column)),
		right: Box::new(RelExpr::Function {
			subfunc: "tuple".to_owned(),
			args: values.iter().map(|v| RelExpr::atom(Literal::Int(*v))).collect(),
			order_by: Vec::new(),
			alias: None,
			flags: Default::default(),
		}),
		third: None,
		anti,
		symmetric: false,
		alias: None,
		flags: Default::default(),
	}
}

fn count_star() -> RelExpr {
	RelExpr::Aggregate {
		subfunc: "count".to_owned(),
		args: Vec::new(),
		distinct: false,
		no_nil: false,
		zero_if_empty: true,
		alias: None,
		flags: Default::default(),
	}
}

/// Builds the "exception relation" from spec.md "Partition-insert
/// validation": a `COUNT(*)` over the rows of `source` that fall outside
/// `partition`'s declared bounds on `column`. A nonzero count at execution
/// time is the trigger for `Error::PartitionViolation`.
fn insert_validation_exception(table: &TableRef, partition: &Partition, column: &str, source: RelNode) -> RelNode {
	let mut select = RelNode::new(OpKind::Select).with_left(source);
	select.exprs = vec![partition_anti_predicate(partition, column)];
	let mut count = RelNode::new(OpKind::GroupBy).with_left(select);
	count.exprs = vec![count_star()];
	count.table = Some(table.clone());
	count
}

/// Builds the chain of exception relations validating an insert into
/// `partition`, propagated upward through every enclosing partitioned parent
/// (spec.md "The validation is propagated upward through any enclosing
/// partitioned parents (nested partitioning)").
pub fn insert_validation_chain(table: &TableRef, partition: &Partition, column: &str, catalog: &dyn Catalog, source: &RelNode) -> Vec<RelNode> {
	let mut chain = vec![insert_validation_exception(table, partition, column, source.clone())];
	let mut current = table.clone();
	while let Some(parent) = catalog.partition_parent(&current.schema, &current.table) {
		let parent_partition =
			catalog.partitions(&parent.schema, &parent.table).into_iter().find(|p| p.table.table == current.table);
		if let Some(parent_partition) = parent_partition {
			chain.push(insert_validation_exception(&parent, &parent_partition, column, source.clone()));
		}
		current = parent;
	}
	chain
}

fn routed_dml_node(op: OpKind, table: &TableRef, predicate: Option<&RelExpr>) -> RelNode {
	let mut node = RelNode::new(op);
	node.table = Some(table.clone());
	if let Some(p) = predicate {
		node.exprs = vec![p.clone()];
	}
	node
}

fn merge_chain(nodes: Vec<RelNode>) -> RelNode {
	let mut iter = nodes.into_iter();
	let mut acc = iter.next().expect("merge_chain requires at least one node");
	for next in iter {
		acc = RelNode::new(OpKind::Merge).with_left(acc).with_right(next);
	}
	acc
}

/// Rewrites an INSERT of `source` rows into merge table `table` into
/// per-partition `SELECT`-then-`INSERT` pairs, plus a final exception count
/// over rows matching no partition (spec.md "Partition-routed DML": "On
/// INSERT into a merge table... build an anti-predicate (values matching no
/// partition) and a `COUNT(*)` over it, producing a runtime exception if
/// nonzero").
pub fn route_insert(table: &TableRef, catalog: &dyn Catalog, column: &str, source: RelNode) -> Result<RelNode, Error> {
	let partitions = catalog.partitions(&table.schema, &table.table);
	if partitions.is_empty() {
		return Err(Error::MergeTableEmpty(format!("{}.{}", table.schema, table.table)));
	}

	let mut nodes = Vec::new();
	let mut anti_preds = Vec::new();
	for partition in &partitions {
		let mut select = RelNode::new(OpKind::Select).with_left(source.clone());
		select.exprs = membership_predicate(partition, column);
		let mut insert = RelNode::new(OpKind::Insert).with_left(select);
		insert.table = Some(partition.table.clone());
		nodes.push(insert);
		anti_preds.push(partition_anti_predicate(partition, column));
	}

	let mut anti_select = RelNode::new(OpKind::Select).with_left(source);
	anti_select.exprs = anti_preds;
	let mut exception = RelNode::new(OpKind::GroupBy).with_left(anti_select);
	exception.exprs = vec![count_star()];
	exception.table = Some(table.clone());
	nodes.push(exception);

	Ok(merge_chain(nodes))
}

/// Propagates a DELETE or TRUNCATE over merge table `table` to each of its
/// partitions (spec.md "On DELETE/TRUNCATE: propagate to each partition").
pub fn route_delete_or_truncate(
	op: OpKind,
	table: &TableRef,
	catalog: &dyn Catalog,
	predicate: Option<&RelExpr>,
) -> Result<RelNode, Error> {
	debug_assert!(matches!(op, OpKind::Delete | OpKind::Truncate));
	let partitions = catalog.partitions(&table.schema, &table.table);
	if partitions.is_empty() {
		return Err(Error::MergeTableEmpty(format!("{}.{}", table.schema, table.table)));
	}
	let nodes = partitions.iter().map(|p| routed_dml_node(op, &p.table, predicate)).collect();
	Ok(merge_chain(nodes))
}

/// Propagates an UPDATE over merge table `table` to each partition, after
/// confirming it does not touch `partition_column` (spec.md "if the update
/// does not modify any partitioning column, propagate per-partition").
pub fn route_update(
	table: &TableRef,
	catalog: &dyn Catalog,
	updated_columns: &[String],
	partition_column: &str,
	predicate: Option<&RelExpr>,
) -> Result<RelNode, Error> {
	check_partition_update(table, updated_columns, partition_column)?;
	let partitions = catalog.partitions(&table.schema, &table.table);
	if partitions.is_empty() {
		return Err(Error::MergeTableEmpty(format!("{}.{}", table.schema, table.table)));
	}
	let nodes = partitions.iter().map(|p| routed_dml_node(OpKind::Update, &p.table, predicate)).collect();
	Ok(merge_chain(nodes))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ir::Literal;
	use crate::rel::expr::CmpOp;

	struct FakeCatalog {
		parts: Vec<Partition>,
	}
	impl Catalog for FakeCatalog {
		fn is_merge_table(&self, _: &str, t: &str) -> bool {
			t == "orders"
		}
		fn is_remote(&self, _: &str, _: &str) -> bool {
			false
		}
		fn is_replica(&self, _: &str, _: &str) -> bool {
			false
		}
		fn partitions(&self, _: &str, _: &str) -> Vec<Partition> {
			self.parts.clone()
		}
	}

	fn range_partition(name: &str, low: Option<i64>, high: Option<i64>) -> Partition {
		Partition {
			table: TableRef { schema: "sys".into(), table: name.into(), alias: None },
			kind: PartitionKind::Range { low, high },
			allows_null: false,
		}
	}

	fn base_table_under_select(table: TableRef, predicate: RelExpr) -> RelNode {
		let base = RelNode::base_table(table);
		let mut select = RelNode::new(OpKind::Select).with_left(base);
		select.exprs = vec![predicate];
		select
	}

	#[test]
	fn single_surviving_partition_emits_base_table_directly() {
		let catalog = FakeCatalog { parts: vec![range_partition("orders_2024", Some(0), Some(100))] };
		let predicate = RelExpr::cmp(CmpOp::Eq, RelExpr::column("id"), RelExpr::atom(Literal::Int(50)));
		let select = base_table_under_select(TableRef { schema: "sys".into(), table: "orders".into(), alias: None }, predicate);
		let expanded = expand(&select, &catalog).unwrap();
		let base = expanded.left.unwrap();
		assert_eq!(base.op, OpKind::BaseTable);
		assert_eq!(base.table.unwrap().table, "orders_2024");
	}

	#[test]
	fn no_surviving_partitions_yields_empty_project() {
		let catalog = FakeCatalog { parts: vec![range_partition("orders_2024", Some(0), Some(100))] };
		let predicate = RelExpr::cmp(CmpOp::Eq, RelExpr::column("id"), RelExpr::atom(Literal::Int(500)));
		let select = base_table_under_select(TableRef { schema: "sys".into(), table: "orders".into(), alias: None }, predicate);
		let expanded = expand(&select, &catalog).unwrap();
		let project = expanded.left.unwrap();
		assert_eq!(project.op, OpKind::Project);
		assert_eq!(project.cardinality_hint, Some(0));
	}

	#[test]
	fn multiple_surviving_partitions_build_a_union_chain() {
		let catalog = FakeCatalog {
			parts: vec![range_partition("orders_2024", Some(0), Some(100)), range_partition("orders_2025", Some(100), Some(200))],
		};
		let node = RelNode::base_table(TableRef { schema: "sys".into(), table: "orders".into(), alias: None });
		let expanded = expand(&node, &catalog).unwrap();
		assert_eq!(expanded.op, OpKind::Union);
	}

	#[test]
	fn partition_column_update_is_rejected() {
		let table = TableRef { schema: "sys".into(), table: "orders".into(), alias: None };
		let err = check_partition_update(&table, &["order_date".to_owned()], "order_date").unwrap_err();
		assert!(matches!(err, Error::UnsupportedPartitionUpdate { .. }));
	}

	fn orders_table() -> TableRef {
		TableRef { schema: "sys".into(), table: "orders".into(), alias: None }
	}

	#[test]
	fn insert_validation_exception_counts_out_of_bounds_rows() {
		let partition = range_partition("orders_2024", Some(0), Some(100));
		let source = RelNode::base_table(TableRef { schema: "sys".into(), table: "staging".into(), alias: None });
		let exception = insert_validation_exception(&orders_table(), &partition, "id", source);
		assert_eq!(exception.op, OpKind::GroupBy);
		assert!(matches!(exception.exprs[0], RelExpr::Aggregate { .. }));
		let select = exception.left.unwrap();
		assert_eq!(select.op, OpKind::Select);
		assert!(matches!(select.exprs[0], RelExpr::Compare { op: CmpOp::Or, .. }));
	}

	#[test]
	fn insert_validation_chain_includes_enclosing_parent() {
		struct NestedCatalog;
		impl Catalog for NestedCatalog {
			fn is_merge_table(&self, _: &str, t: &str) -> bool {
				t == "orders_2024" || t == "orders"
			}
			fn is_remote(&self, _: &str, _: &str) -> bool {
				false
			}
			fn is_replica(&self, _: &str, _: &str) -> bool {
				false
			}
			fn partitions(&self, _: &str, table: &str) -> Vec<Partition> {
				if table == "orders" {
					vec![range_partition("orders_2024", Some(0), Some(100))]
				} else {
					Vec::new()
				}
			}
			fn partition_parent(&self, schema: &str, table: &str) -> Option<TableRef> {
				if table == "orders_2024" {
					Some(TableRef { schema: schema.into(), table: "orders".into(), alias: None })
				} else {
					None
				}
			}
		}

		let catalog = NestedCatalog;
		let leaf = range_partition("orders_2024_q1", Some(0), Some(25));
		let source = RelNode::base_table(TableRef { schema: "sys".into(), table: "staging".into(), alias: None });
		let chain = insert_validation_chain(
			&TableRef { schema: "sys".into(), table: "orders_2024".into(), alias: None },
			&leaf,
			"id",
			&catalog,
			&source,
		);
		assert_eq!(chain.len(), 2);
		assert_eq!(chain[1].table.as_ref().unwrap().table, "orders");
	}

	#[test]
	fn route_insert_builds_per_partition_inserts_and_an_anti_predicate_exception() {
		let catalog = FakeCatalog {
			parts: vec![range_partition("orders_2024", Some(0), Some(100)), range_partition("orders_2025", Some(100), Some(200))],
		};
		let source = RelNode::base_table(TableRef { schema: "sys".into(), table: "staging".into(), alias: None });
		let routed = route_insert(&orders_table(), &catalog, "id", source).unwrap();

		fn collect_inserts(node: &RelNode, out: &mut Vec<String>) {
			if node.op == OpKind::Insert {
				out.push(node.table.as_ref().unwrap().table.clone());
			}
			if let Some(l) = &node.left {
				collect_inserts(l, out);
			}
			if let Some(r) = &node.right {
				collect_inserts(r, out);
			}
		}
		let mut inserts = Vec::new();
		collect_inserts(&routed, &mut inserts);
		assert_eq!(inserts, vec!["orders_2024".to_owned(), "orders_2025".to_owned()]);

		fn rightmost(node: &RelNode) -> &RelNode {
			match &node.right {
				Some(r) => rightmost(r),
				None => node,
			}
		}
		let exception = rightmost(&routed);
		assert_eq!(exception.op, OpKind::GroupBy);
		assert_eq!(exception.table.as_ref().unwrap().table, "orders");
	}

	#[test]
	fn route_delete_propagates_to_every_partition() {
		let catalog = FakeCatalog {
			parts: vec![range_partition("orders_2024", Some(0), Some(100)), range_partition("orders_2025", Some(100), Some(200))],
		};
		let routed = route_delete_or_truncate(OpKind::Delete, &orders_table(), &catalog, None).unwrap();
		assert_eq!(routed.op, OpKind::Merge);
		assert_eq!(routed.left.unwrap().op, OpKind::Delete);
		assert_eq!(routed.right.unwrap().op, OpKind::Delete);
	}

	#[test]
	fn route_update_rejects_partition_column_changes() {
		let catalog = FakeCatalog { parts: vec![range_partition("orders_2024", Some(0), Some(100))] };
		let err = route_update(&orders_table(), &catalog, &["order_date".to_owned()], "order_date", None).unwrap_err();
		assert!(matches!(err, Error::UnsupportedPartitionUpdate { .. }));
	}

	#[test]
	fn route_update_propagates_when_partition_column_untouched() {
		let catalog = FakeCatalog {
			parts: vec![range_partition("orders_2024", Some(0), Some(100)), range_partition("orders_2025", Some(100), Some(200))],
		};
		let routed = route_update(&orders_table(), &catalog, &["status".to_owned()], "order_date", None).unwrap();
		assert_eq!(routed.op, OpKind::Merge);
	}
}
