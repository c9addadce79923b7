use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use qflow_core::dataflow::{AdmissionGate, WorkerPool};
use qflow_core::frame::Frame;
use qflow_core::ir::{Block, Instruction, Opcode, VarType, Variable};
use qflow_core::session::SessionTable;

fn independent_chain_block(n: usize) -> Block {
	let mut block = Block::new("user", "bench");
	for i in 0..n {
		block.push_var(Variable::new(format!("v{i}"), VarType::Int64));
		let mut instr = Instruction::new(Opcode::Assign);
		instr.retc = 1;
		instr.args = vec![i as u32];
		block.push_instr(instr);
	}
	block
}

fn bench_run_dataflow(c: &mut Criterion) {
	let table = SessionTable::init(4);
	let session = table.console();
	let pool = WorkerPool::new(4, 4);
	let admission = AdmissionGate::new(1 << 30);

	c.bench_function("run_dataflow_128_independent", |b| {
		b.iter(|| {
			let block = Arc::new(independent_chain_block(128));
			let mut frame = Frame::prepare_stack(block.clone(), 0);
			let result = qflow_core::dataflow::run_dataflow(
				&session,
				&block,
				0,
				black_box(block.instructions.len()),
				&mut frame,
				&pool,
				&admission,
			);
			black_box(result).unwrap();
		})
	});
}

criterion_group!(benches, bench_run_dataflow);
criterion_main!(benches);
