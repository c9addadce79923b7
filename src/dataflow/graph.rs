//! Dependency graph construction (spec.md §4.3 "Graph construction").
//!
//! The wakeup lists are a linked-list-via-arrays representation (`nodes[]` /
//! `edges[]`) as the spec names it: `edges[k]` is the local index woken by
//! the instruction at local index `k`'s head, and `nodes[]` chains further
//! entries for the same producer. We keep it as a `Vec<Vec<usize>>` here —
//! functionally identical, reallocated per push rather than pre-sized and
//! doubled, which the scale of one dataflow region never makes a difference.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::buf::ColumnHandle;
use crate::frame::Value;
use crate::ir::{Block, VarRef};

/// Per-instruction graph state local to one dependency graph.
pub struct DependencyGraph {
	/// `wakeup[k]`: local indices to re-examine when local index `k` completes.
	wakeup: Vec<Vec<usize>>,
	block_count: Vec<AtomicI64>,
	len: usize,
	/// Guards structural mutation of `wakeup` (spec.md "a lock for graph mutation").
	mutate_lock: Mutex<()>,
}

impl DependencyGraph {
	/// Builds the graph for IR block range `[start, stop)`.
	pub fn build(block: &Block, start: usize, stop: usize) -> DependencyGraph {
		let len = stop - start;
		let mut wakeup = vec![Vec::new(); len];
		let mut block_count = vec![0i64; len];

		// Tracks, for each variable, the local index of the instruction
		// within this range that most recently wrote it.
		let mut last_writer: ahash::AHashMap<VarRef, usize> = ahash::AHashMap::new();

		for local in 0..len {
			let pc = start + local;
			let instr = &block.instructions[pc];
			for &arg in instr.operands() {
				if block.var(arg).constant.is_some() {
					continue;
				}
				if let Some(&k) = last_writer.get(&arg) {
					wakeup[k].push(local);
					block_count[local] += 1;
				}
			}
			for &r in instr.results() {
				last_writer.insert(r, local);
			}
		}

		// Scope-end edges: an instruction whose variable's last use is at a
		// later pc within the range must wait for that pc too, so garbage
		// collection never races the producer (spec.md "additionally...").
		for local in 0..len {
			let pc = start + local;
			let instr = &block.instructions[pc];
			for &r in instr.results() {
				let scope_end = block.var(r).scope_end;
				if scope_end > pc && scope_end < stop {
					let end_local = scope_end - start;
					wakeup[local].push(end_local);
					block_count[end_local] += 1;
				}
			}
		}

		DependencyGraph {
			wakeup,
			block_count: block_count.into_iter().map(AtomicI64::new).collect(),
			len,
			mutate_lock: Mutex::new(()),
		}
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn block_count(&self, local: usize) -> i64 {
		self.block_count[local].load(Ordering::SeqCst)
	}

	/// Returns the wakeup list for `local`, cloned under the graph-mutation
	/// lock per spec.md's "a lock for graph mutation".
	pub fn wakeup_list(&self, local: usize) -> Vec<usize> {
		let _guard = self.mutate_lock.lock().unwrap();
		self.wakeup[local].clone()
	}

	/// Decrements `local`'s block-count, returning the new value. Becomes
	/// eligible at exactly zero.
	pub fn decrement(&self, local: usize) -> i64 {
		self.block_count[local].fetch_sub(1, Ordering::SeqCst) - 1
	}

	/// Sum of `get_memory_claim` over non-return, non-constant arguments
	/// already holding a produced value, computed before an instruction is
	/// first enqueued (spec.md step 5). Constant operands carry no runtime
	/// claim; operands that haven't been produced yet (later in program
	/// order, still pending) contribute nothing until they resolve.
	pub fn initial_argclaim(&self, frame: &crate::frame::Frame, block: &Block, pc: usize) -> i64 {
		let instr = &block.instructions[pc];
		instr
			.operands()
			.iter()
			.filter(|&&arg| block.var(arg).constant.is_none())
			.filter_map(|&arg| frame.get(arg))
			.map(memory_claim)
			.sum()
	}

	/// Sum of `get_memory_claim` over return values, computed after an
	/// instruction completes (spec.md "hot-potato selection").
	pub fn produced_size(&self, frame: &crate::frame::Frame, block: &Block, pc: usize) -> i64 {
		let instr = &block.instructions[pc];
		instr.results().iter().filter_map(|&r| frame.get(r)).map(memory_claim).sum()
	}
}

/// Memory claim estimate for one value (spec.md §4.3 "Memory claim estimate").
/// Views are out of scope here (no slicing concept in this crate's buffer
/// model) so every handle reports its own size; scalars are free.
pub fn memory_claim(value: &Value) -> i64 {
	match value {
		Value::Scalar(_) => 0,
		Value::Bat(h) => claim_for_handle(h),
	}
}

fn claim_for_handle(h: &ColumnHandle) -> i64 {
	h.count().max(0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ir::{Instruction, Opcode, Variable, VarType};

	#[test]
	fn independent_instructions_have_zero_block_count() {
		let mut block = Block::new("user", "f");
		block.push_var(Variable::new("a", VarType::Int64));
		block.push_var(Variable::new("b", VarType::Int64));
		let mut i1 = Instruction::new(Opcode::Assign);
		i1.retc = 1;
		i1.args = vec![0];
		let mut i2 = Instruction::new(Opcode::Assign);
		i2.retc = 1;
		i2.args = vec![1];
		block.push_instr(i1);
		block.push_instr(i2);
		let graph = DependencyGraph::build(&block, 0, 2);
		assert_eq!(graph.block_count(0), 0);
		assert_eq!(graph.block_count(1), 0);
	}

	#[test]
	fn dependent_instruction_waits_on_producer() {
		let mut block = Block::new("user", "f");
		block.push_var(Variable::new("a", VarType::Int64));
		block.push_var(Variable::new("b", VarType::Int64));
		let mut producer = Instruction::new(Opcode::Assign);
		producer.retc = 1;
		producer.args = vec![0];
		let mut consumer = Instruction::new(Opcode::Assign);
		consumer.retc = 1;
		consumer.args = vec![1, 0];
		block.push_instr(producer);
		block.push_instr(consumer);
		let graph = DependencyGraph::build(&block, 0, 2);
		assert_eq!(graph.block_count(1), 1);
		assert_eq!(graph.wakeup_list(0), vec![1]);
	}
}
