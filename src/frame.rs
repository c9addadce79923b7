//! The runtime stack frame (spec.md §3 "Runtime Stack Frame").
//!
//! Grounded on the teacher's `dbs/iterator.rs`, whose `Iterator` struct holds
//! the mutable per-run state (cursor, results, cancellation) alongside the
//! static plan it executes; here the analogous per-run state is a parallel
//! array to an IR block's variable table.

use crate::buf::ColumnHandle;
use crate::ir::{Block, Literal, VarRef};
use std::sync::Arc;

/// A runtime value: either a scalar literal or a column-buffer handle.
/// BAT-typed slots hold a handle whose refcount the interpreter's garbage
/// rules manage explicitly (spec.md §4.2).
#[derive(Debug, Clone)]
pub enum Value {
	Scalar(Literal),
	Bat(ColumnHandle),
}

impl Value {
	pub fn is_false_or_null(&self) -> bool {
		matches!(self, Value::Scalar(Literal::Null) | Value::Scalar(Literal::Bool(false)))
	}
}

/// A parallel array to an IR block's variable table, holding one tagged
/// value per variable, plus the frame-level bookkeeping spec.md §3 names:
/// owning block pointer, call depth, caller reference, debug command byte,
/// worker count, and accumulated memory claim.
pub struct Frame {
	pub block: Arc<Block>,
	pub slots: Vec<Option<Value>>,
	pub call_depth: u32,
	pub caller: Option<Box<Frame>>,
	pub debug_cmd: u8,
	pub worker_count: u32,
	pub memory_claim: i64,
	/// `true` once the frame has been marked to preserve its BAT references
	/// past return (spec.md §4.2 `run`: "applies garbage collection... unless
	/// the frame is marked keep-alive").
	pub keep_alive: bool,
}

impl Frame {
	/// *prepare_stack(block, size) → frame*: allocates a frame sized for the
	/// block's variables, with slack for runtime-inserted variables, and
	/// copies constant variable values in place.
	pub fn prepare_stack(block: Arc<Block>, size: usize) -> Frame {
		let capacity = block.variables.len().max(size);
		let mut slots: Vec<Option<Value>> = vec![None; capacity];
		for (i, var) in block.variables.iter().enumerate() {
			if let Some(lit) = &var.constant {
				slots[i] = Some(Value::Scalar(lit.clone()));
			}
		}
		Frame {
			block,
			slots,
			call_depth: 0,
			caller: None,
			debug_cmd: 0,
			worker_count: 0,
			memory_claim: 0,
			keep_alive: false,
		}
	}

	pub fn get(&self, r: VarRef) -> Option<&Value> {
		self.slots.get(r as usize).and_then(|v| v.as_ref())
	}

	pub fn set(&mut self, r: VarRef, v: Value) -> Option<Value> {
		let idx = r as usize;
		if idx >= self.slots.len() {
			self.slots.resize(idx + 1, None);
		}
		std::mem::replace(&mut self.slots[idx], Some(v))
	}

	pub fn take(&mut self, r: VarRef) -> Option<Value> {
		self.slots.get_mut(r as usize).and_then(|slot| slot.take())
	}
}
