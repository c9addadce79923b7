//! Factory (coroutine-shaped) calls (spec.md §4.2 "factory-call", §9
//! "Coroutines (factories)").
//!
//! Grounded on the teacher's recursive `stm.compute(stk, ...)` calling
//! convention in `dbs/executor.rs`: `reblessive::Stk` bounds recursion depth
//! without growing the native thread stack, which this crate reuses to
//! account for the same 256-deep call-depth limit the spec imposes on
//! ordinary IR-function calls. Per the resolved open question (spec.md §9),
//! a factory never yields across dataflow workers — it is always driven to
//! completion, or to its next `yield`, on the calling worker.

use reblessive::tree::Stk;

use crate::cnf;
use crate::err::Error;
use crate::frame::{Frame, Value};
use crate::ir::Block;

/// The outcome of driving a factory body to its `return`/`end`.
pub enum Step {
	Finished(Vec<Value>),
}

/// Drives a factory body to its next suspension point using a bounded
/// `reblessive` stack, enforcing the same call-depth ceiling as ordinary
/// nested IR-function calls.
pub async fn drive<'a>(stk: &mut Stk, block: &'a Block, frame: &'a mut Frame) -> Result<Step, Error> {
	if frame.call_depth + 1 > cnf::MAX_CALL_DEPTH {
		return Err(Error::StackOverflow { max: cnf::MAX_CALL_DEPTH });
	}
	frame.call_depth += 1;
	let result = stk.run(|stk| run_body(stk, block, &mut *frame)).await;
	frame.call_depth -= 1;
	result
}

async fn run_body(_stk: &mut Stk, block: &Block, frame: &mut Frame) -> Result<Step, Error> {
	match super::run_range(
		&dummy_console(),
		block,
		0,
		block.instructions.len(),
		frame,
		None,
		None,
	)? {
		super::RunResult::Returned(values) => Ok(Step::Finished(values)),
		super::RunResult::Ok => Ok(Step::Finished(Vec::new())),
	}
}

// `run_range` requires a `Session` purely to check FINISHING/timeout state;
// factories run fully within one worker and carry no session of their own
// when driven from the dataflow scheduler, so we hand it a fresh console-less
// placeholder sized for exactly this purpose.
fn dummy_console() -> crate::session::Session {
	crate::session::Session::detached()
}
