//! Named optimization passes (spec.md §4.4 "Optimization passes").
//!
//! Each pass implements [`crate::rel::visitor::Pass`] and is grounded on the
//! teacher's `idx/planner/rewriter.rs` recursive-rewrite idiom: walk the
//! tree, ask whether a local rewrite applies, return whether anything
//! changed so `run_to_fixpoint` knows to keep iterating.

mod cse;
mod dce;
mod join_order;
mod outer_demotion;
mod predicate;
mod pushdown;
mod topn;
mod union_pushdown;

pub use cse::CommonSubexprElimination;
pub use dce::DeadCodeElimination;
pub use join_order::JoinReordering;
pub use outer_demotion::OuterJoinDemotion;
pub use predicate::{LikeSelectSimplification, OrChainToIn, PredicateSimplification, RangeMerge};
pub use pushdown::{MergeNestedProjections, PushProjectDown, PushSelectDown};
pub use topn::TopNPushdown;
pub use union_pushdown::{CountStarShortcut, DistinctAggregateRewrite, UnionAllAggregatePushdown};

use crate::rel::visitor::Pass;

/// The default pass pipeline, in the order spec.md §4.4 lists them: cheap
/// structural rewrites first, then join-order and semantic rewrites that
/// benefit from a simplified tree, then pushdowns that need the final
/// operator shape.
pub fn default_pipeline() -> Vec<Box<dyn Pass>> {
	vec![
		Box::new(CommonSubexprElimination),
		Box::new(MergeNestedProjections),
		Box::new(PushProjectDown),
		Box::new(PushSelectDown),
		Box::new(OrChainToIn),
		Box::new(RangeMerge),
		Box::new(PredicateSimplification),
		Box::new(LikeSelectSimplification),
		Box::new(JoinReordering),
		Box::new(DeadCodeElimination),
		Box::new(UnionAllAggregatePushdown),
		Box::new(DistinctAggregateRewrite),
		Box::new(CountStarShortcut),
		Box::new(OuterJoinDemotion),
		Box::new(TopNPushdown),
	]
}
