//! Relational expressions (spec.md §3 "Relational Expression").

use crate::ir::Literal as Atom;

/// Comparison operators over two (or three, for `between`) operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
	Eq,
	Ne,
	Lt,
	Le,
	Ge,
	Gt,
	In,
	NotIn,
	Or,
	Filter,
	MarkIn,
	MarkNotIn,
	Between,
}

/// Flags carried on every expression (spec.md §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExprFlags {
	pub used: bool,
	pub intern: bool,
	pub has_nil: bool,
	pub unique: bool,
	pub ascending: bool,
	pub nulls_first: bool,
	pub basecol: bool,
	pub is_ref: bool,
	pub freevar_depth: u32,
}

/// A property annotation attached to an expression or relation
/// (spec.md §3: "hash-column, pk/fk, remote-uri, join-index, count").
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
	HashColumn,
	PrimaryKey,
	ForeignKey,
	JoinIndex,
	RemoteUri(String),
	Count,
	HasWindow,
}

/// An alias: table-name, column-name, or a numeric label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alias {
	Named { table: Option<String>, column: String },
	Label(u32),
}

#[derive(Debug, Clone)]
pub struct PsmControl {
	pub kind: PsmKind,
	pub body: Vec<RelExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PsmKind {
	Set,
	Var,
	Return,
	While,
	If,
	RelEmbed,
	Exception,
}

/// A node in the relational expression tree (spec.md §3 "Relational Expression").
#[derive(Debug, Clone)]
pub enum RelExpr {
	Column { qualifier: Option<String>, name: String, alias: Option<Alias>, flags: ExprFlags },
	Atom { value: Atom, alias: Option<Alias>, flags: ExprFlags },
	Param { name: String, alias: Option<Alias>, flags: ExprFlags },
	Function {
		subfunc: String,
		args: Vec<RelExpr>,
		order_by: Vec<RelExpr>,
		alias: Option<Alias>,
		flags: ExprFlags,
	},
	Aggregate {
		subfunc: String,
		args: Vec<RelExpr>,
		distinct: bool,
		no_nil: bool,
		zero_if_empty: bool,
		alias: Option<Alias>,
		flags: ExprFlags,
	},
	Compare {
		op: CmpOp,
		left: Box<RelExpr>,
		right: Box<RelExpr>,
		third: Option<Box<RelExpr>>,
		anti: bool,
		symmetric: bool,
		alias: Option<Alias>,
		flags: ExprFlags,
	},
	Convert { source: Box<RelExpr>, target_type: String, alias: Option<Alias>, flags: ExprFlags },
	Psm(PsmControl),
}

impl RelExpr {
	pub fn flags(&self) -> ExprFlags {
		match self {
			RelExpr::Column { flags, .. }
			| RelExpr::Atom { flags, .. }
			| RelExpr::Param { flags, .. }
			| RelExpr::Function { flags, .. }
			| RelExpr::Aggregate { flags, .. }
			| RelExpr::Compare { flags, .. }
			| RelExpr::Convert { flags, .. } => *flags,
			RelExpr::Psm(_) => ExprFlags::default(),
		}
	}

	pub fn alias(&self) -> Option<&Alias> {
		match self {
			RelExpr::Column { alias, .. }
			| RelExpr::Atom { alias, .. }
			| RelExpr::Param { alias, .. }
			| RelExpr::Function { alias, .. }
			| RelExpr::Aggregate { alias, .. }
			| RelExpr::Compare { alias, .. }
			| RelExpr::Convert { alias, .. } => alias.as_ref(),
			RelExpr::Psm(_) => None,
		}
	}

	pub fn column(name: impl Into<String>) -> RelExpr {
		RelExpr::Column { qualifier: None, name: name.into(), alias: None, flags: ExprFlags::default() }
	}

	pub fn qualified_column(qualifier: impl Into<String>, name: impl Into<String>) -> RelExpr {
		RelExpr::Column {
			qualifier: Some(qualifier.into()),
			name: name.into(),
			alias: None,
			flags: ExprFlags::default(),
		}
	}

	pub fn atom(value: Atom) -> RelExpr {
		RelExpr::Atom { value, alias: None, flags: ExprFlags::default() }
	}

	pub fn cmp(op: CmpOp, left: RelExpr, right: RelExpr) -> RelExpr {
		RelExpr::Compare {
			op,
			left: Box::new(left),
			right: Box::new(right),
			third: None,
			anti: false,
			symmetric: false,
			alias: None,
			flags: ExprFlags::default(),
		}
	}

	/// Structural equality ignoring aliases and flags, used by CSE and
	/// identity-detection rewrites.
	pub fn structurally_eq(&self, other: &RelExpr) -> bool {
		match (self, other) {
			(
				RelExpr::Column { qualifier: q1, name: n1, .. },
				RelExpr::Column { qualifier: q2, name: n2, .. },
			) => q1 == q2 && n1 == n2,
			(RelExpr::Atom { value: v1, .. }, RelExpr::Atom { value: v2, .. }) => v1 == v2,
			(RelExpr::Param { name: n1, .. }, RelExpr::Param { name: n2, .. }) => n1 == n2,
			(
				RelExpr::Function { subfunc: f1, args: a1, .. },
				RelExpr::Function { subfunc: f2, args: a2, .. },
			) => f1 == f2 && a1.len() == a2.len() && a1.iter().zip(a2).all(|(x, y)| x.structurally_eq(y)),
			(
				RelExpr::Compare { op: o1, left: l1, right: r1, .. },
				RelExpr::Compare { op: o2, left: l2, right: r2, .. },
			) => o1 == o2 && l1.structurally_eq(l2) && r1.structurally_eq(r2),
			_ => false,
		}
	}

	/// Whether this expression is a plain column reference or an atom —
	/// the CSE pass skips these since duplicating them costs nothing.
	pub fn is_cheap(&self) -> bool {
		matches!(self, RelExpr::Column { .. } | RelExpr::Atom { .. } | RelExpr::Param { .. })
	}

	pub fn references_column(&self, qualifier: Option<&str>, name: &str) -> bool {
		match self {
			RelExpr::Column { qualifier: q, name: n, .. } => q.as_deref() == qualifier && n == name,
			RelExpr::Function { args, order_by, .. } => {
				args.iter().chain(order_by).any(|a| a.references_column(qualifier, name))
			}
			RelExpr::Aggregate { args, .. } => args.iter().any(|a| a.references_column(qualifier, name)),
			RelExpr::Compare { left, right, third, .. } => {
				left.references_column(qualifier, name)
					|| right.references_column(qualifier, name)
					|| third.as_ref().map(|t| t.references_column(qualifier, name)).unwrap_or(false)
			}
			RelExpr::Convert { source, .. } => source.references_column(qualifier, name),
			_ => false,
		}
	}
}
