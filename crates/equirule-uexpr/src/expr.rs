//! U-expression terms.
//!
//! `UExpr` is a closed sum type: arity is fixed by the variant, so a `Mul`
//! with one child or a `Table` with children cannot be built. Terms are plain
//! owned trees; local rewriting addresses a subterm by its position (the list
//! of child indices from the root) instead of through parent back-pointers.

use crate::var::Var;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Uninterpreted predicate emitted for "this attribute is not NULL".
pub const NOT_NULL_PRED: &str = "NotNull";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Table,
    Pred,
    EqPred,
    Add,
    Mul,
    Not,
    Sum,
    Squash,
}

impl Kind {
    pub fn arity(self) -> usize {
        match self {
            Kind::Table | Kind::Pred | Kind::EqPred => 0,
            Kind::Not | Kind::Sum | Kind::Squash => 1,
            Kind::Add | Kind::Mul => 2,
        }
    }

    pub fn is_pred(self) -> bool {
        matches!(self, Kind::Pred | Kind::EqPred)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UExpr {
    Table { name: String, var: Var },
    Pred { name: String, args: Vec<Var> },
    EqPred { left: Var, right: Var },
    Add(Box<UExpr>, Box<UExpr>),
    Mul(Box<UExpr>, Box<UExpr>),
    Not(Box<UExpr>),
    Sum { vars: Vec<Var>, body: Box<UExpr> },
    Squash(Box<UExpr>),
}

impl UExpr {
    // ========================================================================
    // Constructors
    // ========================================================================

    pub fn table(name: impl Into<String>, var: Var) -> Self {
        UExpr::Table {
            name: name.into(),
            var,
        }
    }

    pub fn pred(name: impl Into<String>, args: Vec<Var>) -> Self {
        UExpr::Pred {
            name: name.into(),
            args,
        }
    }

    pub fn eq_pred(left: Var, right: Var) -> Self {
        UExpr::EqPred { left, right }
    }

    pub fn not_null(var: Var) -> Self {
        UExpr::pred(NOT_NULL_PRED, vec![var])
    }

    /// The multiplicative unit, written as the trivially true `[1 = 1]`.
    pub fn unit() -> Self {
        UExpr::eq_pred(Var::constant("1"), Var::constant("1"))
    }

    /// The additive zero, written `not(1)`.
    pub fn zero() -> Self {
        UExpr::not(UExpr::unit())
    }

    pub fn add(left: UExpr, right: UExpr) -> Self {
        UExpr::Add(Box::new(left), Box::new(right))
    }

    pub fn mul(left: UExpr, right: UExpr) -> Self {
        UExpr::Mul(Box::new(left), Box::new(right))
    }

    pub fn not(inner: UExpr) -> Self {
        UExpr::Not(Box::new(inner))
    }

    pub fn squash(inner: UExpr) -> Self {
        UExpr::Squash(Box::new(inner))
    }

    /// `Sum{vars}(body)`; summing over no variables is the body itself.
    pub fn sum(vars: Vec<Var>, body: UExpr) -> Self {
        if vars.is_empty() {
            body
        } else {
            UExpr::Sum {
                vars,
                body: Box::new(body),
            }
        }
    }

    /// Left-deep product of `terms`, `None` when there are none.
    pub fn product<I: IntoIterator<Item = UExpr>>(terms: I) -> Option<UExpr> {
        terms.into_iter().reduce(UExpr::mul)
    }

    /// Left-deep sum (`Add`) of `terms`, `None` when there are none.
    pub fn sum_of<I: IntoIterator<Item = UExpr>>(terms: I) -> Option<UExpr> {
        terms.into_iter().reduce(UExpr::add)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn kind(&self) -> Kind {
        match self {
            UExpr::Table { .. } => Kind::Table,
            UExpr::Pred { .. } => Kind::Pred,
            UExpr::EqPred { .. } => Kind::EqPred,
            UExpr::Add(..) => Kind::Add,
            UExpr::Mul(..) => Kind::Mul,
            UExpr::Not(_) => Kind::Not,
            UExpr::Sum { .. } => Kind::Sum,
            UExpr::Squash(_) => Kind::Squash,
        }
    }

    pub fn child(&self, index: usize) -> Option<&UExpr> {
        match (self, index) {
            (UExpr::Add(l, _) | UExpr::Mul(l, _), 0) => Some(l.as_ref()),
            (UExpr::Add(_, r) | UExpr::Mul(_, r), 1) => Some(r.as_ref()),
            (UExpr::Not(inner) | UExpr::Squash(inner), 0) => Some(inner.as_ref()),
            (UExpr::Sum { body, .. }, 0) => Some(body.as_ref()),
            _ => None,
        }
    }

    pub fn is_atom(&self) -> bool {
        self.kind().arity() == 0
    }

    /// Whether `var` occurs anywhere in the term (bound or free).
    pub fn uses(&self, var: &Var) -> bool {
        match self {
            UExpr::Table { var: v, .. } => v.uses(var),
            UExpr::Pred { args, .. } => args.iter().any(|a| a.uses(var)),
            UExpr::EqPred { left, right } => left.uses(var) || right.uses(var),
            UExpr::Add(l, r) | UExpr::Mul(l, r) => l.uses(var) || r.uses(var),
            UExpr::Not(inner) | UExpr::Squash(inner) => inner.uses(var),
            UExpr::Sum { vars, body } => vars.contains(var) || body.uses(var),
        }
    }

    /// Substitute `from` by `to` everywhere, binder lists included.
    pub fn subst_var(&self, from: &Var, to: &Var) -> UExpr {
        match self {
            UExpr::Table { name, var } => UExpr::Table {
                name: name.clone(),
                var: var.subst(from, to),
            },
            UExpr::Pred { name, args } => UExpr::Pred {
                name: name.clone(),
                args: args.iter().map(|a| a.subst(from, to)).collect(),
            },
            UExpr::EqPred { left, right } => UExpr::EqPred {
                left: left.subst(from, to),
                right: right.subst(from, to),
            },
            UExpr::Add(l, r) => UExpr::add(l.subst_var(from, to), r.subst_var(from, to)),
            UExpr::Mul(l, r) => UExpr::mul(l.subst_var(from, to), r.subst_var(from, to)),
            UExpr::Not(inner) => UExpr::not(inner.subst_var(from, to)),
            UExpr::Squash(inner) => UExpr::squash(inner.subst_var(from, to)),
            UExpr::Sum { vars, body } => UExpr::Sum {
                vars: vars.iter().map(|v| v.subst(from, to)).collect(),
                body: Box::new(body.subst_var(from, to)),
            },
        }
    }

    /// Base variables occurring in atoms of this term, in first-occurrence order.
    pub fn atom_vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        self.collect_atom_vars(&mut out);
        out
    }

    fn collect_atom_vars(&self, out: &mut Vec<Var>) {
        match self {
            UExpr::Table { var, .. } => var.base_vars(out),
            UExpr::Pred { args, .. } => args.iter().for_each(|a| a.base_vars(out)),
            UExpr::EqPred { left, right } => {
                left.base_vars(out);
                right.base_vars(out);
            }
            UExpr::Add(l, r) | UExpr::Mul(l, r) => {
                l.collect_atom_vars(out);
                r.collect_atom_vars(out);
            }
            UExpr::Not(inner) | UExpr::Squash(inner) => inner.collect_atom_vars(out),
            UExpr::Sum { body, .. } => body.collect_atom_vars(out),
        }
    }

    /// Base variables used but not bound by an enclosing `Sum`.
    pub fn free_vars(&self) -> BTreeSet<Var> {
        let mut out = BTreeSet::new();
        self.collect_free_vars(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free_vars(&self, bound: &mut Vec<Var>, out: &mut BTreeSet<Var>) {
        match self {
            UExpr::Sum { vars, body } => {
                let mark = bound.len();
                bound.extend(vars.iter().cloned());
                body.collect_free_vars(bound, out);
                bound.truncate(mark);
            }
            UExpr::Add(l, r) | UExpr::Mul(l, r) => {
                l.collect_free_vars(bound, out);
                r.collect_free_vars(bound, out);
            }
            UExpr::Not(inner) | UExpr::Squash(inner) => inner.collect_free_vars(bound, out),
            atom => {
                for var in atom.atom_vars() {
                    if !bound.contains(&var) {
                        out.insert(var);
                    }
                }
            }
        }
    }

    /// Every base-variable name in the term, binders included.
    pub fn var_names(&self, out: &mut BTreeSet<String>) {
        if let UExpr::Sum { vars, .. } = self {
            for v in vars {
                if let Some(name) = v.name() {
                    out.insert(name.to_string());
                }
            }
        }
        match self {
            UExpr::Add(l, r) | UExpr::Mul(l, r) => {
                l.var_names(out);
                r.var_names(out);
            }
            UExpr::Not(inner) | UExpr::Squash(inner) => inner.var_names(out),
            UExpr::Sum { body, .. } => body.var_names(out),
            atom => {
                for var in atom.atom_vars() {
                    if let Some(name) = var.name() {
                        out.insert(name.to_string());
                    }
                }
            }
        }
    }

    /// Factors of a left-deep chain of `kind` (`Mul` or `Add`), leftmost first.
    ///
    /// Only the left spine is followed: a right child of the same connective
    /// is reported as a single factor.
    pub fn chain_factors(&self, kind: Kind) -> Vec<&UExpr> {
        let mut factors = Vec::new();
        let mut cur = self;
        loop {
            match (cur, kind) {
                (UExpr::Mul(l, r), Kind::Mul) | (UExpr::Add(l, r), Kind::Add) => {
                    factors.push(r.as_ref());
                    cur = l;
                }
                _ => {
                    factors.push(cur);
                    break;
                }
            }
        }
        factors.reverse();
        factors
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Var]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for UExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UExpr::Table { name, var } => write!(f, "{name}({var})"),
            UExpr::Pred { name, args } => {
                write!(f, "[{name}(")?;
                write_args(f, args)?;
                write!(f, ")]")
            }
            UExpr::EqPred { left, right } => write!(f, "[{left} = {right}]"),
            UExpr::Add(l, r) => write!(f, "{l} + {r}"),
            UExpr::Mul(l, r) => {
                for (i, side) in [l, r].into_iter().enumerate() {
                    if i > 0 {
                        write!(f, " * ")?;
                    }
                    if side.kind() == Kind::Add {
                        write!(f, "({side})")?;
                    } else {
                        write!(f, "{side}")?;
                    }
                }
                Ok(())
            }
            UExpr::Not(inner) => write!(f, "not({inner})"),
            UExpr::Squash(inner) => write!(f, "||{inner}||"),
            UExpr::Sum { vars, body } => {
                write!(f, "Sum{{")?;
                write_args(f, vars)?;
                write!(f, "}}({body})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Var {
        Var::base("x")
    }

    #[test]
    fn kinds_have_fixed_arity() {
        assert_eq!(Kind::Table.arity(), 0);
        assert_eq!(Kind::Sum.arity(), 1);
        assert_eq!(Kind::Mul.arity(), 2);
        assert!(Kind::EqPred.is_pred());
        assert!(!Kind::Table.is_pred());
    }

    #[test]
    fn sum_over_nothing_is_the_body() {
        let r = UExpr::table("R", x());
        assert_eq!(UExpr::sum(vec![], r.clone()), r);
    }

    #[test]
    fn product_is_left_deep() {
        let p = UExpr::product(vec![
            UExpr::table("A", x()),
            UExpr::table("B", x()),
            UExpr::table("C", x()),
        ])
        .unwrap();
        assert!(matches!(p.child(0), Some(UExpr::Mul(..))));
        assert!(matches!(p.child(1), Some(UExpr::Table { .. })));
        assert_eq!(p.chain_factors(Kind::Mul).len(), 3);
        assert_eq!(p.to_string(), "A(x) * B(x) * C(x)");
    }

    #[test]
    fn free_vars_exclude_bound_ones() {
        let y = Var::base("y");
        let e = UExpr::sum(
            vec![x()],
            UExpr::mul(
                UExpr::table("R", x()),
                UExpr::eq_pred(x().proj("a"), y.proj("b")),
            ),
        );
        let free = e.free_vars();
        assert_eq!(free.len(), 1);
        assert!(free.contains(&y));
        assert_eq!(e.to_string(), "Sum{x}(R(x) * [x.a = y.b])");
    }

    #[test]
    fn display_parenthesizes_sums_inside_products() {
        let e = UExpr::mul(
            UExpr::add(UExpr::table("A", x()), UExpr::table("B", x())),
            UExpr::not(UExpr::table("C", x())),
        );
        assert_eq!(e.to_string(), "(A(x) + B(x)) * not(C(x))");
    }
}
