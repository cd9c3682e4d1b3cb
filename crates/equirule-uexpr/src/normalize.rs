//! Five-pass rewriting of U-expressions into sum-of-products normal form.
//!
//! Each pass is an ordered list of [`Rule`]s run to a fixed point: the term is
//! scanned innermost-first (post-order), the first rule that fires anywhere is
//! applied at its position, and the scan restarts from the root. This is the
//! simplest strategy with fixed-point semantics; the step limit guards against
//! a rule set that fails to terminate.
//!
//! Pass summary:
//! - pass 0: local semiring laws (squash/negation simplification, distribution, associativity)
//! - pass 1: hoist and merge summations
//! - pass 2: merge squash factors of a product
//! - pass 3: merge negation factors of a product
//! - pass 4: restore SPNF shape after passes 2 and 3

use crate::expr::{Kind, UExpr};
use crate::normal_form::{as_disjunction, Disjunction, NormalFormError};
use crate::var::Var;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prefix of the canonical names given to bound variables after normalization.
pub const NORMALIZED_VAR_PREFIX: &str = "x";

const FRESH_VAR_PREFIX: &str = "u";
const MAX_REWRITE_STEPS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rule {
    /// `||(||x||)|| → ||x||`, `not(||x||) → not(x)`, `||a * ||x|||| → ||a * x||`
    ElimSquash,
    /// `Sum{v}(x) * y → Sum{v}(x * y)`
    SumMul,
    /// `Sum{v}(x + y) → Sum{v}(x) + Sum{v}(y)`
    SumAdd,
    /// `not(x + y) → not(x) * not(y)`
    NotAdd,
    /// `not(x * y) → ||not(x) + not(y)||`
    NotMul,
    /// `not(not(x)) → ||x||`
    NotNot,
    /// `||not(x)|| → not(x)`
    SquashNot,
    /// `x * (y * z) → (x * y) * z`
    MulAssoc,
    /// `x + (y + z) → (x + y) + z`
    AddAssoc,
    /// `(x + y) * z → x * z + y * z` and its mirror
    Distribution,
    /// `x * Sum{v}(y) → Sum{v}(x * y)`
    MulSum,
    /// `Sum{v}(Sum{w}(x)) → Sum{v, w}(x)`
    SumSum,
    /// moves a squash factor right, past atoms
    SquashCommunity,
    /// `||x|| * ||y|| → ||x * y||` within one product
    MulSquash,
    /// moves a negation factor right, past anything but negations
    NotCommunity,
    /// `not(x) * not(y) → not(x + y)` within one product
    MulNot,
}

pub const PASS0: &[Rule] = &[
    Rule::ElimSquash,
    Rule::SumMul,
    Rule::SumAdd,
    Rule::NotAdd,
    Rule::NotMul,
    Rule::NotNot,
    Rule::SquashNot,
    Rule::MulAssoc,
    Rule::AddAssoc,
    Rule::Distribution,
];
pub const PASS1: &[Rule] = &[Rule::MulSum, Rule::SumSum];
pub const PASS2: &[Rule] = &[
    Rule::SquashCommunity,
    Rule::MulAssoc,
    Rule::AddAssoc,
    Rule::MulSquash,
];
pub const PASS3: &[Rule] = &[
    Rule::NotCommunity,
    Rule::MulAssoc,
    Rule::AddAssoc,
    Rule::MulNot,
];
// Merging squashes/negations can put two normalized products side by side
// under a squash (or leave a lone negation inside one), so the merge and
// squash rules run again with distribution.
pub const PASS4: &[Rule] = &[
    Rule::ElimSquash,
    Rule::SquashNot,
    Rule::MulSum,
    Rule::SumMul,
    Rule::SumSum,
    Rule::SumAdd,
    Rule::MulAssoc,
    Rule::AddAssoc,
    Rule::Distribution,
    Rule::SquashCommunity,
    Rule::MulSquash,
    Rule::NotCommunity,
    Rule::MulNot,
];

pub const PASSES: [&[Rule]; 5] = [PASS0, PASS1, PASS2, PASS3, PASS4];

/// One applied rewrite: `rule` fired at `pos` during `pass`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteStep {
    pub pass: usize,
    pub pos: Vec<u32>,
    pub rule: Rule,
}

// ============================================================================
// Entry points
// ============================================================================

/// Normalize `expr` into SPNF, with canonically renamed bound variables.
pub fn normalize(expr: &UExpr) -> Result<Disjunction, NormalFormError> {
    let rewritten = transform(expr, None)?;
    Ok(rename_bound_vars(&as_disjunction(&rewritten)?))
}

/// Like [`normalize`], also returning every rewrite step in application order.
pub fn normalize_with_trace(
    expr: &UExpr,
) -> Result<(Disjunction, Vec<RewriteStep>), NormalFormError> {
    let mut trace = Vec::new();
    let rewritten = transform(expr, Some(&mut trace))?;
    Ok((rename_bound_vars(&as_disjunction(&rewritten)?), trace))
}

/// Run the five passes and return the rewritten term (not yet read into SPNF).
pub fn transform(
    expr: &UExpr,
    mut trace: Option<&mut Vec<RewriteStep>>,
) -> Result<UExpr, NormalFormError> {
    let mut fresh = FreshVars::for_expr(expr);
    let mut current = expr.clone();
    for (pass, rules) in PASSES.iter().enumerate() {
        current = run_pass(current, pass, rules, &mut fresh, trace.as_deref_mut())?;
    }
    Ok(current)
}

fn run_pass(
    mut expr: UExpr,
    pass: usize,
    rules: &[Rule],
    fresh: &mut FreshVars,
    mut trace: Option<&mut Vec<RewriteStep>>,
) -> Result<UExpr, NormalFormError> {
    for _ in 0..MAX_REWRITE_STEPS {
        let Some((pos, rule, replacement)) = find_first_rewrite(&expr, rules, fresh) else {
            return Ok(expr);
        };
        tracing::trace!(pass, ?rule, ?pos, "rewrite");
        expr = replace_at(expr, &pos, replacement);
        if let Some(trace) = trace.as_deref_mut() {
            trace.push(RewriteStep { pass, pos, rule });
        }
    }
    Err(NormalFormError::StepLimit {
        pass,
        steps: MAX_REWRITE_STEPS,
    })
}

/// Apply `rule` at the root of `expr`, if it fires there.
pub fn apply_rule(rule: Rule, expr: &UExpr) -> Option<UExpr> {
    rewrite(rule, expr, &mut FreshVars::for_expr(expr))
}

/// Apply `rule` at position `pos`, rebuilding only the path to it.
pub fn apply_at(expr: &UExpr, pos: &[u32], rule: Rule) -> Option<UExpr> {
    let target = subterm_at(expr, pos)?;
    let replacement = rewrite(rule, target, &mut FreshVars::for_expr(expr))?;
    Some(replace_at(expr.clone(), pos, replacement))
}

/// Replay recorded steps on `expr`.
pub fn apply_trace(expr: &UExpr, steps: &[RewriteStep]) -> Result<UExpr, String> {
    let mut fresh = FreshVars::for_expr(expr);
    let mut current = expr.clone();
    for step in steps {
        let target = subterm_at(&current, &step.pos)
            .ok_or_else(|| format!("invalid rewrite position {:?}", step.pos))?;
        let replacement = rewrite(step.rule, target, &mut fresh)
            .ok_or_else(|| format!("{:?} does not apply at {:?}", step.rule, step.pos))?;
        current = replace_at(current, &step.pos, replacement);
    }
    Ok(current)
}

// ============================================================================
// Positions
// ============================================================================

fn find_first_rewrite(
    expr: &UExpr,
    rules: &[Rule],
    fresh: &mut FreshVars,
) -> Option<(Vec<u32>, Rule, UExpr)> {
    for i in 0..expr.kind().arity() {
        if let Some(child) = expr.child(i) {
            if let Some((mut pos, rule, replacement)) = find_first_rewrite(child, rules, fresh) {
                pos.insert(0, i as u32);
                return Some((pos, rule, replacement));
            }
        }
    }
    rules
        .iter()
        .find_map(|&rule| rewrite(rule, expr, fresh).map(|replacement| (Vec::new(), rule, replacement)))
}

pub fn subterm_at<'a>(expr: &'a UExpr, pos: &[u32]) -> Option<&'a UExpr> {
    match pos.split_first() {
        None => Some(expr),
        Some((&i, rest)) => subterm_at(expr.child(i as usize)?, rest),
    }
}

fn replace_at(expr: UExpr, pos: &[u32], replacement: UExpr) -> UExpr {
    let Some((&head, rest)) = pos.split_first() else {
        return replacement;
    };
    match (expr, head) {
        (UExpr::Add(l, r), 0) => UExpr::Add(Box::new(replace_at(*l, rest, replacement)), r),
        (UExpr::Add(l, r), 1) => UExpr::Add(l, Box::new(replace_at(*r, rest, replacement))),
        (UExpr::Mul(l, r), 0) => UExpr::Mul(Box::new(replace_at(*l, rest, replacement)), r),
        (UExpr::Mul(l, r), 1) => UExpr::Mul(l, Box::new(replace_at(*r, rest, replacement))),
        (UExpr::Not(inner), 0) => UExpr::Not(Box::new(replace_at(*inner, rest, replacement))),
        (UExpr::Squash(inner), 0) => {
            UExpr::Squash(Box::new(replace_at(*inner, rest, replacement)))
        }
        (UExpr::Sum { vars, body }, 0) => UExpr::Sum {
            vars,
            body: Box::new(replace_at(*body, rest, replacement)),
        },
        // positions come from `find_first_rewrite` on the same term
        (other, _) => other,
    }
}

// ============================================================================
// Rules
// ============================================================================

struct FreshVars {
    taken: BTreeSet<String>,
    next: usize,
}

impl FreshVars {
    fn for_expr(expr: &UExpr) -> Self {
        let mut taken = BTreeSet::new();
        expr.var_names(&mut taken);
        FreshVars { taken, next: 0 }
    }

    fn var(&mut self) -> Var {
        loop {
            let name = format!("{FRESH_VAR_PREFIX}{}", self.next);
            self.next += 1;
            if self.taken.insert(name.clone()) {
                return Var::Base(name);
            }
        }
    }
}

/// Rename every binder in `vars` that `clashes` reports, inside `body` too.
fn rename_clashing(
    vars: &[Var],
    body: &UExpr,
    clashes: impl Fn(&Var) -> bool,
    fresh: &mut FreshVars,
) -> (Vec<Var>, UExpr) {
    let mut vars = vars.to_vec();
    let mut body = body.clone();
    for v in vars.iter_mut() {
        if clashes(v) {
            let renamed = fresh.var();
            body = body.subst_var(v, &renamed);
            *v = renamed;
        }
    }
    (vars, body)
}

fn last_factor(expr: &UExpr) -> &UExpr {
    match expr {
        UExpr::Mul(_, r) => r,
        other => other,
    }
}

fn swap_last(left: &UExpr, right: &UExpr) -> UExpr {
    match left {
        UExpr::Mul(head, last) => {
            UExpr::mul(UExpr::mul((**head).clone(), right.clone()), (**last).clone())
        }
        single => UExpr::mul(right.clone(), single.clone()),
    }
}

/// Rebuild a product chain with all factors of `kind` merged into one trailing factor.
fn merge_factors(expr: &UExpr, kind: Kind) -> Option<UExpr> {
    let factors = expr.chain_factors(Kind::Mul);
    let (merged, kept): (Vec<&UExpr>, Vec<&UExpr>) =
        factors.into_iter().partition(|f| f.kind() == kind);
    if merged.len() < 2 {
        return None;
    }
    let bodies = merged.into_iter().filter_map(|f| f.child(0).cloned());
    let combined = match kind {
        Kind::Squash => UExpr::squash(UExpr::product(bodies)?),
        Kind::Not => UExpr::not(UExpr::sum_of(bodies)?),
        _ => return None,
    };
    UExpr::product(kept.into_iter().cloned().chain(std::iter::once(combined)))
}

fn rewrite(rule: Rule, expr: &UExpr, fresh: &mut FreshVars) -> Option<UExpr> {
    match rule {
        Rule::ElimSquash => match expr {
            UExpr::Squash(inner) => match inner.as_ref() {
                UExpr::Squash(x) => Some(UExpr::squash((**x).clone())),
                UExpr::Mul(..) => {
                    let factors = inner.chain_factors(Kind::Mul);
                    if !factors.iter().any(|f| f.kind() == Kind::Squash) {
                        return None;
                    }
                    let unwrapped = factors.into_iter().map(|f| match f {
                        UExpr::Squash(x) => (**x).clone(),
                        other => other.clone(),
                    });
                    Some(UExpr::squash(UExpr::product(unwrapped)?))
                }
                _ => None,
            },
            UExpr::Not(inner) => match inner.as_ref() {
                UExpr::Squash(x) => Some(UExpr::not((**x).clone())),
                _ => None,
            },
            _ => None,
        },

        Rule::SumMul => match expr {
            UExpr::Mul(l, r) => match l.as_ref() {
                UExpr::Sum { vars, body } => {
                    let (vars, body) = rename_clashing(vars, body, |v| r.uses(v), fresh);
                    Some(UExpr::sum(vars, UExpr::mul(body, (**r).clone())))
                }
                _ => None,
            },
            _ => None,
        },

        Rule::MulSum => match expr {
            UExpr::Mul(l, r) => match r.as_ref() {
                UExpr::Sum { vars, body } => {
                    let (vars, body) = rename_clashing(vars, body, |v| l.uses(v), fresh);
                    Some(UExpr::sum(vars, UExpr::mul((**l).clone(), body)))
                }
                _ => None,
            },
            _ => None,
        },

        Rule::SumAdd => match expr {
            UExpr::Sum { vars, body } => match body.as_ref() {
                UExpr::Add(a, b) => Some(UExpr::add(
                    UExpr::sum(vars.clone(), (**a).clone()),
                    UExpr::sum(vars.clone(), (**b).clone()),
                )),
                _ => None,
            },
            _ => None,
        },

        Rule::SumSum => match expr {
            UExpr::Sum { vars, body } => match body.as_ref() {
                UExpr::Sum {
                    vars: inner_vars,
                    body: inner_body,
                } => {
                    let (inner_vars, inner_body) =
                        rename_clashing(inner_vars, inner_body, |v| vars.contains(v), fresh);
                    let mut merged = vars.clone();
                    merged.extend(inner_vars);
                    Some(UExpr::sum(merged, inner_body))
                }
                _ => None,
            },
            _ => None,
        },

        Rule::NotAdd => match expr {
            UExpr::Not(inner) => match inner.as_ref() {
                UExpr::Add(a, b) => Some(UExpr::mul(
                    UExpr::not((**a).clone()),
                    UExpr::not((**b).clone()),
                )),
                _ => None,
            },
            _ => None,
        },

        Rule::NotMul => match expr {
            UExpr::Not(inner) => match inner.as_ref() {
                UExpr::Mul(a, b) => Some(UExpr::squash(UExpr::add(
                    UExpr::not((**a).clone()),
                    UExpr::not((**b).clone()),
                ))),
                _ => None,
            },
            _ => None,
        },

        Rule::NotNot => match expr {
            UExpr::Not(inner) => match inner.as_ref() {
                UExpr::Not(x) => Some(UExpr::squash((**x).clone())),
                _ => None,
            },
            _ => None,
        },

        Rule::SquashNot => match expr {
            UExpr::Squash(inner) if inner.kind() == Kind::Not => Some((**inner).clone()),
            _ => None,
        },

        Rule::MulAssoc => match expr {
            UExpr::Mul(a, r) => match r.as_ref() {
                UExpr::Mul(b, c) => Some(UExpr::mul(
                    UExpr::mul((**a).clone(), (**b).clone()),
                    (**c).clone(),
                )),
                _ => None,
            },
            _ => None,
        },

        Rule::AddAssoc => match expr {
            UExpr::Add(a, r) => match r.as_ref() {
                UExpr::Add(b, c) => Some(UExpr::add(
                    UExpr::add((**a).clone(), (**b).clone()),
                    (**c).clone(),
                )),
                _ => None,
            },
            _ => None,
        },

        Rule::Distribution => match expr {
            UExpr::Mul(l, r) => match (l.as_ref(), r.as_ref()) {
                (UExpr::Add(a, b), c) => Some(UExpr::add(
                    UExpr::mul((**a).clone(), c.clone()),
                    UExpr::mul((**b).clone(), c.clone()),
                )),
                (a, UExpr::Add(b, c)) => Some(UExpr::add(
                    UExpr::mul(a.clone(), (**b).clone()),
                    UExpr::mul(a.clone(), (**c).clone()),
                )),
                _ => None,
            },
            _ => None,
        },

        Rule::SquashCommunity => match expr {
            UExpr::Mul(l, r)
                if last_factor(l).kind() == Kind::Squash
                    && !matches!(r.kind(), Kind::Squash | Kind::Not | Kind::Mul) =>
            {
                Some(swap_last(l, r))
            }
            _ => None,
        },

        Rule::NotCommunity => match expr {
            UExpr::Mul(l, r)
                if last_factor(l).kind() == Kind::Not
                    && !matches!(r.kind(), Kind::Not | Kind::Mul) =>
            {
                Some(swap_last(l, r))
            }
            _ => None,
        },

        Rule::MulSquash => match expr {
            UExpr::Mul(..) => merge_factors(expr, Kind::Squash),
            _ => None,
        },

        Rule::MulNot => match expr {
            UExpr::Mul(..) => merge_factors(expr, Kind::Not),
            _ => None,
        },
    }
}

// ============================================================================
// Canonical renaming
// ============================================================================

/// Rename bound variables to `x0, x1, ...` in binding order, skipping free names.
pub fn rename_bound_vars(d: &Disjunction) -> Disjunction {
    let mut free_names = BTreeSet::new();
    for var in d.to_expr().free_vars() {
        if let Some(name) = var.name() {
            free_names.insert(name.to_string());
        }
    }

    let mut out = d.clone();
    let mut tmp = 0usize;
    rename_in(&mut out, &mut || {
        tmp += 1;
        Var::Base(format!("#{tmp}"))
    });

    let mut next = 0usize;
    rename_in(&mut out, &mut || loop {
        let name = format!("{NORMALIZED_VAR_PREFIX}{next}");
        next += 1;
        if !free_names.contains(&name) {
            return Var::Base(name);
        }
    });
    out
}

fn rename_in(d: &mut Disjunction, next: &mut dyn FnMut() -> Var) {
    for c in d.conjunctions_mut() {
        let olds = c.vars().to_vec();
        for old in olds {
            let new = next();
            c.subst(&old, &new);
        }
        if let Some(sq) = c.squash_mut() {
            rename_in(sq, next);
        }
        if let Some(neg) = c.negation_mut() {
            rename_in(neg, next);
        }
    }
}
