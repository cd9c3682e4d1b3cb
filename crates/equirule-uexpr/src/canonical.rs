//! Schema-aware canonicalization of normalized disjunctions.
//!
//! Integrity facts (unique keys, foreign keys, NOT NULL columns) let two
//! queries that differ syntactically reach the same SPNF:
//! - [`apply_foreign_key`] runs on the raw term, before normalization
//! - [`apply_constants`], [`apply_minimization`], [`apply_not_null`] and
//!   [`apply_unique_key`] run on the normalized disjunction
//!
//! [`canonicalize`] chains the post-normalization steps and renames bound
//! variables canonically.

use crate::congruence::{tuple_congruence, Congruence};
use crate::expr::{UExpr, NOT_NULL_PRED};
use crate::normal_form::{Conjunction, Disjunction, NormalFormError};
use crate::normalize::{normalize, rename_bound_vars};
use crate::var::Var;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

const FK_VAR_PREFIX: &str = "f";
const MAX_UK_ROUNDS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanonicalizeError {
    #[error(transparent)]
    NormalForm(#[from] NormalFormError),

    #[error("{rule} invariant violated: {detail}")]
    Invariant { rule: &'static str, detail: String },
}

// ============================================================================
// Schema facts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueKey {
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotNullColumn {
    pub table: String,
    pub column: String,
}

/// Integrity facts about the relations a term mentions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFacts {
    pub unique_keys: Vec<UniqueKey>,
    pub foreign_keys: Vec<ForeignKey>,
    pub not_null: Vec<NotNullColumn>,
}

impl SchemaFacts {
    pub fn is_empty(&self) -> bool {
        self.unique_keys.is_empty() && self.foreign_keys.is_empty() && self.not_null.is_empty()
    }

    pub fn unique_keys_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a UniqueKey> {
        self.unique_keys.iter().filter(move |uk| uk.table == table)
    }

    pub fn foreign_keys_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ForeignKey> {
        self.foreign_keys.iter().filter(move |fk| fk.table == table)
    }

    /// Whether some unique key of `table` is contained in `columns`.
    pub fn is_unique(&self, table: &str, columns: &[String]) -> bool {
        self.unique_keys_of(table)
            .any(|uk| uk.columns.iter().all(|c| columns.contains(c)))
    }

    pub fn is_not_null(&self, table: &str, column: &str) -> bool {
        self.not_null
            .iter()
            .any(|nn| nn.table == table && nn.column == column)
    }
}

/// Which tuples count as constants for Uk2.
///
/// A `Var` is constant when it is a literal, one of the explicitly listed
/// tuples (the free variables of a translation), or a projection/function
/// whose arguments are all constant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantTuples {
    vars: BTreeSet<Var>,
}

impl ConstantTuples {
    pub fn new<I: IntoIterator<Item = Var>>(vars: I) -> Self {
        ConstantTuples {
            vars: vars.into_iter().collect(),
        }
    }

    pub fn vars(&self) -> &BTreeSet<Var> {
        &self.vars
    }

    pub fn is_constant(&self, var: &Var) -> bool {
        match var {
            Var::Const(_) => true,
            Var::Base(_) => self.vars.contains(var),
            Var::Proj { base, .. } => self.is_constant(base),
            Var::Func { args, .. } => args.iter().all(|a| self.is_constant(a)),
        }
    }
}

// ============================================================================
// Foreign keys
// ============================================================================

/// Conjoin every `S(t)` that has a foreign key `S.k → R.k'` with the
/// existential `‖Σ{t'}(R(t') * [t.k = t'.k'])‖`.
///
/// Only keys over NOT NULL columns are used: a NULL key references nothing.
/// When `R.k'` is unique the sum is already 0/1 and is left unsquashed.
pub fn apply_foreign_key(expr: &UExpr, facts: &SchemaFacts) -> UExpr {
    if facts.foreign_keys.is_empty() {
        return expr.clone();
    }
    let mut taken = BTreeSet::new();
    expr.var_names(&mut taken);
    let mut next = 0usize;
    let mut fresh = || loop {
        let name = format!("{FK_VAR_PREFIX}{next}");
        next += 1;
        if taken.insert(name.clone()) {
            return Var::Base(name);
        }
    };
    expand_foreign_keys(expr, facts, &mut fresh)
}

fn expand_foreign_keys(expr: &UExpr, facts: &SchemaFacts, fresh: &mut dyn FnMut() -> Var) -> UExpr {
    match expr {
        UExpr::Table { name, var } => {
            let mut out = expr.clone();
            for fk in facts.foreign_keys_of(name) {
                if fk.columns.is_empty()
                    || fk.columns.len() != fk.ref_columns.len()
                    || !fk.columns.iter().all(|c| facts.is_not_null(name, c))
                {
                    continue;
                }
                let referenced = fresh();
                let eqs = fk.columns.iter().zip(&fk.ref_columns).map(|(c, rc)| {
                    UExpr::eq_pred(var.proj(c.clone()), referenced.proj(rc.clone()))
                });
                let body = std::iter::once(UExpr::table(fk.ref_table.clone(), referenced.clone()))
                    .chain(eqs);
                let Some(body) = UExpr::product(body) else {
                    continue;
                };
                let exists = UExpr::sum(vec![referenced], body);
                let exists = if facts.is_unique(&fk.ref_table, &fk.ref_columns) {
                    exists
                } else {
                    UExpr::squash(exists)
                };
                tracing::trace!(table = %name, references = %fk.ref_table, "expand foreign key");
                out = UExpr::mul(out, exists);
            }
            out
        }
        UExpr::Pred { .. } | UExpr::EqPred { .. } => expr.clone(),
        UExpr::Add(l, r) => UExpr::add(
            expand_foreign_keys(l, facts, fresh),
            expand_foreign_keys(r, facts, fresh),
        ),
        UExpr::Mul(l, r) => UExpr::mul(
            expand_foreign_keys(l, facts, fresh),
            expand_foreign_keys(r, facts, fresh),
        ),
        UExpr::Not(inner) => UExpr::not(expand_foreign_keys(inner, facts, fresh)),
        UExpr::Squash(inner) => UExpr::squash(expand_foreign_keys(inner, facts, fresh)),
        UExpr::Sum { vars, body } => {
            UExpr::sum(vars.clone(), expand_foreign_keys(body, facts, fresh))
        }
    }
}

/// [`apply_foreign_key`] on an already normalized disjunction, re-normalized.
pub fn apply_foreign_key_normalized(
    d: &Disjunction,
    facts: &SchemaFacts,
) -> Result<Disjunction, NormalFormError> {
    normalize(&apply_foreign_key(&d.to_expr(), facts))
}

// ============================================================================
// NOT NULL
// ============================================================================

/// Drop `NotNull(t.c)` where a table atom `R(t)` in scope has `R.c` NOT NULL.
pub fn apply_not_null(mut d: Disjunction, facts: &SchemaFacts) -> Disjunction {
    if !facts.not_null.is_empty() {
        not_null_in(&mut d, facts, &[]);
    }
    d
}

fn not_null_in(d: &mut Disjunction, facts: &SchemaFacts, outer: &[(Var, String)]) {
    for c in d.conjunctions_mut() {
        let mut scope: Vec<(Var, String)> = outer
            .iter()
            .filter(|(v, _)| !c.vars().contains(v))
            .cloned()
            .collect();
        for t in c.tables() {
            if let UExpr::Table { name, var } = t {
                scope.push((var.clone(), name.clone()));
            }
        }

        let implied = |p: &UExpr| match p {
            UExpr::Pred { name, args } if name == NOT_NULL_PRED && args.len() == 1 => {
                match &args[0] {
                    Var::Proj { base, attr } => scope
                        .iter()
                        .any(|(v, table)| v == base.as_ref() && facts.is_not_null(table, attr)),
                    _ => false,
                }
            }
            _ => false,
        };
        let before = c.predicates().len();
        let kept: Vec<UExpr> = c.predicates().iter().filter(|p| !implied(p)).cloned().collect();
        if kept.len() != before {
            let becomes_empty =
                kept.is_empty() && c.tables().is_empty() && c.squash().is_none() && c.negation().is_none();
            *c.predicates_mut() = if becomes_empty { vec![UExpr::unit()] } else { kept };
        }

        if let Some(sq) = c.squash_mut() {
            not_null_in(sq, facts, &scope);
        }
        if let Some(neg) = c.negation_mut() {
            not_null_in(neg, facts, &scope);
        }
    }
}

// ============================================================================
// Constants
// ============================================================================

/// `Σ{x}([x = c] * f(x)) → f(c)` for bound `x` congruent to a constant tuple;
/// reflexive equalities are dropped afterwards.
pub fn apply_constants(mut d: Disjunction, consts: &ConstantTuples) -> Disjunction {
    constants_in(&mut d, consts);
    d
}

fn constants_in(d: &mut Disjunction, consts: &ConstantTuples) {
    for c in d.conjunctions_mut() {
        loop {
            let cong = tuple_congruence(c.predicates());
            let found = c.vars().iter().find_map(|v| {
                cong.class_of(v)
                    .into_iter()
                    .find(|m| m != v && !m.uses(v) && consts.is_constant(m))
                    .map(|m| (v.clone(), m))
            });
            let Some((bound, constant)) = found else {
                break;
            };
            c.vars_mut().retain(|v| v != &bound);
            c.subst(&bound, &constant);
        }
        drop_trivial_predicates(c);

        if let Some(sq) = c.squash_mut() {
            constants_in(sq, consts);
        }
        if let Some(neg) = c.negation_mut() {
            constants_in(neg, consts);
        }
    }
}

// ============================================================================
// Intermediate variables
// ============================================================================

/// `Σ{x,y}([y = e] * f(y)) → Σ{x}(f(e))` for a bound `y` that no table atom
/// ranges over and some congruent `e` does not mention.
pub fn apply_minimization(mut d: Disjunction) -> Disjunction {
    minimize_in(&mut d);
    d
}

fn minimize_in(d: &mut Disjunction) {
    for c in d.conjunctions_mut() {
        loop {
            let cong = tuple_congruence(c.predicates());
            let found = c
                .vars()
                .iter()
                .filter(|v| !ranges_over(c, v))
                .find_map(|v| {
                    cong.class_of(v)
                        .into_iter()
                        .find(|m| m != v && !m.uses(v))
                        .map(|m| (v.clone(), m))
                });
            let Some((bound, replacement)) = found else {
                break;
            };
            tracing::trace!(removed = %bound, replacement = %replacement, "eliminate intermediate variable");
            c.vars_mut().retain(|v| v != &bound);
            c.subst(&bound, &replacement);
        }
        drop_trivial_predicates(c);

        if let Some(sq) = c.squash_mut() {
            minimize_in(sq);
        }
        if let Some(neg) = c.negation_mut() {
            minimize_in(neg);
        }
    }
}

/// Whether a table atom of `c`, or of a disjunction nested in it, is over `var`.
fn ranges_over(c: &Conjunction, var: &Var) -> bool {
    let nested = |d: Option<&Disjunction>| {
        d.is_some_and(|d| {
            d.iter()
                .any(|inner| !inner.vars().contains(var) && ranges_over(inner, var))
        })
    };
    c.tables().iter().any(|t| t.uses(var)) || nested(c.squash()) || nested(c.negation())
}

/// Remove reflexive and repeated predicates, keeping at least one factor.
fn drop_trivial_predicates(c: &mut Conjunction) {
    let mut kept: Vec<UExpr> = Vec::with_capacity(c.predicates().len());
    for p in c.predicates() {
        let reflexive = matches!(p, UExpr::EqPred { left, right } if left == right);
        if !reflexive && !kept.contains(p) {
            kept.push(p.clone());
        }
    }
    let nothing_else = c.tables().is_empty() && c.squash().is_none() && c.negation().is_none();
    if kept.is_empty() && nothing_else {
        kept.push(UExpr::unit());
    }
    *c.predicates_mut() = kept;
}

// ============================================================================
// Unique keys
// ============================================================================

fn key_congruent(cong: &Congruence<Var>, a: &Var, b: &Var, column: &str) -> bool {
    cong.is_eq(a, b) || cong.is_eq(&a.proj(column), &b.proj(column))
}

fn is_constant_in(cong: &Congruence<Var>, consts: &ConstantTuples, var: &Var) -> bool {
    cong.class_of(var).iter().any(|m| consts.is_constant(m))
}

/// Uk1 and Uk2 over every conjunction, recursing into squash and negation.
pub fn apply_unique_key(
    mut d: Disjunction,
    facts: &SchemaFacts,
    consts: &ConstantTuples,
) -> Result<Disjunction, CanonicalizeError> {
    if facts.unique_keys.is_empty() {
        return Ok(d);
    }
    unique_key_in(&mut d, facts, consts, true)?;
    Ok(d)
}

fn unique_key_in(
    d: &mut Disjunction,
    facts: &SchemaFacts,
    consts: &ConstantTuples,
    top_level: bool,
) -> Result<(), CanonicalizeError> {
    for c in d.conjunctions_mut() {
        merge_keyed_atoms(c, facts)?;
        if let Some(sq) = c.squash_mut() {
            unique_key_in(sq, facts, consts, false)?;
        }
        if let Some(neg) = c.negation_mut() {
            unique_key_in(neg, facts, consts, false)?;
        }
        // inside a squash or negation only truth matters, multiplicity is already gone
        if top_level && is_keyed_by_constant(c, facts, consts) {
            *c = squash_conjunction(c)?;
        }
    }
    Ok(())
}

/// Uk1: `R(t0) * R(t1) * [t0.k = t1.k]` with `R.k` unique becomes `R(t0)`.
fn merge_keyed_atoms(c: &mut Conjunction, facts: &SchemaFacts) -> Result<(), CanonicalizeError> {
    for _ in 0..MAX_UK_ROUNDS {
        let Some((keep, drop_at, gone)) = find_redundant_atom(c, facts) else {
            return Ok(());
        };
        tracing::trace!(keep = %keep, removed = %gone, "merge unique-keyed atoms");
        c.tables_mut().remove(drop_at);
        c.vars_mut().retain(|v| v != &gone);
        c.subst(&gone, &keep);
        drop_trivial_predicates(c);
    }
    Err(CanonicalizeError::Invariant {
        rule: "Uk1",
        detail: format!("no fixed point after {MAX_UK_ROUNDS} rounds: {c}"),
    })
}

/// `(surviving var, index of the atom to remove, its var)`
fn find_redundant_atom(c: &Conjunction, facts: &SchemaFacts) -> Option<(Var, usize, Var)> {
    let cong = tuple_congruence(c.predicates());
    let tables = c.tables();
    for (i, ti) in tables.iter().enumerate() {
        let UExpr::Table { name, var: vi } = ti else {
            continue;
        };
        for (j, tj) in tables.iter().enumerate().skip(i + 1) {
            let UExpr::Table { name: name_j, var: vj } = tj else {
                continue;
            };
            if name != name_j || !vi.is_base() || !vj.is_base() {
                continue;
            }
            let keyed = facts.unique_keys_of(name).any(|uk| {
                !uk.columns.is_empty()
                    && uk.columns.iter().all(|col| key_congruent(&cong, vi, vj, col))
            });
            if !keyed {
                continue;
            }
            if c.vars().contains(vj) {
                return Some((vi.clone(), j, vj.clone()));
            }
            if c.vars().contains(vi) {
                return Some((vj.clone(), i, vi.clone()));
            }
        }
    }
    None
}

/// Uk2 precondition: one relation, every atom bound and keyed by a constant.
fn is_keyed_by_constant(c: &Conjunction, facts: &SchemaFacts, consts: &ConstantTuples) -> bool {
    let mut names = c.tables().iter().filter_map(|t| match t {
        UExpr::Table { name, .. } => Some(name.as_str()),
        _ => None,
    });
    let Some(relation) = names.next() else {
        return false;
    };
    if names.any(|n| n != relation) {
        return false;
    }

    let table_vars: Vec<&Var> = c
        .tables()
        .iter()
        .filter_map(|t| match t {
            UExpr::Table { var, .. } => Some(var),
            _ => None,
        })
        .collect();
    if !table_vars.iter().all(|v| v.is_base() && c.vars().contains(v)) {
        return false;
    }
    if !c.vars().iter().all(|v| table_vars.contains(&v)) {
        return false;
    }

    let cong = tuple_congruence(c.predicates());
    facts.unique_keys_of(relation).any(|uk| {
        !uk.columns.is_empty()
            && table_vars.iter().all(|t| {
                uk.columns
                    .iter()
                    .all(|col| is_constant_in(&cong, consts, &t.proj(col.clone())))
            })
    })
}

fn squash_conjunction(c: &Conjunction) -> Result<Conjunction, CanonicalizeError> {
    let squashed = normalize(&UExpr::squash(c.to_expr()))?;
    if squashed.len() != 1 {
        return Err(CanonicalizeError::Invariant {
            rule: "Uk2",
            detail: format!(
                "squashing `{c}` gave {} conjunctions instead of one",
                squashed.len()
            ),
        });
    }
    let mut conjunctions = squashed.conjunctions().to_vec();
    Ok(conjunctions.remove(0))
}

// ============================================================================
// Pipeline
// ============================================================================

/// constants → intermediate variables → NOT NULL → unique keys → canonical renaming.
pub fn canonicalize(
    d: Disjunction,
    facts: &SchemaFacts,
    consts: &ConstantTuples,
) -> Result<Disjunction, CanonicalizeError> {
    let d = apply_constants(d, consts);
    let d = apply_minimization(d);
    let d = apply_not_null(d, facts);
    let d = apply_unique_key(d, facts, consts)?;
    Ok(rename_bound_vars(&d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iso::is_isomorphic;

    fn v(name: &str) -> Var {
        Var::base(name)
    }

    fn keyed_r() -> SchemaFacts {
        SchemaFacts {
            unique_keys: vec![UniqueKey {
                table: "R".into(),
                columns: vec!["k".into()],
            }],
            ..SchemaFacts::default()
        }
    }

    #[test]
    fn schema_fact_queries() {
        let facts = SchemaFacts {
            unique_keys: vec![UniqueKey {
                table: "R".into(),
                columns: vec!["a".into(), "b".into()],
            }],
            not_null: vec![NotNullColumn {
                table: "R".into(),
                column: "a".into(),
            }],
            ..SchemaFacts::default()
        };
        assert!(facts.is_unique("R", &["b".into(), "a".into(), "c".into()]));
        assert!(!facts.is_unique("R", &["a".into()]));
        assert!(facts.is_not_null("R", "a"));
        assert!(!facts.is_not_null("S", "a"));
    }

    #[test]
    fn constant_tuples_cover_projections_of_members() {
        let consts = ConstantTuples::new([v("t")]);
        assert!(consts.is_constant(&v("t").proj("a")));
        assert!(consts.is_constant(&Var::constant("1")));
        assert!(consts.is_constant(&Var::func("f", vec![v("t"), Var::constant("2")])));
        assert!(!consts.is_constant(&v("s").proj("a")));
    }

    #[test]
    fn uk1_removes_the_duplicate_atom() {
        let e = UExpr::sum(
            vec![v("t0"), v("t1")],
            UExpr::product(vec![
                UExpr::eq_pred(v("t0").proj("k"), v("t1").proj("k")),
                UExpr::table("R", v("t0")),
                UExpr::table("R", v("t1")),
            ])
            .unwrap(),
        );
        let d = normalize(&e).unwrap();
        let out = canonicalize(d, &keyed_r(), &ConstantTuples::default()).unwrap();
        let expected = normalize(&UExpr::sum(vec![v("t0")], UExpr::table("R", v("t0")))).unwrap();
        assert!(is_isomorphic(&out, &expected), "{out}");
    }

    #[test]
    fn uk1_skips_unkeyed_relations() {
        let e = UExpr::sum(
            vec![v("t0"), v("t1")],
            UExpr::product(vec![
                UExpr::eq_pred(v("t0").proj("k"), v("t1").proj("k")),
                UExpr::table("S", v("t0")),
                UExpr::table("S", v("t1")),
            ])
            .unwrap(),
        );
        let d = normalize(&e).unwrap();
        let out = canonicalize(d, &keyed_r(), &ConstantTuples::default()).unwrap();
        assert_eq!(out.conjunctions()[0].tables().len(), 2);
    }

    #[test]
    fn uk2_squashes_a_constant_keyed_conjunction() {
        // Sum{x}(R(x) * [x.k = t.k]) with t constant
        let e = UExpr::sum(
            vec![v("x")],
            UExpr::mul(
                UExpr::table("R", v("x")),
                UExpr::eq_pred(v("x").proj("k"), v("t").proj("k")),
            ),
        );
        let d = normalize(&e).unwrap();
        let out = canonicalize(d, &keyed_r(), &ConstantTuples::new([v("t")])).unwrap();
        assert_eq!(out.len(), 1);
        let c = &out.conjunctions()[0];
        assert!(c.vars().is_empty());
        assert!(c.tables().is_empty());
        assert!(c.squash().is_some());
    }

    #[test]
    fn uk2_needs_a_constant_key() {
        let e = UExpr::sum(
            vec![v("x")],
            UExpr::mul(
                UExpr::table("R", v("x")),
                UExpr::eq_pred(v("x").proj("a"), v("t").proj("a")),
            ),
        );
        let d = normalize(&e).unwrap();
        let out = canonicalize(d, &keyed_r(), &ConstantTuples::new([v("t")])).unwrap();
        assert!(out.conjunctions()[0].squash().is_none());
    }

    #[test]
    fn foreign_key_adds_an_existential_reference() {
        let facts = SchemaFacts {
            foreign_keys: vec![ForeignKey {
                table: "S".into(),
                columns: vec!["r".into()],
                ref_table: "R".into(),
                ref_columns: vec!["id".into()],
            }],
            not_null: vec![NotNullColumn {
                table: "S".into(),
                column: "r".into(),
            }],
            ..SchemaFacts::default()
        };
        let e = UExpr::sum(vec![v("s")], UExpr::table("S", v("s")));
        let expanded = apply_foreign_key(&e, &facts);
        let d = normalize(&expanded).unwrap();
        let c = &d.conjunctions()[0];
        let sq = c.squash().expect("non-unique reference is squashed");
        assert_eq!(sq.conjunctions()[0].tables().len(), 1);
        assert_eq!(sq.conjunctions()[0].vars().len(), 1);
    }

    #[test]
    fn nullable_foreign_key_is_not_expanded() {
        let facts = SchemaFacts {
            foreign_keys: vec![ForeignKey {
                table: "S".into(),
                columns: vec!["r".into()],
                ref_table: "R".into(),
                ref_columns: vec!["id".into()],
            }],
            ..SchemaFacts::default()
        };
        let e = UExpr::sum(vec![v("s")], UExpr::table("S", v("s")));
        assert_eq!(apply_foreign_key(&e, &facts), e);
    }

    #[test]
    fn not_null_drops_implied_predicates() {
        let facts = SchemaFacts {
            not_null: vec![NotNullColumn {
                table: "R".into(),
                column: "a".into(),
            }],
            ..SchemaFacts::default()
        };
        let e = UExpr::sum(
            vec![v("x")],
            UExpr::product(vec![
                UExpr::table("R", v("x")),
                UExpr::not_null(v("x").proj("a")),
                UExpr::not_null(v("x").proj("b")),
            ])
            .unwrap(),
        );
        let out = apply_not_null(normalize(&e).unwrap(), &facts);
        assert_eq!(
            out.conjunctions()[0].predicates(),
            &[UExpr::not_null(v("x0").proj("b"))]
        );
    }

    #[test]
    fn constants_are_substituted_for_bound_tuples() {
        // Sum{x}([x = t] * [p(x)])  →  [p(t)]
        let e = UExpr::sum(
            vec![v("x")],
            UExpr::mul(
                UExpr::eq_pred(v("x"), v("t")),
                UExpr::pred("p", vec![v("x")]),
            ),
        );
        let out = apply_constants(normalize(&e).unwrap(), &ConstantTuples::new([v("t")]));
        let c = &out.conjunctions()[0];
        assert!(c.vars().is_empty());
        assert_eq!(c.predicates(), &[UExpr::pred("p", vec![v("t")])]);
    }

    #[test]
    fn null_tuples_propagate_into_projections() {
        // Sum{x}(R(x) * [x = NULL] * [p(x.a)])  →  R(null) * [p(null)]
        let e = UExpr::sum(
            vec![v("x")],
            UExpr::product(vec![
                UExpr::table("R", v("x")),
                UExpr::eq_pred(v("x"), Var::null()),
                UExpr::pred("p", vec![v("x").proj("a")]),
            ])
            .unwrap(),
        );
        let out = canonicalize(
            normalize(&e).unwrap(),
            &SchemaFacts::default(),
            &ConstantTuples::default(),
        )
        .unwrap();
        let c = &out.conjunctions()[0];
        assert!(c.vars().is_empty());
        assert_eq!(c.tables(), &[UExpr::table("R", Var::null())]);
        assert_eq!(c.predicates(), &[UExpr::pred("p", vec![Var::null()])]);
    }

    #[test]
    fn intermediate_variables_are_eliminated() {
        // Sum{x,y}(R(x) * [y = x.a] * [p(y)])  ≡  Sum{x}(R(x) * [p(x.a)])
        let with_y = UExpr::sum(
            vec![v("x"), v("y")],
            UExpr::product(vec![
                UExpr::table("R", v("x")),
                UExpr::eq_pred(v("y"), v("x").proj("a")),
                UExpr::pred("p", vec![v("y")]),
            ])
            .unwrap(),
        );
        let direct = UExpr::sum(
            vec![v("x")],
            UExpr::mul(
                UExpr::table("R", v("x")),
                UExpr::pred("p", vec![v("x").proj("a")]),
            ),
        );
        let none = ConstantTuples::default();
        let facts = SchemaFacts::default();
        let left = canonicalize(normalize(&with_y).unwrap(), &facts, &none).unwrap();
        let right = canonicalize(normalize(&direct).unwrap(), &facts, &none).unwrap();
        assert_eq!(left.conjunctions()[0].vars().len(), 1);
        assert_eq!(left.conjunctions()[0].predicates().len(), 1);
        assert!(is_isomorphic(&left, &right), "{left} vs {right}");
    }

    #[test]
    fn minimization_reaches_into_squash_and_keeps_table_variables() {
        // R(t) * ||Sum{y,z}(S(z) * [y = z] * [p(y)])||: y goes, z stays
        let e = UExpr::mul(
            UExpr::table("R", v("t")),
            UExpr::squash(UExpr::sum(
                vec![v("y"), v("z")],
                UExpr::product(vec![
                    UExpr::table("S", v("z")),
                    UExpr::eq_pred(v("y"), v("z")),
                    UExpr::pred("p", vec![v("y")]),
                ])
                .unwrap(),
            )),
        );
        let out = apply_minimization(normalize(&e).unwrap());
        let inner = &out.conjunctions()[0].squash().unwrap().conjunctions()[0];
        assert_eq!(inner.vars().len(), 1);
        let UExpr::Table { var: z, .. } = &inner.tables()[0] else {
            panic!("expected a table atom");
        };
        assert_eq!(inner.vars(), &[z.clone()]);
        assert_eq!(inner.predicates(), &[UExpr::pred("p", vec![z.clone()])]);
    }
}
