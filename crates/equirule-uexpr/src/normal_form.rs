//! Sum-of-products normal form (SPNF).
//!
//! A [`Disjunction`] is a sum of [`Conjunction`]s; each conjunction is
//! `Sum{vars}(tables * predicates * ||squash|| * not(negation))` where the
//! squash and the negation are themselves disjunctions.

use crate::expr::{Kind, UExpr};
use crate::var::Var;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalFormError {
    #[error("not a normal form ({reason}): {expr}")]
    NotNormalForm { expr: String, reason: &'static str },

    #[error("a conjunction needs at least one factor")]
    EmptyConjunction,

    #[error("a disjunction needs at least one conjunction")]
    EmptyDisjunction,

    #[error("expected a table atom, got `{0}`")]
    NotATable(String),

    #[error("expected a predicate atom, got `{0}`")]
    NotAPredicate(String),

    #[error("rewriting did not converge in pass {pass} after {steps} steps")]
    StepLimit { pass: usize, steps: usize },
}

// ============================================================================
// Conjunction
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConjunction")]
pub struct Conjunction {
    vars: Vec<Var>,
    tables: Vec<UExpr>,
    predicates: Vec<UExpr>,
    squash: Option<Disjunction>,
    negation: Option<Disjunction>,
}

impl Conjunction {
    pub fn new(
        vars: Vec<Var>,
        tables: Vec<UExpr>,
        predicates: Vec<UExpr>,
        squash: Option<Disjunction>,
        negation: Option<Disjunction>,
    ) -> Result<Self, NormalFormError> {
        if tables.is_empty() && predicates.is_empty() && squash.is_none() && negation.is_none() {
            return Err(NormalFormError::EmptyConjunction);
        }
        if let Some(bad) = tables.iter().find(|t| t.kind() != Kind::Table) {
            return Err(NormalFormError::NotATable(bad.to_string()));
        }
        if let Some(bad) = predicates.iter().find(|p| !p.kind().is_pred()) {
            return Err(NormalFormError::NotAPredicate(bad.to_string()));
        }
        Ok(Conjunction {
            vars,
            tables,
            predicates,
            squash,
            negation,
        })
    }

    /// The canonical empty conjunction (the unit `1`).
    pub fn empty() -> Self {
        Conjunction {
            vars: Vec::new(),
            tables: Vec::new(),
            predicates: Vec::new(),
            squash: None,
            negation: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.predicates.is_empty()
            && self.squash.is_none()
            && self.negation.is_none()
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn tables(&self) -> &[UExpr] {
        &self.tables
    }

    pub fn predicates(&self) -> &[UExpr] {
        &self.predicates
    }

    pub fn squash(&self) -> Option<&Disjunction> {
        self.squash.as_ref()
    }

    pub fn negation(&self) -> Option<&Disjunction> {
        self.negation.as_ref()
    }

    pub(crate) fn vars_mut(&mut self) -> &mut Vec<Var> {
        &mut self.vars
    }

    pub(crate) fn tables_mut(&mut self) -> &mut Vec<UExpr> {
        &mut self.tables
    }

    pub(crate) fn predicates_mut(&mut self) -> &mut Vec<UExpr> {
        &mut self.predicates
    }

    pub(crate) fn squash_mut(&mut self) -> &mut Option<Disjunction> {
        &mut self.squash
    }

    pub(crate) fn negation_mut(&mut self) -> &mut Option<Disjunction> {
        &mut self.negation
    }

    pub fn to_expr(&self) -> UExpr {
        let mut factors: Vec<UExpr> = Vec::new();
        factors.extend(self.tables.iter().cloned());
        factors.extend(self.predicates.iter().cloned());
        if let Some(sq) = &self.squash {
            factors.push(UExpr::squash(sq.to_expr()));
        }
        if let Some(neg) = &self.negation {
            factors.push(UExpr::not(neg.to_expr()));
        }
        let body = UExpr::product(factors).unwrap_or_else(UExpr::unit);
        UExpr::sum(self.vars.clone(), body)
    }

    /// Substitute `from` by `to`. Nested disjunctions that rebind `from` are left alone.
    pub fn subst(&mut self, from: &Var, to: &Var) {
        if self.vars.contains(from) && from != to {
            for v in &mut self.vars {
                if v == from {
                    *v = to.clone();
                }
            }
        }
        for t in &mut self.tables {
            *t = t.subst_var(from, to);
        }
        for p in &mut self.predicates {
            *p = p.subst_var(from, to);
        }
        if let Some(sq) = &mut self.squash {
            sq.subst(from, to);
        }
        if let Some(neg) = &mut self.negation {
            neg.subst(from, to);
        }
    }

    pub fn uses(&self, var: &Var) -> bool {
        self.vars.contains(var)
            || self.tables.iter().any(|t| t.uses(var))
            || self.predicates.iter().any(|p| p.uses(var))
            || self.squash.as_ref().is_some_and(|d| d.uses(var))
            || self.negation.as_ref().is_some_and(|d| d.uses(var))
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

// ============================================================================
// Disjunction
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDisjunction")]
pub struct Disjunction {
    conjunctions: Vec<Conjunction>,
}

// Deserialized values go through the validating constructors.

#[derive(Deserialize)]
struct RawConjunction {
    vars: Vec<Var>,
    tables: Vec<UExpr>,
    predicates: Vec<UExpr>,
    squash: Option<Disjunction>,
    negation: Option<Disjunction>,
}

impl TryFrom<RawConjunction> for Conjunction {
    type Error = NormalFormError;

    fn try_from(raw: RawConjunction) -> Result<Self, Self::Error> {
        Conjunction::new(raw.vars, raw.tables, raw.predicates, raw.squash, raw.negation)
    }
}

#[derive(Deserialize)]
struct RawDisjunction {
    conjunctions: Vec<Conjunction>,
}

impl TryFrom<RawDisjunction> for Disjunction {
    type Error = NormalFormError;

    fn try_from(raw: RawDisjunction) -> Result<Self, Self::Error> {
        Disjunction::new(raw.conjunctions)
    }
}

impl Disjunction {
    pub fn new(conjunctions: Vec<Conjunction>) -> Result<Self, NormalFormError> {
        if conjunctions.is_empty() {
            return Err(NormalFormError::EmptyDisjunction);
        }
        Ok(Disjunction { conjunctions })
    }

    pub fn single(conjunction: Conjunction) -> Self {
        Disjunction {
            conjunctions: vec![conjunction],
        }
    }

    pub fn conjunctions(&self) -> &[Conjunction] {
        &self.conjunctions
    }

    pub(crate) fn conjunctions_mut(&mut self) -> &mut [Conjunction] {
        &mut self.conjunctions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Conjunction> {
        self.conjunctions.iter()
    }

    pub fn len(&self) -> usize {
        self.conjunctions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conjunctions.is_empty()
    }

    /// The sum of the conjunctions; an empty sum is [`UExpr::zero`].
    pub fn to_expr(&self) -> UExpr {
        UExpr::sum_of(self.conjunctions.iter().map(Conjunction::to_expr))
            .unwrap_or_else(UExpr::zero)
    }

    pub fn subst(&mut self, from: &Var, to: &Var) {
        for c in &mut self.conjunctions {
            if c.vars.contains(from) {
                continue;
            }
            c.subst(from, to);
        }
    }

    pub fn uses(&self, var: &Var) -> bool {
        self.conjunctions.iter().any(|c| c.uses(var))
    }
}

impl<'a> IntoIterator for &'a Disjunction {
    type Item = &'a Conjunction;
    type IntoIter = std::slice::Iter<'a, Conjunction>;

    fn into_iter(self) -> Self::IntoIter {
        self.conjunctions.iter()
    }
}

impl fmt::Display for Disjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

// ============================================================================
// Reading a normalized term
// ============================================================================

/// Read a normalized term into a disjunction of conjunctions.
pub fn as_disjunction(expr: &UExpr) -> Result<Disjunction, NormalFormError> {
    let conjunctions = expr
        .chain_factors(Kind::Add)
        .into_iter()
        .map(as_conjunction)
        .collect::<Result<Vec<_>, _>>()?;
    Disjunction::new(conjunctions)
}

/// Read one SPNF conjunction: `Sum{vars}(factor * ... * factor)`.
pub fn as_conjunction(expr: &UExpr) -> Result<Conjunction, NormalFormError> {
    let not_normal = |reason| NormalFormError::NotNormalForm {
        expr: expr.to_string(),
        reason,
    };

    let (vars, body) = match expr {
        UExpr::Sum { vars, body } => (vars.clone(), body.as_ref()),
        other => (Vec::new(), other),
    };
    if body.kind() == Kind::Sum {
        return Err(not_normal("nested summation"));
    }

    let mut tables = Vec::new();
    let mut predicates = Vec::new();
    let mut squashes = Vec::new();
    let mut negations = Vec::new();
    for factor in body.chain_factors(Kind::Mul) {
        match factor {
            UExpr::Table { .. } => tables.push(factor.clone()),
            UExpr::Pred { .. } | UExpr::EqPred { .. } => predicates.push(factor.clone()),
            UExpr::Squash(inner) => squashes.push(inner.as_ref()),
            UExpr::Not(inner) => negations.push(inner.as_ref()),
            UExpr::Mul(..) => return Err(not_normal("right-nested product")),
            UExpr::Add(..) => return Err(not_normal("sum inside a product")),
            UExpr::Sum { .. } => return Err(not_normal("summation inside a product")),
        }
    }
    if squashes.len() >= 2 {
        return Err(not_normal("more than one squash factor"));
    }
    if negations.len() >= 2 {
        return Err(not_normal("more than one negation factor"));
    }

    let squash = squashes.first().map(|e| as_disjunction(e)).transpose()?;
    let negation = negations.first().map(|e| as_disjunction(e)).transpose()?;
    Conjunction::new(vars, tables, predicates, squash, negation)
}
