//! The decision procedure consulted at every enumeration leaf.

use equirule_uexpr::{is_isomorphic, Disjunction, SchemaFacts, Var};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Eq,
    Neq,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle backend failed: {0}")]
    Backend(String),

    #[error("oracle ran out of resources: {0}")]
    ResourceExhausted(String),
}

/// What an oracle may assume about both sides of a query.
#[derive(Debug, Clone, Copy)]
pub struct OracleContext<'a> {
    /// Integrity facts implied by the enabled constraints.
    pub facts: &'a SchemaFacts,
    /// Variables free in either side; they range over the same tuples.
    pub free_vars: &'a [Var],
}

/// Decides whether two normalized U-expressions denote the same query.
///
/// Implementations must be free of side effects: the enumerator caches
/// verdicts, and independent enumerations call one oracle concurrently.
pub trait LogicOracle: Send + Sync {
    fn prove_eq(
        &self,
        left: &Disjunction,
        right: &Disjunction,
        ctx: &OracleContext<'_>,
    ) -> Result<Verdict, OracleError>;
}

/// Syntactic oracle: equal up to renaming of bound variables and reordering.
///
/// It never proves inequality, so every non-isomorphic pair is `Unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsomorphismOracle;

impl LogicOracle for IsomorphismOracle {
    fn prove_eq(
        &self,
        left: &Disjunction,
        right: &Disjunction,
        _ctx: &OracleContext<'_>,
    ) -> Result<Verdict, OracleError> {
        if is_isomorphic(left, right) {
            Ok(Verdict::Eq)
        } else {
            Ok(Verdict::Unknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use equirule_uexpr::{normalize, UExpr};

    #[test]
    fn isomorphic_sides_are_eq() {
        let t = Var::base("t");
        let left = normalize(&UExpr::mul(UExpr::table("R", t.clone()), UExpr::table("S", t.clone()))).unwrap();
        let right = normalize(&UExpr::mul(UExpr::table("S", t.clone()), UExpr::table("R", t.clone()))).unwrap();
        let other = normalize(&UExpr::table("R", t.clone())).unwrap();
        let facts = SchemaFacts::default();
        let free = [t];
        let ctx = OracleContext {
            facts: &facts,
            free_vars: &free,
        };
        assert_eq!(IsomorphismOracle.prove_eq(&left, &right, &ctx), Ok(Verdict::Eq));
        assert_eq!(IsomorphismOracle.prove_eq(&left, &other, &ctx), Ok(Verdict::Unknown));
    }
}
