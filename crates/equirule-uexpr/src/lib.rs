//! U-expressions: the semiring calculus used to decide query equivalence.
//!
//! A query denotes a U-expression over row variables:
//! - `Add` is union, `Mul` is join/product
//! - `Sum` aggregates over a bound row variable (projection)
//! - `Squash` is the 0/1 indicator (deduplication), `Not` its complement
//!
//! ## Module Organization
//!
//! - `var`, `expr`: the term model
//! - `normalize`: the five-pass rewrite system to sum-of-products normal form
//! - `normal_form`: the `Disjunction`/`Conjunction` reading of a normalized term
//! - `congruence`: union-find equality closure over tuples
//! - `canonical`: schema-aware simplification (constants, intermediate variables,
//!   unique/foreign keys, NOT NULL)
//! - `iso`: equality of normal forms up to reordering and bound renaming

pub mod canonical;
pub mod congruence;
pub mod expr;
pub mod iso;
pub mod normal_form;
pub mod normalize;
pub mod var;

pub use canonical::{
    apply_constants, apply_foreign_key, apply_foreign_key_normalized, apply_minimization,
    apply_not_null, apply_unique_key, canonicalize, CanonicalizeError, ConstantTuples, ForeignKey,
    NotNullColumn, SchemaFacts, UniqueKey,
};
pub use congruence::{tuple_congruence, Congruence};
pub use expr::{Kind, UExpr, NOT_NULL_PRED};
pub use iso::is_isomorphic;
pub use normal_form::{as_conjunction, as_disjunction, Conjunction, Disjunction, NormalFormError};
pub use normalize::{
    apply_at, normalize, normalize_with_trace, rename_bound_vars, RewriteStep, Rule,
};
pub use var::{Var, NULL_LITERAL};
