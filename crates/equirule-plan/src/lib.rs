//! Relational query plans and their U-expression semantics.
//!
//! ## Module Organization
//!
//! - `plan`: the operator tree (`Input`, `Proj`, `Filter`, joins, unions, ...)
//! - `translate`: scope-tracking translation of a plan into a `UExpr`

pub mod plan;
pub mod translate;

pub use plan::{JoinKind, Plan, Predicate, ProjItem, ScalarExpr, SetOpKind};
pub use translate::{translate, TranslateError, Translation, ROOT_VAR_NAME};
