//! Rewrite-rule discovery over pairs of query templates.
//!
//! Two fragment templates are related by a catalog of candidate constraints
//! (which symbols are drawn from where, which are equal, which integrity
//! facts hold). The enumerator searches assignments of that catalog and
//! reports the minimal ones under which a [`LogicOracle`] proves the
//! templates equivalent.
//!
//! ## Module Organization
//!
//! - `symbol`: symbols, per-fragment registries and the shared naming table
//! - `fragment`: template operator trees and their text form
//! - `constraint`: constraint kinds and their text form
//! - `index`: the catalog of one template pair
//! - `substitution`: rewrite rules and their instantiation into plans
//! - `order`: the inclusion order over boolean assignments
//! - `oracle`: the equivalence oracle interface
//! - `enumerator`: the staged search
//! - `config`: enumeration and batch settings
//! - `batch`: parallel enumeration over many pairs

pub mod batch;
pub mod config;
pub mod constraint;
pub mod enumerator;
pub mod fragment;
pub mod index;
pub mod oracle;
pub mod order;
pub mod substitution;
pub mod symbol;

pub use batch::{enumerate_pairs, BatchError, BatchReport, RuleSink, TemplatePair};
pub use config::{BatchConfig, EnumeratorConfig};
pub use constraint::{Constraint, ConstraintError, ConstraintKind};
pub use enumerator::{
    enumerate_pair, Answer, ConstraintEnumerator, EnumerateError, EnumerationOutcome,
    EnumerationStats, Forced, MAX_ATTRS_SYMBOLS,
};
pub use fragment::{Fragment, FragmentError, JoinType, Op};
pub use index::ConstraintsIndex;
pub use oracle::{IsomorphismOracle, LogicOracle, OracleContext, OracleError, Verdict};
pub use order::{compare_bools, PartialOrder};
pub use substitution::{InstantiateError, Substitution, SubstitutionError};
pub use symbol::{NamingError, OpId, Side, Symbol, SymbolKind, SymbolNaming, Symbols};
