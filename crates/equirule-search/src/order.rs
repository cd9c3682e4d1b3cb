//! Pointwise partial order over constraint assignments.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartialOrder {
    Same,
    GreaterThan,
    LessThan,
    Incomparable,
}

impl PartialOrder {
    pub fn reverse(self) -> Self {
        match self {
            PartialOrder::GreaterThan => PartialOrder::LessThan,
            PartialOrder::LessThan => PartialOrder::GreaterThan,
            other => other,
        }
    }
}

/// Compare two assignments by set inclusion of their enabled positions.
///
/// `GreaterThan` means `a` enables a strict superset of `b`. Arrays of
/// different lengths are `Incomparable`.
pub fn compare_bools(a: &[bool], b: &[bool]) -> PartialOrder {
    if a.len() != b.len() {
        return PartialOrder::Incomparable;
    }
    let mut cmp = PartialOrder::Same;
    for (&x, &y) in a.iter().zip(b) {
        if x && !y {
            if cmp == PartialOrder::LessThan {
                return PartialOrder::Incomparable;
            }
            cmp = PartialOrder::GreaterThan;
        } else if !x && y {
            if cmp == PartialOrder::GreaterThan {
                return PartialOrder::Incomparable;
            }
            cmp = PartialOrder::LessThan;
        }
    }
    cmp
}
