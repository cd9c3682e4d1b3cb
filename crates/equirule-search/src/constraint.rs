//! Candidate constraints relating the symbols of two templates.

use crate::symbol::{Symbol, SymbolKind, SymbolNaming};
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::all_consuming,
    multi::separated_list0,
    sequence::{delimited, pair, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintError {
    #[error("malformed constraint `{text}`: {detail}")]
    Syntax { text: String, detail: String },

    #[error("unknown constraint kind `{0}`")]
    UnknownKind(String),

    #[error("{kind} takes {expected} symbols, found {found}")]
    Arity {
        kind: ConstraintKind,
        expected: usize,
        found: usize,
    },

    #[error("{kind} does not accept a {found:?} symbol at position {position}")]
    SymbolKind {
        kind: ConstraintKind,
        position: usize,
        found: SymbolKind,
    },

    #[error("unknown symbol name `{0}`")]
    UnknownSymbol(String),
}

/// Kinds in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintKind {
    AttrsSub,
    TableEq,
    AttrsEq,
    PredicateEq,
    Unique,
    NotNull,
    Reference,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 7] = [
        ConstraintKind::AttrsSub,
        ConstraintKind::TableEq,
        ConstraintKind::AttrsEq,
        ConstraintKind::PredicateEq,
        ConstraintKind::Unique,
        ConstraintKind::NotNull,
        ConstraintKind::Reference,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConstraintKind::AttrsSub => "AttrsSub",
            ConstraintKind::TableEq => "TableEq",
            ConstraintKind::AttrsEq => "AttrsEq",
            ConstraintKind::PredicateEq => "PredicateEq",
            ConstraintKind::Unique => "Unique",
            ConstraintKind::NotNull => "NotNull",
            ConstraintKind::Reference => "Reference",
        }
    }

    /// Accepts the older `Pick*` spelling of the attrs kinds.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.replacen("Pick", "Attrs", 1);
        ConstraintKind::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn arity(self) -> usize {
        match self {
            ConstraintKind::Reference => 4,
            _ => 2,
        }
    }

    pub fn is_eq(self) -> bool {
        matches!(
            self,
            ConstraintKind::TableEq | ConstraintKind::AttrsEq | ConstraintKind::PredicateEq
        )
    }

    pub fn is_integrity(self) -> bool {
        matches!(
            self,
            ConstraintKind::Unique | ConstraintKind::NotNull | ConstraintKind::Reference
        )
    }

    /// The equality kind over symbols of `kind`.
    pub fn eq_of(kind: SymbolKind) -> Self {
        match kind {
            SymbolKind::Table => ConstraintKind::TableEq,
            SymbolKind::Attrs => ConstraintKind::AttrsEq,
            SymbolKind::Pred => ConstraintKind::PredicateEq,
        }
    }

    fn accepts(self, position: usize, kind: SymbolKind) -> bool {
        use SymbolKind::*;
        match self {
            ConstraintKind::AttrsSub => match position {
                0 => kind == Attrs,
                _ => kind == Table || kind == Attrs,
            },
            ConstraintKind::TableEq => kind == Table,
            ConstraintKind::AttrsEq => kind == Attrs,
            ConstraintKind::PredicateEq => kind == Pred,
            ConstraintKind::Unique | ConstraintKind::NotNull | ConstraintKind::Reference => {
                if position % 2 == 0 {
                    kind == Table
                } else {
                    kind == Attrs
                }
            }
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One candidate fact, e.g. `AttrsSub(a0,t0)` or `Reference(t0,a0,t1,a1)`.
///
/// An eq constraint whose symbols sit on different sides is an
/// instantiation: `symbols[0]` (source) is copied into `symbols[1]` (target).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    kind: ConstraintKind,
    symbols: Vec<Symbol>,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, symbols: Vec<Symbol>) -> Result<Self, ConstraintError> {
        if symbols.len() != kind.arity() {
            return Err(ConstraintError::Arity {
                kind,
                expected: kind.arity(),
                found: symbols.len(),
            });
        }
        for (position, sym) in symbols.iter().enumerate() {
            if !kind.accepts(position, sym.kind()) {
                return Err(ConstraintError::SymbolKind {
                    kind,
                    position,
                    found: sym.kind(),
                });
            }
        }
        Ok(Constraint { kind, symbols })
    }

    /// Catalog construction, where symbol kinds are known to fit.
    pub(crate) fn of(kind: ConstraintKind, symbols: Vec<Symbol>) -> Self {
        debug_assert_eq!(symbols.len(), kind.arity());
        Constraint { kind, symbols }
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn is_instantiation(&self) -> bool {
        self.kind.is_eq() && self.symbols[0].side() != self.symbols[1].side()
    }

    pub fn parse(text: &str, naming: &SymbolNaming) -> Result<Self, ConstraintError> {
        let (_, (name, args)) = all_consuming(delimited(multispace0, parse_constraint, multispace0))(
            text,
        )
        .map_err(|e| ConstraintError::Syntax {
            text: text.to_string(),
            detail: e.to_string(),
        })?;
        let kind = ConstraintKind::from_name(name)
            .ok_or_else(|| ConstraintError::UnknownKind(name.to_string()))?;
        let symbols = args
            .into_iter()
            .map(|n| {
                naming
                    .symbol_of(n)
                    .ok_or_else(|| ConstraintError::UnknownSymbol(n.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Constraint::new(kind, symbols)
    }

    pub fn to_text(&self, naming: &SymbolNaming) -> String {
        let names: Vec<String> = self
            .symbols
            .iter()
            .map(|s| match naming.name_of(*s) {
                Some(name) => name.to_string(),
                None => s.to_string(),
            })
            .collect();
        format!("{}({})", self.kind, names.join(","))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        for (i, sym) in self.symbols.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{sym}")?;
        }
        f.write_str(")")
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn parse_constraint(input: &str) -> IResult<&str, (&str, Vec<&str>)> {
    let (input, name) = identifier(input)?;
    let (input, args) = delimited(
        pair(char('('), multispace0),
        separated_list0(tuple((multispace0, char(','), multispace0)), identifier),
        pair(multispace0, char(')')),
    )(input)?;
    Ok((input, (name, args)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Side;

    fn naming() -> (SymbolNaming, Symbol, Symbol, Symbol) {
        let mut naming = SymbolNaming::new();
        let t = Symbol::new(Side::Source, SymbolKind::Table, 0);
        let a = Symbol::new(Side::Source, SymbolKind::Attrs, 1);
        let p = Symbol::new(Side::Target, SymbolKind::Pred, 0);
        naming.set_name(t, "t0").unwrap();
        naming.set_name(a, "a0").unwrap();
        naming.set_name(p, "p1").unwrap();
        (naming, t, a, p)
    }

    #[test]
    fn text_round_trips() {
        let (naming, t, a, _) = naming();
        let c = Constraint::new(ConstraintKind::Unique, vec![t, a]).unwrap();
        assert_eq!(c.to_text(&naming), "Unique(t0,a0)");
        assert_eq!(Constraint::parse("Unique(t0, a0)", &naming).unwrap(), c);
        assert_eq!(
            Constraint::parse("PickSub(a0,t0)", &naming).unwrap().kind(),
            ConstraintKind::AttrsSub
        );
    }

    #[test]
    fn arity_and_symbol_kinds_are_checked() {
        let (naming, t, a, p) = naming();
        assert!(matches!(
            Constraint::new(ConstraintKind::Reference, vec![t, a]),
            Err(ConstraintError::Arity { expected: 4, found: 2, .. })
        ));
        assert!(matches!(
            Constraint::new(ConstraintKind::NotNull, vec![a, t]),
            Err(ConstraintError::SymbolKind { position: 0, .. })
        ));
        assert!(matches!(
            Constraint::new(ConstraintKind::TableEq, vec![t, p]),
            Err(ConstraintError::SymbolKind { position: 1, .. })
        ));
        assert_eq!(
            Constraint::parse("Unique(t0,a9)", &naming),
            Err(ConstraintError::UnknownSymbol("a9".into()))
        );
        assert_eq!(
            Constraint::parse("Distinct(t0)", &naming),
            Err(ConstraintError::UnknownKind("Distinct".into()))
        );
    }

    #[test]
    fn cross_side_eq_is_an_instantiation() {
        let src = Symbol::new(Side::Source, SymbolKind::Pred, 2);
        let tgt = Symbol::new(Side::Target, SymbolKind::Pred, 0);
        let c = Constraint::new(ConstraintKind::PredicateEq, vec![src, tgt]).unwrap();
        assert!(c.is_instantiation());
        assert!(ConstraintKind::Reference.is_integrity());
        assert_eq!(ConstraintKind::eq_of(SymbolKind::Pred), ConstraintKind::PredicateEq);
    }
}
