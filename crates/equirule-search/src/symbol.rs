//! Template symbols, their per-fragment registry and the shared naming table.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SymbolKind {
    Table,
    Attrs,
    Pred,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 3] = [SymbolKind::Table, SymbolKind::Attrs, SymbolKind::Pred];

    /// Name prefix used by [`SymbolNaming`] for fresh names.
    pub fn prefix(self) -> char {
        match self {
            SymbolKind::Table => 't',
            SymbolKind::Attrs => 'a',
            SymbolKind::Pred => 'p',
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            SymbolKind::Table => 0,
            SymbolKind::Attrs => 1,
            SymbolKind::Pred => 2,
        }
    }
}

/// Which template of a pair a symbol belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Source,
    Target,
}

/// An opaque hole in a template.
///
/// Identity is the `(side, kind, id)` triple handed out by the owning
/// registry; two symbols are never compared by where they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    side: Side,
    kind: SymbolKind,
    id: u32,
}

impl Symbol {
    pub(crate) fn new(side: Side, kind: SymbolKind, id: u32) -> Self {
        Symbol { side, kind, id }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_source(&self) -> bool {
        self.side == Side::Source
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            Side::Source => "src",
            Side::Target => "tgt",
        };
        write!(f, "{side}:{}#{}", self.kind.prefix(), self.id)
    }
}

// ============================================================================
// Naming
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("symbol name `{0}` is already bound to another symbol")]
    DuplicateName(String),

    #[error("symbol name `{name}` does not start with `{expected}`")]
    WrongPrefix { name: String, expected: char },

    #[error("unknown symbol name `{0}`")]
    UnknownName(String),
}

/// Bidirectional symbol ↔ name table shared by the two templates of a pair.
///
/// Fresh names are `t<n>`, `a<n>` and `p<n>` with one running counter per
/// kind; explicit names coming from parsed text are kept as written.
#[derive(Debug, Clone, Default)]
pub struct SymbolNaming {
    names: AHashMap<Symbol, String>,
    symbols: AHashMap<String, Symbol>,
    next: [u32; 3],
}

impl SymbolNaming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_of(&self, sym: Symbol) -> Option<&str> {
        self.names.get(&sym).map(String::as_str)
    }

    pub fn symbol_of(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Bind an explicit name. Rebinding a symbol to its current name is a no-op.
    pub fn set_name(&mut self, sym: Symbol, name: &str) -> Result<(), NamingError> {
        if !name.starts_with(sym.kind().prefix()) {
            return Err(NamingError::WrongPrefix {
                name: name.to_string(),
                expected: sym.kind().prefix(),
            });
        }
        match self.symbols.get(name) {
            Some(&bound) if bound == sym => return Ok(()),
            Some(_) => return Err(NamingError::DuplicateName(name.to_string())),
            None => {}
        }
        // keep the counter ahead of explicit numeric names
        if let Ok(n) = name[1..].parse::<u32>() {
            let next = &mut self.next[sym.kind().slot()];
            *next = (*next).max(n.saturating_add(1));
        }
        if let Some(old) = self.names.insert(sym, name.to_string()) {
            self.symbols.remove(&old);
        }
        self.symbols.insert(name.to_string(), sym);
        Ok(())
    }

    /// Name of `sym`, assigning the next free `<prefix><n>` if it has none.
    pub fn name_or_assign(&mut self, sym: Symbol) -> String {
        if let Some(name) = self.names.get(&sym) {
            return name.clone();
        }
        let slot = sym.kind().slot();
        loop {
            let candidate = format!("{}{}", sym.kind().prefix(), self.next[slot]);
            self.next[slot] += 1;
            if !self.symbols.contains_key(&candidate) {
                self.names.insert(sym, candidate.clone());
                self.symbols.insert(candidate.clone(), sym);
                return candidate;
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Index of an operator inside its fragment's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

/// The symbols of one fragment, grouped by kind in binding order.
#[derive(Debug, Clone)]
pub struct Symbols {
    side: Side,
    by_kind: [Vec<Symbol>; 3],
    owners: AHashMap<Symbol, OpId>,
    viable_sources: AHashMap<Symbol, Vec<Symbol>>,
}

impl Symbols {
    pub(crate) fn new(side: Side) -> Self {
        Symbols {
            side,
            by_kind: [Vec::new(), Vec::new(), Vec::new()],
            owners: AHashMap::new(),
            viable_sources: AHashMap::new(),
        }
    }

    /// Create the next symbol of `kind`, owned by `owner`.
    pub(crate) fn bind(&mut self, kind: SymbolKind, owner: OpId) -> Symbol {
        let id = self.len() as u32;
        let sym = Symbol::new(self.side, kind, id);
        self.by_kind[kind.slot()].push(sym);
        self.owners.insert(sym, owner);
        sym
    }

    pub(crate) fn set_viable_sources(&mut self, attrs: Symbol, sources: Vec<Symbol>) {
        self.viable_sources.insert(attrs, sources);
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn symbols_of(&self, kind: SymbolKind) -> &[Symbol] {
        &self.by_kind[kind.slot()]
    }

    pub fn all(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.by_kind.iter().flatten().copied()
    }

    pub fn owner_of(&self, sym: Symbol) -> Option<OpId> {
        self.owners.get(&sym).copied()
    }

    pub fn contains(&self, sym: Symbol) -> bool {
        self.owners.contains_key(&sym)
    }

    /// Tables and projected attrs an `Attrs` symbol may be drawn from.
    pub fn viable_sources_of(&self, attrs: Symbol) -> &[Symbol] {
        self.viable_sources
            .get(&attrs)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_skip_explicit_ones() {
        let mut naming = SymbolNaming::new();
        let t0 = Symbol::new(Side::Source, SymbolKind::Table, 0);
        let t1 = Symbol::new(Side::Target, SymbolKind::Table, 0);
        naming.set_name(t0, "t3").unwrap();
        assert_eq!(naming.name_or_assign(t1), "t4");
        assert_eq!(naming.symbol_of("t3"), Some(t0));
        assert_eq!(naming.name_of(t1), Some("t4"));
    }

    #[test]
    fn names_are_unique_and_prefixed() {
        let mut naming = SymbolNaming::new();
        let a = Symbol::new(Side::Source, SymbolKind::Attrs, 0);
        let b = Symbol::new(Side::Target, SymbolKind::Attrs, 0);
        naming.set_name(a, "a0").unwrap();
        assert_eq!(naming.set_name(a, "a0"), Ok(()));
        assert_eq!(
            naming.set_name(b, "a0"),
            Err(NamingError::DuplicateName("a0".into()))
        );
        assert!(matches!(
            naming.set_name(b, "t9"),
            Err(NamingError::WrongPrefix { expected: 'a', .. })
        ));
    }

    #[test]
    fn registry_groups_by_kind() {
        let mut syms = Symbols::new(Side::Source);
        let t = syms.bind(SymbolKind::Table, OpId(0));
        let p = syms.bind(SymbolKind::Pred, OpId(1));
        let a = syms.bind(SymbolKind::Attrs, OpId(1));
        assert_eq!(syms.symbols_of(SymbolKind::Table), &[t]);
        assert_eq!(syms.symbols_of(SymbolKind::Attrs), &[a]);
        assert_eq!(syms.owner_of(p), Some(OpId(1)));
        assert_eq!(syms.len(), 3);
        assert!(syms.viable_sources_of(a).is_empty());
        assert_ne!(t.id(), a.id());
    }
}
