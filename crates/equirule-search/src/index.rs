//! The constraint catalog of one template pair.
//!
//! Every candidate constraint gets a fixed position; the enumerator decides
//! a `bool` per position. Kinds occupy contiguous ranges in this order:
//!
//! 1. `AttrsSub`: one entry per (source attrs, viable source)
//! 2. `TableEq`, `AttrsEq`, `PredicateEq`: each an eq block over pairs of
//!    source symbols, followed by an instantiation block ordered by target
//!    symbol, then source symbol
//! 3. `Unique`, `NotNull`: one entry per (viable table source, source attrs)
//! 4. `Reference`: one entry per ordered pair of distinct source attrs and
//!    their table sources

use crate::constraint::{Constraint, ConstraintKind};
use crate::fragment::Fragment;
use crate::substitution::Substitution;
use crate::symbol::{Side, Symbol, SymbolKind, SymbolNaming, Symbols};
use ahash::AHashMap;
use std::ops::{Index, Range};

#[derive(Debug, Clone)]
pub struct ConstraintsIndex {
    source: Fragment,
    target: Fragment,
    naming: SymbolNaming,
    constraints: Vec<Constraint>,
    /// Per `ConstraintKind`, in catalog order.
    kind_ranges: [Range<usize>; 7],
    /// Per `SymbolKind`: the source-side eq block.
    eq_ranges: [Range<usize>; 3],
    /// Per `SymbolKind`: the instantiation block.
    inst_ranges: [Range<usize>; 3],
    /// `AttrsSub` entries of each source attrs.
    attrs_sub_ranges: AHashMap<Symbol, Range<usize>>,
    /// Instantiation entries of each target symbol.
    inst_ranges_by_target: AHashMap<Symbol, Range<usize>>,
    eq_lookup: AHashMap<(Symbol, Symbol), usize>,
    inst_lookup: AHashMap<(Symbol, Symbol), usize>,
    attrs_sub_lookup: AHashMap<(Symbol, Symbol), usize>,
}

impl ConstraintsIndex {
    pub fn build(source: &Fragment, target: &Fragment, naming: &SymbolNaming) -> Self {
        let mut builder = CatalogBuilder::default();
        let src = source.symbols();
        let tgt = target.symbols();

        let begin = builder.len();
        for &attrs in src.symbols_of(SymbolKind::Attrs) {
            let from = builder.len();
            for &viable in src.viable_sources_of(attrs) {
                let i = builder.push(ConstraintKind::AttrsSub, vec![attrs, viable]);
                builder.attrs_sub_lookup.insert((attrs, viable), i);
            }
            builder.attrs_sub_ranges.insert(attrs, from..builder.len());
        }
        builder.kind_ranges[ConstraintKind::AttrsSub as usize] = begin..builder.len();

        for kind in SymbolKind::ALL {
            let eq_kind = ConstraintKind::eq_of(kind);
            let begin = builder.len();
            let syms = src.symbols_of(kind);
            for (i, &a) in syms.iter().enumerate() {
                for &b in &syms[i + 1..] {
                    let at = builder.push(eq_kind, vec![a, b]);
                    builder.eq_lookup.insert((a, b), at);
                }
            }
            builder.eq_ranges[kind.slot()] = begin..builder.len();

            let inst_begin = builder.len();
            for &to in tgt.symbols_of(kind) {
                let from_at = builder.len();
                for &from in syms {
                    let at = builder.push(eq_kind, vec![from, to]);
                    builder.inst_lookup.insert((from, to), at);
                }
                builder.inst_ranges_by_target.insert(to, from_at..builder.len());
            }
            builder.inst_ranges[kind.slot()] = inst_begin..builder.len();
            builder.kind_ranges[eq_kind as usize] = begin..builder.len();
        }

        let table_sources = |attrs: Symbol| -> Vec<Symbol> {
            src.viable_sources_of(attrs)
                .iter()
                .copied()
                .filter(|s| s.kind() == SymbolKind::Table)
                .collect()
        };

        for kind in [ConstraintKind::Unique, ConstraintKind::NotNull] {
            let begin = builder.len();
            for &attrs in src.symbols_of(SymbolKind::Attrs) {
                for table in table_sources(attrs) {
                    builder.push(kind, vec![table, attrs]);
                }
            }
            builder.kind_ranges[kind as usize] = begin..builder.len();
        }

        let begin = builder.len();
        for &attrs in src.symbols_of(SymbolKind::Attrs) {
            for &ref_attrs in src.symbols_of(SymbolKind::Attrs) {
                if attrs == ref_attrs {
                    continue;
                }
                for table in table_sources(attrs) {
                    for ref_table in table_sources(ref_attrs) {
                        builder.push(
                            ConstraintKind::Reference,
                            vec![table, attrs, ref_table, ref_attrs],
                        );
                    }
                }
            }
        }
        builder.kind_ranges[ConstraintKind::Reference as usize] = begin..builder.len();

        ConstraintsIndex {
            source: source.clone(),
            target: target.clone(),
            naming: naming.clone(),
            constraints: builder.constraints,
            kind_ranges: builder.kind_ranges,
            eq_ranges: builder.eq_ranges,
            inst_ranges: builder.inst_ranges,
            attrs_sub_ranges: builder.attrs_sub_ranges,
            inst_ranges_by_target: builder.inst_ranges_by_target,
            eq_lookup: builder.eq_lookup,
            inst_lookup: builder.inst_lookup,
            attrs_sub_lookup: builder.attrs_sub_lookup,
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Constraint> {
        self.constraints.get(i)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn source(&self) -> &Fragment {
        &self.source
    }

    pub fn target(&self) -> &Fragment {
        &self.target
    }

    pub fn naming(&self) -> &SymbolNaming {
        &self.naming
    }

    pub fn source_symbols(&self) -> &Symbols {
        self.source.symbols()
    }

    pub fn target_symbols(&self) -> &Symbols {
        self.target.symbols()
    }

    pub fn begin_of(&self, kind: ConstraintKind) -> usize {
        self.kind_ranges[kind as usize].start
    }

    pub fn end_of(&self, kind: ConstraintKind) -> usize {
        self.kind_ranges[kind as usize].end
    }

    pub fn begin_of_eq(&self, kind: SymbolKind) -> usize {
        self.eq_ranges[kind.slot()].start
    }

    pub fn end_of_eq(&self, kind: SymbolKind) -> usize {
        self.eq_ranges[kind.slot()].end
    }

    pub fn begin_of_instantiation(&self, kind: SymbolKind) -> usize {
        self.inst_ranges[kind.slot()].start
    }

    pub fn end_of_instantiation(&self, kind: SymbolKind) -> usize {
        self.inst_ranges[kind.slot()].end
    }

    /// Position of the source-side eq constraint over `a` and `b`, in either order.
    pub fn index_of_eq(&self, a: Symbol, b: Symbol) -> Option<usize> {
        self.eq_lookup
            .get(&(a, b))
            .or_else(|| self.eq_lookup.get(&(b, a)))
            .copied()
    }

    pub fn index_of_instantiation(&self, from: Symbol, to: Symbol) -> Option<usize> {
        self.inst_lookup.get(&(from, to)).copied()
    }

    pub fn index_of_attrs_sub(&self, attrs: Symbol, source: Symbol) -> Option<usize> {
        self.attrs_sub_lookup.get(&(attrs, source)).copied()
    }

    /// The `AttrsSub` entries of `attrs`, one per viable source.
    pub fn attrs_sub_range_of(&self, attrs: Symbol) -> Range<usize> {
        self.attrs_sub_ranges.get(&attrs).cloned().unwrap_or(0..0)
    }

    /// The instantiation entries of the target symbol `to`, one per source candidate.
    pub fn instantiation_range_of(&self, to: Symbol) -> Range<usize> {
        self.inst_ranges_by_target.get(&to).cloned().unwrap_or(0..0)
    }

    pub fn viable_sources_of(&self, attrs: Symbol) -> &[Symbol] {
        match attrs.side() {
            Side::Source => self.source.symbols().viable_sources_of(attrs),
            Side::Target => self.target.symbols().viable_sources_of(attrs),
        }
    }

    /// The rule made of every enabled constraint.
    pub fn make_rule(&self, enabled: &[bool]) -> Substitution {
        let constraints = self
            .constraints
            .iter()
            .zip(enabled)
            .filter(|(_, on)| **on)
            .map(|(c, _)| c.clone())
            .collect();
        Substitution::new(
            self.source.clone(),
            self.target.clone(),
            constraints,
            self.naming.clone(),
        )
    }
}

impl Index<usize> for ConstraintsIndex {
    type Output = Constraint;

    fn index(&self, i: usize) -> &Constraint {
        &self.constraints[i]
    }
}

#[derive(Default)]
struct CatalogBuilder {
    constraints: Vec<Constraint>,
    kind_ranges: [Range<usize>; 7],
    eq_ranges: [Range<usize>; 3],
    inst_ranges: [Range<usize>; 3],
    attrs_sub_ranges: AHashMap<Symbol, Range<usize>>,
    inst_ranges_by_target: AHashMap<Symbol, Range<usize>>,
    eq_lookup: AHashMap<(Symbol, Symbol), usize>,
    inst_lookup: AHashMap<(Symbol, Symbol), usize>,
    attrs_sub_lookup: AHashMap<(Symbol, Symbol), usize>,
}

impl CatalogBuilder {
    fn len(&self) -> usize {
        self.constraints.len()
    }

    fn push(&mut self, kind: ConstraintKind, symbols: Vec<Symbol>) -> usize {
        self.constraints.push(Constraint::of(kind, symbols));
        self.constraints.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(source: &str, target: &str) -> ConstraintsIndex {
        let mut naming = SymbolNaming::new();
        let s = Fragment::parse(source, Side::Source, &mut naming).unwrap();
        let t = Fragment::parse(target, Side::Target, &mut naming).unwrap();
        ConstraintsIndex::build(&s, &t, &naming)
    }

    fn texts(index: &ConstraintsIndex) -> Vec<String> {
        index
            .constraints()
            .iter()
            .map(|c| c.to_text(index.naming()))
            .collect()
    }

    #[test]
    fn single_filter_catalog() {
        let idx = index("Filter<p0 a0>(Input<t0>)", "Filter<p1 a1>(Input<t1>)");
        assert_eq!(
            texts(&idx),
            vec![
                "AttrsSub(a0,t0)",
                "TableEq(t0,t1)",
                "AttrsEq(a0,a1)",
                "PredicateEq(p0,p1)",
                "Unique(t0,a0)",
                "NotNull(t0,a0)",
            ]
        );
        assert_eq!(idx.begin_of(ConstraintKind::TableEq), 1);
        assert_eq!(idx.begin_of_eq(SymbolKind::Table), idx.end_of_eq(SymbolKind::Table));
        assert_eq!(idx.begin_of_instantiation(SymbolKind::Attrs), 2);
        assert_eq!(idx.end_of(ConstraintKind::Reference), idx.len());
        assert_eq!(idx.begin_of(ConstraintKind::Reference), idx.len());
    }

    #[test]
    fn join_catalog_layout() {
        let idx = index("InnerJoin<a0 a1>(Input<t0>,Input<t1>)", "Input<t2>");
        let sym = |n: &str| idx.naming().symbol_of(n).unwrap();
        let (t0, t1, t2, a0, a1) = (sym("t0"), sym("t1"), sym("t2"), sym("a0"), sym("a1"));

        assert_eq!(idx.index_of_attrs_sub(a0, t0), Some(0));
        assert_eq!(idx.index_of_attrs_sub(a1, t1), Some(1));
        assert_eq!(idx.index_of_attrs_sub(a1, t0), None);
        assert_eq!(idx.index_of_eq(t1, t0), idx.index_of_eq(t0, t1));
        assert_eq!(idx.index_of_eq(t0, t1), Some(2));
        assert_eq!(idx.index_of_instantiation(t0, t2), Some(3));
        assert_eq!(idx.index_of_instantiation(t1, t2), Some(4));
        assert_eq!(idx.instantiation_range_of(t2), 3..5);
        assert_eq!(idx.index_of_eq(a0, a1), Some(5));
        assert_eq!(idx.end_of(ConstraintKind::PredicateEq), 6);

        let refs: Vec<String> = texts(&idx)[idx.begin_of(ConstraintKind::Reference)..].to_vec();
        assert_eq!(refs, vec!["Reference(t0,a0,t1,a1)", "Reference(t1,a1,t0,a0)"]);
        assert_eq!(idx.viable_sources_of(a0), &[t0]);
    }

    #[test]
    fn make_rule_keeps_enabled_constraints() {
        let idx = index("Filter<p0 a0>(Input<t0>)", "Filter<p1 a1>(Input<t1>)");
        let rule = idx.make_rule(&[true, true, false, true, false, false]);
        assert_eq!(
            rule.to_text(),
            "Filter<p0 a0>(Input<t0>)|Filter<p1 a1>(Input<t1>)|AttrsSub(a0,t0);TableEq(t0,t1);PredicateEq(p0,p1)"
        );
    }
}
