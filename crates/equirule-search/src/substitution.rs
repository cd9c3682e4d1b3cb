//! Rewrite rules: a template pair plus the constraints it was proven under.

use crate::constraint::{Constraint, ConstraintError, ConstraintKind};
use crate::fragment::{Fragment, FragmentError, JoinType, Op};
use crate::symbol::{OpId, Side, Symbol, SymbolKind, SymbolNaming};
use ahash::AHashMap;
use equirule_plan::{JoinKind, Plan, Predicate, ProjItem, ScalarExpr, SetOpKind};
use equirule_uexpr::{Congruence, ForeignKey, NotNullColumn, SchemaFacts, UniqueKey};
use nom::{
    bytes::complete::{take_till, take_till1},
    character::complete::char,
    combinator::{all_consuming, rest},
    multi::separated_list0,
    sequence::{terminated, tuple},
    IResult,
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstitutionError {
    #[error("malformed rule `{text}`: {detail}")]
    Syntax { text: String, detail: String },

    #[error(transparent)]
    Fragment(#[from] FragmentError),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstantiateError {
    #[error("attrs {0} has no enabled source")]
    MissingSource(Symbol),

    #[error("target symbol {0} is not instantiated")]
    MissingInstantiation(Symbol),

    #[error("attrs {0} does not resolve to a relation below its operator")]
    UnresolvedAttrs(Symbol),

    #[error("source chain of {0} does not end at a table")]
    SourceCycle(Symbol),
}

#[derive(Debug, Clone)]
pub struct Substitution {
    source: Fragment,
    target: Fragment,
    constraints: Vec<Constraint>,
    naming: SymbolNaming,
    eq: Congruence<Symbol>,
}

impl Substitution {
    pub fn new(
        source: Fragment,
        target: Fragment,
        constraints: Vec<Constraint>,
        naming: SymbolNaming,
    ) -> Self {
        let mut eq = Congruence::new();
        for c in constraints.iter().filter(|c| c.kind().is_eq()) {
            eq.union(&c.symbols()[0], &c.symbols()[1]);
        }
        Substitution {
            source,
            target,
            constraints,
            naming,
            eq,
        }
    }

    /// Parse `source|target|c1;c2;...`.
    pub fn parse(text: &str) -> Result<Self, SubstitutionError> {
        let syntax = |detail: String| SubstitutionError::Syntax {
            text: text.to_string(),
            detail,
        };
        let (_, (source_text, target_text, constraints_text)) =
            split_rule(text.trim()).map_err(|e| syntax(e.to_string()))?;
        let (_, items) =
            all_consuming(parse_constraint_list)(constraints_text).map_err(|e| syntax(e.to_string()))?;

        let mut naming = SymbolNaming::new();
        let source = Fragment::parse(source_text, Side::Source, &mut naming)?;
        let target = Fragment::parse(target_text, Side::Target, &mut naming)?;
        let constraints = items
            .into_iter()
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Constraint::parse(item, &naming))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Substitution::new(source, target, constraints, naming))
    }

    pub fn to_text(&self) -> String {
        let constraints: Vec<String> = self
            .constraints
            .iter()
            .map(|c| c.to_text(&self.naming))
            .collect();
        format!(
            "{}|{}|{}",
            self.source.to_text(&self.naming),
            self.target.to_text(&self.naming),
            constraints.join(";")
        )
    }

    pub fn source(&self) -> &Fragment {
        &self.source
    }

    pub fn target(&self) -> &Fragment {
        &self.target
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn naming(&self) -> &SymbolNaming {
        &self.naming
    }

    pub fn constraints_of(&self, kind: ConstraintKind) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(move |c| c.kind() == kind)
    }

    /// The symbol `attrs` is drawn from, per its `AttrsSub`.
    pub fn source_of(&self, attrs: Symbol) -> Option<Symbol> {
        self.constraints_of(ConstraintKind::AttrsSub)
            .find(|c| c.symbols()[0] == attrs)
            .map(|c| c.symbols()[1])
    }

    /// The source-side symbol a target-side symbol is instantiated from.
    pub fn instantiation_of(&self, target_sym: Symbol) -> Option<Symbol> {
        self.constraints
            .iter()
            .filter(|c| c.is_instantiation())
            .find(|c| c.symbols()[1] == target_sym)
            .map(|c| c.symbols()[0])
    }

    pub fn is_eq(&self, a: Symbol, b: Symbol) -> bool {
        self.eq.is_eq(&a, &b)
    }

    /// Concretize both templates into plans over fresh tables, columns and
    /// predicates, together with the integrity facts the rule assumes.
    pub fn instantiate(&self) -> Result<(Plan, Plan, SchemaFacts), InstantiateError> {
        let mut inst = Instantiator::new(self);
        inst.assign_all()?;
        let source = inst.build(&self.source, self.source.root(), &mut AHashMap::new())?;
        let target = inst.build(&self.target, self.target.root(), &mut AHashMap::new())?;
        let facts = inst.schema_facts();
        Ok((source, target, facts))
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn split_rule(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, (source, target, constraints)) = tuple((
        terminated(take_till(|c| c == '|'), char('|')),
        terminated(take_till(|c| c == '|'), char('|')),
        rest,
    ))(input)?;
    Ok((input, (source, target, constraints)))
}

fn parse_constraint_list(input: &str) -> IResult<&str, Vec<&str>> {
    separated_list0(char(';'), take_till1(|c| c == ';'))(input)
}

// ============================================================================
// Instantiation
// ============================================================================

#[derive(Debug)]
struct TableDesc {
    name: String,
    columns: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct SourceDesc {
    table: usize,
    alias: usize,
}

struct Instantiator<'s> {
    rule: &'s Substitution,
    tables: Vec<TableDesc>,
    sources: AHashMap<Symbol, SourceDesc>,
    table_order: Vec<Symbol>,
    /// `None` for attrs drawn from a projection: they reuse its column.
    attrs: AHashMap<Symbol, Option<String>>,
    attrs_order: Vec<Symbol>,
    preds: AHashMap<Symbol, String>,
    pred_order: Vec<Symbol>,
    next_column: usize,
    next_proj: usize,
}

impl<'s> Instantiator<'s> {
    fn new(rule: &'s Substitution) -> Self {
        Instantiator {
            rule,
            tables: Vec::new(),
            sources: AHashMap::new(),
            table_order: Vec::new(),
            attrs: AHashMap::new(),
            attrs_order: Vec::new(),
            preds: AHashMap::new(),
            pred_order: Vec::new(),
            next_column: 0,
            next_proj: 0,
        }
    }

    fn chain_bound(&self) -> usize {
        self.rule.source.symbols().len() + 1
    }

    fn assign_all(&mut self) -> Result<(), InstantiateError> {
        let rule = self.rule;
        let syms = rule.source.symbols();

        for (i, &table) in syms.symbols_of(SymbolKind::Table).iter().enumerate() {
            let shared = self
                .table_order
                .iter()
                .find(|t| self.rule.is_eq(**t, table))
                .map(|t| self.sources[t].table);
            let index = match shared {
                Some(index) => index,
                None => {
                    self.tables.push(TableDesc {
                        name: format!("r{}", self.tables.len()),
                        columns: Vec::new(),
                    });
                    self.tables.len() - 1
                }
            };
            self.sources.insert(table, SourceDesc { table: index, alias: i });
            self.table_order.push(table);
        }

        for &attrs in syms.symbols_of(SymbolKind::Attrs) {
            let source = self
                .rule
                .source_of(attrs)
                .ok_or(InstantiateError::MissingSource(attrs))?;
            let column = if source.kind() == SymbolKind::Attrs {
                None
            } else {
                let shared = self
                    .attrs_order
                    .iter()
                    .filter(|a| self.rule.is_eq(**a, attrs))
                    .find_map(|a| self.attrs.get(a).cloned().flatten());
                match shared {
                    Some(column) => Some(column),
                    None => {
                        let desc = *self
                            .sources
                            .get(&source)
                            .ok_or(InstantiateError::MissingSource(attrs))?;
                        let column = self.fresh_column();
                        self.tables[desc.table].columns.push(column.clone());
                        Some(column)
                    }
                }
            };
            self.attrs.insert(attrs, column);
            self.attrs_order.push(attrs);
        }

        for &pred in syms.symbols_of(SymbolKind::Pred) {
            let shared = self
                .pred_order
                .iter()
                .find(|p| self.rule.is_eq(**p, pred))
                .map(|p| self.preds[p].clone());
            let name = shared.unwrap_or_else(|| format!("p{}", self.pred_order.len()));
            self.preds.insert(pred, name);
            self.pred_order.push(pred);
        }

        // one column no attrs refers to, so a table is never just its keys
        for i in 0..self.tables.len() {
            let column = self.fresh_column();
            self.tables[i].columns.push(column);
        }
        Ok(())
    }

    fn fresh_column(&mut self) -> String {
        let column = format!("c{}", self.next_column);
        self.next_column += 1;
        column
    }

    /// The source-side symbol standing for `sym`.
    fn resolve(&self, sym: Symbol) -> Result<Symbol, InstantiateError> {
        match sym.side() {
            Side::Source => Ok(sym),
            Side::Target => self
                .rule
                .instantiation_of(sym)
                .ok_or(InstantiateError::MissingInstantiation(sym)),
        }
    }

    fn column_of(&self, attrs: Symbol) -> Result<String, InstantiateError> {
        let mut current = self.resolve(attrs)?;
        for _ in 0..self.chain_bound() {
            match self.attrs.get(&current) {
                Some(Some(column)) => return Ok(column.clone()),
                Some(None) => {
                    current = self
                        .rule
                        .source_of(current)
                        .ok_or(InstantiateError::MissingSource(current))?;
                }
                None => return Err(InstantiateError::MissingSource(current)),
            }
        }
        Err(InstantiateError::SourceCycle(attrs))
    }

    /// The table symbol at the end of `attrs`' source chain.
    fn deep_source_of(&self, attrs: Symbol) -> Result<Symbol, InstantiateError> {
        let mut current = self.resolve(attrs)?;
        for _ in 0..self.chain_bound() {
            let source = self
                .rule
                .source_of(current)
                .ok_or(InstantiateError::MissingSource(current))?;
            if source.kind() == SymbolKind::Table {
                return Ok(source);
            }
            current = source;
        }
        Err(InstantiateError::SourceCycle(attrs))
    }

    /// Alias of the relation under `id` that exposes `source`'s columns.
    fn find_source_in(
        &self,
        fragment: &Fragment,
        source: Symbol,
        id: OpId,
        aliases: &AHashMap<OpId, String>,
    ) -> Option<String> {
        match fragment.op(id) {
            Op::Input { table } => {
                if self.resolve(*table).ok() == Some(source) {
                    aliases.get(&id).cloned()
                } else {
                    None
                }
            }
            Op::Proj { input, .. } => self
                .find_source_in(fragment, source, *input, aliases)
                .and_then(|_| aliases.get(&id).cloned()),
            op => op
                .inputs()
                .into_iter()
                .find_map(|input| self.find_source_in(fragment, source, input, aliases)),
        }
    }

    fn column_ref(
        &self,
        fragment: &Fragment,
        attrs: Symbol,
        below: OpId,
        aliases: &AHashMap<OpId, String>,
    ) -> Result<ScalarExpr, InstantiateError> {
        let column = self.column_of(attrs)?;
        let source = self.deep_source_of(attrs)?;
        let qualifier = self
            .find_source_in(fragment, source, below, aliases)
            .ok_or(InstantiateError::UnresolvedAttrs(attrs))?;
        Ok(ScalarExpr::column(qualifier, column))
    }

    fn build(
        &mut self,
        fragment: &Fragment,
        id: OpId,
        aliases: &mut AHashMap<OpId, String>,
    ) -> Result<Plan, InstantiateError> {
        let plan = match fragment.op(id) {
            Op::Input { table } => {
                let source = self.resolve(*table)?;
                let desc = *self
                    .sources
                    .get(&source)
                    .ok_or(InstantiateError::MissingInstantiation(*table))?;
                let alias = format!("t{}", desc.alias);
                aliases.insert(id, alias.clone());
                let table = &self.tables[desc.table];
                Plan::input(table.name.clone(), alias, table.columns.clone())
            }
            Op::Proj {
                attrs,
                dedup,
                input,
            } => {
                let child = self.build(fragment, *input, aliases)?;
                let column = self.column_ref(fragment, *attrs, *input, aliases)?;
                let name = match &column {
                    ScalarExpr::Column { column, .. } => column.clone(),
                    other => other.to_string(),
                };
                let alias = format!("q{}", self.next_proj);
                self.next_proj += 1;
                aliases.insert(id, alias.clone());
                Plan::proj(child, vec![ProjItem::new(column, name)], *dedup, alias)
            }
            Op::Filter { pred, attrs, input } => {
                let child = self.build(fragment, *input, aliases)?;
                let column = self.column_ref(fragment, *attrs, *input, aliases)?;
                let source = self.resolve(*pred)?;
                let name = self
                    .preds
                    .get(&source)
                    .cloned()
                    .ok_or(InstantiateError::MissingInstantiation(*pred))?;
                Plan::filter(child, Predicate::call(name, vec![column]))
            }
            Op::InSubFilter {
                attrs,
                input,
                subquery,
            } => {
                let outer = self.build(fragment, *input, aliases)?;
                let inner = self.build(fragment, *subquery, aliases)?;
                let column = self.column_ref(fragment, *attrs, *input, aliases)?;
                Plan::in_sub_filter(outer, vec![column], inner)
            }
            Op::Join {
                kind,
                lhs_attrs,
                rhs_attrs,
                left,
                right,
            } => {
                let l = self.build(fragment, *left, aliases)?;
                let r = self.build(fragment, *right, aliases)?;
                let lhs = self.column_ref(fragment, *lhs_attrs, *left, aliases)?;
                let rhs = self.column_ref(fragment, *rhs_attrs, *right, aliases)?;
                let kind = match kind {
                    JoinType::Inner => JoinKind::Inner,
                    JoinType::Left => JoinKind::Left,
                };
                Plan::join(kind, l, r, Some(Predicate::eq(lhs, rhs)))
            }
            Op::Union { dedup, left, right } => {
                let l = self.build(fragment, *left, aliases)?;
                let r = self.build(fragment, *right, aliases)?;
                Plan::set_op(SetOpKind::Union, *dedup, l, r)
            }
        };
        Ok(plan)
    }

    fn table_name(&self, table: Symbol) -> Option<&str> {
        self.sources
            .get(&table)
            .map(|d| self.tables[d.table].name.as_str())
    }

    fn attrs_column(&self, attrs: Symbol) -> Option<&str> {
        self.attrs.get(&attrs).and_then(|c| c.as_deref())
    }

    fn schema_facts(&self) -> SchemaFacts {
        let mut facts = SchemaFacts::default();
        for c in self.rule.constraints_of(ConstraintKind::Unique) {
            let s = c.symbols();
            if let (Some(table), Some(column)) = (self.table_name(s[0]), self.attrs_column(s[1])) {
                let key = UniqueKey {
                    table: table.to_string(),
                    columns: vec![column.to_string()],
                };
                if !facts.unique_keys.contains(&key) {
                    facts.unique_keys.push(key);
                }
            }
        }
        for c in self.rule.constraints_of(ConstraintKind::NotNull) {
            let s = c.symbols();
            if let (Some(table), Some(column)) = (self.table_name(s[0]), self.attrs_column(s[1])) {
                let nn = NotNullColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                };
                if !facts.not_null.contains(&nn) {
                    facts.not_null.push(nn);
                }
            }
        }
        for c in self.rule.constraints_of(ConstraintKind::Reference) {
            let s = c.symbols();
            let resolved = (
                self.table_name(s[0]),
                self.attrs_column(s[1]),
                self.table_name(s[2]),
                self.attrs_column(s[3]),
            );
            if let (Some(table), Some(column), Some(ref_table), Some(ref_column)) = resolved {
                let fk = ForeignKey {
                    table: table.to_string(),
                    columns: vec![column.to_string()],
                    ref_table: ref_table.to_string(),
                    ref_columns: vec![ref_column.to_string()],
                };
                if !facts.foreign_keys.contains(&fk) {
                    facts.foreign_keys.push(fk);
                }
            }
        }
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTER_RULE: &str =
        "Filter<p0 a0>(Input<t0>)|Filter<p1 a1>(Input<t1>)|AttrsSub(a0,t0);TableEq(t0,t1);AttrsEq(a0,a1);PredicateEq(p0,p1)";

    #[test]
    fn text_round_trips() {
        let rule = Substitution::parse(FILTER_RULE).unwrap();
        assert_eq!(rule.to_text(), FILTER_RULE);
        assert_eq!(rule.constraints().len(), 4);
        let empty = Substitution::parse("Input<t0>|Input<t1>|").unwrap();
        assert_eq!(empty.to_text(), "Input<t0>|Input<t1>|");
    }

    #[test]
    fn lookups_follow_enabled_constraints() {
        let rule = Substitution::parse(FILTER_RULE).unwrap();
        let sym = |n: &str| rule.naming().symbol_of(n).unwrap();
        assert_eq!(rule.source_of(sym("a0")), Some(sym("t0")));
        assert_eq!(rule.instantiation_of(sym("p1")), Some(sym("p0")));
        assert_eq!(rule.instantiation_of(sym("p0")), None);
        assert!(rule.is_eq(sym("t0"), sym("t1")));
        assert!(rule.is_eq(sym("a1"), sym("a1")));
        assert!(!rule.is_eq(sym("a0"), sym("p0")));
    }

    #[test]
    fn instantiation_shares_names_across_sides() {
        let rule = Substitution::parse(FILTER_RULE).unwrap();
        let (source, target, facts) = rule.instantiate().unwrap();
        assert_eq!(source, target);
        assert_eq!(source.to_string(), target.to_string());
        assert!(facts.is_empty());
        assert_eq!(source.output_columns(), vec!["c0".to_string(), "c1".to_string()]);
    }

    #[test]
    fn eq_tables_share_a_relation() {
        let rule = Substitution::parse(
            "InnerJoin<a0 a1>(Input<t0>,Input<t1>)|Input<t2>|AttrsSub(a0,t0);AttrsSub(a1,t1);TableEq(t0,t1);TableEq(t0,t2);Unique(t1,a1);NotNull(t0,a0)",
        )
        .unwrap();
        let (source, _, facts) = rule.instantiate().unwrap();
        match &source {
            Plan::Join { left, right, .. } => match (left.as_ref(), right.as_ref()) {
                (
                    Plan::Input {
                        table: l, alias: la, ..
                    },
                    Plan::Input {
                        table: r, alias: ra, ..
                    },
                ) => {
                    assert_eq!(l, r);
                    assert_ne!(la, ra);
                }
                other => panic!("unexpected inputs {other:?}"),
            },
            other => panic!("unexpected plan {other}"),
        }
        assert_eq!(facts.unique_keys.len(), 1);
        assert_eq!(facts.not_null.len(), 1);
    }

    #[test]
    fn projected_attrs_resolve_through_the_projection() {
        let rule = Substitution::parse(
            "Filter<p0 a1>(Proj<a0>(Input<t0>))|Filter<p1 a3>(Proj<a2>(Input<t1>))|AttrsSub(a0,t0);AttrsSub(a1,a0);TableEq(t0,t1);AttrsEq(a0,a2);AttrsEq(a1,a3);PredicateEq(p0,p1)",
        )
        .unwrap();
        let (source, target, _) = rule.instantiate().unwrap();
        assert_eq!(source.to_string().replace("q0", "q"), target.to_string().replace("q1", "q"));
        match source {
            Plan::Filter { predicate, .. } => assert_eq!(predicate.to_string(), "p0(q0.c0)"),
            other => panic!("unexpected plan {other}"),
        }
    }

    #[test]
    fn missing_instantiation_is_reported() {
        let rule = Substitution::parse("Input<t0>|Input<t1>|").unwrap();
        let t1 = rule.naming().symbol_of("t1").unwrap();
        assert_eq!(
            rule.instantiate().unwrap_err(),
            InstantiateError::MissingInstantiation(t1)
        );
    }
}
