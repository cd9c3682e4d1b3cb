//! Depth-first search over constraint assignments.
//!
//! One `enabled` flag per catalog entry is decided stage by stage. Each stage
//! branches over its own slice of the array and hands over to the next; the
//! verifier at the bottom asks the oracle whether the two templates agree
//! under the enabled constraints. Verdicts are cached as boolean arrays and
//! compared by inclusion: a superset of an Eq assignment is Eq, a subset of a
//! Neq assignment is Neq.
//!
//! Stage order:
//!
//! | # | stage | decides |
//! |---|-------|---------|
//! | 0 | `AttrsSub` | which viable source each source attrs is drawn from |
//! | 1-3 | `TableInst`, `AttrsInst`, `PredInst` | which source symbol each target symbol copies |
//! | 4 | `OutputBreaker` | prunes pairs with different output arity |
//! | 5-7 | `TableEq`, `AttrsEq`, `PredEq` | equivalence classes of source symbols |
//! | 8 | `Unique` | unique keys |
//! | 9 | `SummationBreaker` | prunes pairs whose table multisets cannot match |
//! | 10-11 | `NotNull`, `Reference` | remaining integrity facts |
//! | 12 | `Timeout` | wall-clock budget |
//! | 13 | `Verifier` | the oracle |

use crate::config::EnumeratorConfig;
use crate::constraint::ConstraintKind;
use crate::fragment::{Fragment, FragmentError};
use crate::index::ConstraintsIndex;
use crate::oracle::{LogicOracle, OracleContext, OracleError, Verdict};
use crate::order::{compare_bools, PartialOrder};
use crate::substitution::Substitution;
use crate::symbol::{Side, Symbol, SymbolKind, SymbolNaming};
use ahash::AHashMap;
use equirule_plan::translate;
use equirule_uexpr::{
    apply_foreign_key, canonicalize, normalize, CanonicalizeError, ConstantTuples, Disjunction,
    NormalFormError, SchemaFacts, UExpr, Var,
};
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign, Range};
use std::time::Instant;
use thiserror::Error;

/// Templates with this many attrs symbols (both sides together) are not enumerated.
pub const MAX_ATTRS_SYMBOLS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Answer {
    Eq,
    Neq,
    Unknown,
    /// Budget exhausted; aborts every enclosing stage.
    Timeout,
}

#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("enumeration invariant violated: {0}")]
    Internal(String),

    #[error(transparent)]
    NormalForm(#[from] NormalFormError),

    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Parse(#[from] FragmentError),

    #[error("{count} attrs symbols exceed the limit of {limit}", limit = MAX_ATTRS_SYMBOLS)]
    TooManyAttrs { count: usize },
}

impl EnumerateError {
    /// Whether a batch may skip the pair and continue with the next one.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EnumerateError::Oracle(_) | EnumerateError::Parse(_) | EnumerateError::TooManyAttrs { .. }
        )
    }
}

/// How earlier decisions constrain one binary choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forced(u8);

impl Forced {
    pub const FREE: Forced = Forced(0);
    pub const MUST_ENABLE: Forced = Forced(1);
    pub const MUST_DISABLE: Forced = Forced(2);
    pub const CONFLICT: Forced = Forced(3);

    pub fn must_enable(self) -> bool {
        self.0 & Self::MUST_ENABLE.0 != 0
    }

    pub fn must_disable(self) -> bool {
        self.0 & Self::MUST_DISABLE.0 != 0
    }
}

impl BitOr for Forced {
    type Output = Forced;

    fn bitor(self, rhs: Forced) -> Forced {
        Forced(self.0 | rhs.0)
    }
}

impl BitOrAssign for Forced {
    fn bitor_assign(&mut self, rhs: Forced) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AttrsSub,
    Instantiation(SymbolKind),
    OutputBreaker,
    Partition(SymbolKind),
    Integrity(ConstraintKind),
    SummationBreaker,
    Timeout,
    Verifier,
}

const STAGES: [Stage; 14] = [
    Stage::AttrsSub,
    Stage::Instantiation(SymbolKind::Table),
    Stage::Instantiation(SymbolKind::Attrs),
    Stage::Instantiation(SymbolKind::Pred),
    Stage::OutputBreaker,
    Stage::Partition(SymbolKind::Table),
    Stage::Partition(SymbolKind::Attrs),
    Stage::Partition(SymbolKind::Pred),
    Stage::Integrity(ConstraintKind::Unique),
    Stage::SummationBreaker,
    Stage::Integrity(ConstraintKind::NotNull),
    Stage::Integrity(ConstraintKind::Reference),
    Stage::Timeout,
    Stage::Verifier,
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationStats {
    pub oracle_calls: u64,
    pub cache_hits: u64,
    pub output_breaker_hits: u64,
    pub summation_breaker_hits: u64,
    /// Verifier visits, cached or not.
    pub leaves: u64,
}

#[derive(Debug, Clone)]
pub struct EnumerationOutcome {
    /// Minimal Eq assignments, in discovery order.
    pub rules: Vec<Substitution>,
    pub timed_out: bool,
    pub stats: EnumerationStats,
}

pub struct ConstraintEnumerator<'a> {
    index: &'a ConstraintsIndex,
    config: EnumeratorConfig,
    oracle: &'a dyn LogicOracle,
}

impl<'a> ConstraintEnumerator<'a> {
    pub fn new(
        index: &'a ConstraintsIndex,
        config: EnumeratorConfig,
        oracle: &'a dyn LogicOracle,
    ) -> Self {
        Self {
            index,
            config,
            oracle,
        }
    }

    pub fn enumerate(&self) -> Result<EnumerationOutcome, EnumerateError> {
        let mut search = Search::new(self.index, &self.config, self.oracle);
        let answer = search.run(0)?;
        tracing::debug!(
            ?answer,
            constraints = self.index.len(),
            rules = search.known_eqs.len(),
            oracle_calls = search.stats.oracle_calls,
            "enumeration finished"
        );
        let rules = search
            .known_eqs
            .iter()
            .map(|enabled| self.index.make_rule(enabled))
            .collect();
        Ok(EnumerationOutcome {
            rules,
            timed_out: search.timed_out,
            stats: search.stats,
        })
    }
}

/// Parse a template pair, build its catalog and enumerate it.
pub fn enumerate_pair(
    source: &str,
    target: &str,
    config: &EnumeratorConfig,
    oracle: &dyn LogicOracle,
) -> Result<EnumerationOutcome, EnumerateError> {
    let mut naming = SymbolNaming::new();
    let source = Fragment::parse(source, Side::Source, &mut naming)?;
    let target = Fragment::parse(target, Side::Target, &mut naming)?;
    let count = source.symbols().symbols_of(SymbolKind::Attrs).len()
        + target.symbols().symbols_of(SymbolKind::Attrs).len();
    if count >= MAX_ATTRS_SYMBOLS {
        return Err(EnumerateError::TooManyAttrs { count });
    }
    let index = ConstraintsIndex::build(&source, &target, &naming);
    ConstraintEnumerator::new(&index, config.clone(), oracle).enumerate()
}

// ============================================================================
// Search state
// ============================================================================

struct Search<'a> {
    index: &'a ConstraintsIndex,
    config: &'a EnumeratorConfig,
    oracle: &'a dyn LogicOracle,
    enabled: Vec<bool>,
    known_eqs: Vec<Vec<bool>>,
    known_neqs: Vec<Vec<bool>>,
    stats: EnumerationStats,
    started: Instant,
    timed_out: bool,
}

impl<'a> Search<'a> {
    fn new(
        index: &'a ConstraintsIndex,
        config: &'a EnumeratorConfig,
        oracle: &'a dyn LogicOracle,
    ) -> Self {
        Search {
            index,
            config,
            oracle,
            enabled: vec![false; index.len()],
            known_eqs: Vec::new(),
            known_neqs: Vec::new(),
            stats: EnumerationStats::default(),
            started: Instant::now(),
            timed_out: false,
        }
    }

    fn run(&mut self, stage: usize) -> Result<Answer, EnumerateError> {
        let Some(&current) = STAGES.get(stage) else {
            return Err(EnumerateError::Internal(format!("no stage {stage}")));
        };
        match current {
            Stage::AttrsSub => self.attrs_sub_stage(stage),
            Stage::Instantiation(kind) => self.instantiation_stage(kind, stage),
            Stage::OutputBreaker => self.output_breaker(stage),
            Stage::Partition(kind) => self.partition_stage(kind, stage),
            Stage::Integrity(kind) => self.integrity_stage(kind, stage),
            Stage::SummationBreaker => self.summation_breaker(stage),
            Stage::Timeout => self.timeout_breaker(stage),
            Stage::Verifier => self.verify(),
        }
    }

    fn fill(&mut self, range: Range<usize>, value: bool) {
        self.enabled[range].fill(value);
    }

    /// The source `attrs` is currently drawn from.
    fn current_source_of(&self, attrs: Symbol) -> Option<Symbol> {
        self.index
            .attrs_sub_range_of(attrs)
            .find(|&i| self.enabled[i])
            .map(|i| self.index[i].symbols()[1])
    }

    /// The source symbol the target symbol `to` currently copies.
    fn current_instantiation_of(&self, to: Symbol) -> Option<Symbol> {
        self.index
            .instantiation_range_of(to)
            .find(|&i| self.enabled[i])
            .map(|i| self.index[i].symbols()[0])
    }

    /// Equality of two source symbols under the current partitions.
    fn is_eq(&self, a: Symbol, b: Symbol) -> bool {
        a == b || self.index.index_of_eq(a, b).map_or(false, |i| self.enabled[i])
    }

    fn sources_eq(&self, a: Symbol, b: Symbol) -> bool {
        match (self.current_source_of(a), self.current_source_of(b)) {
            (Some(x), Some(y)) => self.is_eq(x, y),
            (x, y) => x == y,
        }
    }

    // ========================================================================
    // AttrsSub
    // ========================================================================

    fn attrs_sub_stage(&mut self, stage: usize) -> Result<Answer, EnumerateError> {
        let index = self.index;
        let range = index.begin_of(ConstraintKind::AttrsSub)..index.end_of(ConstraintKind::AttrsSub);
        // attrs with a single viable source stay enabled throughout
        self.fill(range.clone(), true);
        let choices: Vec<Range<usize>> = index
            .source_symbols()
            .symbols_of(SymbolKind::Attrs)
            .iter()
            .map(|&attrs| index.attrs_sub_range_of(attrs))
            .filter(|r| r.len() > 1)
            .collect();
        let answer = self.choose_sources(&choices, 0, stage)?;
        self.fill(range, true);
        Ok(answer)
    }

    fn choose_sources(
        &mut self,
        choices: &[Range<usize>],
        i: usize,
        stage: usize,
    ) -> Result<Answer, EnumerateError> {
        let Some(range) = choices.get(i).cloned() else {
            return self.run(stage + 1);
        };
        self.fill(range.clone(), false);
        for at in range.clone() {
            self.enabled[at] = true;
            let answer = self.choose_sources(choices, i + 1, stage)?;
            self.enabled[at] = false;
            if answer == Answer::Timeout {
                return Ok(Answer::Timeout);
            }
        }
        self.fill(range, true);
        Ok(Answer::Eq)
    }

    // ========================================================================
    // Instantiation
    // ========================================================================

    fn instantiation_stage(
        &mut self,
        kind: SymbolKind,
        stage: usize,
    ) -> Result<Answer, EnumerateError> {
        let index = self.index;
        let range = index.begin_of_instantiation(kind)..index.end_of_instantiation(kind);
        self.fill(range.clone(), false);
        let targets = index.target_symbols().symbols_of(kind);
        let answer = self.instantiate_from(kind, targets, 0, stage)?;
        self.fill(range, false);
        Ok(answer)
    }

    fn instantiate_from(
        &mut self,
        kind: SymbolKind,
        targets: &[Symbol],
        i: usize,
        stage: usize,
    ) -> Result<Answer, EnumerateError> {
        let Some(&to) = targets.get(i) else {
            return self.run(stage + 1);
        };
        let index = self.index;
        let mut all_neq = true;
        for &from in index.source_symbols().symbols_of(kind) {
            if !self.is_valid_instantiation(kind, from, to) {
                continue;
            }
            let at = index.index_of_instantiation(from, to).ok_or_else(|| {
                EnumerateError::Internal(format!("no instantiation entry {from} -> {to}"))
            })?;
            self.enabled[at] = true;
            let answer = self.instantiate_from(kind, targets, i + 1, stage)?;
            self.enabled[at] = false;
            match answer {
                Answer::Timeout => return Ok(Answer::Timeout),
                Answer::Neq => {}
                Answer::Eq | Answer::Unknown => all_neq = false,
            }
        }
        Ok(if all_neq { Answer::Neq } else { Answer::Eq })
    }

    fn is_valid_instantiation(&self, kind: SymbolKind, from: Symbol, to: Symbol) -> bool {
        match kind {
            SymbolKind::Table => {
                let index = self.index;
                let range =
                    index.begin_of_instantiation(kind)..index.end_of_instantiation(kind);
                !range.into_iter().any(|i| {
                    let s = index[i].symbols();
                    self.enabled[i] && s[0] == from && s[1] != to
                })
            }
            SymbolKind::Attrs => {
                let wanted: Vec<Symbol> = self
                    .index
                    .viable_sources_of(to)
                    .iter()
                    .filter_map(|&s| self.current_instantiation_of(s))
                    .collect();
                let mut current = from;
                for _ in 0..self.index.source_symbols().len() {
                    match self.current_source_of(current) {
                        Some(source) if wanted.contains(&source) => return true,
                        Some(source) if source.kind() == SymbolKind::Attrs => current = source,
                        _ => return false,
                    }
                }
                false
            }
            SymbolKind::Pred => true,
        }
    }

    // ========================================================================
    // Breakers
    // ========================================================================

    fn output_breaker(&mut self, stage: usize) -> Result<Answer, EnumerateError> {
        if self.config.disable_output_breaker {
            return self.run(stage + 1);
        }
        let rule = self.index.make_rule(&self.enabled);
        let (source, target, _) = match rule.instantiate() {
            Ok(plans) => plans,
            Err(err) => {
                tracing::debug!(rule = %rule, error = %err, "instantiation failed at output breaker");
                return Ok(Answer::Unknown);
            }
        };
        if source.output_columns().len() != target.output_columns().len() {
            self.stats.output_breaker_hits += 1;
            return Ok(Answer::Neq);
        }
        self.run(stage + 1)
    }

    fn summation_breaker(&mut self, stage: usize) -> Result<Answer, EnumerateError> {
        if self.config.disable_summation_breaker {
            return self.run(stage + 1);
        }
        let rule = self.index.make_rule(&self.enabled);
        let Some(prepared) = self.prepare(&rule)? else {
            return Ok(Answer::Unknown);
        };
        let left = table_multiset(&prepared.left);
        let right = table_multiset(&prepared.right);
        if !is_sub_multiset(&left, &right) && !is_sub_multiset(&right, &left) {
            self.stats.summation_breaker_hits += 1;
            return Ok(Answer::Unknown);
        }
        self.run(stage + 1)
    }

    fn timeout_breaker(&mut self, stage: usize) -> Result<Answer, EnumerateError> {
        if let Some(budget) = self.config.timeout() {
            if self.started.elapsed() >= budget {
                self.timed_out = true;
                return Ok(Answer::Timeout);
            }
        }
        self.run(stage + 1)
    }

    // ========================================================================
    // Partitions
    // ========================================================================

    fn partition_stage(&mut self, kind: SymbolKind, stage: usize) -> Result<Answer, EnumerateError> {
        let index = self.index;
        let symbols = index.source_symbols().symbols_of(kind);
        if symbols.is_empty() {
            return self.run(stage + 1);
        }
        let range = index.begin_of_eq(kind)..index.end_of_eq(kind);
        let mut partitions = Partitioner::new(symbols.len());
        let mut local_neqs: Vec<Vec<bool>> = Vec::new();
        let mut all_neq = true;

        loop {
            self.fill(range.clone(), false);
            for (i, &a) in symbols.iter().enumerate() {
                for (j, &b) in symbols.iter().enumerate().skip(i + 1) {
                    if partitions.same_block(i, j) {
                        let at = index.index_of_eq(a, b).ok_or_else(|| {
                            EnumerateError::Internal(format!("no eq entry {a} = {b}"))
                        })?;
                        self.enabled[at] = true;
                    }
                }
            }

            let skip = (kind == SymbolKind::Attrs && self.has_attrs_conflict(range.clone()))
                || local_neqs
                    .iter()
                    .any(|neq| compare_bools(&self.enabled, neq) == PartialOrder::LessThan);
            if !skip {
                match self.run(stage + 1)? {
                    Answer::Timeout => {
                        self.fill(range, false);
                        return Ok(Answer::Timeout);
                    }
                    Answer::Neq => {
                        let snapshot = self.enabled.clone();
                        local_neqs
                            .retain(|neq| compare_bools(neq, &snapshot) != PartialOrder::LessThan);
                        local_neqs.push(snapshot);
                    }
                    Answer::Eq | Answer::Unknown => all_neq = false,
                }
            }

            if !partitions.advance() {
                break;
            }
        }
        self.fill(range, false);
        Ok(if all_neq { Answer::Neq } else { Answer::Eq })
    }

    /// An enabled `AttrsEq` over attrs drawn from sources that are not equal.
    fn has_attrs_conflict(&self, range: Range<usize>) -> bool {
        range.into_iter().any(|i| {
            let s = self.index[i].symbols();
            self.enabled[i] && !self.sources_eq(s[0], s[1])
        })
    }

    // ========================================================================
    // Integrity constraints
    // ========================================================================

    fn integrity_stage(
        &mut self,
        kind: ConstraintKind,
        stage: usize,
    ) -> Result<Answer, EnumerateError> {
        let range = self.index.begin_of(kind)..self.index.end_of(kind);
        self.fill(range.clone(), true);
        let answer = self.decide(kind, range.start, range.clone(), stage)?;
        self.fill(range, true);
        Ok(answer)
    }

    fn decide(
        &mut self,
        kind: ConstraintKind,
        i: usize,
        range: Range<usize>,
        stage: usize,
    ) -> Result<Answer, EnumerateError> {
        if i == range.end {
            return self.run(stage + 1);
        }
        let forced = self.forced_of(kind, i, range.start);
        if forced == Forced::CONFLICT {
            return Err(EnumerateError::Internal(format!(
                "conflicting forced state for {}",
                self.index[i].to_text(self.index.naming())
            )));
        }

        let mut any_eq = false;
        let mut any_unknown = false;
        if !forced.must_disable() {
            self.enabled[i] = true;
            match self.decide(kind, i + 1, range.clone(), stage)? {
                Answer::Neq => return Ok(Answer::Neq),
                Answer::Timeout => return Ok(Answer::Timeout),
                Answer::Eq => any_eq = true,
                Answer::Unknown => any_unknown = true,
            }
        }
        if !forced.must_enable() {
            self.enabled[i] = false;
            let answer = self.decide(kind, i + 1, range, stage)?;
            self.enabled[i] = true;
            match answer {
                Answer::Timeout => return Ok(Answer::Timeout),
                Answer::Eq => any_eq = true,
                Answer::Unknown => any_unknown = true,
                Answer::Neq => {}
            }
        }
        Ok(if any_eq {
            Answer::Eq
        } else if any_unknown {
            Answer::Unknown
        } else {
            Answer::Neq
        })
    }

    fn forced_of(&self, kind: ConstraintKind, i: usize, begin: usize) -> Forced {
        let symbols = self.index[i].symbols();
        if !self.conforms(symbols) {
            return Forced::MUST_DISABLE;
        }
        let mut forced = Forced::FREE;
        if kind == ConstraintKind::Reference && self.is_eq(symbols[1], symbols[3]) {
            forced |= Forced::MUST_ENABLE;
        }
        for j in begin..i {
            let earlier = self.index[j].symbols();
            if !self.conforms(earlier) {
                continue;
            }
            let implied = earlier
                .iter()
                .zip(symbols)
                .skip(1)
                .step_by(2)
                .all(|(&a, &b)| self.is_eq(a, b));
            if implied {
                forced |= if self.enabled[j] {
                    Forced::MUST_ENABLE
                } else {
                    Forced::MUST_DISABLE
                };
            }
        }
        forced
    }

    /// Every attrs is currently drawn from the table named next to it.
    fn conforms(&self, symbols: &[Symbol]) -> bool {
        symbols
            .chunks(2)
            .all(|pair| self.current_source_of(pair[1]) == Some(pair[0]))
    }

    // ========================================================================
    // Verifier
    // ========================================================================

    fn verify(&mut self) -> Result<Answer, EnumerateError> {
        self.stats.leaves += 1;
        if self.config.is_dry_run() {
            self.remember_eq();
            return Ok(Answer::Eq);
        }
        if self.known_eqs.iter().any(|eq| {
            matches!(
                compare_bools(eq, &self.enabled),
                PartialOrder::LessThan | PartialOrder::Same
            )
        }) {
            self.stats.cache_hits += 1;
            return Ok(Answer::Eq);
        }
        if self.known_neqs.iter().any(|neq| {
            matches!(
                compare_bools(neq, &self.enabled),
                PartialOrder::GreaterThan | PartialOrder::Same
            )
        }) {
            self.stats.cache_hits += 1;
            return Ok(Answer::Neq);
        }

        let rule = self.index.make_rule(&self.enabled);
        let Some(prepared) = self.prepare(&rule)? else {
            return Ok(Answer::Unknown);
        };
        let ctx = OracleContext {
            facts: &prepared.facts,
            free_vars: &prepared.free_vars,
        };
        self.stats.oracle_calls += 1;
        let verdict = self.oracle.prove_eq(&prepared.left, &prepared.right, &ctx)?;
        tracing::debug!(rule = %rule, ?verdict, "oracle verdict");
        Ok(match verdict {
            Verdict::Eq => {
                self.remember_eq();
                Answer::Eq
            }
            Verdict::Neq => {
                self.remember_neq();
                Answer::Neq
            }
            Verdict::Unknown => Answer::Unknown,
        })
    }

    /// Instantiate, translate and normalize both sides of `rule`.
    ///
    /// `None` when the rule cannot be turned into plans or U-expressions.
    fn prepare(&self, rule: &Substitution) -> Result<Option<Prepared>, EnumerateError> {
        let (source, target, facts) = match rule.instantiate() {
            Ok(plans) => plans,
            Err(err) => {
                tracing::debug!(rule = %rule, error = %err, "instantiation failed");
                return Ok(None);
            }
        };
        let (left, right) = match (translate(&source), translate(&target)) {
            (Ok(left), Ok(right)) => (left, right),
            (Err(err), _) | (_, Err(err)) => {
                tracing::debug!(rule = %rule, error = %err, "translation failed");
                return Ok(None);
            }
        };

        let mut free_vars: Vec<Var> = left.free_vars.clone();
        for v in &right.free_vars {
            if !free_vars.contains(v) {
                free_vars.push(v.clone());
            }
        }

        let mut left = normalize_with_facts(&left.expr, &facts)?;
        let mut right = normalize_with_facts(&right.expr, &facts)?;
        if self.config.canonicalize {
            let consts = ConstantTuples::new(free_vars.iter().cloned());
            left = canonicalize(left, &facts, &consts)?;
            right = canonicalize(right, &facts, &consts)?;
        }
        Ok(Some(Prepared {
            left,
            right,
            facts,
            free_vars,
        }))
    }

    fn remember_eq(&mut self) {
        let enabled = &self.enabled;
        self.known_eqs
            .retain(|eq| compare_bools(eq, enabled) != PartialOrder::GreaterThan);
        if !self.known_eqs.iter().any(|eq| eq == enabled) {
            self.known_eqs.push(enabled.clone());
        }
    }

    fn remember_neq(&mut self) {
        let enabled = &self.enabled;
        self.known_neqs
            .retain(|neq| compare_bools(neq, enabled) != PartialOrder::LessThan);
        if !self.known_neqs.iter().any(|neq| neq == enabled) {
            self.known_neqs.push(enabled.clone());
        }
    }
}

struct Prepared {
    left: Disjunction,
    right: Disjunction,
    facts: SchemaFacts,
    free_vars: Vec<Var>,
}

fn normalize_with_facts(
    expr: &UExpr,
    facts: &SchemaFacts,
) -> Result<Disjunction, NormalFormError> {
    normalize(&apply_foreign_key(expr, facts))
}

/// Table occurrences per name, maximized over the top-level conjunctions.
fn table_multiset(d: &Disjunction) -> AHashMap<String, usize> {
    let mut out: AHashMap<String, usize> = AHashMap::new();
    for conjunction in d.conjunctions() {
        let mut counts: AHashMap<&str, usize> = AHashMap::new();
        for table in conjunction.tables() {
            if let UExpr::Table { name, .. } = table {
                *counts.entry(name.as_str()).or_insert(0) += 1;
            }
        }
        for (name, n) in counts {
            let slot = out.entry(name.to_string()).or_insert(0);
            *slot = (*slot).max(n);
        }
    }
    out
}

fn is_sub_multiset(a: &AHashMap<String, usize>, b: &AHashMap<String, usize>) -> bool {
    a.iter()
        .all(|(name, &n)| b.get(name).map_or(false, |&m| n <= m))
}

/// Set partitions of `0..n` as restricted growth strings, starting from
/// the single block.
struct Partitioner {
    blocks: Vec<usize>,
}

impl Partitioner {
    fn new(n: usize) -> Self {
        Partitioner {
            blocks: vec![0; n],
        }
    }

    fn same_block(&self, i: usize, j: usize) -> bool {
        self.blocks[i] == self.blocks[j]
    }

    fn advance(&mut self) -> bool {
        for i in (1..self.blocks.len()).rev() {
            let max_prefix = self.blocks[..i].iter().copied().max().unwrap_or(0);
            if self.blocks[i] <= max_prefix {
                self.blocks[i] += 1;
                self.blocks[i + 1..].fill(0);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::IsomorphismOracle;

    fn index(source: &str, target: &str) -> ConstraintsIndex {
        let mut naming = SymbolNaming::new();
        let s = Fragment::parse(source, Side::Source, &mut naming).unwrap();
        let t = Fragment::parse(target, Side::Target, &mut naming).unwrap();
        ConstraintsIndex::build(&s, &t, &naming)
    }

    #[test]
    fn partitioner_visits_every_partition_once() {
        let mut p = Partitioner::new(4);
        let mut seen = vec![p.blocks.clone()];
        while p.advance() {
            seen.push(p.blocks.clone());
        }
        assert_eq!(seen.len(), 15);
        assert_eq!(seen[0], vec![0, 0, 0, 0]);
        assert_eq!(seen.last().unwrap(), &vec![0, 1, 2, 3]);
        let mut dedup = seen.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 15);
    }

    #[test]
    fn forced_flags_combine() {
        assert_eq!(Forced::MUST_ENABLE | Forced::MUST_DISABLE, Forced::CONFLICT);
        assert!(Forced::CONFLICT.must_enable() && Forced::CONFLICT.must_disable());
        assert!(!Forced::FREE.must_enable());
    }

    #[test]
    fn remembered_eq_covers_supersets() {
        let idx = index("Filter<p0 a0>(Input<t0>)", "Filter<p1 a1>(Input<t1>)");
        let config = EnumeratorConfig::default();
        let oracle = IsomorphismOracle;
        let mut search = Search::new(&idx, &config, &oracle);
        search.known_eqs.push(vec![true, true, true, true, false, false]);
        search.enabled = vec![true, true, true, true, true, false];

        assert_eq!(search.verify().unwrap(), Answer::Eq);
        assert_eq!(search.stats.cache_hits, 1);
        assert_eq!(search.stats.oracle_calls, 0);
    }

    #[test]
    fn remembered_neq_covers_subsets() {
        let idx = index("Filter<p0 a0>(Input<t0>)", "Filter<p1 a1>(Input<t1>)");
        let config = EnumeratorConfig::default();
        let oracle = IsomorphismOracle;
        let mut search = Search::new(&idx, &config, &oracle);
        search.known_neqs.push(vec![true, true, false, true, true, true]);
        search.enabled = vec![true, true, false, true, false, true];

        assert_eq!(search.verify().unwrap(), Answer::Neq);
        assert_eq!(search.stats.oracle_calls, 0);
    }

    #[test]
    fn remembering_prunes_dominated_entries() {
        let idx = index("Filter<p0 a0>(Input<t0>)", "Filter<p1 a1>(Input<t1>)");
        let config = EnumeratorConfig::default();
        let oracle = IsomorphismOracle;
        let mut search = Search::new(&idx, &config, &oracle);
        search.enabled = vec![true; 6];
        search.remember_eq();
        search.enabled[5] = false;
        search.remember_eq();
        assert_eq!(search.known_eqs, vec![vec![true, true, true, true, true, false]]);
    }

    #[test]
    fn multiset_inclusion() {
        let mut a = AHashMap::new();
        a.insert("r0".to_string(), 1);
        let mut b = a.clone();
        b.insert("r1".to_string(), 2);
        assert!(is_sub_multiset(&a, &b));
        assert!(!is_sub_multiset(&b, &a));
        a.insert("r0".to_string(), 2);
        assert!(!is_sub_multiset(&a, &b));
    }
}
