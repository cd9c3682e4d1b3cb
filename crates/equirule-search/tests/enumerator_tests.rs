use equirule_search::{
    enumerate_pair, ConstraintEnumerator, ConstraintsIndex, EnumerateError, EnumeratorConfig,
    Fragment, IsomorphismOracle, LogicOracle, OracleContext, OracleError, Side, Substitution,
    SymbolNaming, Verdict,
};
use equirule_uexpr::Disjunction;
use std::sync::atomic::{AtomicUsize, Ordering};

const FILTER_SOURCE: &str = "Filter<p0 a0>(Input<t0>)";
const FILTER_TARGET: &str = "Filter<p1 a1>(Input<t1>)";
const FILTER_RULE: &str = "Filter<p0 a0>(Input<t0>)|Filter<p1 a1>(Input<t1>)|AttrsSub(a0,t0);TableEq(t0,t1);AttrsEq(a0,a1);PredicateEq(p0,p1)";

struct FixedOracle {
    verdict: Result<Verdict, OracleError>,
    calls: AtomicUsize,
}

impl FixedOracle {
    fn new(verdict: Result<Verdict, OracleError>) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LogicOracle for FixedOracle {
    fn prove_eq(
        &self,
        _left: &Disjunction,
        _right: &Disjunction,
        _ctx: &OracleContext<'_>,
    ) -> Result<Verdict, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict.clone()
    }
}

fn rule_texts(rules: &[Substitution]) -> Vec<String> {
    rules.iter().map(Substitution::to_text).collect()
}

#[test]
fn catalog_of_the_filter_pair() {
    let mut naming = SymbolNaming::new();
    let source = Fragment::parse(FILTER_SOURCE, Side::Source, &mut naming).unwrap();
    let target = Fragment::parse(FILTER_TARGET, Side::Target, &mut naming).unwrap();
    let index = ConstraintsIndex::build(&source, &target, &naming);
    let texts: Vec<String> = index
        .constraints()
        .iter()
        .map(|c| c.to_text(&naming))
        .collect();
    assert_eq!(
        texts,
        vec![
            "AttrsSub(a0,t0)",
            "TableEq(t0,t1)",
            "AttrsEq(a0,a1)",
            "PredicateEq(p0,p1)",
            "Unique(t0,a0)",
            "NotNull(t0,a0)",
        ]
    );
}

#[test]
fn eq_oracle_yields_the_minimal_rule() {
    let oracle = FixedOracle::new(Ok(Verdict::Eq));
    let outcome =
        enumerate_pair(FILTER_SOURCE, FILTER_TARGET, &EnumeratorConfig::default(), &oracle).unwrap();

    assert_eq!(oracle.calls(), 4);
    assert_eq!(outcome.stats.oracle_calls, 4);
    assert!(!outcome.timed_out);
    assert_eq!(rule_texts(&outcome.rules), vec![FILTER_RULE]);
}

#[test]
fn isomorphism_oracle_proves_the_predicate_substitution() {
    let outcome = enumerate_pair(
        FILTER_SOURCE,
        FILTER_TARGET,
        &EnumeratorConfig::default(),
        &IsomorphismOracle,
    )
    .unwrap();
    assert_eq!(rule_texts(&outcome.rules), vec![FILTER_RULE]);

    let reparsed = Substitution::parse(&outcome.rules[0].to_text()).unwrap();
    assert_eq!(reparsed.to_text(), FILTER_RULE);
}

#[test]
fn neq_at_the_strongest_leaf_prunes_everything() {
    let oracle = FixedOracle::new(Ok(Verdict::Neq));
    let outcome =
        enumerate_pair(FILTER_SOURCE, FILTER_TARGET, &EnumeratorConfig::default(), &oracle).unwrap();

    assert_eq!(oracle.calls(), 1);
    assert!(outcome.rules.is_empty());
}

#[test]
fn dry_run_skips_the_oracle() {
    let oracle = FixedOracle::new(Ok(Verdict::Neq));
    let config = EnumeratorConfig {
        dry_run: true,
        ..EnumeratorConfig::default()
    };
    let outcome = enumerate_pair(FILTER_SOURCE, FILTER_TARGET, &config, &oracle).unwrap();

    assert_eq!(oracle.calls(), 0);
    assert_eq!(outcome.stats.leaves, 4);
    assert_eq!(rule_texts(&outcome.rules), vec![FILTER_RULE]);
}

#[test]
fn zero_timeout_never_reaches_the_oracle() {
    let oracle = FixedOracle::new(Ok(Verdict::Eq));
    let config = EnumeratorConfig {
        timeout_ms: Some(0),
        ..EnumeratorConfig::default()
    };
    let outcome = enumerate_pair(FILTER_SOURCE, FILTER_TARGET, &config, &oracle).unwrap();

    assert_eq!(oracle.calls(), 0);
    assert!(outcome.timed_out);
    assert!(outcome.rules.is_empty());
}

#[test]
fn mismatched_output_arity_is_pruned() {
    let oracle = FixedOracle::new(Ok(Verdict::Eq));
    let outcome = enumerate_pair(
        "Proj<a0>(Input<t0>)",
        "Input<t1>",
        &EnumeratorConfig::default(),
        &oracle,
    )
    .unwrap();

    assert_eq!(oracle.calls(), 0);
    assert_eq!(outcome.stats.output_breaker_hits, 1);
    assert!(outcome.rules.is_empty());
}

#[test]
fn oracle_failures_abort_enumeration() {
    let oracle = FixedOracle::new(Err(OracleError::Backend("solver crashed".into())));
    let err = enumerate_pair(FILTER_SOURCE, FILTER_TARGET, &EnumeratorConfig::default(), &oracle)
        .unwrap_err();
    assert!(matches!(err, EnumerateError::Oracle(OracleError::Backend(_))));
    assert!(err.is_recoverable());
    assert_eq!(oracle.calls(), 1);
}

#[test]
fn wide_templates_are_rejected() {
    let wide = "Proj<a0>(Proj<a1>(Proj<a2>(Proj<a3>(Proj<a4>(Input<t0>)))))";
    let other = "Proj<a5>(Proj<a6>(Proj<a7>(Proj<a8>(Proj<a9>(Input<t1>)))))";
    let err = enumerate_pair(wide, other, &EnumeratorConfig::default(), &IsomorphismOracle)
        .unwrap_err();
    assert!(matches!(err, EnumerateError::TooManyAttrs { count: 10 }));
    assert!(err.is_recoverable());
}

#[test]
fn enumerator_reuses_a_prebuilt_index() {
    let mut naming = SymbolNaming::new();
    let source = Fragment::parse("Input<t0>", Side::Source, &mut naming).unwrap();
    let target = Fragment::parse("Input<t1>", Side::Target, &mut naming).unwrap();
    let index = ConstraintsIndex::build(&source, &target, &naming);
    let oracle = FixedOracle::new(Ok(Verdict::Eq));
    let enumerator = ConstraintEnumerator::new(&index, EnumeratorConfig::default(), &oracle);

    let first = enumerator.enumerate().unwrap();
    let second = enumerator.enumerate().unwrap();
    assert_eq!(rule_texts(&first.rules), vec!["Input<t0>|Input<t1>|TableEq(t0,t1)"]);
    assert_eq!(rule_texts(&first.rules), rule_texts(&second.rules));
    assert_eq!(oracle.calls(), 2);
}
