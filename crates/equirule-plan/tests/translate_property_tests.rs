use equirule_plan::{translate, JoinKind, Plan, Predicate, ProjItem, ScalarExpr, ROOT_VAR_NAME};
use equirule_uexpr::{normalize, Var};
use proptest::prelude::*;

const ALIAS: &str = "r";

fn col(c: &str) -> ScalarExpr {
    ScalarExpr::column(ALIAS, c)
}

#[derive(Debug, Clone)]
enum Step {
    CallFilter(&'static str, &'static str),
    ConstFilter(&'static str),
    SelfEq,
    Distinct,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    let column = prop_oneof![Just("a"), Just("b")];
    prop_oneof![
        (prop_oneof![Just("p"), Just("q")], column.clone()).prop_map(|(p, c)| Step::CallFilter(p, c)),
        column.prop_map(Step::ConstFilter),
        Just(Step::SelfEq),
        Just(Step::Distinct),
    ]
}

/// A chain of filters over one input, closed by a projection of `a`.
fn build(steps: &[Step], distinct_root: bool) -> Plan {
    let mut plan = Plan::input("R", ALIAS, vec!["a".into(), "b".into()]);
    let mut seen_distinct = false;
    for step in steps {
        plan = match step {
            Step::CallFilter(p, c) => Plan::filter(plan, Predicate::call(*p, vec![col(c)])),
            Step::ConstFilter(c) => {
                Plan::filter(plan, Predicate::eq(col(c), ScalarExpr::literal("1")))
            }
            Step::SelfEq => Plan::filter(plan, Predicate::eq(col("a"), col("b"))),
            Step::Distinct => {
                seen_distinct = true;
                plan
            }
        };
    }
    Plan::proj(
        plan,
        vec![ProjItem::new(col("a"), "a")],
        distinct_root || seen_distinct,
        "out",
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn only_the_root_var_escapes(steps in prop::collection::vec(step_strategy(), 0..6), distinct in any::<bool>()) {
        let t = translate(&build(&steps, distinct)).expect("filter chains translate");
        prop_assert_eq!(t.free_vars, vec![Var::base(ROOT_VAR_NAME)]);
    }

    #[test]
    fn translations_normalize(steps in prop::collection::vec(step_strategy(), 0..6), distinct in any::<bool>()) {
        let t = translate(&build(&steps, distinct)).expect("filter chains translate");
        let d = normalize(&t.expr).expect("translations normalize");
        prop_assert!(!d.is_empty());
    }

    #[test]
    fn translation_is_deterministic(steps in prop::collection::vec(step_strategy(), 0..6)) {
        let plan = build(&steps, false);
        prop_assert_eq!(translate(&plan), translate(&plan));
    }
}

#[test]
fn left_join_normalizes_to_two_conjunctions() {
    let plan = Plan::proj(
        Plan::join(
            JoinKind::Left,
            Plan::input("R", "r", vec!["a".into()]),
            Plan::input("S", "s", vec!["a".into()]),
            Some(Predicate::eq(
                ScalarExpr::column("r", "a"),
                ScalarExpr::column("s", "a"),
            )),
        ),
        vec![ProjItem::new(ScalarExpr::column("r", "a"), "a")],
        false,
        "out",
    );
    let t = translate(&plan).unwrap();
    let d = normalize(&t.expr).unwrap();
    assert_eq!(d.len(), 2);
    assert!(d.conjunctions().iter().any(|c| c.negation().is_some()));
}

#[test]
fn exists_subquery_ignores_projection_items() {
    let sub = Plan::proj(
        Plan::filter(
            Plan::input("S", "s", vec!["a".into()]),
            Predicate::eq(ScalarExpr::column("s", "a"), ScalarExpr::column("r", "a")),
        ),
        vec![ProjItem::new(ScalarExpr::column("s", "a"), "a")],
        false,
        "sub",
    );
    let plan = Plan::ExistsFilter {
        input: Box::new(Plan::input("R", "r", vec!["a".into()])),
        subquery: Box::new(sub),
    };
    let t = translate(&plan).unwrap();
    assert_eq!(
        t.expr.to_string(),
        "R(t) * ||Sum{t0}([t0.a = t.a] * [NotNull(t.a)] * S(t0))||"
    );
}

#[test]
fn in_subquery_needs_left_columns() {
    let plan = Plan::in_sub_filter(
        Plan::input("R", "r", vec!["a".into()]),
        vec![],
        Plan::input("S", "s", vec!["a".into()]),
    );
    assert_eq!(translate(&plan), Err(equirule_plan::TranslateError::EmptyJoints));
}
