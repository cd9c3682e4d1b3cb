use equirule_search::{compare_bools, PartialOrder};
use proptest::prelude::*;

fn pair_strategy() -> impl Strategy<Value = (Vec<bool>, Vec<bool>)> {
    (0usize..12).prop_flat_map(|n| {
        (
            prop::collection::vec(any::<bool>(), n),
            prop::collection::vec(any::<bool>(), n),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn same_is_reflexive(a in prop::collection::vec(any::<bool>(), 0..12)) {
        prop_assert_eq!(compare_bools(&a, &a), PartialOrder::Same);
    }

    #[test]
    fn swapping_reverses((a, b) in pair_strategy()) {
        prop_assert_eq!(compare_bools(&b, &a), compare_bools(&a, &b).reverse());
    }

    #[test]
    fn greater_iff_pointwise_implication((a, b) in pair_strategy()) {
        let implies = a.iter().zip(&b).all(|(&x, &y)| x || !y);
        let expected = if a == b {
            PartialOrder::Same
        } else if implies {
            PartialOrder::GreaterThan
        } else if b.iter().zip(&a).all(|(&x, &y)| x || !y) {
            PartialOrder::LessThan
        } else {
            PartialOrder::Incomparable
        };
        prop_assert_eq!(compare_bools(&a, &b), expected);
    }

    #[test]
    fn enabling_more_is_greater((a, flip) in pair_strategy()) {
        let grown: Vec<bool> = a.iter().zip(&flip).map(|(&x, &f)| x || f).collect();
        let order = compare_bools(&grown, &a);
        prop_assert!(matches!(order, PartialOrder::GreaterThan | PartialOrder::Same));
    }
}
