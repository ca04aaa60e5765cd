mod common;

use common::{fill, hopping_dimer, hubbard_levels, linear_trace, op, trace_with};
use impurity_trace::{
    AtomDiag, BlockDiag, ImpurityTrace, OpDesc, Resolution, TimePoint, TraceConfig, TraceError,
};
use proptest::prelude::*;

const BETA: f64 = 5.0;

#[derive(Debug, Clone)]
enum Action {
    Insert {
        tau: f64,
        orbital: usize,
        dagger: bool,
        confirm: bool,
    },
    Delete {
        pick: f64,
        orbital: usize,
        dagger: bool,
        confirm: bool,
    },
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (0.0..BETA, 0usize..2, any::<bool>(), any::<bool>()).prop_map(
            |(tau, orbital, dagger, confirm)| Action::Insert { tau, orbital, dagger, confirm }
        ),
        1 => (0.0..1.0f64, 0usize..2, any::<bool>(), any::<bool>()).prop_map(
            |(pick, orbital, dagger, confirm)| Action::Delete { pick, orbital, dagger, confirm }
        ),
    ]
}

fn check_against_reference(
    trace: &mut ImpurityTrace<BlockDiag>,
    ops: &[(f64, OpDesc)],
) -> Result<(), TestCaseError> {
    let (bound, value) = trace.compute(-1.0, 0.0).expect("compute succeeds");
    let (expected, abs_sum) = linear_trace(trace.diag(), BETA, ops);
    let tolerance = 1e-9 * abs_sum.max(1.0);
    prop_assert!(
        (value - expected).abs() <= tolerance,
        "trace {} but reference {}",
        value,
        expected
    );
    prop_assert!(bound >= value.abs() * (1.0 - 1e-12));
    prop_assert!(bound >= expected.abs() * (1.0 - 1e-12));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_moves_keep_tree_and_cache_consistent(
        actions in proptest::collection::vec(action(), 1..40)
    ) {
        let mut trace = trace_with(hopping_dimer(0.6, 1.2), BETA, false);
        let mut model: Vec<(f64, OpDesc)> = Vec::new();

        for action in actions {
            match action {
                Action::Insert { tau, orbital, dagger, confirm } => {
                    let o = op(orbital, dagger);
                    match trace.try_insert(TimePoint::new(tau), o) {
                        Err(TraceError::DuplicateKey(_)) => continue,
                        other => other.expect("insertion accepted"),
                    }
                    let mut trial = model.clone();
                    trial.push((tau, o));
                    check_against_reference(&mut trace, &trial)?;
                    if confirm {
                        trace.confirm_insert().expect("confirm");
                        model = trial;
                    } else {
                        trace.cancel_insert().expect("cancel");
                    }
                }
                Action::Delete { pick, orbital, dagger, confirm } => {
                    let available = trace.count_matching(orbital, dagger);
                    if available == 0 {
                        continue;
                    }
                    let n = ((pick * available as f64) as usize).min(available - 1);
                    let key = trace.try_delete(n, orbital, dagger).expect("deletion accepted");
                    let trial: Vec<(f64, OpDesc)> = model
                        .iter()
                        .copied()
                        .filter(|&(tau, _)| TimePoint::new(tau) != key)
                        .collect();
                    check_against_reference(&mut trace, &trial)?;
                    if confirm {
                        trace.confirm_delete().expect("confirm");
                        model = trial;
                    } else {
                        trace.cancel_delete().expect("cancel");
                    }
                }
            }

            let keys: Vec<f64> = trace.keys().iter().map(|k| k.value()).collect();
            let mut expected: Vec<f64> = model.iter().map(|&(tau, _)| tau).collect();
            expected.sort_by(f64::total_cmp);
            prop_assert_eq!(keys, expected);
            prop_assert!(trace.tree().is_balanced());
            prop_assert_eq!(trace.tree_size(), model.len());
            prop_assert!(trace.check_cache_integrity().is_ok());
        }
        check_against_reference(&mut trace, &model)?;
    }

    #[test]
    fn unthresholded_bound_walk_agrees_with_resolve(
        taus in proptest::collection::vec((0.0..BETA, 0usize..2, any::<bool>()), 1..30)
    ) {
        let mut trace = trace_with(hopping_dimer(0.6, 1.2), BETA, false);
        for (tau, orbital, dagger) in taus {
            if trace.try_insert(TimePoint::new(tau), op(orbital, dagger)).is_ok() {
                trace.confirm_insert().expect("confirm");
            }
        }
        // one pending insertion so modified nodes are exercised as well
        let _ = trace.try_insert(TimePoint::new(BETA * 0.5 + 1e-7), op(0, true));

        let ids: Vec<_> = trace.tree().iter().collect();
        for id in ids {
            for b in 0..3 {
                let plain = trace.resolve_node(id, b);
                let bounded = trace.resolve_node_with_bound(id, b, f64::INFINITY, false);
                prop_assert!(bounded != Resolution::Pruned);
                prop_assert_eq!(plain, bounded.block());
            }
        }
    }
}

/// Operators in creation/annihilation pairs per orbital, at distinct times
fn paired_ops() -> impl Strategy<Value = Vec<(f64, OpDesc)>> {
    proptest::collection::vec((0.0..BETA, 0.0..BETA, 0usize..2), 1..6).prop_map(|pairs| {
        let mut ops: Vec<(f64, OpDesc)> = Vec::new();
        for (t1, t2, orbital) in pairs {
            if t1 == t2 || ops.iter().any(|&(t, _)| t == t1 || t == t2) {
                continue;
            }
            ops.push((t1, op(orbital, true)));
            ops.push((t2, op(orbital, false)));
        }
        ops
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pruning_on_wide_spectra_stays_within_tolerance(
        levels in proptest::collection::vec(-5.0..5.0f64, 2),
        u in -20.0..20.0f64,
        ops in paired_ops(),
    ) {
        let epsilon = 1e-3;
        let config = TraceConfig {
            prune_epsilon: epsilon,
            ..TraceConfig::new(BETA, 2)
        };
        let mut trace = ImpurityTrace::new(config, hubbard_levels(&levels, u))
            .expect("trace initialises");
        fill(&mut trace, &ops);

        let (bound, value) = trace.compute(-1.0, 0.0).expect("compute succeeds");
        let (expected, abs_sum) = linear_trace(trace.diag(), BETA, &ops);
        let n_blocks = trace.diag().n_blocks() as f64;

        // one-dimensional blocks: every block bound is its exact |trace|, so
        // pruning drops at most epsilon of the largest term per block
        let tolerance = (n_blocks + 2.0) * epsilon * abs_sum + 1e-9 * abs_sum;
        prop_assert!(
            (value - expected).abs() <= tolerance,
            "trace {} but reference {}",
            value,
            expected
        );
        prop_assert!(bound * (1.0 + n_blocks * epsilon) * (1.0 + 1e-9) >= expected.abs());
    }
}
