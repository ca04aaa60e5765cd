mod common;

use common::{fill, hubbard, op, trace_with};
use impurity_trace::{OpDesc, TimePoint};

const N: usize = 256;
const BETA: f64 = 10.0;

fn populated() -> impurity_trace::ImpurityTrace<impurity_trace::BlockDiag> {
    let ops: Vec<(f64, OpDesc)> = (0..N)
        .map(|i| {
            let tau = (i as f64 + 0.5) * BETA / N as f64;
            (tau, op(i % 2, (i / 2) % 2 == 0))
        })
        .collect();
    let mut trace = trace_with(hubbard(2, 0.3, 1.0), BETA, false);
    fill(&mut trace, &ops);
    trace
}

#[test]
fn confirmed_insertion_refreshes_one_path() {
    let mut trace = populated();
    let height = trace.tree().height();

    trace
        .try_insert(TimePoint::new(BETA * 0.37), op(0, true))
        .unwrap();
    trace.confirm_insert().unwrap();

    let visits = trace.refresh_stats().last_refresh_visits;
    assert!(visits >= 1);
    assert!(
        visits <= 4 * (height + 1),
        "{visits} nodes refreshed for height {height}"
    );
    assert!(visits < N / 4, "{visits} nodes refreshed out of {N}");
    assert!(trace.check_cache_integrity().is_ok());
}

#[test]
fn confirmed_deletion_refreshes_one_path() {
    let mut trace = populated();
    let height = trace.tree().height();

    let available = trace.count_matching(1, false);
    trace.try_delete(available / 2, 1, false).unwrap();
    trace.confirm_delete().unwrap();

    let visits = trace.refresh_stats().last_refresh_visits;
    assert!(visits >= 1);
    assert!(
        visits <= 4 * (height + 1),
        "{visits} nodes refreshed for height {height}"
    );
    assert!(visits < N / 4, "{visits} nodes refreshed out of {N}");
    assert_eq!(trace.tree_size(), N - 1);
    assert!(trace.check_cache_integrity().is_ok());
}

#[test]
fn cancelled_moves_leave_no_refresh_work() {
    let mut trace = populated();
    let refreshes = trace.refresh_stats().refreshes;

    trace
        .try_insert(TimePoint::new(BETA * 0.61), op(1, true))
        .unwrap();
    trace.compute(-1.0, 0.0).unwrap();
    trace.cancel_insert().unwrap();

    assert_eq!(trace.refresh_stats().refreshes, refreshes);
    assert!(trace.tree().iter().all(|id| !trace.tree().node(id).is_modified()));
}
