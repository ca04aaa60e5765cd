//! Trace evaluation and move benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use impurity_trace::{BlockDiag, ImpurityTrace, OpDesc, TimePoint, TraceConfig};

const BETA: f64 = 20.0;

fn populated(n_ops: usize) -> ImpurityTrace<BlockDiag> {
    let diag = BlockDiag::density_density(3, &[-0.5, -0.5, -0.5], 2.0).expect("valid atom");
    let mut trace = ImpurityTrace::new(TraceConfig::new(BETA, 3), diag).expect("trace");
    for i in 0..n_ops {
        let tau = (i as f64 + 0.5) * BETA / n_ops as f64;
        let orbital = i % 3;
        let op = if (i / 3) % 2 == 0 {
            OpDesc::creation(orbital)
        } else {
            OpDesc::annihilation(orbital)
        };
        trace.try_insert(TimePoint::new(tau), op).expect("insert");
        trace.confirm_insert().expect("confirm");
    }
    trace
}

fn bench_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute");
    for n_ops in [12, 48, 192] {
        let mut trace = populated(n_ops);
        group.bench_with_input(BenchmarkId::from_parameter(n_ops), &n_ops, |b, _| {
            b.iter(|| black_box(trace.compute(-1.0, 0.0).expect("compute")));
        });
    }
    group.finish();
}

fn bench_try_cancel_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("try_cancel_insert");
    for n_ops in [12, 48, 192] {
        let mut trace = populated(n_ops);
        let t1 = TimePoint::new(BETA * 0.3141);
        let t2 = TimePoint::new(BETA * 0.7182);
        group.bench_with_input(BenchmarkId::from_parameter(n_ops), &n_ops, |b, _| {
            b.iter(|| {
                trace.try_insert(t1, OpDesc::creation(0)).expect("insert");
                trace.try_insert(t2, OpDesc::annihilation(0)).expect("insert");
                let result = trace.compute(-1.0, 0.0).expect("compute");
                trace.cancel_insert().expect("cancel");
                black_box(result)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compute, bench_try_cancel_insert);
criterion_main!(benches);
