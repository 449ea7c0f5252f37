use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion,
    PlotConfiguration,
};
use std::time::Duration;

use adaptive_signal::control_system::solver::{AnnealingSolver, ExhaustiveSolver, SolverAdapter};
use adaptive_signal::data_structures::SignalMode;
use adaptive_signal::flow_analyzer::CostModel;

/// A six-mode model whose rewards grow with `load`.
fn model_for(load: f64) -> CostModel {
    let rewards: Vec<(SignalMode, f64)> = SignalMode::ALL
        .iter()
        .enumerate()
        .map(|(i, &mode)| (mode, load * (1.0 + i as f64 * 0.1)))
        .collect();
    CostModel::from_rewards(&rewards, 200.0)
}

fn bench_solvers(c: &mut Criterion) {
    let mut group = c.benchmark_group("Solver_Benchmarks");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(5));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &load in [5.0, 25.0, 60.0].iter() {
        let model = model_for(load);

        group.bench_with_input(BenchmarkId::new("exhaustive", load), &load, |b, &_load| {
            let mut solver = ExhaustiveSolver::default();
            b.iter(|| {
                let assignment = solver.solve(black_box(&model));
                black_box(assignment).ok();
            });
        });

        group.bench_with_input(BenchmarkId::new("annealing", load), &load, |b, &_load| {
            let mut solver = AnnealingSolver::default();
            b.iter(|| {
                let assignment = solver.solve(black_box(&model));
                black_box(assignment).ok();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_solvers);
criterion_main!(benches);
