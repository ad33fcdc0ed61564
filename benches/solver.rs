//! Benchmarks for the sparse LU solver.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nodal_core::solver::SparseSolver;
use nodal_core::sparse::{ElementId, VectorId};

/// Resistor ladder: 1 mS between neighbours, 0.5 mS to ground at every node
/// and 1 mA injected into the first node.
struct Ladder {
    solver: SparseSolver,
    stamps: Vec<(ElementId, f64)>,
    injection: VectorId,
}

impl Ladder {
    fn new(nodes: usize) -> Self {
        let mut solver = SparseSolver::new();
        let mut stamps = Vec::new();
        let g = 1e-3;
        for k in 1..=nodes {
            let shunt = if k < nodes { 0.5 * g } else { g };
            stamps.push((solver.get_element(k, k), shunt));
            if k > 1 {
                stamps.push((solver.get_element(k, k), g));
                stamps.push((solver.get_element(k - 1, k - 1), g));
                stamps.push((solver.get_element(k - 1, k), -g));
                stamps.push((solver.get_element(k, k - 1), -g));
            }
        }
        let injection = solver.get_rhs_element(1);
        let mut ladder = Self {
            solver,
            stamps,
            injection,
        };
        ladder.load();
        ladder
    }

    fn load(&mut self) {
        self.solver.reset();
        for &(id, value) in &self.stamps {
            self.solver.add(id, value);
        }
        self.solver.add_rhs(self.injection, 1e-3);
    }
}

fn bench_order_and_factor(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_and_factor");

    for nodes in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &nodes, |bencher, &nodes| {
            let mut ladder = Ladder::new(nodes);
            bencher.iter(|| {
                ladder.load();
                ladder.solver.request_reordering();
                black_box(ladder.solver.order_and_factor())
            });
        });
    }

    group.finish();
}

fn bench_factor_and_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("factor_and_solve");

    for nodes in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &nodes, |bencher, &nodes| {
            let mut ladder = Ladder::new(nodes);
            ladder.solver.order_and_factor();
            let mut solution = vec![0.0; nodes + 1];
            bencher.iter(|| {
                ladder.load();
                if ladder.solver.factor() {
                    ladder.solver.solve(black_box(&mut solution)).ok();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_order_and_factor, bench_factor_and_solve);
criterion_main!(benches);
