//! Benchmarks for the genetic operators.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use fiber_align::{
    compute::optimizer::{BreedingParams, OperatorRng, PopulationPair},
    schema::{Axis, EndpointSpace, SearchSpace},
};

fn full_space() -> SearchSpace {
    let endpoint = EndpointSpace {
        variables: Axis::ALL.to_vec(),
        ..Default::default()
    };
    SearchSpace {
        a: endpoint.clone(),
        b: endpoint,
    }
}

fn bench_breed(c: &mut Criterion) {
    let mut group = c.benchmark_group("breed");
    let space = full_space();

    for size in [20, 30, 100, 500] {
        let mut rng = OperatorRng::new(42);
        let population = PopulationPair::initialize(&space, size, &mut rng).unwrap();
        let fitness: Vec<f64> = (0..size).map(|i| i as f64 / size as f64).collect();
        let params = BreedingParams {
            population_size: size,
            elite_size: 4,
            tournament_size: 3,
            mutation_rate: 0.15,
            gene_crossover_rate: 0.8,
            chromosome_crossover_rate: 0.2,
        };

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                rng.breed(black_box(&population), black_box(&fitness), &space, &params)
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_mutate(c: &mut Criterion) {
    let space = full_space();
    let mut rng = OperatorRng::new(7);
    let mut individual = rng.random_individual(&space.a);

    c.bench_function("mutate", |b| {
        b.iter(|| rng.mutate(black_box(&mut individual), &space.a, 0.7));
    });
}

fn bench_tournament(c: &mut Criterion) {
    let mut group = c.benchmark_group("tournament_select");

    for k in [2, 3, 8] {
        let mut rng = OperatorRng::new(3);
        let fitness: Vec<f64> = (0..100).map(|i| ((i * 37) % 100) as f64).collect();

        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            b.iter(|| rng.tournament_select(black_box(&fitness), k).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_breed, bench_mutate, bench_tournament);
criterion_main!(benches);
