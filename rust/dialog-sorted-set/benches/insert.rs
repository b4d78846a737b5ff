use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use dialog_sorted_set::SortedSet;
use rand::{Rng, SeedableRng, rngs::StdRng};

const BENCH_SEED: u64 = 42;

fn random_keys(rng: &mut StdRng, size: usize) -> Vec<u64> {
    (0..size).map(|_| rng.r#gen()).collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    let mut rng = StdRng::seed_from_u64(BENCH_SEED);

    for size in [10, 100, 1000, 10000] {
        let keys = random_keys(&mut rng, size);

        group.bench_with_input(BenchmarkId::new("persistent", size), &keys, |b, keys| {
            b.iter(|| {
                let mut set = SortedSet::<u64>::new();
                for key in keys {
                    set = set.insert(*key).unwrap();
                }
                set
            });
        });

        group.bench_with_input(BenchmarkId::new("transient", size), &keys, |b, keys| {
            b.iter(|| {
                let mut batch = SortedSet::<u64>::new().as_transient().unwrap();
                for key in keys {
                    batch.conj(*key).unwrap();
                }
                batch.persistent().unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert);
criterion_main!(benches);
