//! Search benchmarks for performance profiling.
//!
//! Run with: `cargo bench -p uct`
//!
//! Measures full searches at varying game budgets and thread counts, and
//! the raw playout rate of the Go state.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use games_go::{GoBoard, GoStateFactory, GoStateParam};
use uct::state::{SearchState, StateFactory};
use uct::{PriorMode, SearchConfig, UctSearch};

fn go_factory(size: usize, seed: u64) -> GoStateFactory {
    GoStateFactory::new(
        GoBoard::new(size, 6.5),
        GoStateParam::default(),
        PriorMode::None,
        seed,
    )
}

fn bench_search_games(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_games");
    for games in [200u64, 1000, 5000] {
        group.throughput(Throughput::Elements(games));
        group.bench_with_input(BenchmarkId::new("9x9", games), &games, |b, &games| {
            let config = SearchConfig::for_board_size(9).with_max_nodes(200_000);
            let mut search = UctSearch::new(go_factory(9, 42), config).unwrap();
            let mut sequence = Vec::new();
            b.iter(|| {
                black_box(search.search(games, f64::MAX, &mut sequence, &[], None, None))
            });
        });
    }
    group.finish();
}

fn bench_search_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_threads");
    let games = 2000u64;
    for threads in [1usize, 2, 4] {
        group.throughput(Throughput::Elements(games));
        group.bench_with_input(
            BenchmarkId::new("lock_free", threads),
            &threads,
            |b, &threads| {
                let config = SearchConfig::for_board_size(9)
                    .with_max_nodes(200_000)
                    .with_threads(threads)
                    .with_lock_free(true);
                let mut search = UctSearch::new(go_factory(9, 42), config).unwrap();
                let mut sequence = Vec::new();
                b.iter(|| {
                    black_box(search.search(games, f64::MAX, &mut sequence, &[], None, None))
                });
            },
        );
    }
    group.finish();
}

fn bench_playout(c: &mut Criterion) {
    let mut group = c.benchmark_group("playout");
    for size in [9usize, 19] {
        group.bench_with_input(BenchmarkId::new("random", size), &size, |b, &size| {
            let factory = go_factory(size, 7);
            let mut state = factory.create(0);
            state.start_search();
            b.iter(|| {
                state.game_start();
                state.start_playouts();
                state.start_playout();
                let mut moves = 0usize;
                loop {
                    let decision = state.generate_playout_move();
                    let Some(mv) = decision.mv else { break };
                    state.execute_playout(mv).unwrap();
                    moves += 1;
                    if moves >= 3 * size * size {
                        break;
                    }
                }
                let eval = state.evaluate();
                state.take_back_playout(moves);
                black_box(eval)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_search_games, bench_search_threads, bench_playout);
criterion_main!(benches);
