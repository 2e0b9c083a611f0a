use criterion::{Criterion, black_box, criterion_group, criterion_main};
use timeshift::{
    Timestamp,
    timeshift::controller::{RateController, rate_delay},
};

fn bench_rate_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_delay");
    for &rate in &[500, 1000, 1500, 4000] {
        group.bench_function(format!("rate_{rate}"), |b| {
            b.iter(|| rate_delay(black_box(3_600_000_000), rate, 1000))
        });
    }
    group.finish();
}

fn bench_deadlines(c: &mut Criterion) {
    c.bench_function("deadline_backlog_1000", |b| {
        b.iter(|| {
            let mut controller = RateController::default();
            controller.set_paused(true, Timestamp::ZERO);
            controller.set_paused(false, Timestamp::from_millis(600));
            controller.set_rate(1000, 2000);
            let mut last = Timestamp::ZERO;
            for frame in 0..1000 {
                last = controller.deadline(Timestamp::from_millis(frame * 40)).at;
            }
            black_box(last)
        })
    });
}

criterion_group!(benches, bench_rate_delay, bench_deadlines);
criterion_main!(benches);
