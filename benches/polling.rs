use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use taskmon::{
    EventBus, ManualScheduler, MonitorEvent, MonitorStatus, MonitoringContext, MonitoringService,
};

const MONITORS: usize = 256;

fn manual_service() -> (MonitoringService<u64>, Arc<ManualScheduler>, Arc<AtomicUsize>) {
    let scheduler = Arc::new(ManualScheduler::new());
    let bus = Arc::new(EventBus::new());
    let completed = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&completed);
    bus.register(move |_: &MonitorEvent<u64>| {
        c.fetch_add(1, Ordering::Relaxed);
    });
    let ctx = MonitoringContext::new(scheduler.clone(), bus, Duration::from_millis(1));
    (MonitoringService::new(ctx), scheduler, completed)
}

fn bench_tick_continue(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_throughput");
    group.throughput(Throughput::Elements(MONITORS as u64));

    // Every tick polls and keeps going, so each round measures pure dispatch.
    group.bench_function("continue_round", |b| {
        let (service, scheduler, _) = manual_service();
        service
            .monitor(|_: &u64| MonitorStatus::Continue, 0..MONITORS as u64)
            .unwrap();
        b.iter(|| scheduler.run_pending());
    });

    group.finish();
}

fn bench_tick_to_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_throughput");
    group.throughput(Throughput::Elements(MONITORS as u64));

    // Start, tick once, publish and cancel: the full life of a monitor.
    group.bench_function("complete_round", |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            for _ in 0..iters {
                let (service, scheduler, completed) = manual_service();
                let start = Instant::now();
                service
                    .monitor(|_: &u64| MonitorStatus::Done, 0..MONITORS as u64)
                    .unwrap();
                scheduler.run_pending();
                elapsed += start.elapsed();
                assert_eq!(completed.load(Ordering::Relaxed), MONITORS);
            }
            elapsed
        })
    });

    group.finish();
}

criterion_group!(polling, bench_tick_continue, bench_tick_to_completion);
criterion_main!(polling);
