//! Allocation and collection benchmarks across the three backends.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use minilisp_gc::{BackendKind, GcConfig, GcRuntime, ObjectTag, Tracer};

#[repr(C)]
struct Cons {
    car: *mut u8,
    cdr: *mut u8,
}

unsafe fn trace_cons(payload: *mut u8, tracer: &mut dyn Tracer) {
    let cell = payload.cast::<Cons>();
    (*cell).car = tracer.mark_ptr((*cell).car);
    (*cell).cdr = tracer.mark_ptr((*cell).cdr);
}

const BACKENDS: [BackendKind; 3] = [
    BackendKind::MarkSweep,
    BackendKind::Copying,
    BackendKind::Generational,
];

fn bench_transient_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("transient_allocation");
    for kind in BACKENDS {
        group.bench_with_input(BenchmarkId::from_parameter(kind.as_str()), &kind, |b, &kind| {
            let mut gc = GcRuntime::new(GcConfig::with_backend(kind).heap_size(1 << 20));
            b.iter(|| {
                for _ in 0..256 {
                    black_box(gc.allocate(24));
                }
            });
        });
    }
    group.finish();
}

fn bench_list_churn_with_collect(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_churn_collect");
    for kind in BACKENDS {
        group.bench_with_input(BenchmarkId::from_parameter(kind.as_str()), &kind, |b, &kind| {
            let mut gc = GcRuntime::new(GcConfig::with_backend(kind).heap_size(1 << 20));
            let mut head: *mut u8 = std::ptr::null_mut();
            gc.add_root(&mut head);
            b.iter(|| {
                head = std::ptr::null_mut();
                for _ in 0..512 {
                    let cell = gc.allocate(std::mem::size_of::<Cons>());
                    gc.set_trace(cell, Some(trace_cons));
                    gc.set_tag(cell, ObjectTag::Pair);
                    unsafe { (*cell.cast::<Cons>()).cdr = head };
                    head = cell;
                }
                gc.collect();
                black_box(head);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_transient_allocation, bench_list_churn_with_collect);
criterion_main!(benches);
