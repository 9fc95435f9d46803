//! Cross-backend collector scenarios.
//!
//! Each scenario runs against every backend through the runtime façade,
//! using a two-slot cons cell as the traced workload. The cons trace
//! callback is the canonical mutator obligation: visit each child slot
//! through the tracer and store the returned pointer back.

use minilisp_gc::{
    BackendKind, GcConfig, GcRuntime, Generation, HeapObjectInfo, ObjectTag, Tracer,
};

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

const ALL_BACKENDS: [BackendKind; 3] = [
    BackendKind::MarkSweep,
    BackendKind::Copying,
    BackendKind::Generational,
];

fn runtime_for(kind: BackendKind) -> GcRuntime {
    GcRuntime::new(GcConfig::with_backend(kind).heap_size(256 * 1024))
}

fn alloc_cons(gc: &mut GcRuntime, car: *mut u8, cdr: *mut u8) -> *mut u8 {
    let cell = gc.allocate(std::mem::size_of::<Cons>());
    gc.set_trace(cell, Some(trace_cons));
    gc.set_tag(cell, ObjectTag::Pair);
    unsafe {
        (*cell.cast::<Cons>()).car = car;
        (*cell.cast::<Cons>()).cdr = cdr;
    }
    cell
}

#[test]
fn allocations_are_zeroed() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        for size in [1usize, 8, 17, 64, 257] {
            let p = gc.allocate(size);
            for i in 0..size {
                assert_eq!(unsafe { *p.add(i) }, 0, "{kind:?} size {size} byte {i}");
            }
        }
    }
}

#[test]
fn basic_root_survival() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        let mut root = gc.allocate(8);
        gc.set_tag(root, ObjectTag::Number);
        unsafe { *root.cast::<f64>() = 6.125 };
        gc.add_root(&mut root);

        for _ in 0..1000 {
            gc.allocate(16);
        }
        gc.collect();

        assert_eq!(unsafe { *root.cast::<f64>() }, 6.125, "{kind:?}");
        let stats = gc.stats();
        assert!(stats.collections >= 1, "{kind:?}");
        assert_eq!(stats.current_bytes, 8, "{kind:?}");
    }
}

#[test]
fn unreachable_objects_reclaimed() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        for _ in 0..10_000 {
            gc.allocate(16);
        }
        gc.collect();

        let stats = gc.stats();
        assert!(stats.current_bytes < 1024, "{kind:?}: {}", stats.current_bytes);
        assert!(stats.freed_bytes >= 160_000, "{kind:?}: {}", stats.freed_bytes);
    }
}

#[test]
fn linked_list_survives_collection() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        let mut head: *mut u8 = std::ptr::null_mut();
        gc.add_root(&mut head);

        for i in 0..1000usize {
            let number = gc.allocate(8);
            gc.set_tag(number, ObjectTag::Number);
            unsafe { *number.cast::<f64>() = i as f64 };
            // `head` is the registered slot, so it is always current
            // even if the allocation above collected and moved the list.
            head = alloc_cons(&mut gc, number, head);
        }
        gc.collect();

        let mut len = 0usize;
        let mut cursor = head;
        while !cursor.is_null() {
            let car = unsafe { (*cursor.cast::<Cons>()).car };
            let value = unsafe { *car.cast::<f64>() };
            assert_eq!(value, (1000 - len - 1) as f64, "{kind:?}");
            len += 1;
            cursor = unsafe { (*cursor.cast::<Cons>()).cdr };
        }
        assert_eq!(len, 1000, "{kind:?}");
    }
}

#[test]
fn add_remove_root_restores_prior_state() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        let mut keep = gc.allocate(8);
        gc.add_root(&mut keep);
        let mut transient = gc.allocate(8);
        gc.add_root(&mut transient);
        gc.remove_root(&mut transient);

        gc.collect();
        let stats = gc.stats();
        assert_eq!(stats.current_bytes, 8, "{kind:?}");
    }
}

#[test]
fn repeated_collect_is_idempotent() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        let mut head: *mut u8 = std::ptr::null_mut();
        gc.add_root(&mut head);
        for _ in 0..100 {
            head = alloc_cons(&mut gc, std::ptr::null_mut(), head);
        }
        gc.collect();
        let first = gc.stats();
        gc.collect();
        let second = gc.stats();

        assert_eq!(first.current_bytes, second.current_bytes, "{kind:?}");
        assert_eq!(first.freed_bytes, second.freed_bytes, "{kind:?}");
        assert!(second.collections > first.collections, "{kind:?}");
    }
}

#[test]
fn stats_counters_are_monotone() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        let mut last = gc.stats();
        for _ in 0..4 {
            for _ in 0..500 {
                gc.allocate(24);
            }
            gc.collect();
            let now = gc.stats();
            assert!(now.allocated_bytes >= last.allocated_bytes, "{kind:?}");
            assert!(now.freed_bytes >= last.freed_bytes, "{kind:?}");
            assert!(now.collections >= last.collections, "{kind:?}");
            assert!(now.objects_scanned >= last.objects_scanned, "{kind:?}");
            assert!(now.objects_copied >= last.objects_copied, "{kind:?}");
            assert!(now.objects_promoted >= last.objects_promoted, "{kind:?}");
            assert!(now.total_gc_time_ms >= last.total_gc_time_ms, "{kind:?}");
            assert!(
                now.peak_fragmentation_index >= last.peak_fragmentation_index,
                "{kind:?}"
            );
            last = now;
        }
    }
}

#[test]
fn conservation_of_bytes() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        let mut head: *mut u8 = std::ptr::null_mut();
        gc.add_root(&mut head);
        for i in 0..500usize {
            let leaf = gc.allocate(8 + (i % 3) * 8);
            head = alloc_cons(&mut gc, leaf, head);
        }
        gc.collect();

        let stats = gc.stats();
        assert_eq!(
            stats.current_bytes,
            stats.allocated_bytes - stats.freed_bytes,
            "{kind:?}"
        );
    }
}

#[test]
fn snapshot_is_consistent_with_stats() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        let mut head: *mut u8 = std::ptr::null_mut();
        gc.add_root(&mut head);
        for i in 0..50usize {
            let leaf = gc.allocate(8 + (i % 2) * 16);
            gc.set_tag(leaf, ObjectTag::Number);
            head = alloc_cons(&mut gc, leaf, head);
        }
        gc.collect();

        let mut buf = vec![HeapObjectInfo::default(); 256];
        let n = gc.heap_snapshot(&mut buf);
        assert_eq!(n, 100, "{kind:?}");

        let total: u64 = buf[..n].iter().map(|r| r.size as u64).sum();
        assert_eq!(total, gc.stats().current_bytes, "{kind:?}");
        for record in &buf[..n] {
            assert_ne!(record.addr, 0, "{kind:?}");
            assert!(
                matches!(
                    record.generation,
                    Generation::Unknown | Generation::Nursery | Generation::Old
                ),
                "{kind:?}"
            );
            assert!(
                record.tag == ObjectTag::Pair || record.tag == ObjectTag::Number,
                "{kind:?}"
            );
        }
    }
}

#[test]
fn threshold_surface_is_live() {
    for kind in ALL_BACKENDS {
        let mut gc = runtime_for(kind);
        let before = gc.threshold();
        assert!(before > 0, "{kind:?}");
        gc.set_threshold(8 * 1024);
        // The copying backend pins its threshold to the semi-space size.
        if kind == BackendKind::Copying {
            assert_eq!(gc.threshold(), 256 * 1024);
        } else {
            assert_eq!(gc.threshold(), 8 * 1024);
        }
    }
}
