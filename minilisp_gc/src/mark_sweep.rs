//! Mark-sweep backend.
//!
//! A single non-moving heap over a [`FreeListRegion`]. Collection marks
//! from the registered root slots through each object's trace callback,
//! then sweeps the object list, returning unmarked blocks to the free
//! list with coalescing.
//!
//! Because nothing moves, `mark_ptr` is the identity on live objects;
//! the write-back performed by trace callbacks is a no-op here but keeps
//! the callback contract uniform across backends.

use std::collections::VecDeque;
use std::time::Instant;

use crate::backend::GcBackend;
use crate::config::{GcConfig, DEFAULT_MARK_SWEEP_HEAP};
use crate::free_list::{FreeListRegion, HEADER_SIZE};
use crate::roots::RootSet;
use crate::snapshot::HeapObjectInfo;
use crate::stats::GcStats;
use crate::{align_size, oom_abort, Generation, ObjectTag, TraceFn, Tracer};

/// Initial opportunistic-collection watermark: 1 MiB of allocation.
const DEFAULT_THRESHOLD: usize = 1024 * 1024;

/// Watermark floor, matching the smallest useful heap slice.
const MIN_THRESHOLD: usize = 1024;

/// Non-moving mark-sweep collector.
pub struct MarkSweepHeap {
    region: FreeListRegion,
    roots: RootSet,
    stats: GcStats,
    threshold: usize,
    allocated_since_gc: usize,
    collecting: bool,
}

impl MarkSweepHeap {
    /// Build a heap with the configured (or default 4 MiB) capacity.
    pub fn new(config: &GcConfig) -> Self {
        let capacity = config.heap_size.unwrap_or(DEFAULT_MARK_SWEEP_HEAP);
        Self {
            region: FreeListRegion::new(capacity),
            roots: RootSet::new(),
            stats: GcStats::default(),
            threshold: DEFAULT_THRESHOLD.min(capacity),
            allocated_since_gc: 0,
            collecting: false,
        }
    }

    /// Heap capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    fn refresh_gauges(&mut self) {
        self.stats
            .record_fragmentation(&self.region.fragmentation_report());
        self.stats.record_overhead(
            (self.region.live_objects() * HEADER_SIZE) as u64,
            self.region.wasted_bytes() as u64,
            self.region.used_block_bytes() as u64,
            self.region.live_objects() as u64,
        );
    }

    fn run_collection(&mut self) {
        if self.collecting {
            return;
        }
        self.collecting = true;
        let start = Instant::now();
        self.stats.collections += 1;

        // Mark: roots seed the worklist, trace callbacks extend it.
        let mut scanned = 0u64;
        {
            let mut tracer = MarkTracer {
                region: &self.region,
                worklist: VecDeque::new(),
            };
            for &slot in self.roots.slots() {
                unsafe {
                    let value = *slot;
                    if !value.is_null() {
                        *slot = tracer.mark_ptr(value);
                    }
                }
            }
            while let Some(payload) = tracer.worklist.pop_front() {
                scanned += 1;
                if let Some(header) = self.region.header_for(payload) {
                    if let Some(trace) = unsafe { (*header).trace } {
                        unsafe { trace(payload, &mut tracer) };
                    }
                }
            }
        }

        let (freed_bytes, freed_objects) = self.region.sweep();
        self.stats.objects_scanned += scanned;
        self.stats.freed_bytes += freed_bytes;
        self.stats.current_bytes -= freed_bytes;

        // Grow the watermark with the surviving heap, clamped to capacity.
        self.threshold = ((self.stats.current_bytes as usize * 3) / 2 + MIN_THRESHOLD)
            .min(self.region.capacity());
        self.allocated_since_gc = 0;

        self.refresh_gauges();
        self.stats.record_pause(start.elapsed());
        log::debug!(
            "mark-sweep: collected {} objects ({} bytes) in {:.3} ms, {} live bytes",
            freed_objects,
            freed_bytes,
            self.stats.last_gc_pause_ms,
            self.stats.current_bytes
        );
        self.collecting = false;
    }
}

impl GcBackend for MarkSweepHeap {
    fn allocate(&mut self, size: usize) -> *mut u8 {
        // Opportunistic collection happens before the block is carved so
        // the returned pointer can always be rooted by the mutator.
        if !self.collecting && self.allocated_since_gc > self.threshold {
            self.run_collection();
        }

        let ptr = match self.region.allocate(size) {
            Some(p) => p,
            None => {
                self.run_collection();
                self.region
                    .allocate(size)
                    .unwrap_or_else(|| oom_abort("mark-sweep", size))
            }
        };

        let payload = align_size(size);
        self.stats.allocated_bytes += payload as u64;
        self.stats.current_bytes += payload as u64;
        self.allocated_since_gc += payload;
        ptr
    }

    fn set_trace(&mut self, ptr: *mut u8, trace: Option<TraceFn>) {
        if let Some(header) = self.region.header_for(ptr) {
            unsafe { (*header).trace = trace };
        }
    }

    fn set_tag(&mut self, ptr: *mut u8, tag: ObjectTag) {
        if let Some(header) = self.region.header_for(ptr) {
            unsafe { (*header).tag = tag };
        }
    }

    fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8 {
        // Non-moving: the current address is the allocation address.
        ptr
    }

    fn add_root(&mut self, slot: *mut *mut u8) {
        self.roots.add(slot);
    }

    fn remove_root(&mut self, slot: *mut *mut u8) {
        self.roots.remove(slot);
    }

    fn write_barrier(&mut self, _owner: *mut u8, _slot: *mut *mut u8, _child: *mut u8) {
        // No remembered set in a single-generation heap.
    }

    fn collect(&mut self) {
        self.run_collection();
    }

    fn free(&mut self, ptr: *mut u8) {
        if let Some(header) = self.region.header_for(ptr) {
            let payload = self.region.release(header) as u64;
            self.stats.freed_bytes += payload;
            self.stats.current_bytes -= payload;
        }
    }

    fn set_threshold(&mut self, bytes: usize) {
        self.threshold = bytes.max(MIN_THRESHOLD);
        if !self.collecting && self.allocated_since_gc > self.threshold {
            self.run_collection();
        }
    }

    fn threshold(&self) -> usize {
        self.threshold
    }

    fn stats(&mut self) -> GcStats {
        self.refresh_gauges();
        self.stats
    }

    fn heap_snapshot(&self, out: &mut [HeapObjectInfo]) -> usize {
        let mut count = 0;
        let mut cursor = self.region.objects();
        unsafe {
            while !cursor.is_null() && count < out.len() {
                out[count] = HeapObjectInfo {
                    addr: crate::free_list::BlockHeader::payload(cursor) as usize,
                    size: (*cursor).size,
                    generation: Generation::Unknown,
                    tag: (*cursor).tag,
                };
                count += 1;
                cursor = (*cursor).next;
            }
        }
        count
    }

    fn name(&self) -> &'static str {
        "mark-sweep"
    }
}

/// Worklist tracer for the mark phase. Setting the mark bit on first
/// visit makes re-entry free, so cycles terminate.
struct MarkTracer<'a> {
    region: &'a FreeListRegion,
    worklist: VecDeque<*mut u8>,
}

impl Tracer for MarkTracer<'_> {
    fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8 {
        if ptr.is_null() {
            return ptr;
        }
        let Some(header) = self.region.header_for(ptr) else {
            // Outside the heap: non-managed, left alone.
            return ptr;
        };
        unsafe {
            if !(*header).marked {
                (*header).marked = true;
                self.worklist.push_back(ptr);
            }
        }
        ptr
    }
}
