//! Generational backend.
//!
//! A copying nursery over a mark-sweep tenured region. New objects are
//! bump-allocated in the nursery; minor collections evacuate survivors
//! within the nursery until they reach `PROMOTE_AGE`, then promote them
//! into the tenured free-list region. Tenured-to-nursery references are
//! recorded by the write barrier in a remembered set that minor
//! collections scan as extra roots.
//!
//! ```text
//! ┌──────────────────────┐    promote     ┌──────────────────────┐
//! │       NURSERY        │───────────────▶│       TENURED        │
//! │  semi-spaces, age,   │                │  free list, object   │
//! │  Cheney evacuation   │◀───────────────│  list, mark bits     │
//! └──────────────────────┘ remembered set └──────────────────────┘
//! ```
//!
//! Deep promotion: while a freshly promoted object is being traced, its
//! evacuated children promote as well, so a minor collection never
//! manufactures new tenured-to-nursery edges behind the barrier's back.

use std::collections::VecDeque;
use std::ptr;
use std::time::Instant;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::backend::GcBackend;
use crate::config::{GcConfig, DEFAULT_NURSERY_SEMI_SPACE, DEFAULT_TENURED_HEAP};
use crate::copying::SemiSpace;
use crate::free_list::{BlockHeader, FreeListRegion, HEADER_SIZE};
use crate::roots::{RememberedSet, RootSet};
use crate::snapshot::HeapObjectInfo;
use crate::stats::GcStats;
use crate::{align_size, oom_abort, Generation, ObjectTag, TraceFn, Tracer};

/// Minor collections an object must survive before promotion.
pub const PROMOTE_AGE: u8 = 2;

/// Tenured watermark floor.
const MIN_THRESHOLD: usize = 1024;

/// Header in front of every nursery payload.
#[repr(C)]
struct NurseryHeader {
    size: usize,
    trace: Option<TraceFn>,
    forward: *mut u8,
    tag: ObjectTag,
    age: u8,
}

const NURSERY_HEADER_SIZE: usize = std::mem::size_of::<NurseryHeader>();

/// Collector state machine. Re-entry into a collecting state is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Minor,
    Major,
}

/// Nursery: two semi-spaces with a bump window over the active one.
struct Nursery {
    active: SemiSpace,
    inactive: SemiSpace,
    alloc_ptr: *mut u8,
    alloc_end: *mut u8,
}

impl Nursery {
    fn new(semi_size: usize) -> Self {
        let active = SemiSpace::new(semi_size);
        let inactive = SemiSpace::new(active.size());
        let alloc_ptr = active.base();
        let alloc_end = unsafe { active.base().add(active.size()) };
        Self {
            active,
            inactive,
            alloc_ptr,
            alloc_end,
        }
    }

    fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        let payload = align_size(size);
        let total = NURSERY_HEADER_SIZE + payload;
        if total > self.alloc_end as usize - self.alloc_ptr as usize {
            return None;
        }
        unsafe {
            let header = self.alloc_ptr as *mut NurseryHeader;
            self.alloc_ptr = self.alloc_ptr.add(total);
            (*header).size = payload;
            (*header).trace = None;
            (*header).forward = ptr::null_mut();
            (*header).tag = ObjectTag::Unknown;
            (*header).age = 0;
            let out = (header as *mut u8).add(NURSERY_HEADER_SIZE);
            ptr::write_bytes(out, 0, payload);
            Some(out)
        }
    }

    fn swap(&mut self) {
        std::mem::swap(&mut self.active, &mut self.inactive);
        self.alloc_ptr = self.active.base();
        self.alloc_end = unsafe { self.active.base().add(self.active.size()) };
    }

    #[inline]
    fn in_active(&self, ptr: *const u8) -> bool {
        self.active.contains_payload(ptr, NURSERY_HEADER_SIZE)
    }

    #[inline]
    fn in_from_space(&self, ptr: *const u8) -> bool {
        self.inactive.contains_payload(ptr, NURSERY_HEADER_SIZE)
    }

    #[inline]
    fn header_for(payload: *mut u8) -> *mut NurseryHeader {
        unsafe { payload.sub(NURSERY_HEADER_SIZE) as *mut NurseryHeader }
    }
}

/// Evacuation core for minor collections. Trace callbacks receive this
/// as their tracer, so the deep-promotion flag and work stack sit next
/// to the spaces they steer.
struct GenSpaces {
    nursery: Nursery,
    tenured: FreeListRegion,
    promote_stack: SmallVec<[*mut u8; 32]>,
    tracing_promoted: bool,
    copied: u64,
    promoted: u64,
    promoted_payload: u64,
}

impl GenSpaces {
    /// Copy a young object forward or promote it. Pointers outside
    /// from-space (tenured and non-managed included) return unchanged.
    fn evacuate_young(&mut self, ptr: *mut u8) -> *mut u8 {
        if ptr.is_null() || !self.nursery.in_from_space(ptr) {
            return ptr;
        }
        unsafe {
            let old_header = Nursery::header_for(ptr);
            if !(*old_header).forward.is_null() {
                return (*old_header).forward;
            }
            let payload_size = (*old_header).size;
            let total = NURSERY_HEADER_SIZE + payload_size;
            let to_space_full =
                total > self.nursery.alloc_end as usize - self.nursery.alloc_ptr as usize;

            if self.tracing_promoted || (*old_header).age + 1 >= PROMOTE_AGE || to_space_full {
                return self.promote(old_header, ptr);
            }

            // Copy within the nursery, one cycle older.
            let new_header = self.nursery.alloc_ptr as *mut NurseryHeader;
            self.nursery.alloc_ptr = self.nursery.alloc_ptr.add(total);
            (*new_header).size = payload_size;
            (*new_header).trace = (*old_header).trace;
            (*new_header).forward = ptr::null_mut();
            (*new_header).tag = (*old_header).tag;
            (*new_header).age = (*old_header).age + 1;
            let new_payload = (new_header as *mut u8).add(NURSERY_HEADER_SIZE);
            ptr::copy_nonoverlapping(ptr, new_payload, payload_size);
            (*old_header).forward = new_payload;
            self.copied += 1;
            new_payload
        }
    }

    unsafe fn promote(&mut self, old_header: *mut NurseryHeader, payload: *mut u8) -> *mut u8 {
        let size = (*old_header).size;
        let Some(new_payload) = self.tenured.allocate(size) else {
            // The tenured region cannot be collected mid-minor; a full
            // old generation here is terminal.
            oom_abort("generational tenured", size);
        };
        ptr::copy_nonoverlapping(payload, new_payload, size);
        let block = self.tenured.header_for(new_payload).expect("promoted block");
        (*block).trace = (*old_header).trace;
        (*block).tag = (*old_header).tag;
        (*old_header).forward = new_payload;
        self.promote_stack.push(new_payload);
        self.promoted += 1;
        self.promoted_payload += size as u64;
        new_payload
    }

    /// Cheney scan of nursery survivors interleaved with draining the
    /// promotion stack. Returns `(objects_scanned, young_live_payload,
    /// young_live_objects)`.
    fn minor_scan(&mut self) -> (u64, u64, u64) {
        let mut scanned = 0u64;
        let mut young_payload = 0u64;
        let mut young_objects = 0u64;
        let mut cursor = self.nursery.active.base();
        loop {
            while cursor < self.nursery.alloc_ptr {
                unsafe {
                    let header = cursor as *mut NurseryHeader;
                    let payload = cursor.add(NURSERY_HEADER_SIZE);
                    scanned += 1;
                    young_objects += 1;
                    young_payload += (*header).size as u64;
                    if let Some(trace) = (*header).trace {
                        trace(payload, self);
                    }
                    cursor = cursor.add(NURSERY_HEADER_SIZE + (*header).size);
                }
            }
            let Some(promoted) = self.promote_stack.pop() else {
                break;
            };
            unsafe {
                let block = self.tenured.header_for(promoted).expect("promoted block");
                scanned += 1;
                if let Some(trace) = (*block).trace {
                    // Children evacuated under this flag promote too.
                    self.tracing_promoted = true;
                    trace(promoted, self);
                    self.tracing_promoted = false;
                }
            }
        }
        (scanned, young_payload, young_objects)
    }
}

impl Tracer for GenSpaces {
    fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8 {
        self.evacuate_young(ptr)
    }
}

/// Mark tracer for the tenured mark-sweep pass. Marks tenured blocks in
/// their headers and traces *through* surviving nursery objects (tracked
/// in a visited set, nothing moves) so tenured objects reachable only
/// via the nursery stay alive.
struct MajorTracer<'a> {
    tenured: &'a FreeListRegion,
    nursery: &'a Nursery,
    visited_young: FxHashSet<usize>,
    worklist: VecDeque<*mut u8>,
}

impl Tracer for MajorTracer<'_> {
    fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8 {
        if ptr.is_null() {
            return ptr;
        }
        if let Some(block) = self.tenured.header_for(ptr) {
            unsafe {
                if !(*block).marked {
                    (*block).marked = true;
                    self.worklist.push_back(ptr);
                }
            }
        } else if self.nursery.in_active(ptr) && self.visited_young.insert(ptr as usize) {
            self.worklist.push_back(ptr);
        }
        ptr
    }
}

/// Generational collector: copying nursery, mark-sweep tenured.
pub struct GenerationalHeap {
    spaces: GenSpaces,
    roots: RootSet,
    remembered: RememberedSet,
    stats: GcStats,
    phase: Phase,
    old_threshold: usize,
    old_payload: u64,
    young_payload: u64,
    young_objects: u64,
}

impl GenerationalHeap {
    /// Build a heap: 512 KiB nursery semi-spaces over a configured (or
    /// default 4 MiB) tenured region.
    pub fn new(config: &GcConfig) -> Self {
        let tenured = config.heap_size.unwrap_or(DEFAULT_TENURED_HEAP);
        let nursery = Nursery::new(DEFAULT_NURSERY_SEMI_SPACE);
        let old_threshold = nursery.active.size() * 2;
        Self {
            spaces: GenSpaces {
                nursery,
                tenured: FreeListRegion::new(tenured),
                promote_stack: SmallVec::new(),
                tracing_promoted: false,
                copied: 0,
                promoted: 0,
                promoted_payload: 0,
            },
            roots: RootSet::new(),
            remembered: RememberedSet::new(),
            stats: GcStats::default(),
            phase: Phase::Idle,
            old_threshold,
            old_payload: 0,
            young_payload: 0,
            young_objects: 0,
        }
    }

    /// Nursery semi-space size in bytes.
    pub fn nursery_size(&self) -> usize {
        self.spaces.nursery.active.size()
    }

    /// Whether `ptr` is a payload in the tenured region.
    pub fn in_tenured(&self, ptr: *const u8) -> bool {
        self.spaces.tenured.header_for(ptr.cast_mut()).is_some()
    }

    /// Whether `ptr` is a payload in the nursery's active space.
    pub fn in_nursery(&self, ptr: *const u8) -> bool {
        self.spaces.nursery.in_active(ptr)
    }

    /// Whether the remembered set currently records `slot`.
    pub fn remembers(&self, slot: *mut *mut u8) -> bool {
        self.remembered.contains(slot)
    }

    fn minor_collect(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        self.phase = Phase::Minor;
        let start = Instant::now();
        self.stats.collections += 1;
        let young_before = self.young_payload;

        self.spaces.nursery.swap();
        self.spaces.copied = 0;
        self.spaces.promoted = 0;
        self.spaces.promoted_payload = 0;

        // Roots plus remembered slots seed the evacuation; the slots are
        // rewritten with the forwarded addresses.
        for &slot in self.roots.slots().iter().chain(self.remembered.slots()) {
            unsafe {
                let value = *slot;
                if !value.is_null() {
                    *slot = self.spaces.evacuate_young(value);
                }
            }
        }
        let (scanned, young_payload, young_objects) = self.spaces.minor_scan();

        // Entries that no longer point into the new nursery are stale.
        let nursery = &self.spaces.nursery;
        self.remembered
            .retain(|slot| unsafe { nursery.in_active(*slot) });

        self.young_payload = young_payload;
        self.young_objects = young_objects;
        self.old_payload += self.spaces.promoted_payload;
        self.stats.objects_scanned += scanned;
        self.stats.objects_copied += self.spaces.copied;
        self.stats.objects_promoted += self.spaces.promoted;
        self.stats.survival_rate = if scanned > 0 {
            (self.spaces.copied + self.spaces.promoted) as f64 / scanned as f64
        } else {
            0.0
        };
        let died = young_before.saturating_sub(young_payload + self.spaces.promoted_payload);
        self.stats.freed_bytes += died;
        self.stats.current_bytes = self.young_payload + self.old_payload;

        self.stats.record_pause(start.elapsed());
        log::debug!(
            "generational minor: {} copied, {} promoted, {} bytes died in {:.3} ms",
            self.spaces.copied,
            self.spaces.promoted,
            died,
            self.stats.last_gc_pause_ms
        );
        self.phase = Phase::Idle;

        if self.old_payload as usize > self.old_threshold {
            self.major_collect();
        }
    }

    fn major_collect(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        self.phase = Phase::Major;
        let start = Instant::now();
        self.stats.collections += 1;

        let mut scanned = 0u64;
        {
            let mut tracer = MajorTracer {
                tenured: &self.spaces.tenured,
                nursery: &self.spaces.nursery,
                visited_young: FxHashSet::default(),
                worklist: VecDeque::new(),
            };
            for &slot in self.roots.slots().iter().chain(self.remembered.slots()) {
                unsafe {
                    let value = *slot;
                    if !value.is_null() {
                        tracer.mark_ptr(value);
                    }
                }
            }
            while let Some(payload) = tracer.worklist.pop_front() {
                scanned += 1;
                let trace = if let Some(block) = tracer.tenured.header_for(payload) {
                    unsafe { (*block).trace }
                } else {
                    unsafe { (*Nursery::header_for(payload)).trace }
                };
                if let Some(trace) = trace {
                    unsafe { trace(payload, &mut tracer) };
                }
            }
        }

        // Remembered slots living inside blocks about to be swept would
        // dangle; drop them while the mark bits still say which survive.
        let tenured = &self.spaces.tenured;
        self.remembered.retain(|slot| {
            match tenured.block_containing(slot as *const u8) {
                Some(block) => unsafe { (*block).marked },
                None => true,
            }
        });

        let (freed_bytes, freed_objects) = self.spaces.tenured.sweep();
        self.old_payload -= freed_bytes;
        self.stats.objects_scanned += scanned;
        self.stats.freed_bytes += freed_bytes;
        self.stats.current_bytes = self.young_payload + self.old_payload;
        self.old_threshold = (self.old_payload as usize * 2 + MIN_THRESHOLD)
            .min(self.spaces.tenured.capacity());

        self.stats.record_pause(start.elapsed());
        log::debug!(
            "generational major: {} tenured objects ({} bytes) swept in {:.3} ms",
            freed_objects,
            freed_bytes,
            self.stats.last_gc_pause_ms
        );
        self.phase = Phase::Idle;
    }

    fn refresh_gauges(&mut self) {
        self.stats
            .record_fragmentation(&self.spaces.tenured.fragmentation_report());
        let tenured_live = self.spaces.tenured.live_objects() as u64;
        self.stats.record_overhead(
            self.young_objects * NURSERY_HEADER_SIZE as u64 + tenured_live * HEADER_SIZE as u64,
            self.spaces.tenured.wasted_bytes() as u64,
            self.spaces.tenured.used_block_bytes() as u64,
            tenured_live,
        );
    }
}

impl GcBackend for GenerationalHeap {
    fn allocate(&mut self, size: usize) -> *mut u8 {
        let ptr = match self.spaces.nursery.allocate(size) {
            Some(p) => p,
            None => {
                self.minor_collect();
                match self.spaces.nursery.allocate(size) {
                    Some(p) => p,
                    None => {
                        self.major_collect();
                        self.spaces
                            .nursery
                            .allocate(size)
                            .unwrap_or_else(|| oom_abort("generational", size))
                    }
                }
            }
        };
        let payload = align_size(size) as u64;
        self.stats.allocated_bytes += payload;
        self.stats.current_bytes += payload;
        self.young_payload += payload;
        self.young_objects += 1;
        ptr
    }

    fn set_trace(&mut self, ptr: *mut u8, trace: Option<TraceFn>) {
        if self.spaces.nursery.in_active(ptr) {
            unsafe { (*Nursery::header_for(ptr)).trace = trace };
        } else if let Some(block) = self.spaces.tenured.header_for(ptr) {
            unsafe { (*block).trace = trace };
        }
    }

    fn set_tag(&mut self, ptr: *mut u8, tag: ObjectTag) {
        if self.spaces.nursery.in_active(ptr) {
            unsafe { (*Nursery::header_for(ptr)).tag = tag };
        } else if let Some(block) = self.spaces.tenured.header_for(ptr) {
            unsafe { (*block).tag = tag };
        }
    }

    fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8 {
        // Identity between collections; minor/major tracers do the
        // moving and marking.
        ptr
    }

    fn add_root(&mut self, slot: *mut *mut u8) {
        self.roots.add(slot);
    }

    fn remove_root(&mut self, slot: *mut *mut u8) {
        self.roots.remove(slot);
    }

    fn write_barrier(&mut self, owner: *mut u8, slot: *mut *mut u8, child: *mut u8) {
        if slot.is_null() || child.is_null() {
            return;
        }
        if self.in_tenured(owner) && self.spaces.nursery.in_active(child) {
            self.remembered.add(slot);
        }
    }

    fn collect(&mut self) {
        self.minor_collect();
    }

    fn free(&mut self, ptr: *mut u8) {
        if let Some(block) = self.spaces.tenured.header_for(ptr) {
            let (start, size) = unsafe { (ptr as usize, (*block).size) };
            self.remembered.retain(|slot| {
                let addr = slot as usize;
                addr < start || addr >= start + size
            });
            let payload = self.spaces.tenured.release(block) as u64;
            self.old_payload -= payload;
            self.stats.freed_bytes += payload;
            self.stats.current_bytes -= payload;
        }
    }

    fn set_threshold(&mut self, bytes: usize) {
        self.old_threshold = bytes.max(MIN_THRESHOLD);
    }

    fn threshold(&self) -> usize {
        self.old_threshold
    }

    fn stats(&mut self) -> GcStats {
        self.refresh_gauges();
        self.stats
    }

    fn heap_snapshot(&self, out: &mut [HeapObjectInfo]) -> usize {
        let mut count = 0;
        // Nursery first, in allocation order.
        let mut cursor = self.spaces.nursery.active.base();
        unsafe {
            while cursor < self.spaces.nursery.alloc_ptr && count < out.len() {
                let header = cursor as *mut NurseryHeader;
                out[count] = HeapObjectInfo {
                    addr: cursor.add(NURSERY_HEADER_SIZE) as usize,
                    size: (*header).size,
                    generation: Generation::Nursery,
                    tag: (*header).tag,
                };
                count += 1;
                cursor = cursor.add(NURSERY_HEADER_SIZE + (*header).size);
            }
            let mut block = self.spaces.tenured.objects();
            while !block.is_null() && count < out.len() {
                out[count] = HeapObjectInfo {
                    addr: BlockHeader::payload(block) as usize,
                    size: (*block).size,
                    generation: Generation::Old,
                    tag: (*block).tag,
                };
                count += 1;
                block = (*block).next;
            }
        }
        count
    }

    fn name(&self) -> &'static str {
        "generational"
    }
}
