//! Semi-space copying backend (Cheney).
//!
//! Two equal semi-spaces; allocation bumps a pointer in the active
//! space. A collection swaps the roles, evacuates everything reachable
//! from the root slots into the new active space, and scans it with a
//! lagging pointer until the scan catches the bump pointer:
//!
//! ```text
//! from-space: [ A ][ B ][ C ][ free ]      A, C reachable
//! to-space:   [ A'][ C'][ free........ ]
//!                   ▲scan      ▲bump
//! ```
//!
//! Forwarding pointers in from-space headers make evacuation idempotent;
//! the surviving graph ends up compacted, so the backend never reports
//! fragmentation.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr;
use std::time::Instant;

use crate::backend::GcBackend;
use crate::config::{GcConfig, DEFAULT_SEMI_SPACE};
use crate::roots::RootSet;
use crate::snapshot::HeapObjectInfo;
use crate::stats::GcStats;
use crate::{align_size, oom_abort, Generation, ObjectTag, TraceFn, Tracer, ALIGNMENT};

/// Header in front of every copying-space payload.
#[repr(C)]
pub(crate) struct CopyHeader {
    pub(crate) size: usize,
    pub(crate) trace: Option<TraceFn>,
    pub(crate) forward: *mut u8,
    pub(crate) tag: ObjectTag,
}

/// Bytes occupied by a [`CopyHeader`].
pub(crate) const COPY_HEADER_SIZE: usize = std::mem::size_of::<CopyHeader>();

/// One half of a copying heap.
pub(crate) struct SemiSpace {
    base: *mut u8,
    size: usize,
    layout: Layout,
}

impl SemiSpace {
    pub(crate) fn new(size: usize) -> Self {
        let size = align_size(size.max(COPY_HEADER_SIZE + ALIGNMENT));
        let layout = Layout::from_size_align(size, ALIGNMENT).expect("semi-space layout");
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            crate::oom_abort("semi-space", size);
        }
        Self { base, size, layout }
    }

    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Whether `ptr` could be a payload in this space. The low bound
    /// admits a payload at the very start of the space.
    #[inline]
    pub(crate) fn contains_payload(&self, ptr: *const u8, header_size: usize) -> bool {
        let addr = ptr as usize;
        addr >= self.base as usize + header_size && addr < self.base as usize + self.size
    }
}

impl Drop for SemiSpace {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) }
    }
}

unsafe impl Send for SemiSpace {}

/// The two spaces plus the bump window; evacuation lives here so the
/// scan loop can hand `&mut self` to trace callbacks as the tracer.
struct CheneySpaces {
    active: SemiSpace,
    inactive: SemiSpace,
    alloc_ptr: *mut u8,
    alloc_end: *mut u8,
    copied: u64,
}

impl CheneySpaces {
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
            copied: 0,
        }
    }

    fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        let payload = align_size(size);
        let total = COPY_HEADER_SIZE + payload;
        if total > self.alloc_end as usize - self.alloc_ptr as usize {
            return None;
        }
        unsafe {
            let header = self.alloc_ptr as *mut CopyHeader;
            self.alloc_ptr = self.alloc_ptr.add(total);
            (*header).size = payload;
            (*header).trace = None;
            (*header).forward = ptr::null_mut();
            (*header).tag = ObjectTag::Unknown;
            let out = (header as *mut u8).add(COPY_HEADER_SIZE);
            ptr::write_bytes(out, 0, payload);
            Some(out)
        }
    }

    fn swap(&mut self) {
        std::mem::swap(&mut self.active, &mut self.inactive);
        self.alloc_ptr = self.active.base();
        self.alloc_end = unsafe { self.active.base().add(self.active.size()) };
    }

    fn header_in(space: &SemiSpace, payload: *mut u8) -> Option<*mut CopyHeader> {
        if space.contains_payload(payload, COPY_HEADER_SIZE) {
            Some(unsafe { payload.sub(COPY_HEADER_SIZE) } as *mut CopyHeader)
        } else {
            None
        }
    }

    /// Move one object out of from-space, or resolve its forwarding
    /// pointer. Pointers outside from-space (including those already in
    /// to-space) come back unchanged.
    fn evacuate(&mut self, ptr: *mut u8) -> *mut u8 {
        if ptr.is_null() {
            return ptr;
        }
        let Some(old_header) = Self::header_in(&self.inactive, ptr) else {
            return ptr;
        };
        unsafe {
            if !(*old_header).forward.is_null() {
                return (*old_header).forward;
            }
            let total = COPY_HEADER_SIZE + (*old_header).size;
            if total > self.alloc_end as usize - self.alloc_ptr as usize {
                // Both spaces are equal, so this only fires when the
                // spaces were resized out from under live data.
                oom_abort("copying", (*old_header).size);
            }
            let new_header = self.alloc_ptr as *mut CopyHeader;
            self.alloc_ptr = self.alloc_ptr.add(total);
            ptr::copy_nonoverlapping(old_header as *const u8, new_header as *mut u8, total);
            (*new_header).forward = ptr::null_mut();
            let forwarded = (new_header as *mut u8).add(COPY_HEADER_SIZE);
            (*old_header).forward = forwarded;
            self.copied += 1;
            forwarded
        }
    }

    /// Cheney scan of the active space. Returns
    /// `(objects_scanned, live_payload_bytes)`.
    fn scan(&mut self) -> (u64, u64) {
        let mut scanned = 0u64;
        let mut live_payload = 0u64;
        let mut cursor = self.active.base();
        unsafe {
            while cursor < self.alloc_ptr {
                let header = cursor as *mut CopyHeader;
                let payload = cursor.add(COPY_HEADER_SIZE);
                scanned += 1;
                live_payload += (*header).size as u64;
                if let Some(trace) = (*header).trace {
                    trace(payload, self);
                }
                cursor = cursor.add(COPY_HEADER_SIZE + (*header).size);
            }
        }
        (scanned, live_payload)
    }
}

impl Tracer for CheneySpaces {
    fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8 {
        self.evacuate(ptr)
    }
}

/// Semi-space copying collector.
pub struct CopyingHeap {
    spaces: CheneySpaces,
    roots: RootSet,
    stats: GcStats,
    collecting: bool,
}

impl CopyingHeap {
    /// Build a heap with the configured (or default 32 MiB) semi-space
    /// size.
    pub fn new(config: &GcConfig) -> Self {
        let semi = config.heap_size.unwrap_or(DEFAULT_SEMI_SPACE);
        Self {
            spaces: CheneySpaces::new(semi),
            roots: RootSet::new(),
            stats: GcStats::default(),
            collecting: false,
        }
    }

    /// Size of one semi-space in bytes.
    pub fn semi_space_size(&self) -> usize {
        self.spaces.active.size()
    }

    /// Bytes in use in the active space, headers included.
    pub fn used_bytes(&self) -> usize {
        self.spaces.alloc_ptr as usize - self.spaces.active.base() as usize
    }

    /// Whether `ptr` lies in the active space.
    pub fn in_active_space(&self, ptr: *const u8) -> bool {
        self.spaces.active.contains_payload(ptr, COPY_HEADER_SIZE)
    }

    fn run_collection(&mut self) {
        if self.collecting {
            return;
        }
        self.collecting = true;
        let start = Instant::now();
        self.stats.collections += 1;
        let before = self.stats.current_bytes;

        self.spaces.swap();
        self.spaces.copied = 0;
        for &slot in self.roots.slots() {
            unsafe {
                let value = *slot;
                if !value.is_null() {
                    *slot = self.spaces.evacuate(value);
                }
            }
        }
        let (scanned, live_payload) = self.spaces.scan();

        self.stats.objects_scanned += scanned;
        self.stats.objects_copied += self.spaces.copied;
        self.stats.current_bytes = live_payload;
        if before > live_payload {
            self.stats.freed_bytes += before - live_payload;
        }
        self.stats.survival_rate = if scanned > 0 {
            self.spaces.copied as f64 / scanned as f64
        } else {
            0.0
        };
        self.stats.metadata_bytes = scanned * COPY_HEADER_SIZE as u64;

        self.stats.record_pause(start.elapsed());
        log::debug!(
            "copying: {} objects survive ({} bytes live) in {:.3} ms",
            scanned,
            live_payload,
            self.stats.last_gc_pause_ms
        );
        self.collecting = false;
    }
}

impl GcBackend for CopyingHeap {
    fn allocate(&mut self, size: usize) -> *mut u8 {
        let ptr = match self.spaces.allocate(size) {
            Some(p) => p,
            None => {
                self.run_collection();
                self.spaces
                    .allocate(size)
                    .unwrap_or_else(|| oom_abort("copying", size))
            }
        };
        let payload = align_size(size) as u64;
        self.stats.allocated_bytes += payload;
        self.stats.current_bytes += payload;
        ptr
    }

    fn set_trace(&mut self, ptr: *mut u8, trace: Option<TraceFn>) {
        if let Some(header) = CheneySpaces::header_in(&self.spaces.active, ptr)
            .or_else(|| CheneySpaces::header_in(&self.spaces.inactive, ptr))
        {
            unsafe { (*header).trace = trace };
        }
    }

    fn set_tag(&mut self, ptr: *mut u8, tag: ObjectTag) {
        if let Some(header) = CheneySpaces::header_in(&self.spaces.active, ptr)
            .or_else(|| CheneySpaces::header_in(&self.spaces.inactive, ptr))
        {
            unsafe { (*header).tag = tag };
        }
    }

    fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8 {
        // Identity between collections; evacuation happens through the
        // tracer handed to callbacks during a cycle.
        ptr
    }

    fn add_root(&mut self, slot: *mut *mut u8) {
        self.roots.add(slot);
    }

    fn remove_root(&mut self, slot: *mut *mut u8) {
        self.roots.remove(slot);
    }

    fn write_barrier(&mut self, _owner: *mut u8, _slot: *mut *mut u8, _child: *mut u8) {
        // Single space: no inter-generational edges to remember.
    }

    fn collect(&mut self) {
        self.run_collection();
    }

    fn free(&mut self, _ptr: *mut u8) {
        // Space is reclaimed wholesale at the next collection.
    }

    fn set_threshold(&mut self, _bytes: usize) {
        // Collection is driven by space exhaustion, not a watermark.
    }

    fn threshold(&self) -> usize {
        self.spaces.active.size()
    }

    fn stats(&mut self) -> GcStats {
        self.stats
    }

    fn heap_snapshot(&self, out: &mut [HeapObjectInfo]) -> usize {
        let mut count = 0;
        let mut cursor = self.spaces.active.base();
        unsafe {
            while cursor < self.spaces.alloc_ptr && count < out.len() {
                let header = cursor as *mut CopyHeader;
                out[count] = HeapObjectInfo {
                    addr: cursor.add(COPY_HEADER_SIZE) as usize,
                    size: (*header).size,
                    generation: Generation::Nursery,
                    tag: (*header).tag,
                };
                count += 1;
                cursor = cursor.add(COPY_HEADER_SIZE + (*header).size);
            }
        }
        count
    }

    fn name(&self) -> &'static str {
        "copying"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

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

    fn small_heap() -> CopyingHeap {
        CopyingHeap::new(&GcConfig::with_backend(BackendKind::Copying).heap_size(256 * 1024))
    }

    #[test]
    fn test_allocation_is_zeroed() {
        let mut heap = small_heap();
        let p = heap.allocate(40);
        for i in 0..40 {
            assert_eq!(unsafe { *p.add(i) }, 0);
        }
    }

    #[test]
    fn test_root_survives_and_may_move() {
        let mut heap = small_heap();
        let mut root = heap.allocate(8);
        unsafe { *root.cast::<f64>() = 7.5 };
        heap.set_tag(root, ObjectTag::Number);
        heap.add_root(&mut root);

        for _ in 0..1000 {
            heap.allocate(16);
        }
        heap.collect();

        // The slot was rewritten to the to-space copy.
        assert!(heap.in_active_space(root));
        assert_eq!(unsafe { *root.cast::<f64>() }, 7.5);
        assert_eq!(heap.stats().current_bytes, 8);
    }

    #[test]
    fn test_no_root_points_into_from_space() {
        let mut heap = small_heap();
        let mut cells: Vec<*mut u8> = (0..50).map(|_| heap.allocate(24)).collect();
        for cell in cells.iter_mut() {
            heap.add_root(cell);
        }
        heap.collect();
        for &cell in &cells {
            assert!(heap.in_active_space(cell));
        }
    }

    #[test]
    fn test_list_shape_survives_relocation() {
        let mut heap = small_heap();
        let mut head: *mut u8 = std::ptr::null_mut();
        heap.add_root(&mut head);
        for i in 0..1000u64 {
            let cell = heap.allocate(std::mem::size_of::<Cons>());
            heap.set_trace(cell, Some(trace_cons));
            heap.set_tag(cell, ObjectTag::Pair);
            unsafe {
                // Stash the index in car to verify order after moving.
                (*cell.cast::<Cons>()).car = (i + 1) as *mut u8;
                (*cell.cast::<Cons>()).cdr = head;
            }
            head = cell;
        }
        let before = head;
        heap.collect();
        assert_ne!(before, head);

        let mut len = 0u64;
        let mut cursor = head;
        while !cursor.is_null() {
            len += 1;
            let car = unsafe { (*cursor.cast::<Cons>()).car } as u64;
            assert_eq!(car, 1000 - len + 1);
            cursor = unsafe { (*cursor.cast::<Cons>()).cdr };
        }
        assert_eq!(len, 1000);
    }

    #[test]
    fn test_compaction_leaves_no_holes() {
        let mut heap = small_heap();
        let mut cells: Vec<*mut u8> = (0..1000).map(|_| heap.allocate(16)).collect();
        for cell in cells.iter_mut() {
            heap.add_root(cell);
        }
        // Drop every other root; survivors compact to the space start.
        for cell in cells.iter_mut().skip(1).step_by(2) {
            heap.remove_root(cell);
        }
        heap.collect();

        let live = 500;
        assert_eq!(heap.used_bytes(), live * (COPY_HEADER_SIZE + 16));
        let stats = heap.stats();
        assert_eq!(stats.fragmentation_index, 0.0);
        assert_eq!(stats.current_bytes, live as u64 * 16);
    }

    #[test]
    fn test_two_collections_preserve_live_set() {
        let mut heap = small_heap();
        let mut head: *mut u8 = std::ptr::null_mut();
        heap.add_root(&mut head);
        for _ in 0..100 {
            let cell = heap.allocate(std::mem::size_of::<Cons>());
            heap.set_trace(cell, Some(trace_cons));
            unsafe { (*cell.cast::<Cons>()).cdr = head };
            head = cell;
        }
        heap.collect();
        let first = heap.stats();
        heap.collect();
        let second = heap.stats();

        assert_eq!(first.current_bytes, second.current_bytes);
        // The same 100 objects are copied back.
        assert_eq!(second.objects_copied - first.objects_copied, 100);
    }

    #[test]
    fn test_exhaustion_triggers_collection() {
        let mut heap = CopyingHeap::new(
            &GcConfig::with_backend(BackendKind::Copying).heap_size(16 * 1024),
        );
        for _ in 0..10_000 {
            heap.allocate(32);
        }
        assert!(heap.stats().collections > 0);
    }

    #[test]
    fn test_threshold_reports_semi_space_size() {
        let mut heap = small_heap();
        assert_eq!(heap.threshold(), 256 * 1024);
        heap.set_threshold(1);
        assert_eq!(heap.threshold(), 256 * 1024);
    }

    #[test]
    fn test_mark_ptr_identity_between_collections() {
        let mut heap = small_heap();
        let p = heap.allocate(16);
        assert_eq!(heap.mark_ptr(p), p);
        assert!(heap.mark_ptr(std::ptr::null_mut()).is_null());
    }

    #[test]
    fn test_snapshot_sums_to_current_bytes() {
        let mut heap = small_heap();
        let mut cells: Vec<*mut u8> = (0..20).map(|i| heap.allocate(8 + (i % 4) * 8)).collect();
        for cell in cells.iter_mut() {
            heap.add_root(cell);
        }
        heap.collect();

        let mut buf = vec![HeapObjectInfo::default(); 32];
        let n = heap.heap_snapshot(&mut buf);
        assert_eq!(n, 20);
        let total: u64 = buf[..n].iter().map(|r| r.size as u64).sum();
        assert_eq!(total, heap.stats().current_bytes);
        for record in &buf[..n] {
            assert!(heap.in_active_space(record.addr as *const u8));
            assert_eq!(record.generation, Generation::Nursery);
        }
    }

    #[test]
    fn test_survival_rate_in_unit_range() {
        let mut heap = small_heap();
        let mut root = heap.allocate(16);
        heap.add_root(&mut root);
        for _ in 0..100 {
            heap.allocate(16);
        }
        heap.collect();
        let stats = heap.stats();
        assert!(stats.survival_rate >= 0.0 && stats.survival_rate <= 1.0);
    }
}
