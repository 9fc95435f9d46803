//! The backend contract.
//!
//! Every collector implements [`GcBackend`]; the façade owns exactly one
//! boxed backend and forwards each mutator call. Construction takes the
//! place of the dispatch table's `init` entry: a backend allocates its
//! heap and starts with empty roots and zeroed statistics.

use crate::snapshot::HeapObjectInfo;
use crate::stats::GcStats;
use crate::{ObjectTag, TraceFn};

/// Operation set shared by every collector backend.
///
/// Root slots are passed as `*mut *mut u8`: the address of a memory
/// location that stores a managed payload pointer. The collector reads
/// and rewrites that location during collection, which is how moving
/// backends repair mutator-held references.
pub trait GcBackend {
    /// Allocate a zero-initialized payload of at least `size` bytes,
    /// rounded up to pointer alignment.
    ///
    /// May run a collection before carving the block. If the request
    /// cannot be satisfied even after collecting, the process aborts
    /// with an out-of-memory diagnostic; the returned pointer is always
    /// valid.
    fn allocate(&mut self, size: usize) -> *mut u8;

    /// Install the object's trace callback. No-op on null or foreign
    /// pointers. Must be called before the object is stored in any
    /// traced slot.
    fn set_trace(&mut self, ptr: *mut u8, trace: Option<TraceFn>);

    /// Install the diagnostic tag. Safe before or after `set_trace`.
    fn set_tag(&mut self, ptr: *mut u8, tag: ObjectTag);

    /// Return the current address of `ptr`.
    ///
    /// Outside a collection this is the identity (null included). The
    /// evacuating equivalent used inside collections is reached through
    /// the [`Tracer`](crate::Tracer) handed to trace callbacks.
    fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8;

    /// Register a root slot. Duplicate registrations collapse.
    fn add_root(&mut self, slot: *mut *mut u8);

    /// Unregister a root slot. Unknown slots are ignored.
    fn remove_root(&mut self, slot: *mut *mut u8);

    /// Record that `*slot`, a field inside `owner`, now holds `child`.
    ///
    /// Only the generational backend acts on this, recording `slot` in
    /// the remembered set when `owner` is tenured and `child` is in the
    /// nursery. The barrier must run before the next allocation or
    /// collection that could observe the store.
    fn write_barrier(&mut self, owner: *mut u8, slot: *mut *mut u8, child: *mut u8);

    /// Force a collection cycle (minor plus conditional major for the
    /// generational backend, full for the others).
    fn collect(&mut self);

    /// Manually release one object. No-op on null; no-op between
    /// collections for moving spaces.
    fn free(&mut self, ptr: *mut u8);

    /// Set the bytes-allocated watermark that triggers opportunistic
    /// collection. Ignored by the copying backend.
    fn set_threshold(&mut self, bytes: usize);

    /// Current watermark; the copying backend reports its semi-space
    /// size.
    fn threshold(&self) -> usize;

    /// Snapshot the statistics record, with fragmentation gauges
    /// recomputed where a free list exists.
    fn stats(&mut self) -> GcStats;

    /// Describe up to `out.len()` live objects; returns the number of
    /// records written. Order is backend-defined but stable within one
    /// call.
    fn heap_snapshot(&self, out: &mut [HeapObjectInfo]) -> usize;

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}
