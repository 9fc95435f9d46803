//! Runtime façade.
//!
//! [`GcRuntime`] owns exactly one backend, selected from configuration
//! at construction, and forwards every mutator-facing operation. It also
//! provides the flat snapshot encoding used by external consumers.

use crate::backend::GcBackend;
use crate::config::{BackendKind, GcConfig};
use crate::copying::CopyingHeap;
use crate::generational::GenerationalHeap;
use crate::mark_sweep::MarkSweepHeap;
use crate::snapshot::{encode_flat, HeapObjectInfo};
use crate::stats::GcStats;
use crate::{ObjectTag, TraceFn};

/// The mutator's single entry point to the collector.
pub struct GcRuntime {
    backend: Box<dyn GcBackend>,
    config: GcConfig,
}

impl GcRuntime {
    /// Construct the configured backend.
    pub fn new(config: GcConfig) -> Self {
        let backend: Box<dyn GcBackend> = match config.backend {
            BackendKind::MarkSweep => Box::new(MarkSweepHeap::new(&config)),
            BackendKind::Copying => Box::new(CopyingHeap::new(&config)),
            BackendKind::Generational => Box::new(GenerationalHeap::new(&config)),
        };
        log::debug!(
            "gc runtime: {} backend, initial heap {:?}",
            backend.name(),
            config.heap_size
        );
        Self { backend, config }
    }

    /// Construct from the process environment.
    pub fn from_env() -> Self {
        Self::new(GcConfig::from_env())
    }

    /// Which backend this runtime drives.
    pub fn backend_kind(&self) -> BackendKind {
        self.config.backend
    }

    /// The configured initial heap size, if any.
    pub fn initial_heap_size(&self) -> Option<usize> {
        self.config.heap_size
    }

    /// See [`GcBackend::allocate`].
    #[inline]
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        self.backend.allocate(size)
    }

    /// See [`GcBackend::set_trace`].
    #[inline]
    pub fn set_trace(&mut self, ptr: *mut u8, trace: Option<TraceFn>) {
        self.backend.set_trace(ptr, trace);
    }

    /// See [`GcBackend::set_tag`].
    #[inline]
    pub fn set_tag(&mut self, ptr: *mut u8, tag: ObjectTag) {
        self.backend.set_tag(ptr, tag);
    }

    /// See [`GcBackend::mark_ptr`].
    #[inline]
    pub fn mark_ptr(&mut self, ptr: *mut u8) -> *mut u8 {
        self.backend.mark_ptr(ptr)
    }

    /// See [`GcBackend::add_root`].
    #[inline]
    pub fn add_root(&mut self, slot: *mut *mut u8) {
        self.backend.add_root(slot);
    }

    /// See [`GcBackend::remove_root`].
    #[inline]
    pub fn remove_root(&mut self, slot: *mut *mut u8) {
        self.backend.remove_root(slot);
    }

    /// See [`GcBackend::write_barrier`].
    #[inline]
    pub fn write_barrier(&mut self, owner: *mut u8, slot: *mut *mut u8, child: *mut u8) {
        self.backend.write_barrier(owner, slot, child);
    }

    /// See [`GcBackend::collect`].
    #[inline]
    pub fn collect(&mut self) {
        self.backend.collect();
    }

    /// See [`GcBackend::free`].
    #[inline]
    pub fn free(&mut self, ptr: *mut u8) {
        self.backend.free(ptr);
    }

    /// See [`GcBackend::set_threshold`].
    #[inline]
    pub fn set_threshold(&mut self, bytes: usize) {
        self.backend.set_threshold(bytes);
    }

    /// See [`GcBackend::threshold`].
    #[inline]
    pub fn threshold(&self) -> usize {
        self.backend.threshold()
    }

    /// See [`GcBackend::stats`].
    #[inline]
    pub fn stats(&mut self) -> GcStats {
        self.backend.stats()
    }

    /// See [`GcBackend::heap_snapshot`].
    #[inline]
    pub fn heap_snapshot(&self, out: &mut [HeapObjectInfo]) -> usize {
        self.backend.heap_snapshot(out)
    }

    /// Flat snapshot of up to `cap` objects as 4-word records; see
    /// [`crate::snapshot`] for the word offsets.
    pub fn flat_snapshot(&self, cap: usize) -> Vec<u32> {
        let mut records = vec![HeapObjectInfo::default(); cap];
        let written = self.backend.heap_snapshot(&mut records);
        let mut flat = Vec::new();
        encode_flat(&records[..written], &mut flat);
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FLAT_GENERATION_WORD, FLAT_SIZE_WORD, FLAT_WORDS_PER_RECORD};
    use crate::Generation;

    #[test]
    fn test_backend_selection() {
        for kind in [
            BackendKind::MarkSweep,
            BackendKind::Copying,
            BackendKind::Generational,
        ] {
            let runtime = GcRuntime::new(GcConfig::with_backend(kind).heap_size(64 * 1024));
            assert_eq!(runtime.backend_kind(), kind);
            assert_eq!(runtime.initial_heap_size(), Some(64 * 1024));
        }
    }

    #[test]
    fn test_unrecognized_name_selects_mark_sweep() {
        let config = GcConfig {
            backend: BackendKind::from_name(Some("shenandoah")),
            heap_size: None,
        };
        let runtime = GcRuntime::new(config);
        assert_eq!(runtime.backend_kind(), BackendKind::MarkSweep);
    }

    #[test]
    fn test_forwarding_round_trip() {
        let mut runtime =
            GcRuntime::new(GcConfig::with_backend(BackendKind::MarkSweep).heap_size(64 * 1024));
        let mut root = runtime.allocate(16);
        runtime.set_tag(root, ObjectTag::Symbol);
        runtime.add_root(&mut root);
        runtime.allocate(16);
        runtime.collect();

        let stats = runtime.stats();
        assert_eq!(stats.current_bytes, 16);
        assert!(stats.collections >= 1);
        runtime.remove_root(&mut root);
    }

    #[test]
    fn test_flat_snapshot_shape() {
        let mut runtime =
            GcRuntime::new(GcConfig::with_backend(BackendKind::Copying).heap_size(64 * 1024));
        let mut a = runtime.allocate(24);
        let mut b = runtime.allocate(8);
        runtime.add_root(&mut a);
        runtime.add_root(&mut b);

        let flat = runtime.flat_snapshot(16);
        assert_eq!(flat.len(), 2 * FLAT_WORDS_PER_RECORD);
        assert_eq!(flat[FLAT_SIZE_WORD], 24);
        assert_eq!(flat[FLAT_GENERATION_WORD], Generation::Nursery as u32);
        assert_eq!(flat[FLAT_WORDS_PER_RECORD + FLAT_SIZE_WORD], 8);
    }

    #[test]
    fn test_flat_snapshot_respects_cap() {
        let mut runtime =
            GcRuntime::new(GcConfig::with_backend(BackendKind::MarkSweep).heap_size(64 * 1024));
        let mut cells: Vec<*mut u8> = (0..10).map(|_| runtime.allocate(16)).collect();
        for cell in cells.iter_mut() {
            runtime.add_root(cell);
        }
        let flat = runtime.flat_snapshot(3);
        assert_eq!(flat.len(), 3 * FLAT_WORDS_PER_RECORD);
    }
}
