//! Collection statistics.
//!
//! Every backend keeps one cumulative [`GcStats`] record from
//! construction onward. Counters only grow; gauges (`current_bytes`,
//! fragmentation fields) track the present heap shape. Free-list backends
//! recompute the fragmentation block on demand from the free list.

use std::time::Duration;

/// Cumulative collector statistics.
///
/// Byte counters use the aligned payload size, so
/// `current_bytes == allocated_bytes - freed_bytes` holds exactly and the
/// sizes reported by a heap snapshot sum to `current_bytes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    /// Completed collection cycles (a generational major counts once, in
    /// addition to the minor that precedes it).
    pub collections: u64,
    /// Total payload bytes ever allocated.
    pub allocated_bytes: u64,
    /// Total payload bytes reclaimed.
    pub freed_bytes: u64,
    /// Live payload bytes right now.
    pub current_bytes: u64,
    /// Objects visited by collection scans.
    pub objects_scanned: u64,
    /// Objects relocated by copying collections.
    pub objects_copied: u64,
    /// Objects promoted into the tenured generation.
    pub objects_promoted: u64,
    /// Copied / scanned for the most recent copying cycle.
    pub survival_rate: f64,
    /// Bytes of live object headers.
    pub metadata_bytes: u64,
    /// Bytes of allocation slack inside live blocks.
    pub wasted_bytes: u64,
    /// Duration of the most recent collection, in milliseconds.
    pub last_gc_pause_ms: f64,
    /// Mean collection duration, in milliseconds.
    pub avg_gc_pause_ms: f64,
    /// Longest collection duration, in milliseconds.
    pub max_gc_pause_ms: f64,
    /// Total time spent collecting, in milliseconds.
    pub total_gc_time_ms: f64,
    /// Largest free block in bytes (free-list backends).
    pub largest_free_block: u64,
    /// Total free bytes on the free list.
    pub total_free_memory: u64,
    /// Number of free blocks.
    pub free_blocks_count: u64,
    /// Mean free block size in bytes.
    pub average_free_block_size: f64,
    /// `1 - largest_free / total_free`; 0 when the free region is
    /// contiguous.
    pub fragmentation_index: f64,
    /// Highest fragmentation index observed.
    pub peak_fragmentation_index: f64,
    /// Wasted bytes over the block bytes occupied by live objects.
    pub internal_fragmentation_ratio: f64,
    /// Wasted bytes per live object.
    pub average_padding_per_object: f64,
    /// Signed change of the fragmentation index across the two most
    /// recent recomputations.
    pub fragmentation_growth_rate: f64,
}

impl GcStats {
    /// Record one collection pause. `collections` must already count the
    /// finished cycle so the running average divides correctly.
    pub fn record_pause(&mut self, pause: Duration) {
        let ms = pause.as_secs_f64() * 1000.0;
        self.last_gc_pause_ms = ms;
        self.total_gc_time_ms += ms;
        if ms > self.max_gc_pause_ms {
            self.max_gc_pause_ms = ms;
        }
        if self.collections > 0 {
            self.avg_gc_pause_ms = self.total_gc_time_ms / self.collections as f64;
        }
    }

    /// Fold a fresh free-list measurement into the fragmentation gauges.
    pub fn record_fragmentation(&mut self, report: &FragmentationReport) {
        let previous = self.fragmentation_index;
        self.largest_free_block = report.largest_free_block;
        self.total_free_memory = report.total_free_memory;
        self.free_blocks_count = report.free_blocks_count;
        self.average_free_block_size = report.average_free_block_size;
        self.fragmentation_index = report.fragmentation_index;
        self.fragmentation_growth_rate = report.fragmentation_index - previous;
        if report.fragmentation_index > self.peak_fragmentation_index {
            self.peak_fragmentation_index = report.fragmentation_index;
        }
    }

    /// Refresh the live-object overhead gauges.
    pub fn record_overhead(&mut self, metadata_bytes: u64, wasted_bytes: u64, used_block_bytes: u64, live_objects: u64) {
        self.metadata_bytes = metadata_bytes;
        self.wasted_bytes = wasted_bytes;
        self.internal_fragmentation_ratio = if used_block_bytes > 0 {
            wasted_bytes as f64 / used_block_bytes as f64
        } else {
            0.0
        };
        self.average_padding_per_object = if live_objects > 0 {
            wasted_bytes as f64 / live_objects as f64
        } else {
            0.0
        };
    }
}

/// One measurement of a free list's shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentationReport {
    /// Largest free block in bytes.
    pub largest_free_block: u64,
    /// Total free bytes.
    pub total_free_memory: u64,
    /// Number of free blocks.
    pub free_blocks_count: u64,
    /// Mean free block size.
    pub average_free_block_size: f64,
    /// `1 - largest / total`, clamped to `[0, 1]`.
    pub fragmentation_index: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_pause_tracks_extremes() {
        let mut stats = GcStats::default();
        stats.collections = 1;
        stats.record_pause(Duration::from_millis(4));
        stats.collections = 2;
        stats.record_pause(Duration::from_millis(2));

        assert!((stats.last_gc_pause_ms - 2.0).abs() < 1e-9);
        assert!((stats.max_gc_pause_ms - 4.0).abs() < 1e-9);
        assert!((stats.total_gc_time_ms - 6.0).abs() < 1e-9);
        assert!((stats.avg_gc_pause_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fragmentation_peak_is_monotone() {
        let mut stats = GcStats::default();
        stats.record_fragmentation(&FragmentationReport {
            largest_free_block: 50,
            total_free_memory: 100,
            free_blocks_count: 2,
            average_free_block_size: 50.0,
            fragmentation_index: 0.5,
        });
        assert!((stats.peak_fragmentation_index - 0.5).abs() < 1e-9);
        assert!((stats.fragmentation_growth_rate - 0.5).abs() < 1e-9);

        stats.record_fragmentation(&FragmentationReport {
            largest_free_block: 100,
            total_free_memory: 100,
            free_blocks_count: 1,
            average_free_block_size: 100.0,
            fragmentation_index: 0.0,
        });
        assert!((stats.fragmentation_index - 0.0).abs() < 1e-9);
        assert!((stats.peak_fragmentation_index - 0.5).abs() < 1e-9);
        assert!((stats.fragmentation_growth_rate + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_overhead_ratios() {
        let mut stats = GcStats::default();
        stats.record_overhead(480, 64, 1024, 8);
        assert_eq!(stats.metadata_bytes, 480);
        assert_eq!(stats.wasted_bytes, 64);
        assert!((stats.internal_fragmentation_ratio - 0.0625).abs() < 1e-9);
        assert!((stats.average_padding_per_object - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_overhead_empty_heap() {
        let mut stats = GcStats::default();
        stats.record_overhead(0, 0, 0, 0);
        assert_eq!(stats.internal_fragmentation_ratio, 0.0);
        assert_eq!(stats.average_padding_per_object, 0.0);
    }
}
