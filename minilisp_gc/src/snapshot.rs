//! Heap snapshots.
//!
//! A snapshot is a flat description of every live object, emitted on
//! demand for benchmarks and the live heap visualizer. Two encodings
//! exist: the native [`HeapObjectInfo`] record, and a flat array of
//! 4 x 32-bit words per object that out-of-process consumers can decode
//! with nothing but the offset constants below.

use crate::{Generation, ObjectTag};

/// One live object.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapObjectInfo {
    /// Payload address.
    pub addr: usize,
    /// Payload size in bytes.
    pub size: usize,
    /// Generation holding the object.
    pub generation: Generation,
    /// Diagnostic tag.
    pub tag: ObjectTag,
}

/// Words per record in the flat encoding.
pub const FLAT_WORDS_PER_RECORD: usize = 4;

/// Word offset of the (truncated) payload address.
pub const FLAT_ADDR_WORD: usize = 0;

/// Word offset of the payload size.
pub const FLAT_SIZE_WORD: usize = 1;

/// Word offset of the generation value.
pub const FLAT_GENERATION_WORD: usize = 2;

/// Word offset of the tag value.
pub const FLAT_TAG_WORD: usize = 3;

/// Encode records as `[addr, size, generation, tag]` word tuples.
///
/// Addresses wider than 32 bits are truncated; consumers only compare
/// addresses relative to each other.
pub fn encode_flat(records: &[HeapObjectInfo], out: &mut Vec<u32>) {
    out.clear();
    out.reserve(records.len() * FLAT_WORDS_PER_RECORD);
    for record in records {
        out.push(record.addr as u32);
        out.push(record.size as u32);
        out.push(record.generation as u32);
        out.push(record.tag as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_encoding_layout() {
        let records = [
            HeapObjectInfo {
                addr: 0x1000,
                size: 24,
                generation: Generation::Nursery,
                tag: ObjectTag::Pair,
            },
            HeapObjectInfo {
                addr: 0x2000,
                size: 8,
                generation: Generation::Old,
                tag: ObjectTag::Number,
            },
        ];
        let mut flat = Vec::new();
        encode_flat(&records, &mut flat);

        assert_eq!(flat.len(), 2 * FLAT_WORDS_PER_RECORD);
        assert_eq!(flat[FLAT_ADDR_WORD], 0x1000);
        assert_eq!(flat[FLAT_SIZE_WORD], 24);
        assert_eq!(flat[FLAT_GENERATION_WORD], Generation::Nursery as u32);
        assert_eq!(flat[FLAT_TAG_WORD], ObjectTag::Pair as u32);
        let second = &flat[FLAT_WORDS_PER_RECORD..];
        assert_eq!(second[FLAT_ADDR_WORD], 0x2000);
        assert_eq!(second[FLAT_TAG_WORD], ObjectTag::Number as u32);
    }

    #[test]
    fn test_flat_encoding_reuses_buffer() {
        let mut flat = vec![7; 99];
        encode_flat(&[], &mut flat);
        assert!(flat.is_empty());
    }
}
