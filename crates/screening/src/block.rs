// Path: crates/screening/src/block.rs

//! Per-partition metadata and its persisted forms.
//!
//! A partition is one row of the `FINGERPRINTS_<id>` table: a scalar `used`
//! column and five large-object columns. The shared-memory mirror holds the
//! same row as one contiguous snapshot:
//!
//! ```text
//! used: u64 | counters | bit_starts | bit_ends | mapping | bits
//! ```
//!
//! with every array encoded as packed little-endian `u32`s.

use crate::bitplane::{plane_bytes, BitPlanes, NO_SLOT};
use molsift_storage::LobStore;
use molsift_types::codec::{decode_u32s, decode_u64, encode_u32s, encode_u64, U32_WIDTH};
use molsift_types::error::{ScreeningError, StorageError};

pub const USED_COLUMN: &str = "used";
pub const COUNTERS_COLUMN: &str = "counters";
pub const BIT_STARTS_COLUMN: &str = "bit_starts";
pub const BIT_ENDS_COLUMN: &str = "bit_ends";
pub const MAPPING_COLUMN: &str = "mapping";
pub const BITS_COLUMN: &str = "bits";

/// The large-object columns of a partition row, in snapshot order.
pub const OBJECT_COLUMNS: [&str; 5] = [
    COUNTERS_COLUMN,
    BIT_STARTS_COLUMN,
    BIT_ENDS_COLUMN,
    MAPPING_COLUMN,
    BITS_COLUMN,
];

const USED_WIDTH: usize = 8;

/// Counters, slot bounds and slot mapping of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    /// Occupied slots.
    pub used: usize,
    /// Per bit position, the number of fingerprints with that bit set.
    pub counters: Vec<u32>,
    /// Per bit position, the first slot with that bit set, or [`NO_SLOT`].
    pub bit_starts: Vec<u32>,
    /// Per bit position, the last slot with that bit set, or [`NO_SLOT`].
    pub bit_ends: Vec<u32>,
    /// Per slot, the insertion order of its fingerprint within the partition.
    pub mapping: Vec<u32>,
}

fn corrupt(part: u64, reason: impl Into<String>) -> ScreeningError {
    ScreeningError::CorruptPartition {
        part: usize::try_from(part).unwrap_or(usize::MAX),
        reason: reason.into(),
    }
}

impl BlockMeta {
    /// Metadata of an empty block of `width` bit positions.
    pub fn empty(width: usize) -> Self {
        Self {
            used: 0,
            counters: vec![0; width],
            bit_starts: vec![NO_SLOT; width],
            bit_ends: vec![NO_SLOT; width],
            mapping: Vec::new(),
        }
    }

    /// The number of bit positions.
    pub fn width(&self) -> usize {
        self.counters.len()
    }

    /// The inclusive slot range in which `bit` occurs, if it occurs at all.
    pub fn slot_range(&self, bit: usize) -> Option<(usize, usize)> {
        let start = *self.bit_starts.get(bit)?;
        let end = *self.bit_ends.get(bit)?;
        if start == NO_SLOT || end == NO_SLOT {
            return None;
        }
        Some((start as usize, end as usize))
    }

    /// Accounts for `bit` being set in `slot`.
    pub(crate) fn record(&mut self, bit: usize, slot: u32) {
        if let Some(c) = self.counters.get_mut(bit) {
            *c = c.saturating_add(1);
        }
        if let Some(s) = self.bit_starts.get_mut(bit) {
            if *s == NO_SLOT || slot < *s {
                *s = slot;
            }
        }
        if let Some(e) = self.bit_ends.get_mut(bit) {
            if *e == NO_SLOT || slot > *e {
                *e = slot;
            }
        }
    }

    /// Recomputes `bit_starts` and `bit_ends` from the planes.
    pub(crate) fn recompute_ranges(&mut self, planes: &BitPlanes) {
        self.bit_starts.fill(NO_SLOT);
        self.bit_ends.fill(NO_SLOT);
        for bit in 0..self.width() {
            let first = (0..self.used).find(|&j| planes.contains(bit, j));
            let last = (0..self.used).rev().find(|&j| planes.contains(bit, j));
            if let (Some(first), Some(last)) = (first, last) {
                self.bit_starts[bit] = first as u32;
                self.bit_ends[bit] = last as u32;
            }
        }
    }

    /// Writes this block and its planes as partition row `part`.
    ///
    /// A `fresh` row is created empty first. Otherwise the row is overwritten in
    /// place: planes first and `used` last, so a reader still holding the
    /// previous metadata finds its slots unchanged at every step.
    pub fn write_row(
        &self,
        lob: &dyn LobStore,
        table: &str,
        part: u64,
        planes: &BitPlanes,
        fresh: bool,
    ) -> Result<(), StorageError> {
        if fresh {
            lob.insert_row(table, part, &OBJECT_COLUMNS)?;
        }
        lob.write_at(table, part, BITS_COLUMN, 0, planes.as_bytes())?;
        lob.write_at(table, part, MAPPING_COLUMN, 0, &encode_u32s(&self.mapping))?;
        lob.write_at(table, part, BIT_STARTS_COLUMN, 0, &encode_u32s(&self.bit_starts))?;
        lob.write_at(table, part, BIT_ENDS_COLUMN, 0, &encode_u32s(&self.bit_ends))?;
        lob.write_at(table, part, COUNTERS_COLUMN, 0, &encode_u32s(&self.counters))?;
        lob.put_scalar(table, part, USED_COLUMN, self.used as u64)
    }

    /// Reads the metadata of partition row `part` without its planes.
    pub fn read_row(
        lob: &dyn LobStore,
        table: &str,
        part: u64,
        width: usize,
        capacity: usize,
    ) -> Result<Self, ScreeningError> {
        let used = lob.get_scalar(table, part, USED_COLUMN)?;
        let array = |column: &str| -> Result<Vec<u32>, ScreeningError> {
            let bytes = lob.read_all(table, part, column)?;
            decode_u32s(&bytes).map_err(|e| corrupt(part, format!("{}: {}", column, e)))
        };
        let meta = Self {
            used: usize::try_from(used).map_err(|e| corrupt(part, e.to_string()))?,
            counters: array(COUNTERS_COLUMN)?,
            bit_starts: array(BIT_STARTS_COLUMN)?,
            bit_ends: array(BIT_ENDS_COLUMN)?,
            mapping: array(MAPPING_COLUMN)?,
        };
        meta.checked(part, width, capacity)
    }

    /// Reads the planes of partition row `part`.
    pub fn read_planes(
        lob: &dyn LobStore,
        table: &str,
        part: u64,
        width: usize,
        capacity: usize,
    ) -> Result<BitPlanes, ScreeningError> {
        let bytes = lob.read_all(table, part, BITS_COLUMN)?;
        BitPlanes::from_bytes(width, capacity, bytes).map_err(|e| corrupt(part, e.to_string()))
    }

    /// Decodes a mirror snapshot, returning the metadata and the offset at
    /// which the planes start.
    pub fn decode_snapshot(
        bytes: &[u8],
        part: u64,
        width: usize,
        capacity: usize,
    ) -> Result<(Self, usize), ScreeningError> {
        let used_bytes = bytes
            .get(..USED_WIDTH)
            .ok_or_else(|| corrupt(part, "snapshot shorter than its header"))?;
        let used = decode_u64(used_bytes).map_err(|e| corrupt(part, e))?;
        let used = usize::try_from(used).map_err(|e| corrupt(part, e.to_string()))?;
        if used > capacity {
            return Err(corrupt(part, format!("used {} exceeds capacity {}", used, capacity)));
        }

        let mut offset = USED_WIDTH;
        let mut take = |len: usize| -> Result<Vec<u32>, ScreeningError> {
            let slice = bytes
                .get(offset..offset + len * U32_WIDTH)
                .ok_or_else(|| corrupt(part, "snapshot truncated"))?;
            offset += len * U32_WIDTH;
            decode_u32s(slice).map_err(|e| corrupt(part, e))
        };
        let counters = take(width)?;
        let bit_starts = take(width)?;
        let bit_ends = take(width)?;
        let mapping = take(used)?;

        let bits_offset = USED_WIDTH + (3 * width + used) * U32_WIDTH;
        let expected = bits_offset + width * plane_bytes(capacity);
        if bytes.len() != expected {
            return Err(corrupt(
                part,
                format!("snapshot has {} bytes, expected {}", bytes.len(), expected),
            ));
        }
        let meta = Self {
            used,
            counters,
            bit_starts,
            bit_ends,
            mapping,
        }
        .checked(part, width, capacity)?;
        Ok((meta, bits_offset))
    }

    fn checked(self, part: u64, width: usize, capacity: usize) -> Result<Self, ScreeningError> {
        if self.used == 0 || self.used > capacity {
            return Err(corrupt(
                part,
                format!("used {} outside 1..={}", self.used, capacity),
            ));
        }
        if self.counters.len() != width
            || self.bit_starts.len() != width
            || self.bit_ends.len() != width
        {
            return Err(corrupt(part, format!("bit arrays are not {} wide", width)));
        }
        if self.mapping.len() != self.used {
            return Err(corrupt(
                part,
                format!("mapping has {} slots, used is {}", self.mapping.len(), self.used),
            ));
        }
        if self.mapping.iter().any(|&m| m as usize >= self.used) {
            return Err(corrupt(part, "mapping points past used"));
        }
        for bit in 0..width {
            let occurs = self.counters[bit] > 0;
            match self.slot_range(bit) {
                Some((start, end)) if occurs && start <= end && end < self.used => {}
                None if !occurs => {}
                _ => {
                    return Err(corrupt(
                        part,
                        format!("slot range of bit {} disagrees with its counter", bit),
                    ))
                }
            }
        }
        Ok(self)
    }
}

/// The byte length of the mirror snapshot of partition row `part`.
pub(crate) fn snapshot_len(lob: &dyn LobStore, table: &str, part: u64) -> Result<usize, ScreeningError> {
    let mut len = USED_WIDTH as u64;
    for column in OBJECT_COLUMNS {
        len += lob.length(table, part, column)?;
    }
    usize::try_from(len).map_err(|e| corrupt(part, e.to_string()))
}

/// Copies partition row `part` into a mirror region sized by [`snapshot_len`].
pub(crate) fn fill_snapshot(
    lob: &dyn LobStore,
    table: &str,
    part: u64,
    buf: &mut [u8],
) -> Result<(), ScreeningError> {
    let used = lob.get_scalar(table, part, USED_COLUMN)?;
    let (head, mut rest) = buf.split_at_mut(USED_WIDTH.min(buf.len()));
    head.copy_from_slice(&encode_u64(used)[..head.len()]);
    for column in OBJECT_COLUMNS {
        let len = usize::try_from(lob.length(table, part, column)?)
            .map_err(|e| corrupt(part, e.to_string()))?;
        if len > rest.len() {
            return Err(corrupt(part, format!("{} grew while loading", column)));
        }
        let (dst, tail) = std::mem::take(&mut rest).split_at_mut(len);
        if lob.read_at(table, part, column, 0, dst)? != len {
            return Err(corrupt(part, format!("{} shrank while loading", column)));
        }
        rest = tail;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use molsift_storage::MemLobStore;

    fn sample() -> (BlockMeta, BitPlanes) {
        let mut meta = BlockMeta::empty(8);
        let mut planes = BitPlanes::new(8, 4);
        for (slot, bits) in [[0usize, 3], [3, 5], [0, 5]].iter().enumerate() {
            for &bit in bits {
                planes.set(bit, slot).unwrap();
                meta.record(bit, slot as u32);
            }
            meta.mapping.push(slot as u32);
            meta.used += 1;
        }
        (meta, planes)
    }

    #[test]
    fn test_record_tracks_ranges() {
        let (meta, _) = sample();
        assert_eq!(meta.counters[0], 2);
        assert_eq!(meta.slot_range(0), Some((0, 2)));
        assert_eq!(meta.slot_range(3), Some((0, 1)));
        assert_eq!(meta.slot_range(5), Some((1, 2)));
        assert_eq!(meta.slot_range(1), None);
    }

    #[test]
    fn test_row_and_snapshot_agree() {
        let lob = MemLobStore::new();
        lob.create_table("FINGERPRINTS_1").unwrap();
        let (meta, planes) = sample();
        meta.write_row(&lob, "FINGERPRINTS_1", 0, &planes, true).unwrap();

        let read = BlockMeta::read_row(&lob, "FINGERPRINTS_1", 0, 8, 4).unwrap();
        assert_eq!(read, meta);
        let read_planes = BlockMeta::read_planes(&lob, "FINGERPRINTS_1", 0, 8, 4).unwrap();
        assert_eq!(read_planes, planes);

        let len = snapshot_len(&lob, "FINGERPRINTS_1", 0).unwrap();
        let mut snapshot = vec![0u8; len];
        fill_snapshot(&lob, "FINGERPRINTS_1", 0, &mut snapshot).unwrap();
        let (decoded, bits_offset) = BlockMeta::decode_snapshot(&snapshot, 0, 8, 4).unwrap();
        assert_eq!(decoded, meta);
        assert_eq!(&snapshot[bits_offset..], planes.as_bytes());
    }

    #[test]
    fn test_inconsistent_ranges_are_corrupt() {
        let lob = MemLobStore::new();
        lob.create_table("FINGERPRINTS_2").unwrap();
        let (mut meta, planes) = sample();
        meta.bit_starts[1] = 0;
        meta.bit_ends[1] = 0;
        meta.write_row(&lob, "FINGERPRINTS_2", 0, &planes, true).unwrap();

        let err = BlockMeta::read_row(&lob, "FINGERPRINTS_2", 0, 8, 4).unwrap_err();
        assert!(matches!(err, ScreeningError::CorruptPartition { part: 0, .. }));
    }
}
