// Path: crates/blobstore/src/format.rs

//! Defines the on-disk layout of the blob storage table.
//!
//! Row 0 holds the index-entry log; data block `n` lives in row `n + 1`. Every
//! row has a single byte column.

use molsift_types::error::BlobStoreError;

/// The row holding the index-entry log.
pub const INDEX_ROW: u64 = 0;
/// The single byte column of every row.
pub const DATA_COLUMN: &str = "data";
/// The fixed width of one encoded [`IndexEntry`].
pub const INDEX_ENTRY_SIZE: usize = 12;

/// The location of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// The data block holding the record.
    pub block_no: u32,
    /// Byte offset of the record inside its block.
    pub offset: u32,
    /// Record length in bytes.
    pub length: u32,
}

impl IndexEntry {
    /// The backing row of the entry's block.
    pub fn row(&self) -> u64 {
        u64::from(self.block_no) + 1
    }

    /// Encodes as three little-endian `u32`s.
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut out = [0u8; INDEX_ENTRY_SIZE];
        out[..4].copy_from_slice(&self.block_no.to_le_bytes());
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    fn from_chunk(chunk: &[u8]) -> Option<Self> {
        let word = |i: usize| -> Option<u32> {
            let bytes: [u8; 4] = chunk.get(i * 4..i * 4 + 4)?.try_into().ok()?;
            Some(u32::from_le_bytes(bytes))
        };
        Some(Self {
            block_no: word(0)?,
            offset: word(1)?,
            length: word(2)?,
        })
    }

    /// Parses a whole index-entry log.
    pub fn parse_log(log: &[u8]) -> Result<Vec<Self>, BlobStoreError> {
        if log.len() % INDEX_ENTRY_SIZE != 0 {
            return Err(BlobStoreError::IndexSizeMismatch {
                length: log.len() as u64,
                record: INDEX_ENTRY_SIZE,
            });
        }
        log.chunks_exact(INDEX_ENTRY_SIZE)
            .enumerate()
            .map(|(i, chunk)| Self::from_chunk(chunk).ok_or(BlobStoreError::CorruptEntry(i as u64)))
            .collect()
    }

    /// The byte range of the record inside its block.
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.length as usize
    }
}

/// Where `add` placed a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// The record id, equal to its position in insertion order.
    pub id: u64,
    /// The data block holding the record.
    pub block_no: u32,
    /// Byte offset of the record inside its block.
    pub offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_layout() {
        let e = IndexEntry {
            block_no: 1,
            offset: 0x0102,
            length: 7,
        };
        let bytes = e.to_bytes();
        assert_eq!(bytes, [1, 0, 0, 0, 2, 1, 0, 0, 7, 0, 0, 0]);
        assert_eq!(IndexEntry::parse_log(&bytes).unwrap(), vec![e]);
        assert_eq!(e.row(), 2);
        assert_eq!(e.range(), 0x0102..0x0109);
    }

    #[test]
    fn test_log_must_be_whole_records() {
        let err = IndexEntry::parse_log(&[0u8; 13]).unwrap_err();
        assert!(matches!(
            err,
            BlobStoreError::IndexSizeMismatch {
                length: 13,
                record: 12
            }
        ));
        assert!(IndexEntry::parse_log(&[]).unwrap().is_empty());
    }
}
