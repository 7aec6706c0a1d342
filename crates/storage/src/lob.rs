// Path: crates/storage/src/lob.rs
use molsift_types::error::StorageError;

/// Name of the fingerprint partition table for a logical index.
pub fn fingerprint_table(context_id: u32) -> String {
    format!("FINGERPRINTS_{}", context_id)
}

/// Name of the blob storage table for a logical index.
pub fn storage_table(context_id: u32) -> String {
    format!("STORAGE_{}", context_id)
}

/// A table of numbered rows whose columns are growable byte objects.
///
/// Every method is a self-contained operation; writes become durable at the
/// next [`LobStore::commit`].
pub trait LobStore: Send + Sync + std::fmt::Debug {
    /// Creates an empty table. Creating an existing table is a no-op.
    fn create_table(&self, table: &str) -> Result<(), StorageError>;
    /// Removes a table and all of its rows.
    fn drop_table(&self, table: &str) -> Result<(), StorageError>;
    /// Removes every row but keeps the table.
    fn truncate_table(&self, table: &str) -> Result<(), StorageError>;
    /// Whether the table exists.
    fn table_exists(&self, table: &str) -> Result<bool, StorageError>;

    /// Inserts a row with one empty object per named column.
    fn insert_row(&self, table: &str, row: u64, columns: &[&str]) -> Result<(), StorageError>;
    /// Returns the ids of all rows in ascending order.
    fn rows(&self, table: &str) -> Result<Vec<u64>, StorageError>;

    /// Returns the byte length of an object.
    fn length(&self, table: &str, row: u64, column: &str) -> Result<u64, StorageError>;
    /// Reads up to `buf.len()` bytes starting at `offset`; returns the count read.
    fn read_at(
        &self,
        table: &str,
        row: u64,
        column: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, StorageError>;
    /// Writes `data` at `offset`, growing the object and zero-filling any gap.
    fn write_at(
        &self,
        table: &str,
        row: u64,
        column: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError>;

    /// Sets a scalar column, creating it if needed.
    fn put_scalar(&self, table: &str, row: u64, column: &str, value: u64)
        -> Result<(), StorageError>;
    /// Reads a scalar column.
    fn get_scalar(&self, table: &str, row: u64, column: &str) -> Result<u64, StorageError>;

    /// Makes every preceding write durable.
    fn commit(&self) -> Result<(), StorageError>;

    /// Reads a whole object.
    fn read_all(&self, table: &str, row: u64, column: &str) -> Result<Vec<u8>, StorageError> {
        let len = usize::try_from(self.length(table, row, column)?)
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        let mut buf = vec![0u8; len];
        let n = self.read_at(table, row, column, 0, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Replaces a whole object with `data`.
    fn write_all(&self, table: &str, row: u64, column: &str, data: &[u8]) -> Result<(), StorageError> {
        self.insert_row(table, row, &[column])?;
        self.write_at(table, row, column, 0, data)
    }
}

/// Encodes the key of one column of one row: `be64(row) ++ column`.
pub(crate) fn column_key(row: u64, column: &str) -> Vec<u8> {
    [row.to_be_bytes().as_slice(), column.as_bytes()].concat()
}

/// Recovers the row id from a column key.
pub(crate) fn row_of(key: &[u8]) -> Option<u64> {
    let prefix: [u8; 8] = key.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(prefix))
}

/// Splices `data` into `object` at `offset`, zero-filling any gap.
pub(crate) fn splice(object: &mut Vec<u8>, offset: u64, data: &[u8]) -> Result<(), StorageError> {
    let start = usize::try_from(offset).map_err(|e| StorageError::Decode(e.to_string()))?;
    let end = start + data.len();
    if object.len() < end {
        object.resize(end, 0);
    }
    if let Some(dst) = object.get_mut(start..end) {
        dst.copy_from_slice(data);
    }
    Ok(())
}

/// Copies the bytes of `object` at `offset` into `buf`, returning the count copied.
pub(crate) fn copy_out(object: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    match object.get(start..) {
        Some(tail) => {
            let n = tail.len().min(buf.len());
            if let (Some(dst), Some(src)) = (buf.get_mut(..n), tail.get(..n)) {
                dst.copy_from_slice(src);
            }
            n
        }
        None => 0,
    }
}

/// Decodes a scalar column.
pub(crate) fn decode_scalar(bytes: &[u8]) -> Result<u64, StorageError> {
    molsift_types::codec::decode_u64(bytes).map_err(StorageError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_keys_sort_by_row() {
        let a = column_key(1, "zzz");
        let b = column_key(2, "aaa");
        assert!(a < b);
        assert_eq!(row_of(&b), Some(2));
        assert_eq!(row_of(&[0u8; 3]), None);
    }

    #[test]
    fn test_splice_zero_fills_gap() {
        let mut obj = vec![9u8; 2];
        splice(&mut obj, 4, &[7, 7]).unwrap();
        assert_eq!(obj, vec![9, 9, 0, 0, 7, 7]);

        let mut buf = [0u8; 4];
        assert_eq!(copy_out(&obj, 3, &mut buf), 3);
        assert_eq!(&buf[..3], &[0, 7, 7]);
        assert_eq!(copy_out(&obj, 10, &mut buf), 0);
    }
}
