// Path: crates/storage/src/mem.rs
use crate::lob::{column_key, copy_out, decode_scalar, row_of, splice, LobStore};
use molsift_types::error::StorageError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory [`LobStore`] for ephemeral indexes and tests.
#[derive(Debug, Default)]
pub struct MemLobStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemLobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&Table) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let tables = self.tables.read();
        let t = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        f(t)
    }

    fn with_table_mut<R>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        f(t)
    }
}

fn row_not_found(table: &str, row: u64) -> StorageError {
    StorageError::RowNotFound {
        table: table.to_string(),
        row,
    }
}

impl LobStore for MemLobStore {
    fn create_table(&self, table: &str) -> Result<(), StorageError> {
        self.tables.write().entry(table.to_string()).or_default();
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<(), StorageError> {
        self.tables
            .write()
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))
    }

    fn truncate_table(&self, table: &str) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            t.clear();
            Ok(())
        })
    }

    fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        Ok(self.tables.read().contains_key(table))
    }

    fn insert_row(&self, table: &str, row: u64, columns: &[&str]) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            for column in columns {
                t.insert(column_key(row, column), Vec::new());
            }
            Ok(())
        })
    }

    fn rows(&self, table: &str) -> Result<Vec<u64>, StorageError> {
        self.with_table(table, |t| {
            let mut rows: Vec<u64> = t.keys().filter_map(|k| row_of(k)).collect();
            rows.dedup();
            Ok(rows)
        })
    }

    fn length(&self, table: &str, row: u64, column: &str) -> Result<u64, StorageError> {
        self.with_table(table, |t| {
            t.get(&column_key(row, column))
                .map(|v| v.len() as u64)
                .ok_or_else(|| row_not_found(table, row))
        })
    }

    fn read_at(
        &self,
        table: &str,
        row: u64,
        column: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, StorageError> {
        self.with_table(table, |t| {
            let object = t
                .get(&column_key(row, column))
                .ok_or_else(|| row_not_found(table, row))?;
            Ok(copy_out(object, offset, buf))
        })
    }

    fn write_at(
        &self,
        table: &str,
        row: u64,
        column: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            let object = t
                .get_mut(&column_key(row, column))
                .ok_or_else(|| row_not_found(table, row))?;
            splice(object, offset, data)
        })
    }

    fn put_scalar(
        &self,
        table: &str,
        row: u64,
        column: &str,
        value: u64,
    ) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            t.insert(
                column_key(row, column),
                molsift_types::codec::encode_u64(value).to_vec(),
            );
            Ok(())
        })
    }

    fn get_scalar(&self, table: &str, row: u64, column: &str) -> Result<u64, StorageError> {
        self.with_table(table, |t| {
            let bytes = t
                .get(&column_key(row, column))
                .ok_or_else(|| row_not_found(table, row))?;
            decode_scalar(bytes)
        })
    }

    fn commit(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_all_replaces_object() {
        let store = MemLobStore::new();
        store.create_table("T").unwrap();
        store.write_all("T", 4, "bits", b"longer value").unwrap();
        store.write_all("T", 4, "bits", b"short").unwrap();
        assert_eq!(store.read_all("T", 4, "bits").unwrap(), b"short");
    }

    #[test]
    fn test_read_at_clamps_to_object_end() {
        let store = MemLobStore::new();
        store.create_table("T").unwrap();
        store.write_all("T", 0, "data", &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(store.read_at("T", 0, "data", 2, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
        assert!(store.get_scalar("T", 0, "data").is_err());
    }
}
