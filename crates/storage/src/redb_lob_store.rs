// Path: crates/storage/src/redb_lob_store.rs
use crate::lob::{column_key, copy_out, decode_scalar, row_of, splice, LobStore};
use molsift_types::error::StorageError;
use redb::{Database, Durability, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use std::path::{Path, PathBuf};

/// ---- Table definitions (single DB, one redb table per logical table) ----
/// Catalog of logical tables created through `create_table`; value is unused.
const CATALOG: TableDefinition<&str, u64> = TableDefinition::new("__molsift_catalog");

fn backend<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// A [`LobStore`] persisted in a single redb database file.
///
/// Keys of a logical table are prefix-encoded as `be64(row) ++ column`, so a
/// range scan returns rows in ascending order. Individual writes commit with
/// [`Durability::None`]; [`LobStore::commit`] makes them durable.
pub struct RedbLobStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbLobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbLobStore")
            .field("path", &self.path)
            .finish()
    }
}

impl RedbLobStore {
    /// Opens or creates the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(backend)?;

        // Ensure the catalog exists so read transactions can always open it.
        {
            let w = db.begin_write().map_err(backend)?;
            w.open_table(CATALOG).map_err(backend)?;
            w.commit().map_err(backend)?;
        }
        tracing::debug!(target: "storage", path = %path.display(), "opened redb lob store");
        Ok(Self { db, path })
    }

    fn read_txn(&self) -> Result<ReadTransaction<'_>, StorageError> {
        self.db.begin_read().map_err(backend)
    }

    fn write_txn(&self) -> Result<WriteTransaction<'_>, StorageError> {
        let mut w = self.db.begin_write().map_err(backend)?;
        w.set_durability(Durability::None);
        Ok(w)
    }

    fn ensure_exists_write(w: &WriteTransaction, table: &str) -> Result<(), StorageError> {
        let catalog = w.open_table(CATALOG).map_err(backend)?;
        let exists = catalog.get(table).map_err(backend)?.is_some();
        if exists {
            Ok(())
        } else {
            Err(StorageError::TableNotFound(table.to_string()))
        }
    }

    fn ensure_exists_read(r: &ReadTransaction, table: &str) -> Result<(), StorageError> {
        let catalog = r.open_table(CATALOG).map_err(backend)?;
        let exists = catalog.get(table).map_err(backend)?.is_some();
        if exists {
            Ok(())
        } else {
            Err(StorageError::TableNotFound(table.to_string()))
        }
    }

    /// Fetches one column value, or `RowNotFound` if the column was never inserted.
    fn get_column(&self, table: &str, row: u64, column: &str) -> Result<Vec<u8>, StorageError> {
        let r = self.read_txn()?;
        Self::ensure_exists_read(&r, table)?;
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let t = r.open_table(def).map_err(backend)?;
        let key = column_key(row, column);
        let value = t
            .get(key.as_slice())
            .map_err(backend)?
            .map(|v| v.value().to_vec());
        value.ok_or_else(|| StorageError::RowNotFound {
            table: table.to_string(),
            row,
        })
    }
}

impl LobStore for RedbLobStore {
    fn create_table(&self, table: &str) -> Result<(), StorageError> {
        let w = self.write_txn()?;
        {
            let mut catalog = w.open_table(CATALOG).map_err(backend)?;
            catalog.insert(table, 1u64).map_err(backend)?;
            let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
            w.open_table(def).map_err(backend)?;
        }
        w.commit().map_err(backend)?;
        tracing::debug!(target: "storage", table, "created table");
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<(), StorageError> {
        let w = self.write_txn()?;
        Self::ensure_exists_write(&w, table)?;
        {
            let mut catalog = w.open_table(CATALOG).map_err(backend)?;
            catalog.remove(table).map_err(backend)?;
        }
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        w.delete_table(def).map_err(backend)?;
        w.commit().map_err(backend)?;
        tracing::debug!(target: "storage", table, "dropped table");
        Ok(())
    }

    fn truncate_table(&self, table: &str) -> Result<(), StorageError> {
        let w = self.write_txn()?;
        Self::ensure_exists_write(&w, table)?;
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        w.delete_table(def).map_err(backend)?;
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        w.open_table(def).map_err(backend)?;
        w.commit().map_err(backend)?;
        tracing::debug!(target: "storage", table, "truncated table");
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let r = self.read_txn()?;
        let catalog = r.open_table(CATALOG).map_err(backend)?;
        let exists = catalog.get(table).map_err(backend)?.is_some();
        Ok(exists)
    }

    fn insert_row(&self, table: &str, row: u64, columns: &[&str]) -> Result<(), StorageError> {
        let w = self.write_txn()?;
        Self::ensure_exists_write(&w, table)?;
        {
            let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
            let mut t = w.open_table(def).map_err(backend)?;
            let empty: &[u8] = &[];
            for column in columns {
                let key = column_key(row, column);
                t.insert(key.as_slice(), empty).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }

    fn rows(&self, table: &str) -> Result<Vec<u64>, StorageError> {
        let r = self.read_txn()?;
        Self::ensure_exists_read(&r, table)?;
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let t = r.open_table(def).map_err(backend)?;
        let keys: Vec<Vec<u8>> = t
            .iter()
            .map_err(backend)?
            .map(|r| r.map(|(k, _)| k.value().to_vec()))
            .collect::<Result<_, _>>()
            .map_err(backend)?;

        let mut rows: Vec<u64> = keys.iter().filter_map(|k| row_of(k)).collect();
        rows.dedup();
        Ok(rows)
    }

    fn length(&self, table: &str, row: u64, column: &str) -> Result<u64, StorageError> {
        Ok(self.get_column(table, row, column)?.len() as u64)
    }

    fn read_at(
        &self,
        table: &str,
        row: u64,
        column: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, StorageError> {
        let object = self.get_column(table, row, column)?;
        Ok(copy_out(&object, offset, buf))
    }

    fn write_at(
        &self,
        table: &str,
        row: u64,
        column: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let w = self.write_txn()?;
        Self::ensure_exists_write(&w, table)?;
        {
            let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
            let mut t = w.open_table(def).map_err(backend)?;
            let key = column_key(row, column);
            let existing = t
                .get(key.as_slice())
                .map_err(backend)?
                .map(|v| v.value().to_vec());
            let mut object = existing.ok_or_else(|| StorageError::RowNotFound {
                table: table.to_string(),
                row,
            })?;
            splice(&mut object, offset, data)?;
            t.insert(key.as_slice(), object.as_slice())
                .map_err(backend)?;
        }
        w.commit().map_err(backend)
    }

    fn put_scalar(
        &self,
        table: &str,
        row: u64,
        column: &str,
        value: u64,
    ) -> Result<(), StorageError> {
        let w = self.write_txn()?;
        Self::ensure_exists_write(&w, table)?;
        {
            let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
            let mut t = w.open_table(def).map_err(backend)?;
            let key = column_key(row, column);
            let bytes = molsift_types::codec::encode_u64(value);
            t.insert(key.as_slice(), bytes.as_slice())
                .map_err(backend)?;
        }
        w.commit().map_err(backend)
    }

    fn get_scalar(&self, table: &str, row: u64, column: &str) -> Result<u64, StorageError> {
        decode_scalar(&self.get_column(table, row, column)?)
    }

    fn commit(&self) -> Result<(), StorageError> {
        let mut w = self.db.begin_write().map_err(backend)?;
        w.set_durability(Durability::Immediate);
        w.commit().map_err(backend)?;
        tracing::trace!(target: "storage", path = %self.path.display(), "durable commit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_objects_grow_and_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lob.redb");
        {
            let store = RedbLobStore::open(&path).unwrap();
            store.create_table("STORAGE_1").unwrap();
            store.insert_row("STORAGE_1", 0, &["data"]).unwrap();
            store.write_at("STORAGE_1", 0, "data", 0, b"abc").unwrap();
            store.write_at("STORAGE_1", 0, "data", 5, b"z").unwrap();
            store.put_scalar("STORAGE_1", 0, "used", 17).unwrap();
            store.commit().unwrap();
        }

        let store = RedbLobStore::open(&path).unwrap();
        assert_eq!(store.read_all("STORAGE_1", 0, "data").unwrap(), b"abc\0\0z");
        assert_eq!(store.get_scalar("STORAGE_1", 0, "used").unwrap(), 17);
        assert_eq!(store.rows("STORAGE_1").unwrap(), vec![0]);
    }

    #[test]
    fn test_missing_rows_and_tables_are_reported() {
        let dir = tempdir().unwrap();
        let store = RedbLobStore::open(dir.path().join("lob.redb")).unwrap();

        assert!(matches!(
            store.rows("FINGERPRINTS_9"),
            Err(StorageError::TableNotFound(_))
        ));
        store.create_table("FINGERPRINTS_9").unwrap();
        assert!(matches!(
            store.length("FINGERPRINTS_9", 3, "bits"),
            Err(StorageError::RowNotFound { row: 3, .. })
        ));
        assert!(matches!(
            store.write_at("FINGERPRINTS_9", 3, "bits", 0, b"x"),
            Err(StorageError::RowNotFound { .. })
        ));
    }

    #[test]
    fn test_truncate_and_drop() {
        let dir = tempdir().unwrap();
        let store = RedbLobStore::open(dir.path().join("lob.redb")).unwrap();
        store.create_table("T").unwrap();
        for row in [2u64, 0, 1] {
            store.insert_row("T", row, &["a", "b"]).unwrap();
        }
        assert_eq!(store.rows("T").unwrap(), vec![0, 1, 2]);

        store.truncate_table("T").unwrap();
        assert!(store.rows("T").unwrap().is_empty());
        assert!(store.table_exists("T").unwrap());

        store.drop_table("T").unwrap();
        assert!(!store.table_exists("T").unwrap());
    }
}
