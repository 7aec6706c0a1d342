// Path: crates/storage/src/lock.rs
use fs2::FileExt;
use molsift_types::error::StorageError;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// A coarse, table-wide exclusive lock held by a writer for a multi-step flush.
///
/// Backed by an advisory lock on `<lock_dir>/<table>.lock`; released on drop.
#[derive(Debug)]
pub struct TableLock {
    file: File,
    path: PathBuf,
}

impl TableLock {
    fn open(lock_dir: &Path, table: &str) -> Result<(File, PathBuf), StorageError> {
        std::fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", table));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok((file, path))
    }

    fn lock_error(path: &Path, e: std::io::Error) -> StorageError {
        StorageError::Lock {
            resource: path.display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Blocks until the lock for `table` is held.
    pub fn acquire(lock_dir: &Path, table: &str) -> Result<Self, StorageError> {
        let (file, path) = Self::open(lock_dir, table)?;
        file.lock_exclusive()
            .map_err(|e| Self::lock_error(&path, e))?;
        tracing::debug!(target: "storage", lock = %path.display(), "table lock acquired");
        Ok(Self { file, path })
    }

    /// Takes the lock for `table` if nobody else holds it.
    pub fn try_acquire(lock_dir: &Path, table: &str) -> Result<Option<Self>, StorageError> {
        let (file, path) = Self::open(lock_dir, table)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(Self::lock_error(&path, e)),
        }
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(target: "storage", lock = %self.path.display(), error = %e, "failed to release table lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_excludes_second_holder_until_dropped() {
        let dir = tempdir().unwrap();
        let held = TableLock::acquire(dir.path(), "STORAGE_1").unwrap();
        assert!(held.path().ends_with("STORAGE_1.lock"));
        assert!(TableLock::try_acquire(dir.path(), "STORAGE_1")
            .unwrap()
            .is_none());
        assert!(TableLock::try_acquire(dir.path(), "STORAGE_2")
            .unwrap()
            .is_some());

        drop(held);
        assert!(TableLock::try_acquire(dir.path(), "STORAGE_1")
            .unwrap()
            .is_some());
    }
}
