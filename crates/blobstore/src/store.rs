// Path: crates/blobstore/src/store.rs

//! The blob store handle.
//!
//! A handle is either a reader (after [`BlobStore::validate`]) or the single
//! writer (after [`BlobStore::validate_for_insert`]). The writer keeps appended
//! records in memory until `finish`/`flush`; every mutation bumps the shared age
//! so other handles reload before their next read.

use crate::format::{IndexEntry, Placement, DATA_COLUMN, INDEX_ENTRY_SIZE, INDEX_ROW};
use molsift_shmem::{SharedMirror, SyncOutcome, BLOB_TAG};
use molsift_storage::{storage_table, LobStore, TableLock};
use molsift_telemetry::storage_metrics;
use molsift_types::config::{BlobStoreConfig, EngineConfig};
use molsift_types::error::{BlobStoreError, StorageError};
use molsift_types::TOMBSTONE_MARK;
use std::path::PathBuf;
use std::sync::Arc;

/// Where published records are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    /// Nothing loaded yet.
    Unvalidated,
    /// Blocks are mapped from the shared mirror.
    Mirror,
    /// The mirror was unavailable; blocks are read from the backing store.
    Direct { age: u64 },
}

/// Append state owned by the writer.
#[derive(Debug, Default)]
struct WriterState {
    /// Size of every data block, including bytes still pending.
    block_sizes: Vec<u64>,
    /// Bytes appended to the top block but not yet written.
    top_pending: Vec<u8>,
    /// Offset in the top block where `top_pending` starts.
    top_pending_mark: u64,
    /// Entries appended but not yet written to the log.
    pending_entries: Vec<IndexEntry>,
    /// Number of entries already in the log.
    flushed: u64,
    /// Set by any mutation since the last durable flush.
    dirty: bool,
}

impl WriterState {
    fn count(&self) -> u64 {
        self.flushed + self.pending_entries.len() as u64
    }

    fn pending_entry(&self, id: u64) -> Option<IndexEntry> {
        let pos = id.checked_sub(self.flushed)?;
        self.pending_entries.get(usize::try_from(pos).ok()?).copied()
    }

    /// The index into `top_pending` of a record that has not been written yet.
    fn pending_bytes_start(&self, entry: &IndexEntry) -> Option<usize> {
        let top = self.block_sizes.len().checked_sub(1)?;
        if entry.block_no as usize != top {
            return None;
        }
        let offset = u64::from(entry.offset).checked_sub(self.top_pending_mark)?;
        usize::try_from(offset).ok()
    }
}

/// An append-only record store over one `STORAGE_<id>` table.
pub struct BlobStore {
    lob: Arc<dyn LobStore>,
    table: String,
    config: BlobStoreConfig,
    lock_dir: PathBuf,
    mirror: SharedMirror,
    index: Vec<IndexEntry>,
    view: View,
    writer: Option<WriterState>,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("table", &self.table)
            .field("published", &self.index.len())
            .field("view", &self.view)
            .field("writable", &self.writer.is_some())
            .finish()
    }
}

fn block_layout(lob: &dyn LobStore, table: &str) -> Result<Vec<usize>, BlobStoreError> {
    let rows = lob.rows(table)?;
    if rows.first() != Some(&INDEX_ROW) {
        return Err(BlobStoreError::MissingIndex);
    }
    let mut lengths = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if *row != i as u64 {
            return Err(StorageError::Decode(format!(
                "block rows of {} are not contiguous at row {}",
                table, row
            ))
            .into());
        }
        let len = lob.length(table, *row, DATA_COLUMN)?;
        lengths.push(usize::try_from(len).map_err(|e| StorageError::Decode(e.to_string()))?);
    }
    if let Some(index_len) = lengths.first() {
        if index_len % INDEX_ENTRY_SIZE != 0 {
            return Err(BlobStoreError::IndexSizeMismatch {
                length: *index_len as u64,
                record: INDEX_ENTRY_SIZE,
            });
        }
    }
    Ok(lengths)
}

impl BlobStore {
    /// Opens a handle on the blob table of `config.context_id` and attaches its mirror.
    pub fn open(lob: Arc<dyn LobStore>, config: &EngineConfig) -> Result<Self, BlobStoreError> {
        let mirror = SharedMirror::attach(&config.mirror, config.context_id, BLOB_TAG)?;
        Ok(Self {
            lob,
            table: storage_table(config.context_id),
            config: config.blob_store.clone(),
            lock_dir: config.lock_dir.clone(),
            mirror,
            index: Vec::new(),
            view: View::Unvalidated,
            writer: None,
        })
    }

    /// The backing table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The shared age of this store.
    pub fn age(&self) -> u64 {
        self.mirror.age()
    }

    /// Creates the table with an empty index-entry log.
    pub fn create(&mut self) -> Result<(), BlobStoreError> {
        if !self.lob.table_exists(&self.table)? {
            self.lob.create_table(&self.table)?;
            self.lob.insert_row(&self.table, INDEX_ROW, &[DATA_COLUMN])?;
            self.lob.commit()?;
            tracing::info!(target: "blobstore", table = %self.table, "created blob table");
        }
        Ok(())
    }

    /// Removes every record, leaving an empty index-entry log.
    pub fn truncate(&mut self) -> Result<(), BlobStoreError> {
        self.lob.truncate_table(&self.table)?;
        self.lob.insert_row(&self.table, INDEX_ROW, &[DATA_COLUMN])?;
        self.lob.commit()?;
        self.mirror.invalidate();
        self.index.clear();
        self.view = View::Unvalidated;
        if self.writer.is_some() {
            self.writer = Some(WriterState::default());
        }
        tracing::info!(target: "blobstore", table = %self.table, "truncated blob table");
        Ok(())
    }

    /// Drops the table and removes the shared mirror.
    pub fn drop_table(self) -> Result<(), BlobStoreError> {
        self.lob.drop_table(&self.table)?;
        self.lob.commit()?;
        tracing::info!(target: "blobstore", table = %self.table, "dropped blob table");
        self.mirror.destroy();
        Ok(())
    }

    /// Takes the coarse table lock for a multi-step write.
    pub fn lock(&self) -> Result<TableLock, BlobStoreError> {
        Ok(TableLock::acquire(&self.lock_dir, &self.table)?)
    }

    /// Resumes appending exactly where the previous writer stopped.
    pub fn validate_for_insert(&mut self) -> Result<(), BlobStoreError> {
        let lengths = block_layout(self.lob.as_ref(), &self.table)?;
        let (index_len, blocks) = lengths
            .split_first()
            .ok_or(BlobStoreError::MissingIndex)?;

        let block_sizes: Vec<u64> = blocks.iter().map(|l| *l as u64).collect();
        let state = WriterState {
            top_pending_mark: block_sizes.last().copied().unwrap_or(0),
            block_sizes,
            flushed: (index_len / INDEX_ENTRY_SIZE) as u64,
            ..WriterState::default()
        };
        tracing::debug!(
            target: "blobstore",
            table = %self.table,
            records = state.flushed,
            blocks = state.block_sizes.len(),
            "validated for insert"
        );
        self.writer = Some(state);
        Ok(())
    }

    /// Attaches or rebuilds the shared mirror and loads the index-entry log.
    pub fn validate(&mut self) -> Result<(), BlobStoreError> {
        tracing::debug!(target: "blobstore", table = %self.table, "validating storage");
        let lob = Arc::clone(&self.lob);
        let table = self.table.clone();
        let outcome = self.mirror.sync::<BlobStoreError, _, _>(
            || block_layout(lob.as_ref(), &table),
            |i, buf| {
                lob.read_at(&table, i as u64, DATA_COLUMN, 0, buf)?;
                Ok(())
            },
        )?;

        match outcome {
            SyncOutcome::UpToDate => {
                tracing::debug!(target: "blobstore", "up to date");
            }
            SyncOutcome::Loaded | SyncOutcome::Attached => {
                let log = self
                    .mirror
                    .region(INDEX_ROW as usize)
                    .ok_or(BlobStoreError::MissingIndex)?;
                self.index = IndexEntry::parse_log(log)?;
                self.view = View::Mirror;
            }
            SyncOutcome::Unavailable => {
                // Capture the age first so a concurrent mutation leaves us stale.
                let age = self.mirror.age();
                let log = self.lob.read_all(&self.table, INDEX_ROW, DATA_COLUMN)?;
                self.index = IndexEntry::parse_log(&log)?;
                self.view = View::Direct { age };
                tracing::debug!(target: "blobstore", "mirror unavailable, reading backing store");
            }
        }
        Ok(())
    }

    fn is_stale(&self) -> bool {
        match self.view {
            View::Unvalidated => true,
            View::Mirror => self.mirror.is_stale(),
            View::Direct { age } => age != self.mirror.age(),
        }
    }

    /// The number of records, including the writer's unflushed ones.
    pub fn count(&self) -> u64 {
        match &self.writer {
            Some(w) => w.count().max(self.index.len() as u64),
            None => self.index.len() as u64,
        }
    }

    /// Appends a record, returning its id and placement.
    pub fn add(&mut self, data: &[u8]) -> Result<Placement, BlobStoreError> {
        let cap = self.config.max_block_size;
        let too_large = || BlobStoreError::RecordTooLarge {
            length: data.len(),
            cap,
        };
        let length = u32::try_from(data.len()).map_err(|_| too_large())?;
        if data.len() > cap {
            return Err(too_large());
        }

        let needs_block = {
            let w = self.writer.as_ref().ok_or(BlobStoreError::NotWritable)?;
            match w.block_sizes.last() {
                Some(top) => top + data.len() as u64 > cap as u64,
                None => true,
            }
        };
        if needs_block {
            self.start_block()?;
        }

        let w = self.writer.as_mut().ok_or(BlobStoreError::NotWritable)?;
        let block_no = w.block_sizes.len().saturating_sub(1);
        let top = w
            .block_sizes
            .last_mut()
            .ok_or(BlobStoreError::NotWritable)?;
        let offset = u32::try_from(*top).map_err(|_| too_large())?;
        let block_no = u32::try_from(block_no).map_err(|_| too_large())?;
        *top += data.len() as u64;

        w.top_pending.extend_from_slice(data);
        w.pending_entries.push(IndexEntry {
            block_no,
            offset,
            length,
        });
        w.dirty = true;
        let id = w.count() - 1;

        self.mirror.bump_age();
        storage_metrics().inc_blob_bytes_appended(data.len() as u64);
        Ok(Placement {
            id,
            block_no,
            offset,
        })
    }

    fn start_block(&mut self) -> Result<(), BlobStoreError> {
        self.finish_top()?;
        let w = self.writer.as_mut().ok_or(BlobStoreError::NotWritable)?;
        let row = w.block_sizes.len() as u64 + 1;
        self.lob.insert_row(&self.table, row, &[DATA_COLUMN])?;
        w.block_sizes.push(0);
        w.top_pending_mark = 0;
        tracing::debug!(target: "blobstore", table = %self.table, block = row - 1, "started data block");
        Ok(())
    }

    fn finish_top(&mut self) -> Result<(), BlobStoreError> {
        let Some(w) = self.writer.as_mut() else {
            return Err(BlobStoreError::NotWritable);
        };
        if w.top_pending.is_empty() {
            return Ok(());
        }
        let row = w.block_sizes.len() as u64;
        tracing::debug!(target: "blobstore", bytes = w.top_pending.len(), "flushing storage block");
        self.lob
            .write_at(&self.table, row, DATA_COLUMN, w.top_pending_mark, &w.top_pending)?;
        w.top_pending_mark += w.top_pending.len() as u64;
        w.top_pending.clear();
        Ok(())
    }

    fn finish_index(&mut self) -> Result<usize, BlobStoreError> {
        let Some(w) = self.writer.as_mut() else {
            return Err(BlobStoreError::NotWritable);
        };
        if w.pending_entries.is_empty() {
            return Ok(0);
        }
        let bytes: Vec<u8> = w
            .pending_entries
            .iter()
            .flat_map(|e| e.to_bytes())
            .collect();
        tracing::debug!(target: "blobstore", entries = w.pending_entries.len(), "flushing index log");
        let mark = w.flushed * INDEX_ENTRY_SIZE as u64;
        self.lob
            .write_at(&self.table, INDEX_ROW, DATA_COLUMN, mark, &bytes)?;
        let n = w.pending_entries.len();
        w.flushed += n as u64;
        w.pending_entries.clear();
        Ok(n)
    }

    /// Writes pending record bytes and index entries to the backing store.
    ///
    /// Returns the number of index entries written.
    pub fn finish(&mut self) -> Result<usize, BlobStoreError> {
        self.finish_top()?;
        let written = self.finish_index()?;
        if written > 0 {
            self.mirror.bump_age();
        }
        Ok(written)
    }

    /// Like [`BlobStore::finish`], then commits and publishes a new age.
    ///
    /// A flush with nothing written since the last one changes nothing.
    pub fn flush(&mut self) -> Result<(), BlobStoreError> {
        let written = self.finish()?;
        let dirty = self.writer.as_ref().is_some_and(|w| w.dirty);
        if !dirty {
            return Ok(());
        }
        self.lob.commit()?;
        if let Some(w) = self.writer.as_mut() {
            w.dirty = false;
        }
        let age = self.mirror.bump_age();
        tracing::debug!(target: "blobstore", table = %self.table, records = written, age, "flushed");
        Ok(())
    }

    /// Resolves `id` to its current location, reloading a stale view first.
    fn locate(&mut self, id: u64) -> Result<(IndexEntry, bool), BlobStoreError> {
        if let Some(entry) = self.writer.as_ref().and_then(|w| w.pending_entry(id)) {
            return Ok((entry, true));
        }
        if self.is_stale() {
            self.validate()?;
        }
        let entry = usize::try_from(id)
            .ok()
            .and_then(|i| self.index.get(i))
            .copied()
            .ok_or(BlobStoreError::OutOfRange {
                id,
                count: self.count(),
            })?;
        Ok((entry, false))
    }

    fn read_direct(&self, id: u64, entry: &IndexEntry) -> Result<Vec<u8>, BlobStoreError> {
        let mut buf = vec![0u8; entry.length as usize];
        let n = self.lob.read_at(
            &self.table,
            entry.row(),
            DATA_COLUMN,
            u64::from(entry.offset),
            &mut buf,
        )?;
        if n != buf.len() {
            return Err(BlobStoreError::CorruptEntry(id));
        }
        Ok(buf)
    }

    /// Returns the bytes of record `id`.
    pub fn get(&mut self, id: u64) -> Result<Vec<u8>, BlobStoreError> {
        let (entry, pending) = self.locate(id)?;
        if pending {
            if let Some(w) = &self.writer {
                if let Some(start) = w.pending_bytes_start(&entry) {
                    return w
                        .top_pending
                        .get(start..start + entry.length as usize)
                        .map(<[u8]>::to_vec)
                        .ok_or(BlobStoreError::CorruptEntry(id));
                }
            }
            return self.read_direct(id, &entry);
        }
        match self.view {
            View::Mirror => self
                .mirror
                .region(entry.row() as usize)
                .and_then(|block| block.get(entry.range()))
                .map(<[u8]>::to_vec)
                .ok_or(BlobStoreError::CorruptEntry(id)),
            _ => self.read_direct(id, &entry),
        }
    }

    /// Tombstones record `id` in place.
    pub fn mark_removed(&mut self, id: u64) -> Result<(), BlobStoreError> {
        if self.writer.is_none() {
            return Err(BlobStoreError::NotWritable);
        }
        let (entry, pending) = self.locate(id)?;
        if entry.length == 0 {
            tracing::debug!(target: "blobstore", id, "empty record has no byte to tombstone");
        } else {
            let w = self.writer.as_mut().ok_or(BlobStoreError::NotWritable)?;
            let in_buffer = if pending {
                w.pending_bytes_start(&entry)
            } else {
                None
            };
            match in_buffer.and_then(|start| w.top_pending.get_mut(start)) {
                Some(byte) => *byte = TOMBSTONE_MARK,
                None => self.lob.write_at(
                    &self.table,
                    entry.row(),
                    DATA_COLUMN,
                    u64::from(entry.offset),
                    &[TOMBSTONE_MARK],
                )?,
            }
            storage_metrics().inc_tombstones();
        }
        if let Some(w) = self.writer.as_mut() {
            w.dirty = true;
        }
        self.mirror.bump_age();
        Ok(())
    }

    /// Whether record `id` starts with the tombstone byte.
    pub fn is_removed(&mut self, id: u64) -> Result<bool, BlobStoreError> {
        let bytes = self.get(id)?;
        Ok(bytes.first() == Some(&TOMBSTONE_MARK))
    }
}
