// Path: crates/screening/src/index.rs

//! The fingerprint index handle.
//!
//! Persisted partitions are immutable rows of the `FINGERPRINTS_<id>` table and
//! are cached in the shared-memory mirror as whole-row snapshots. The single
//! writer additionally owns the pending block, which lives only in its process
//! until `flush` turns it into the next partition.

use crate::bitplane::{ones, plane_bytes, BitPlanes};
use crate::block::{fill_snapshot, snapshot_len, BlockMeta, BITS_COLUMN, USED_COLUMN};
use crate::optimize::{optimize_block, restore_insertion_order};
use molsift_shmem::{SharedMirror, SyncOutcome, FINGERPRINT_TAG};
use molsift_storage::{fingerprint_table, LobStore};
use molsift_telemetry::{screening_metrics, storage_metrics};
use molsift_types::config::{EngineConfig, FingerprintConfig};
use molsift_types::error::ScreeningError;
use std::ops::Range;
use std::sync::Arc;

/// Where persisted partitions are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Unvalidated,
    Mirror,
    Direct { age: u64 },
}

/// Where the planes of one partition are read from while screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlaneSource {
    /// The writer's in-memory pending block.
    Pending,
    /// A mirror snapshot; planes start at `offset` within the region.
    Mirror { offset: usize },
    /// The `bits` column of the backing table.
    Direct,
}

/// A persisted partition as loaded by this process.
#[derive(Debug)]
struct Partition {
    meta: BlockMeta,
    /// Global id of slot mapping value 0.
    base: u64,
    /// Offset of the planes within the mirror snapshot, if loaded from one.
    snapshot: Option<usize>,
}

/// The block the writer is filling.
#[derive(Debug)]
struct Pending {
    part: usize,
    base: u64,
    meta: BlockMeta,
    planes: BitPlanes,
    /// Slot order of the persisted row this block resumed, empty for a new row.
    published: Vec<u32>,
}

impl Pending {
    fn empty(part: usize, base: u64, width: usize, capacity: usize) -> Self {
        Self {
            part,
            base,
            meta: BlockMeta::empty(width),
            planes: BitPlanes::new(width, capacity),
            published: Vec::new(),
        }
    }
}

/// What screening needs to know about one partition.
pub(crate) struct PartitionView<'a> {
    pub meta: &'a BlockMeta,
    pub base: u64,
    pub source: PlaneSource,
}

/// Rows of the fingerprint table, which must be numbered `0..n`.
fn partition_rows(lob: &dyn LobStore, table: &str) -> Result<Vec<u64>, ScreeningError> {
    let rows = lob.rows(table)?;
    for (i, row) in rows.iter().enumerate() {
        if *row != i as u64 {
            return Err(ScreeningError::CorruptPartition {
                part: i,
                reason: format!("partition rows are not contiguous at row {}", row),
            });
        }
    }
    Ok(rows)
}

/// A transposed fingerprint index over one `FINGERPRINTS_<id>` table.
pub struct FingerprintIndex {
    pub(crate) lob: Arc<dyn LobStore>,
    pub(crate) table: String,
    pub(crate) config: FingerprintConfig,
    pub(crate) mirror: SharedMirror,
    view: View,
    partitions: Vec<Partition>,
    /// Per bit position, the number of indexed fingerprints carrying it.
    pub(crate) popularity: Vec<u64>,
    total_count: Option<u64>,
    writer: Option<Pending>,
    /// Bumped by every change to this handle's in-memory state.
    pub(crate) generation: u64,
}

impl std::fmt::Debug for FingerprintIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintIndex")
            .field("table", &self.table)
            .field("fp_bytes", &self.config.fp_bytes)
            .field("partitions", &self.partitions.len())
            .field("view", &self.view)
            .field("pending", &self.writer.as_ref().map(|w| (w.part, w.meta.used)))
            .finish()
    }
}

impl FingerprintIndex {
    /// Opens a handle on the fingerprint table of `config.context_id`.
    pub fn init(lob: Arc<dyn LobStore>, config: &EngineConfig) -> Result<Self, ScreeningError> {
        if config.fingerprint.fp_bytes == 0 {
            return Err(ScreeningError::ZeroWidth);
        }
        config.fingerprint.validate()?;
        let mirror = SharedMirror::attach(&config.mirror, config.context_id, FINGERPRINT_TAG)?;
        let width = config.fingerprint.width_bits();
        Ok(Self {
            lob,
            table: fingerprint_table(config.context_id),
            config: config.fingerprint.clone(),
            mirror,
            view: View::Unvalidated,
            partitions: Vec::new(),
            popularity: vec![0; width],
            total_count: None,
            writer: None,
            generation: 0,
        })
    }

    /// The backing table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The fingerprint settings this index was opened with.
    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// The shared age of this index.
    pub fn age(&self) -> u64 {
        self.mirror.age()
    }

    /// Whether this handle owns the pending block.
    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    pub(crate) fn width(&self) -> usize {
        self.config.width_bits()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.config.chunk_capacity
    }

    fn priority(&self) -> Range<usize> {
        self.config.priority_bits()
    }

    pub(crate) fn check_width(&self, fp: &[u8]) -> Result<(), ScreeningError> {
        if fp.len() != self.config.fp_bytes {
            return Err(ScreeningError::InvalidFingerprintWidth {
                expected: self.config.fp_bytes,
                got: fp.len(),
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.total_count = None;
    }

    /// Creates the table if it does not exist yet.
    pub fn create(&mut self) -> Result<(), ScreeningError> {
        if !self.lob.table_exists(&self.table)? {
            self.lob.create_table(&self.table)?;
            self.lob.commit()?;
            tracing::info!(target: "screening", table = %self.table, "created fingerprint table");
        }
        Ok(())
    }

    /// Removes every partition and resets the pending block.
    pub fn truncate(&mut self) -> Result<(), ScreeningError> {
        self.lob.truncate_table(&self.table)?;
        self.lob.commit()?;
        self.mirror.invalidate();
        self.partitions.clear();
        self.popularity.fill(0);
        self.view = View::Unvalidated;
        let (width, capacity) = (self.width(), self.capacity());
        if let Some(w) = self.writer.as_mut() {
            *w = Pending::empty(0, 0, width, capacity);
        }
        self.touch();
        tracing::info!(target: "screening", table = %self.table, "truncated fingerprint table");
        Ok(())
    }

    /// Drops the table and removes the shared mirror.
    pub fn drop_table(self) -> Result<(), ScreeningError> {
        self.lob.drop_table(&self.table)?;
        self.lob.commit()?;
        tracing::info!(target: "screening", table = %self.table, "dropped fingerprint table");
        self.mirror.destroy();
        Ok(())
    }

    fn is_stale(&self) -> bool {
        match self.view {
            View::Unvalidated => true,
            View::Mirror => self.mirror.is_stale(),
            View::Direct { age } => age != self.mirror.age(),
        }
    }

    /// Revalidates when another handle has mutated the index since the last load.
    pub fn refresh(&mut self) -> Result<(), ScreeningError> {
        if self.is_stale() {
            self.validate()?;
        }
        Ok(())
    }

    /// Rebuilds the partition list from the mirror, loading the mirror first if
    /// this process is a loader and it is missing or stale.
    pub fn validate(&mut self) -> Result<(), ScreeningError> {
        tracing::debug!(target: "screening", table = %self.table, "validating screening data");
        let lob = Arc::clone(&self.lob);
        let table = self.table.clone();
        let outcome = self.mirror.sync::<ScreeningError, _, _>(
            || {
                partition_rows(lob.as_ref(), &table)?
                    .into_iter()
                    .map(|part| snapshot_len(lob.as_ref(), &table, part))
                    .collect()
            },
            |part, buf| fill_snapshot(lob.as_ref(), &table, part as u64, buf),
        )?;

        let (width, capacity) = (self.width(), self.capacity());
        let (view, loaded) = match outcome {
            SyncOutcome::UpToDate if self.view == View::Mirror => {
                tracing::debug!(target: "screening", "already loaded");
                return Ok(());
            }
            SyncOutcome::Unavailable => {
                let age = self.mirror.age();
                let mut loaded = Vec::new();
                for part in partition_rows(self.lob.as_ref(), &self.table)? {
                    let meta = BlockMeta::read_row(self.lob.as_ref(), &self.table, part, width, capacity)?;
                    loaded.push((meta, None));
                }
                (View::Direct { age }, loaded)
            }
            _ => {
                let mut loaded = Vec::with_capacity(self.mirror.region_count());
                for part in 0..self.mirror.region_count() {
                    let bytes = self.mirror.region(part).ok_or_else(|| {
                        ScreeningError::CorruptPartition {
                            part,
                            reason: "mirror region missing".into(),
                        }
                    })?;
                    let (meta, offset) =
                        BlockMeta::decode_snapshot(bytes, part as u64, width, capacity)?;
                    loaded.push((meta, Some(offset)));
                }
                (View::Mirror, loaded)
            }
        };

        let mut base = 0u64;
        self.partitions = loaded
            .into_iter()
            .map(|(meta, snapshot)| {
                let used = meta.used as u64;
                let partition = Partition {
                    meta,
                    base,
                    snapshot,
                };
                base += used;
                partition
            })
            .collect();
        self.view = view;
        self.recount_popularity();
        self.touch();
        tracing::debug!(
            target: "screening",
            partitions = self.partitions.len(),
            view = ?self.view,
            "validated"
        );
        Ok(())
    }

    /// Validates and takes over the pending block, resuming a partially filled
    /// last partition left by a previous writer.
    pub fn validate_for_update(&mut self) -> Result<(), ScreeningError> {
        self.validate()?;
        if self.writer.as_ref().is_some_and(|w| w.meta.used > 0) {
            tracing::debug!(target: "screening", "already inserting into the pending block");
            return Ok(());
        }

        let (width, capacity) = (self.width(), self.capacity());
        let pending = match self.partitions.last() {
            Some(last) if last.meta.used < capacity => {
                let part = self.partitions.len() - 1;
                let planes =
                    BlockMeta::read_planes(self.lob.as_ref(), &self.table, part as u64, width, capacity)?;
                let mut meta = last.meta.clone();
                let published = last.meta.mapping.clone();
                let planes = restore_insertion_order(&planes, &mut meta);
                tracing::debug!(target: "screening", part, used = meta.used, "reloaded partial partition");
                Pending {
                    part,
                    base: last.base,
                    meta,
                    planes,
                    published,
                }
            }
            Some(last) => Pending::empty(
                self.partitions.len(),
                last.base + last.meta.used as u64,
                width,
                capacity,
            ),
            None => Pending::empty(0, 0, width, capacity),
        };
        self.writer = Some(pending);
        self.recount_popularity();
        self.touch();
        Ok(())
    }

    /// The number of persisted partitions this handle screens before the
    /// pending block.
    fn visible_partitions(&self) -> usize {
        match &self.writer {
            Some(w) => w.part.min(self.partitions.len()),
            None => self.partitions.len(),
        }
    }

    fn recount_popularity(&mut self) {
        self.popularity.fill(0);
        let visible = self.visible_partitions();
        let pending = self.writer.as_ref().map(|w| &w.meta);
        let metas = self.partitions[..visible].iter().map(|p| &p.meta).chain(pending);
        for meta in metas {
            for (total, count) in self.popularity.iter_mut().zip(&meta.counters) {
                *total += u64::from(*count);
            }
        }
    }

    /// The id the next fingerprint will receive.
    pub fn next_id(&self) -> Result<u64, ScreeningError> {
        let w = self.writer.as_ref().ok_or(ScreeningError::NotWritable)?;
        Ok(w.base + w.meta.used as u64)
    }

    /// Whether the next [`FingerprintIndex::add_fingerprint`] flushes first.
    pub fn pending_full(&self) -> Result<bool, ScreeningError> {
        let w = self.writer.as_ref().ok_or(ScreeningError::NotWritable)?;
        Ok(w.meta.used >= self.capacity())
    }

    /// Adds a fingerprint to the pending block, flushing it first when full.
    /// Returns the global id of the fingerprint.
    pub fn add_fingerprint(&mut self, fp: &[u8]) -> Result<u64, ScreeningError> {
        self.check_width(fp)?;
        if self.pending_full()? {
            self.flush()?;
        }

        let w = self.writer.as_mut().ok_or(ScreeningError::NotWritable)?;
        let slot = w.meta.used;
        for bit in ones(fp) {
            w.planes.set(bit, slot)?;
            w.meta.record(bit, slot as u32);
            if let Some(p) = self.popularity.get_mut(bit) {
                *p += 1;
            }
        }
        w.meta.mapping.push(slot as u32);
        w.meta.used += 1;
        let id = w.base + slot as u64;

        self.generation += 1;
        self.mirror.bump_age();
        Ok(id)
    }

    /// Persists the pending block as the next partition.
    ///
    /// A flush with an empty pending block changes nothing.
    pub fn flush(&mut self) -> Result<(), ScreeningError> {
        let priority = self.priority();
        let (width, capacity) = (self.width(), self.capacity());
        let w = self.writer.as_mut().ok_or(ScreeningError::NotWritable)?;
        if w.meta.used == 0 {
            return Ok(());
        }
        tracing::debug!(target: "screening", part = w.part, items = w.meta.used, "flushing pending block");

        // The pending block stays in insertion order until the row is committed.
        let (mut planes, mut meta) = (w.planes.clone(), w.meta.clone());
        optimize_block(&mut planes, &mut meta, &priority, &w.published);
        let fresh = w.published.is_empty();
        meta.write_row(self.lob.as_ref(), &self.table, w.part as u64, &planes, fresh)?;
        self.lob.commit()?;

        let next = Pending::empty(w.part + 1, w.base + meta.used as u64, width, capacity);
        let done = std::mem::replace(w, next);
        let partition = Partition {
            meta,
            base: done.base,
            snapshot: None,
        };
        match done.part.cmp(&self.partitions.len()) {
            std::cmp::Ordering::Less => self.partitions[done.part] = partition,
            std::cmp::Ordering::Equal => self.partitions.push(partition),
            std::cmp::Ordering::Greater => {
                return Err(ScreeningError::CorruptPartition {
                    part: done.part,
                    reason: format!("only {} partitions are loaded", self.partitions.len()),
                })
            }
        }

        self.touch();
        let age = self.mirror.bump_age();
        storage_metrics().inc_partitions_flushed();
        tracing::debug!(target: "screening", part = done.part, age, "flushed");
        Ok(())
    }

    /// The number of fingerprints in persisted partitions.
    pub fn get_total_count(&mut self) -> Result<u64, ScreeningError> {
        if let Some(total) = self.total_count {
            return Ok(total);
        }
        let total = if self.view == View::Unvalidated {
            let mut total = 0;
            for part in partition_rows(self.lob.as_ref(), &self.table)? {
                total += self.lob.get_scalar(&self.table, part, USED_COLUMN)?;
            }
            total
        } else {
            self.partitions.iter().map(|p| p.meta.used as u64).sum()
        };
        self.total_count = Some(total);
        Ok(total)
    }

    /// The number of partitions a screen visits, counting a non-empty pending
    /// block.
    pub fn partition_count(&self) -> usize {
        match &self.writer {
            Some(w) => w.part + usize::from(w.meta.used > 0),
            None => self.partitions.len(),
        }
    }

    /// Total bytes of persisted bit planes.
    pub fn persisted_plane_bytes(&self) -> Result<u64, ScreeningError> {
        let mut total = 0;
        for part in partition_rows(self.lob.as_ref(), &self.table)? {
            total += self.lob.length(&self.table, part, BITS_COLUMN)?;
        }
        Ok(total)
    }

    pub(crate) fn partition_at(&self, part: usize) -> Option<PartitionView<'_>> {
        if let Some(w) = &self.writer {
            if part == w.part {
                return Some(PartitionView {
                    meta: &w.meta,
                    base: w.base,
                    source: PlaneSource::Pending,
                });
            }
        }
        if part >= self.visible_partitions() {
            return None;
        }
        let p = self.partitions.get(part)?;
        let source = match (self.view, p.snapshot) {
            (View::Mirror, Some(offset)) if self.mirror.region(part).is_some() => {
                PlaneSource::Mirror { offset }
            }
            _ => PlaneSource::Direct,
        };
        Some(PartitionView {
            meta: &p.meta,
            base: p.base,
            source,
        })
    }

    /// Copies bytes `range` of plane `bit` of partition `part` into `out`.
    pub(crate) fn read_plane(
        &self,
        part: usize,
        source: PlaneSource,
        bit: usize,
        range: Range<usize>,
        out: &mut [u8],
    ) -> Result<(), ScreeningError> {
        let plane_len = plane_bytes(self.capacity());
        if bit >= self.width() {
            return Err(ScreeningError::BitOutOfRange {
                bit,
                width: self.width(),
            });
        }
        if range.end > plane_len || range.len() != out.len() {
            return Err(ScreeningError::SlotOutOfRange {
                slot: range.end * 8,
                capacity: self.capacity(),
            });
        }
        let short = || ScreeningError::CorruptPartition {
            part,
            reason: format!("plane {} shorter than {} bytes", bit, range.end),
        };
        match source {
            PlaneSource::Pending => {
                let w = self.writer.as_ref().ok_or(ScreeningError::NotWritable)?;
                let src = w.planes.plane(bit)?.get(range.clone()).ok_or_else(short)?;
                out.copy_from_slice(src);
            }
            PlaneSource::Mirror { offset } => {
                let start = offset + bit * plane_len + range.start;
                let src = self
                    .mirror
                    .region(part)
                    .and_then(|region| region.get(start..start + out.len()))
                    .ok_or_else(short)?;
                out.copy_from_slice(src);
            }
            PlaneSource::Direct => {
                let offset = (bit * plane_len + range.start) as u64;
                let n = self
                    .lob
                    .read_at(&self.table, part as u64, BITS_COLUMN, offset, out)?;
                if n != out.len() {
                    return Err(short());
                }
            }
        }
        screening_metrics().inc_plane_bytes_read(out.len() as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molsift_storage::MemLobStore;

    #[test]
    fn test_partition_rows_must_be_contiguous() {
        let lob = MemLobStore::new();
        lob.create_table("FINGERPRINTS_1").unwrap();
        lob.insert_row("FINGERPRINTS_1", 0, &["bits"]).unwrap();
        assert_eq!(partition_rows(&lob, "FINGERPRINTS_1").unwrap(), vec![0]);

        lob.insert_row("FINGERPRINTS_1", 2, &["bits"]).unwrap();
        match partition_rows(&lob, "FINGERPRINTS_1") {
            Err(ScreeningError::CorruptPartition { part, .. }) => assert_eq!(part, 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
