// Path: crates/screening/src/facade.rs

//! One logical molecule index: records in a [`BlobStore`], their fingerprints
//! in a [`FingerprintIndex`], ids kept in lockstep.

use crate::cancel::CancellationCheck;
use crate::index::FingerprintIndex;
use molsift_blobstore::BlobStore;
use molsift_storage::LobStore;
use molsift_telemetry::error_metrics;
use molsift_types::config::{EngineConfig, MirrorRole};
use molsift_types::error::{ErrorCode, ScreeningError};
use molsift_types::TOMBSTONE_MARK;
use std::sync::Arc;

/// Verifies screening candidates against the query they were screened for.
pub trait ExactMatcher {
    /// Whether `record` really matches `query`.
    fn matches(&mut self, query: &[u8], record: &[u8]) -> bool;
}

impl<F> ExactMatcher for F
where
    F: FnMut(&[u8], &[u8]) -> bool,
{
    fn matches(&mut self, query: &[u8], record: &[u8]) -> bool {
        self(query, record)
    }
}

fn counted<T>(result: Result<T, ScreeningError>) -> Result<T, ScreeningError> {
    if let Err(e) = &result {
        error_metrics().inc_error("molecule_index", e.code());
    }
    result
}

/// A blob store and a fingerprint index over the same backing store.
#[derive(Debug)]
pub struct MoleculeIndex {
    blobs: BlobStore,
    fingerprints: FingerprintIndex,
}

impl MoleculeIndex {
    /// Opens the index as its single writer, creating both tables if needed
    /// and resuming where the previous writer stopped.
    pub fn open_for_update(lob: Arc<dyn LobStore>, config: &EngineConfig) -> Result<Self, ScreeningError> {
        counted(Self::open_writer(lob, config))
    }

    fn open_writer(lob: Arc<dyn LobStore>, config: &EngineConfig) -> Result<Self, ScreeningError> {
        let mut fingerprints = FingerprintIndex::init(Arc::clone(&lob), config)?;
        config.validate()?;
        let mut blobs = BlobStore::open(lob, config)?;
        blobs.create()?;
        fingerprints.create()?;
        blobs.validate_for_insert()?;
        fingerprints.validate_for_update()?;

        let (blob, fingerprint) = (blobs.count(), fingerprints.next_id()?);
        if blob != fingerprint {
            return Err(ScreeningError::IdMismatch { blob, fingerprint });
        }
        tracing::info!(
            target: "screening",
            context_id = config.context_id,
            records = blob,
            "opened molecule index for update"
        );
        Ok(Self {
            blobs,
            fingerprints,
        })
    }

    /// Opens the index for screening only.
    pub fn open_read_only(lob: Arc<dyn LobStore>, config: &EngineConfig) -> Result<Self, ScreeningError> {
        counted(Self::open_reader(lob, config))
    }

    fn open_reader(lob: Arc<dyn LobStore>, config: &EngineConfig) -> Result<Self, ScreeningError> {
        // Readers never populate the mirror; they map it only once a writer published.
        let config = &EngineConfig {
            mirror: config.mirror.with_role(MirrorRole::Reader),
            ..config.clone()
        };
        let mut fingerprints = FingerprintIndex::init(Arc::clone(&lob), config)?;
        config.validate()?;
        let mut blobs = BlobStore::open(lob, config)?;
        blobs.validate()?;
        fingerprints.validate()?;
        Ok(Self {
            blobs,
            fingerprints,
        })
    }

    /// The record store.
    pub fn blobs(&mut self) -> &mut BlobStore {
        &mut self.blobs
    }

    /// The fingerprint index.
    pub fn fingerprints(&mut self) -> &mut FingerprintIndex {
        &mut self.fingerprints
    }

    /// The number of records, including unflushed ones.
    pub fn count(&self) -> u64 {
        self.blobs.count()
    }

    /// Stores a record together with its fingerprint; returns the shared id.
    pub fn insert(&mut self, data: &[u8], fp: &[u8]) -> Result<u64, ScreeningError> {
        counted(self.insert_inner(data, fp))
    }

    fn insert_inner(&mut self, data: &[u8], fp: &[u8]) -> Result<u64, ScreeningError> {
        self.fingerprints.check_width(fp)?;
        // A full block is persisted together with its records before the next
        // record is appended, so nothing below can fail after `blobs.add`.
        if self.fingerprints.pending_full()? {
            self.flush_inner()?;
        }
        let fingerprint = self.fingerprints.next_id()?;
        let placement = self.blobs.add(data)?;
        if placement.id != fingerprint {
            return Err(ScreeningError::IdMismatch {
                blob: placement.id,
                fingerprint,
            });
        }
        self.fingerprints.add_fingerprint(fp)
    }

    /// Persists both the pending fingerprint block and the pending records
    /// under the coarse table lock.
    pub fn flush(&mut self) -> Result<(), ScreeningError> {
        counted(self.flush_inner())
    }

    fn flush_inner(&mut self) -> Result<(), ScreeningError> {
        let _lock = self.blobs.lock()?;
        self.fingerprints.flush()?;
        self.blobs.flush()?;
        Ok(())
    }

    /// The bytes of record `id`.
    pub fn get(&mut self, id: u64) -> Result<Vec<u8>, ScreeningError> {
        counted(self.blobs.get(id).map_err(ScreeningError::from))
    }

    /// Tombstones record `id`. Its fingerprint stays indexed.
    pub fn mark_removed(&mut self, id: u64) -> Result<(), ScreeningError> {
        counted(self.blobs.mark_removed(id).map_err(ScreeningError::from))
    }

    /// Ids whose fingerprints contain every bit of `fp`, ascending.
    pub fn screen(
        &mut self,
        fp: &[u8],
        cancel: &dyn CancellationCheck,
    ) -> Result<Vec<u64>, ScreeningError> {
        counted(self.fingerprints.screen(fp, cancel))
    }

    /// Screening candidates with their record bytes, skipping tombstoned records.
    pub fn candidates(
        &mut self,
        fp: &[u8],
        cancel: &dyn CancellationCheck,
    ) -> Result<Vec<(u64, Vec<u8>)>, ScreeningError> {
        counted(self.candidates_inner(fp, cancel))
    }

    fn candidates_inner(
        &mut self,
        fp: &[u8],
        cancel: &dyn CancellationCheck,
    ) -> Result<Vec<(u64, Vec<u8>)>, ScreeningError> {
        let ids = self.fingerprints.screen(fp, cancel)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let data = self.blobs.get(id)?;
            if data.first() == Some(&TOMBSTONE_MARK) {
                continue;
            }
            out.push((id, data));
        }
        Ok(out)
    }

    /// Ids of the live records that `matcher` confirms against `query`.
    pub fn search(
        &mut self,
        query: &[u8],
        fp: &[u8],
        matcher: &mut dyn ExactMatcher,
        cancel: &dyn CancellationCheck,
    ) -> Result<Vec<u64>, ScreeningError> {
        let candidates = self.candidates(fp, cancel)?;
        let screened = candidates.len();
        let hits: Vec<u64> = candidates
            .into_iter()
            .filter(|(_, data)| matcher.matches(query, data))
            .map(|(id, _)| id)
            .collect();
        tracing::debug!(target: "screening", screened, hits = hits.len(), "search finished");
        Ok(hits)
    }

    /// Removes every record and fingerprint.
    pub fn truncate(&mut self) -> Result<(), ScreeningError> {
        counted(self.truncate_inner())
    }

    fn truncate_inner(&mut self) -> Result<(), ScreeningError> {
        let _lock = self.blobs.lock()?;
        self.fingerprints.truncate()?;
        self.blobs.truncate()?;
        Ok(())
    }

    /// Drops both tables and their shared mirrors.
    pub fn drop_tables(self) -> Result<(), ScreeningError> {
        let Self {
            blobs,
            fingerprints,
        } = self;
        counted(fingerprints.drop_table())?;
        counted(blobs.drop_table().map_err(ScreeningError::from))
    }
}
