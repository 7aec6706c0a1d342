// Path: crates/shmem/src/mirror.rs
use crate::header::{MirrorHeader, MirrorState, HEADER_SIZE};
use crate::naming::{region_name, segment_name};
use crate::poll::{poll_bounded, Attempt};
use molsift_telemetry::mirror_metrics;
use molsift_types::config::{MirrorConfig, MirrorRole};
use molsift_types::error::MirrorError;
use shared_memory::{Shmem, ShmemConf, ShmemError};
use std::fmt;
use std::sync::atomic::Ordering;

/// A thread-safe wrapper for a raw shared memory mapping.
/// SAFETY: The mapping stays valid for the lifetime of the wrapper and is only
/// accessed through atomics (header) or after publication (regions).
struct SafeShmem(Shmem);

unsafe impl Send for SafeShmem {}
unsafe impl Sync for SafeShmem {}

/// One mapped data region together with its logical length.
struct Region {
    shmem: SafeShmem,
    len: usize,
}

impl Region {
    fn bytes(&self) -> &[u8] {
        // SAFETY: the mapping is at least `max(len, 1)` bytes long and published
        // regions are never written after `READY`.
        unsafe { std::slice::from_raw_parts(self.shmem.0.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: only the loader that created the region writes it, before it is
        // published; no other process maps it while the header is `LOADING`.
        unsafe { std::slice::from_raw_parts_mut(self.shmem.0.as_ptr(), self.len) }
    }
}

/// What a call to [`SharedMirror::sync`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The process already had the current content mapped.
    UpToDate,
    /// This process rebuilt the shared content from the backing store.
    Loaded,
    /// This process mapped content published by another process.
    Attached,
    /// No usable shared content; the caller reads the backing store directly.
    Unavailable,
}

/// The per-process handle on a table's shared-memory mirror.
pub struct SharedMirror {
    config: MirrorConfig,
    tag: String,
    segment: String,
    header: SafeShmem,
    regions: Vec<Region>,
    /// The age of the regions this process has mapped.
    age_loaded: Option<u64>,
}

impl fmt::Debug for SharedMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMirror")
            .field("segment", &self.segment)
            .field("role", &self.config.role)
            .field("regions", &self.regions.len())
            .field("age_loaded", &self.age_loaded)
            .finish()
    }
}

fn map_error(name: &str, e: ShmemError) -> MirrorError {
    MirrorError::Map {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// Removes the OS name of a segment. Existing mappings stay valid.
fn unlink(name: &str) {
    match ShmemConf::new().os_id(name).open() {
        Ok(mut shmem) => {
            shmem.set_owner(true);
            drop(shmem);
            tracing::trace!(target: "shmem", name, "unlinked segment");
        }
        Err(e) => tracing::trace!(target: "shmem", name, error = %e, "nothing to unlink"),
    }
}

fn create_region(name: &str, len: usize) -> Result<Region, MirrorError> {
    let size = len.max(1);
    let mut shmem = match ShmemConf::new().os_id(name).size(size).create() {
        Ok(shmem) => shmem,
        Err(ShmemError::MappingIdExists) => {
            // Left behind by a loader that did not finish this age.
            unlink(name);
            ShmemConf::new()
                .os_id(name)
                .size(size)
                .create()
                .map_err(|e| map_error(name, e))?
        }
        Err(e) => return Err(map_error(name, e)),
    };
    shmem.set_owner(false);
    Ok(Region {
        shmem: SafeShmem(shmem),
        len,
    })
}

fn open_region(name: &str, region: usize, len: usize) -> Result<Region, MirrorError> {
    let shmem = ShmemConf::new()
        .os_id(name)
        .open()
        .map_err(|_| MirrorError::Vanished(name.to_string()))?;
    if shmem.len() != len.max(1) {
        return Err(MirrorError::LayoutMismatch {
            region,
            expected: len,
            actual: shmem.len(),
        });
    }
    Ok(Region {
        shmem: SafeShmem(shmem),
        len,
    })
}

impl SharedMirror {
    /// Attaches to the header segment of `{instance, schema, table_id, tag}`,
    /// creating it zero-filled (`EMPTY`, age 0) if this is the first process.
    pub fn attach(config: &MirrorConfig, table_id: u32, tag: &str) -> Result<Self, MirrorError> {
        let segment = segment_name(config, table_id, tag);
        let header = poll_bounded(tag, config.poll_attempts, config.poll_interval(), |_| {
            match ShmemConf::new().os_id(&segment).size(HEADER_SIZE).create() {
                Ok(mut shmem) => {
                    // The header outlives this process; `destroy` removes it.
                    shmem.set_owner(false);
                    tracing::debug!(target: "shmem", segment = %segment, "created mirror header");
                    Ok(Attempt::Ready(shmem))
                }
                Err(ShmemError::MappingIdExists) => {
                    match ShmemConf::new().os_id(&segment).open() {
                        // A creator that has not sized the segment yet looks short.
                        Ok(shmem) if shmem.len() >= HEADER_SIZE => Ok(Attempt::Ready(shmem)),
                        Ok(_) => Ok(Attempt::Retry),
                        Err(ShmemError::MapOpenFailed(_)) => Ok(Attempt::Retry),
                        Err(e) => Err(map_error(&segment, e)),
                    }
                }
                Err(e) => Err(map_error(&segment, e)),
            }
        })?;

        Ok(Self {
            config: config.clone(),
            tag: tag.to_string(),
            segment,
            header: SafeShmem(header),
            regions: Vec::new(),
            age_loaded: None,
        })
    }

    fn header(&self) -> &MirrorHeader {
        // SAFETY: `attach` checked the mapping holds at least `HEADER_SIZE` bytes;
        // shared mappings are page aligned and every field is atomic.
        unsafe { &*(self.header.0.as_ptr() as *const MirrorHeader) }
    }

    /// The OS identifier of the header segment.
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// The role this process plays in the protocol.
    pub fn role(&self) -> MirrorRole {
        self.config.role
    }

    /// The shared mutation counter.
    pub fn age(&self) -> u64 {
        self.header().age.load(Ordering::Acquire)
    }

    /// The age of the content this process has mapped, if any.
    pub fn age_loaded(&self) -> Option<u64> {
        self.age_loaded
    }

    /// The shared lifecycle state.
    pub fn state(&self) -> MirrorState {
        MirrorState::from_raw(self.header().state.load(Ordering::Acquire))
    }

    /// Whether the shared age moved past the content this process has mapped.
    pub fn is_stale(&self) -> bool {
        self.age_loaded != Some(self.age())
    }

    /// Records a mutation; returns the new age.
    pub fn bump_age(&self) -> u64 {
        self.header().age.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The number of regions this process has mapped.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// The bytes of a mapped region.
    pub fn region(&self, index: usize) -> Option<&[u8]> {
        self.regions.get(index).map(Region::bytes)
    }

    fn release(&mut self) {
        self.regions.clear();
        self.age_loaded = None;
    }

    /// Brings this process up to date with the shared age.
    ///
    /// `layout` returns the byte length of every region as the backing store
    /// currently has them; `fill` copies region `i` from the backing store.
    /// Loaders rebuild stale or missing content; readers only map content that
    /// is already published for the current age and otherwise report
    /// [`SyncOutcome::Unavailable`].
    pub fn sync<E, L, F>(&mut self, mut layout: L, mut fill: F) -> Result<SyncOutcome, E>
    where
        E: From<MirrorError>,
        L: FnMut() -> Result<Vec<usize>, E>,
        F: FnMut(usize, &mut [u8]) -> Result<(), E>,
    {
        let tag = self.tag.clone();
        let attempts = self.config.poll_attempts;
        let interval = self.config.poll_interval();
        poll_bounded(&tag, attempts, interval, |_| {
            self.try_sync(&mut layout, &mut fill)
        })
    }

    fn try_sync<E, L, F>(&mut self, layout: &mut L, fill: &mut F) -> Result<Attempt<SyncOutcome>, E>
    where
        E: From<MirrorError>,
        L: FnMut() -> Result<Vec<usize>, E>,
        F: FnMut(usize, &mut [u8]) -> Result<(), E>,
    {
        let raw = self.header().state.load(Ordering::Acquire);
        match MirrorState::from_raw(raw) {
            MirrorState::Loading => {
                self.release();
                Ok(Attempt::Retry)
            }
            MirrorState::Ready => {
                let age = self.age();
                let published = self.header().age_loaded.load(Ordering::Acquire);
                if published != age {
                    return match self.config.role {
                        MirrorRole::Loader => self.load(raw, layout, fill),
                        MirrorRole::Reader => Ok(self.unavailable()),
                    };
                }
                if self.age_loaded == Some(age) {
                    return Ok(Attempt::Ready(SyncOutcome::UpToDate));
                }
                let lengths = layout()?;
                match self.map_published(age, &lengths) {
                    Ok(()) => {
                        tracing::debug!(target: "shmem", segment = %self.segment, age, "attached published mirror");
                        Ok(Attempt::Ready(SyncOutcome::Attached))
                    }
                    Err(e) => {
                        tracing::warn!(target: "shmem", segment = %self.segment, error = %e, "published mirror unusable");
                        self.release();
                        match self.config.role {
                            MirrorRole::Loader => {
                                // Reset and run the full reload on the next attempt.
                                let _ = self.header().state.compare_exchange(
                                    MirrorState::READY,
                                    MirrorState::EMPTY,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                );
                                Ok(Attempt::Retry)
                            }
                            MirrorRole::Reader => Ok(self.unavailable()),
                        }
                    }
                }
            }
            MirrorState::Empty => match self.config.role {
                MirrorRole::Loader => self.load(raw, layout, fill),
                MirrorRole::Reader => Ok(self.unavailable()),
            },
        }
    }

    fn unavailable(&mut self) -> Attempt<SyncOutcome> {
        self.release();
        Attempt::Ready(SyncOutcome::Unavailable)
    }

    fn map_published(&mut self, age: u64, lengths: &[usize]) -> Result<(), MirrorError> {
        let published = self.header().regions.load(Ordering::Acquire);
        if published != lengths.len() as u64 {
            return Err(MirrorError::LayoutMismatch {
                region: lengths.len(),
                expected: lengths.len(),
                actual: usize::try_from(published).unwrap_or(usize::MAX),
            });
        }
        let mut regions = Vec::with_capacity(lengths.len());
        for (i, len) in lengths.iter().enumerate() {
            let name = region_name(&self.segment, i, age);
            regions.push(open_region(&name, i, *len)?);
        }
        self.regions = regions;
        self.age_loaded = Some(age);
        Ok(())
    }

    fn load<E, L, F>(&mut self, observed: u32, layout: &mut L, fill: &mut F) -> Result<Attempt<SyncOutcome>, E>
    where
        E: From<MirrorError>,
        L: FnMut() -> Result<Vec<usize>, E>,
        F: FnMut(usize, &mut [u8]) -> Result<(), E>,
    {
        if self
            .header()
            .state
            .compare_exchange(
                observed,
                MirrorState::LOADING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Another process moved the state first.
            return Ok(Attempt::Retry);
        }
        self.release();

        // Read the age before the backing store so a concurrent mutation leaves
        // the result stale instead of mislabelled.
        let age = self.age();
        let prev_age = self.header().age_loaded.load(Ordering::Acquire);
        let prev_regions = self.header().regions.load(Ordering::Acquire);

        let mut created = Vec::new();
        match self.populate(age, layout, fill, &mut created) {
            Ok(regions) => {
                let count = regions.len();
                self.regions = regions;
                self.age_loaded = Some(age);
                self.header().regions.store(count as u64, Ordering::Release);
                self.header().age_loaded.store(age, Ordering::Release);
                self.header()
                    .state
                    .store(MirrorState::READY, Ordering::Release);

                for i in 0..usize::try_from(prev_regions).unwrap_or(0) {
                    if prev_age != age || i >= count {
                        unlink(&region_name(&self.segment, i, prev_age));
                    }
                }
                mirror_metrics().inc_reloads(&self.tag);
                tracing::debug!(target: "shmem", segment = %self.segment, age, regions = count, "mirror loaded");
                Ok(Attempt::Ready(SyncOutcome::Loaded))
            }
            Err(e) => {
                for name in &created {
                    unlink(name);
                }
                self.header()
                    .state
                    .store(MirrorState::EMPTY, Ordering::Release);
                Err(e)
            }
        }
    }

    fn populate<E, L, F>(
        &self,
        age: u64,
        layout: &mut L,
        fill: &mut F,
        created: &mut Vec<String>,
    ) -> Result<Vec<Region>, E>
    where
        E: From<MirrorError>,
        L: FnMut() -> Result<Vec<usize>, E>,
        F: FnMut(usize, &mut [u8]) -> Result<(), E>,
    {
        let lengths = layout()?;
        let mut regions = Vec::with_capacity(lengths.len());
        for (i, len) in lengths.into_iter().enumerate() {
            let name = region_name(&self.segment, i, age);
            let mut region = create_region(&name, len)?;
            created.push(name);
            fill(i, region.bytes_mut())?;
            regions.push(region);
        }
        Ok(regions)
    }

    /// Discards the shared content after the backing table was truncated.
    ///
    /// Every process sees the age move and reloads on its next `sync`.
    pub fn invalidate(&mut self) {
        let header = self.header();
        let prev_age = header.age_loaded.load(Ordering::Acquire);
        let prev_regions = header.regions.swap(0, Ordering::AcqRel);
        header.state.store(MirrorState::EMPTY, Ordering::Release);
        let age = self.bump_age();
        for i in 0..usize::try_from(prev_regions).unwrap_or(0) {
            unlink(&region_name(&self.segment, i, prev_age));
        }
        self.release();
        tracing::debug!(target: "shmem", segment = %self.segment, age, "mirror invalidated");
    }

    /// Removes the header and every published region from the system.
    pub fn destroy(mut self) {
        let header = self.header();
        let prev_age = header.age_loaded.load(Ordering::Acquire);
        let prev_regions = header.regions.load(Ordering::Acquire);
        for i in 0..usize::try_from(prev_regions).unwrap_or(0) {
            unlink(&region_name(&self.segment, i, prev_age));
        }
        self.release();
        self.header.0.set_owner(true);
        tracing::debug!(target: "shmem", segment = %self.segment, "mirror destroyed");
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: MirrorState) {
        self.header().state.store(state.raw(), Ordering::Release);
    }
}
