// Path: crates/shmem/src/header.rs
use std::sync::atomic::{AtomicU32, AtomicU64};

/// The lifecycle of the shared content of a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// Nothing has been published, or the content was invalidated.
    Empty,
    /// A loader is populating regions for the current age.
    Loading,
    /// Regions for `age_loaded` are published.
    Ready,
}

impl MirrorState {
    pub(crate) const EMPTY: u32 = 0;
    pub(crate) const LOADING: u32 = 1;
    pub(crate) const READY: u32 = 2;

    pub(crate) fn from_raw(raw: u32) -> Self {
        match raw {
            Self::LOADING => Self::Loading,
            Self::READY => Self::Ready,
            // Unknown values are treated as a header that must be rebuilt.
            _ => Self::Empty,
        }
    }

    pub(crate) fn raw(self) -> u32 {
        match self {
            Self::Empty => Self::EMPTY,
            Self::Loading => Self::LOADING,
            Self::Ready => Self::READY,
        }
    }
}

/// The record at the start of every header segment.
///
/// A freshly created segment is zero-filled, which decodes as `EMPTY` at age 0.
#[repr(C)]
pub(crate) struct MirrorHeader {
    pub state: AtomicU32,
    _reserved: u32,
    pub age: AtomicU64,
    pub age_loaded: AtomicU64,
    pub regions: AtomicU64,
}

pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<MirrorHeader>();
