// Path: crates/screening/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # molsift Screening
//!
//! A fingerprint index laid out for partial reads. Fingerprints are stored in
//! fixed-capacity partitions, each transposed into one bit plane per fingerprint
//! bit, so a query reads only the planes of the bits it sets. Before a partition
//! is persisted its slots are reordered to cluster rare bits, and each plane
//! records the slot range it occupies; screening visits the query bits rarest
//! first and reads every later plane only inside the window the earlier ones
//! left open.
//!
//! The result of a screen is a superset of the true matches: every stored
//! fingerprint that contains the query is returned.
//!
//! [`MoleculeIndex`] pairs the index with a [`molsift_blobstore::BlobStore`]
//! holding the records the fingerprints describe.

pub mod bitplane;
pub mod block;
pub mod cancel;
mod count;
pub mod facade;
mod index;
pub mod optimize;
mod screen;
pub mod session;

pub use bitplane::{BitPlanes, NO_SLOT};
pub use block::BlockMeta;
pub use cancel::{CancelToken, CancellationCheck, NeverCancel};
pub use facade::{ExactMatcher, MoleculeIndex};
pub use index::FingerprintIndex;
pub use session::{CountOnesSession, ScreeningSession};
