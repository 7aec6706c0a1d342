// Path: crates/blobstore/src/lib.rs
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

//! # molsift Blob Store
//!
//! An append-only store of opaque records. Records are packed into data blocks
//! of bounded size; a fixed-width index-entry log in row 0 maps every record id
//! to its `{block_no, offset, length}`. Removal only tombstones a record in
//! place. All blocks, including the log, are mirrored in shared memory so that
//! readers in other processes resolve ids without touching the backing store.

pub mod format;
pub mod store;

pub use format::{IndexEntry, Placement, DATA_COLUMN, INDEX_ENTRY_SIZE, INDEX_ROW};
pub use store::BlobStore;
