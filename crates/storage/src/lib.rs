// Path: crates/storage/src/lib.rs
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

//! Byte-addressable large-object storage for the molsift engine.
//!
//! Tables hold numbered rows; every row owns a set of independently growable
//! byte columns and small `u64` scalar columns. The fingerprint index and the
//! blob store only ever address their data through the [`LobStore`] trait, so
//! the redb backend and the in-memory backend are interchangeable.

pub mod lob;
pub mod lock;
pub mod mem;
pub mod redb_lob_store;

pub use lob::{fingerprint_table, storage_table, LobStore};
pub use lock::TableLock;
pub use mem::MemLobStore;
pub use redb_lob_store::RedbLobStore;
