// Path: crates/shmem/src/lib.rs
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

//! # molsift Shared Memory
//!
//! A versioned snapshot cache shared between independent processes. One small
//! header segment per logical table carries `{state, age, age_loaded, regions}`;
//! the data itself lives in one named region per block, named after the age at
//! which it was loaded so a reload never mutates a region another process may
//! still be reading.
//!
//! Coherence relies only on the atomics in the header. A process that sees the
//! header in `LOADING` backs off and polls a bounded number of times; no caller
//! can spin forever.

mod header;
mod mirror;
mod naming;
mod poll;

pub use header::MirrorState;
pub use mirror::{SharedMirror, SyncOutcome};
pub use naming::{region_name, segment_name, BLOB_TAG, FINGERPRINT_TAG};
