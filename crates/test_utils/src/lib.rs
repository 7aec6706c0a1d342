// Path: crates/test_utils/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # molsift Test Utilities
//!
//! Deterministic randomness, fingerprint fixtures and assertion macros shared
//! by the tests of every molsift crate.

pub mod assertions;
pub mod fixtures;
pub mod randomness;

pub use randomness::TestRng;
