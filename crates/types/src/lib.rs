// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # molsift Types
//!
//! The foundational library of the molsift workspace: error enums shared by the
//! storage, shared-memory, blob-store and screening crates, the configuration
//! structures passed to `init`, and the little-endian array codec used for every
//! persisted column.
//!
//! ## Architectural Role
//!
//! As the base crate, `molsift-types` has minimal dependencies and is itself a
//! dependency for every other crate in the workspace. Keeping the error enums
//! here lets the facade convert between layers with plain `From` impls.

/// The tombstone byte written at the start of a logically removed record.
pub const TOMBSTONE_MARK: u8 = 1;

/// The little-endian codec for fixed-width persisted arrays.
pub mod codec;
/// Configuration structures for the fingerprint index, blob store and mirror.
pub mod config;
/// A unified set of all error types used across the workspace.
pub mod error;
