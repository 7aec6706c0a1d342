// Path: crates/types/src/error/mod.rs
//! Core error types for the molsift screening engine.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is outside its permitted range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration text could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "CONFIG_INVALID",
            Self::Io(_) => "CONFIG_IO",
            Self::Parse(_) => "CONFIG_PARSE",
        }
    }
}

/// Errors originating from the backing large-object store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A generic error originating from the underlying backend (e.g., redb).
    #[error("backend error: {0}")]
    Backend(String),
    /// The logical table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),
    /// The requested row does not exist in the table.
    #[error("row {row} not found in table {table}")]
    RowNotFound {
        /// The table that was searched.
        table: String,
        /// The missing row id.
        row: u64,
    },
    /// The coarse table lock could not be taken or released.
    #[error("lock error on {resource}: {reason}")]
    Lock {
        /// The locked resource (lock file path).
        resource: String,
        /// The underlying failure.
        reason: String,
    },
    /// A filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored column could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::TableNotFound(_) => "STORAGE_TABLE_NOT_FOUND",
            Self::RowNotFound { .. } => "STORAGE_ROW_NOT_FOUND",
            Self::Lock { .. } => "STORAGE_LOCK_FAILED",
            Self::Io(_) => "STORAGE_IO",
            Self::Decode(_) => "STORAGE_DECODE_ERROR",
        }
    }
}

/// Errors raised by the shared-memory mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// A shared-memory segment could not be created or opened.
    #[error("failed to map shared memory '{name}': {reason}")]
    Map {
        /// The OS identifier of the segment.
        name: String,
        /// The underlying failure.
        reason: String,
    },
    /// Another process kept the mirror in the loading state for every poll attempt.
    #[error("shared memory mirror still loading after {attempts} attempts")]
    Busy {
        /// The number of polls performed before giving up.
        attempts: u32,
    },
    /// A published region does not match the layout the caller expects.
    #[error("region {region} has {actual} bytes, expected {expected}")]
    LayoutMismatch {
        /// The region index.
        region: usize,
        /// The length derived from the backing store.
        expected: usize,
        /// The length found in shared memory.
        actual: usize,
    },
    /// A published region disappeared while the mirror was ready.
    #[error("shared memory region '{0}' vanished")]
    Vanished(String),
}

impl ErrorCode for MirrorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Map { .. } => "MIRROR_MAP_FAILED",
            Self::Busy { .. } => "MIRROR_BUSY",
            Self::LayoutMismatch { .. } => "MIRROR_LAYOUT_MISMATCH",
            Self::Vanished(_) => "MIRROR_VANISHED",
        }
    }
}

/// Errors raised by the append-only blob store.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// The requested id is not below the record count.
    #[error("record {id} out of range (count {count})")]
    OutOfRange {
        /// The requested record id.
        id: u64,
        /// The number of records in the store.
        count: u64,
    },
    /// The index-entry log row (row 0) is absent.
    #[error("missing index log")]
    MissingIndex,
    /// The index-entry log is not a whole number of records.
    #[error("index log size {length} is not a multiple of {record}")]
    IndexSizeMismatch {
        /// The persisted length in bytes.
        length: u64,
        /// The fixed record width in bytes.
        record: usize,
    },
    /// A record cannot fit into a single block.
    #[error("record of {length} bytes exceeds the block cap of {cap} bytes")]
    RecordTooLarge {
        /// The record length in bytes.
        length: usize,
        /// The configured block size cap.
        cap: usize,
    },
    /// A write operation was attempted before `validate_for_insert`.
    #[error("blob store is not open for insert")]
    NotWritable,
    /// An index entry points outside its block.
    #[error("corrupt index entry for record {0}")]
    CorruptEntry(u64),
    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// The shared-memory mirror failed.
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
}

impl ErrorCode for BlobStoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::OutOfRange { .. } => "BLOB_OUT_OF_RANGE",
            Self::MissingIndex => "BLOB_MISSING_INDEX",
            Self::IndexSizeMismatch { .. } => "BLOB_INDEX_SIZE_MISMATCH",
            Self::RecordTooLarge { .. } => "BLOB_RECORD_TOO_LARGE",
            Self::NotWritable => "BLOB_NOT_WRITABLE",
            Self::CorruptEntry(_) => "BLOB_CORRUPT_ENTRY",
            Self::Storage(e) => e.code(),
            Self::Mirror(e) => e.code(),
        }
    }
}

/// Errors raised by the fingerprint index and its screening sessions.
#[derive(Debug, Error)]
pub enum ScreeningError {
    /// A fingerprint does not have the configured width.
    #[error("invalid fingerprint width: expected {expected} bytes, got {got}")]
    InvalidFingerprintWidth {
        /// The configured width in bytes.
        expected: usize,
        /// The width of the offending fingerprint in bytes.
        got: usize,
    },
    /// The configured fingerprint width is zero.
    #[error("fingerprint width is zero")]
    ZeroWidth,
    /// The query fingerprint has no bits set.
    #[error("query fingerprint has no bits set")]
    EmptyQuery,
    /// The caller's cancellation handler asked to stop.
    #[error("screening cancelled: {0}")]
    Cancelled(String),
    /// A partition-level call was made without an active partition.
    #[error("no active partition in session")]
    NoActivePartition,
    /// A slot index is outside the block capacity.
    #[error("slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange {
        /// The offending slot.
        slot: usize,
        /// The block capacity.
        capacity: usize,
    },
    /// A bit position is outside the fingerprint width.
    #[error("bit {bit} out of range (width {width})")]
    BitOutOfRange {
        /// The offending bit position.
        bit: usize,
        /// The fingerprint width in bits.
        width: usize,
    },
    /// The index was mutated by this handle after the session started.
    #[error("screening session is stale; start a new one")]
    StaleSession,
    /// A persisted partition row is inconsistent.
    #[error("corrupt partition {part}: {reason}")]
    CorruptPartition {
        /// The partition index.
        part: usize,
        /// What was inconsistent.
        reason: String,
    },
    /// The blob store and fingerprint index disagree on the next id.
    #[error("id mismatch: blob store assigned {blob}, fingerprint index expects {fingerprint}")]
    IdMismatch {
        /// The id returned by the blob store.
        blob: u64,
        /// The id implied by fingerprint insertion order.
        fingerprint: u64,
    },
    /// A write operation was attempted before `validate_for_update`.
    #[error("fingerprint index is not open for update")]
    NotWritable,
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// The shared-memory mirror failed.
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
    /// The blob store failed.
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
}

impl ErrorCode for ScreeningError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidFingerprintWidth { .. } => "SCREEN_INVALID_FP_WIDTH",
            Self::ZeroWidth => "SCREEN_ZERO_WIDTH",
            Self::EmptyQuery => "SCREEN_EMPTY_QUERY",
            Self::Cancelled(_) => "SCREEN_CANCELLED",
            Self::NoActivePartition => "SCREEN_NO_ACTIVE_PARTITION",
            Self::SlotOutOfRange { .. } => "SCREEN_SLOT_OUT_OF_RANGE",
            Self::BitOutOfRange { .. } => "SCREEN_BIT_OUT_OF_RANGE",
            Self::StaleSession => "SCREEN_STALE_SESSION",
            Self::CorruptPartition { .. } => "SCREEN_CORRUPT_PARTITION",
            Self::IdMismatch { .. } => "SCREEN_ID_MISMATCH",
            Self::NotWritable => "SCREEN_NOT_WRITABLE",
            Self::Config(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::Mirror(e) => e.code(),
            Self::BlobStore(e) => e.code(),
        }
    }
}
