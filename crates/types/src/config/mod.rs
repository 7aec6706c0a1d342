// Path: crates/types/src/config/mod.rs

//! Shared configuration structures for the fingerprint index, the blob store and
//! the shared-memory mirror.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration of the transposed fingerprint index.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FingerprintConfig {
    /// Fingerprint width in bytes; the bit width is `fp_bytes * 8`.
    #[serde(default = "default_fp_bytes")]
    pub fp_bytes: usize,
    /// Optional `[min, max)` byte range of bits the optimizer always ranks first.
    /// `None` treats every bit as priority.
    #[serde(default)]
    pub priority_bytes: Option<(usize, usize)>,
    /// Number of fingerprint slots per partition.
    #[serde(default = "default_chunk_capacity")]
    pub chunk_capacity: usize,
}

fn default_fp_bytes() -> usize {
    64
}
fn default_chunk_capacity() -> usize {
    8192
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            fp_bytes: default_fp_bytes(),
            priority_bytes: None,
            chunk_capacity: default_chunk_capacity(),
        }
    }
}

impl FingerprintConfig {
    /// Builds a configuration for `fp_bytes`-wide fingerprints and the given capacity.
    pub fn new(fp_bytes: usize, chunk_capacity: usize) -> Self {
        Self {
            fp_bytes,
            priority_bytes: None,
            chunk_capacity,
        }
    }

    /// The fingerprint width in bits.
    pub fn width_bits(&self) -> usize {
        self.fp_bytes * 8
    }

    /// The bit positions the optimizer treats as priority bits.
    pub fn priority_bits(&self) -> Range<usize> {
        match self.priority_bytes {
            Some((min, max)) => min * 8..max * 8,
            None => 0..self.width_bits(),
        }
    }

    /// Checks the configuration for values that would make the index unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fp_bytes == 0 {
            return Err(ConfigError::Invalid("fp_bytes must be positive".into()));
        }
        if self.chunk_capacity == 0 {
            return Err(ConfigError::Invalid("chunk_capacity must be positive".into()));
        }
        if self.chunk_capacity > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "chunk_capacity {} does not fit the u32 slot encoding",
                self.chunk_capacity
            )));
        }
        if let Some((min, max)) = self.priority_bytes {
            if min > max || max > self.fp_bytes {
                return Err(ConfigError::Invalid(format!(
                    "priority byte range {}..{} is outside 0..{}",
                    min, max, self.fp_bytes
                )));
            }
        }
        Ok(())
    }
}

/// Configuration of the append-only blob store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BlobStoreConfig {
    /// The maximum number of bytes in one data block.
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,
}

fn default_max_block_size() -> usize {
    1024 * 1024
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            max_block_size: default_max_block_size(),
        }
    }
}

/// Whether a process may rebuild the shared mirror or only attach to it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum MirrorRole {
    /// May transition the mirror to `LOADING` and populate it.
    #[default]
    Loader,
    /// Only maps published regions; falls back to backing-store reads otherwise.
    Reader,
}

/// Configuration of the shared-memory mirror and its busy-poll protocol.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Deployment instance name; the first component of every segment name.
    #[serde(default = "default_instance")]
    pub instance: String,
    /// Schema or namespace; the second component of every segment name.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Maximum number of polls while another process is loading.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    /// Initial delay between polls, doubled after every attempt.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// The role this process plays in the coherence protocol.
    #[serde(default)]
    pub role: MirrorRole,
}

fn default_instance() -> String {
    "local".to_string()
}
fn default_schema() -> String {
    "public".to_string()
}
fn default_poll_attempts() -> u32 {
    64
}
fn default_poll_interval_ms() -> u64 {
    2
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            schema: default_schema(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            role: MirrorRole::default(),
        }
    }
}

impl MirrorConfig {
    /// The initial poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns a copy of this configuration with a different role.
    pub fn with_role(&self, role: MirrorRole) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }
}

/// Top-level configuration for one logical molecule index.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Numeric table id; names the backing tables and the shared segments.
    pub context_id: u32,
    /// Directory holding the coarse table lock files.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    /// Fingerprint index settings.
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    /// Blob store settings.
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    /// Shared-memory mirror settings.
    #[serde(default)]
    pub mirror: MirrorConfig,
}

fn default_lock_dir() -> PathBuf {
    std::env::temp_dir()
}

impl EngineConfig {
    /// Builds a configuration with defaults for everything but the table id.
    pub fn new(context_id: u32) -> Self {
        Self {
            context_id,
            lock_dir: default_lock_dir(),
            fingerprint: FingerprintConfig::default(),
            blob_store: BlobStoreConfig::default(),
            mirror: MirrorConfig::default(),
        }
    }

    /// Parses and validates a TOML configuration document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validates every nested section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fingerprint.validate()?;
        if self.blob_store.max_block_size == 0 {
            return Err(ConfigError::Invalid("max_block_size must be positive".into()));
        }
        if self.mirror.poll_attempts == 0 {
            return Err(ConfigError::Invalid("poll_attempts must be positive".into()));
        }
        Ok(())
    }
}
