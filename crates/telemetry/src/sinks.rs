// Path: crates/telemetry/src/sinks.rs
//! Defines abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns the configured error metrics sink, or a no-op sink if none is installed.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the configured screening metrics sink, or a no-op sink if none is installed.
pub fn screening_metrics() -> &'static dyn ScreeningMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the configured storage metrics sink, or a no-op sink if none is installed.
pub fn storage_metrics() -> &'static dyn StorageMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the configured mirror metrics sink, or a no-op sink if none is installed.
pub fn mirror_metrics() -> &'static dyn MirrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

// --- Trait Definitions ---

/// A sink for metrics related to fingerprint screening.
pub trait ScreeningMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the total number of bit-plane bytes read while screening.
    fn inc_plane_bytes_read(&self, bytes: u64);
    /// Increments the number of partitions screened.
    fn inc_partitions_screened(&self);
    /// Increments the number of candidates that passed screening.
    fn inc_candidates_passed(&self, count: u64);
    /// Observes the time spent screening one partition.
    fn observe_partition_duration(&self, duration_secs: f64);
    /// Observes the time spent reordering a block before it is persisted.
    fn observe_optimize_duration(&self, duration_secs: f64);
}
impl ScreeningMetricsSink for NopSink {
    fn inc_plane_bytes_read(&self, _bytes: u64) {}
    fn inc_partitions_screened(&self) {}
    fn inc_candidates_passed(&self, _count: u64) {}
    fn observe_partition_duration(&self, _duration_secs: f64) {}
    fn observe_optimize_duration(&self, _duration_secs: f64) {}
}

/// A sink for metrics related to the blob store and its backing tables.
pub trait StorageMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the total number of record bytes appended to the blob store.
    fn inc_blob_bytes_appended(&self, bytes: u64);
    /// Increments the number of tombstones written.
    fn inc_tombstones(&self);
    /// Increments the number of fingerprint partitions persisted.
    fn inc_partitions_flushed(&self);
}
impl StorageMetricsSink for NopSink {
    fn inc_blob_bytes_appended(&self, _bytes: u64) {}
    fn inc_tombstones(&self) {}
    fn inc_partitions_flushed(&self) {}
}

/// A sink for metrics related to the shared-memory mirror.
pub trait MirrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the number of full mirror reloads, labeled by segment tag.
    fn inc_reloads(&self, tag: &str);
    /// Increments the number of polls spent waiting on another loader.
    fn inc_poll_retries(&self, tag: &str);
}
impl MirrorMetricsSink for NopSink {
    fn inc_reloads(&self, _tag: &str) {}
    fn inc_poll_retries(&self, _tag: &str) {}
}

/// A sink for recording structured error metrics.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for a specific error, categorized by its kind and variant.
    fn inc_error(&self, kind: &'static str, variant: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str, _variant: &'static str) {}
}

/// A unified sink that implements all domain-specific traits, providing a single
/// point of implementation for metrics backends like Prometheus.
pub trait MetricsSink:
    ScreeningMetricsSink + StorageMetricsSink + MirrorMetricsSink + ErrorMetricsSink
{
}

// Blanket implementation to allow any type that implements all sub-traits
// to be used as a `MetricsSink`.
impl<T> MetricsSink for T where
    T: ScreeningMetricsSink + StorageMetricsSink + MirrorMetricsSink + ErrorMetricsSink
{
}
