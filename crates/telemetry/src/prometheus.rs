// Path: crates/telemetry/src/prometheus.rs
//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_histogram, register_int_counter, register_int_counter_vec,
    Histogram, IntCounter, IntCounterVec,
};

// --- Metric Statics ---
// Collectors are initialized exactly once by `install`.

static SCREEN_PLANE_BYTES_READ_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static SCREEN_PARTITIONS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static SCREEN_CANDIDATES_PASSED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static SCREEN_PARTITION_DURATION_SECONDS: OnceCell<Histogram> = OnceCell::new();
static OPTIMIZE_DURATION_SECONDS: OnceCell<Histogram> = OnceCell::new();
static BLOB_BYTES_APPENDED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static BLOB_TOMBSTONES_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static PARTITIONS_FLUSHED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static MIRROR_RELOADS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static MIRROR_POLL_RETRIES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

/// The Prometheus-backed implementation of every sink trait.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

/// Fetches a collector, skipping the observation if `install()` was never called.
macro_rules! with_metric {
    ($metric:ident, |$m:ident| $body:expr) => {
        if let Some($m) = $metric.get() {
            $body;
        }
    };
}

impl ScreeningMetricsSink for PrometheusSink {
    fn inc_plane_bytes_read(&self, bytes: u64) {
        with_metric!(SCREEN_PLANE_BYTES_READ_TOTAL, |m| m.inc_by(bytes));
    }
    fn inc_partitions_screened(&self) {
        with_metric!(SCREEN_PARTITIONS_TOTAL, |m| m.inc());
    }
    fn inc_candidates_passed(&self, count: u64) {
        with_metric!(SCREEN_CANDIDATES_PASSED_TOTAL, |m| m.inc_by(count));
    }
    fn observe_partition_duration(&self, duration_secs: f64) {
        with_metric!(SCREEN_PARTITION_DURATION_SECONDS, |m| m
            .observe(duration_secs));
    }
    fn observe_optimize_duration(&self, duration_secs: f64) {
        with_metric!(OPTIMIZE_DURATION_SECONDS, |m| m.observe(duration_secs));
    }
}

impl StorageMetricsSink for PrometheusSink {
    fn inc_blob_bytes_appended(&self, bytes: u64) {
        with_metric!(BLOB_BYTES_APPENDED_TOTAL, |m| m.inc_by(bytes));
    }
    fn inc_tombstones(&self) {
        with_metric!(BLOB_TOMBSTONES_TOTAL, |m| m.inc());
    }
    fn inc_partitions_flushed(&self) {
        with_metric!(PARTITIONS_FLUSHED_TOTAL, |m| m.inc());
    }
}

impl MirrorMetricsSink for PrometheusSink {
    fn inc_reloads(&self, tag: &str) {
        with_metric!(MIRROR_RELOADS_TOTAL, |m| m.with_label_values(&[tag]).inc());
    }
    fn inc_poll_retries(&self, tag: &str) {
        with_metric!(MIRROR_POLL_RETRIES_TOTAL, |m| m
            .with_label_values(&[tag])
            .inc());
    }
}

impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str, variant: &'static str) {
        with_metric!(ERRORS_TOTAL, |m| m.with_label_values(&[kind, variant]).inc());
    }
}

/// Stores a freshly registered collector; a second install is a registration error.
fn set_once<T>(cell: &OnceCell<T>, value: T) -> Result<(), prometheus::Error> {
    cell.set(value).map_err(|_| prometheus::Error::AlreadyReg)
}

/// Registers all Prometheus collectors and publishes the sink as the global `SINK`.
///
/// Must be called at most once per process.
pub fn install() -> Result<&'static dyn MetricsSink, prometheus::Error> {
    set_once(
        &SCREEN_PLANE_BYTES_READ_TOTAL,
        register_int_counter!(
            "molsift_screen_plane_bytes_read_total",
            "Total bit-plane bytes read while screening."
        )?,
    )?;
    set_once(
        &SCREEN_PARTITIONS_TOTAL,
        register_int_counter!(
            "molsift_screen_partitions_total",
            "Total partitions screened."
        )?,
    )?;
    set_once(
        &SCREEN_CANDIDATES_PASSED_TOTAL,
        register_int_counter!(
            "molsift_screen_candidates_passed_total",
            "Total candidate ids that passed fingerprint screening."
        )?,
    )?;
    set_once(
        &SCREEN_PARTITION_DURATION_SECONDS,
        register_histogram!(
            "molsift_screen_partition_duration_seconds",
            "Latency of screening a single partition.",
            exponential_buckets(0.0001, 2.0, 16)?
        )?,
    )?;
    set_once(
        &OPTIMIZE_DURATION_SECONDS,
        register_histogram!(
            "molsift_optimize_duration_seconds",
            "Latency of reordering a fingerprint block before persisting it.",
            exponential_buckets(0.0001, 2.0, 16)?
        )?,
    )?;
    set_once(
        &BLOB_BYTES_APPENDED_TOTAL,
        register_int_counter!(
            "molsift_blob_bytes_appended_total",
            "Total record bytes appended to the blob store."
        )?,
    )?;
    set_once(
        &BLOB_TOMBSTONES_TOTAL,
        register_int_counter!(
            "molsift_blob_tombstones_total",
            "Total records tombstoned in the blob store."
        )?,
    )?;
    set_once(
        &PARTITIONS_FLUSHED_TOTAL,
        register_int_counter!(
            "molsift_partitions_flushed_total",
            "Total fingerprint partitions persisted."
        )?,
    )?;
    set_once(
        &MIRROR_RELOADS_TOTAL,
        register_int_counter_vec!(
            "molsift_mirror_reloads_total",
            "Total full reloads of a shared-memory mirror.",
            &["tag"]
        )?,
    )?;
    set_once(
        &MIRROR_POLL_RETRIES_TOTAL,
        register_int_counter_vec!(
            "molsift_mirror_poll_retries_total",
            "Total polls spent waiting for another process to finish loading.",
            &["tag"]
        )?,
    )?;
    set_once(
        &ERRORS_TOTAL,
        register_int_counter_vec!(
            "molsift_errors_total",
            "Total number of errors, categorized by type and variant.",
            &["kind", "variant"]
        )?,
    )?;

    static PROM_SINK: PrometheusSink = PrometheusSink;
    // Losing the race to another sink leaves that sink in place.
    let _ = SINK.set(&PROM_SINK);
    Ok(&PROM_SINK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_registers_and_counts() {
        let sink = install().unwrap();
        sink.inc_tombstones();
        sink.inc_reloads("fp");
        sink.inc_error("blobstore", "BLOB_OUT_OF_RANGE");

        let families = prometheus::gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"molsift_blob_tombstones_total".to_string()));
        assert!(names.contains(&"molsift_mirror_reloads_total".to_string()));
        assert_eq!(
            BLOB_TOMBSTONES_TOTAL.get().map(|c| c.get()),
            Some(1)
        );
    }
}
