// Path: crates/screening/src/session.rs
//! Per-query iteration state.

use crate::index::PlaneSource;
use std::time::Instant;

/// The partition a screening session is working on.
#[derive(Debug)]
pub(crate) struct ActiveScreen {
    pub part: usize,
    pub base: u64,
    pub used: usize,
    pub source: PlaneSource,
    /// Query bits in ascending order of popularity within this partition.
    pub order: Vec<usize>,
    pub next_bit: usize,
    /// One bit per slot; the AND of every plane read so far.
    pub accumulator: Vec<u8>,
    /// Inclusive byte range of `accumulator` that may still hold ones.
    pub window: Option<(usize, usize)>,
    pub started: Instant,
}

/// A conjunctive screen of one query fingerprint across all partitions.
///
/// Created by [`FingerprintIndex::screen_init`](crate::FingerprintIndex::screen_init)
/// and driven by the `screen_part_*` methods of the same index.
#[derive(Debug)]
pub struct ScreeningSession {
    pub(crate) query_ones: Vec<usize>,
    pub(crate) passed: Vec<u64>,
    pub(crate) next_part: usize,
    pub(crate) active: Option<ActiveScreen>,
    pub(crate) generation: u64,
    pub(crate) items_read: u64,
}

impl ScreeningSession {
    pub(crate) fn new(query_ones: Vec<usize>, generation: u64) -> Self {
        Self {
            query_ones,
            passed: Vec::new(),
            next_part: 0,
            active: None,
            generation,
            items_read: 0,
        }
    }

    /// Set bits of the query, rarest first.
    pub fn query_ones(&self) -> &[usize] {
        &self.query_ones
    }

    /// Candidate ids of every finished partition, ascending.
    pub fn passed(&self) -> &[u64] {
        &self.passed
    }

    /// Consumes the session, returning its candidates.
    pub fn into_passed(self) -> Vec<u64> {
        self.passed
    }

    /// The partition being screened, if any.
    pub fn current_partition(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.part)
    }

    /// The index of the next partition `screen_part_init` will open.
    pub fn next_partition(&self) -> usize {
        self.next_part
    }

    /// The number of fingerprints in the partitions opened so far.
    pub fn items_read(&self) -> u64 {
        self.items_read
    }
}

/// The partition a count-ones session is working on.
#[derive(Debug)]
pub(crate) struct ActiveCount {
    pub part: usize,
    pub base: u64,
    pub used: usize,
    pub source: PlaneSource,
    pub next_bit: usize,
}

/// Counts, instead of intersecting, the query bits over all partitions.
#[derive(Debug)]
pub struct CountOnesSession {
    pub(crate) query_ones: Vec<usize>,
    pub(crate) next_part: usize,
    pub(crate) active: Option<ActiveCount>,
    pub(crate) generation: u64,
    pub(crate) one_counters: Vec<u32>,
    pub(crate) bit_totals: Vec<u64>,
}

impl CountOnesSession {
    pub(crate) fn new(query_ones: Vec<usize>, generation: u64) -> Self {
        let bits = query_ones.len();
        Self {
            query_ones,
            next_part: 0,
            active: None,
            generation,
            one_counters: Vec::new(),
            bit_totals: vec![0; bits],
        }
    }

    /// Set bits of the query, ascending.
    pub fn query_ones(&self) -> &[usize] {
        &self.query_ones
    }

    /// Per global id, how many of the query bits that fingerprint carries.
    pub fn one_counters(&self) -> &[u32] {
        &self.one_counters
    }

    /// Per query bit, the number of fingerprints carrying it.
    pub fn bit_totals(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.query_ones
            .iter()
            .copied()
            .zip(self.bit_totals.iter().copied())
    }
}
