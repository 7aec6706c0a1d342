// Path: crates/screening/src/screen.rs

//! Selectivity-ordered conjunctive screening.
//!
//! Per partition the query bits are visited rarest first. The accumulator
//! starts as all ones; every plane is read only over the byte window where the
//! accumulator still has ones and the bit occurs at all, then ANDed in. Rare
//! bits shrink the window quickly, so later planes cost few bytes.

use crate::bitplane::{ones, plane_bytes, test_bit};
use crate::cancel::CancellationCheck;
use crate::index::FingerprintIndex;
use crate::session::{ActiveScreen, ScreeningSession};
use molsift_telemetry::screening_metrics;
use molsift_types::error::ScreeningError;
use std::time::Instant;

/// Narrows `[lo, hi]` to its outermost non-zero bytes.
fn trim(acc: &[u8], lo: usize, hi: usize) -> Option<(usize, usize)> {
    let lo = (lo..=hi).find(|&i| acc.get(i).is_some_and(|b| *b != 0))?;
    let hi = (lo..=hi).rev().find(|&i| acc.get(i).is_some_and(|b| *b != 0))?;
    Some((lo, hi))
}

/// An accumulator with the first `used` bits set.
fn all_ones(used: usize) -> Vec<u8> {
    let mut acc = vec![0xff; plane_bytes(used)];
    if used % 8 != 0 {
        if let Some(last) = acc.last_mut() {
            *last = (1u8 << (used % 8)) - 1;
        }
    }
    acc
}

impl FingerprintIndex {
    pub(crate) fn query_bits(&self, fp: &[u8]) -> Result<Vec<usize>, ScreeningError> {
        self.check_width(fp)?;
        let bits = ones(fp);
        if bits.is_empty() {
            return Err(ScreeningError::EmptyQuery);
        }
        Ok(bits)
    }

    /// Starts a screen of `fp`, reloading the index first if it is stale.
    pub fn screen_init(&mut self, fp: &[u8]) -> Result<ScreeningSession, ScreeningError> {
        let mut query_ones = self.query_bits(fp)?;
        self.refresh()?;
        query_ones.sort_by_key(|&bit| self.popularity.get(bit).copied().unwrap_or(0));
        tracing::trace!(
            target: "screening",
            query = %hex::encode(fp),
            bits = query_ones.len(),
            "screen started"
        );
        Ok(ScreeningSession::new(query_ones, self.generation))
    }

    /// Whether the session has any bit to screen with.
    pub fn able_to_screen(&self, session: &ScreeningSession) -> bool {
        !session.query_ones.is_empty()
    }

    /// The fraction of fingerprint bits set in the query.
    pub fn query_ones_ratio(&self, session: &ScreeningSession) -> Result<f64, ScreeningError> {
        let width = self.width();
        if width == 0 {
            return Err(ScreeningError::ZeroWidth);
        }
        Ok(session.query_ones.len() as f64 / width as f64)
    }

    fn check_generation(&self, generation: u64) -> Result<(), ScreeningError> {
        if generation != self.generation {
            return Err(ScreeningError::StaleSession);
        }
        Ok(())
    }

    /// Opens the next partition. Returns `false` once every partition was screened.
    ///
    /// `cancel` is polled here, between partitions, and never inside one.
    pub fn screen_part_init(
        &self,
        session: &mut ScreeningSession,
        cancel: &dyn CancellationCheck,
    ) -> Result<bool, ScreeningError> {
        self.check_generation(session.generation)?;
        if let Some(reason) = cancel.cancelled() {
            tracing::debug!(target: "screening", reason = %reason, "screen cancelled");
            return Err(ScreeningError::Cancelled(reason));
        }
        if session.query_ones.is_empty() {
            return Err(ScreeningError::EmptyQuery);
        }

        let part = session.next_part;
        let Some(view) = self.partition_at(part) else {
            return Ok(false);
        };
        let used = view.meta.used;
        if used == 0 {
            return Ok(false);
        }
        session.items_read += used as u64;

        let mut order = session.query_ones.clone();
        order.sort_by_key(|&bit| view.meta.counters.get(bit).copied().unwrap_or(0));

        let accumulator = all_ones(used);
        let window = Some((0, accumulator.len() - 1));
        session.active = Some(ActiveScreen {
            part,
            base: view.base,
            used,
            source: view.source,
            order,
            next_bit: 0,
            accumulator,
            window,
            started: Instant::now(),
        });
        Ok(true)
    }

    /// ANDs the next query bit into the accumulator.
    ///
    /// Returns `false` when the query bits are exhausted or no slot survives.
    pub fn screen_part_next(&self, session: &mut ScreeningSession) -> Result<bool, ScreeningError> {
        self.check_generation(session.generation)?;
        let active = session
            .active
            .as_mut()
            .ok_or(ScreeningError::NoActivePartition)?;
        let Some(&bit) = active.order.get(active.next_bit) else {
            return Ok(false);
        };
        let Some((lo, hi)) = active.window else {
            return Ok(false);
        };
        active.next_bit += 1;

        let view = self
            .partition_at(active.part)
            .ok_or(ScreeningError::NoActivePartition)?;
        let window = trim(&active.accumulator, lo, hi).and_then(|(lo, hi)| {
            let (start, end) = view.meta.slot_range(bit)?;
            let (lo, hi) = (lo.max(start / 8), hi.min(end / 8));
            (lo <= hi).then_some((lo, hi))
        });

        let Some((lo, hi)) = window else {
            active.accumulator.fill(0);
            active.window = None;
            return Ok(true);
        };

        let mut plane = vec![0u8; hi - lo + 1];
        self.read_plane(active.part, active.source, bit, lo..hi + 1, &mut plane)?;
        let acc = &mut active.accumulator;
        acc[..lo].fill(0);
        acc[hi + 1..].fill(0);
        for (a, p) in acc[lo..=hi].iter_mut().zip(&plane) {
            *a &= p;
        }
        active.window = trim(acc, lo, hi);
        Ok(true)
    }

    /// Closes the active partition, appending its surviving ids to the session.
    pub fn screen_part_end(&self, session: &mut ScreeningSession) -> Result<(), ScreeningError> {
        self.check_generation(session.generation)?;
        let active = session
            .active
            .take()
            .ok_or(ScreeningError::NoActivePartition)?;
        let view = self
            .partition_at(active.part)
            .ok_or(ScreeningError::NoActivePartition)?;

        let mut ids = Vec::new();
        if active.window.is_some() {
            for slot in (0..active.used).filter(|&j| test_bit(&active.accumulator, j)) {
                let order = view.meta.mapping.get(slot).copied().ok_or_else(|| {
                    ScreeningError::CorruptPartition {
                        part: active.part,
                        reason: format!("slot {} has no mapping", slot),
                    }
                })?;
                ids.push(active.base + u64::from(order));
            }
        }
        ids.sort_unstable();

        let metrics = screening_metrics();
        metrics.inc_partitions_screened();
        metrics.inc_candidates_passed(ids.len() as u64);
        metrics.observe_partition_duration(active.started.elapsed().as_secs_f64());
        tracing::trace!(
            target: "screening",
            part = active.part,
            used = active.used,
            passed = ids.len(),
            "partition screened"
        );

        session.passed.extend(ids);
        session.next_part += 1;
        Ok(())
    }

    /// Runs the whole screen of `fp`, returning the ascending candidate ids.
    pub fn screen(
        &mut self,
        fp: &[u8],
        cancel: &dyn CancellationCheck,
    ) -> Result<Vec<u64>, ScreeningError> {
        let mut session = self.screen_init(fp)?;
        while self.screen_part_init(&mut session, cancel)? {
            while self.screen_part_next(&mut session)? {}
            self.screen_part_end(&mut session)?;
        }
        Ok(session.into_passed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_ones_masks_tail() {
        assert_eq!(all_ones(8), vec![0xff]);
        assert_eq!(all_ones(10), vec![0xff, 0b11]);
        assert_eq!(all_ones(1), vec![0b1]);
    }

    #[test]
    fn test_trim_finds_outer_non_zero_bytes() {
        let acc = [0, 0, 4, 0, 1, 0];
        assert_eq!(trim(&acc, 0, 5), Some((2, 4)));
        assert_eq!(trim(&acc, 3, 3), None);
        assert_eq!(trim(&acc, 4, 5), Some((4, 4)));
    }
}
