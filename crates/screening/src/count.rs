// Path: crates/screening/src/count.rs
//! Counting query bits per fingerprint, used to refresh bit popularity.

use crate::bitplane::{plane_bytes, test_bit};
use crate::cancel::CancellationCheck;
use crate::index::FingerprintIndex;
use crate::session::{ActiveCount, CountOnesSession};
use molsift_types::error::ScreeningError;

impl FingerprintIndex {
    /// Starts counting the bits of `fp` over every partition.
    pub fn count_ones_session(&mut self, fp: &[u8]) -> Result<CountOnesSession, ScreeningError> {
        let query_ones = self.query_bits(fp)?;
        self.refresh()?;
        Ok(CountOnesSession::new(query_ones, self.generation))
    }

    /// Opens the next partition. Returns `false` once every partition was counted.
    pub fn count_ones_init(
        &self,
        session: &mut CountOnesSession,
        cancel: &dyn CancellationCheck,
    ) -> Result<bool, ScreeningError> {
        if session.generation != self.generation {
            return Err(ScreeningError::StaleSession);
        }
        if let Some(reason) = cancel.cancelled() {
            return Err(ScreeningError::Cancelled(reason));
        }
        let part = session.next_part;
        let Some(view) = self.partition_at(part) else {
            return Ok(false);
        };
        if view.meta.used == 0 {
            return Ok(false);
        }
        let end = view.base as usize + view.meta.used;
        if session.one_counters.len() < end {
            session.one_counters.resize(end, 0);
        }
        session.active = Some(ActiveCount {
            part,
            base: view.base,
            used: view.meta.used,
            source: view.source,
            next_bit: 0,
        });
        Ok(true)
    }

    /// Counts one more query bit over the active partition.
    pub fn count_ones_next(&self, session: &mut CountOnesSession) -> Result<bool, ScreeningError> {
        if session.generation != self.generation {
            return Err(ScreeningError::StaleSession);
        }
        let active = session
            .active
            .as_mut()
            .ok_or(ScreeningError::NoActivePartition)?;
        let idx = active.next_bit;
        let Some(&bit) = session.query_ones.get(idx) else {
            return Ok(false);
        };
        active.next_bit += 1;

        let view = self
            .partition_at(active.part)
            .ok_or(ScreeningError::NoActivePartition)?;
        let mut plane = vec![0u8; plane_bytes(active.used)];
        self.read_plane(active.part, active.source, bit, 0..plane.len(), &mut plane)?;

        let mut carried = 0;
        for slot in (0..active.used).filter(|&j| test_bit(&plane, j)) {
            let Some(&order) = view.meta.mapping.get(slot) else {
                continue;
            };
            let id = active.base as usize + order as usize;
            if let Some(c) = session.one_counters.get_mut(id) {
                *c += 1;
            }
            carried += 1;
        }
        if let Some(total) = session.bit_totals.get_mut(idx) {
            *total += carried;
        }
        Ok(true)
    }

    /// Closes the active partition.
    pub fn count_ones_end(&self, session: &mut CountOnesSession) -> Result<(), ScreeningError> {
        session
            .active
            .take()
            .ok_or(ScreeningError::NoActivePartition)?;
        session.next_part += 1;
        Ok(())
    }

    /// Replaces the popularity of the counted bits with the session's totals.
    ///
    /// The totals steer query bit order until the next revalidation, which
    /// recounts popularity from every visible partition.
    pub fn refresh_popularity(&mut self, session: &CountOnesSession) {
        for (bit, total) in session.bit_totals() {
            if let Some(p) = self.popularity.get_mut(bit) {
                *p = total;
            }
        }
    }
}
