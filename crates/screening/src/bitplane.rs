// Path: crates/screening/src/bitplane.rs

//! The transposed fingerprint matrix of one block.
//!
//! Plane `b` holds bit `b` of every fingerprint in the block, one bit per slot:
//! slot `j` is bit `j % 8` of byte `j / 8` of the plane. Planes are stored back
//! to back, each `ceil(capacity / 8)` bytes long, which is also the persisted
//! layout of the `bits` column.

use molsift_types::error::ScreeningError;

/// Sentinel slot bound of a bit that occurs nowhere in a block.
pub const NO_SLOT: u32 = u32::MAX;

/// The number of bytes one plane of a `capacity`-slot block occupies.
pub fn plane_bytes(capacity: usize) -> usize {
    capacity.div_ceil(8)
}

/// Whether bit `index` of a little-endian bit string is set.
pub fn test_bit(bytes: &[u8], index: usize) -> bool {
    bytes
        .get(index / 8)
        .is_some_and(|b| b & (1 << (index % 8)) != 0)
}

/// Positions of the set bits of a fingerprint, in ascending order.
pub fn ones(fp: &[u8]) -> Vec<usize> {
    (0..fp.len() * 8).filter(|&i| test_bit(fp, i)).collect()
}

/// A `width x capacity` bit matrix stored one plane per bit position.
#[derive(Clone, PartialEq, Eq)]
pub struct BitPlanes {
    width: usize,
    capacity: usize,
    plane_bytes: usize,
    data: Vec<u8>,
}

impl std::fmt::Debug for BitPlanes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitPlanes")
            .field("width", &self.width)
            .field("capacity", &self.capacity)
            .field("plane_bytes", &self.plane_bytes)
            .finish()
    }
}

impl BitPlanes {
    /// An all-zero matrix.
    pub fn new(width: usize, capacity: usize) -> Self {
        let plane_bytes = plane_bytes(capacity);
        Self {
            width,
            capacity,
            plane_bytes,
            data: vec![0; width * plane_bytes],
        }
    }

    /// Wraps persisted plane bytes, which must cover exactly `width` planes.
    pub fn from_bytes(width: usize, capacity: usize, data: Vec<u8>) -> Result<Self, ScreeningError> {
        let plane_bytes = plane_bytes(capacity);
        if data.len() != width * plane_bytes {
            return Err(ScreeningError::CorruptPartition {
                part: 0,
                reason: format!(
                    "bit matrix has {} bytes, expected {} planes of {} bytes",
                    data.len(),
                    width,
                    plane_bytes
                ),
            });
        }
        Ok(Self {
            width,
            capacity,
            plane_bytes,
            data,
        })
    }

    /// The number of planes.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The number of slots per plane.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The length in bytes of one plane.
    pub fn plane_bytes(&self) -> usize {
        self.plane_bytes
    }

    /// The whole matrix, plane after plane.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn check(&self, bit: usize, slot: usize) -> Result<(), ScreeningError> {
        if bit >= self.width {
            return Err(ScreeningError::BitOutOfRange {
                bit,
                width: self.width,
            });
        }
        if slot >= self.capacity {
            return Err(ScreeningError::SlotOutOfRange {
                slot,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// The bytes of plane `bit`.
    pub fn plane(&self, bit: usize) -> Result<&[u8], ScreeningError> {
        let start = bit * self.plane_bytes;
        self.data
            .get(start..start + self.plane_bytes)
            .filter(|_| bit < self.width)
            .ok_or(ScreeningError::BitOutOfRange {
                bit,
                width: self.width,
            })
    }

    /// Whether `slot` has `bit` set.
    pub fn get(&self, bit: usize, slot: usize) -> Result<bool, ScreeningError> {
        self.check(bit, slot)?;
        Ok(self.contains(bit, slot))
    }

    /// Sets `bit` of `slot`.
    pub fn set(&mut self, bit: usize, slot: usize) -> Result<(), ScreeningError> {
        self.check(bit, slot)?;
        let idx = bit * self.plane_bytes + slot / 8;
        if let Some(byte) = self.data.get_mut(idx) {
            *byte |= 1 << (slot % 8);
        }
        Ok(())
    }

    /// Like [`BitPlanes::get`], reporting out-of-range positions as unset.
    pub(crate) fn contains(&self, bit: usize, slot: usize) -> bool {
        bit < self.width
            && slot < self.capacity
            && test_bit(&self.data[bit * self.plane_bytes..], slot)
    }

    /// The number of slots with `bit` set.
    pub fn popcount(&self, bit: usize) -> Result<u32, ScreeningError> {
        Ok(self.plane(bit)?.iter().map(|b| b.count_ones()).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_layout_is_lsb_first() {
        let mut planes = BitPlanes::new(3, 10);
        assert_eq!(planes.plane_bytes(), 2);
        planes.set(1, 0).unwrap();
        planes.set(1, 9).unwrap();
        planes.set(2, 3).unwrap();

        assert_eq!(planes.plane(0).unwrap(), &[0, 0]);
        assert_eq!(planes.plane(1).unwrap(), &[0b0000_0001, 0b0000_0010]);
        assert_eq!(planes.plane(2).unwrap(), &[0b0000_1000, 0]);
        assert_eq!(planes.popcount(1).unwrap(), 2);
        assert!(planes.get(2, 3).unwrap());
        assert!(!planes.get(2, 4).unwrap());
    }

    #[test]
    fn test_bounds_are_checked() {
        let mut planes = BitPlanes::new(8, 4);
        assert!(matches!(
            planes.set(8, 0),
            Err(ScreeningError::BitOutOfRange { bit: 8, width: 8 })
        ));
        assert!(matches!(
            planes.get(0, 4),
            Err(ScreeningError::SlotOutOfRange { slot: 4, capacity: 4 })
        ));
        assert!(planes.plane(8).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(BitPlanes::from_bytes(4, 16, vec![0; 8]).is_ok());
        assert!(matches!(
            BitPlanes::from_bytes(4, 16, vec![0; 7]),
            Err(ScreeningError::CorruptPartition { .. })
        ));
    }

    #[test]
    fn test_ones_lists_set_bits() {
        assert_eq!(ones(&[0b1000_0001, 0b0000_0100]), vec![0, 7, 10]);
        assert!(ones(&[0, 0]).is_empty());
    }
}
