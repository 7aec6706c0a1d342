// Path: crates/types/src/codec.rs

//! Defines the binary codec for every persisted fixed-width column.
//!
//! Counters, slot bounds and slot mappings are stored as packed little-endian
//! `u32` arrays; scalar columns are a single little-endian `u64`. Centralizing
//! the layout here keeps the writer and every reader process byte-compatible.

/// Width in bytes of one encoded `u32` element.
pub const U32_WIDTH: usize = 4;

/// Encodes a slice of `u32` values as a packed little-endian byte vector.
pub fn encode_u32s(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * U32_WIDTH);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decodes a packed little-endian `u32` array.
///
/// Fails if the byte length is not a multiple of four, which indicates a torn
/// or corrupted column.
pub fn decode_u32s(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.len() % U32_WIDTH != 0 {
        return Err(format!(
            "u32 array decode failed: length {} is not a multiple of {}",
            bytes.len(),
            U32_WIDTH
        ));
    }
    Ok(bytes
        .chunks_exact(U32_WIDTH)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encodes a scalar column value.
pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Decodes a scalar column value, failing on any length other than eight bytes.
pub fn decode_u64(bytes: &[u8]) -> Result<u64, String> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| format!("scalar decode failed: expected 8 bytes, got {}", bytes.len()))?;
    Ok(u64::from_le_bytes(arr))
}
