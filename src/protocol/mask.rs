//! Payload masking: XOR with a 4-byte key at offset `i % 4`.
//!
//! Masking is its own inverse, so the same functions mask and unmask.

/// Byte-at-a-time XOR masking.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Word-at-a-time XOR masking; same result as [`apply_mask`].
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let wide = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ wide;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // Chunks are multiples of 8, so the tail starts at key offset 0.
    apply_mask(chunks.into_remainder(), mask);
}

/// Generates masking keys for outbound client frames.
///
/// Seeded once from the OS RNG; each key is a mixed counter step, which
/// keeps per-frame cost off the syscall path.
#[derive(Debug, Clone)]
pub struct MaskGenerator {
    state: u32,
}

impl MaskGenerator {
    /// Create a generator seeded from the OS RNG.
    #[must_use]
    pub fn new() -> Self {
        let mut seed = [0u8; 4];
        let state = match getrandom::getrandom(&mut seed) {
            Ok(()) => u32::from_le_bytes(seed),
            Err(_) => {
                use std::time::{SystemTime, UNIX_EPOCH};
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.subsec_nanos())
                    .unwrap_or(0x1234_5678)
            }
        };
        Self { state }
    }

    /// Next 4-byte masking key.
    pub fn next_key(&mut self) -> [u8; 4] {
        self.state = self.state.wrapping_add(0x9E37_79B9);
        let mut x = self.state;
        x = (x ^ (x >> 16)).wrapping_mul(0x85EB_CA6B);
        x = (x ^ (x >> 13)).wrapping_mul(0xC2B2_AE35);
        (x ^ (x >> 16)).to_le_bytes()
    }
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}
