//! WebSocket frame masking utilities
//!
//! Client frames are always masked. Supports two RNG backends via feature flags:
//! - `fastrand`: fast PRNG (default)
//! - `getrandom`: cryptographically secure RNG, falling back to `fastrand`
//!   with a warning if the OS source fails
//!
//! If both are enabled, `getrandom` wins.

/// XOR `data` in place with a repeating 4-byte mask
///
/// Masking and unmasking are the same operation.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        chunk.copy_from_slice(&(u64::from_ne_bytes(word) ^ mask_u64).to_ne_bytes());
    }

    // Each full chunk is a multiple of 4 bytes, so the tail starts at mask[0]
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Apply mask starting at a byte offset into the mask stream
///
/// Used when a payload is masked in several pieces: `offset` is the number
/// of payload bytes already masked.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let offset = offset & 3;
    if offset == 0 {
        apply_mask(data, mask);
        return;
    }

    let rotated_mask = [
        mask[offset],
        mask[(offset + 1) & 3],
        mask[(offset + 2) & 3],
        mask[(offset + 3) & 3],
    ];
    apply_mask(data, rotated_mask);
}

/// Generate a random mask for a client frame
#[inline]
pub fn generate_mask() -> [u8; 4] {
    let mut mask = [0u8; 4];
    fill_random(&mut mask);
    mask
}

/// Fill `buf` with random bytes from the selected backend
pub fn fill_random(buf: &mut [u8]) {
    fill_random_inner(buf);
}

#[cfg(feature = "getrandom")]
#[inline]
fn fill_random_inner(buf: &mut [u8]) {
    fill_or_fallback(buf, getrandom::getrandom);
}

/// Fill from `source`; on failure warn and use `fastrand` instead
#[cfg(feature = "fastrand")]
#[cfg_attr(not(feature = "getrandom"), allow(dead_code))]
fn fill_or_fallback<E, F>(buf: &mut [u8], source: F)
where
    E: std::fmt::Display,
    F: FnOnce(&mut [u8]) -> Result<(), E>,
{
    if let Err(e) = source(buf) {
        tracing::warn!(error = %e, "OS random source failed, masking with fastrand");
        fastrand::fill(buf);
    }
}

#[cfg(all(feature = "fastrand", not(feature = "getrandom")))]
#[inline]
fn fill_random_inner(buf: &mut [u8]) {
    fastrand::fill(buf);
}

#[cfg(not(any(feature = "fastrand", feature = "getrandom")))]
fn fill_random_inner(_buf: &mut [u8]) {
    compile_error!("At least one RNG feature must be enabled: fastrand or getrandom");
}
