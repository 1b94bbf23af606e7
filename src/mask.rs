//! Payload masking.
//!
//! RFC 6455 requires every client-to-server frame to be masked: each payload
//! byte is XOR'd with `key[i % 4]`. Applying the same key twice restores the
//! original bytes, so a single routine serves both masking and unmasking.

/// Masks or unmasks `buf` in place against a 4-byte key.
///
/// Operates on whole 32-bit words where possible and falls back to byte-wise
/// XOR for the tail. The caller is responsible for key phase: `buf` must start
/// at a payload offset that is a multiple of 4 (rotate the key otherwise).
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let key32 = u32::from_ne_bytes(key);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in chunks.by_ref() {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key32;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
