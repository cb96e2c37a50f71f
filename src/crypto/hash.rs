//! Collision-resistant digests over wire encodings.

use crate::algebra::Field;

pub const DIGEST_SIZE: usize = blake3::OUT_LEN;

pub type Digest = [u8; DIGEST_SIZE];

pub fn digest(bytes: &[u8]) -> Digest {
    *blake3::hash(bytes).as_bytes()
}

/// Digest of the concatenated fixed-width encodings of `elements`.
pub fn digest_elements<F: Field>(elements: &[F]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 16];
    for element in elements {
        element.to_le_bytes(&mut buffer[..F::BYTES]);
        hasher.update(&buffer[..F::BYTES]);
    }
    *hasher.finalize().as_bytes()
}
