//! Fixed-width wire encoding for field vectors, shares and digests.
//!
//! Every vector starts with a 4-byte little-endian count of *elements*; the
//! receiver multiplies by the element width to size its read. Replicated
//! shares travel as the concatenated slot encodings in index-set order.

use tokio_util::bytes::Bytes;

use super::ConnectionError;
use crate::algebra::Field;
use crate::crypto::hash::{Digest, DIGEST_SIZE};
use crate::sharing::Share;

pub fn encode_elements<F: Field>(elements: &[F]) -> Bytes {
    let mut buf = Vec::with_capacity(4 + elements.len() * F::BYTES);
    buf.extend_from_slice(&(elements.len() as u32).to_le_bytes());
    let mut scratch = [0u8; 16];
    for element in elements {
        element.to_le_bytes(&mut scratch[..F::BYTES]);
        buf.extend_from_slice(&scratch[..F::BYTES]);
    }
    buf.into()
}

/// Decode a count-prefixed element vector, whatever its length.
pub fn decode_elements<F: Field>(bytes: &[u8]) -> Result<Vec<F>, ConnectionError> {
    if bytes.len() < 4 {
        return Err(ConnectionError::BadMessage);
    }
    let count = u32::from_le_bytes(bytes[..4].try_into().expect("sized above")) as usize;
    let payload = &bytes[4..];
    if payload.len() != count * F::BYTES {
        return Err(ConnectionError::BadMessage);
    }
    Ok(payload
        .chunks_exact(F::BYTES)
        .map(F::from_le_bytes)
        .collect())
}

/// Decode an element vector whose length the receiver already knows.
pub fn decode_elements_exact<F: Field>(
    bytes: &[u8],
    expected: usize,
) -> Result<Vec<F>, ConnectionError> {
    let elements = decode_elements(bytes)?;
    if elements.len() != expected {
        return Err(ConnectionError::BadMessage);
    }
    Ok(elements)
}

pub fn encode_share<F: Field>(share: &Share<F>) -> Bytes {
    encode_elements(&share.0)
}

pub fn decode_share<F: Field>(bytes: &[u8], width: usize) -> Result<Share<F>, ConnectionError> {
    Ok(Share(decode_elements_exact(bytes, width)?))
}

pub fn encode_digests(digests: &[Digest]) -> Bytes {
    let mut buf = Vec::with_capacity(4 + digests.len() * DIGEST_SIZE);
    buf.extend_from_slice(&(digests.len() as u32).to_le_bytes());
    for digest in digests {
        buf.extend_from_slice(digest);
    }
    buf.into()
}

pub fn decode_digests(bytes: &[u8]) -> Result<Vec<Digest>, ConnectionError> {
    if bytes.len() < 4 {
        return Err(ConnectionError::BadMessage);
    }
    let count = u32::from_le_bytes(bytes[..4].try_into().expect("sized above")) as usize;
    let payload = &bytes[4..];
    if payload.len() != count * DIGEST_SIZE {
        return Err(ConnectionError::BadMessage);
    }
    Ok(payload
        .chunks_exact(DIGEST_SIZE)
        .map(|chunk| chunk.try_into().expect("chunks are digest sized"))
        .collect())
}
