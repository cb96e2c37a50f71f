//! Prime-field arithmetic for the two Mersenne moduli supported by the
//! runtime. Everything above this layer is generic over [`Field`].

pub mod mersenne127;
pub mod mersenne61;
mod wide;

pub use mersenne127::Mersenne127;
pub use mersenne61::Mersenne61;

use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MathError {
    #[error("0 is not invertible mod p")]
    NotInvertible,
    #[error("non-invertible non-zero element encountered")]
    NotPrime,
}

/// Element of a prime-order field with a fixed-width little-endian encoding.
///
/// Implementations keep their value in canonical reduced form, so `==`
/// compares representatives directly.
pub trait Field:
    Copy
    + Clone
    + Debug
    + Default
    + Eq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + Sum
    + Serialize
    + DeserializeOwned
{
    /// Exact size of an encoded element on the wire.
    const BYTES: usize;

    fn zero() -> Self;
    fn one() -> Self;
    fn is_zero(&self) -> bool;

    /// Embed an integer, reducing mod p.
    fn from_u64(value: u64) -> Self;

    /// Read an element from exactly [`Field::BYTES`] little-endian bytes,
    /// reducing mod p.
    fn from_le_bytes(buffer: &[u8]) -> Self;

    /// Write the canonical representative as exactly [`Field::BYTES`]
    /// little-endian bytes.
    fn to_le_bytes(&self, buffer: &mut [u8]);

    /// Multiplicative inverse by the extended Euclidean algorithm.
    fn inverse(&self) -> Result<Self, MathError>;
}

/// Extended Euclid over signed 128-bit integers.
///
/// Returns `t` with `v * t = 1 mod p`. Both supported moduli fit an `i128`
/// (2^127 - 1 is exactly `i128::MAX`).
pub(crate) fn invert_mod(v: i128, p: i128) -> Result<i128, MathError> {
    if v == 0 {
        return Err(MathError::NotInvertible);
    }

    let (mut t, mut new_t): (i128, i128) = (0, 1);
    let (mut r, mut new_r): (i128, i128) = (p, v);

    while new_r != 0 {
        let q = r / new_r;
        (t, new_t) = (new_t, t - q * new_t);
        (r, new_r) = (new_r, r - q * new_r);
    }

    if r != 1 {
        return Err(MathError::NotPrime);
    }

    if t < 0 {
        t += p;
    }
    Ok(t)
}
