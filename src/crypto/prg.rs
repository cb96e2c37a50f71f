//! Deterministic keyed byte streams backed by AES-CTR.

use aes_prng::AesRng;
use rand::{RngCore, SeedableRng};

use crate::algebra::Field;

pub const SEED_SIZE: usize = 16;

pub type Seed = [u8; SEED_SIZE];

/// A pseudorandom generator with an explicit seed.
///
/// Two generators built from the same seed produce identical streams; the
/// correlated-randomness layer leans on this to derive consistent sharings
/// from seeds distributed at setup. The default generator uses the all-zero
/// seed.
#[derive(Clone)]
pub struct Prg {
    rng: AesRng,
}

impl Default for Prg {
    fn default() -> Self {
        Self::from_seed([0u8; SEED_SIZE])
    }
}

impl Prg {
    pub fn from_seed(seed: Seed) -> Self {
        Self {
            rng: AesRng::from_seed(seed),
        }
    }

    /// Fresh generator with a seed drawn from `rng`.
    pub fn random(rng: &mut impl RngCore) -> Self {
        let mut seed = [0u8; SEED_SIZE];
        rng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Seed a generator from the little-endian encoding of a field element.
    ///
    /// Elements wider than the seed are truncated, narrower ones are
    /// zero-padded. Used to turn received share slots into PRG banks.
    pub fn from_element<F: Field>(element: &F) -> Self {
        let mut encoded = [0u8; 16];
        element.to_le_bytes(&mut encoded[..F::BYTES]);
        let mut seed = [0u8; SEED_SIZE];
        let n = SEED_SIZE.min(F::BYTES);
        seed[..n].copy_from_slice(&encoded[..n]);
        Self::from_seed(seed)
    }

    pub fn fill(&mut self, buffer: &mut [u8]) {
        self.rng.fill_bytes(buffer);
    }

    /// Advance the stream by one field element.
    pub fn element<F: Field>(&mut self) -> F {
        let mut buffer = [0u8; 16];
        self.fill(&mut buffer[..F::BYTES]);
        F::from_le_bytes(&buffer[..F::BYTES])
    }

    pub fn elements<F: Field>(&mut self, count: usize) -> Vec<F> {
        (0..count).map(|_| self.element()).collect()
    }
}
