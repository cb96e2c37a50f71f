//! Jointly sampled randomness through a commit/reveal ceremony.
//!
//! Every party commits to a locally drawn seed, everyone opens, and the
//! combined seed is the xor of all contributions. As long as one party is
//! honest the combined seed is unpredictable, and a party that equivocates
//! between commitment and opening is caught.

use rand::RngCore;

use super::ProtocolError;
use crate::crypto::hash::{digest, Digest};
use crate::crypto::prg::{Prg, Seed, SEED_SIZE};
use crate::net::{Network, SplitChannel};

/// Agree on a shared PRG with all parties.
pub async fn shared_prg<C: SplitChannel>(
    network: &mut Network<C>,
    rng: &mut impl RngCore,
) -> Result<Prg, ProtocolError> {
    let mut seed: Seed = [0u8; SEED_SIZE];
    rng.fill_bytes(&mut seed);
    let mut salt: Seed = [0u8; SEED_SIZE];
    rng.fill_bytes(&mut salt);

    let commitments: Vec<Digest> = network.symmetric_broadcast(commit(&seed, &salt)).await?;
    let openings: Vec<(Seed, Seed)> = network.symmetric_broadcast((seed, salt)).await?;

    let mut combined = [0u8; SEED_SIZE];
    for ((seed, salt), commitment) in openings.iter().zip(&commitments) {
        if commit(seed, salt) != *commitment {
            return Err(ProtocolError::Verification("coin commitment mismatch"));
        }
        for (acc, byte) in combined.iter_mut().zip(seed) {
            *acc ^= byte;
        }
    }
    Ok(Prg::from_seed(combined))
}

fn commit(seed: &Seed, salt: &Seed) -> Digest {
    let mut message = [0u8; 2 * SEED_SIZE];
    message[..SEED_SIZE].copy_from_slice(seed);
    message[SEED_SIZE..].copy_from_slice(salt);
    digest(&message)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use crate::algebra::Mersenne61;
    use crate::testing::Cluster;

    #[tokio::test]
    async fn everyone_draws_the_same_stream() {
        let outputs = Cluster::new(4)
            .run(|mut network| async move {
                let mut rng = rand::rngs::StdRng::from_os_rng();
                let mut prg = shared_prg(&mut network, &mut rng).await.unwrap();
                prg.elements::<Mersenne61>(8)
            })
            .await
            .unwrap();
        for other in &outputs[1..] {
            assert_eq!(&outputs[0], other);
        }
    }
}
