//! Correlated randomness derived from PRG seeds distributed at setup.
//!
//! Every party in `U = {0..2t}` deals a key as a replicated sharing; a PRG
//! per received slot then lets all holders of a slot derive identical
//! pseudorandom elements forever after. Random shares, their additive
//! decomposition over `U` and sharings of zero all come out of these banks
//! without further interaction.

use crate::algebra::Field;
use crate::crypto::Prg;
use crate::net::{Network, NetworkError, SplitChannel};
use crate::sharing::{Replicator, Share};

/// A fresh threshold-t sharing of a jointly random `r`, together with this
/// party's additive piece of `r` over `U` and threshold-t sharings of every
/// additive piece.
#[derive(Debug, Clone)]
pub struct RandomShare<F> {
    pub rep: Share<F>,
    pub add: F,
    pub rep_adds: Vec<Share<F>>,
}

/// An additive sharing of zero over `U`, with threshold-t sharings of each
/// additive piece.
#[derive(Debug, Clone)]
pub struct ZeroShare<F> {
    pub add: F,
    pub rep_adds: Vec<Share<F>>,
}

/// Owner of the per-party PRG stable.
///
/// Freshly constructed correlators hold all-zero seeds everywhere, which
/// happen to form consistent banks across parties; unit tests lean on this.
/// Real sessions replace the banks through [`Correlator::setup`].
pub struct Correlator {
    id: usize,
    replicator: Replicator,
    /// One PRG per additive slot of this party's own dealt key. Only parties
    /// in `U` use them.
    own_prgs: Vec<Prg>,
    /// One PRG bank per dealer in `U`, indexed by this party's local slots.
    rand_prgs: Vec<Vec<Prg>>,
    /// Bank for sharings of zero, indexed by this party's local slots.
    zero_prgs: Vec<Prg>,
}

impl Correlator {
    pub fn new(id: usize, replicator: Replicator) -> Self {
        let u_size = 2 * replicator.threshold() + 1;
        let share_size = replicator.share_size();
        let additive_share_size = replicator.additive_share_size();
        Self {
            id,
            own_prgs: vec![Prg::default(); additive_share_size],
            rand_prgs: vec![vec![Prg::default(); share_size]; u_size],
            zero_prgs: vec![Prg::default(); share_size],
            replicator,
        }
    }

    pub fn set_own_prgs(&mut self, prgs: Vec<Prg>) {
        self.own_prgs = prgs;
    }

    pub fn set_rand_prgs(&mut self, dealer: usize, prgs: Vec<Prg>) {
        self.rand_prgs[dealer] = prgs;
    }

    pub fn set_zero_prgs(&mut self, prgs: Vec<Prg>) {
        self.zero_prgs = prgs;
    }

    /// Distribute the PRG seeds for a session: every party in `U` deals a
    /// fresh key as a replicated sharing and keeps the full additive vector
    /// for itself; party 0 deals one further key for the zero bank.
    pub async fn setup<F: Field, C: SplitChannel>(
        replicator: &Replicator,
        network: &mut Network<C>,
        prg: &mut Prg,
    ) -> Result<Self, NetworkError> {
        let id = network.id();
        let n = replicator.size();
        let u_size = 2 * replicator.threshold() + 1;
        let mut correlator = Self::new(id, replicator.clone());

        for dealer in 0..u_size {
            if id == dealer {
                let additive: Vec<F> = prg.elements(replicator.additive_share_size());
                for party in (0..n).filter(|&party| party != id) {
                    let share = slot_subset(replicator, party, &additive);
                    network.send_share_to(party, &share).await?;
                }
                let own_bank = slot_subset(replicator, id, &additive)
                    .iter()
                    .map(Prg::from_element)
                    .collect();
                correlator.set_rand_prgs(dealer, own_bank);
                correlator.set_own_prgs(additive.iter().map(Prg::from_element).collect());
            } else {
                let share: Share<F> = network
                    .recv_share_from(dealer, replicator.share_size())
                    .await?;
                correlator.set_rand_prgs(dealer, share.iter().map(Prg::from_element).collect());
            }
        }

        if id == 0 {
            let additive: Vec<F> = prg.elements(replicator.additive_share_size());
            for party in 1..n {
                let share = slot_subset(replicator, party, &additive);
                network.send_share_to(party, &share).await?;
            }
            let bank = slot_subset(replicator, id, &additive)
                .iter()
                .map(Prg::from_element)
                .collect();
            correlator.set_zero_prgs(bank);
        } else {
            let share: Share<F> = network.recv_share_from(0, replicator.share_size()).await?;
            correlator.set_zero_prgs(share.iter().map(Prg::from_element).collect());
        }

        tracing::debug!(id, "correlator banks seeded");
        Ok(correlator)
    }

    /// Advance every bank by one element and assemble a fresh random share.
    ///
    /// By construction `rep[k] = sum_u rep_adds[u][k]` for every slot, and
    /// the additive pieces over `U` reconstruct the same value as `rep`.
    pub fn gen_random_share<F: Field>(&mut self) -> RandomShare<F> {
        let u_size = 2 * self.replicator.threshold() + 1;
        let share_size = self.replicator.share_size();

        let mut add = F::zero();
        if self.id < u_size {
            for prg in &mut self.own_prgs {
                add += prg.element::<F>();
            }
        }

        let mut rep = Share::zeroed(share_size);
        let mut rep_adds: Vec<Share<F>> = (0..u_size)
            .map(|_| Share(Vec::with_capacity(share_size)))
            .collect();
        for k in 0..share_size {
            for (u, bank) in self.rand_prgs.iter_mut().enumerate() {
                let v: F = bank[k].element();
                rep_adds[u].0.push(v);
                rep[k] += v;
            }
        }

        RandomShare { rep, add, rep_adds }
    }

    /// Advance the zero bank by one element and assemble an additive sharing
    /// of zero over `U`.
    ///
    /// Each slot's pseudorandom element is credited to the first member of
    /// its subset and debited from the second, so the additive pieces cancel
    /// over `U` while every piece stays replicated-shareable from the same
    /// bank outputs.
    pub fn gen_zero_share<F: Field>(&mut self) -> ZeroShare<F> {
        let u_size = 2 * self.replicator.threshold() + 1;
        let index_set = self.replicator.index_set(self.id).to_vec();
        let outs: Vec<F> = self.zero_prgs.iter_mut().map(|prg| prg.element()).collect();
        let replicator = &self.replicator;

        let signed = |u: usize, slot: usize, value: F| -> F {
            let subset = replicator.combination(slot);
            if subset[0] == u {
                value
            } else if subset[1] == u {
                -value
            } else {
                F::zero()
            }
        };

        let mut add = F::zero();
        for (k, &slot) in index_set.iter().enumerate() {
            add += signed(self.id, slot, outs[k]);
        }

        let rep_adds = (0..u_size)
            .map(|u| {
                Share(
                    index_set
                        .iter()
                        .enumerate()
                        .map(|(k, &slot)| signed(u, slot, outs[k]))
                        .collect(),
                )
            })
            .collect();

        ZeroShare { add, rep_adds }
    }

    /// All-zero stand-in for a random share.
    pub fn gen_random_share_dummy<F: Field>(&self) -> RandomShare<F> {
        let u_size = 2 * self.replicator.threshold() + 1;
        let share_size = self.replicator.share_size();
        RandomShare {
            rep: Share::zeroed(share_size),
            add: F::zero(),
            rep_adds: vec![Share::zeroed(share_size); u_size],
        }
    }

    /// All-zero stand-in for a zero share.
    pub fn gen_zero_share_dummy<F: Field>(&self) -> ZeroShare<F> {
        let u_size = 2 * self.replicator.threshold() + 1;
        let share_size = self.replicator.share_size();
        ZeroShare {
            add: F::zero(),
            rep_adds: vec![Share::zeroed(share_size); u_size],
        }
    }
}

fn slot_subset<F: Field>(replicator: &Replicator, party: usize, additive: &[F]) -> Share<F> {
    Share(
        replicator
            .index_set(party)
            .iter()
            .map(|&slot| additive[slot])
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algebra::{Field, Mersenne61};
    use crate::testing::Cluster;

    type F = Mersenne61;

    fn correlators(n: usize) -> (Replicator, Vec<Correlator>) {
        let replicator = Replicator::for_parties(n).unwrap();
        let correlators = (0..n)
            .map(|id| Correlator::new(id, replicator.clone()))
            .collect();
        (replicator, correlators)
    }

    fn check_random_shares(replicator: &Replicator, shares: &[RandomShare<F>]) {
        let n = replicator.size();
        let u_size = 2 * replicator.threshold() + 1;

        // The replicated shares must be consistent.
        let reps: Vec<_> = shares.iter().map(|s| s.rep.clone()).collect();
        let value = replicator.error_detect(&reps).unwrap();

        // The additive pieces over U reconstruct the same value.
        let additive: F = shares[..u_size].iter().map(|s| s.add).sum();
        assert_eq!(additive, value);
        for share in &shares[u_size..] {
            assert_eq!(share.add, F::zero());
        }

        // Each additive piece is consistently shared and sums back into rep.
        for u in 0..u_size {
            let piece: Vec<_> = (0..n).map(|i| shares[i].rep_adds[u].clone()).collect();
            assert_eq!(
                replicator.error_detect(&piece).unwrap(),
                shares[u].add
            );
        }
        for share in shares {
            for k in 0..replicator.share_size() {
                let total: F = (0..u_size).map(|u| share.rep_adds[u][k]).sum();
                assert_eq!(total, share.rep[k]);
            }
        }
    }

    #[test]
    fn dummy_correlation() {
        let n = 10;
        let (replicator, correlators) = correlators(n);
        let u_size = 2 * replicator.threshold() + 1;

        let zeros: Vec<ZeroShare<F>> = correlators
            .iter()
            .map(|c| c.gen_zero_share_dummy())
            .collect();
        let total: F = zeros[..u_size].iter().map(|z| z.add).sum();
        assert_eq!(total, F::zero());

        for u in 0..u_size {
            let piece: Vec<_> = (0..n).map(|i| zeros[i].rep_adds[u].clone()).collect();
            assert_eq!(replicator.error_detect(&piece).unwrap(), zeros[u].add);
        }

        let randoms: Vec<RandomShare<F>> = correlators
            .iter()
            .map(|c| c.gen_random_share_dummy())
            .collect();
        check_random_shares(&replicator, &randoms);
    }

    #[test]
    fn default_seeded_random_correlation() {
        // Default banks hold all-zero keys, which coincidentally form
        // consistent sharings across parties.
        let n = 10;
        let (replicator, mut correlators) = correlators(n);

        let first: Vec<RandomShare<F>> = correlators
            .iter_mut()
            .map(|c| c.gen_random_share())
            .collect();
        check_random_shares(&replicator, &first);

        // The banks advance in lockstep, so a second draw is consistent too
        // and differs from the first.
        let second: Vec<RandomShare<F>> = correlators
            .iter_mut()
            .map(|c| c.gen_random_share())
            .collect();
        check_random_shares(&replicator, &second);
        assert_ne!(first[0].rep, second[0].rep);
    }

    #[test]
    fn default_seeded_zero_shares() {
        let n = 10;
        let (replicator, mut correlators) = correlators(n);
        let u_size = 2 * replicator.threshold() + 1;

        let zeros: Vec<ZeroShare<F>> =
            correlators.iter_mut().map(|c| c.gen_zero_share()).collect();

        // The additive pieces cancel over U and vanish outside it.
        let total: F = zeros[..u_size].iter().map(|z| z.add).sum();
        assert_eq!(total, F::zero());
        for zero in &zeros[u_size..] {
            assert_eq!(zero.add, F::zero());
        }

        // Each piece is consistently shared.
        for u in 0..u_size {
            let piece: Vec<_> = (0..n).map(|i| zeros[i].rep_adds[u].clone()).collect();
            assert_eq!(replicator.error_detect(&piece).unwrap(), zeros[u].add);
        }
    }

    #[tokio::test]
    async fn seeded_banks_stay_consistent_after_setup() {
        let n = 4;
        let replicator = Replicator::for_parties(n).unwrap();

        let outputs = Cluster::new(n)
            .run({
                let replicator = replicator.clone();
                move |mut network| {
                    let replicator = replicator.clone();
                    async move {
                        let mut prg = Prg::from_seed([network.id() as u8 + 1; 16]);
                        let mut correlator =
                            Correlator::setup::<F, _>(&replicator, &mut network, &mut prg)
                                .await
                                .unwrap();
                        let one: RandomShare<F> = correlator.gen_random_share();
                        let two: RandomShare<F> = correlator.gen_random_share();
                        let zero: ZeroShare<F> = correlator.gen_zero_share();
                        (one, two, zero)
                    }
                }
            })
            .await
            .unwrap();

        let firsts: Vec<_> = outputs.iter().map(|(a, _, _)| a.clone()).collect();
        let seconds: Vec<_> = outputs.iter().map(|(_, b, _)| b.clone()).collect();
        check_random_shares(&replicator, &firsts);
        check_random_shares(&replicator, &seconds);
        assert_ne!(firsts[0].rep, seconds[0].rep);

        let u_size = 2 * replicator.threshold() + 1;
        let zeros: Vec<_> = outputs.iter().map(|(_, _, z)| z.clone()).collect();
        let total: F = zeros[..u_size].iter().map(|z| z.add).sum();
        assert_eq!(total, F::zero());
        for u in 0..u_size {
            let piece: Vec<_> = (0..n).map(|i| zeros[i].rep_adds[u].clone()).collect();
            assert_eq!(replicator.error_detect(&piece).unwrap(), zeros[u].add);
        }
    }
}
