//! Secret injection under one-party masks.
//!
//! At setup every party deals a random key as a replicated sharing and keeps
//! the full additive vector for itself. Turning each slot into a PRG gives
//! the dealer a stream of masks `r = sum_l G(k_l)` that it alone can compute,
//! while the other parties can derive fresh threshold-t shares of the same
//! masks from their slot banks. Inputting `s` is then a single broadcast of
//! `s - r`, added to the mask share at the canonical slot.

use crate::algebra::Field;
use crate::crypto::Prg;
use crate::metrics::ScopedTimer;
use crate::net::{Network, SplitChannel};
use crate::sharing::arithmetic::ShareArithmetic;
use crate::sharing::{Replicator, Share};

use super::ProtocolError;

/// Per-party state produced by [`setup`]: PRG banks for every peer's masks
/// plus the full bank behind our own.
pub struct MaskGenerator {
    banks: Vec<Vec<Prg>>,
    own: Vec<Prg>,
}

impl MaskGenerator {
    /// The next mask of this party. Only meaningful on the party itself; the
    /// peers follow along with [`MaskGenerator::mask_share`].
    pub fn mask<F: Field>(&mut self) -> F {
        self.own.iter_mut().map(|prg| prg.element()).sum()
    }

    /// A fresh threshold-t share of `id`'s next mask.
    pub fn mask_share<F: Field>(&mut self, id: usize) -> Share<F> {
        Share(self.banks[id].iter_mut().map(|prg| prg.element()).collect())
    }
}

/// Exchange mask keys with all parties.
pub async fn setup<F: Field, C: SplitChannel>(
    replicator: &Replicator,
    network: &mut Network<C>,
    prg: &mut Prg,
) -> Result<MaskGenerator, ProtocolError> {
    let additive: Vec<F> = prg.elements(replicator.additive_share_size());
    let shares: Vec<Share<F>> = (0..replicator.size())
        .map(|party| {
            Share(
                replicator
                    .index_set(party)
                    .iter()
                    .map(|&slot| additive[slot])
                    .collect(),
            )
        })
        .collect();

    let received = network.symmetric_unicast(shares).await?;

    let own = additive.iter().map(Prg::from_element).collect();
    let banks = received
        .into_iter()
        .map(|share| share.iter().map(Prg::from_element).collect())
        .collect();
    Ok(MaskGenerator { banks, own })
}

/// The input protocol: queue secrets and expected peer inputs, then run one
/// broadcast round.
pub struct Input<'a, F: Field> {
    arithmetic: &'a ShareArithmetic,
    masks: &'a mut MaskGenerator,
    queued: Vec<F>,
    expected: Vec<Vec<Share<F>>>,
}

impl<'a, F: Field> Input<'a, F> {
    pub fn new(arithmetic: &'a ShareArithmetic, masks: &'a mut MaskGenerator) -> Self {
        let parties = arithmetic.parties();
        Self {
            arithmetic,
            masks,
            queued: Vec::new(),
            expected: vec![Vec::new(); parties],
        }
    }

    /// Queue one of our own secrets for injection.
    pub fn prepare(&mut self, secret: F) {
        let mask: F = self.masks.mask();
        self.queued.push(secret - mask);
        let id = self.arithmetic.id();
        self.expected[id].push(self.masks.mask_share(id));
    }

    pub fn prepare_many(&mut self, secrets: &[F]) {
        for &secret in secrets {
            self.prepare(secret);
        }
    }

    /// Expect one input from party `id`.
    pub fn prepare_to_receive(&mut self, id: usize) {
        self.expected[id].push(self.masks.mask_share(id));
    }

    pub fn prepare_to_receive_many(&mut self, id: usize, count: usize) {
        for _ in 0..count {
            self.prepare_to_receive(id);
        }
    }

    /// Run the protocol. Returns, per party, one threshold-t share for each
    /// of that party's inputs.
    pub async fn run<C: SplitChannel>(
        self,
        network: &mut Network<C>,
    ) -> Result<Vec<Vec<Share<F>>>, ProtocolError> {
        let _timer = ScopedTimer::new("input");
        let me = network.id();
        let parties = network.size();

        if self.queued.is_empty() && self.expected.iter().all(Vec::is_empty) {
            return Err(ProtocolError::NothingPrepared);
        }

        if !self.queued.is_empty() {
            let peers: Vec<usize> = (0..parties).filter(|&id| id != me).collect();
            network.send_elements_to_each(peers, &self.queued).await?;
        }

        let mut output: Vec<Vec<Share<F>>> = vec![Vec::new(); parties];
        for (inputter, mask_shares) in self.expected.into_iter().enumerate() {
            if mask_shares.is_empty() {
                continue;
            }
            let masked: Vec<F> = if inputter == me {
                self.queued.clone()
            } else {
                network
                    .recv_elements_from(inputter, mask_shares.len())
                    .await?
            };
            if masked.len() != mask_shares.len() {
                return Err(ProtocolError::UnexpectedCount {
                    peer: inputter,
                    expected: mask_shares.len(),
                    got: masked.len(),
                });
            }
            output[inputter] = mask_shares
                .iter()
                .zip(masked)
                .map(|(share, constant)| self.arithmetic.add_constant(share, constant))
                .collect();
        }
        Ok(output)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algebra::Mersenne61;
    use crate::testing::Cluster;

    type F = Mersenne61;

    #[test]
    fn masks_match_their_shares() {
        // Mask generators assembled by hand from one dealt key: the dealer's
        // mask must equal what the peers' shares reconstruct to.
        let n = 7;
        let replicator = Replicator::for_parties(n).unwrap();
        let mut prg = Prg::from_seed([3u8; 16]);
        let additive: Vec<F> = prg.elements(replicator.additive_share_size());

        let mut dealer = MaskGenerator {
            banks: vec![Vec::new(); n],
            own: additive.iter().map(Prg::from_element).collect(),
        };
        let mask: F = dealer.mask();

        let shares: Vec<Share<F>> = (0..n)
            .map(|party| {
                let bank: Vec<Prg> = replicator
                    .index_set(party)
                    .iter()
                    .map(|&slot| Prg::from_element(&additive[slot]))
                    .collect();
                let mut gen = MaskGenerator {
                    banks: vec![bank],
                    own: Vec::new(),
                };
                gen.mask_share(0)
            })
            .collect();

        assert_eq!(replicator.error_detect(&shares).unwrap(), mask);
    }

    #[tokio::test]
    async fn single_inputter_round_trip() {
        let n = 4;
        let inputter = 3;
        let secret = F::from(123456u64);
        let replicator = Replicator::for_parties(n).unwrap();

        let outputs = Cluster::new(n)
            .run({
                let replicator = replicator.clone();
                move |mut network| {
                    let replicator = replicator.clone();
                    async move {
                        let me = network.id();
                        let t = replicator.threshold();
                        let arithmetic = ShareArithmetic::new(me, t, n).unwrap();
                        let mut prg = Prg::from_seed([me as u8 + 10; 16]);
                        let mut masks = setup::<F, _>(&replicator, &mut network, &mut prg)
                            .await
                            .unwrap();

                        let mut input = Input::new(&arithmetic, &mut masks);
                        if me == inputter {
                            input.prepare(secret);
                        } else {
                            input.prepare_to_receive(inputter);
                        }
                        let shares = input.run(&mut network).await.unwrap();
                        assert_eq!(shares[inputter].len(), 1);
                        shares[inputter][0].clone()
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(replicator.error_detect(&outputs).unwrap(), secret);
    }

    #[tokio::test]
    async fn several_inputs_from_several_parties() {
        let n = 4;
        let replicator = Replicator::for_parties(n).unwrap();

        let outputs = Cluster::new(n)
            .run({
                let replicator = replicator.clone();
                move |mut network| {
                    let replicator = replicator.clone();
                    async move {
                        let me = network.id();
                        let t = replicator.threshold();
                        let arithmetic = ShareArithmetic::new(me, t, n).unwrap();
                        let mut prg = Prg::from_seed([me as u8 + 50; 16]);
                        let mut masks = setup::<F, _>(&replicator, &mut network, &mut prg)
                            .await
                            .unwrap();

                        let mut input = Input::new(&arithmetic, &mut masks);
                        // Party 0 inputs two values, party 2 one value.
                        match me {
                            0 => input.prepare_many(&[F::from(11u64), F::from(22u64)]),
                            2 => input.prepare(F::from(33u64)),
                            _ => {}
                        }
                        if me != 0 {
                            input.prepare_to_receive_many(0, 2);
                        }
                        if me != 2 {
                            input.prepare_to_receive(2);
                        }
                        input.run(&mut network).await.unwrap()
                    }
                }
            })
            .await
            .unwrap();

        for (inputter, index, expected) in [(0, 0, 11u64), (0, 1, 22), (2, 0, 33)] {
            let shares: Vec<_> = outputs
                .iter()
                .map(|per_party| per_party[inputter][index].clone())
                .collect();
            assert_eq!(
                replicator.error_detect(&shares).unwrap(),
                F::from(expected)
            );
        }
    }
}
