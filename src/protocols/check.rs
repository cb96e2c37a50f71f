//! Batched verification of the multiplication transcript.
//!
//! A random linear combination compresses all multiplications of a session
//! into one scalar per observable quantity. The per-sender message shares
//! (degree-2t sharings of each sender's unmasked product contribution) are
//! folded with the same coefficients, the compressed mask sharings are
//! subtracted, and the results are opened with cross-party digest checks.
//! Every party then confirms that what the others computed on its behalf
//! matches its own record, and that P0's openings are the true sums. A
//! cheating P0 or sender cannot survive the comparison except by guessing
//! the random coefficients.

use std::collections::BTreeMap;

use tokio_util::bytes::Bytes;

use crate::algebra::Field;
use crate::crypto::hash::{digest_elements, Digest};
use crate::crypto::Prg;
use crate::metrics::ScopedTimer;
use crate::net::{wire, Network, NetworkError, SplitChannel};
use crate::sharing::arithmetic::{RecKind, ShareArithmetic};
use crate::sharing::Share;

use super::mult::CheckData;
use super::ProtocolError;

/// The check protocol for one session transcript.
pub struct Check<'a, F: Field> {
    arithmetic: &'a ShareArithmetic,
    check_data: &'a CheckData<F>,
}

/// Random linear combination of `values` under `coefficients`.
fn fold<F: Field>(coefficients: &[F], values: &[F]) -> F {
    debug_assert_eq!(coefficients.len(), values.len());
    coefficients.iter().zip(values).map(|(&c, &v)| c * v).sum()
}

/// Compressed transcript scalars of this party.
struct Compressed<F> {
    /// Fold of what we sent to P0.
    sent: F,
    /// Fold of the openings we received from P0.
    values: F,
    /// At P0: fold of what each sender delivered.
    recv: Vec<F>,
}

impl<'a, F: Field> Check<'a, F> {
    pub fn new(arithmetic: &'a ShareArithmetic, check_data: &'a CheckData<F>) -> Self {
        Self {
            arithmetic,
            check_data,
        }
    }

    /// Run the whole check; any detected inconsistency aborts the session
    /// with [`ProtocolError::Verification`].
    pub async fn run<C: SplitChannel>(
        self,
        network: &mut Network<C>,
        shared_prg: &mut Prg,
    ) -> Result<(), ProtocolError> {
        let coefficients: Vec<F> = {
            let _timer = ScopedTimer::new("check_coefficients");
            shared_prg.elements(self.check_data.counter)
        };

        let compressed = {
            let _timer = ScopedTimer::new("check_linear_combinations");
            self.compress(&coefficients)
        };

        let messages = {
            let _timer = ScopedTimer::new("check_messages");
            self.compress_messages(&coefficients)
        };

        let _timer = ScopedTimer::new("check_reconstruct");
        let totals = self.open_messages(network, &messages).await?;
        self.verify(network.id(), network.size(), &compressed, &totals)
    }

    /// Fold the sent/received/opened scalars with the shared coefficients.
    /// Senders are the parties with `0 < i < 2t + 1`; P0 additionally folds
    /// its per-sender receive log.
    fn compress(&self, coefficients: &[F]) -> Compressed<F> {
        let me = self.arithmetic.id();
        let u_size = 2 * self.arithmetic.threshold() + 1;
        let data = self.check_data;

        let mut compressed = Compressed {
            sent: F::zero(),
            values: F::zero(),
            recv: Vec::new(),
        };

        if me < u_size {
            compressed.sent = fold(coefficients, &data.shares_sent);
        }
        if me < self.arithmetic.parties() - self.arithmetic.threshold() {
            compressed.values = fold(coefficients, &data.values_recv);
        }
        if me == 0 {
            compressed.recv = data
                .shares_recv
                .iter()
                .map(|per_sender| fold(coefficients, per_sender))
                .collect();
        }
        compressed
    }

    /// Fold the message shares and subtract the compressed mask sharings,
    /// re-expressed in the degree-2t layout. The result, per sender `u`, is
    /// a degree-2t sharing of exactly what `u` should have sent to P0 under
    /// the same fold.
    fn compress_messages(&self, coefficients: &[F]) -> Vec<Share<F>> {
        let arithmetic = self.arithmetic;
        let u_size = 2 * arithmetic.threshold() + 1;
        let double_width = arithmetic.double_replicator().share_size();
        let width = arithmetic.share_size();
        let data = self.check_data;

        let mut folded_msgs = vec![Share::zeroed(double_width); u_size];
        let mut folded_masks = vec![Share::zeroed(width); u_size];
        for (m, &coefficient) in coefficients.iter().enumerate() {
            for u in 0..u_size {
                let msg = arithmetic.mul_constant(&data.msgs[m][u], coefficient);
                folded_msgs[u] = arithmetic.add(&folded_msgs[u], &msg);
                let mask = arithmetic.mul_constant(&data.mask_shares[m][u], coefficient);
                folded_masks[u] = arithmetic.add(&folded_masks[u], &mask);
            }
        }

        folded_msgs
            .iter()
            .zip(&folded_masks)
            .map(|(msg, mask)| arithmetic.sub(msg, &arithmetic.to_double_degree(mask)))
            .collect()
    }

    /// Open the compressed message sharings across parties.
    ///
    /// For each degree-2t slot we own, the batched payload packs the `2t+1`
    /// per-sender scalars at that slot. The first owner of the slot sends
    /// the raw payload to every party missing the slot; the other owners
    /// send a digest of the same payload. Receivers cross-check digests
    /// against payloads and abort on any disagreement. Returns the opened
    /// scalar per sender.
    async fn open_messages<C: SplitChannel>(
        &self,
        network: &mut Network<C>,
        messages: &[Share<F>],
    ) -> Result<Vec<F>, ProtocolError> {
        let arithmetic = self.arithmetic;
        let me = arithmetic.id();
        let n = arithmetic.parties();
        let u_size = 2 * arithmetic.threshold() + 1;
        let double = arithmetic.double_replicator();

        // Batched payload per owned slot, in local slot order.
        let batches: Vec<Vec<F>> = (0..double.share_size())
            .map(|k| messages.iter().map(|message| message[k]).collect())
            .collect();

        // Sort payloads and digests by receiver.
        let mut values_to_send: Vec<Vec<F>> = vec![Vec::new(); n];
        let mut digests_to_send: Vec<Vec<Digest>> = vec![Vec::new(); n];
        for (batch, entry) in batches.iter().zip(arithmetic.rec_table()) {
            match entry.kind {
                RecKind::Value => {
                    for &receiver in &entry.receivers {
                        values_to_send[receiver].extend_from_slice(batch);
                    }
                }
                RecKind::Digest => {
                    let digest = digest_elements(batch);
                    for &receiver in &entry.receivers {
                        digests_to_send[receiver].push(digest);
                    }
                }
            }
        }

        let outgoing: Vec<Vec<Bytes>> = (0..n)
            .map(|party| {
                vec![
                    wire::encode_elements(&values_to_send[party]),
                    wire::encode_digests(&digests_to_send[party]),
                ]
            })
            .collect();
        let incoming = network.exchange_frames(outgoing, 2).await?;

        // Group the received payloads and digests by global slot. Which
        // sender opens which slot is public knowledge, so the sender tables
        // can be replayed locally.
        let mut opened: BTreeMap<usize, Vec<F>> = BTreeMap::new();
        let mut pending: Vec<(usize, Digest)> = Vec::new();
        for sender in (0..n).filter(|&sender| sender != me) {
            let frames = &incoming[sender];
            let values: Vec<F> =
                wire::decode_elements(&frames[0]).map_err(|source| NetworkError::Incoming {
                    id: sender as u32,
                    source,
                })?;
            let digests =
                wire::decode_digests(&frames[1]).map_err(|source| NetworkError::Incoming {
                    id: sender as u32,
                    source,
                })?;

            let mut value_cursor = 0;
            let mut digest_cursor = 0;
            for &slot in double.index_set(sender) {
                let subset = double.combination(slot);
                if subset.contains(&me) {
                    continue;
                }
                if subset[0] == sender {
                    if values.len() < value_cursor + u_size {
                        return Err(ProtocolError::UnexpectedCount {
                            peer: sender,
                            expected: value_cursor + u_size,
                            got: values.len(),
                        });
                    }
                    let batch = values[value_cursor..value_cursor + u_size].to_vec();
                    value_cursor += u_size;
                    opened.insert(slot, batch);
                } else {
                    if digests.len() <= digest_cursor {
                        return Err(ProtocolError::UnexpectedCount {
                            peer: sender,
                            expected: digest_cursor + 1,
                            got: digests.len(),
                        });
                    }
                    pending.push((slot, digests[digest_cursor]));
                    digest_cursor += 1;
                }
            }
            if value_cursor != values.len() || digest_cursor != digests.len() {
                return Err(ProtocolError::UnexpectedCount {
                    peer: sender,
                    expected: value_cursor,
                    got: values.len(),
                });
            }
        }

        // Every digest must match the payload opened for its slot.
        for (slot, digest) in pending {
            let batch = opened
                .get(&slot)
                .ok_or(ProtocolError::Verification("opened slot missing a payload"))?;
            if digest_elements(batch) != digest {
                return Err(ProtocolError::Verification("digest mismatch on opened slot"));
            }
        }

        // Sum the canonical copy of every slot, per sender.
        let mut totals = vec![F::zero(); u_size];
        let my_slots = double.index_set(me);
        for slot in 0..double.additive_share_size() {
            let batch: &[F] = if let Some(position) = my_slots.iter().position(|&s| s == slot) {
                &batches[position]
            } else {
                opened
                    .get(&slot)
                    .ok_or(ProtocolError::Verification("opened slot missing a payload"))?
            };
            for (total, value) in totals.iter_mut().zip(batch) {
                *total += *value;
            }
        }
        Ok(totals)
    }

    /// Compare the opened transcript against the local records.
    fn verify(
        &self,
        me: usize,
        parties: usize,
        compressed: &Compressed<F>,
        totals: &[F],
    ) -> Result<(), ProtocolError> {
        let t = self.arithmetic.threshold();
        let u_size = 2 * t + 1;

        // Senders confirm that the network's view of their contribution
        // matches what they actually sent.
        if me < u_size && totals[me] != compressed.sent {
            return Err(ProtocolError::Verification(
                "opened contribution differs from the sent record",
            ));
        }

        // P0 confirms every sender against its receive log.
        if me == 0 {
            for (sender, folded) in compressed.recv.iter().enumerate() {
                if totals[sender] != *folded {
                    return Err(ProtocolError::Verification(
                        "opened contribution differs from P0's receive log",
                    ));
                }
            }
        }

        // Parties in T confirm that P0's openings sum up correctly.
        if me < parties - t {
            let total: F = totals.iter().copied().sum();
            if total != compressed.values {
                return Err(ProtocolError::Verification(
                    "P0's openings disagree with the senders' contributions",
                ));
            }
        }
        Ok(())
    }
}
