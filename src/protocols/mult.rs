//! One-round multiplication through the designated reconstructor P0.
//!
//! Every sender masks its additive product share with a correlated random
//! piece and sends it to P0, who sums the pieces and hands the opened value
//! `x*y - r` back to the parties in `T`. Adding that constant onto the
//! replicated share of `r` yields a fresh threshold-t sharing of `x*y`.
//! Nothing sent in this round is verified here; every observable value is
//! appended to the [`CheckData`] transcript and audited in batch by the
//! check protocol.

use crate::algebra::Field;
use crate::correlator::Correlator;
use crate::metrics::ScopedTimer;
use crate::net::{Network, SplitChannel};
use crate::sharing::arithmetic::ShareArithmetic;
use crate::sharing::Share;

use super::ProtocolError;

/// Append-only transcript of every multiplication's observable values, kept
/// by each party for the end-of-session check. Entries are never mutated
/// after append.
pub struct CheckData<F> {
    /// Additive shares this party sent to P0, one per multiplication.
    pub(crate) shares_sent: Vec<F>,
    /// What P0 received, per sender; only populated at P0.
    pub(crate) shares_recv: Vec<Vec<F>>,
    /// Openings received from P0; populated at parties in `T`.
    pub(crate) values_recv: Vec<F>,
    /// Per multiplication, for each sender in `U`, this party's degree-2t
    /// share of that sender's unmasked product contribution.
    pub(crate) msgs: Vec<Vec<Share<F>>>,
    /// Per multiplication, for each sender in `U`, a threshold-t share of
    /// the random mask piece that sender subtracted.
    pub(crate) mask_shares: Vec<Vec<Share<F>>>,
    /// Number of multiplications appended.
    pub(crate) counter: usize,
}

impl<F: Field> CheckData<F> {
    pub fn new(threshold: usize) -> Self {
        Self {
            shares_sent: Vec::new(),
            shares_recv: vec![Vec::new(); 2 * threshold + 1],
            values_recv: Vec::new(),
            msgs: Vec::new(),
            mask_shares: Vec::new(),
            counter: 0,
        }
    }

    pub fn counter(&self) -> usize {
        self.counter
    }
}

/// The multiplication protocol. Queue factor pairs with
/// [`Mult::prepare`], then open the whole batch in one round with
/// [`Mult::run`].
pub struct Mult<'a, F: Field> {
    arithmetic: &'a ShareArithmetic,
    correlator: &'a mut Correlator,
    check_data: &'a mut CheckData<F>,
    /// Replicated shares of the random masks, one per queued multiplication.
    masks: Vec<Share<F>>,
    /// Masked additive product shares queued for P0.
    to_send: Vec<F>,
}

impl<'a, F: Field> Mult<'a, F> {
    pub fn new(
        arithmetic: &'a ShareArithmetic,
        correlator: &'a mut Correlator,
        check_data: &'a mut CheckData<F>,
    ) -> Self {
        Self {
            arithmetic,
            correlator,
            check_data,
            masks: Vec::new(),
            to_send: Vec::new(),
        }
    }

    /// Queue the product of two threshold-t sharings.
    pub fn prepare(&mut self, x: &Share<F>, y: &Share<F>) {
        let random = self.correlator.gen_random_share::<F>();
        let u_size = 2 * self.arithmetic.threshold() + 1;
        let double_width = self.arithmetic.double_replicator().share_size();

        // One table walk produces both the additive product share and the
        // per-sender message shares used by the check.
        let me = self.arithmetic.id();
        let mut add = F::zero();
        let mut msgs = vec![Share::zeroed(double_width); u_size];
        for entry in self.arithmetic.mult_table() {
            let product = x[entry.src_a] * y[entry.src_b];
            msgs[entry.first_party][entry.dest] += product;
            if entry.first_party == me {
                add += product;
            }
        }
        add -= random.add;

        self.to_send.push(add);
        self.check_data.shares_sent.push(add);
        self.check_data.msgs.push(msgs);
        self.check_data.mask_shares.push(random.rep_adds);
        self.masks.push(random.rep);
    }

    pub fn prepare_many(&mut self, xs: &[Share<F>], ys: &[Share<F>]) {
        debug_assert_eq!(xs.len(), ys.len());
        for (x, y) in xs.iter().zip(ys) {
            self.prepare(x, y);
        }
    }

    /// Run the batch: senders to P0, P0 opens, everyone adjusts. Returns one
    /// fresh threshold-t sharing per queued multiplication.
    pub async fn run<C: SplitChannel>(
        self,
        network: &mut Network<C>,
    ) -> Result<Vec<Share<F>>, ProtocolError> {
        let count = self.masks.len();
        if count == 0 {
            return Err(ProtocolError::NothingPrepared);
        }
        let _timer = ScopedTimer::new("mult");

        let me = network.id();
        let n = network.size();
        let t = self.arithmetic.threshold();
        let u_size = 2 * t + 1;
        let t_size = n - t;

        self.check_data.counter += count;

        // Round 1: senders hand their masked additive shares to P0.
        if me != 0 && me < u_size {
            network.send_elements_to(0, &self.to_send).await?;
        }

        let mut openings: Vec<F> = Vec::new();
        if me == 0 {
            for sender in 0..u_size {
                let shares = if sender == 0 {
                    self.to_send.clone()
                } else {
                    network.recv_elements_from(sender, count).await?
                };
                self.check_data.shares_recv[sender].extend_from_slice(&shares);
                if openings.is_empty() {
                    openings = shares;
                } else {
                    for (acc, share) in openings.iter_mut().zip(shares) {
                        *acc += share;
                    }
                }
            }

            // Round 2: P0 sends the openings to every party in T.
            network
                .send_elements_to_each(1..t_size, &openings)
                .await?;
        }

        // Round 3: parties in T record the openings; the rest act as if P0
        // sent zeros, which is sound because they do not hold the canonical
        // slot.
        let openings: Vec<F> = if me == 0 {
            openings
        } else if me < t_size {
            network.recv_elements_from(0, count).await?
        } else {
            vec![F::zero(); count]
        };
        if me < t_size {
            self.check_data.values_recv.extend_from_slice(&openings);
        }

        let output = self
            .masks
            .iter()
            .zip(openings)
            .map(|(mask, opening)| self.arithmetic.add_constant(mask, opening))
            .collect();
        Ok(output)
    }
}
