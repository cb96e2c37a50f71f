//! Replicated secret sharing over a prime field.
//!
//! A threshold-`t` sharing of `s` among `n` parties splits `s` into
//! `C(n, n-t)` additive slots, one per size-`(n-t)` subset of the parties in
//! lexicographic order. Party `i` holds the slots whose subset contains `i`.
//! Any `t` parties miss at least one slot and learn nothing; any `n-t`
//! parties jointly hold every slot. The same layout with threshold `2t`
//! carries the degree-2t sharings produced by local multiplication.

pub mod arithmetic;

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algebra::Field;
use crate::crypto::Prg;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SharingError {
    #[error("privacy threshold must be between 1 and n-1 (n = {n}, t = {t})")]
    InvalidThreshold { n: usize, t: usize },
    #[error("share copies disagree at additive slot {slot}")]
    Inconsistent { slot: usize },
}

/// m-choose-k. Exact for the parameter range the runtime supports (n <= 16).
pub(crate) fn binomial(m: usize, k: usize) -> usize {
    let k = k.min(m - k);
    let mut top: usize = 1;
    let mut bot: usize = 1;
    for i in 1..=k {
        top *= m + 1 - i;
        bot *= i;
    }
    top / bot
}

/// Advance `combination` to the next lexicographic m-choose-k combination.
/// Returns false once the last combination has been reached.
fn next_combination(combination: &mut [usize], m: usize) -> bool {
    let k = combination.len();
    for i in (0..k).rev() {
        if combination[i] < m - k + i {
            combination[i] += 1;
            for j in i + 1..k {
                combination[j] = combination[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

/// Additive (n-1)-of-n sharing: `count - 1` slots from `prg`, the last slot
/// fixes the sum.
pub fn share_additive<F: Field>(secret: F, count: usize, prg: &mut Prg) -> Vec<F> {
    assert!(count > 0, "cannot create an additive sharing with no slots");
    let mut shares: Vec<F> = prg.elements(count - 1);
    let sum: F = shares.iter().copied().sum();
    shares.push(secret - sum);
    shares
}

/// A single party's replicated share: the additive slots named by its index
/// set, in lexicographic slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share<F>(pub Vec<F>);

impl<F: Field> Share<F> {
    pub fn zeroed(width: usize) -> Self {
        Self(vec![F::zero(); width])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, F> {
        self.0.iter()
    }
}

impl<F> Index<usize> for Share<F> {
    type Output = F;

    fn index(&self, index: usize) -> &F {
        &self.0[index]
    }
}

impl<F> IndexMut<usize> for Share<F> {
    fn index_mut(&mut self, index: usize) -> &mut F {
        &mut self.0[index]
    }
}

/// Factory for creating and reconstructing replicated shares for a fixed
/// `(n, t)`. Immutable after construction; the share layout is field
/// independent, so a single replicator serves both supported moduli.
#[derive(Debug, Clone)]
pub struct Replicator {
    size: usize,
    threshold: usize,
    share_size: usize,
    additive_share_size: usize,
    combinations: Vec<Vec<usize>>,
    slot_of: BTreeMap<Vec<usize>, usize>,
    lookup: Vec<Vec<usize>>,
    difference_size: usize,
}

impl Replicator {
    pub fn new(size: usize, threshold: usize) -> Result<Self, SharingError> {
        if threshold == 0 || threshold >= size {
            return Err(SharingError::InvalidThreshold {
                n: size,
                t: threshold,
            });
        }

        let k = size - threshold;
        let share_size = binomial(size - 1, threshold);
        let additive_share_size = binomial(size, threshold);

        let mut combinations = Vec::with_capacity(additive_share_size);
        let mut slot_of = BTreeMap::new();
        let mut lookup = vec![Vec::with_capacity(share_size); size];

        let mut combination: Vec<usize> = (0..k).collect();
        let mut slot = 0;
        loop {
            for &party in &combination {
                lookup[party].push(slot);
            }
            slot_of.insert(combination.clone(), slot);
            combinations.push(combination.clone());
            slot += 1;
            if !next_combination(&mut combination, size) {
                break;
            }
        }

        // Slots the first party holds that the second is missing.
        let difference_size = lookup[0].iter().filter(|s| !lookup[1].contains(s)).count();

        Ok(Self {
            size,
            threshold,
            share_size,
            additive_share_size,
            combinations,
            slot_of,
            lookup,
            difference_size,
        })
    }

    /// Replicator for the standard honest-majority threshold `t = (n-1)/3`.
    pub fn for_parties(size: usize) -> Result<Self, SharingError> {
        Self::new(size, (size - 1) / 3)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of elements in one party's share.
    pub fn share_size(&self) -> usize {
        self.share_size
    }

    /// Total number of additive slots behind a sharing.
    pub fn additive_share_size(&self) -> usize {
        self.additive_share_size
    }

    /// Number of slots one share holds that another is missing.
    pub fn difference_size(&self) -> usize {
        self.difference_size
    }

    /// The party subset holding additive slot `slot`.
    pub fn combination(&self, slot: usize) -> &[usize] {
        &self.combinations[slot]
    }

    /// Reverse lookup: slot index of a sorted party subset.
    pub fn slot_index(&self, combination: &[usize]) -> Option<usize> {
        self.slot_of.get(combination).copied()
    }

    /// Slots held by `party`, in lexicographic order.
    pub fn index_set(&self, party: usize) -> &[usize] {
        &self.lookup[party]
    }

    /// Split `secret` into one replicated share per party.
    pub fn share<F: Field>(&self, secret: F, prg: &mut Prg) -> Vec<Share<F>> {
        let additive = share_additive(secret, self.additive_share_size, prg);
        (0..self.size)
            .map(|party| {
                Share(
                    self.lookup[party]
                        .iter()
                        .map(|&slot| additive[slot])
                        .collect(),
                )
            })
            .collect()
    }

    /// Share a batch of secrets; the result is indexed by party, then secret.
    pub fn share_batch<F: Field>(&self, secrets: &[F], prg: &mut Prg) -> Vec<Vec<Share<F>>> {
        let mut all: Vec<Vec<Share<F>>> = vec![Vec::with_capacity(secrets.len()); self.size];
        for secret in secrets {
            for (party, share) in self.share(*secret, prg).into_iter().enumerate() {
                all[party].push(share);
            }
        }
        all
    }

    /// Reconstruct trusting the first copy of every slot.
    pub fn reconstruct<F: Field>(&self, shares: &[Share<F>]) -> F {
        self.redundant_slots(shares)
            .iter()
            .map(|copies| copies[0])
            .sum()
    }

    /// Reconstruct, failing if any two copies of a slot disagree.
    /// Detects tampering by up to `n - t - 1` wrong copies; sound for t < n/2.
    pub fn error_detect<F: Field>(&self, shares: &[Share<F>]) -> Result<F, SharingError> {
        let mut secret = F::zero();
        for (slot, copies) in self.redundant_slots(shares).iter().enumerate() {
            if !copies.iter().all_equal() {
                return Err(SharingError::Inconsistent { slot });
            }
            secret += copies[0];
        }
        Ok(secret)
    }

    /// Reconstruct by majority vote per slot; correct for t < n/3 since an
    /// adversary holding at most `t` of the `n - t` copies cannot win a vote.
    pub fn error_correct<F: Field>(&self, shares: &[Share<F>]) -> F {
        let mut secret = F::zero();
        for copies in self.redundant_slots(shares) {
            let (winner, votes) = copies
                .iter()
                .map(|value| {
                    let votes = copies.iter().filter(|other| *other == value).count();
                    (*value, votes)
                })
                .max_by_key(|(_, votes)| *votes)
                .expect("every slot has at least one copy");
            debug_assert!(votes * 2 > copies.len(), "majority vote tied");
            secret += winner;
        }
        secret
    }

    /// Collect every party's copy of each additive slot.
    fn redundant_slots<F: Field>(&self, shares: &[Share<F>]) -> Vec<Vec<F>> {
        let mut redundant: Vec<Vec<F>> =
            vec![Vec::with_capacity(self.size - self.threshold); self.additive_share_size];
        for (party, share) in shares.iter().enumerate() {
            for (position, &slot) in self.lookup[party].iter().enumerate() {
                redundant[slot].push(share[position]);
            }
        }
        redundant
    }
}
