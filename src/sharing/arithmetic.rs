//! Local arithmetic on replicated shares: linear operations, constant
//! adjustments at the canonical slot, and the table-driven pairwise
//! multiplications that produce degree-2t or additive sharings of a product.

use super::{Replicator, Share, SharingError};
use crate::algebra::Field;

/// Global additive slot used for constant adjustments. Its subset is the
/// lexicographically first combination, which always contains party 0.
const CONSTANT_SLOT: usize = 0;

/// One product term of the pairwise multiplication table: multiply local
/// slots `src_a` and `src_b` and accumulate into local degree-2t slot `dest`.
/// `first_party` is the first member of the subset intersection and decides
/// who owns the term in the additive variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultEntry {
    pub src_a: usize,
    pub src_b: usize,
    pub dest: usize,
    pub first_party: usize,
}

/// Whether a full element or only its digest is transmitted when a degree-2t
/// slot is opened towards the parties missing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecKind {
    Value,
    Digest,
}

/// Transmission plan for one owned degree-2t slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecEntry {
    pub kind: RecKind,
    pub receivers: Vec<usize>,
}

/// Per-party engine for local share manipulation.
///
/// Holds the threshold-`t` and threshold-`2t` replicators plus the tables
/// derived from them. All tables are fixed at construction.
#[derive(Debug, Clone)]
pub struct ShareArithmetic {
    id: usize,
    parties: usize,
    threshold: usize,
    replicator: Replicator,
    double: Replicator,
    mult_table: Vec<MultEntry>,
    rec_table: Vec<RecEntry>,
    embed_table: Vec<(usize, usize)>,
    constant_position: Option<usize>,
}

impl ShareArithmetic {
    pub fn new(id: usize, threshold: usize, parties: usize) -> Result<Self, SharingError> {
        let replicator = Replicator::new(parties, threshold)?;
        let double = Replicator::new(parties, 2 * threshold)?;

        let constant_position = replicator
            .index_set(id)
            .iter()
            .position(|&slot| slot == CONSTANT_SLOT);

        let mult_table = build_mult_table(id, parties, threshold, &replicator, &double);
        let rec_table = build_rec_table(id, parties, &double);
        let embed_table = build_embed_table(id, parties, threshold, &replicator, &double);

        Ok(Self {
            id,
            parties,
            threshold,
            replicator,
            double,
            mult_table,
            rec_table,
            embed_table,
            constant_position,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    pub fn double_replicator(&self) -> &Replicator {
        &self.double
    }

    pub fn share_size(&self) -> usize {
        self.replicator.share_size()
    }

    pub fn mult_table(&self) -> &[MultEntry] {
        &self.mult_table
    }

    pub fn rec_table(&self) -> &[RecEntry] {
        &self.rec_table
    }

    pub fn add<F: Field>(&self, a: &Share<F>, b: &Share<F>) -> Share<F> {
        debug_assert_eq!(a.len(), b.len());
        Share(a.iter().zip(b.iter()).map(|(&x, &y)| x + y).collect())
    }

    pub fn sub<F: Field>(&self, a: &Share<F>, b: &Share<F>) -> Share<F> {
        debug_assert_eq!(a.len(), b.len());
        Share(a.iter().zip(b.iter()).map(|(&x, &y)| x - y).collect())
    }

    /// Share of `a + c`. Only the parties holding the canonical slot touch
    /// their share.
    pub fn add_constant<F: Field>(&self, a: &Share<F>, c: F) -> Share<F> {
        let mut r = a.clone();
        if let Some(position) = self.constant_position {
            r[position] += c;
        }
        r
    }

    /// Share of `a - c`.
    pub fn sub_constant<F: Field>(&self, a: &Share<F>, c: F) -> Share<F> {
        let mut r = a.clone();
        if let Some(position) = self.constant_position {
            r[position] -= c;
        }
        r
    }

    /// Share of `c - a`.
    pub fn const_sub<F: Field>(&self, c: F, a: &Share<F>) -> Share<F> {
        let mut r = Share(a.iter().map(|&x| -x).collect());
        if let Some(position) = self.constant_position {
            r[position] += c;
        }
        r
    }

    pub fn mul_constant<F: Field>(&self, a: &Share<F>, c: F) -> Share<F> {
        Share(a.iter().map(|&x| c * x).collect())
    }

    /// Degree-2t share of `a * b` from two threshold-t shares.
    pub fn multiply_to_double<F: Field>(&self, a: &Share<F>, b: &Share<F>) -> Share<F> {
        let mut out = Share::zeroed(self.double.share_size());
        for entry in &self.mult_table {
            out[entry.dest] += a[entry.src_a] * b[entry.src_b];
        }
        out
    }

    /// Additive share of `a * b`; summed over the first `2t + 1` parties the
    /// outputs reconstruct the product.
    pub fn multiply_to_additive<F: Field>(&self, a: &Share<F>, b: &Share<F>) -> F {
        let mut out = F::zero();
        for entry in &self.mult_table {
            if entry.first_party == self.id {
                out += a[entry.src_a] * b[entry.src_b];
            }
        }
        out
    }

    /// Re-express a threshold-t share in the degree-2t layout. Every
    /// degree-t slot is assigned to the degree-2t slot named by the first
    /// `n - 2t` members of its subset, contributed by exactly the owners of
    /// that destination, so all copies agree and the sum is preserved.
    pub fn to_double_degree<F: Field>(&self, a: &Share<F>) -> Share<F> {
        let mut out = Share::zeroed(self.double.share_size());
        for &(src, dest) in &self.embed_table {
            out[dest] += a[src];
        }
        out
    }

    /// Local position of the degree-2t slot owned by this party reached by
    /// multiplying local slots `a` and `b`, if any. Mirrors the mult-table
    /// construction; exposed for the index tests.
    pub fn double_slot_for(&self, a: usize, b: usize) -> Option<usize> {
        let ga = self.replicator.index_set(self.id)[a];
        let gb = self.replicator.index_set(self.id)[b];
        let target = intersect_prefix(
            self.replicator.combination(ga),
            self.replicator.combination(gb),
            self.parties - 2 * self.threshold,
        );
        let slot = self
            .double
            .slot_index(&target)
            .expect("intersection of two share subsets is a valid degree-2t subset");
        self.double
            .index_set(self.id)
            .iter()
            .position(|&s| s == slot)
    }
}

/// Sorted intersection of two sorted subsets, truncated to `keep` elements.
fn intersect_prefix(a: &[usize], b: &[usize], keep: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(keep);
    let mut ib = 0;
    for &x in a {
        while ib < b.len() && b[ib] < x {
            ib += 1;
        }
        if ib < b.len() && b[ib] == x {
            out.push(x);
            if out.len() == keep {
                break;
            }
        }
    }
    debug_assert_eq!(out.len(), keep);
    out
}

fn build_mult_table(
    id: usize,
    parties: usize,
    threshold: usize,
    replicator: &Replicator,
    double: &Replicator,
) -> Vec<MultEntry> {
    let mut table = Vec::new();
    let index_set = replicator.index_set(id);
    for (src_a, &ga) in index_set.iter().enumerate() {
        for (src_b, &gb) in index_set.iter().enumerate() {
            let target = intersect_prefix(
                replicator.combination(ga),
                replicator.combination(gb),
                parties - 2 * threshold,
            );
            let slot = double
                .slot_index(&target)
                .expect("intersection of two share subsets is a valid degree-2t subset");
            if let Some(dest) = double.index_set(id).iter().position(|&s| s == slot) {
                table.push(MultEntry {
                    src_a,
                    src_b,
                    dest,
                    first_party: target[0],
                });
            }
        }
    }
    table
}

fn build_rec_table(id: usize, parties: usize, double: &Replicator) -> Vec<RecEntry> {
    double
        .index_set(id)
        .iter()
        .map(|&slot| {
            let subset = double.combination(slot);
            let receivers = (0..parties)
                .filter(|party| !subset.contains(party))
                .collect();
            let kind = if subset[0] == id {
                RecKind::Value
            } else {
                RecKind::Digest
            };
            RecEntry { kind, receivers }
        })
        .collect()
}

fn build_embed_table(
    id: usize,
    parties: usize,
    threshold: usize,
    replicator: &Replicator,
    double: &Replicator,
) -> Vec<(usize, usize)> {
    let mut table = Vec::new();
    for (src, &slot) in replicator.index_set(id).iter().enumerate() {
        let subset = replicator.combination(slot);
        let target = &subset[..parties - 2 * threshold];
        if !target.contains(&id) {
            continue;
        }
        let dslot = double
            .slot_index(target)
            .expect("prefix of a share subset is a valid degree-2t subset");
        let dest = double
            .index_set(id)
            .iter()
            .position(|&s| s == dslot)
            .expect("members of the destination subset own the destination slot");
        table.push((src, dest));
    }
    table
}
