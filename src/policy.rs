//! Weighted-tree placement policy and the placement engine (spec §3, §4.1).
//!
//! Sampling style (categorical-by-cumulative-weight, deterministic given a
//! fixed RNG stream) is grounded on `objectio-placement/src/crush.rs`'s
//! `CrushMap::select_nodes`, adapted from hash-based to explicit-weight
//! sampling per §4.1's algorithm.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand::seq::SliceRandom;

use crate::error::{self, Error};

/// Opaque drive identifier. In production this is a UUID string; the raw-key
/// grammar (§4.2) treats it as an arbitrary token, so it is kept as a plain
/// `String` rather than a parsed `uuid::Uuid` (see `DESIGN.md`).
pub type DriveId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Soft,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentClass {
    Data,
    Coding,
    Both,
}

impl FragmentClass {
    fn matches(self, desired: FragmentClass) -> bool {
        self == FragmentClass::Both || self == desired
    }
}

#[derive(Debug, Clone)]
pub enum PolicyNode {
    Leaf {
        uuid: DriveId,
        affinity: Affinity,
        ftype: FragmentClass,
    },
    Internal {
        children: Vec<PolicyNode>,
        weights: Vec<f64>,
        affinity: Affinity,
        ftype: FragmentClass,
    },
}

impl PolicyNode {
    fn ftype(&self) -> FragmentClass {
        match self {
            PolicyNode::Leaf { ftype, .. } => *ftype,
            PolicyNode::Internal { ftype, .. } => *ftype,
        }
    }
}

/// A drive-weighted placement tree. Root is the cluster.
#[derive(Debug, Clone)]
pub struct Policy {
    pub root: PolicyNode,
    /// §4.3: `minSplitSize >= 0`, stored signed so callers may pass `<= 0`
    /// meaning "do not split" without a separate `Option`.
    pub min_split_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub data: Vec<DriveId>,
    pub coding: Vec<DriveId>,
}

/// Per-call scratch: a lazy copy-on-write cache of every visited internal
/// node's weight vector, keyed by that node's address. Dropped at the end of
/// `select()`; the policy itself is never mutated (spec §3 `PlacementIndex`).
struct PlacementIndex {
    cache: HashMap<usize, (Vec<f64>, f64)>,
}

impl PlacementIndex {
    fn new() -> Self {
        Self { cache: HashMap::new() }
    }

    fn entry(&mut self, node: &PolicyNode, weights: &[f64]) -> &mut (Vec<f64>, f64) {
        let key = node as *const PolicyNode as usize;
        self.cache
            .entry(key)
            .or_insert_with(|| (weights.to_vec(), weights.iter().sum()))
    }
}

fn categorical_sample(weights: &[f64], sum: f64, rng: &mut impl Rng) -> usize {
    debug_assert!(sum > 0.0);
    let u = rng.random_range(0.0..sum);
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if cumulative >= u {
            return i;
        }
    }
    weights.len() - 1
}

fn walk(
    node: &PolicyNode,
    desired: FragmentClass,
    index: &mut PlacementIndex,
    rng: &mut impl Rng,
) -> error::Result<DriveId> {
    match node {
        PolicyNode::Leaf { uuid, .. } => Ok(uuid.clone()),
        PolicyNode::Internal { children, weights, affinity, .. } => {
            let (cached, _) = index.entry(node, weights);
            let filtered: Vec<f64> = children
                .iter()
                .zip(cached.iter())
                .map(|(child, &w)| if child.ftype().matches(desired) { w } else { 0.0 })
                .collect();
            let filtered_sum: f64 = filtered.iter().sum();

            if filtered_sum <= 0.0 {
                return Err(Error::config(format!(
                    "no child matching fragment class {desired:?} at this level of the policy tree"
                )));
            }

            let pick = categorical_sample(&filtered, filtered_sum, rng);

            let (cached, cached_sum) = index.entry(node, weights);
            let old = cached[pick];
            let new = match affinity {
                Affinity::Hard => 0.0,
                Affinity::Soft => old * 0.8,
            };
            *cached_sum += new - old;
            cached[pick] = new;

            walk(&children[pick], desired, index, rng)
        }
    }
}

/// `select(policy, k, m)` (spec §4.1): samples `k` distinct-per-call data
/// leaves then `m` coding leaves, walking root-to-leaf and downweighting
/// picked subtrees per node affinity as it goes.
pub fn select(policy: &Policy, k: u32, m: u32, rng: &mut impl Rng) -> error::Result<Selection> {
    let mut index = PlacementIndex::new();

    let mut data = Vec::with_capacity(k as usize);
    for _ in 0..k {
        data.push(walk(&policy.root, FragmentClass::Data, &mut index, rng)?);
    }

    let mut coding = Vec::with_capacity(m as usize);
    for _ in 0..m {
        coding.push(walk(&policy.root, FragmentClass::Coding, &mut index, rng)?);
    }

    Ok(Selection { data, coding })
}

/// The fairness PRNG used for categorical sampling (§9: "a plain PRNG for
/// categorical sampling, fairness only").
pub fn fairness_rng() -> rand::rngs::SmallRng {
    rand::rngs::SmallRng::from_os_rng()
}

/// The CSPRNG used for bootstrap list shuffles (§9: equal-length
/// permutations over fleet lists need factorial-scale entropy, so the plain
/// fairness PRNG must not be reused here).
pub fn csprng_shuffle<T>(items: &mut [T]) {
    items.shuffle(&mut rand::rngs::OsRng);
}
