//! Random selection of one alternative per variation group.
//!
//! Draws are unbiased: indices come from rejection sampling over `u64`
//! values rather than a plain modulo. Callers inject the generator, which
//! must be a `CryptoRng`; predictable selection would let downstream
//! classifiers learn a campaign's variation fingerprint.

use std::fmt;

use rand::rngs::ThreadRng;
use rand::{CryptoRng, RngCore};
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::template::ParsedTemplate;

/// Chosen alternative index for every group, in group-index order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SelectionPath(SmallVec<[usize; 8]>);

impl SelectionPath {
    pub fn new(choices: impl IntoIterator<Item = usize>) -> Self {
        Self(choices.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Alternative chosen for a group
    pub fn get(&self, group: usize) -> Option<usize> {
        self.0.get(group).copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

impl From<Vec<usize>> for SelectionPath {
    fn from(choices: Vec<usize>) -> Self {
        Self(SmallVec::from_vec(choices))
    }
}

impl FromIterator<usize> for SelectionPath {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for SelectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, choice) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{}", choice)?;
        }
        Ok(())
    }
}

impl Serialize for SelectionPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

/// Draw a selection path for `template`.
///
/// Every group gets one draw in index order, including groups nested in
/// alternatives that end up not being rendered, so a fixed generator
/// sequence always yields the same path.
pub fn select<R>(template: &ParsedTemplate, rng: &mut R) -> SelectionPath
where
    R: RngCore + CryptoRng + ?Sized,
{
    template
        .groups()
        .iter()
        .map(|group| match group.weights() {
            Some(weights) => weighted_index(rng, weights),
            None => uniform_index(rng, group.alternatives() as u64) as usize,
        })
        .collect()
}

/// Uniform draw from `0..bound` without modulo bias.
///
/// Values from the incomplete top segment of the `u64` range are rejected
/// and redrawn.
pub fn uniform_index<R>(rng: &mut R, bound: u64) -> u64
where
    R: RngCore + ?Sized,
{
    assert!(bound > 0, "uniform_index bound must be positive");
    // 2^64 mod bound; zero when bound divides 2^64 evenly
    let remainder = (u64::MAX % bound + 1) % bound;
    let limit = 0u64.wrapping_sub(remainder);
    loop {
        let value = rng.next_u64();
        if remainder == 0 || value < limit {
            return value % bound;
        }
    }
}

/// Draw an index with probability proportional to its weight
pub fn weighted_index<R>(rng: &mut R, weights: &[u32]) -> usize
where
    R: RngCore + ?Sized,
{
    let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
    let mut target = uniform_index(rng, total);
    for (index, weight) in weights.iter().enumerate() {
        let weight = u64::from(*weight);
        if target < weight {
            return index;
        }
        target -= weight;
    }
    weights.len() - 1
}

/// Source of per-render generators for concurrent workers
pub trait RngFactory: Send + Sync + 'static {
    type Rng: RngCore + CryptoRng;

    fn rng(&self) -> Self::Rng;
}

/// Thread-local, OS-seeded CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl RngFactory for SystemRandom {
    type Rng = ThreadRng;

    fn rng(&self) -> ThreadRng {
        rand::rng()
    }
}
