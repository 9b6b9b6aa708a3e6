//! Weighted random selection
//!
//! Region overrides pick one mirror per request with probability proportional
//! to its weight. The random source is a parameter so tests can drive the
//! draw with a seeded generator.

use rand::Rng;

/// An item paired with its selection weight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice<T> {
    pub item: T,
    pub weight: u32,
}

impl<T> Choice<T> {
    pub fn new(item: T, weight: u32) -> Self {
        Self { item, weight }
    }
}

/// Pick one item with probability `weight / sum(weights)`
///
/// Zero-weight items never win while any positive-weight item exists. When
/// every weight is zero the draw is uniform. Returns `None` only for an
/// empty slice.
pub fn weighted_choice<'a, T, R: Rng>(choices: &'a [Choice<T>], rng: &mut R) -> Option<&'a T> {
    if choices.is_empty() {
        return None;
    }

    let total: u64 = choices.iter().map(|c| u64::from(c.weight)).sum();

    if total == 0 {
        let index = rng.random_range(0..choices.len());
        return Some(&choices[index].item);
    }

    let mut remaining = rng.random_range(0..total);
    for choice in choices {
        let weight = u64::from(choice.weight);
        if remaining < weight {
            return Some(&choice.item);
        }
        remaining -= weight;
    }

    // remaining < total guarantees the loop returns
    choices.iter().rev().find(|c| c.weight > 0).map(|c| &c.item)
}
