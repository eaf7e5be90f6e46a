//! Weighted random selection.
//!
//! Every simulated user picks its next task through a [`WeightedSelector`],
//! so a task with weight 10 runs ten times as often as a task with weight 1.

use rand::Rng;
use thiserror::Error;

/// Errors raised when building a selector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Cannot select from an empty list")]
    Empty,

    #[error("Item at index {0} has zero weight")]
    ZeroWeight(usize),
}

/// Chooses items with probability proportional to their integer weights.
///
/// # Example
/// ```
/// use angple_loadtest::selector::WeightedSelector;
///
/// let selector = WeightedSelector::new(vec![("read", 80), ("write", 20)]).unwrap();
/// let picked = selector.select();
/// // 80% chance of "read", 20% chance of "write"
/// # assert!(*picked == "read" || *picked == "write");
/// ```
#[derive(Debug, Clone)]
pub struct WeightedSelector<T> {
    items: Vec<T>,
    cumulative_weights: Vec<u64>,
    total_weight: u64,
}

impl<T> WeightedSelector<T> {
    /// Build a selector from `(item, weight)` pairs.
    pub fn new(weighted: Vec<(T, u32)>) -> Result<Self, SelectorError> {
        if weighted.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut items = Vec::with_capacity(weighted.len());
        let mut cumulative = Vec::with_capacity(weighted.len());
        let mut sum: u64 = 0;

        for (idx, (item, weight)) in weighted.into_iter().enumerate() {
            if weight == 0 {
                return Err(SelectorError::ZeroWeight(idx));
            }
            sum += u64::from(weight);
            cumulative.push(sum);
            items.push(item);
        }

        Ok(Self {
            items,
            cumulative_weights: cumulative,
            total_weight: sum,
        })
    }

    /// Select an item based on weighted random distribution.
    pub fn select(&self) -> &T {
        let ticket = rand::thread_rng().gen_range(0..self.total_weight);
        &self.items[self.index_for(ticket)]
    }

    /// Maps a ticket in `0..total_weight` to the owning item index.
    fn index_for(&self, ticket: u64) -> usize {
        // First cumulative weight strictly greater than the ticket
        self.cumulative_weights.partition_point(|w| *w <= ticket)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Selection probability of each item, in insertion order.
    pub fn probabilities(&self) -> Vec<f64> {
        let mut previous = 0;
        self.cumulative_weights
            .iter()
            .map(|cumulative| {
                let weight = cumulative - previous;
                previous = *cumulative;
                weight as f64 / self.total_weight as f64
            })
            .collect()
    }
}
