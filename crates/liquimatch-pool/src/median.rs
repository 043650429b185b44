//! Bounded price history and median selection.
//!
//! The instantaneous pool price can be moved within a single block, so risk
//! checks read the hour and day medians instead. One sample is recorded per
//! refresh; the oldest samples fall off once the day window is full.
//!
//! The median is the element at index `len / 2` after selection. For an even
//! number of samples that is the upper of the two middle values; it is not
//! averaged.

use std::collections::VecDeque;

use liquimatch_types::Price;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistory {
    samples: VecDeque<Price>,
    day_window: usize,
    hour_window: usize,
}

impl PriceHistory {
    #[must_use]
    pub fn new(day_window: usize, hour_window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(day_window),
            day_window: day_window.max(1),
            hour_window: hour_window.max(1),
        }
    }

    pub fn record(&mut self, price: Price) {
        self.samples.push_back(price);
        while self.samples.len() > self.day_window {
            self.samples.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Median over every retained sample.
    #[must_use]
    pub fn day_median(&self) -> Option<Price> {
        median_of(self.samples.iter().cloned().collect())
    }

    /// Median over the most recent `hour_window` samples.
    #[must_use]
    pub fn hour_median(&self) -> Option<Price> {
        let skip = self.samples.len().saturating_sub(self.hour_window);
        median_of(self.samples.iter().skip(skip).cloned().collect())
    }
}

fn median_of(mut values: Vec<Price>) -> Option<Price> {
    if values.is_empty() {
        return None;
    }
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable(mid);
    Some(median.clone())
}
