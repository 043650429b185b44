//! A single price level in the order book.
//!
//! Orders at the same price are stored in FIFO order (time priority)
//! using a [`VecDeque`]. The level holds ids only; order bodies live in the
//! book's id-keyed maps so fills can mutate them in place.

use std::collections::VecDeque;

use liquimatch_types::{OrderId, Price};

/// All resting orders of one market at one price.
///
/// The front of the deque has the highest time priority and is matched
/// first.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Price,
    pub orders: VecDeque<OrderId>,
}

impl PriceLevel {
    #[must_use]
    pub fn new(price: Price) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
        }
    }

    /// Add an order to the back of this level (lowest time priority).
    pub fn push_back(&mut self, id: OrderId) {
        self.orders.push_back(id);
    }

    /// Remove and return the oldest order.
    pub fn pop_front(&mut self) -> Option<OrderId> {
        self.orders.pop_front()
    }

    #[must_use]
    pub fn front(&self) -> Option<&OrderId> {
        self.orders.front()
    }

    /// Remove a specific order. Returns `false` if it was not here.
    pub fn remove_order(&mut self, id: &OrderId) -> bool {
        match self.orders.iter().position(|o| o == id) {
            Some(pos) => {
                self.orders.remove(pos);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }
}
