//! Fixed-capacity ring buffer.
//!
//! Backs price history, funding history, and toxicity buckets. Storage is
//! allocated once; pushes overwrite the oldest slot after the ring fills.

use serde::{Deserialize, Serialize};

/// Fixed-capacity ring with a write cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RingRepr<T>")]
#[serde(bound(deserialize = "T: Default + Clone + Deserialize<'de>"))]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    cursor: usize,
    len: usize,
}

impl<T: Default + Clone> RingBuffer<T> {
    /// Allocate a ring of `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![T::default(); capacity.max(1)],
            cursor: 0,
            len: 0,
        }
    }

    /// Write at the cursor and advance it, overwriting the oldest entry when full.
    pub fn push(&mut self, value: T) {
        self.slots[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.slots.len();
        if self.len < self.slots.len() {
            self.len += 1;
        }
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = T::default();
        }
        self.cursor = 0;
        self.len = 0;
    }
}

impl<T> RingBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Filled entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (head, tail) = if self.len < self.slots.len() {
            (&self.slots[..self.len], &self.slots[..0])
        } else {
            (&self.slots[self.cursor..], &self.slots[..self.cursor])
        };
        head.iter().chain(tail.iter())
    }
}

#[derive(Deserialize)]
struct RingRepr<T> {
    slots: Vec<T>,
    cursor: usize,
    len: usize,
}

impl<T: Default + Clone> From<RingRepr<T>> for RingBuffer<T> {
    fn from(repr: RingRepr<T>) -> Self {
        let mut slots = repr.slots;
        if slots.is_empty() {
            slots.push(T::default());
        }
        let cap = slots.len();
        Self {
            slots,
            cursor: repr.cursor % cap,
            len: repr.len.min(cap),
        }
    }
}
