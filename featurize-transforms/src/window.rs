//! Fixed-capacity ring buffer for windowed transforms
//!
//! Keeps the most recent `capacity` values pushed into it, evicting the
//! oldest on overflow. Windowed transforms read logically-contiguous ranges
//! out of the live window to build lag/lead rows without copying the buffer.

use featurize_core::{Error, Result};

/// Ring buffer over the last `capacity` pushed values.
#[derive(Debug, Clone)]
pub struct CircularBuffer<T> {
    capacity: usize,
    start: usize,
    data: Vec<T>,
}

impl<T> CircularBuffer<T> {
    /// Create a buffer holding at most `capacity` values.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument("circular buffer capacity must be positive".into()));
        }
        Ok(CircularBuffer { capacity, start: 0, data: Vec::with_capacity(capacity) })
    }

    /// Append `value`, evicting the oldest value when full.
    pub fn push(&mut self, value: T) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.start] = value;
            self.start = (self.start + 1) % self.capacity;
        }
    }

    /// Values currently held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds nothing.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the buffer holds `capacity` values.
    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every value, keeping the capacity.
    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    /// The value `index` positions from the oldest, if live.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index < self.data.len() {
            self.data.get((self.start + index) % self.capacity)
        } else {
            None
        }
    }

    /// Iterate the live window from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (head, tail) = self.data.split_at(self.start);
        tail.iter().chain(head.iter())
    }

    /// Iterate `length` values starting `offset` positions from the oldest.
    ///
    /// Requests reaching past the live window yield a shortened, possibly
    /// empty iterator rather than an error.
    pub fn range(&self, length: usize, offset: usize) -> impl Iterator<Item = &T> {
        self.iter().skip(offset).take(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn contents(buffer: &CircularBuffer<i32>) -> Vec<i32> {
        buffer.iter().copied().collect()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(CircularBuffer::<i32>::new(0).is_err());
    }

    #[test]
    fn overflow_evicts_the_oldest() {
        let mut buffer = CircularBuffer::new(3).unwrap();
        for v in 1..=5 {
            buffer.push(v);
        }
        assert!(buffer.is_full());
        assert_eq!(contents(&buffer), vec![3, 4, 5]);
        assert_eq!(buffer.get(0), Some(&3));
        assert_eq!(buffer.get(2), Some(&5));
        assert_eq!(buffer.get(3), None);
    }

    #[test]
    fn range_is_shortened_past_the_live_window() {
        let mut buffer = CircularBuffer::new(4).unwrap();
        for v in 1..=3 {
            buffer.push(v);
        }
        assert_eq!(buffer.range(5, 1).copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(buffer.range(2, 5).count(), 0);
        assert_eq!(buffer.range(2, 0).copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn clear_keeps_the_capacity() {
        let mut buffer = CircularBuffer::new(2).unwrap();
        buffer.push(1);
        buffer.push(2);
        buffer.push(3);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 2);
        buffer.push(9);
        assert_eq!(contents(&buffer), vec![9]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(i32),
        Clear,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            8 => any::<i32>().prop_map(Op::Push),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        // A bounded VecDeque is the reference model for the ring.
        #[test]
        fn matches_a_deque_model(
            capacity in 1usize..16,
            ops in proptest::collection::vec(op_strategy(), 0..64),
            length in 0usize..20,
            offset in 0usize..20,
        ) {
            let mut buffer = CircularBuffer::new(capacity).unwrap();
            let mut model: VecDeque<i32> = VecDeque::new();
            for op in ops {
                match op {
                    Op::Push(v) => {
                        if model.len() == capacity {
                            model.pop_front();
                        }
                        model.push_back(v);
                        buffer.push(v);
                    }
                    Op::Clear => {
                        model.clear();
                        buffer.clear();
                    }
                }
            }
            prop_assert_eq!(contents(&buffer), model.iter().copied().collect::<Vec<_>>());
            prop_assert_eq!(buffer.len(), model.len());
            prop_assert_eq!(buffer.is_full(), model.len() == capacity);
            let expected_range: Vec<i32> = model.iter().skip(offset).take(length).copied().collect();
            prop_assert_eq!(buffer.range(length, offset).copied().collect::<Vec<_>>(), expected_range);
        }
    }
}
