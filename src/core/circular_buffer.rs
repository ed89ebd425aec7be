use std::collections::VecDeque;

/// Fixed-capacity ring buffer.
///
/// This is a small wrapper around `VecDeque`:
/// - `push` is O(1) and evicts from the front when full, handing the evicted item back.
/// - Memory usage is bounded by `capacity`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircularBuffer<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> CircularBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append `item`, returning whatever had to be evicted to make room.
    pub fn push(&mut self, item: T) -> Option<T> {
        // Capacity==0 means "store nothing". Without this guard, VecDeque could grow unbounded.
        if self.capacity == 0 {
            return Some(item);
        }

        let evicted = if self.buffer.len() == self.capacity {
            self.buffer.pop_front()
        } else {
            None
        };
        self.buffer.push_back(item);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.buffer.pop_front()
    }

    pub fn front(&self) -> Option<&T> {
        self.buffer.front()
    }

    pub fn back(&self) -> Option<&T> {
        self.buffer.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut buf = CircularBuffer::new(3);
        assert_eq!(buf.push(1), None);
        assert_eq!(buf.push(2), None);
        assert_eq!(buf.push(3), None);
        assert!(buf.is_full());
        assert_eq!(buf.push(4), Some(1));
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(buf.front(), Some(&2));
        assert_eq!(buf.back(), Some(&4));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut buf = CircularBuffer::new(0);
        assert_eq!(buf.push("a"), Some("a"));
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn pops_in_fifo_order() {
        let mut buf = CircularBuffer::new(2);
        buf.push('x');
        buf.push('y');
        assert_eq!(buf.pop_front(), Some('x'));
        assert_eq!(buf.pop_front(), Some('y'));
        assert_eq!(buf.pop_front(), None);
        buf.push('z');
        buf.clear();
        assert_eq!(buf.len(), 0);
    }
}
