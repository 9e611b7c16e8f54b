//! Fixed-capacity ring buffer for ID capture frames.

/// Default number of frames kept during an ID capture session.
pub const DEFAULT_CAPACITY: usize = 50;

/// Keeps the most recent `capacity` items.
///
/// Slots fill from 0 upwards; once full, the next push overwrites slot 0,
/// then slot 1, and so on. `snapshot` returns the physical slot order, so
/// after a wrap the oldest surviving item is not necessarily first.
#[derive(Debug, Clone)]
pub struct FrameRing<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Next slot to overwrite once the buffer is full.
    next: usize,
    total_pushed: usize,
}

impl<T> FrameRing<T> {
    /// Create a ring holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            total_pushed: 0,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    pub fn push(&mut self, item: T) {
        self.total_pushed += 1;
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return;
        }
        if self.next >= self.capacity {
            self.next = 0;
        }
        self.slots[self.next] = item;
        self.next += 1;
    }

    /// Items in physical slot order.
    pub fn snapshot(&self) -> &[T] {
        &self.slots
    }

    pub fn into_vec(self) -> Vec<T> {
        self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total pushes since creation, including overwritten ones.
    pub fn total_pushed(&self) -> usize {
        self.total_pushed
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.next = 0;
    }
}

impl<T> Default for FrameRing<T> {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_in_order() {
        let mut ring = FrameRing::new(5);
        for i in 1..=3 {
            ring.push(i);
        }
        assert_eq!(ring.snapshot(), &[1, 2, 3]);
        assert!(!ring.is_full());
    }

    #[test]
    fn test_wraparound_51_into_50() {
        let mut ring = FrameRing::new(50);
        for frame in 1..=51 {
            ring.push(frame);
        }

        let slots = ring.snapshot();
        assert_eq!(slots.len(), 50);
        assert_eq!(slots[0], 51);
        for (slot, &frame) in slots.iter().enumerate().skip(1) {
            assert_eq!(frame, slot + 1);
        }
        assert_eq!(ring.total_pushed(), 51);
    }

    #[test]
    fn test_wraps_twice() {
        let mut ring = FrameRing::new(3);
        for i in 1..=7 {
            ring.push(i);
        }
        // 1 2 3 -> 4 5 6 -> 7 5 6
        assert_eq!(ring.snapshot(), &[7, 5, 6]);
    }

    #[test]
    fn test_clear_restarts_from_slot_zero() {
        let mut ring = FrameRing::new(2);
        for i in 0..5 {
            ring.push(i);
        }
        ring.clear();
        assert!(ring.is_empty());
        ring.push(9);
        assert_eq!(ring.snapshot(), &[9]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut ring = FrameRing::new(0);
        ring.push('a');
        ring.push('b');
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.snapshot(), &['b']);
    }
}
