//! Ring buffer backing the dispatcher's input queue.
//!
//! Not synchronized; the dispatcher wraps it in a mutex.

use std::fmt;

/// FIFO ring buffer with an optional capacity bound.
///
/// Slots are indexed `(head + i) % slots.len()`. A bounded queue never
/// grows and rejects pushes when full. An unbounded queue doubles its slot
/// array instead.
pub struct RingQueue<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
    bounded: bool,
}

const INITIAL_UNBOUNDED_SLOTS: usize = 8;

impl<T> RingQueue<T> {
    /// A queue holding at most `capacity` items, or unbounded if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        let bounded = capacity != 0;
        let slot_count = if bounded {
            capacity
        } else {
            INITIAL_UNBOUNDED_SLOTS
        };
        Self {
            slots: std::iter::repeat_with(|| None).take(slot_count).collect(),
            head: 0,
            len: 0,
            bounded,
        }
    }

    /// The bound, or `None` if unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.bounded.then_some(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.bounded && self.len == self.slots.len()
    }

    #[inline]
    fn slot_index(&self, i: usize) -> usize {
        (self.head + i) % self.slots.len()
    }

    /// Append `item`, or hand it back if the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.len == self.slots.len() {
            if self.bounded {
                return Err(item);
            }
            self.grow();
        }
        let tail = self.slot_index(self.len);
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        debug_assert!(item.is_some());
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    pub fn front(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Remove every item, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        while let Some(item) = self.pop() {
            items.push(item);
        }
        self.head = 0;
        items
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.len).filter_map(move |i| self.slots[self.slot_index(i)].as_ref())
    }

    fn grow(&mut self) {
        let new_len = self.slots.len() * 2;
        let mut slots: Vec<Option<T>> = Vec::with_capacity(new_len);
        for i in 0..self.len {
            let index = self.slot_index(i);
            slots.push(self.slots[index].take());
        }
        slots.resize_with(new_len, || None);
        self.slots = slots;
        self.head = 0;
    }
}

impl<T: fmt::Debug> fmt::Debug for RingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("items", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = RingQueue::new(4);
        for i in 0..4 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
        queue.push(4).unwrap();
        queue.push(5).unwrap();
        // Tail has wrapped past the end of the slot array.
        assert_eq!(queue.drain(), vec![2, 3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bounded_rejects_when_full() {
        let mut queue = RingQueue::new(2);
        assert_eq!(queue.capacity(), Some(2));
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        assert!(queue.is_full());
        assert_eq!(queue.push("c"), Err("c"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front(), Some(&"a"));
    }

    #[test]
    fn test_unbounded_grows_preserving_order() {
        let mut queue = RingQueue::new(0);
        assert_eq!(queue.capacity(), None);
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        for _ in 0..3 {
            queue.pop();
        }
        for i in 5..30 {
            queue.push(i).unwrap();
        }
        assert!(!queue.is_full());
        assert_eq!(queue.len(), 27);
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), (3..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_pop_empty() {
        let mut queue: RingQueue<u8> = RingQueue::new(3);
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.front(), None);
    }
}
