//! Fixed-capacity circular buffer.
//!
//! Backs a topic's message history. The storage is allocated once and
//! reused, including across [`Ring::clean`], so a recycled topic keeps its
//! buffer. The ring does no locking of its own.

/// A ring buffer holding at most `capacity` items, oldest first.
#[derive(Debug, Clone)]
pub struct Ring<T> {
    items: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    /// Create an empty ring. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut items = Vec::with_capacity(capacity);
        items.resize_with(capacity, || None);
        Self {
            items,
            head: 0,
            len: 0,
        }
    }

    /// Number of stored items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Maximum number of stored items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// The `n`-th item counting from the oldest.
    #[must_use]
    pub fn item(&self, n: usize) -> Option<&T> {
        if n >= self.len {
            return None;
        }
        self.items[self.slot(n)].as_ref()
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.item(0)
    }

    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|n| self.item(n))
    }

    /// Add an item at the tail, evicting the oldest item when full.
    ///
    /// Returns the evicted item, if any.
    pub fn append(&mut self, value: T) -> Option<T> {
        if self.is_full() {
            let evicted = self.items[self.head].replace(value);
            self.head = self.wrap(self.head + 1);
            evicted
        } else {
            let slot = self.slot(self.len);
            self.items[slot] = Some(value);
            self.len += 1;
            None
        }
    }

    /// Add an item at the head. When full, the newest item is overwritten.
    pub fn prepend(&mut self, value: T) {
        self.head = self.wrap(self.head + self.capacity() - 1);
        self.items[self.head] = Some(value);
        if self.len < self.capacity() {
            self.len += 1;
        }
    }

    /// Remove and return the oldest item.
    pub fn remove_first(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.items[self.head].take();
        self.head = self.wrap(self.head + 1);
        self.len -= 1;
        value
    }

    /// Remove and return the newest item.
    pub fn remove_last(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let slot = self.slot(self.len - 1);
        self.len -= 1;
        self.items[slot].take()
    }

    /// Visit items oldest to newest until `visit` returns `false`.
    pub fn each<F>(&self, mut visit: F)
    where
        F: FnMut(usize, &T) -> bool,
    {
        for (n, value) in self.iter().enumerate() {
            if !visit(n, value) {
                break;
            }
        }
    }

    /// Iterate items oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |n| self.item(n))
    }

    /// Drop every item, keeping the allocated storage.
    pub fn clean(&mut self) {
        self.items.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }

    fn slot(&self, n: usize) -> usize {
        self.wrap(self.head + n)
    }

    fn wrap(&self, index: usize) -> usize {
        index % self.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(ring: &Ring<u32>) -> Vec<u32> {
        ring.iter().copied().collect()
    }

    #[test]
    fn test_append_past_capacity_keeps_last_items() {
        let mut ring = Ring::new(3);
        for n in 1..=7 {
            ring.append(n);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(contents(&ring), vec![5, 6, 7]);
        assert_eq!(ring.first(), Some(&5));
        assert_eq!(ring.last(), Some(&7));
    }

    #[test]
    fn test_append_returns_evicted() {
        let mut ring = Ring::new(2);
        assert_eq!(ring.append("a"), None);
        assert_eq!(ring.append("b"), None);
        assert_eq!(ring.append("c"), Some("a"));
    }

    #[test]
    fn test_out_of_range_access() {
        let mut ring = Ring::new(4);
        assert!(ring.first().is_none());
        assert!(ring.last().is_none());
        ring.append(1);
        assert_eq!(ring.item(0), Some(&1));
        assert!(ring.item(1).is_none());
        assert!(ring.item(4).is_none());
    }

    #[test]
    fn test_remove_on_empty_is_noop() {
        let mut ring: Ring<u32> = Ring::new(2);
        assert_eq!(ring.remove_first(), None);
        assert_eq!(ring.remove_last(), None);
        assert!(ring.is_empty());
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn test_remove_first_and_last_after_wrap() {
        let mut ring = Ring::new(3);
        for n in 1..=5 {
            ring.append(n);
        }
        assert_eq!(ring.remove_first(), Some(3));
        assert_eq!(ring.remove_last(), Some(5));
        assert_eq!(contents(&ring), vec![4]);
        ring.append(6);
        ring.append(7);
        assert_eq!(contents(&ring), vec![4, 6, 7]);
    }

    #[test]
    fn test_prepend() {
        let mut ring = Ring::new(3);
        ring.append(2);
        ring.prepend(1);
        assert_eq!(contents(&ring), vec![1, 2]);

        ring.append(3);
        ring.prepend(0);
        assert_eq!(contents(&ring), vec![0, 1, 2]);
    }

    #[test]
    fn test_each_stops_early() {
        let mut ring = Ring::new(5);
        for n in 0..5 {
            ring.append(n);
        }
        let mut seen = Vec::new();
        ring.each(|i, v| {
            seen.push((i, *v));
            *v < 2
        });
        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_clean_keeps_capacity() {
        let mut ring = Ring::new(3);
        for n in 0..4 {
            ring.append(n);
        }
        ring.clean();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 3);
        ring.append(9);
        assert_eq!(contents(&ring), vec![9]);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut ring = Ring::new(0);
        ring.append(1);
        ring.append(2);
        assert_eq!(contents(&ring), vec![2]);
    }
}
