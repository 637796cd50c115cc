//! Growable per-primitive instance batches.

/// Append-only list of instance records of one primitive kind.
///
/// Capacity only ever doubles and survives [`CommandBatch::clear`], so a
/// steady frame stops allocating after the first few flushes.
#[derive(Debug, Clone)]
pub struct CommandBatch<T> {
    instances: Vec<T>,
    capacity: usize,
}

impl<T: Copy + Default> CommandBatch<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            instances: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a default record and return it for filling in.
    pub fn allocate(&mut self) -> &mut T {
        if self.instances.len() == self.capacity {
            self.grow();
        }
        self.instances.push(T::default());
        let last = self.instances.len() - 1;
        &mut self.instances[last]
    }

    pub fn push(&mut self, instance: T) {
        *self.allocate() = instance;
    }

    fn grow(&mut self) {
        let new_capacity = (self.capacity * 2).max(1);
        self.instances.reserve_exact(new_capacity - self.instances.len());
        self.capacity = new_capacity;
    }

    /// Drop every record, keeping the allocation.
    pub fn clear(&mut self) {
        self.instances.clear();
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[T] {
        &self.instances
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.instances.iter()
    }
}

impl<T: Copy + Default> Default for CommandBatch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> IntoIterator for &'a CommandBatch<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_doubles() {
        let mut batch = CommandBatch::<u32>::new();
        assert_eq!(batch.capacity(), 0);
        batch.push(1);
        assert_eq!(batch.capacity(), 1);
        batch.push(2);
        assert_eq!(batch.capacity(), 2);
        batch.push(3);
        assert_eq!(batch.capacity(), 4);
        for i in 0..5 {
            batch.push(i);
        }
        assert_eq!(batch.len(), 8);
        assert_eq!(batch.capacity(), 8);
        batch.push(9);
        assert_eq!(batch.capacity(), 16);
        assert_eq!(batch.as_slice(), &[1, 2, 3, 0, 1, 2, 3, 4, 9]);
    }

    #[test]
    fn test_records_survive_growth_in_order() {
        let mut batch = CommandBatch::<u32>::with_capacity(2);
        for i in 0..100 {
            batch.push(i * 3);
        }
        assert_eq!(batch.capacity(), 128);
        assert!(batch.iter().copied().eq((0..100).map(|i| i * 3)));
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut batch = CommandBatch::<u32>::with_capacity(3);
        for i in 0..10 {
            batch.push(i);
        }
        let capacity = batch.capacity();
        assert_eq!(capacity, 12);
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
        assert_eq!(batch.capacity(), capacity);

        // Refilling up to the old capacity does not grow again
        for i in 0..12 {
            batch.push(i + 100);
        }
        assert_eq!(batch.capacity(), capacity);
        assert_eq!(batch.as_slice()[0], 100);
        assert_eq!(batch.as_slice()[11], 111);
    }

    #[test]
    fn test_allocate_returns_default_slot() {
        let mut batch = CommandBatch::<(u8, u8)>::new();
        let slot = batch.allocate();
        assert_eq!(*slot, (0, 0));
        slot.1 = 7;
        assert_eq!(batch.as_slice(), &[(0, 7)]);
    }
}
