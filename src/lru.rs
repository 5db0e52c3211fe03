use std::collections::VecDeque;

use crate::error::{QuadError, QuadResult};

/// Size-bounded least-recently-used cache.
///
/// The capacity stays small (open file handles per tile), so recency is
/// tracked with a plain deque: front is the most recently used entry.
/// Lookups of a missing key are a domain error rather than an `Option`;
/// callers are expected to check `exists` first.
pub struct LruCache<K, V> {
    capacity: usize,
    entries: VecDeque<(K, V)>,
}

impl<K: Eq, V> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Inserts or replaces an entry, returning the evicted one when the
    /// insertion overflows the capacity.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(position) = self.position(&key) {
            self.entries.remove(position);
        }
        self.entries.push_front((key, value));
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Borrows an entry and promotes it to most recently used.
    pub fn get(&mut self, key: &K) -> QuadResult<&V> {
        self.promote(key)?;
        match self.entries.front() {
            Some((_, value)) => Ok(value),
            None => Err(QuadError::CacheMiss),
        }
    }

    /// Borrows an entry without touching recency.
    pub fn peek(&self, key: &K) -> QuadResult<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
            .ok_or(QuadError::CacheMiss)
    }

    /// Marks an entry as most recently used.
    pub fn promote(&mut self, key: &K) -> QuadResult<()> {
        let position = self.position(key).ok_or(QuadError::CacheMiss)?;
        if let Some(entry) = self.entries.remove(position) {
            self.entries.push_front(entry);
        }
        Ok(())
    }

    /// Removes an entry, returning its value when present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let position = self.position(key)?;
        self.entries.remove(position).map(|(_, value)| value)
    }

    #[must_use]
    pub fn exists(&self, key: &K) -> bool {
        self.position(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }
}
