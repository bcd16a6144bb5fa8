//! Materialized snapshot of a list query.
//!
//! Holds the loaded prefix of the query result plus its count metadata:
//! - `maximum_count`: items matching the query, no limit applied
//! - `query_count`: `min(limit, maximum_count)`, the size exposed to consumers
//! - `loaded_count`: items materialized locally (`items.len()`)
//!
//! Invariant: `loaded_count <= query_count <= maximum_count`.

use super::range::Range;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheData<T> {
    items: Vec<T>,
    query_count: usize,
    maximum_count: usize,
}

impl<T> CacheData<T> {
    /// Build a snapshot from a completed load.
    ///
    /// Items past `query_count` are dropped and `query_count` is clamped to
    /// `maximum_count`, so the invariant holds whatever the loader returned.
    pub fn new(mut items: Vec<T>, query_count: usize, maximum_count: usize) -> Self {
        let query_count = query_count.min(maximum_count);
        items.truncate(query_count);
        Self {
            items,
            query_count,
            maximum_count,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, 0)
    }

    pub fn loaded_count(&self) -> usize {
        self.items.len()
    }

    pub fn query_count(&self) -> usize {
        self.query_count
    }

    pub fn maximum_count(&self) -> usize {
        self.maximum_count
    }

    /// Length of the prefix that can be diffed: loaded and inside the query window.
    pub fn diff_len(&self) -> usize {
        self.items.len().min(self.query_count)
    }

    /// Whether every item of the query window is materialized.
    pub fn is_complete(&self) -> bool {
        self.items.len() >= self.query_count
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.items.iter().position(|item| pred(item))
    }

    /// Append a fetched chunk, dropping whatever overflows the query window.
    ///
    /// Returns the range of indices that became loaded.
    pub fn append(&mut self, mut chunk: Vec<T>) -> Range {
        let room = self.query_count.saturating_sub(self.items.len());
        chunk.truncate(room);
        let range = Range::new(self.items.len(), chunk.len());
        self.items.extend(chunk);
        range
    }

    /// Insert a local item at `pos` (`pos <= loaded_count`), growing every counter.
    pub fn insert(&mut self, pos: usize, item: T) -> bool {
        if pos > self.items.len() {
            return false;
        }
        self.items.insert(pos, item);
        self.query_count += 1;
        self.maximum_count += 1;
        true
    }

    /// Remove the loaded item at `pos`, shrinking every counter.
    pub fn remove(&mut self, pos: usize) -> Option<T> {
        if pos >= self.items.len() {
            return None;
        }
        let item = self.items.remove(pos);
        self.query_count -= 1;
        self.maximum_count = self.maximum_count.saturating_sub(1);
        Some(item)
    }

    /// Replace the loaded item at `pos`, returning the previous value.
    pub fn replace(&mut self, pos: usize, item: T) -> Option<T> {
        self.items
            .get_mut(pos)
            .map(|slot| std::mem::replace(slot, item))
    }

    /// Whether `move_range(first, last, to)` would change anything.
    pub fn is_valid_move(&self, first: usize, last: usize, to: usize) -> bool {
        let len = self.items.len();
        first <= last && last < len && to <= len && !(first..=last + 1).contains(&to)
    }

    /// Reorder so that `[first, last]` ends up before the item currently at `to`.
    ///
    /// `to` is expressed in pre-move indices and must lie outside `[first, last + 1]`.
    /// All indices must address loaded items (`to` may equal `loaded_count`).
    pub fn move_range(&mut self, first: usize, last: usize, to: usize) -> bool {
        if !self.is_valid_move(first, last, to) {
            return false;
        }
        let len = self.items.len();

        // Rebuild through a temporary buffer in the final order
        let mut old: Vec<Option<T>> = std::mem::take(&mut self.items).into_iter().map(Some).collect();
        let order: Vec<usize> = if to < first {
            (0..to)
                .chain(first..=last)
                .chain(to..first)
                .chain(last + 1..len)
                .collect()
        } else {
            (0..first)
                .chain(last + 1..to)
                .chain(first..=last)
                .chain(to..len)
                .collect()
        };
        self.items = order.into_iter().filter_map(|i| old[i].take()).collect();
        true
    }

    /// Delete `range` from the query window.
    ///
    /// Only the part overlapping the loaded prefix is erased from `items`;
    /// the rest just shrinks the counters. Returns how many loaded items went away.
    pub fn delete_range(&mut self, range: Range) -> usize {
        let window = Range::new(0, self.query_count);
        let range = range.overlap(&window);
        if range.is_empty() {
            return 0;
        }

        let loaded = Range::new(0, self.items.len()).overlap(&range);
        if !loaded.is_empty() {
            self.items.drain(std::ops::Range::from(loaded));
        }

        self.query_count -= range.count;
        self.maximum_count = self.maximum_count.saturating_sub(range.count);
        loaded.count
    }
}
