//! In-memory list loader with optional filter and sort.
//!
//! Backs a cache with a shared `Vec<T>` snapshot. The `SourceHandle` lets
//! other actors mutate the collection underneath the cache (the way a
//! database changes behind a query); the cache only notices on `invalidate()`.
//!
//! Filter and sort are applied per request, so `count()` and `load()` always
//! describe the same query over the current contents.

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::trace;

use super::error::LoadError;
use super::traits::ListLoader;

type FilterFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type SortFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Cloneable handle on the backing collection.
#[derive(Debug)]
pub struct SourceHandle<T> {
    items: Arc<RwLock<Vec<T>>>,
}

impl<T> Clone for SourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> SourceHandle<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<T>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<T>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn push(&self, item: T) {
        self.write().push(item);
    }

    /// Insert at `pos`, clamped to the current length.
    pub fn insert(&self, pos: usize, item: T) {
        let mut items = self.write();
        let pos = pos.min(items.len());
        items.insert(pos, item);
    }

    /// Remove `count` items starting at `start` (clamped). Returns removed items.
    pub fn remove_range(&self, start: usize, count: usize) -> Vec<T> {
        let mut items = self.write();
        let start = start.min(items.len());
        let end = start.saturating_add(count).min(items.len());
        items.drain(start..end).collect()
    }

    /// Remove every item matching `pred`. Returns how many were removed.
    pub fn remove_where(&self, pred: impl Fn(&T) -> bool) -> usize {
        let mut items = self.write();
        let before = items.len();
        items.retain(|item| !pred(item));
        before - items.len()
    }

    pub fn retain(&self, pred: impl Fn(&T) -> bool) {
        self.write().retain(|item| pred(item));
    }

    /// Apply `update` to every item matching `pred`. Returns how many changed.
    pub fn update_where(&self, pred: impl Fn(&T) -> bool, mut update: impl FnMut(&mut T)) -> usize {
        let mut items = self.write();
        let mut changed = 0;
        for item in items.iter_mut().filter(|item| pred(item)) {
            update(item);
            changed += 1;
        }
        changed
    }

    /// Move `count` items from `from` so they start at `to` once reinserted.
    ///
    /// `to` is an index in the list after the run was taken out.
    pub fn move_range(&self, from: usize, count: usize, to: usize) -> bool {
        let mut items = self.write();
        if count == 0 || from + count > items.len() || to + count > items.len() {
            return false;
        }
        let run: Vec<T> = items.drain(from..from + count).collect();
        let tail = items.split_off(to);
        items.extend(run);
        items.extend(tail);
        true
    }
}

impl<T: Clone> SourceHandle<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.read().clone()
    }

    pub fn replace_all(&self, items: Vec<T>) {
        *self.write() = items;
    }
}

/// Loader over an in-memory collection.
pub struct MemoryLoader<T> {
    source: SourceHandle<T>,
    filter: Option<FilterFn<T>>,
    sort: Option<SortFn<T>>,
    latency: Option<Duration>,
}

impl<T> std::fmt::Debug for MemoryLoader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLoader")
            .field("filtered", &self.filter.is_some())
            .field("sorted", &self.sort.is_some())
            .field("latency", &self.latency)
            .finish()
    }
}

impl<T: Clone + Send + Sync> MemoryLoader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self::from_handle(SourceHandle::new(items))
    }

    /// Share an existing collection (several caches over one source).
    pub fn from_handle(source: SourceHandle<T>) -> Self {
        Self {
            source,
            filter: None,
            sort: None,
            latency: None,
        }
    }

    /// Only items matching `pred` are part of the query.
    pub fn with_filter(mut self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(pred));
        self
    }

    /// Order the query result with `cmp` (stable).
    pub fn with_sort(mut self, cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.sort = Some(Arc::new(cmp));
        self
    }

    /// Sleep before answering, to simulate a slow store.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn handle(&self) -> SourceHandle<T> {
        self.source.clone()
    }

    fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }

    /// Run the query against the current contents.
    fn query(&self) -> Vec<T> {
        let items = self.source.read();
        let mut result: Vec<T> = match &self.filter {
            Some(filter) => items.iter().filter(|item| filter(item)).cloned().collect(),
            None => items.clone(),
        };
        drop(items);

        if let Some(sort) = &self.sort {
            result.sort_by(|a, b| sort(a, b));
        }
        result
    }
}

impl<T: Clone + Send + Sync> ListLoader<T> for MemoryLoader<T> {
    fn count(&self) -> Result<usize, LoadError> {
        self.simulate_latency();
        let items = self.source.read();
        let count = match &self.filter {
            Some(filter) => items.iter().filter(|item| filter(item)).count(),
            None => items.len(),
        };
        trace!("MemoryLoader: count={}", count);
        Ok(count)
    }

    fn load(&self, offset: usize, count: usize) -> Result<Vec<T>, LoadError> {
        self.simulate_latency();
        let result = self.query();
        let start = offset.min(result.len());
        let end = start.saturating_add(count).min(result.len());
        trace!("MemoryLoader: load [{}, {}) of {}", start, end, result.len());
        Ok(result[start..end].to_vec())
    }

    fn count_and_load(&self, offset: usize, count: usize) -> Result<(usize, Vec<T>), LoadError> {
        // One query so count and items come from the same contents
        self.simulate_latency();
        let result = self.query();
        let total = result.len();
        let start = offset.min(total);
        let end = start.saturating_add(count).min(total);
        trace!("MemoryLoader: count_and_load total={} [{}, {})", total, start, end);
        Ok((total, result[start..end].to_vec()))
    }
}
