//! Cache notifications.
//!
//! Emitted by `ListCache` on its `EventBus`. Indices are inclusive, like the
//! list-model protocol consumers forward them to. Structural changes come as
//! begin/end pairs bracketing the mutation.

use serde::Serialize;

/// Process-unique cache identifier, carried by every event.
pub type CacheId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum CacheChange {
    /// Query size (limit applied) and total size changed.
    SizeChanged { query_count: usize, maximum_count: usize },
    /// Values changed in place, no index shift.
    DataChanged { first: usize, last: usize },
    BeginInsert { first: usize, last: usize },
    EndInsert,
    BeginRemove { first: usize, last: usize },
    EndRemove,
    /// `[first, last]` is reinserted before the item currently at `dest`
    /// (pre-move coordinates).
    BeginMove { first: usize, last: usize, dest: usize },
    EndMove,
    /// Loader failure; the cache keeps serving what it had.
    LoadFailed { message: String },
}

impl CacheChange {
    /// Whether this notification opens a structural transaction.
    pub fn is_begin(&self) -> bool {
        matches!(
            self,
            CacheChange::BeginInsert { .. } | CacheChange::BeginRemove { .. } | CacheChange::BeginMove { .. }
        )
    }

    pub fn is_end(&self) -> bool {
        matches!(self, CacheChange::EndInsert | CacheChange::EndRemove | CacheChange::EndMove)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEvent {
    pub cache_id: CacheId,
    #[serde(flatten)]
    pub change: CacheChange,
}

impl CacheEvent {
    pub fn new(cache_id: CacheId, change: CacheChange) -> Self {
        Self { cache_id, change }
    }
}

/// Replays structural notifications against a plain `Vec`.
///
/// Mirrors what a list view does with the begin/end protocol: on each begin
/// the change is applied using items looked up through `fetch`. Over a
/// partially loaded window use `ListMirror<Option<T>>`, with `None` for rows
/// that are counted but not loaded.
/// Used to check that a notification stream reproduces the reloaded list.
#[derive(Debug, Clone, Default)]
pub struct ListMirror<T> {
    pub rows: Vec<T>,
}

impl<T: Clone> ListMirror<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self { rows }
    }

    /// Apply one notification. `fetch(i)` returns the item the cache now
    /// serves at `i`; it is only called for inserted and changed rows.
    ///
    /// Inserted rows are filled on the end notification, when the cache
    /// has committed the change.
    pub fn apply(&mut self, change: &CacheChange, pending: &mut Option<(usize, usize)>, mut fetch: impl FnMut(usize) -> Option<T>) {
        match change {
            CacheChange::BeginInsert { first, last } => {
                *pending = Some((*first, *last));
            }
            CacheChange::EndInsert => {
                if let Some((first, last)) = pending.take() {
                    let rows: Vec<T> = (first..=last).filter_map(&mut fetch).collect();
                    let at = first.min(self.rows.len());
                    self.rows.splice(at..at, rows);
                }
            }
            CacheChange::BeginRemove { first, last } => {
                let end = (last + 1).min(self.rows.len());
                let first = (*first).min(end);
                self.rows.drain(first..end);
            }
            CacheChange::BeginMove { first, last, dest } => {
                let (first, last, dest) = (*first, *last, *dest);
                if last < self.rows.len() && dest <= self.rows.len() {
                    let run: Vec<T> = self.rows.drain(first..=last).collect();
                    let at = if dest > last { dest - run.len() } else { dest };
                    self.rows.splice(at..at, run);
                }
            }
            CacheChange::DataChanged { first, last } => {
                let end = (last + 1).min(self.rows.len());
                for i in *first..end {
                    if let Some(item) = fetch(i) {
                        self.rows[i] = item;
                    }
                }
            }
            CacheChange::EndRemove
            | CacheChange::EndMove
            | CacheChange::SizeChanged { .. }
            | CacheChange::LoadFailed { .. } => {}
        }
    }
}
