//! Incremental list cache.
//!
//! `ListCache<T>` keeps a partially loaded, chunked view over a backing
//! collection reached through a `ListLoader`. Loader calls run on a
//! `WorkerPool`; their results come back over a channel and are applied when
//! the owning thread calls `process_events()`.
//!
//! Lifecycle:
//! - `init_count()` (or `invalidate()`) issues the first count + load
//! - `refer(n)` declares interest in the first `n` rows and fetches more, chunk aligned
//! - `invalidate()` reloads; the previous snapshot keeps being served until the
//!   new one arrives, then the two are diffed and only the differences are
//!   announced (insert/remove/move runs)
//!
//! While a reload is reconciled, rows before the frontier come from the new
//! snapshot and rows after it from the old one, translated through the
//! redirection table so that moves already announced are honored.

use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::cache_events::{CacheChange, CacheEvent, CacheId};
use super::diff::{self, Edit, EditKind};
use super::event_bus::EventBus;
use super::redirect::{RedirectTable, Redirection};
use super::tasks::{Completion, TaskId, TaskSlot, spawn_guarded};
use crate::config::CacheSettings;
use crate::entities::{CacheData, ListLoader, LoadError, Range, WorkerPool};

/// `query_count()` before the first successful load.
pub const COUNT_UNINITIALIZED: usize = usize::MAX;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

type IdentityFn<T> = Box<dyn Fn(&T, &T) -> bool + Send>;

/// Receives every notification as it is emitted, with the cache in the
/// state a list view would observe at that point.
type Observer<'a, T> = &'a mut dyn FnMut(&ListCache<T>, &CacheEvent);

fn quiet<T>(_: &ListCache<T>, _: &CacheEvent) {}

/// Run a loader call, turning a panic into `LoadError::Interrupted`.
fn guarded<R>(call: impl FnOnce() -> Result<R, LoadError>) -> Result<R, LoadError> {
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| Err(LoadError::Interrupted))
}

/// Boundary between reconciled rows and rows still served from the old snapshot.
#[derive(Debug, Clone, Copy, Default)]
struct Frontier {
    /// First row not yet reconciled (new snapshot coordinates)
    index: usize,
    /// Old snapshot item served at `index`, before redirection
    x: usize,
    loaded: usize,
    total: usize,
    maximum: usize,
}

impl Frontier {
    fn serving<T>(data: &CacheData<T>) -> Self {
        Self {
            index: 0,
            x: 0,
            loaded: data.loaded_count(),
            total: data.query_count(),
            maximum: data.maximum_count(),
        }
    }
}

pub struct ListCache<T> {
    id: CacheId,
    loader: Arc<dyn ListLoader<T>>,
    pool: Arc<dyn WorkerPool>,
    identity: IdentityFn<T>,
    settings: CacheSettings,
    bus: EventBus,

    cached: Option<CacheData<T>>,
    /// Previous snapshot, kept while a reload is pending or being reconciled
    old: Option<CacheData<T>>,
    frontier: Frontier,
    redirects: RedirectTable,

    max_referred: usize,
    initialized: bool,
    need_reload: bool,
    last_error: Option<LoadError>,

    count_task: TaskSlot,
    append_task: TaskSlot,
    tx: Sender<Completion<T>>,
    rx: Receiver<Completion<T>>,
}

impl<T> std::fmt::Debug for ListCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListCache")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("loaded", &self.cached.as_ref().map(|d| d.loaded_count()))
            .field("reloading", &self.old.is_some())
            .field("max_referred", &self.max_referred)
            .field("count_task", &self.count_task.current())
            .field("append_task", &self.append_task.current())
            .finish()
    }
}

impl<T: Send + 'static> ListCache<T> {
    /// Create an idle cache. Nothing is loaded until `init_count()`.
    ///
    /// `identity` decides whether two items are the same record; it drives
    /// the reload diff and `update_item`, never value comparison.
    pub fn new<L, P, F>(loader: L, pool: P, identity: F, settings: CacheSettings) -> Self
    where
        L: ListLoader<T> + 'static,
        P: WorkerPool + 'static,
        F: Fn(&T, &T) -> bool + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed);
        let settings = settings.normalized();
        debug!("ListCache {} created: {:?}", id, settings);

        Self {
            id,
            loader: Arc::new(loader),
            pool: Arc::new(pool),
            identity: Box::new(identity),
            settings,
            bus: EventBus::new(),
            cached: None,
            old: None,
            frontier: Frontier::default(),
            redirects: RedirectTable::new(),
            max_referred: 0,
            initialized: false,
            need_reload: false,
            last_error: None,
            count_task: TaskSlot::new(),
            append_task: TaskSlot::new(),
            tx,
            rx,
        }
    }

    /// Publish notifications on `bus` instead of a private one.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn id(&self) -> CacheId {
        self.id
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn last_error(&self) -> Option<&LoadError> {
        self.last_error.as_ref()
    }

    /// A loader task is outstanding.
    pub fn loading(&self) -> bool {
        self.count_task.is_busy() || self.append_task.is_busy()
    }

    /// Data is loaded and no reload is pending.
    pub fn is_ready(&self) -> bool {
        self.cached.is_some() && self.old.is_none()
    }

    pub fn loaded_count(&self) -> usize {
        match (&self.old, &self.cached) {
            (Some(_), _) => self.frontier.loaded,
            (None, Some(data)) => data.loaded_count(),
            (None, None) => 0,
        }
    }

    /// Rows exposed to consumers, `COUNT_UNINITIALIZED` before the first load.
    pub fn query_count(&self) -> usize {
        match (&self.old, &self.cached) {
            (Some(_), _) => self.frontier.total,
            (None, Some(data)) => data.query_count(),
            (None, None) => COUNT_UNINITIALIZED,
        }
    }

    pub fn maximum_count(&self) -> usize {
        match (&self.old, &self.cached) {
            (Some(_), _) => self.frontier.maximum,
            (None, Some(data)) => data.maximum_count(),
            (None, None) => 0,
        }
    }

    /// Item served at `index`, or `None` if not loaded (yet).
    pub fn get(&self, index: usize) -> Option<&T> {
        let Some(old) = &self.old else {
            return self.cached.as_ref()?.get(index);
        };
        if index >= self.frontier.loaded {
            return None;
        }
        if index < self.frontier.index {
            return self.cached.as_ref()?.get(index);
        }
        let physical = self
            .redirects
            .fixup_index_for_move(self.frontier.x + (index - self.frontier.index));
        old.get(physical)
    }

    /// First loaded item matching `pred`, with its index.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<(usize, &T)> {
        (0..self.loaded_count())
            .filter_map(|i| self.get(i).map(|item| (i, item)))
            .find(|(_, item)| pred(item))
    }

    /// Issue the first count + load. Returns false if already initialized.
    pub fn init_count(&mut self) -> bool {
        if self.initialized {
            warn!("ListCache {}: init_count called on an initialized cache", self.id);
            return false;
        }
        self.initialized = true;
        self.async_count_and_load();
        true
    }

    /// Reload from the loader and reconcile with what is currently served.
    pub fn invalidate(&mut self) {
        match self.cached.take() {
            Some(data) if self.old.is_none() => {
                self.frontier = Frontier::serving(&data);
                self.old = Some(data);
            }
            Some(_) => debug!("ListCache {}: dropping unreconciled snapshot", self.id),
            None => {}
        }
        self.redirects.clear();
        if let Some(task) = self.append_task.cancel() {
            trace!("ListCache {}: append task {} cancelled", self.id, task);
        }
        self.initialized = true;
        self.async_count_and_load();
    }

    /// Declare interest in the first `count` rows.
    pub fn refer(&mut self, count: usize) {
        if count > self.max_referred {
            self.max_referred = count;
        }
        if !self.initialized {
            return;
        }
        if self.cached.is_some() {
            self.async_fetch_more();
        } else if self.old.is_none() && !self.count_task.is_busy() {
            // Nothing served and nothing in flight: last load failed
            debug!("ListCache {}: retrying load on refer", self.id);
            self.async_count_and_load();
        }
    }

    /// Insert a local item at `pos` (at most `loaded_count()`).
    pub fn insert_item(&mut self, item: T, pos: usize) -> bool {
        if !self.mutable(|data| pos <= data.loaded_count()) {
            return false;
        }
        self.notify(&mut quiet::<T>, CacheChange::BeginInsert { first: pos, last: pos });
        if let Some(data) = self.cached.as_mut() {
            data.insert(pos, item);
        }
        self.notify(&mut quiet::<T>, CacheChange::EndInsert);
        self.notify_size(&mut quiet::<T>);
        true
    }

    /// Remove the first loaded item matching `pred`. Returns its index.
    pub fn delete_item(&mut self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        if self.old.is_some() {
            return None;
        }
        let pos = self.cached.as_ref()?.position(pred)?;
        self.notify(&mut quiet::<T>, CacheChange::BeginRemove { first: pos, last: pos });
        if let Some(data) = self.cached.as_mut() {
            data.remove(pos);
        }
        self.notify(&mut quiet::<T>, CacheChange::EndRemove);
        self.notify_size(&mut quiet::<T>);
        Some(pos)
    }

    /// Replace the loaded item with the same identity. Returns its index.
    pub fn update_item(&mut self, item: T) -> Option<usize> {
        if self.old.is_some() {
            return None;
        }
        let identity = &self.identity;
        let pos = self.cached.as_ref()?.position(|existing| identity(existing, &item))?;
        if let Some(data) = self.cached.as_mut() {
            data.replace(pos, item);
        }
        self.notify(&mut quiet::<T>, CacheChange::DataChanged { first: pos, last: pos });
        Some(pos)
    }

    /// Move loaded rows `[first, last]` before the row currently at `to`.
    pub fn move_range(&mut self, first: usize, last: usize, to: usize) -> bool {
        if !self.mutable(|data| data.is_valid_move(first, last, to)) {
            return false;
        }
        self.notify(&mut quiet::<T>, CacheChange::BeginMove { first, last, dest: to });
        if let Some(data) = self.cached.as_mut() {
            data.move_range(first, last, to);
        }
        self.notify(&mut quiet::<T>, CacheChange::EndMove);
        true
    }

    /// Delete rows `[first, last]`, loaded or not.
    pub fn delete_range(&mut self, first: usize, last: usize) -> bool {
        if !self.mutable(|data| first <= last && last < data.query_count()) {
            return false;
        }
        self.notify(&mut quiet::<T>, CacheChange::BeginRemove { first, last });
        if let Some(data) = self.cached.as_mut() {
            let erased = data.delete_range(Range::inclusive(first, last));
            trace!("ListCache {}: deleted [{}, {}], {} were loaded", self.id, first, last, erased);
        }
        self.notify(&mut quiet::<T>, CacheChange::EndRemove);
        self.notify_size(&mut quiet::<T>);
        true
    }

    /// Apply every completion already delivered. Returns how many were handled.
    pub fn process_events(&mut self) -> usize {
        self.process_events_with(quiet::<T>)
    }

    /// Like `process_events`, handing each emitted notification to `observer`
    /// before it is published on the bus.
    pub fn process_events_with<F>(&mut self, mut observer: F) -> usize
    where
        F: FnMut(&ListCache<T>, &CacheEvent),
    {
        let mut handled = 0;
        while let Ok(completion) = self.rx.try_recv() {
            self.apply(completion, &mut observer);
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for a completion, then drain. Returns how many were handled.
    pub fn wait_events(&mut self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => {
                self.apply(completion, &mut quiet::<T>);
                1 + self.process_events()
            }
            Err(_) => 0,
        }
    }

    /// Process completions until no task is outstanding. False on timeout.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.process_events();
        while self.loading() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait_events(deadline - now);
        }
        true
    }

    /// Whether local mutations apply: data loaded, no reload pending, and `check` holds.
    fn mutable(&self, check: impl FnOnce(&CacheData<T>) -> bool) -> bool {
        match (&self.old, &self.cached) {
            (None, Some(data)) => check(data),
            _ => false,
        }
    }

    fn notify(&self, observer: Observer<'_, T>, change: CacheChange) {
        let event = CacheEvent::new(self.id, change);
        observer(self, &event);
        self.bus.emit(event);
    }

    fn notify_size(&self, observer: Observer<'_, T>) {
        let change = CacheChange::SizeChanged {
            query_count: self.query_count(),
            maximum_count: self.maximum_count(),
        };
        self.notify(observer, change);
    }

    fn async_count_and_load(&mut self) {
        if self.count_task.is_busy() {
            trace!("ListCache {}: count task in flight, reload deferred", self.id);
            self.need_reload = true;
            return;
        }

        let mut count = self.max_referred.max(self.settings.chunk_size);
        if self.settings.limit > 0 {
            count = count.min(self.settings.limit);
        }
        let offset = self.settings.offset;
        let task = self.count_task.arm();
        debug!("ListCache {}: count+load task {} [{}, +{}]", self.id, task, offset, count);

        let loader = Arc::clone(&self.loader);
        spawn_guarded(self.pool.as_ref(), &self.count_task, task, &self.tx, move || Completion::Counted {
            task,
            result: guarded(|| loader.count_and_load(offset, count)),
        });
    }

    fn async_fetch_more(&mut self) {
        if self.old.is_some() || self.append_task.is_busy() {
            return;
        }
        let Some(data) = &self.cached else {
            return;
        };
        let loaded = data.loaded_count();
        let target = self.max_referred.min(data.query_count());
        if target <= loaded {
            return;
        }

        let chunk = self.settings.chunk_size;
        let count = (target - loaded).div_ceil(chunk) * chunk;
        let offset = self.settings.offset + loaded;
        let task = self.append_task.arm();
        debug!("ListCache {}: fetch task {} [{}, +{}]", self.id, task, offset, count);

        let loader = Arc::clone(&self.loader);
        spawn_guarded(self.pool.as_ref(), &self.append_task, task, &self.tx, move || Completion::Fetched {
            task,
            result: guarded(|| loader.load(offset, count)),
        });
    }

    fn apply(&mut self, completion: Completion<T>, observer: Observer<'_, T>) {
        match completion {
            Completion::Counted { task, result } => self.on_counted(task, result, observer),
            Completion::Fetched { task, result } => self.on_fetched(task, result, observer),
        }
    }

    fn fail(&mut self, error: LoadError, observer: Observer<'_, T>) {
        warn!("ListCache {}: load failed: {}", self.id, error);
        let message = error.to_string();
        self.last_error = Some(error);
        self.notify(observer, CacheChange::LoadFailed { message });
    }

    fn on_counted(&mut self, task: TaskId, result: Result<(usize, Vec<T>), LoadError>, observer: Observer<'_, T>) {
        if !self.count_task.finish(task) {
            trace!("ListCache {}: stale count task {} dropped", self.id, task);
            return;
        }
        if self.need_reload {
            self.need_reload = false;
            debug!("ListCache {}: result of task {} superseded, reloading", self.id, task);
            self.async_count_and_load();
            return;
        }

        let (total, items) = match result {
            Ok(loaded) => loaded,
            Err(e) => return self.fail(e, observer),
        };
        self.last_error = None;

        let maximum = total.saturating_sub(self.settings.offset);
        let query = match self.settings.limit {
            0 => maximum,
            limit => limit.min(maximum),
        };
        // Store changed between count and load
        let overflow = items.len() > maximum;
        let data = CacheData::new(items, query, maximum);
        debug!(
            "ListCache {}: counted {} (query {}, loaded {})",
            self.id,
            maximum,
            query,
            data.loaded_count()
        );

        if self.old.is_some() {
            self.cached = Some(data);
            self.partial_update(observer);
        } else {
            if query > 0 {
                self.notify(observer, CacheChange::BeginInsert { first: 0, last: query - 1 });
                self.cached = Some(data);
                self.notify(observer, CacheChange::EndInsert);
            } else {
                self.cached = Some(data);
            }
            self.notify_size(observer);
        }

        if overflow {
            debug!("ListCache {}: loader returned more than counted, reloading", self.id);
            self.invalidate();
            return;
        }
        self.async_fetch_more();
    }

    fn on_fetched(&mut self, task: TaskId, result: Result<Vec<T>, LoadError>, observer: Observer<'_, T>) {
        if !self.append_task.finish(task) {
            trace!("ListCache {}: stale fetch task {} dropped", self.id, task);
            return;
        }
        let items = match result {
            Ok(items) => items,
            Err(e) => return self.fail(e, observer),
        };
        let Some(data) = self.cached.as_mut() else {
            return;
        };

        let appended = data.append(items);
        if let Some(last) = appended.last() {
            trace!("ListCache {}: appended [{}, {}]", self.id, appended.offset, last);
            self.notify(observer, CacheChange::DataChanged { first: appended.offset, last });
            self.async_fetch_more();
        }
    }

    /// Announce the differences between the old and the reloaded snapshot.
    fn partial_update(&mut self, observer: Observer<'_, T>) {
        let (Some(old), Some(new)) = (&self.old, &self.cached) else {
            return;
        };
        let old_len = old.diff_len();
        let new_len = new.diff_len();
        // Rows past a window that was not fully loaded are unknown, not absent
        let old_partial = old_len < old.query_count();
        let new_partial = new_len < new.query_count();
        let (new_query, new_maximum) = (new.query_count(), new.maximum_count());

        let identity = &self.identity;
        let edits = diff::edit_script(
            &old.items()[..old_len],
            &new.items()[..new_len],
            |a, b| identity(a, b),
            self.settings.use_move,
        );
        let mut partners = pair_partners(&edits);
        if old_partial || new_partial {
            // A run cannot move to or from rows the consumer only knows as unloaded
            let at_tail = |edit: &Edit| match edit.kind {
                EditKind::Insert => edit.old_index == old_len,
                EditKind::Remove => edit.old_index + edit.count == old_len,
            };
            for i in 0..partners.len() {
                if let Some(p) = partners[i] {
                    if at_tail(&edits[i]) || at_tail(&edits[p]) {
                        trace!("ListCache {}: replaying move at {} as remove and insert", self.id, edits[i].old_index);
                        partners[i] = None;
                        partners[p] = None;
                    }
                }
            }
        }
        debug!("ListCache {}: reconciling reload, {} edit runs", self.id, edits.len());

        self.redirects.clear();
        for (i, edit) in edits.iter().enumerate() {
            // Matched rows in between stay where they are
            let gap = edit.old_index - self.frontier.x;
            self.frontier.x += gap;
            self.frontier.index += gap;
            debug_assert_eq!(self.frontier.index, edit.new_index);

            match (edit.kind, partners[i]) {
                (EditKind::Remove, None) if new_partial && edit.old_index + edit.count == old_len => {
                    self.unload_tail(edit.count);
                }
                (EditKind::Insert, None) if old_partial && edit.old_index == old_len => {
                    self.load_tail(edit.count, observer);
                }
                (EditKind::Insert, None) => self.insert_run(edit.count, observer),
                (EditKind::Remove, None) => self.remove_run(edit.count, observer),
                (EditKind::Remove, Some(p)) if p > i => self.move_forward(edit.count, &edits[p], observer),
                (EditKind::Insert, Some(p)) if p > i => self.move_backward(edit.count, &edits[p], observer),
                (EditKind::Remove, Some(_)) => {
                    self.redirects.take_del(self.frontier.x);
                    self.frontier.x += edit.count;
                }
                (EditKind::Insert, Some(_)) => {
                    self.redirects.take_add(self.frontier.x, edit.new_index);
                    self.frontier.index += edit.count;
                }
            }
        }
        debug_assert!(self.redirects.is_empty());

        // Whatever the diffed windows don't explain is settled at the tail
        let total = self.frontier.total;
        if total > new_query {
            self.notify(observer, CacheChange::BeginRemove { first: new_query, last: total - 1 });
            self.finish_reload();
            self.notify(observer, CacheChange::EndRemove);
        } else if total < new_query {
            self.notify(observer, CacheChange::BeginInsert { first: total, last: new_query - 1 });
            self.finish_reload();
            self.notify(observer, CacheChange::EndInsert);
        } else {
            self.finish_reload();
        }
        self.notify(
            observer,
            CacheChange::SizeChanged {
                query_count: new_query,
                maximum_count: new_maximum,
            },
        );
    }

    fn finish_reload(&mut self) {
        self.old = None;
        self.redirects.clear();
        self.frontier = Frontier::default();
    }

    fn insert_run(&mut self, count: usize, observer: Observer<'_, T>) {
        let first = self.frontier.index;
        self.notify(observer, CacheChange::BeginInsert { first, last: first + count - 1 });
        let f = &mut self.frontier;
        f.index += count;
        f.loaded += count;
        f.total += count;
        f.maximum += count;
        self.notify(observer, CacheChange::EndInsert);
        self.notify_size(observer);
    }

    fn remove_run(&mut self, count: usize, observer: Observer<'_, T>) {
        let first = self.frontier.index + self.redirects.virtual_offset(self.frontier.x, self.frontier.x);
        self.notify(observer, CacheChange::BeginRemove { first, last: first + count - 1 });
        let f = &mut self.frontier;
        f.x += count;
        f.loaded = f.loaded.saturating_sub(count);
        f.total = f.total.saturating_sub(count);
        f.maximum = f.maximum.saturating_sub(count);
        self.notify(observer, CacheChange::EndRemove);
        self.notify_size(observer);
    }

    /// Old rows past the new loaded window: they may still exist, drop only their data.
    fn unload_tail(&mut self, count: usize) {
        trace!("ListCache {}: unloading {} rows past the reloaded window", self.id, count);
        self.frontier.x += count;
        self.frontier.loaded = self.frontier.loaded.saturating_sub(count);
    }

    /// New rows past the old loaded window: fill rows already counted, insert the rest.
    fn load_tail(&mut self, count: usize, observer: Observer<'_, T>) {
        let first = self.frontier.index;
        let known = count.min(self.frontier.total.saturating_sub(first));
        if known > 0 {
            self.frontier.index += known;
            self.frontier.loaded += known;
            self.notify(observer, CacheChange::DataChanged { first, last: first + known - 1 });
        }
        if count > known {
            self.insert_run(count - known, observer);
        }
    }

    fn notify_move(&self, from: usize, to: usize, count: usize, observer: Observer<'_, T>) -> bool {
        if from == to {
            return false;
        }
        let dest = if to > from { to + count } else { to };
        self.notify(observer, CacheChange::BeginMove { first: from, last: from + count - 1, dest });
        true
    }

    /// First half is the removal: the run travels towards the tail.
    fn move_forward(&mut self, count: usize, inserted: &Edit, observer: Observer<'_, T>) {
        let f = self.frontier;
        let from = f.index + self.redirects.virtual_offset(f.x, f.x);
        let run_offset = self
            .redirects
            .virtual_offset_of_run(f.x + count, inserted.old_index, inserted.new_index);
        let to = f.index + run_offset;

        let announced = self.notify_move(from, to, count, observer);
        self.redirects.insert(Redirection::Add {
            pos: inserted.old_index,
            new_index: inserted.new_index,
            src: f.x,
            count,
        });
        self.frontier.x += count;
        if announced {
            self.notify(observer, CacheChange::EndMove);
        }
    }

    /// First half is the insertion: the run travels towards the head.
    fn move_backward(&mut self, count: usize, removed: &Edit, observer: Observer<'_, T>) {
        let f = self.frontier;
        let from = f.index + self.redirects.virtual_offset(f.x, removed.old_index);
        let to = f.index;

        let announced = self.notify_move(from, to, count, observer);
        self.redirects.insert(Redirection::Del {
            pos: removed.old_index,
            count,
        });
        self.frontier.index += count;
        if announced {
            self.notify(observer, CacheChange::EndMove);
        }
    }
}

impl<T> Drop for ListCache<T> {
    fn drop(&mut self) {
        // Queued jobs see their slot cleared and skip the loader
        self.count_task.cancel();
        self.append_task.cancel();
    }
}

/// For each edit, the index of the other half of its move, if any.
fn pair_partners(edits: &[Edit]) -> Vec<Option<usize>> {
    edits
        .iter()
        .enumerate()
        .map(|(i, edit)| {
            let id = edit.pair?;
            edits
                .iter()
                .enumerate()
                .find(|(j, other)| *j != i && other.pair == Some(id))
                .map(|(j, _)| j)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_events::ListMirror;
    use crate::core::workers::{DeferredPool, InlinePool};
    use crate::entities::MemoryLoader;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    fn settings(chunk_size: usize, use_move: bool) -> CacheSettings {
        CacheSettings {
            chunk_size,
            use_move,
            ..Default::default()
        }
    }

    fn numbers(n: u32) -> Vec<u32> {
        (0..n).collect()
    }

    fn inline_cache(loader: impl ListLoader<u32> + 'static, settings: CacheSettings) -> ListCache<u32> {
        ListCache::new(loader, InlinePool, |a: &u32, b: &u32| a == b, settings)
    }

    fn changes<T: Send + 'static>(cache: &ListCache<T>) -> Vec<CacheChange> {
        cache
            .events()
            .poll_as::<CacheEvent>()
            .into_iter()
            .map(|e| e.change)
            .collect()
    }

    fn served(cache: &ListCache<u32>) -> Vec<u32> {
        (0..cache.loaded_count()).filter_map(|i| cache.get(i).copied()).collect()
    }

    /// Records every loader request.
    struct Recording {
        inner: MemoryLoader<u32>,
        calls: Arc<Mutex<Vec<(&'static str, usize, usize)>>>,
    }

    impl ListLoader<u32> for Recording {
        fn count(&self) -> Result<usize, LoadError> {
            self.inner.count()
        }

        fn load(&self, offset: usize, count: usize) -> Result<Vec<u32>, LoadError> {
            self.calls.lock().unwrap().push(("load", offset, count));
            self.inner.load(offset, count)
        }

        fn count_and_load(&self, offset: usize, count: usize) -> Result<(usize, Vec<u32>), LoadError> {
            self.calls.lock().unwrap().push(("count_and_load", offset, count));
            self.inner.count_and_load(offset, count)
        }
    }

    /// Fails while the switch is on.
    struct Flaky {
        inner: MemoryLoader<u32>,
        failing: Arc<AtomicBool>,
    }

    impl ListLoader<u32> for Flaky {
        fn count(&self) -> Result<usize, LoadError> {
            self.inner.count()
        }

        fn load(&self, offset: usize, count: usize) -> Result<Vec<u32>, LoadError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LoadError::Source("offline".into()));
            }
            self.inner.load(offset, count)
        }

        fn count_and_load(&self, offset: usize, count: usize) -> Result<(usize, Vec<u32>), LoadError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LoadError::Source("offline".into()));
            }
            self.inner.count_and_load(offset, count)
        }
    }

    struct Panicking;

    impl ListLoader<u32> for Panicking {
        fn count(&self) -> Result<usize, LoadError> {
            panic!("store exploded")
        }

        fn load(&self, _offset: usize, _count: usize) -> Result<Vec<u32>, LoadError> {
            panic!("store exploded")
        }
    }

    #[test]
    fn test_uninitialized_cache_serves_nothing() {
        let mut cache = inline_cache(MemoryLoader::new(numbers(5)), CacheSettings::default());
        assert_eq!(cache.query_count(), COUNT_UNINITIALIZED);
        assert_eq!(cache.loaded_count(), 0);
        assert!(cache.get(0).is_none());
        assert!(cache.find(|_| true).is_none());
        assert!(!cache.insert_item(9, 0));
        assert!(!cache.delete_range(0, 0));

        // Interest is recorded but nothing is issued before init
        cache.refer(3);
        assert!(!cache.loading());
        assert_eq!(cache.process_events(), 0);
        assert!(changes(&cache).is_empty());
    }

    #[test]
    fn test_empty_store() {
        let mut cache = inline_cache(MemoryLoader::new(Vec::new()), CacheSettings::default());
        assert!(cache.init_count());
        assert!(cache.loading());

        cache.process_events();
        assert!(cache.is_ready());
        assert!(!cache.loading());
        assert_eq!(cache.query_count(), 0);
        assert_eq!(cache.maximum_count(), 0);
        assert_eq!(
            changes(&cache),
            vec![CacheChange::SizeChanged { query_count: 0, maximum_count: 0 }]
        );

        assert!(!cache.init_count());
    }

    #[test]
    fn test_chunked_fetch_on_refer() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = Recording {
            inner: MemoryLoader::new(numbers(250)),
            calls: Arc::clone(&calls),
        };
        let mut cache = inline_cache(loader, settings(100, false));

        cache.init_count();
        cache.process_events();
        assert_eq!(cache.loaded_count(), 100);
        assert_eq!(
            changes(&cache),
            vec![
                CacheChange::BeginInsert { first: 0, last: 249 },
                CacheChange::EndInsert,
                CacheChange::SizeChanged { query_count: 250, maximum_count: 250 },
            ]
        );

        cache.refer(150);
        cache.process_events();
        assert_eq!(cache.loaded_count(), 200);

        cache.refer(245);
        cache.process_events();
        assert_eq!(cache.loaded_count(), 250);
        assert_eq!(
            changes(&cache),
            vec![
                CacheChange::DataChanged { first: 100, last: 199 },
                CacheChange::DataChanged { first: 200, last: 249 },
            ]
        );

        // Everything loaded: no more requests
        cache.refer(250);
        assert!(!cache.loading());

        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![("count_and_load", 0, 100), ("load", 100, 100), ("load", 200, 100)]
        );
        assert!(calls.iter().all(|(_, _, count)| count % 100 == 0));
        assert_eq!(cache.get(249), Some(&249));
        assert_eq!(cache.find(|v| *v == 180), Some((180, &180)));
    }

    #[test]
    fn test_refer_before_init_sizes_first_load() {
        let mut cache = inline_cache(MemoryLoader::new(numbers(250)), settings(100, false));
        cache.refer(150);
        cache.init_count();
        cache.process_events();
        assert_eq!(cache.loaded_count(), 150);
    }

    #[test]
    fn test_limit_and_offset_window() {
        let config = CacheSettings {
            chunk_size: 20,
            limit: 30,
            offset: 10,
            use_move: false,
        };
        let mut cache = inline_cache(MemoryLoader::new(numbers(250)), config);
        cache.init_count();
        cache.process_events();

        assert_eq!(cache.query_count(), 30);
        assert_eq!(cache.maximum_count(), 240);
        assert_eq!(cache.loaded_count(), 20);
        assert_eq!(cache.get(0), Some(&10));

        cache.refer(30);
        cache.process_events();
        assert_eq!(cache.loaded_count(), 30);
        assert_eq!(cache.get(29), Some(&39));
        assert!(cache.get(30).is_none());
        assert!(cache.loaded_count() <= cache.query_count());
        assert!(cache.query_count() <= cache.maximum_count());
    }

    #[test]
    fn test_reload_removes_middle_and_settles_tail() {
        let loader = MemoryLoader::new(numbers(10));
        let handle = loader.handle();
        let mut cache = inline_cache(loader, settings(5, false));

        cache.init_count();
        cache.refer(7);
        cache.process_events();
        assert_eq!(cache.loaded_count(), 10);
        changes(&cache);

        handle.remove_where(|v| (2..5).contains(v));
        handle.push(100);
        handle.push(101);
        cache.invalidate();
        cache.process_events();

        assert_eq!(
            changes(&cache),
            vec![
                CacheChange::BeginRemove { first: 2, last: 4 },
                CacheChange::EndRemove,
                CacheChange::SizeChanged { query_count: 7, maximum_count: 7 },
                CacheChange::BeginInsert { first: 7, last: 8 },
                CacheChange::EndInsert,
                CacheChange::SizeChanged { query_count: 9, maximum_count: 9 },
            ]
        );
        assert_eq!(served(&cache), vec![0, 1, 5, 6, 7, 8, 9]);
        assert!(cache.get(7).is_none());

        cache.refer(9);
        cache.process_events();
        assert_eq!(served(&cache), vec![0, 1, 5, 6, 7, 8, 9, 100, 101]);
    }

    #[test]
    fn test_reload_move_single_notification() {
        let loader = MemoryLoader::new(numbers(20));
        let handle = loader.handle();
        let mut cache = inline_cache(loader, settings(100, true));
        cache.init_count();
        cache.process_events();
        changes(&cache);

        // Run of 4 from index 10 to index 2
        assert!(handle.move_range(10, 4, 2));
        cache.invalidate();

        let mut seen = Vec::new();
        cache.process_events_with(|cache, event| {
            let probe = |i: usize| cache.get(i).copied();
            match event.change {
                CacheChange::BeginMove { .. } => seen.push(("begin", probe(2), probe(6), probe(10), probe(14))),
                CacheChange::EndMove => seen.push(("end", probe(2), probe(6), probe(13), probe(14))),
                _ => {}
            }
        });

        assert_eq!(
            changes(&cache),
            vec![
                CacheChange::BeginMove { first: 10, last: 13, dest: 2 },
                CacheChange::EndMove,
                CacheChange::SizeChanged { query_count: 20, maximum_count: 20 },
            ]
        );
        assert_eq!(
            seen,
            vec![
                ("begin", Some(2), Some(6), Some(10), Some(14)),
                // Rows past the frontier still come from the old snapshot, shifted
                ("end", Some(10), Some(2), Some(9), Some(14)),
            ]
        );
        assert_eq!(served(&cache), handle.snapshot());
    }

    #[test]
    fn test_reload_move_without_detection() {
        let loader = MemoryLoader::new(numbers(20));
        let handle = loader.handle();
        let mut cache = inline_cache(loader, settings(100, false));
        cache.init_count();
        cache.process_events();
        changes(&cache);

        handle.move_range(10, 4, 2);
        cache.invalidate();
        cache.process_events();

        let structural: Vec<CacheChange> = changes(&cache).into_iter().filter(|c| c.is_begin()).collect();
        assert_eq!(
            structural,
            vec![
                CacheChange::BeginInsert { first: 2, last: 5 },
                CacheChange::BeginRemove { first: 14, last: 17 },
            ]
        );
        assert_eq!(served(&cache), handle.snapshot());
    }

    #[test]
    fn test_reload_move_into_unloaded_rows() {
        let loader = MemoryLoader::new(numbers(21));
        let handle = loader.handle();
        let mut cache = inline_cache(loader, settings(1, true));
        let mut mirror = ListMirror::new(Vec::new());
        cache.init_count();
        replay(&mut cache, &mut mirror);
        cache.refer(5);
        replay(&mut cache, &mut mirror);
        assert_eq!(cache.loaded_count(), 5);
        changes(&cache);

        // First row lands just past the loaded window, the reload loads 13
        assert!(handle.move_range(0, 1, 5));
        cache.refer(13);
        cache.invalidate();
        replay(&mut cache, &mut mirror);

        let structural: Vec<CacheChange> = changes(&cache).into_iter().filter(|c| c.is_begin()).collect();
        assert_eq!(
            structural,
            vec![
                CacheChange::BeginRemove { first: 0, last: 0 },
                CacheChange::BeginInsert { first: 20, last: 20 },
            ]
        );
        assert_eq!(cache.loaded_count(), 13);
        assert_eq!(served(&cache), handle.snapshot()[..13].to_vec());
        assert_eq!(mirror.rows.len(), 21);
        assert_eq!(mirror.rows[5], Some(0));
        assert!(mirror.rows[13..].iter().all(Option::is_none));
    }

    #[test]
    fn test_double_invalidate_converges_once() {
        let pool = Arc::new(DeferredPool::new());
        let loader = MemoryLoader::new(numbers(10));
        let handle = loader.handle();
        let mut cache = ListCache::new(loader, Arc::clone(&pool), |a: &u32, b: &u32| a == b, settings(100, false));

        cache.init_count();
        pool.run_pending();
        cache.process_events();
        changes(&cache);

        handle.remove_where(|v| *v == 3);
        cache.invalidate();
        handle.remove_where(|v| *v == 7);
        cache.invalidate();
        assert_eq!(pool.pending(), 1);

        // First result is swallowed and the reload issued again
        pool.run_pending();
        cache.process_events();
        assert!(changes(&cache).is_empty());
        assert!(cache.loading());
        assert_eq!(served(&cache), numbers(10));

        pool.run_pending();
        cache.process_events();
        assert_eq!(
            changes(&cache),
            vec![
                CacheChange::BeginRemove { first: 3, last: 3 },
                CacheChange::EndRemove,
                CacheChange::SizeChanged { query_count: 9, maximum_count: 9 },
                CacheChange::BeginRemove { first: 6, last: 6 },
                CacheChange::EndRemove,
                CacheChange::SizeChanged { query_count: 8, maximum_count: 8 },
                CacheChange::SizeChanged { query_count: 8, maximum_count: 8 },
            ]
        );
        assert_eq!(served(&cache), vec![0, 1, 2, 4, 5, 6, 8, 9]);
        assert!(!cache.loading());
    }

    #[test]
    fn test_invalidate_cancels_queued_fetch() {
        let pool = Arc::new(DeferredPool::new());
        let mut cache = ListCache::new(
            MemoryLoader::new(numbers(250)),
            Arc::clone(&pool),
            |a: &u32, b: &u32| a == b,
            settings(100, false),
        );
        cache.init_count();
        pool.run_pending();
        cache.process_events();
        changes(&cache);

        cache.refer(150);
        assert!(cache.loading());
        cache.invalidate();

        // The fetch job finds its slot cleared and never loads
        assert_eq!(pool.run_pending(), 2);
        cache.process_events();

        // Reload covered 150 rows; the extra 50 fill rows already counted
        assert_eq!(
            changes(&cache),
            vec![
                CacheChange::DataChanged { first: 100, last: 149 },
                CacheChange::SizeChanged { query_count: 250, maximum_count: 250 },
            ]
        );
        assert_eq!(served(&cache), numbers(150));
    }

    #[test]
    fn test_stale_fetch_completion_is_dropped() {
        let pool = Arc::new(DeferredPool::new());
        let mut cache = ListCache::new(
            MemoryLoader::new(numbers(250)),
            Arc::clone(&pool),
            |a: &u32, b: &u32| a == b,
            settings(100, false),
        );
        cache.init_count();
        pool.run_pending();
        cache.process_events();
        changes(&cache);

        // Fetch result is already waiting when the reload starts
        cache.refer(150);
        assert!(pool.run_one());
        cache.invalidate();
        pool.run_pending();
        assert_eq!(cache.process_events(), 2);

        let appended = changes(&cache)
            .into_iter()
            .filter(|c| matches!(c, CacheChange::DataChanged { first: 100, last: 199 }))
            .count();
        assert_eq!(appended, 0);
        assert_eq!(cache.loaded_count(), 150);
    }

    #[test]
    fn test_reload_with_smaller_window_is_silent() {
        let mut cache = inline_cache(MemoryLoader::new(numbers(250)), settings(100, false));
        cache.init_count();
        cache.refer(150);
        cache.process_events();
        assert_eq!(cache.loaded_count(), 200);
        changes(&cache);

        // Reload asks for 150 rows only: the 50 others lose their data, not their place
        cache.invalidate();
        cache.process_events();
        assert_eq!(
            changes(&cache),
            vec![CacheChange::SizeChanged { query_count: 250, maximum_count: 250 }]
        );
        assert_eq!(cache.loaded_count(), 150);
        assert!(cache.get(160).is_none());

        cache.refer(160);
        cache.process_events();
        assert_eq!(cache.loaded_count(), 250);
        assert_eq!(cache.get(160), Some(&160));
    }

    #[test]
    fn test_loader_failure_and_retry() {
        let failing = Arc::new(AtomicBool::new(true));
        let loader = Flaky {
            inner: MemoryLoader::new(numbers(10)),
            failing: Arc::clone(&failing),
        };
        let mut cache = inline_cache(loader, settings(100, false));

        cache.init_count();
        cache.process_events();
        assert!(!cache.loading());
        assert_eq!(cache.last_error(), Some(&LoadError::Source("offline".into())));
        assert_eq!(cache.query_count(), COUNT_UNINITIALIZED);
        assert_eq!(
            changes(&cache),
            vec![CacheChange::LoadFailed {
                message: "Source error: offline".into()
            }]
        );

        // refer() retries a cache without data
        cache.refer(5);
        cache.process_events();
        assert_eq!(changes(&cache).len(), 1);

        failing.store(false, Ordering::SeqCst);
        cache.invalidate();
        cache.process_events();
        assert!(cache.last_error().is_none());
        assert_eq!(cache.loaded_count(), 10);
        changes(&cache);

        // A failed reload keeps serving the previous data
        failing.store(true, Ordering::SeqCst);
        cache.invalidate();
        cache.process_events();
        assert!(cache.last_error().is_some());
        assert_eq!(cache.get(3), Some(&3));
        assert_eq!(cache.query_count(), 10);
        assert!(!cache.is_ready());

        failing.store(false, Ordering::SeqCst);
        cache.invalidate();
        cache.process_events();
        assert!(cache.is_ready());
        assert_eq!(
            changes(&cache),
            vec![
                CacheChange::LoadFailed {
                    message: "Source error: offline".into()
                },
                CacheChange::SizeChanged { query_count: 10, maximum_count: 10 },
            ]
        );
    }

    #[test]
    fn test_loader_panic_reported_as_interrupted() {
        let mut cache = inline_cache(Panicking, CacheSettings::default());
        cache.init_count();
        cache.process_events();
        assert_eq!(cache.last_error(), Some(&LoadError::Interrupted));
        assert!(!cache.loading());
    }

    #[test]
    fn test_local_mutations() {
        let rows: Vec<(u32, String)> = (0..5).map(|i| (i, format!("row {}", i))).collect();
        let mut cache = ListCache::new(
            MemoryLoader::new(rows),
            InlinePool,
            |a: &(u32, String), b: &(u32, String)| a.0 == b.0,
            CacheSettings::default(),
        );
        cache.init_count();
        cache.process_events();
        changes(&cache);
        let ids = |cache: &ListCache<(u32, String)>| -> Vec<u32> {
            (0..cache.loaded_count()).filter_map(|i| cache.get(i).map(|r| r.0)).collect()
        };

        assert!(cache.insert_item((50, "new".into()), 2));
        assert!(!cache.insert_item((60, "far".into()), 9));
        assert_eq!(ids(&cache), vec![0, 1, 50, 2, 3, 4]);

        // Same identity, new value
        assert_eq!(cache.update_item((50, "renamed".into())), Some(2));
        assert_eq!(cache.get(2).map(|r| r.1.as_str()), Some("renamed"));
        assert_eq!(cache.update_item((99, "missing".into())), None);

        assert_eq!(cache.delete_item(|r| r.0 == 3), Some(4));
        assert_eq!(cache.delete_item(|r| r.0 == 3), None);
        assert_eq!(ids(&cache), vec![0, 1, 50, 2, 4]);

        assert!(cache.move_range(0, 1, 4));
        assert_eq!(ids(&cache), vec![50, 2, 0, 1, 4]);
        assert!(!cache.move_range(1, 2, 2));

        assert!(cache.delete_range(1, 2));
        assert!(!cache.delete_range(3, 9));
        assert_eq!(ids(&cache), vec![50, 1, 4]);
        assert_eq!(cache.query_count(), 3);

        assert_eq!(
            changes(&cache),
            vec![
                CacheChange::BeginInsert { first: 2, last: 2 },
                CacheChange::EndInsert,
                CacheChange::SizeChanged { query_count: 6, maximum_count: 6 },
                CacheChange::DataChanged { first: 2, last: 2 },
                CacheChange::BeginRemove { first: 4, last: 4 },
                CacheChange::EndRemove,
                CacheChange::SizeChanged { query_count: 5, maximum_count: 5 },
                CacheChange::BeginMove { first: 0, last: 1, dest: 4 },
                CacheChange::EndMove,
                CacheChange::BeginRemove { first: 1, last: 2 },
                CacheChange::EndRemove,
                CacheChange::SizeChanged { query_count: 3, maximum_count: 3 },
            ]
        );

        // No local mutation while a reload is pending
        cache.invalidate();
        assert!(!cache.insert_item((70, "late".into()), 0));
        assert_eq!(cache.delete_item(|_| true), None);
        assert_eq!(cache.update_item((50, "late".into())), None);
        assert!(!cache.move_range(0, 0, 2));
        assert!(!cache.delete_range(0, 0));
    }

    #[test]
    fn test_counts_invariant_while_scrolling() {
        let mut cache = inline_cache(MemoryLoader::new(numbers(97)), settings(10, false));
        cache.init_count();
        cache.process_events();
        for n in [0, 5, 11, 40, 39, 80, 200] {
            cache.refer(n);
            cache.process_events();
            assert!(cache.loaded_count() <= cache.query_count());
            assert!(cache.query_count() <= cache.maximum_count());
            assert!(cache.loaded_count() >= n.min(97));
            assert!(cache.loaded_count() % 10 == 0 || cache.loaded_count() == 97);
        }
    }

    #[test]
    fn test_shared_bus_and_threaded_workers() {
        let bus = EventBus::new();
        let workers = Arc::new(crate::core::workers::Workers::new(2).unwrap());
        let mut cache = ListCache::new(
            MemoryLoader::new(numbers(30)),
            Arc::clone(&workers),
            |a: &u32, b: &u32| a == b,
            settings(8, false),
        )
        .with_event_bus(bus.clone());

        cache.init_count();
        cache.refer(20);
        assert!(cache.wait_idle(Duration::from_secs(5)));
        assert!(cache.loaded_count() >= 20);
        assert!(!bus.poll_as::<CacheEvent>().is_empty());
    }

    /// Rows the cache has loaded must read the same in the mirror.
    fn assert_loaded_rows(mirror: &ListMirror<Option<u32>>, cache: &ListCache<u32>, change: &CacheChange) {
        for i in 0..cache.loaded_count() {
            assert_eq!(mirror.rows.get(i).copied().flatten(), cache.get(i).copied(), "row {} at {:?}", i, change);
        }
    }

    /// Drain completions, replaying every notification into `mirror`.
    ///
    /// Counted rows that are not loaded yet are kept as `None`.
    fn replay(cache: &mut ListCache<u32>, mirror: &mut ListMirror<Option<u32>>) {
        let mut pending = None;
        cache.process_events_with(|cache, event| {
            if event.change.is_begin() {
                assert_loaded_rows(mirror, cache, &event.change);
            }
            mirror.apply(&event.change, &mut pending, |i| Some(cache.get(i).copied()));
            if event.change.is_end() {
                assert_loaded_rows(mirror, cache, &event.change);
                assert_eq!(mirror.rows.len(), cache.query_count(), "size at {:?}", event.change);
            }
        });
    }

    /// Apply `(kind, at, count, to)` edits to `list`; fresh ids start at `next`.
    fn mutate(list: &mut Vec<u32>, ops: &[(u8, prop::sample::Index, usize, prop::sample::Index)], next: &mut u32) {
        for (kind, at, count, to) in ops {
            match kind {
                0 if !list.is_empty() => {
                    let start = at.index(list.len());
                    let end = (start + count).min(list.len());
                    list.drain(start..end);
                }
                1 => {
                    let pos = at.index(list.len() + 1);
                    for k in 0..*count {
                        list.insert(pos + k, *next);
                        *next += 1;
                    }
                }
                2 if !list.is_empty() => {
                    let start = at.index(list.len());
                    let end = (start + count).min(list.len());
                    let run: Vec<u32> = list.drain(start..end).collect();
                    let pos = to.index(list.len() + 1);
                    list.splice(pos..pos, run);
                }
                _ => {}
            }
        }
    }

    proptest! {
        #[test]
        fn prop_reload_notifications_rebuild_list(
            base in 0u32..40,
            ops in prop::collection::vec(
                (0u8..3, any::<prop::sample::Index>(), 1usize..6, any::<prop::sample::Index>()),
                0..6,
            ),
            use_move in any::<bool>(),
            chunk_size in 1usize..8,
            limit in 0usize..45,
            first_refer in 0usize..45,
            second_refer in 0usize..45,
        ) {
            let before = numbers(base);
            let mut after = before.clone();
            let mut next = 1000;
            mutate(&mut after, &ops, &mut next);

            let loader = MemoryLoader::new(before);
            let handle = loader.handle();
            let mut cache = inline_cache(loader, CacheSettings { chunk_size, limit, offset: 0, use_move });
            let mut mirror = ListMirror::new(Vec::new());
            cache.init_count();
            replay(&mut cache, &mut mirror);
            cache.refer(first_refer);
            replay(&mut cache, &mut mirror);

            handle.replace_all(after.clone());
            // Widens the reload; its own fetch is superseded
            cache.refer(second_refer);
            cache.invalidate();
            replay(&mut cache, &mut mirror);

            let query = match limit {
                0 => after.len(),
                limit => limit.min(after.len()),
            };
            let loaded = cache.loaded_count();
            prop_assert_eq!(cache.query_count(), query);
            prop_assert_eq!(mirror.rows.len(), query);
            prop_assert!(loaded <= query);
            prop_assert_eq!(served(&cache), after[..loaded].to_vec());
            let expected: Vec<Option<u32>> = after[..loaded].iter().copied().map(Some).collect();
            prop_assert_eq!(&mirror.rows[..loaded], &expected[..]);
        }
    }
}
