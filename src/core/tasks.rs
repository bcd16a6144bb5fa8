//! Task ids, cancellable task slots and completion messages.
//!
//! Every loader request gets a fresh `TaskId`. The cache tracks the id of its
//! outstanding count task and append task in two `TaskSlot`s:
//! - a job whose slot no longer holds its id is skipped before it touches the loader
//! - a completion whose id no longer matches the slot is dropped as stale
//!
//! Completions are sent over a crossbeam channel and applied by the owning
//! thread when it drains its events.

use crossbeam_channel::Sender;
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entities::{LoadError, WorkerPool};

/// Identifier of an asynchronous loader task. Never 0.
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Holds the id of the outstanding task of one kind (0 = idle).
///
/// Shared between the owning thread (arm/cancel/finish) and the job
/// running on a worker (is_current).
#[derive(Debug, Clone, Default)]
pub struct TaskSlot {
    current: Arc<AtomicU64>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new task, implicitly superseding the previous one.
    pub fn arm(&self) -> TaskId {
        let id = next_task_id();
        self.current.store(id, Ordering::SeqCst);
        id
    }

    pub fn current(&self) -> Option<TaskId> {
        match self.current.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }

    pub fn is_current(&self, id: TaskId) -> bool {
        id != 0 && self.current.load(Ordering::SeqCst) == id
    }

    /// Forget the outstanding task. Its job is skipped if not started yet
    /// and its completion will be discarded.
    pub fn cancel(&self) -> Option<TaskId> {
        match self.current.swap(0, Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// Mark `id` as completed. Returns false if it was stale.
    pub fn finish(&self, id: TaskId) -> bool {
        id != 0
            && self
                .current
                .compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

/// Result of a loader task, delivered to the owning thread.
#[derive(Debug)]
pub enum Completion<T> {
    /// Count + first chunk: `(maximum_count, items)`
    Counted {
        task: TaskId,
        result: Result<(usize, Vec<T>), LoadError>,
    },
    /// Fetch-more chunk
    Fetched {
        task: TaskId,
        result: Result<Vec<T>, LoadError>,
    },
}

impl<T> Completion<T> {
    pub fn task(&self) -> TaskId {
        match self {
            Completion::Counted { task, .. } | Completion::Fetched { task, .. } => *task,
        }
    }
}

/// Queue `work` on `pool` under the guard of `slot`.
///
/// The job is skipped if `slot` moved on before a worker picked it up;
/// otherwise its completion is sent to `tx`.
pub fn spawn_guarded<T, F>(pool: &dyn WorkerPool, slot: &TaskSlot, task: TaskId, tx: &Sender<Completion<T>>, work: F)
where
    T: Send + 'static,
    F: FnOnce() -> Completion<T> + Send + 'static,
{
    let slot = slot.clone();
    let tx = tx.clone();
    pool.execute(Box::new(move || {
        if !slot.is_current(task) {
            trace!("Task {} cancelled before start, skipped", task);
            return;
        }
        let completion = work();
        if tx.send(completion).is_err() {
            trace!("Task {} finished after its cache was dropped", task);
        }
    }));
}
