//! Worker pools for loader tasks.
//!
//! - `Workers`: background threads with work-stealing deques (crossbeam)
//! - `InlinePool`: runs each job on the calling thread
//! - `DeferredPool`: queues jobs until `run_pending()` is called
//!
//! All three implement `WorkerPool`. Loader results always travel back to the
//! owning thread through a channel, so an inline job never re-enters the cache.
//! Cancellation is handled by the job itself (see `core::tasks::TaskSlot`).

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::WorkerPool;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Thread pool with work-stealing for loader jobs.
///
/// New jobs go to a global injector; each worker drains its own deque first,
/// then the injector, then steals from its siblings.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4)?;
/// workers.execute(Box::new(move || {
///     let items = loader.load(0, 100);
///     tx.send(items).ok();
/// }));
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers")
            .field("threads", &self.handles.len())
            .field("queued", &self.injector.len())
            .finish()
    }
}

impl Workers {
    /// Spawn `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> std::io::Result<Self> {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("listcache-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, local, &injector, &stealers, &shutdown))?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);

        Ok(Self {
            injector,
            handles,
            shutdown,
        })
    }

    /// Three quarters of the cores, leaving room for the owning thread.
    pub fn default_thread_count() -> usize {
        (num_cpus::get() * 3 / 4).max(1)
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Jobs waiting in the global queue.
    pub fn queued(&self) -> usize {
        self.injector.len()
    }
}

fn worker_loop(
    worker_id: usize,
    local: Worker<Job>,
    injector: &Injector<Job>,
    stealers: &[Stealer<Job>],
    shutdown: &AtomicBool,
) {
    trace!("Worker {} started", worker_id);

    loop {
        // Own queue, then global injector, then siblings
        let job = local.pop().or_else(|| {
            std::iter::repeat_with(|| {
                injector
                    .steal_batch_and_pop(&local)
                    .or_else(|| stealers.iter().map(|s| s.steal()).collect())
            })
            .find(|s| !s.is_retry())
            .and_then(|s| s.success())
        });

        if let Some(job) = job {
            job();
            continue;
        }

        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        thread::sleep(Duration::from_millis(1));
    }

    trace!("Worker {} stopped", worker_id);
}

impl WorkerPool for Workers {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        self.injector.push(job);
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // Stale jobs are skipped by their task guard, so this is quick.
        // Past the deadline remaining threads are left to the process.
        let deadline = Instant::now() + Duration::from_millis(500);

        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePool;

impl WorkerPool for InlinePool {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        job();
    }
}

/// Holds jobs until the driver runs them.
///
/// Makes "task still in flight" states reproducible: issue a request,
/// change the cache, then let the stale job complete.
#[derive(Default)]
pub struct DeferredPool {
    queue: Mutex<VecDeque<Job>>,
}

impl std::fmt::Debug for DeferredPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredPool")
            .field("pending", &self.pending())
            .finish()
    }
}

impl DeferredPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run the oldest queued job. Returns false if nothing was queued.
    pub fn run_one(&self) -> bool {
        // Release the lock before running: the job may enqueue more work
        let job = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs until the queue is empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Drop every queued job without running it.
    pub fn discard(&self) -> usize {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl WorkerPool for DeferredPool {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(job);
    }
}
