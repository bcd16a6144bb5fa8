//! Abstract traits for dependency inversion.
//!
//! The cache drives a loader and a worker pool without knowing what backs
//! them: a database query, a service-discovery tree, a static list, a real
//! thread pool or an inline test runner.
//!
//! Implementations live in `entities::loader` and `core::workers`.

use std::sync::Arc;

use super::error::LoadError;

/// Backing collection the cache materializes in chunks.
///
/// Both calls may be slow and are always invoked on a worker thread,
/// never on the thread owning the cache.
pub trait ListLoader<T>: Send + Sync {
    /// Total number of items the current query would return (no limit applied).
    fn count(&self) -> Result<usize, LoadError>;

    /// Load up to `count` items starting at `offset`.
    ///
    /// Returning fewer items than requested means the collection ended.
    fn load(&self, offset: usize, count: usize) -> Result<Vec<T>, LoadError>;

    /// Count and load the first chunk in one task.
    ///
    /// Override when the store can answer both from a single query.
    fn count_and_load(&self, offset: usize, count: usize) -> Result<(usize, Vec<T>), LoadError> {
        let total = self.count()?;
        let items = self.load(offset, count)?;
        Ok((total, items))
    }
}

/// Abstract worker pool interface.
///
/// Runs loader jobs off the owning thread. Results come back through a
/// channel, so an implementation is free to run the job inline.
pub trait WorkerPool: Send + Sync {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// Blanket impl: Arc<L> implements traits if L does
impl<T, L: ListLoader<T> + ?Sized> ListLoader<T> for Arc<L> {
    fn count(&self) -> Result<usize, LoadError> {
        (**self).count()
    }

    fn load(&self, offset: usize, count: usize) -> Result<Vec<T>, LoadError> {
        (**self).load(offset, count)
    }

    fn count_and_load(&self, offset: usize, count: usize) -> Result<(usize, Vec<T>), LoadError> {
        (**self).count_and_load(offset, count)
    }
}

impl<P: WorkerPool + ?Sized> WorkerPool for Arc<P> {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        (**self).execute(job)
    }
}
