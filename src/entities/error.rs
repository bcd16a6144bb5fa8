//! Loader failure type.

/// Errors reported by a [`ListLoader`](super::traits::ListLoader).
///
/// The cache never raises these to the caller; a failed task is recorded in
/// `ListCache::last_error()` and announced with a `LoadFailed` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Backing store returned an error (query failed, service unreachable...)
    Source(String),
    /// Backing store is gone (closed database, dropped discovery tree)
    Unavailable,
    /// Loader panicked or the worker dropped the task
    Interrupted,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Source(e) => write!(f, "Source error: {}", e),
            LoadError::Unavailable => write!(f, "Source unavailable"),
            LoadError::Interrupted => write!(f, "Load interrupted"),
        }
    }
}

impl std::error::Error for LoadError {}
