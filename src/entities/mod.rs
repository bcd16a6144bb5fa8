//! Entities module - plain data types and the traits the cache depends on
//!
//! Nothing here knows about threads, channels or notifications; `core`
//! builds the cache machinery on top of these.

pub mod error;
pub mod loader;
pub mod range;
pub mod snapshot;
pub mod traits;

pub use error::LoadError;
pub use loader::{MemoryLoader, SourceHandle};
pub use range::Range;
pub use snapshot::CacheData;
pub use traits::{ListLoader, WorkerPool};
