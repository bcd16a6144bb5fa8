//! Core engine modules - list cache, diff, notifications, workers
//!
//! The cache machinery built on top of `entities`, independent of any UI.

pub mod cache_events;
pub mod diff;
pub mod event_bus;
pub mod list_cache;
pub mod redirect;
pub mod registry;
pub mod tasks;
pub mod workers;

// Re-exports for convenience
pub use cache_events::{CacheChange, CacheEvent, CacheId, ListMirror};
pub use diff::{DiffOp, diff};
pub use event_bus::{BoxedEvent, EventBus, downcast_event};
pub use list_cache::{COUNT_UNINITIALIZED, ListCache};
pub use registry::{RegistryStats, SourceRegistry};
pub use workers::{DeferredPool, InlinePool, Workers};
