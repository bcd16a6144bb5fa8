//! listcache - incremental, chunk-loaded list cache
//!
//! Re-exports all modules for use by the demo binary.

// Core engine (cache, diff, events, workers)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod entities;
pub mod paths;

// Re-export commonly used types from core
pub use core::cache_events::{CacheChange, CacheEvent};
pub use core::event_bus::{BoxedEvent, EventBus, downcast_event};
pub use core::list_cache::{COUNT_UNINITIALIZED, ListCache};
pub use core::registry::SourceRegistry;
pub use core::workers::Workers;

// Re-export entities
pub use entities::{CacheData, ListLoader, LoadError, MemoryLoader, Range, SourceHandle, WorkerPool};
