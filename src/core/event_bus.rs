//! Pub/Sub Event Bus delivering cache notifications.
//!
//! Architecture:
//! - Subscribers register per event type and are invoked synchronously on emit()
//! - emit() also queues the event for deferred processing
//! - poll() returns queued events in emission order, across all types
//!
//! Callback order: FIFO (first-subscribed, first-called) within same event type.
//! The deferred queue keeps global emission order, which is what list-model
//! consumers replaying structural changes rely on.

use log::warn;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Default maximum events in queue before oldest are evicted
pub const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// State shared by clones of one bus
struct Shared {
    subscribers: RwLock<HashMap<TypeId, Vec<Callback>>>,
    queue: Mutex<Vec<BoxedEvent>>,
    max_queue: usize,
}

impl Shared {
    fn emit<E: Event>(&self, event: E) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_default();

        // Lock released: a callback may subscribe or emit
        for cb in &callbacks {
            cb(&event);
        }

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if self.max_queue > 0 && queue.len() >= self.max_queue {
            let evict_count = (queue.len() / 2).max(1);
            warn!(
                "EventBus queue full ({} events), evicting oldest {}",
                queue.len(),
                evict_count
            );
            queue.drain(0..evict_count);
        }
        queue.push(Box::new(event));
    }
}

/// Pub/Sub Event Bus with deferred processing support.
///
/// Cloning is cheap and every clone sees the same subscribers and queue.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.shared.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_limit(MAX_QUEUE_SIZE)
    }

    /// Bus whose deferred queue holds at most `max_queue` events (0 = unbounded).
    pub fn with_queue_limit(max_queue: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: RwLock::new(HashMap::new()),
                queue: Mutex::new(Vec::new()),
                max_queue,
            }),
        }
    }

    /// Subscribe to events of type E.
    ///
    /// # Example
    /// ```ignore
    /// let sizes = Arc::new(Mutex::new(Vec::new()));
    /// let s = Arc::clone(&sizes);
    /// bus.subscribe::<CacheEvent, _>(move |e| {
    ///     if let CacheChange::SizeChanged { query_count, .. } = e.change {
    ///         s.lock().unwrap().push(query_count);
    ///     }
    /// });
    /// ```
    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    /// Emit event: invoke callbacks immediately AND queue for deferred processing.
    pub fn emit<E: Event>(&self, event: E) {
        self.shared.emit(event);
    }

    /// Take all queued events, oldest first.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Take queued events of type E, dropping the others.
    pub fn poll_as<E: Event + Clone>(&self) -> Vec<E> {
        self.poll()
            .iter()
            .filter_map(|ev| downcast_event::<E>(ev).cloned())
            .collect()
    }

    /// Clear all subscribers and queue
    pub fn clear(&self) {
        self.shared.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Helper: downcast BoxedEvent to concrete type
///
/// Must deref to `dyn Event` before calling `as_any()`: the blanket impl
/// also covers `Box<dyn Event>` itself, which would hide the inner type.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
