use crate::domain::training::events::{TrainingEvent, TrainingEventListener};
use std::sync::{Arc, RwLock};

/// Event bus for publishing training events to multiple listeners.
///
/// Publishing is synchronous so that progress callbacks running inside blocking
/// workers can publish without an executor.
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn TrainingEventListener>>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe a listener to events
    pub fn subscribe(&self, listener: Arc<dyn TrainingEventListener>) {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push(listener);
    }

    /// Publish an event to all listeners
    pub fn publish(&self, event: TrainingEvent) {
        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in listeners.iter() {
            listener.on_event(&event);
        }
    }

    /// Get count of subscribers (for testing)
    pub fn subscriber_count(&self) -> usize {
        match self.listeners.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}
