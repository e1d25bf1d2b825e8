//! Type name → consumers tables.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;

use crate::handler::BoxedHandler;
use crate::payload::SharedPayload;

/// A caller-owned queue the bus writes matching payloads into. The bus keeps a
/// clone of the sender and never touches the receiver.
pub type DeliveryQueue = mpsc::Sender<SharedPayload>;

/// Everything registered for one payload type, copied out of the registry so
/// fan-out never holds the lock across an await.
#[derive(Default)]
pub struct Consumers {
    pub handlers: Vec<BoxedHandler>,
    pub queues: Vec<DeliveryQueue>,
}

impl Consumers {
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.queues.is_empty()
    }
}

/// Append-only registration tables. Written by callers, read by the dispatch
/// loop and delivery tasks.
#[derive(Default)]
pub struct Registry {
    handlers: RwLock<HashMap<String, Vec<BoxedHandler>>>,
    queues: RwLock<HashMap<String, Vec<DeliveryQueue>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append handlers in order. Callers guarantee `handlers` is non-empty.
    pub fn add_handlers(&self, payload_type: &str, handlers: Vec<BoxedHandler>) {
        write(&self.handlers)
            .entry(payload_type.to_string())
            .or_default()
            .extend(handlers);
    }

    pub fn add_queue(&self, payload_type: &str, queue: DeliveryQueue) {
        write(&self.queues)
            .entry(payload_type.to_string())
            .or_default()
            .push(queue);
    }

    /// Both tables are read under their locks at once, so the copy matches a
    /// single point between registrations. Lock order: handlers, then queues.
    pub fn consumers(&self, payload_type: &str) -> Consumers {
        let handlers = read(&self.handlers);
        let queues = read(&self.queues);
        Consumers {
            handlers: handlers.get(payload_type).cloned().unwrap_or_default(),
            queues: queues.get(payload_type).cloned().unwrap_or_default(),
        }
    }

    pub fn handler_count(&self, payload_type: &str) -> usize {
        read(&self.handlers).get(payload_type).map_or(0, Vec::len)
    }

    pub fn queue_count(&self, payload_type: &str) -> usize {
        read(&self.queues).get(payload_type).map_or(0, Vec::len)
    }

    /// Sorted union of every type with at least one handler or queue.
    pub fn types(&self) -> Vec<String> {
        let mut types: BTreeSet<String> = read(&self.handlers).keys().cloned().collect();
        types.extend(read(&self.queues).keys().cloned());
        types.into_iter().collect()
    }
}

// Appends and clones can't leave a table half-written, so a poisoned lock is
// still safe to use.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
