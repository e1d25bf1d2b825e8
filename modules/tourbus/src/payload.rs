//! The payload capability consumed by the bus, plus a general-purpose
//! implementation.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};

/// Anything the bus can route: a type name used as the dispatch key and a
/// mutable, possibly empty, bag of data.
///
/// The bus only reads `payload_type()`. Handlers and queue consumers may read
/// or mutate `data()`.
pub trait Payload: Send + Sync + 'static {
    fn payload_type(&self) -> &str;

    fn data(&self) -> &DataBag;
}

/// How payloads travel through the bus. Every handler and queue registered for
/// a type sees the same instance.
pub type SharedPayload = Arc<dyn Payload>;

/// String-keyed JSON map behind a lock, so a shared payload can still be
/// mutated by whoever receives it.
#[derive(Debug, Default)]
pub struct DataBag {
    entries: Mutex<Map<String, Value>>,
}

impl DataBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            entries: Mutex::new(map),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Insert a value, returning the previous one for that key.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.lock().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.lock().clone()
    }

    /// Run `f` with exclusive access to the map. Keep `f` short; the lock is
    /// held for its whole duration.
    pub fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.lock())
    }

    // A handler that panicked mid-update leaves the map usable.
    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A payload with an owned type name and a data bag.
#[derive(Debug)]
pub struct SimplePayload {
    payload_type: String,
    data: DataBag,
}

impl SimplePayload {
    pub fn new(payload_type: impl Into<String>) -> Self {
        Self {
            payload_type: payload_type.into(),
            data: DataBag::new(),
        }
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key, value);
        self
    }

    pub fn with_data(self, map: Map<String, Value>) -> Self {
        self.data.update(|entries| entries.extend(map));
        self
    }

    pub fn shared(self) -> SharedPayload {
        Arc::new(self)
    }
}

impl Payload for SimplePayload {
    fn payload_type(&self) -> &str {
        &self.payload_type
    }

    fn data(&self) -> &DataBag {
        &self.data
    }
}
