//! Connection-scoped typed attributes.
//!
//! Each connection owns one [`AttributeMap`]. Handlers reach it through
//! [`NetworkContext::attr`](crate::NetworkContext::attr) with a typed
//! [`AttributeKey`]. Every single operation is synchronised; sequences of
//! operations are not, so callers that need read-modify-write atomicity
//! must synchronise externally.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slot = Arc<dyn Any + Send + Sync>;

/// Typed key naming one attribute slot.
pub struct AttributeKey<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

/// Per-connection attribute storage.
#[derive(Default)]
pub struct AttributeMap {
    slots: Mutex<HashMap<&'static str, Slot>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<&'static str, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.slots().keys().copied().collect();
        keys.sort_unstable();
        f.debug_struct("AttributeMap").field("keys", &keys).finish()
    }
}

/// Handle to one typed slot of a connection's attribute map.
///
/// A slot holding a value of another type reads as absent.
pub struct Attribute<T> {
    map: Arc<AttributeMap>,
    key: AttributeKey<T>,
}

impl<T: Clone + Send + Sync + 'static> Attribute<T> {
    pub(crate) fn new(map: Arc<AttributeMap>, key: AttributeKey<T>) -> Self {
        Self { map, key }
    }

    pub fn key(&self) -> AttributeKey<T> {
        self.key
    }

    pub fn get(&self) -> Option<T> {
        self.map
            .slots()
            .get(self.key.name)
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    pub fn set(&self, value: T) {
        self.map.slots().insert(self.key.name, Arc::new(value));
    }

    /// Store `value` and return the previous value.
    pub fn get_and_set(&self, value: T) -> Option<T> {
        let previous = self.map.slots().insert(self.key.name, Arc::new(value));
        previous.and_then(|slot| slot.downcast_ref::<T>().cloned())
    }

    /// Store `value` unless a value of this type is present.
    ///
    /// Returns the present value, or `None` if `value` was stored.
    pub fn set_if_absent(&self, value: T) -> Option<T> {
        let mut slots = self.map.slots();
        if let Some(existing) = slots.get(self.key.name).and_then(|s| s.downcast_ref::<T>()) {
            return Some(existing.clone());
        }
        slots.insert(self.key.name, Arc::new(value));
        None
    }

    pub fn remove(&self) -> Option<T> {
        self.map
            .slots()
            .remove(self.key.name)
            .and_then(|slot| slot.downcast_ref::<T>().cloned())
    }
}

impl<T> fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute").field("key", &self.key).finish()
    }
}
