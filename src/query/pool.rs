use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::query::{QueryListener, QuerySignature};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PoolKey {
    collection: String,
    query: QuerySignature,
}

impl PoolKey {
    fn new(collection: &str, query: &QuerySignature) -> Self {
        Self {
            collection: collection.to_owned(),
            query: query.clone(),
        }
    }
}

/// Session-wide registry guaranteeing at most one live listener per
/// `(collection, query)`.
#[derive(Clone, Default)]
pub struct QueryListenerPool {
    inner: Rc<PoolInner>,
}

#[derive(Default)]
pub(crate) struct PoolInner {
    listeners: RefCell<HashMap<PoolKey, QueryListener>>,
}

impl QueryListenerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the listener registered for the key, building and
    /// registering one with `factory` on a miss.
    ///
    /// `factory` runs while the pool is borrowed and must not call back
    /// into it.
    pub fn lookup<F>(&self, collection: &str, query: &QuerySignature, factory: F) -> QueryListener
    where
        F: FnOnce() -> QueryListener,
    {
        self.inner
            .listeners
            .borrow_mut()
            .entry(PoolKey::new(collection, query))
            .or_insert_with(factory)
            .clone()
    }

    pub fn get(&self, collection: &str, query: &QuerySignature) -> Option<QueryListener> {
        self.inner
            .listeners
            .borrow()
            .get(&PoolKey::new(collection, query))
            .cloned()
    }

    /// Deletes the entry for the key; missing keys are ignored.
    pub fn remove(&self, collection: &str, query: &QuerySignature) -> Option<QueryListener> {
        self.inner
            .listeners
            .borrow_mut()
            .remove(&PoolKey::new(collection, query))
    }

    pub fn contains(&self, collection: &str, query: &QuerySignature) -> bool {
        self.inner
            .listeners
            .borrow()
            .contains_key(&PoolKey::new(collection, query))
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.listeners.borrow().is_empty()
    }

    /// Removes `listener` only if it is still the registered instance.
    pub(crate) fn release(&self, listener: &QueryListener) {
        let key = PoolKey::new(listener.collection(), listener.query());
        let removed = {
            let mut listeners = self.inner.listeners.borrow_mut();
            match listeners.get(&key) {
                Some(registered) if registered.ptr_eq(listener) => listeners.remove(&key),
                _ => None,
            }
        };
        drop(removed);
    }

    pub(crate) fn downgrade(&self) -> Weak<PoolInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<PoolInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}
