use serde_json::{Map, Value};

use crate::error::{unsupported, LiveResult};
use crate::store::{ArrayStore, BoundCollection, FetchPromise, ReactiveQuery, StoreState};

/// Persistence strategy behind a [`BoundCollection`].
///
/// Query-shaped operations only exist for store-backed collections; the
/// local strategy reports them as unsupported.
#[derive(Clone, Debug)]
pub enum Persistor {
    Store(ArrayStore),
    Local,
}

impl Persistor {
    pub fn as_store(&self) -> Option<&ArrayStore> {
        match self {
            Persistor::Store(store) => Some(store),
            Persistor::Local => None,
        }
    }

    pub fn load_data(&self) {
        if let Persistor::Store(store) = self {
            store.load_data();
        }
    }

    /// Local collections are always loaded.
    pub fn state(&self) -> StoreState {
        match self {
            Persistor::Store(store) => store.state(),
            Persistor::Local => StoreState::Loaded,
        }
    }

    pub fn event_added(&self, first: bool) {
        if let Persistor::Store(store) = self {
            store.event_added(first);
        }
    }

    pub fn event_removed(&self, last: bool) {
        if let Persistor::Store(store) = self {
            store.event_removed(last);
        }
    }

    pub fn find(
        &self,
        query: Option<Map<String, Value>>,
        reactive: Option<ReactiveQuery>,
    ) -> LiveResult<BoundCollection> {
        self.store("find")?.find(query, reactive)
    }

    pub fn limit(&self, limit: u64) -> LiveResult<BoundCollection> {
        Ok(self.store("limit")?.limit(limit))
    }

    pub fn skip(&self, skip: u64) -> LiveResult<BoundCollection> {
        Ok(self.store("skip")?.skip(skip))
    }

    pub fn fetch(&self) -> LiveResult<FetchPromise> {
        Ok(self.store("fetch")?.fetch())
    }

    pub fn unload_data(&self) -> LiveResult<()> {
        self.store("unload_data")?.unload_data();
        Ok(())
    }

    fn store(&self, operation: &str) -> LiveResult<&ArrayStore> {
        self.as_store().ok_or_else(|| unsupported(operation))
    }
}
