use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::LazyLock;

use futures::FutureExt;
use serde_json::Value;

use crate::error::{LiveError, LiveResult};
use crate::logger::Logger;
use crate::platform::runtime::TaskSpawner;
use crate::query::pool::PoolInner;
use crate::query::{InitialResults, QueryListenerPool, QuerySignature, QueryTransport, RemoteEvent};
use crate::store::{ArrayStore, StoreState};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@livebind/query"));

/// One remote subscription shared by every store asking the same query.
///
/// The listener subscribes when its first store attaches, replays the
/// loaded rows to stores that join later, and unsubscribes (and leaves
/// the pool) when its last store detaches.
#[derive(Clone)]
pub struct QueryListener {
    inner: Rc<ListenerInner>,
}

struct ListenerInner {
    collection: String,
    query: QuerySignature,
    pool: Weak<PoolInner>,
    transport: Rc<dyn QueryTransport>,
    spawner: Rc<dyn TaskSpawner>,
    stores: RefCell<Vec<ArrayStore>>,
    listening: Cell<bool>,
    loaded: Cell<bool>,
    // Bumped on every subscribe and teardown so late completions are dropped.
    generation: Cell<u64>,
}

impl fmt::Debug for QueryListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryListener")
            .field("collection", &self.inner.collection)
            .field("query", &self.inner.query)
            .field("stores", &self.store_count())
            .field("listening", &self.is_listening())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl QueryListener {
    pub fn new(
        pool: &QueryListenerPool,
        transport: Rc<dyn QueryTransport>,
        spawner: Rc<dyn TaskSpawner>,
        collection: &str,
        query: QuerySignature,
    ) -> Self {
        Self {
            inner: Rc::new(ListenerInner {
                collection: collection.to_owned(),
                query,
                pool: pool.downgrade(),
                transport,
                spawner,
                stores: RefCell::new(Vec::new()),
                listening: Cell::new(false),
                loaded: Cell::new(false),
                generation: Cell::new(0),
            }),
        }
    }

    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    pub fn query(&self) -> &QuerySignature {
        &self.inner.query
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.get()
    }

    /// True once the initial batch of the current subscription arrived.
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.get()
    }

    pub fn store_count(&self) -> usize {
        self.inner.stores.borrow().len()
    }

    pub fn has_store(&self, store: &ArrayStore) -> bool {
        self.inner.stores.borrow().iter().any(|s| s.ptr_eq(store))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attaches `store`; attaching twice is a no-op.
    ///
    /// A store joining a loaded subscription receives a copy of the rows
    /// held by an existing store and is marked loaded right away. A store
    /// joining while the first batch is still in flight waits for it.
    pub fn add_store(&self, store: &ArrayStore) {
        {
            let mut stores = self.inner.stores.borrow_mut();
            if stores.iter().any(|s| s.ptr_eq(store)) {
                return;
            }
            stores.push(store.clone());
        }

        if !self.is_listening() {
            self.add_listener();
            return;
        }
        if self.is_loaded() {
            let source = self.stores().into_iter().find(|s| !s.ptr_eq(store));
            let rows = source.map(|s| s.rows_snapshot()).unwrap_or_default();
            store.clear_rows();
            for (index, row) in rows.into_iter().enumerate() {
                store.add(index, row);
            }
            store.change_state_to(StoreState::Loaded);
        }
    }

    /// Detaches `store`. Detaching a store that is not attached is a no-op.
    pub fn remove_store(&self, store: &ArrayStore) {
        let now_empty = {
            let mut stores = self.inner.stores.borrow_mut();
            let before = stores.len();
            stores.retain(|s| !s.ptr_eq(store));
            if stores.len() == before {
                return;
            }
            stores.is_empty()
        };
        if now_empty {
            self.teardown();
        }
    }

    pub fn added(&self, index: usize, data: &Value) {
        for store in self.stores() {
            store.add(index, data.clone());
        }
    }

    pub fn removed(&self, ids: &[Value]) {
        for store in self.stores() {
            store.remove(ids);
        }
    }

    pub fn changed(&self, id: &Value, data: &Value) {
        for store in self.stores() {
            store.change(id, data);
        }
    }

    /// Fans a pushed event out to every attached store.
    pub fn handle(&self, event: &RemoteEvent) {
        match event {
            RemoteEvent::Added { index, data } => self.added(*index, data),
            RemoteEvent::Removed { ids } => self.removed(ids),
            RemoteEvent::Changed { id, data } => self.changed(id, data),
        }
    }

    fn stores(&self) -> Vec<ArrayStore> {
        self.inner.stores.borrow().clone()
    }

    fn next_generation(&self) -> u64 {
        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);
        generation
    }

    fn add_listener(&self) {
        self.inner.listening.set(true);
        self.inner.loaded.set(false);
        let generation = self.next_generation();
        log::debug!(
            "subscribing to {} {}",
            self.inner.collection,
            self.inner.query
        );

        let listener = self.clone();
        let transport = Rc::clone(&self.inner.transport);
        self.inner.spawner.spawn(
            async move {
                let result = transport
                    .add_listener(&listener.inner.collection, &listener.inner.query)
                    .await;
                listener.subscription_settled(generation, result);
            }
            .boxed_local(),
        );
    }

    fn subscription_settled(&self, generation: u64, result: LiveResult<InitialResults>) {
        if !self.is_listening() || self.inner.generation.get() != generation {
            log::debug!(
                "dropping stale subscription result for {} {}",
                self.inner.collection,
                self.inner.query
            );
            return;
        }
        match result {
            Ok(results) => self.initial_batch(results),
            Err(err) => self.subscription_failed(err),
        }
    }

    fn initial_batch(&self, results: InitialResults) {
        if !results.errors.is_empty() {
            LOGGER.warn(format!(
                "initial results for {} {} reported errors: {}",
                self.inner.collection,
                self.inner.query,
                results.errors.join("; ")
            ));
        }
        self.inner.loaded.set(true);
        for store in self.stores() {
            if !self.has_store(&store) {
                continue;
            }
            store.clear_rows();
            for (index, row) in &results.rows {
                store.add(*index, row.clone());
            }
            store.change_state_to(StoreState::Loaded);
        }
    }

    fn subscription_failed(&self, err: LiveError) {
        LOGGER.error(format!(
            "subscribing to {} {} failed: {err}",
            self.inner.collection, self.inner.query
        ));
        self.inner.listening.set(false);
        self.inner.loaded.set(false);
        for store in self.stores() {
            store.subscription_failed(&err);
        }
    }

    fn teardown(&self) {
        if let Some(pool) = QueryListenerPool::from_weak(&self.inner.pool) {
            pool.release(self);
        }
        if !self.inner.listening.replace(false) {
            return;
        }
        self.inner.loaded.set(false);
        self.next_generation();

        let listener = self.clone();
        let transport = Rc::clone(&self.inner.transport);
        self.inner.spawner.spawn(
            async move {
                let collection = &listener.inner.collection;
                let query = &listener.inner.query;
                if let Err(err) = transport.remove_listener(collection, query).await {
                    LOGGER.warn(format!(
                        "unsubscribing from {collection} {query} failed: {err}"
                    ));
                }
            }
            .boxed_local(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::transport_error;
    use crate::model::ArrayModel;
    use crate::query::MemoryTransport;
    use crate::session::Session;
    use crate::store::StoreOptions;
    use serde_json::{json, Map};

    fn fixture() -> (Session, QueryListener) {
        let session = Session::new(Rc::new(MemoryTransport::new()));
        let listener = QueryListener::new(
            session.pool(),
            session.transport(),
            session.spawner(),
            "tasks",
            QuerySignature::new(Map::new(), None, None),
        );
        (session, listener)
    }

    fn store(session: &Session) -> ArrayStore {
        ArrayStore::new(
            session,
            ArrayModel::new(session.context()),
            StoreOptions::new("tasks"),
        )
    }

    fn batch(ids: &[i64]) -> InitialResults {
        InitialResults {
            rows: ids
                .iter()
                .enumerate()
                .map(|(index, id)| (index, json!({ "_id": id })))
                .collect(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn stale_completion_is_dropped() {
        let (session, listener) = fixture();
        let store = store(&session);
        listener.add_store(&store);
        assert!(listener.is_listening());
        let current = listener.inner.generation.get();

        listener.subscription_settled(current - 1, Ok(batch(&[1, 2])));
        assert!(!listener.is_loaded());
        assert_eq!(store.model().len_untracked(), 0);

        listener.subscription_settled(current, Ok(batch(&[1, 2])));
        assert!(listener.is_loaded());
        assert_eq!(store.model().len_untracked(), 2);
        assert_eq!(store.state_untracked(), StoreState::Loaded);
    }

    #[test]
    fn joining_a_loaded_listener_replays_rows() {
        let (session, listener) = fixture();
        let first = store(&session);
        listener.add_store(&first);
        let generation = listener.inner.generation.get();
        listener.subscription_settled(generation, Ok(batch(&[3, 4, 5])));

        let second = store(&session);
        listener.add_store(&second);
        listener.add_store(&second);

        assert_eq!(listener.store_count(), 2);
        assert_eq!(second.model().len_untracked(), 3);
        assert_eq!(second.state_untracked(), StoreState::Loaded);
        assert_eq!(listener.inner.generation.get(), generation);
    }

    #[test]
    fn failure_stops_listening_and_rejects_fetches() {
        let (session, _) = fixture();
        let store = store(&session);
        let mut fetch = store.fetch();
        let pooled = store.listener().unwrap();
        let generation = pooled.inner.generation.get();

        pooled.subscription_settled(generation, Err(transport_error("offline")));
        assert!(!pooled.is_listening());
        assert!(fetch.try_take().unwrap().is_err());
        assert_eq!(store.state_untracked(), StoreState::Loading);
    }

    #[test]
    fn last_detach_leaves_the_pool() {
        let (session, _) = fixture();
        let store = store(&session);
        store.event_added(true);
        let listener = store.listener().unwrap();
        assert_eq!(session.pool().len(), 1);

        listener.remove_store(&store);
        listener.remove_store(&store);
        assert!(session.pool().is_empty());
        assert!(!listener.is_listening());
    }
}
