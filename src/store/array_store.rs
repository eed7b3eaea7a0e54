use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::LazyLock;

use serde_json::{Map, Value};

use crate::error::{invalid_argument, LiveError, LiveResult};
use crate::logger::Logger;
use crate::model::{ArrayModel, Model, ModelId};
use crate::query::{QueryListener, QuerySignature};
use crate::reactive::{Computation, Dependency};
use crate::session::Session;
use crate::store::collection::BoundCollection;
use crate::store::fetch::{FetchPromise, FetchSender};
use crate::store::StoreState;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@livebind/store"));

/// Filter recomputed whenever the reactive values it reads change.
pub type ReactiveQuery = Rc<dyn Fn() -> Map<String, Value>>;

#[derive(Clone)]
pub enum QuerySource {
    Static(Map<String, Value>),
    Reactive(ReactiveQuery),
}

impl Default for QuerySource {
    fn default() -> Self {
        QuerySource::Static(Map::new())
    }
}

impl fmt::Debug for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerySource::Static(filter) => f.debug_tuple("Static").field(filter).finish(),
            QuerySource::Reactive(_) => f.write_str("Reactive(..)"),
        }
    }
}

/// Restricts a collection to the children of one parent record.
#[derive(Clone, Debug, PartialEq)]
pub struct ParentScope {
    pub field: String,
    pub id: Value,
}

#[derive(Clone, Debug, Default)]
pub struct StoreOptions {
    pub collection: String,
    pub query: QuerySource,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub parent_scope: Option<ParentScope>,
}

impl StoreOptions {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }
}

/// Keeps one [`ArrayModel`] in sync with a remote query.
///
/// Loading is lazy: the store attaches to a pooled [`QueryListener`] the
/// first time something reads the collection, fetches it, or registers
/// an event callback, and detaches once nothing needs live data.
#[derive(Clone)]
pub struct ArrayStore {
    inner: Rc<StoreInner>,
}

struct StoreInner {
    session: Session,
    model: ArrayModel,
    options: StoreOptions,
    state: Cell<StoreState>,
    state_dependency: Dependency,
    fetch_promises: RefCell<Vec<FetchSender>>,
    query_listener: RefCell<Option<QueryListener>>,
    query_computation: RefCell<Option<Computation>>,
    has_events: Cell<bool>,
}

impl fmt::Debug for ArrayStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayStore")
            .field("collection", &self.inner.options.collection)
            .field("state", &self.inner.state.get())
            .field("rows", &self.inner.model.len_untracked())
            .field("has_events", &self.inner.has_events.get())
            .finish()
    }
}

impl ArrayStore {
    pub fn new(session: &Session, model: ArrayModel, options: StoreOptions) -> Self {
        let store = Self {
            inner: Rc::new(StoreInner {
                session: session.clone(),
                state_dependency: Dependency::new(session.context()),
                model,
                options,
                state: Cell::new(StoreState::NotLoaded),
                fetch_promises: RefCell::new(Vec::new()),
                query_listener: RefCell::new(None),
                query_computation: RefCell::new(None),
                has_events: Cell::new(false),
            }),
        };

        let weak = Rc::downgrade(&store.inner);
        let unobserved = move || {
            if let Some(store) = ArrayStore::from_weak(&weak) {
                store.unobserved();
            }
        };
        store.inner.model.on_unobserved(unobserved.clone());
        store.inner.state_dependency.on_unobserved(unobserved);
        store
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub fn model(&self) -> &ArrayModel {
        &self.inner.model
    }

    /// Current state; reading it inside a computation subscribes to
    /// state changes.
    pub fn state(&self) -> StoreState {
        self.inner.state_dependency.depend();
        self.inner.state.get()
    }

    pub fn state_untracked(&self) -> StoreState {
        self.inner.state.get()
    }

    pub fn listener(&self) -> Option<QueryListener> {
        self.inner.query_listener.borrow().clone()
    }

    pub fn has_events(&self) -> bool {
        self.inner.has_events.get()
    }

    pub fn pending_fetches(&self) -> usize {
        self.inner.fetch_promises.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Starts loading if the store is `NotLoaded` or `Dirty`, or if it is
    /// still `Loading` from a subscription that failed.
    ///
    /// With a reactive query the attach step runs inside a computation,
    /// so a change to anything the query read detaches the store and
    /// re-attaches it to the listener for the new query.
    pub fn load_data(&self) {
        if !self.inner.state.get().can_load() && !self.subscription_lost() {
            return;
        }
        let context = self.inner.session.context().clone();
        context.run_without_tracking(|| self.start_loading());
    }

    fn start_loading(&self) {
        self.detach_listener();
        self.change_state_to(StoreState::Loading);

        match self.inner.options.query.clone() {
            QuerySource::Static(filter) => self.run_query(filter),
            QuerySource::Reactive(query) => {
                let previous = self.inner.query_computation.borrow_mut().take();
                if let Some(previous) = previous {
                    previous.stop();
                }
                let context = self.inner.session.context();
                let weak = Rc::downgrade(&self.inner);
                let cx = context.clone();
                let _computation = context.autorun(move || {
                    let Some(store) = ArrayStore::from_weak(&weak) else {
                        return;
                    };
                    {
                        let mut slot = store.inner.query_computation.borrow_mut();
                        if slot.is_none() {
                            *slot = cx.current();
                        }
                    }
                    cx.run_without_tracking(|| {
                        store.detach_listener();
                        store.change_state_to(StoreState::Loading);
                    });
                    let filter = query();
                    cx.run_without_tracking(|| store.run_query(filter));
                });
            }
        }
    }

    /// Clears the rows and attaches to the listener for `filter`.
    pub fn run_query(&self, mut filter: Map<String, Value>) {
        self.inner.model.clear();
        let options = &self.inner.options;
        if let Some(scope) = &options.parent_scope {
            filter.insert(scope.field.clone(), scope.id.clone());
        }
        let query = QuerySignature::new(filter, options.skip, options.limit);
        let collection = options.collection.as_str();

        let session = &self.inner.session;
        let pool = session.pool();
        let listener = pool.lookup(collection, &query, || {
            QueryListener::new(
                pool,
                session.transport(),
                session.spawner(),
                collection,
                query.clone(),
            )
        });
        *self.inner.query_listener.borrow_mut() = Some(listener.clone());
        listener.add_store(self);
    }

    /// Moves to `new_state`. Reaching `Loaded` resolves pending fetches
    /// with a snapshot and, if there were any, lets the store stop
    /// listening.
    pub fn change_state_to(&self, new_state: StoreState) {
        let previous = self.inner.state.replace(new_state);
        if previous != new_state {
            self.inner.state_dependency.changed();
        }
        if new_state != StoreState::Loaded {
            return;
        }
        let promises = std::mem::take(&mut *self.inner.fetch_promises.borrow_mut());
        if promises.is_empty() {
            return;
        }
        let snapshot = self.inner.model.snapshot_untracked();
        for promise in promises {
            self.settle(promise, Ok(snapshot.clone()));
        }
        self.stop_listening(true);
    }

    /// Detaches from the listener and marks the rows `Dirty`, unless event
    /// callbacks or pending fetches still need live data. With
    /// `stop_watching_query` the reactive query computation is stopped
    /// too.
    pub fn stop_listening(&self, stop_watching_query: bool) {
        if self.inner.has_events.get() || !self.inner.fetch_promises.borrow().is_empty() {
            return;
        }
        if stop_watching_query {
            let computation = self.inner.query_computation.borrow_mut().take();
            if let Some(computation) = computation {
                computation.stop();
            }
        }
        self.detach_listener();
        self.inner.state.set(StoreState::Dirty);
    }

    /// Resolves with the rows once loaded, starting a load if needed.
    pub fn fetch(&self) -> FetchPromise {
        let (sender, promise) = FetchPromise::channel();
        if self.inner.state.get() == StoreState::Loaded {
            self.settle(sender, Ok(self.inner.model.snapshot_untracked()));
        } else {
            self.inner.fetch_promises.borrow_mut().push(sender);
            self.load_data();
        }
        promise
    }

    pub fn event_added(&self, first: bool) {
        if first {
            self.inner.has_events.set(true);
            self.load_data();
        }
    }

    pub fn event_removed(&self, last: bool) {
        if last {
            self.inner.has_events.set(false);
            self.stop_listening(true);
        }
    }

    /// Forgets the rows, detaches from the listener and returns to
    /// `NotLoaded`. The next read loads from scratch.
    pub fn unload_data(&self) {
        let computation = self.inner.query_computation.borrow_mut().take();
        if let Some(computation) = computation {
            computation.stop();
        }
        self.detach_listener();
        self.change_state_to(StoreState::NotLoaded);
        self.inner.model.clear();
    }

    /// Inserts a remote row at `index` unless a model with the same id is
    /// already present.
    pub fn add(&self, index: usize, data: Value) {
        let Some(id) = ModelId::from_row(&data) else {
            LOGGER.error(format!(
                "ignoring row without a usable `_id` in {}: {data}",
                self.inner.options.collection
            ));
            return;
        };
        if self.inner.model.position_untracked(&id).is_some() {
            return;
        }
        let Value::Object(attributes) = data else {
            return;
        };
        let session = &self.inner.session;
        let model = session.identity_map().find_or_insert_with(&id, || {
            (session.model_factory())(session.context(), id.clone(), attributes)
        });
        self.inner.model.insert(index, model);
    }

    pub fn remove(&self, ids: &[Value]) {
        for id in ids.iter().filter_map(ModelId::from_value) {
            if let Some(index) = self.inner.model.position_untracked(&id) {
                self.inner.model.delete_at(index);
            }
        }
    }

    /// Merges `data` into the model with `id`; unknown ids are ignored.
    pub fn change(&self, id: &Value, data: &Value) {
        let Some(id) = ModelId::from_value(id) else {
            return;
        };
        let Some(model) = self
            .inner
            .model
            .position_untracked(&id)
            .and_then(|index| self.inner.model.get_untracked(index))
        else {
            return;
        };
        if let Value::Object(attributes) = data {
            model.merge(attributes);
        }
        self.inner.model.notify_changed(&model);
    }

    /// Untracked copy of the rows, used to replay into a joining store.
    pub fn rows_snapshot(&self) -> Vec<Value> {
        self.inner
            .model
            .snapshot_untracked()
            .iter()
            .map(Model::to_value)
            .collect()
    }

    pub fn clear_rows(&self) {
        self.inner.model.clear();
    }

    /// Rejects pending fetches; state and rows are left as they are.
    pub fn subscription_failed(&self, err: &LiveError) {
        let promises = std::mem::take(&mut *self.inner.fetch_promises.borrow_mut());
        for promise in promises {
            self.settle(promise, Err(err.clone()));
        }
    }

    /// New collection over the same source with its query replaced.
    ///
    /// Supplying both a plain and a reactive query is rejected.
    pub fn find(
        &self,
        query: Option<Map<String, Value>>,
        reactive: Option<ReactiveQuery>,
    ) -> LiveResult<BoundCollection> {
        let source = match (query, reactive) {
            (Some(_), Some(_)) => {
                return Err(invalid_argument(
                    "a plain query cannot be combined with a reactive query",
                ))
            }
            (None, Some(reactive)) => QuerySource::Reactive(reactive),
            (Some(query), None) => QuerySource::Static(query),
            (None, None) => QuerySource::Static(Map::new()),
        };
        Ok(self.derive(|options| options.query = source))
    }

    pub fn limit(&self, limit: u64) -> BoundCollection {
        self.derive(|options| options.limit = Some(limit))
    }

    pub fn skip(&self, skip: u64) -> BoundCollection {
        self.derive(|options| options.skip = Some(skip))
    }

    fn derive(&self, update: impl FnOnce(&mut StoreOptions)) -> BoundCollection {
        let mut options = self.inner.options.clone();
        update(&mut options);
        BoundCollection::remote(&self.inner.session, options)
    }

    fn settle(&self, promise: FetchSender, result: LiveResult<Vec<Model>>) {
        if promise.send(result).is_err() {
            log::debug!(
                "fetch on {} was dropped before it resolved",
                self.inner.options.collection
            );
        }
    }

    /// True while `Loading` against a listener whose subscription failed.
    fn subscription_lost(&self) -> bool {
        self.inner.state.get() == StoreState::Loading
            && self
                .inner
                .query_listener
                .borrow()
                .as_ref()
                .is_some_and(|listener| !listener.is_listening())
    }

    /// Called when the last computation reading the rows or the state
    /// drops out. The check waits for pending recomputes, which usually
    /// read the store again.
    fn unobserved(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.session.context().after_flush(move || {
            if let Some(store) = ArrayStore::from_weak(&weak) {
                store.release_if_unobserved();
            }
        });
    }

    fn release_if_unobserved(&self) {
        if !matches!(
            self.inner.state.get(),
            StoreState::Loading | StoreState::Loaded
        ) {
            return;
        }
        if self.inner.model.is_observed() || self.inner.state_dependency.has_dependents() {
            return;
        }
        log::debug!(
            "{} is no longer observed",
            self.inner.options.collection
        );
        self.stop_listening(true);
    }

    fn detach_listener(&self) {
        let listener = self.inner.query_listener.borrow_mut().take();
        if let Some(listener) = listener {
            listener.remove_store(self);
        }
    }

    fn from_weak(weak: &Weak<StoreInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MemoryTransport;
    use serde_json::json;

    fn store(session: &Session) -> ArrayStore {
        ArrayStore::new(
            session,
            ArrayModel::new(session.context()),
            StoreOptions::new("tasks"),
        )
    }

    fn ids(store: &ArrayStore) -> Vec<ModelId> {
        store
            .model()
            .snapshot_untracked()
            .iter()
            .map(|model| model.id().clone())
            .collect()
    }

    #[test]
    fn add_skips_duplicates_and_rows_without_id() {
        let session = Session::new(Rc::new(MemoryTransport::new()));
        let store = store(&session);

        store.add(0, json!({"_id": 1, "title": "a"}));
        store.add(1, json!({"_id": 1, "title": "again"}));
        store.add(1, json!({"title": "anonymous"}));
        store.add(0, json!({"_id": "b"}));

        assert_eq!(ids(&store), vec![ModelId::from("b"), ModelId::from(1)]);
    }

    #[test]
    fn change_and_remove_update_rows_in_place() {
        let session = Session::new(Rc::new(MemoryTransport::new()));
        let store = store(&session);
        store.add(0, json!({"_id": 1, "status": "open"}));
        store.add(1, json!({"_id": 2, "status": "open"}));

        store.change(&json!(2), &json!({"status": "done"}));
        store.change(&json!(9), &json!({"status": "lost"}));
        let second = store.model().get_untracked(1).unwrap();
        assert_eq!(second.get("status"), Some(json!("done")));

        store.remove(&[json!(1), json!(9)]);
        assert_eq!(ids(&store), vec![ModelId::from(2)]);
    }

    #[test]
    fn reaching_loaded_resolves_fetches_and_releases() {
        let session = Session::new(Rc::new(MemoryTransport::new()));
        let store = store(&session);
        let mut fetch = store.fetch();
        assert_eq!(store.state_untracked(), StoreState::Loading);
        assert!(fetch.try_take().is_none());
        assert!(store.listener().is_some());

        store.add(0, json!({"_id": 7}));
        store.change_state_to(StoreState::Loaded);

        let rows = fetch.try_take().unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.pending_fetches(), 0);
        assert_eq!(store.state_untracked(), StoreState::Dirty);
        assert!(store.listener().is_none());
    }

    #[test]
    fn dropped_fetch_does_not_block_loading() {
        let session = Session::new(Rc::new(MemoryTransport::new()));
        let store = store(&session);
        drop(store.fetch());
        store.change_state_to(StoreState::Loaded);
        assert_eq!(store.pending_fetches(), 0);
    }

    #[test]
    fn unload_detaches_from_listener() {
        let session = Session::new(Rc::new(MemoryTransport::new()));
        let store = store(&session);
        store.event_added(true);
        let listener = store.listener().unwrap();
        assert!(listener.has_store(&store));

        store.unload_data();
        assert_eq!(store.state_untracked(), StoreState::NotLoaded);
        assert!(store.listener().is_none());
        assert!(!listener.has_store(&store));
        assert!(session.pool().is_empty());
    }

    #[test]
    fn stopped_reader_releases_the_store() {
        let session = Session::new(Rc::new(MemoryTransport::new()));
        let store = store(&session);
        let reader = store.clone();
        let view = session.context().autorun(move || {
            reader.load_data();
            reader.model().len();
        });
        assert_eq!(store.state_untracked(), StoreState::Loading);
        assert!(store.model().is_observed());

        view.stop();
        assert_eq!(store.state_untracked(), StoreState::Dirty);
        assert!(store.listener().is_none());
    }
}
