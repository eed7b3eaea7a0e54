use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::{invalid_argument, unsupported, LiveResult};
use crate::model::{ArrayModel, CollectionEvent, Model, ModelId};
use crate::reactive::ReactiveContext;
use crate::session::Session;
use crate::store::{ArrayStore, FetchPromise, Persistor, ReactiveQuery, StoreOptions, StoreState};

/// A reactive list of models together with its persistence strategy.
///
/// Reading a store-backed collection (`len`, `get`, `to_vec`, ...) starts
/// loading it; inside a computation the read also subscribes to the
/// list, so the computation re-runs as rows arrive.
#[derive(Clone)]
pub struct BoundCollection {
    model: ArrayModel,
    persistor: Persistor,
    context: ReactiveContext,
}

impl fmt::Debug for BoundCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCollection")
            .field("persistor", &self.persistor)
            .field("rows", &self.model.len_untracked())
            .finish()
    }
}

impl BoundCollection {
    /// Collection kept only in memory.
    pub fn local(context: &ReactiveContext) -> Self {
        Self {
            model: ArrayModel::new(context),
            persistor: Persistor::Local,
            context: context.clone(),
        }
    }

    /// Collection synchronized with a remote query.
    pub fn remote(session: &Session, options: StoreOptions) -> Self {
        let model = ArrayModel::new(session.context());
        let store = ArrayStore::new(session, model.clone(), options);
        Self {
            model,
            persistor: Persistor::Store(store),
            context: session.context().clone(),
        }
    }

    pub fn persistor(&self) -> &Persistor {
        &self.persistor
    }

    pub fn store(&self) -> Option<&ArrayStore> {
        self.persistor.as_store()
    }

    /// The underlying list, read without triggering a load.
    pub fn model(&self) -> &ArrayModel {
        &self.model
    }

    pub fn state(&self) -> StoreState {
        self.persistor.state()
    }

    pub fn len(&self) -> usize {
        self.persistor.load_data();
        self.model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Model> {
        self.persistor.load_data();
        self.model.get(index)
    }

    pub fn first(&self) -> Option<Model> {
        self.get(0)
    }

    pub fn last(&self) -> Option<Model> {
        self.persistor.load_data();
        let len = self.model.len();
        len.checked_sub(1).and_then(|index| self.model.get(index))
    }

    pub fn to_vec(&self) -> Vec<Model> {
        self.persistor.load_data();
        self.model.to_vec()
    }

    pub fn find(&self, filter: Map<String, Value>) -> LiveResult<Self> {
        self.persistor.find(Some(filter), None)
    }

    pub fn find_reactive<F>(&self, query: F) -> LiveResult<Self>
    where
        F: Fn() -> Map<String, Value> + 'static,
    {
        self.persistor.find(None, Some(Rc::new(query)))
    }

    /// Accepts either query form; passing both is an error.
    pub fn find_with(
        &self,
        query: Option<Map<String, Value>>,
        reactive: Option<ReactiveQuery>,
    ) -> LiveResult<Self> {
        self.persistor.find(query, reactive)
    }

    pub fn limit(&self, limit: u64) -> LiveResult<Self> {
        self.persistor.limit(limit)
    }

    pub fn skip(&self, skip: u64) -> LiveResult<Self> {
        self.persistor.skip(skip)
    }

    /// First model matching `filter`; `None` until the query has loaded.
    pub fn find_one(&self, filter: Map<String, Value>) -> LiveResult<Option<Model>> {
        Ok(self.find(filter)?.limit(1)?.first())
    }

    pub fn fetch(&self) -> LiveResult<FetchPromise> {
        self.persistor.fetch()
    }

    pub fn unload_data(&self) -> LiveResult<()> {
        self.persistor.unload_data()
    }

    /// Adds a model to a local collection. Rows of store-backed
    /// collections come from the backend only.
    pub fn append(&self, attributes: Map<String, Value>) -> LiveResult<Model> {
        if self.store().is_some() {
            return Err(unsupported("append"));
        }
        let id = attributes
            .get("_id")
            .and_then(ModelId::from_value)
            .ok_or_else(|| invalid_argument("local rows need an integer or string `_id`"))?;
        let model = Model::new(&self.context, id, attributes);
        self.model.push(model.clone());
        Ok(model)
    }

    /// Registers `callback` for list changes. The first registration keeps
    /// a store-backed collection loaded until the last one is dropped.
    pub fn on<F>(&self, callback: F) -> EventRegistration
    where
        F: Fn(&CollectionEvent) + 'static,
    {
        let first = self.model.callback_count() == 0;
        let id = self.model.add_callback(Rc::new(callback));
        self.persistor.event_added(first);
        EventRegistration {
            collection: self.clone(),
            id: Some(id),
        }
    }
}

/// Keeps an event callback registered until detached or dropped.
pub struct EventRegistration {
    collection: BoundCollection,
    id: Option<u64>,
}

impl EventRegistration {
    pub fn detach(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let model = &self.collection.model;
        if model.remove_callback(id) && model.callback_count() == 0 {
            self.collection.persistor.event_removed(true);
        }
    }
}

impl Drop for EventRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}
