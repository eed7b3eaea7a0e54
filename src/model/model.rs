use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use crate::reactive::{Dependency, ReactiveContext};

/// Identifier read from a row's `_id` field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelId {
    Int(i64),
    Text(String),
}

impl ModelId {
    /// Integers and strings are valid identifiers; anything else is not.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(ModelId::Text(text.clone())),
            Value::Number(number) => number.as_i64().map(ModelId::Int),
            _ => None,
        }
    }

    pub fn from_row(row: &Value) -> Option<Self> {
        row.get("_id").and_then(Self::from_value)
    }

    pub fn to_value(&self) -> Value {
        match self {
            ModelId::Int(id) => Value::from(*id),
            ModelId::Text(id) => Value::from(id.as_str()),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::Int(id) => write!(f, "{id}"),
            ModelId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ModelId {
    fn from(id: i64) -> Self {
        ModelId::Int(id)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        ModelId::Text(id.to_owned())
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        ModelId::Text(id)
    }
}

/// A row materialized as a reactive record.
///
/// Attribute reads register a dependency on the model; writes that
/// actually change something notify every reader.
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

pub(crate) struct ModelInner {
    id: ModelId,
    attributes: RefCell<Map<String, Value>>,
    dependency: Dependency,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.inner.id)
            .field("attributes", &self.inner.attributes.borrow())
            .finish()
    }
}

impl Model {
    pub fn new(context: &ReactiveContext, id: ModelId, mut attributes: Map<String, Value>) -> Self {
        attributes.insert("_id".to_owned(), id.to_value());
        Self {
            inner: Rc::new(ModelInner {
                id,
                attributes: RefCell::new(attributes),
                dependency: Dependency::new(context),
            }),
        }
    }

    /// Builds a model from an object row carrying an `_id`.
    pub fn from_row(context: &ReactiveContext, row: Value) -> Option<Self> {
        let id = ModelId::from_row(&row)?;
        match row {
            Value::Object(attributes) => Some(Self::new(context, id, attributes)),
            _ => None,
        }
    }

    pub fn id(&self) -> &ModelId {
        &self.inner.id
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.dependency.depend();
        self.inner.attributes.borrow().get(field).cloned()
    }

    pub fn attributes(&self) -> Map<String, Value> {
        self.inner.dependency.depend();
        self.inner.attributes.borrow().clone()
    }

    /// Untracked snapshot of the attributes as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.inner.attributes.borrow().clone())
    }

    pub fn set(&self, field: &str, value: Value) -> bool {
        let mut data = Map::new();
        data.insert(field.to_owned(), value);
        self.merge(&data)
    }

    /// Overwrites the given fields. `_id` is never replaced. Returns
    /// whether anything changed.
    pub fn merge(&self, data: &Map<String, Value>) -> bool {
        let changed = {
            let mut attributes = self.inner.attributes.borrow_mut();
            let mut changed = false;
            for (field, value) in data {
                if field == "_id" || attributes.get(field) == Some(value) {
                    continue;
                }
                attributes.insert(field.clone(), value.clone());
                changed = true;
            }
            changed
        };
        if changed {
            self.inner.dependency.changed();
        }
        changed
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<ModelInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<ModelInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

/// Builds the model for a freshly seen row.
pub type ModelFactory = Rc<dyn Fn(&ReactiveContext, ModelId, Map<String, Value>) -> Model>;

pub fn default_model_factory() -> ModelFactory {
    Rc::new(Model::new)
}
