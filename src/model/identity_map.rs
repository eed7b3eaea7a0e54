use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::model::model::ModelInner;
use crate::model::{Model, ModelId};

/// Per-session cache so a row seen by several collections materializes
/// as one shared [`Model`]. Entries are weak; a model lives as long as
/// some collection holds it.
#[derive(Clone, Default)]
pub struct IdentityMap {
    entries: Rc<RefCell<HashMap<ModelId, Weak<ModelInner>>>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ModelId) -> Option<Model> {
        self.entries.borrow().get(id).and_then(Model::from_weak)
    }

    /// Returns the live model for `id`, or registers the one built by
    /// `build`.
    pub fn find_or_insert_with<F>(&self, id: &ModelId, build: F) -> Model
    where
        F: FnOnce() -> Model,
    {
        if let Some(model) = self.get(id) {
            return model;
        }
        let model = build();
        let mut entries = self.entries.borrow_mut();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.insert(id.clone(), model.downgrade());
        model
    }

    /// Number of models still alive.
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveContext;
    use serde_json::Map;

    #[test]
    fn shares_live_models() {
        let context = ReactiveContext::new();
        let map = IdentityMap::new();
        let id = ModelId::from(7);

        let first = map.find_or_insert_with(&id, || Model::new(&context, id.clone(), Map::new()));
        let second = map.find_or_insert_with(&id, || panic!("model should be reused"));
        assert!(first.ptr_eq(&second));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn dropped_models_are_rebuilt() {
        let context = ReactiveContext::new();
        let map = IdentityMap::new();
        let id = ModelId::from("a");

        drop(map.find_or_insert_with(&id, || Model::new(&context, id.clone(), Map::new())));
        assert!(map.get(&id).is_none());
        assert!(map.is_empty());
    }
}
