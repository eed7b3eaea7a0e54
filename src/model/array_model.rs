use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::model::{Model, ModelId};
use crate::reactive::{Dependency, ReactiveContext};

/// Change notification delivered to collection event callbacks.
#[derive(Clone, Debug)]
pub enum CollectionEvent {
    Added { index: usize, model: Model },
    Removed { index: usize, model: Model },
    Changed { model: Model },
}

pub type EventCallback = Rc<dyn Fn(&CollectionEvent)>;

/// Ordered, reactive list of models.
///
/// Public reads register a dependency on the list; the `*_untracked`
/// accessors used by stores and listeners do not.
#[derive(Clone)]
pub struct ArrayModel {
    inner: Rc<ArrayInner>,
}

struct ArrayInner {
    items: RefCell<Vec<Model>>,
    dependency: Dependency,
    callbacks: RefCell<BTreeMap<u64, EventCallback>>,
    next_callback: Cell<u64>,
}

impl fmt::Debug for ArrayModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.items.borrow().iter()).finish()
    }
}

impl ArrayModel {
    pub fn new(context: &ReactiveContext) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                items: RefCell::new(Vec::new()),
                dependency: Dependency::new(context),
                callbacks: RefCell::new(BTreeMap::new()),
                next_callback: Cell::new(0),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.dependency.depend();
        self.len_untracked()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Model> {
        self.inner.dependency.depend();
        self.inner.items.borrow().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<Model> {
        self.inner.dependency.depend();
        self.snapshot_untracked()
    }

    pub fn position(&self, id: &ModelId) -> Option<usize> {
        self.inner.dependency.depend();
        self.position_untracked(id)
    }

    pub fn len_untracked(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn snapshot_untracked(&self) -> Vec<Model> {
        self.inner.items.borrow().clone()
    }

    pub fn position_untracked(&self, id: &ModelId) -> Option<usize> {
        self.inner
            .items
            .borrow()
            .iter()
            .position(|model| model.id() == id)
    }

    pub fn get_untracked(&self, index: usize) -> Option<Model> {
        self.inner.items.borrow().get(index).cloned()
    }

    /// Inserts at `index`, clamped to the current length. Returns the
    /// index actually used.
    pub fn insert(&self, index: usize, model: Model) -> usize {
        let index = {
            let mut items = self.inner.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, model.clone());
            index
        };
        self.inner.dependency.changed();
        self.emit(&CollectionEvent::Added { index, model });
        index
    }

    pub fn push(&self, model: Model) -> usize {
        self.insert(usize::MAX, model)
    }

    pub fn delete_at(&self, index: usize) -> Option<Model> {
        let model = {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.inner.dependency.changed();
        self.emit(&CollectionEvent::Removed {
            index,
            model: model.clone(),
        });
        Some(model)
    }

    /// Removes every model, last to first.
    pub fn clear(&self) {
        let items = std::mem::take(&mut *self.inner.items.borrow_mut());
        if items.is_empty() {
            return;
        }
        self.inner.dependency.changed();
        for (index, model) in items.into_iter().enumerate().rev() {
            self.emit(&CollectionEvent::Removed { index, model });
        }
    }

    pub fn notify_changed(&self, model: &Model) {
        self.emit(&CollectionEvent::Changed {
            model: model.clone(),
        });
    }

    pub(crate) fn add_callback(&self, callback: EventCallback) -> u64 {
        let id = self.inner.next_callback.get();
        self.inner.next_callback.set(id + 1);
        self.inner.callbacks.borrow_mut().insert(id, callback);
        id
    }

    pub(crate) fn remove_callback(&self, id: u64) -> bool {
        self.inner.callbacks.borrow_mut().remove(&id).is_some()
    }

    /// True while some computation depends on the list.
    pub fn is_observed(&self) -> bool {
        self.inner.dependency.has_dependents()
    }

    pub(crate) fn on_unobserved(&self, hook: impl Fn() + 'static) {
        self.inner.dependency.on_unobserved(hook);
    }

    pub fn callback_count(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn emit(&self, event: &CollectionEvent) {
        let callbacks: Vec<EventCallback> =
            self.inner.callbacks.borrow().values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(context: &ReactiveContext, id: i64) -> Model {
        Model::from_row(context, json!({ "_id": id })).unwrap()
    }

    #[test]
    fn insert_clamps_index() {
        let context = ReactiveContext::new();
        let list = ArrayModel::new(&context);
        assert_eq!(list.insert(5, model(&context, 1)), 0);
        assert_eq!(list.insert(0, model(&context, 2)), 0);
        let ids: Vec<_> = list.to_vec().iter().map(|m| m.id().clone()).collect();
        assert_eq!(ids, vec![ModelId::from(2), ModelId::from(1)]);
    }

    #[test]
    fn readers_rerun_on_mutation() {
        let context = ReactiveContext::new();
        let list = ArrayModel::new(&context);
        let lengths = Rc::new(RefCell::new(Vec::new()));

        let (reader, sink) = (list.clone(), lengths.clone());
        let _computation = context.autorun(move || sink.borrow_mut().push(reader.len()));

        list.push(model(&context, 1));
        context.flush().unwrap();
        list.clear();
        context.flush().unwrap();
        assert_eq!(*lengths.borrow(), vec![0, 1, 0]);
    }

    #[test]
    fn untracked_reads_do_not_subscribe() {
        let context = ReactiveContext::new();
        let list = ArrayModel::new(&context);
        let runs = Rc::new(Cell::new(0));

        let (reader, counter) = (list.clone(), runs.clone());
        let _computation = context.autorun(move || {
            reader.len_untracked();
            counter.set(counter.get() + 1);
        });
        list.push(model(&context, 1));
        context.flush().unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn events_reach_callbacks() {
        let context = ReactiveContext::new();
        let list = ArrayModel::new(&context);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let id = list.add_callback(Rc::new(move |event: &CollectionEvent| {
            let label = match event {
                CollectionEvent::Added { index, .. } => format!("added {index}"),
                CollectionEvent::Removed { index, .. } => format!("removed {index}"),
                CollectionEvent::Changed { model } => format!("changed {}", model.id()),
            };
            sink.borrow_mut().push(label);
        }));

        let first = model(&context, 1);
        list.push(first.clone());
        list.push(model(&context, 2));
        list.notify_changed(&first);
        list.clear();
        assert!(list.remove_callback(id));
        list.push(model(&context, 3));

        assert_eq!(
            *seen.borrow(),
            vec!["added 0", "added 1", "changed 1", "removed 1", "removed 0"]
        );
    }
}
