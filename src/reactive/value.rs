use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::reactive::context::ReactiveContext;
use crate::reactive::dependency::Dependency;

/// A value whose reads are tracked and whose writes invalidate readers.
#[derive(Clone)]
pub struct ReactiveValue<T> {
    inner: Rc<ValueInner<T>>,
}

struct ValueInner<T> {
    value: RefCell<T>,
    dependency: Dependency,
}

impl<T: fmt::Debug> fmt::Debug for ReactiveValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReactiveValue")
            .field(&*self.inner.value.borrow())
            .finish()
    }
}

impl<T> ReactiveValue<T>
where
    T: Clone + PartialEq + 'static,
{
    pub fn new(context: &ReactiveContext, value: T) -> Self {
        Self {
            inner: Rc::new(ValueInner {
                value: RefCell::new(value),
                dependency: Dependency::new(context),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.dependency.depend();
        self.inner.value.borrow().clone()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.dependency.depend();
        f(&self.inner.value.borrow())
    }

    /// Stores `value`; readers are invalidated only if it differs from
    /// the current one.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.inner.dependency.changed();
        true
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        self.inner.dependency.changed();
    }
}
