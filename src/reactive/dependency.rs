use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::reactive::computation::Computation;
use crate::reactive::context::ReactiveContext;

/// A single observable slot.
///
/// Computations that call [`depend`](Self::depend) while current are
/// invalidated by the next [`changed`](Self::changed). An edge lasts until
/// either side fires: a computation that is invalidated for any reason
/// drops out of every dependency it had subscribed to.
///
/// An optional [`on_unobserved`](Self::on_unobserved) hook runs whenever
/// the last subscriber drops out.
#[derive(Clone)]
pub struct Dependency {
    inner: Rc<DependencyInner>,
}

struct DependencyInner {
    context: ReactiveContext,
    dependents: RefCell<BTreeMap<u64, Computation>>,
    unobserved: RefCell<Option<Rc<dyn Fn()>>>,
}

impl DependencyInner {
    fn notify_unobserved(&self) {
        let hook = self.unobserved.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("dependents", &self.dependent_count())
            .finish()
    }
}

impl Dependency {
    pub fn new(context: &ReactiveContext) -> Self {
        Self {
            inner: Rc::new(DependencyInner {
                context: context.clone(),
                dependents: RefCell::new(BTreeMap::new()),
                unobserved: RefCell::new(None),
            }),
        }
    }

    /// Subscribes the current computation, if any. Returns `true` when a
    /// new edge was created.
    pub fn depend(&self) -> bool {
        match self.inner.context.current() {
            Some(computation) => self.depend_on(&computation),
            None => false,
        }
    }

    pub fn depend_on(&self, computation: &Computation) -> bool {
        let id = computation.id();
        {
            let mut dependents = self.inner.dependents.borrow_mut();
            if dependents.contains_key(&id) {
                return false;
            }
            dependents.insert(id, computation.clone());
        }

        let weak = Rc::downgrade(&self.inner);
        computation.on_invalidate(move || {
            if let Some(inner) = weak.upgrade() {
                let (removed, now_empty) = {
                    let mut dependents = inner.dependents.borrow_mut();
                    let removed = dependents.remove(&id);
                    (removed, dependents.is_empty())
                };
                if removed.is_some() && now_empty {
                    inner.notify_unobserved();
                }
            }
        });
        true
    }

    /// Invalidates every subscriber and forgets them; they subscribe
    /// again when their next run reads this dependency.
    pub fn changed(&self) {
        let dependents = std::mem::take(&mut *self.inner.dependents.borrow_mut());
        if dependents.is_empty() {
            return;
        }
        for computation in dependents.into_values() {
            computation.invalidate();
        }
        self.inner.notify_unobserved();
    }

    /// Installs the hook run when the subscriber set becomes empty, either
    /// because the last subscriber was invalidated or stopped, or through
    /// [`changed`](Self::changed). Subscribers that re-read on their next
    /// run come back, so the hook should re-check before acting.
    pub fn on_unobserved(&self, hook: impl Fn() + 'static) {
        *self.inner.unobserved.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn has_dependents(&self) -> bool {
        !self.inner.dependents.borrow().is_empty()
    }

    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.borrow().len()
    }

    pub fn context(&self) -> &ReactiveContext {
        &self.inner.context
    }
}
