use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::reactive::context::{ContextInner, CurrentGuard, ReactiveContext};

type Body = Box<dyn FnMut()>;
type InvalidationCallback = Box<dyn FnOnce()>;

/// A re-runnable unit of work that records which dependencies it reads.
///
/// Created through [`ReactiveContext::autorun`]; the body runs once right
/// away and again on the flush that follows each invalidation, until the
/// computation is stopped.
#[derive(Clone)]
pub struct Computation {
    inner: Rc<ComputationInner>,
}

struct ComputationInner {
    id: u64,
    context: Weak<ContextInner>,
    body: RefCell<Option<Body>>,
    invalidated: Cell<bool>,
    stopped: Cell<bool>,
    computing: Cell<bool>,
    first_run: Cell<bool>,
    invalidations: RefCell<Vec<InvalidationCallback>>,
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("invalidated", &self.inner.invalidated.get())
            .field("stopped", &self.inner.stopped.get())
            .field("computing", &self.inner.computing.get())
            .finish()
    }
}

impl PartialEq for Computation {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Computation {}

impl Computation {
    pub(crate) fn new<F>(context: &ReactiveContext, body: F) -> Self
    where
        F: FnMut() + 'static,
    {
        let computation = Self {
            inner: Rc::new(ComputationInner {
                id: context.next_id(),
                context: context.downgrade(),
                body: RefCell::new(Some(Box::new(body))),
                invalidated: Cell::new(false),
                stopped: Cell::new(false),
                computing: Cell::new(false),
                first_run: Cell::new(true),
                invalidations: RefCell::new(Vec::new()),
            }),
        };
        computation.run();
        computation.inner.first_run.set(false);
        computation
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.get()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    pub fn is_computing(&self) -> bool {
        self.inner.computing.get()
    }

    /// True only while the body runs for the first time.
    pub fn is_first_run(&self) -> bool {
        self.inner.first_run.get()
    }

    /// Registers a callback for the next invalidation. If the computation
    /// is already invalidated the callback runs immediately, outside any
    /// tracking scope.
    pub fn on_invalidate<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        if self.inner.invalidated.get() {
            self.without_tracking(callback);
        } else {
            self.inner.invalidations.borrow_mut().push(Box::new(callback));
        }
    }

    /// Marks the computation stale. Only the first call after a run has
    /// any effect: it queues a recompute (unless stopped or mid-run) and
    /// fires the invalidation callbacks.
    pub fn invalidate(&self) {
        if self.inner.invalidated.get() {
            return;
        }
        self.inner.invalidated.set(true);

        if !self.inner.stopped.get() && !self.inner.computing.get() {
            if let Some(context) = self.context() {
                context.enqueue(self.clone());
                context.queue_flush();
            }
        }

        let callbacks = std::mem::take(&mut *self.inner.invalidations.borrow_mut());
        if !callbacks.is_empty() {
            self.without_tracking(move || {
                for callback in callbacks {
                    callback();
                }
            });
        }
    }

    /// Permanently stops the computation, delivering its invalidation
    /// callbacks one last time.
    pub fn stop(&self) {
        if self.inner.stopped.get() {
            return;
        }
        self.inner.stopped.set(true);
        self.invalidate();
        if !self.inner.computing.get() {
            let body = self.inner.body.borrow_mut().take();
            drop(body);
        }
    }

    /// Runs `f` with this computation installed as current.
    pub fn run_in<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.context() {
            Some(context) => {
                let _guard = CurrentGuard::install(&context, Some(self.clone()));
                f()
            }
            None => f(),
        }
    }

    /// Called by the flush scheduler.
    pub(crate) fn compute(&self) {
        self.inner.invalidated.set(false);
        if !self.inner.stopped.get() {
            self.run();
        }
    }

    fn run(&self) {
        let body = self.inner.body.borrow_mut().take();
        let Some(body) = body else {
            return;
        };

        let mut guard = RunGuard::enter(&self.inner, body);
        if let Some(body) = guard.body.as_mut() {
            self.run_in(|| body());
        }
        drop(guard);

        // Invalidated by its own run: recompute on the next pass.
        if self.inner.invalidated.get() && !self.inner.stopped.get() {
            if let Some(context) = self.context() {
                context.enqueue(self.clone());
                context.queue_flush();
            }
        }
    }

    fn without_tracking(&self, f: impl FnOnce()) {
        match self.context() {
            Some(context) => context.run_without_tracking(f),
            None => f(),
        }
    }

    fn context(&self) -> Option<ReactiveContext> {
        ReactiveContext::from_weak(&self.inner.context)
    }
}

/// Owns the body for the duration of a run and hands it back afterwards,
/// unless the computation was stopped while running.
struct RunGuard<'a> {
    inner: &'a ComputationInner,
    body: Option<Body>,
}

impl<'a> RunGuard<'a> {
    fn enter(inner: &'a ComputationInner, body: Body) -> Self {
        inner.computing.set(true);
        Self {
            inner,
            body: Some(body),
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.inner.computing.set(false);
        if !self.inner.stopped.get() {
            *self.inner.body.borrow_mut() = self.body.take();
        }
    }
}
