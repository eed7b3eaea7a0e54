use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{reentrant_flush, LiveResult};
use crate::reactive::computation::Computation;

/// Invoked once per outstanding "flush needed" signal. The hook is
/// expected to arrange for [`ReactiveContext::flush`] to run on a later
/// tick of the cooperative event loop.
pub type FlushHook = Rc<dyn Fn(&ReactiveContext)>;

type AfterFlush = Box<dyn FnOnce()>;

/// Dependency-tracking scope for one cooperative execution context.
///
/// Holds the "current computation" pointer and the flush queue. Every
/// [`Computation`] and [`Dependency`](crate::reactive::Dependency) is
/// bound to exactly one context; separate sessions never share one.
#[derive(Clone, Default)]
pub struct ReactiveContext {
    inner: Rc<ContextInner>,
}

#[derive(Default)]
pub(crate) struct ContextInner {
    current: RefCell<Option<Computation>>,
    flush_queue: RefCell<Vec<Computation>>,
    flushing: Cell<bool>,
    flush_scheduled: Cell<bool>,
    flush_hook: RefCell<Option<FlushHook>>,
    after_flush: RefCell<Vec<AfterFlush>>,
    next_id: Cell<u64>,
}

impl fmt::Debug for ReactiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveContext")
            .field("active", &self.is_active())
            .field("pending", &self.pending())
            .field("flushing", &self.is_flushing())
            .finish()
    }
}

impl ReactiveContext {
    /// Creates a context without a flush hook; invalidated computations
    /// wait until [`flush`](Self::flush) is called explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flush_hook(hook: FlushHook) -> Self {
        let context = Self::new();
        context.set_flush_hook(Some(hook));
        context
    }

    pub fn set_flush_hook(&self, hook: Option<FlushHook>) {
        *self.inner.flush_hook.borrow_mut() = hook;
    }

    /// Wraps `body` in a computation and runs it once immediately.
    pub fn autorun<F>(&self, body: F) -> Computation
    where
        F: FnMut() + 'static,
    {
        Computation::new(self, body)
    }

    /// The computation currently capturing dependencies, if any.
    pub fn current(&self) -> Option<Computation> {
        self.inner.current.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    /// Runs `f` with no current computation so nothing read inside it
    /// creates a dependency edge.
    pub fn run_without_tracking<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = CurrentGuard::install(self, None);
        f()
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.get()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.flush_scheduled.get()
    }

    /// Number of invalidated computations waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.flush_queue.borrow().len()
    }

    /// Recomputes every queued computation once, in enqueue order.
    ///
    /// Computations invalidated while the pass runs are left for the next
    /// pass. Calling `flush` from inside a flush fails without running
    /// anything.
    pub fn flush(&self) -> LiveResult<()> {
        if self.inner.flushing.get() {
            return Err(reentrant_flush());
        }
        {
            let _guard = FlushGuard::enter(&self.inner);
            self.inner.flush_scheduled.set(false);

            let computations = std::mem::take(&mut *self.inner.flush_queue.borrow_mut());
            log::debug!("flushing {} computation(s)", computations.len());
            for computation in computations {
                computation.compute();
            }
        }
        self.run_after_flush();
        Ok(())
    }

    /// Runs `callback` untracked once no computation is waiting to be
    /// recomputed: immediately when the queue is idle, otherwise after
    /// the flush that drains it.
    pub fn after_flush(&self, callback: impl FnOnce() + 'static) {
        if !self.is_flushing() && self.pending() == 0 {
            self.run_without_tracking(callback);
        } else {
            self.inner.after_flush.borrow_mut().push(Box::new(callback));
        }
    }

    fn run_after_flush(&self) {
        if self.pending() > 0 {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.after_flush.borrow_mut());
        for callback in callbacks {
            self.run_without_tracking(callback);
        }
    }

    pub(crate) fn enqueue(&self, computation: Computation) {
        self.inner.flush_queue.borrow_mut().push(computation);
    }

    /// One-shot trigger: further calls are ignored until the scheduled
    /// flush starts.
    pub(crate) fn queue_flush(&self) {
        if self.inner.flush_scheduled.get() {
            return;
        }
        let hook = self.inner.flush_hook.borrow().clone();
        if let Some(hook) = hook {
            self.inner.flush_scheduled.set(true);
            hook(self);
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<ContextInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn swap_current(&self, computation: Option<Computation>) -> Option<Computation> {
        std::mem::replace(&mut *self.inner.current.borrow_mut(), computation)
    }
}

/// Installs a computation as current and restores the previous one when
/// dropped, including during unwinding.
pub(crate) struct CurrentGuard<'a> {
    context: &'a ReactiveContext,
    previous: Option<Computation>,
}

impl<'a> CurrentGuard<'a> {
    pub(crate) fn install(context: &'a ReactiveContext, computation: Option<Computation>) -> Self {
        let previous = context.swap_current(computation);
        Self { context, previous }
    }
}

impl Drop for CurrentGuard<'_> {
    fn drop(&mut self) {
        let replaced = self.context.swap_current(self.previous.take());
        drop(replaced);
    }
}

struct FlushGuard<'a> {
    inner: &'a ContextInner,
}

impl<'a> FlushGuard<'a> {
    fn enter(inner: &'a ContextInner) -> Self {
        inner.flushing.set(true);
        Self { inner }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.inner.flushing.set(false);
    }
}
