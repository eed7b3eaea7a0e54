use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;

use crate::error::{internal_error, LiveResult};

/// Cooperative scheduler hook used for remote subscription completions and
/// deferred flushes. Every task runs on the same logical execution
/// context as the session that spawned it.
pub trait TaskSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Default spawner backed by `futures::executor::LocalPool`.
///
/// Nothing runs until the owner drives the pool with
/// [`LocalExecutor::run_until_stalled`] or [`LocalExecutor::run_until`],
/// which makes the suspension points explicit.
#[derive(Clone)]
pub struct LocalExecutor {
    pool: Rc<RefCell<LocalPool>>,
    spawner: LocalSpawner,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: Rc::new(RefCell::new(pool)),
            spawner,
        }
    }
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every task that can make progress, including tasks spawned
    /// while running.
    ///
    /// Returns an error when called from inside one of the executor's own
    /// tasks.
    pub fn run_until_stalled(&self) -> LiveResult<()> {
        let mut pool = self
            .pool
            .try_borrow_mut()
            .map_err(|_| internal_error("local executor is already running"))?;
        pool.run_until_stalled();
        Ok(())
    }

    /// Drives the pool until `future` completes.
    pub fn run_until<F>(&self, future: F) -> LiveResult<F::Output>
    where
        F: Future,
    {
        let mut pool = self
            .pool
            .try_borrow_mut()
            .map_err(|_| internal_error("local executor is already running"))?;
        Ok(pool.run_until(future))
    }
}

impl TaskSpawner for LocalExecutor {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(err) = self.spawner.spawn_local(task) {
            log::warn!("local executor rejected task: {err}");
        }
    }
}

/// Spawns onto the current `tokio::task::LocalSet`.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSpawner;

#[cfg(not(target_arch = "wasm32"))]
impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(task);
    }
}

/// Spawns onto the browser event loop.
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
#[derive(Clone, Copy, Debug, Default)]
pub struct WasmSpawner;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
impl TaskSpawner for WasmSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}
