//! Per-context wiring of the reactive core, the listener pool and the
//! transport.
//!
//! A [`Session`] owns one [`ReactiveContext`] and one
//! [`QueryListenerPool`]. Sessions share nothing with each other, so two
//! concurrent requests (or two browser tabs) each build their own.

use std::future::Future;
use std::rc::Rc;
use std::sync::LazyLock;

use futures::FutureExt;
use serde_json::{Map, Value};

use crate::error::{invalid_argument, LiveError, LiveErrorCode, LiveResult};
use crate::logger::{self, LogLevel, Logger};
use crate::model::{default_model_factory, IdentityMap, ModelFactory};
use crate::platform::runtime::{LocalExecutor, TaskSpawner};
use crate::query::{QueryListenerPool, QuerySignature, QueryTransport, RemoteEvent};
use crate::reactive::ReactiveContext;
use crate::store::{BoundCollection, ParentScope, StoreOptions};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@livebind/reactive"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// Label used in log lines.
    pub name: Option<String>,
    /// Schedule a flush on the session's spawner whenever a computation
    /// is invalidated. When off, call [`Session::flush`] yourself.
    pub auto_flush: bool,
    /// Applied to every `@livebind/*` logger when the session is built.
    pub log_level: Option<LogLevel>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: None,
            auto_flush: true,
            log_level: None,
        }
    }
}

pub struct SessionBuilder {
    transport: Rc<dyn QueryTransport>,
    settings: SessionSettings,
    spawner: Option<Rc<dyn TaskSpawner>>,
    model_factory: Option<ModelFactory>,
}

impl SessionBuilder {
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the default [`LocalExecutor`]. The session can then no
    /// longer drive its own tasks.
    pub fn spawner(mut self, spawner: Rc<dyn TaskSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn model_factory(mut self, factory: ModelFactory) -> Self {
        self.model_factory = Some(factory);
        self
    }

    pub fn build(self) -> Session {
        if let Some(level) = self.settings.log_level {
            logger::set_log_level(level);
        }
        let mut executor = None;
        let spawner: Rc<dyn TaskSpawner> = match self.spawner {
            Some(spawner) => spawner,
            None => {
                let local = LocalExecutor::new();
                executor = Some(local.clone());
                Rc::new(local)
            }
        };

        let context = ReactiveContext::new();
        if self.settings.auto_flush {
            let label = self.settings.name.clone().unwrap_or_else(|| "session".into());
            let flush_spawner = Rc::clone(&spawner);
            context.set_flush_hook(Some(Rc::new(move |cx: &ReactiveContext| {
                let cx = cx.clone();
                let label = label.clone();
                flush_spawner.spawn(
                    async move {
                        if let Err(err) = cx.flush() {
                            LOGGER.error(format!("[{label}] deferred flush failed: {err}"));
                        }
                    }
                    .boxed_local(),
                );
            })));
        }

        Session {
            inner: Rc::new(SessionInner {
                settings: self.settings,
                context,
                pool: QueryListenerPool::new(),
                transport: self.transport,
                spawner,
                executor,
                identity_map: IdentityMap::new(),
                model_factory: self.model_factory.unwrap_or_else(default_model_factory),
            }),
        }
    }
}

/// One isolated reactive execution context bound to a transport.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

struct SessionInner {
    settings: SessionSettings,
    context: ReactiveContext,
    pool: QueryListenerPool,
    transport: Rc<dyn QueryTransport>,
    spawner: Rc<dyn TaskSpawner>,
    executor: Option<LocalExecutor>,
    identity_map: IdentityMap,
    model_factory: ModelFactory,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("settings", &self.inner.settings)
            .field("context", &self.inner.context)
            .field("listeners", &self.inner.pool.len())
            .finish()
    }
}

impl Session {
    /// Session with default settings, driven by its own [`LocalExecutor`].
    pub fn new(transport: Rc<dyn QueryTransport>) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: Rc<dyn QueryTransport>) -> SessionBuilder {
        SessionBuilder {
            transport,
            settings: SessionSettings::default(),
            spawner: None,
            model_factory: None,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn context(&self) -> &ReactiveContext {
        &self.inner.context
    }

    pub fn pool(&self) -> &QueryListenerPool {
        &self.inner.pool
    }

    pub fn transport(&self) -> Rc<dyn QueryTransport> {
        Rc::clone(&self.inner.transport)
    }

    pub fn spawner(&self) -> Rc<dyn TaskSpawner> {
        Rc::clone(&self.inner.spawner)
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.inner.identity_map
    }

    pub fn model_factory(&self) -> &ModelFactory {
        &self.inner.model_factory
    }

    /// Re-runs invalidated computations now.
    pub fn flush(&self) -> LiveResult<()> {
        self.inner.context.flush()
    }

    /// Runs pending subscription completions and deferred flushes until
    /// nothing can make progress.
    pub fn run_until_stalled(&self) -> LiveResult<()> {
        self.executor("run_until_stalled")?.run_until_stalled()
    }

    pub fn run_until<F>(&self, future: F) -> LiveResult<F::Output>
    where
        F: Future,
    {
        self.executor("run_until")?.run_until(future)
    }

    /// Store-backed collection over every row of `name`.
    pub fn collection(&self, name: &str) -> BoundCollection {
        self.collection_with(StoreOptions::new(name))
    }

    pub fn collection_with(&self, options: StoreOptions) -> BoundCollection {
        BoundCollection::remote(self, options)
    }

    /// Rows of `name` whose `field` equals the parent's id.
    pub fn scoped_collection(&self, name: &str, field: &str, parent_id: Value) -> BoundCollection {
        let mut options = StoreOptions::new(name);
        options.parent_scope = Some(ParentScope {
            field: field.to_owned(),
            id: parent_id,
        });
        self.collection_with(options)
    }

    pub fn local_collection(&self) -> BoundCollection {
        BoundCollection::local(&self.inner.context)
    }

    /// Routes a pushed change to the listener for `(collection, query)`.
    /// Returns `false` when no such listener is registered.
    pub fn deliver(&self, collection: &str, query: &QuerySignature, event: &RemoteEvent) -> bool {
        match self.inner.pool.get(collection, query) {
            Some(listener) => {
                listener.handle(event);
                true
            }
            None => {
                log::debug!("no listener for {collection} {query}, dropping {}", event.action());
                false
            }
        }
    }

    /// Convenience for transports that receive `(action, arguments)`
    /// messages with the query as a `[filter, skip, limit]` triple.
    pub fn deliver_action(
        &self,
        collection: &str,
        query: &Value,
        action: &str,
        arguments: &Value,
    ) -> LiveResult<bool> {
        let (filter, skip, limit): (Option<Map<String, Value>>, Option<u64>, Option<u64>) =
            serde_json::from_value(query.clone())
                .map_err(|err| invalid_argument(format!("malformed query triple: {err}")))?;
        let query = QuerySignature::new(filter.unwrap_or_default(), skip, limit);
        let event = RemoteEvent::from_action(action, arguments)?;
        Ok(self.deliver(collection, &query, &event))
    }

    fn executor(&self, operation: &str) -> LiveResult<&LocalExecutor> {
        self.inner.executor.as_ref().ok_or_else(|| {
            LiveError::new(
                LiveErrorCode::Unsupported,
                format!("`{operation}` needs the built-in executor; drive the custom spawner instead"),
            )
        })
    }
}
