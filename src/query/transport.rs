use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{transport_error, LiveError, LiveResult};
use crate::query::QuerySignature;

/// First batch returned when a remote subscription is established.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialResults {
    /// `(index, row)` pairs in result order.
    pub rows: Vec<(usize, Value)>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl InitialResults {
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self {
            rows: rows.into_iter().enumerate().collect(),
            errors: Vec::new(),
        }
    }

    /// Decodes the `[results, errors]` pair sent by the backend, where
    /// `results` is a list of `[index, row]` pairs and `errors` may be
    /// missing or `null`.
    pub fn from_wire(value: Value) -> LiveResult<Self> {
        let (rows, errors): (Vec<(usize, Value)>, Option<Vec<Value>>) =
            serde_json::from_value(value)
                .map_err(|err| transport_error(format!("malformed initial results: {err}")))?;
        let errors = errors
            .unwrap_or_default()
            .into_iter()
            .map(|error| match error {
                Value::String(message) => message,
                other => other.to_string(),
            })
            .collect();
        Ok(Self { rows, errors })
    }
}

/// Remote subscription endpoint.
///
/// `add_listener` resolves with the initial batch once the backend has
/// registered the subscription; later pushes arrive through
/// [`Session::deliver`](crate::session::Session::deliver).
#[async_trait(?Send)]
pub trait QueryTransport {
    async fn add_listener(
        &self,
        collection: &str,
        query: &QuerySignature,
    ) -> LiveResult<InitialResults>;

    async fn remove_listener(&self, collection: &str, query: &QuerySignature) -> LiveResult<()>;
}

/// A call observed by [`MemoryTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum TransportCall {
    AddListener {
        collection: String,
        query: QuerySignature,
    },
    RemoveListener {
        collection: String,
        query: QuerySignature,
    },
}

/// In-process transport that serves subscriptions from seeded rows.
///
/// A row matches when every filter field equals the row's field; skip and
/// limit are applied afterwards. Completions can be held back with
/// [`hold`](Self::hold) to observe the window between subscribing and
/// the first batch.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Rc<RefCell<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, Vec<Value>>,
    calls: Vec<TransportCall>,
    failure: Option<LiveError>,
    remove_failure: Option<LiveError>,
    warnings: Vec<String>,
    held: bool,
    gates: Vec<oneshot::Sender<()>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, row: Value) {
        self.inner
            .borrow_mut()
            .collections
            .entry(collection.to_owned())
            .or_default()
            .push(row);
    }

    pub fn set_rows(&self, collection: &str, rows: Vec<Value>) {
        self.inner
            .borrow_mut()
            .collections
            .insert(collection.to_owned(), rows);
    }

    /// Rows the given query would currently receive.
    pub fn matching_rows(&self, collection: &str, query: &QuerySignature) -> Vec<Value> {
        let state = self.inner.borrow();
        let rows = state
            .collections
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let skip = query.skip().unwrap_or(0) as usize;
        let limit = query.limit().map(|limit| limit as usize).unwrap_or(usize::MAX);
        rows.iter()
            .filter(|row| {
                query
                    .filter()
                    .iter()
                    .all(|(field, expected)| row.get(field) == Some(expected))
            })
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every subsequent `add_listener` fails with `error` until cleared.
    pub fn fail_with(&self, error: Option<LiveError>) {
        self.inner.borrow_mut().failure = error;
    }

    pub fn fail_removals_with(&self, error: Option<LiveError>) {
        self.inner.borrow_mut().remove_failure = error;
    }

    /// Non-fatal errors attached to every initial batch.
    pub fn set_warnings(&self, warnings: Vec<String>) {
        self.inner.borrow_mut().warnings = warnings;
    }

    /// Parks `add_listener` completions until [`release`](Self::release).
    pub fn hold(&self) {
        self.inner.borrow_mut().held = true;
    }

    pub fn release(&self) {
        let gates = {
            let mut state = self.inner.borrow_mut();
            state.held = false;
            std::mem::take(&mut state.gates)
        };
        for gate in gates {
            let _ = gate.send(());
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.borrow().calls.clone()
    }

    pub fn add_listener_count(&self) -> usize {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, TransportCall::AddListener { .. }))
            .count()
    }

    pub fn remove_listener_count(&self) -> usize {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, TransportCall::RemoveListener { .. }))
            .count()
    }
}

#[async_trait(?Send)]
impl QueryTransport for MemoryTransport {
    async fn add_listener(
        &self,
        collection: &str,
        query: &QuerySignature,
    ) -> LiveResult<InitialResults> {
        let gate = {
            let mut state = self.inner.borrow_mut();
            state.calls.push(TransportCall::AddListener {
                collection: collection.to_owned(),
                query: query.clone(),
            });
            if state.held {
                let (sender, receiver) = oneshot::channel();
                state.gates.push(sender);
                Some(receiver)
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            gate.await
                .map_err(|_| transport_error("memory transport dropped a held subscription"))?;
        }

        let (failure, warnings) = {
            let state = self.inner.borrow();
            (state.failure.clone(), state.warnings.clone())
        };
        if let Some(error) = failure {
            return Err(error);
        }
        let mut results = InitialResults::from_rows(self.matching_rows(collection, query));
        results.errors = warnings;
        Ok(results)
    }

    async fn remove_listener(&self, collection: &str, query: &QuerySignature) -> LiveResult<()> {
        let mut state = self.inner.borrow_mut();
        state.calls.push(TransportCall::RemoveListener {
            collection: collection.to_owned(),
            query: query.clone(),
        });
        match state.remove_failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
