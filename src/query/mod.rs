//! Shared remote subscriptions.
//!
//! Stores never talk to the backend directly. Each one looks up a
//! [`QueryListener`] in the session's [`QueryListenerPool`] by
//! `(collection, query)` and attaches to it, so any number of stores
//! asking the same question share a single [`QueryTransport`]
//! subscription.

mod event;
mod listener;
mod pool;
mod signature;
mod transport;

pub use event::RemoteEvent;
pub use listener::QueryListener;
pub use pool::QueryListenerPool;
pub use signature::QuerySignature;
pub use transport::{InitialResults, MemoryTransport, QueryTransport, TransportCall};
