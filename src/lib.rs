//! Reactive data binding over shared remote query subscriptions.
//!
//! The crate has three layers:
//!
//! - [`reactive`]: a dependency-tracking computation graph with a
//!   batched, cooperative flush.
//! - [`query`]: a pool of remote query listeners keyed by
//!   `(collection, query)`, so identical queries share one subscription.
//! - [`store`]: collections that load lazily, attach to a pooled
//!   listener, and detach again once nothing needs live data.
//!
//! A [`Session`] wires the three together for one execution context.
//!
//! ```
//! use livebind::query::MemoryTransport;
//! use livebind::Session;
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let transport = MemoryTransport::new();
//! transport.insert("tasks", json!({"_id": 1, "status": "open"}));
//! let session = Session::new(Rc::new(transport.clone()));
//!
//! let tasks = session.collection("tasks");
//! let fetch = tasks.fetch().unwrap();
//! let rows = session.run_until(fetch).unwrap().unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(transport.add_listener_count(), 1);
//! ```

pub mod error;
pub mod logger;
pub mod model;
pub mod platform;
pub mod query;
pub mod reactive;
pub mod session;
pub mod store;

pub use error::{LiveError, LiveErrorCode, LiveResult};
pub use session::{Session, SessionBuilder, SessionSettings};
