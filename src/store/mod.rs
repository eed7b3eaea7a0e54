//! Remote-backed collections and their load/listen state machine.

mod array_store;
mod collection;
mod fetch;
mod persistor;
mod state;

pub use array_store::{ArrayStore, ParentScope, QuerySource, ReactiveQuery, StoreOptions};
pub use collection::{BoundCollection, EventRegistration};
pub use fetch::FetchPromise;
pub use persistor::Persistor;
pub use state::StoreState;
