//! Dependency-tracking computation graph.
//!
//! A [`ReactiveContext`] is the scope for one cooperative execution
//! context (a request, a UI session). [`Computation`]s run inside it and
//! record the [`Dependency`]s they read; a dependency's `changed` queues
//! its readers, and the next [`ReactiveContext::flush`] re-runs each of
//! them once, in the order they were invalidated.
//!
//! ```
//! use livebind::reactive::{ReactiveContext, ReactiveValue};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let context = ReactiveContext::new();
//! let status = ReactiveValue::new(&context, "open");
//! let seen = Rc::new(Cell::new(""));
//!
//! let (value, sink) = (status.clone(), seen.clone());
//! let _computation = context.autorun(move || sink.set(value.get()));
//!
//! status.set("closed");
//! context.flush().unwrap();
//! assert_eq!(seen.get(), "closed");
//! ```

mod computation;
mod context;
mod dependency;
mod value;

pub use computation::Computation;
pub use context::{FlushHook, ReactiveContext};
pub use dependency::Dependency;
pub use value::ReactiveValue;
