//! Reactive records and the ordered lists that hold them.

mod array_model;
mod identity_map;
#[allow(clippy::module_inception)]
mod model;

pub use array_model::{ArrayModel, CollectionEvent, EventCallback};
pub use identity_map::IdentityMap;
pub use model::{default_model_factory, Model, ModelFactory, ModelId};
