//! Reactive state trees.
//!
//! Models are defined once per [`Store`] with an initial state, named
//! actions and cached views. Instances expose their state through two
//! facades: a [`ReadOnly`] one for everybody and a [`Mutable`] one handed
//! to action bodies only. Every leaf write emits a patch that bubbles from
//! the owning instance up through its ancestors, each seeing the path
//! relative to itself. Snapshots are plain JSON tagged with the model name,
//! so data can be exported, persisted, and rehydrated into live instances.

mod arena;
mod bus;
mod facade;
mod input;
mod registry;
mod snapshot;
mod store;

pub mod action;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod view;

pub use action::{arg, Actions, Outcome, Task};
pub use arena::{InstanceId, NodeId};
pub use arbor_path::{Path, PathError};
pub use bus::{Subscription, WILDCARD};
pub use config::{StoreConfig, ViewPolicy, DEFAULT_MODEL_KEY};
pub use error::{DefinitionError, ModelError};
pub use event::{ActionEvent, Event, PatchEvent, PatchOp};
pub use facade::{Access, Entry, Facade, Mutable, ReadAccess, ReadOnly, WriteAccess};
pub use input::Input;
pub use model::{Instance, ModelDef, ModelFactory};
pub use store::Store;
pub use view::Views;

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
