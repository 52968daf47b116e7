//! Model definitions, factories and live instances.

use std::fmt;
use std::rc::Rc;

use arbor_path::Path;
use indexmap::IndexMap;
use serde_json::Value;

use crate::action::{ActionFn, Actions};
use crate::arena::{InstanceId, NodeId};
use crate::bus::{Subscription, WILDCARD};
use crate::error::{DefinitionError, ModelError};
use crate::event::{ActionEvent, Event, PatchEvent, ACTION, ACTION_COMPLETE, PATCH, SNAPSHOT};
use crate::facade::{Entry, Mutable, ReadAccess, ReadOnly};
use crate::input::Input;
use crate::store::Store;
use crate::view::{ViewFn, Views};

/// Blueprint handed to [`Store::define`].
///
/// ```
/// use arbor::{Actions, ModelDef, Store, Views};
/// use serde_json::{json, Value};
///
/// let store = Store::new();
/// let counter = store
///     .define(
///         "Counter",
///         ModelDef::new(|| json!({"count": 0}))
///             .actions(Actions::new().action("increment", |this, _| {
///                 let next = this.get_i64("count").unwrap_or(0) + 1;
///                 this.set("count", next)
///             }))
///             .views(Views::new().view("double", |this| {
///                 Value::from(this.get_i64("count").unwrap_or(0) * 2)
///             })),
///     )
///     .unwrap();
///
/// let c = counter.create_default().unwrap();
/// c.call("increment", vec![]).unwrap();
/// assert_eq!(c.view("double").unwrap(), json!(2));
/// ```
pub struct ModelDef {
    initial: Rc<dyn Fn() -> Input>,
    actions: Actions,
    views: Views,
}

impl ModelDef {
    pub fn new<F, I>(initial: F) -> Self
    where
        F: Fn() -> I + 'static,
        I: Into<Input>,
    {
        Self {
            initial: Rc::new(move || initial().into()),
            actions: Actions::new(),
            views: Views::new(),
        }
    }

    pub fn actions(mut self, actions: Actions) -> Self {
        self.actions = actions;
        self
    }

    pub fn views(mut self, views: Views) -> Self {
        self.views = views;
        self
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("actions", &self.actions.names())
            .field("views", &self.views.names())
            .finish()
    }
}

/// A validated, named model as kept by the registry.
pub(crate) struct Definition {
    name: String,
    initial: Rc<dyn Fn() -> Input>,
    actions: IndexMap<String, ActionFn>,
    views: IndexMap<String, ViewFn>,
}

impl Definition {
    pub(crate) fn build(
        name: &str,
        def: ModelDef,
        model_key: &str,
    ) -> Result<Self, DefinitionError> {
        if name.is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        let mut actions = IndexMap::new();
        let mut views = IndexMap::new();
        let members = def
            .actions
            .into_entries()
            .into_iter()
            .map(|(n, f)| (n, Some(f), None))
            .chain(
                def.views
                    .into_entries()
                    .into_iter()
                    .map(|(n, f)| (n, None, Some(f))),
            );
        for (member, action, view) in members {
            if member == model_key {
                return Err(DefinitionError::ReservedMember {
                    model: name.to_string(),
                    name: member,
                });
            }
            if actions.contains_key(&member) || views.contains_key(&member) {
                return Err(DefinitionError::DuplicateMember {
                    model: name.to_string(),
                    name: member,
                });
            }
            if let Some(action) = action {
                actions.insert(member, action);
            } else if let Some(view) = view {
                views.insert(member, view);
            }
        }
        Ok(Self {
            name: name.to_string(),
            initial: def.initial,
            actions,
            views,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn initial(&self) -> Input {
        (self.initial)()
    }

    pub(crate) fn action(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).cloned()
    }

    pub(crate) fn view(&self, name: &str) -> Option<ViewFn> {
        self.views.get(name).cloned()
    }

    pub(crate) fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub(crate) fn view_names(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    pub(crate) fn has_member(&self, key: &str) -> bool {
        self.actions.contains_key(key) || self.views.contains_key(key)
    }

    /// Keys that snapshots never carry into or out of state.
    pub(crate) fn is_reserved(&self, key: &str, model_key: &str) -> bool {
        key == model_key || self.has_member(key)
    }
}

/// Creates instances of one registered model.
#[derive(Clone)]
pub struct ModelFactory {
    store: Store,
    definition: Rc<Definition>,
}

impl ModelFactory {
    pub(crate) fn new(store: Store, definition: Rc<Definition>) -> Self {
        Self { store, definition }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Builds a fresh instance; `overrides` is shallow-merged over the
    /// initial state. Accepts a record, a JSON object, or null.
    pub fn create(&self, overrides: impl Into<Input>) -> Result<Instance, ModelError> {
        self.store
            .instantiate(Rc::clone(&self.definition), overrides.into())
    }

    pub fn create_default(&self) -> Result<Instance, ModelError> {
        self.create(Input::NULL)
    }
}

impl fmt::Debug for ModelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelFactory")
            .field("name", &self.name())
            .finish()
    }
}

/// A live model instance.
///
/// Cheap to clone; clones address the same instance. An instance stays
/// alive while a handle to it exists or a container holds it. Handlers
/// that capture a handle to the instance they observe keep it alive until
/// they are unsubscribed.
pub struct Instance {
    store: Store,
    id: InstanceId,
}

impl Instance {
    pub(crate) fn new(store: Store, id: InstanceId) -> Self {
        store.retain_handle(id);
        Self { store, id }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn root_node(&self) -> NodeId {
        self.store.arena().instance(self.id).root
    }

    pub(crate) fn definition(&self) -> Rc<Definition> {
        Rc::clone(&self.store.arena().instance(self.id).definition)
    }

    pub fn model_name(&self) -> String {
        self.definition().name().to_string()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.definition().action_names().map(str::to_string).collect()
    }

    pub fn view_names(&self) -> Vec<String> {
        self.definition().view_names().map(str::to_string).collect()
    }

    /// Read-only facade over the instance root.
    pub fn state(&self) -> ReadOnly {
        ReadOnly::new(self.store.clone(), self.root_node())
    }

    pub(crate) fn mutable(&self) -> Mutable {
        Mutable::new(self.store.clone(), self.root_node())
    }

    pub fn get(&self, key: &str) -> Option<Entry<ReadAccess>> {
        self.state().get(key)
    }

    /// The nested instance stored under `key`, if any.
    pub fn child(&self, key: &str) -> Option<Instance> {
        self.get(key).and_then(Entry::into_model)
    }

    /// The instance that currently contains this one.
    pub fn parent(&self) -> Option<Instance> {
        let link = self.store.arena().instance_parent(self.id);
        link.map(|(parent, _)| Instance::new(self.store.clone(), parent))
    }

    /// Topmost ancestor; the instance itself when it has no parent.
    pub fn root(&self) -> Instance {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Where the parent sees this instance, e.g. `/todos/0`.
    pub fn path_in_parent(&self) -> Option<Path> {
        let link = self.store.arena().instance_parent(self.id);
        link.map(|(_, path)| path)
    }

    fn subscribe<F>(&self, kind: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) + 'static,
    {
        let bus = Rc::clone(&self.store.arena().instance(self.id).bus);
        bus.on(kind, handler)
    }

    /// Runs `handler` for every action dispatched here or in a descendant.
    ///
    /// With `after_completion` the handler fires once the action body has
    /// finished (for async actions, once the returned task resolves).
    pub fn on_action<F>(&self, handler: F, after_completion: bool) -> Subscription
    where
        F: Fn(&ActionEvent) + 'static,
    {
        let kind = if after_completion { ACTION_COMPLETE } else { ACTION };
        self.subscribe(kind, move |event| {
            if let Some(action) = event.as_action() {
                handler(action);
            }
        })
    }

    pub fn on_patch<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&PatchEvent) + 'static,
    {
        self.subscribe(PATCH, move |event| {
            if let Some(patch) = event.as_patch() {
                handler(patch);
            }
        })
    }

    /// Like [`Instance::on_patch`], restricted to patches at or below `pointer`.
    pub fn on_patch_at<F>(&self, pointer: &str, handler: F) -> Result<Subscription, ModelError>
    where
        F: Fn(&PatchEvent) + 'static,
    {
        let scope = Path::parse(pointer)?;
        Ok(self.on_patch(move |patch| {
            let within = Path::parse(&patch.path)
                .map(|path| scope.is_prefix_of(&path))
                .unwrap_or(false);
            if within {
                handler(patch);
            }
        }))
    }

    /// Runs `handler` with this instance's snapshot after every completed action.
    pub fn on_snapshot<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Value) + 'static,
    {
        self.subscribe(SNAPSHOT, move |event| {
            if let Some(snapshot) = event.as_snapshot() {
                handler(snapshot);
            }
        })
    }

    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + 'static,
    {
        self.subscribe(WILDCARD, handler)
    }
}

impl Clone for Instance {
    fn clone(&self) -> Self {
        Self::new(self.store.clone(), self.id)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.store.drop_handle(self.id);
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.store.ptr_eq(&other.store)
    }
}

impl Eq for Instance {}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model_name())
            .field("id", &self.id)
            .finish()
    }
}
