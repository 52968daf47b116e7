//! The shared context every instance lives in.
//!
//! A [`Store`] owns the node arena, the model registry and the settings.
//! Borrows of the arena are confined to single steps; none is held while
//! user code (action bodies, views, subscribers, initial-state builders)
//! runs, so any of those may freely read or call back into the store.
//!
//! Instances are reference counted by their [`Instance`] handles. One that
//! has no handle left and sits in no container is freed together with its
//! state nodes.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_lite::future;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::action::PendingAction;

use crate::arena::{Arena, InstanceId, InstanceRecord, NodeId, Shape, Slot};
use crate::bus::EventBus;
use crate::config::{StoreConfig, ViewPolicy};
use crate::error::{DefinitionError, ModelError};
use crate::event::{Event, SNAPSHOT};
use crate::input::Input;
use crate::model::{Definition, Instance, ModelDef, ModelFactory};
use crate::registry::Registry;
use crate::view::ViewCache;

struct StoreInner {
    arena: RefCell<Arena>,
    registry: RefCell<Registry>,
    handles: RefCell<Handles>,
    pending: RefCell<Vec<Rc<PendingAction>>>,
    config: StoreConfig,
}

/// Live handle count per instance.
#[derive(Default)]
struct Handles {
    counts: HashMap<InstanceId, usize>,
    /// Instances that lost their last handle since the last collection.
    released: Vec<InstanceId>,
}

#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("models", &self.registered_models())
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                arena: RefCell::new(Arena::default()),
                registry: RefCell::new(Registry::default()),
                handles: RefCell::new(Handles::default()),
                pending: RefCell::new(Vec::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn arena(&self) -> Ref<'_, Arena> {
        self.inner.arena.borrow()
    }

    pub(crate) fn arena_mut(&self) -> RefMut<'_, Arena> {
        self.inner.arena.borrow_mut()
    }

    /// Validates `def` and registers it under `name`, replacing any
    /// previous model of that name.
    pub fn define(&self, name: &str, def: ModelDef) -> Result<ModelFactory, DefinitionError> {
        let definition = Rc::new(Definition::build(name, def, &self.config().model_key)?);
        let replaced = self
            .inner
            .registry
            .borrow_mut()
            .register(Rc::clone(&definition));
        if replaced.is_some() {
            debug!(model = %name, "model redefined");
        } else {
            debug!(model = %name, "model defined");
        }
        Ok(ModelFactory::new(self.clone(), definition))
    }

    /// Forgets every registered model. Existing instances and factories
    /// keep working; tagged data stops rehydrating.
    pub fn reset_registry(&self) {
        let dropped = self.inner.registry.borrow_mut().clear();
        debug!(dropped, "registry reset");
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registry.borrow().contains(name)
    }

    pub fn registered_models(&self) -> Vec<String> {
        self.inner.registry.borrow().names()
    }

    /// Rebuilds an instance from a tagged snapshot, e.g. one produced by
    /// [`Instance::get_snapshot`].
    pub fn rehydrate(&self, data: &Value) -> Result<Option<Instance>, ModelError> {
        let Value::Object(fields) = data else {
            return Ok(None);
        };
        let fields: IndexMap<String, Input> = fields
            .iter()
            .map(|(key, value)| (key.clone(), Input::Value(value.clone())))
            .collect();
        match self.tagged_definition(&fields) {
            Some(definition) => self.instantiate(definition, Input::Record(fields)).map(Some),
            None => Ok(None),
        }
    }

    /// Number of state nodes currently alive across all instances.
    pub fn live_nodes(&self) -> usize {
        self.collect();
        self.arena().live_nodes()
    }

    pub fn live_instances(&self) -> usize {
        self.collect();
        self.arena().live_instances()
    }

    /// Async actions whose continuation has not finished yet.
    pub fn pending_actions(&self) -> usize {
        self.inner
            .pending
            .borrow()
            .iter()
            .filter(|action| !action.is_done())
            .count()
    }

    /// Drives every in-flight async action to completion, including those
    /// whose returned task the caller dropped. Their `action-complete` and
    /// `snapshot` events fire as each one settles.
    pub async fn run_pending(&self) {
        future::poll_fn(|cx| self.poll_pending(cx)).await
    }

    fn poll_pending(&self, cx: &mut Context<'_>) -> Poll<()> {
        let in_flight: Vec<Rc<PendingAction>> = self.inner.pending.borrow().clone();
        for action in &in_flight {
            let _ = action.drive(cx);
        }
        let mut pending = self.inner.pending.borrow_mut();
        pending.retain(|action| !action.is_done());
        if pending.is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    pub(crate) fn track_pending(&self, action: Rc<PendingAction>) {
        let mut pending = self.inner.pending.borrow_mut();
        pending.retain(|action| !action.is_done());
        pending.push(action);
    }

    pub(crate) fn retain_handle(&self, id: InstanceId) {
        *self.inner.handles.borrow_mut().counts.entry(id).or_default() += 1;
    }

    pub(crate) fn drop_handle(&self, id: InstanceId) {
        let last = {
            let mut handles = self.inner.handles.borrow_mut();
            let count = handles.counts.get(&id).copied().unwrap_or(0);
            if count > 1 {
                handles.counts.insert(id, count - 1);
            } else {
                handles.counts.remove(&id);
                handles.released.push(id);
            }
            count <= 1
        };
        if last {
            self.collect();
        }
    }

    /// Frees every instance that has no handle left and is not linked into
    /// a container. Skipped while the arena is borrowed; the candidates are
    /// kept for the next run.
    pub(crate) fn collect(&self) {
        let mut freed = Vec::new();
        {
            let Ok(mut arena) = self.inner.arena.try_borrow_mut() else {
                return;
            };
            let Ok(mut handles) = self.inner.handles.try_borrow_mut() else {
                return;
            };
            let mut candidates = std::mem::take(&mut handles.released);
            loop {
                candidates.extend(arena.take_unlinked());
                let Some(id) = candidates.pop() else {
                    break;
                };
                if handles.counts.contains_key(&id) {
                    continue;
                }
                if let Some(bus) = arena.free_instance(id) {
                    trace!(instance = ?id, "instance freed");
                    freed.push(bus);
                }
            }
        }
        // Handlers may own instances of their own; drop them unborrowed.
        drop(freed);
    }

    /// Drops an instance that failed to build before any handle existed.
    fn discard(&self, id: InstanceId) {
        self.inner.handles.borrow_mut().released.push(id);
        self.collect();
    }

    /// Frees a slot taken out of its container.
    pub(crate) fn release_slot(&self, slot: Slot) {
        self.arena_mut().release(slot);
        self.collect();
    }

    pub(crate) fn instantiate(
        &self,
        definition: Rc<Definition>,
        overrides: Input,
    ) -> Result<Instance, ModelError> {
        let name = definition.name().to_string();
        let model_key = self.config().model_key.clone();
        let mut fields = definition
            .initial()
            .into_fields()
            .map_err(|_| DefinitionError::InitialNotRecord { model: name.clone() })?;
        if let Some(member) = fields
            .keys()
            .find(|key| **key != model_key && definition.has_member(key))
        {
            return Err(DefinitionError::FieldShadowsMember {
                model: name,
                name: member.clone(),
            }
            .into());
        }
        if !overrides.is_null() {
            let overrides = overrides
                .into_fields()
                .map_err(|_| ModelError::InvalidOverrides)?;
            for (key, value) in overrides {
                // Member names are reserved, as in snapshots.
                if key != model_key && definition.has_member(&key) {
                    debug!(model = %name, field = %key, "override named like a member ignored");
                    continue;
                }
                fields.insert(key, value);
            }
        }
        fields.shift_remove(&model_key);

        let (id, root) = {
            let mut arena = self.arena_mut();
            let root = arena.alloc(Shape::Record(IndexMap::new()), None);
            let id = arena.push_instance(InstanceRecord {
                definition: Rc::clone(&definition),
                root,
                bus: Rc::new(EventBus::new()),
                views: ViewCache::default(),
            });
            let raw = arena.node_mut(root)?;
            raw.model = Some(id);
            if let Shape::Record(record) = &mut raw.shape {
                record.insert(model_key, Slot::Scalar(Value::String(name.clone())));
            }
            (id, root)
        };
        for (key, value) in fields {
            let slot = self
                .materialize(value, root)
                .inspect_err(|_| self.discard(id))?;
            self.arena_mut().record_mut(root)?.insert(key, slot);
        }
        debug!(model = %name, "instance created");
        Ok(Instance::new(self.clone(), id))
    }

    fn tagged_definition(&self, fields: &IndexMap<String, Input>) -> Option<Rc<Definition>> {
        let Some(Input::Value(Value::String(name))) = fields.get(&self.config().model_key) else {
            return None;
        };
        let found = self.inner.registry.borrow().lookup(name);
        match &found {
            Some(_) => debug!(model = %name, "rehydrating tagged record"),
            None => debug!(model = %name, "rehydration miss: model not registered"),
        }
        found
    }

    /// Turns `input` into a slot whose nodes hang below `parent`.
    ///
    /// Tagged records of registered models become instances; live instances
    /// are moved rather than copied.
    pub(crate) fn materialize(&self, input: Input, parent: NodeId) -> Result<Slot, ModelError> {
        match input {
            Input::Value(Value::Array(items)) => {
                self.materialize_list(items.into_iter().map(Input::Value).collect(), parent)
            }
            Input::List(items) => self.materialize_list(items, parent),
            Input::Value(Value::Object(_)) | Input::Record(_) => match input.into_fields() {
                Ok(fields) => self.materialize_record(fields, parent),
                Err(_) => Err(ModelError::NotARecord),
            },
            Input::Value(scalar) => Ok(Slot::Scalar(scalar)),
            Input::Date(date) => Ok(Slot::Date(date)),
            Input::Model(instance) => self.adopt(&instance, parent),
        }
    }

    fn materialize_record(
        &self,
        fields: IndexMap<String, Input>,
        parent: NodeId,
    ) -> Result<Slot, ModelError> {
        if let Some(definition) = self.tagged_definition(&fields) {
            let instance = self.instantiate(definition, Input::Record(fields))?;
            return self.adopt(&instance, parent);
        }
        let node = self.arena_mut().alloc(Shape::Record(IndexMap::new()), Some(parent));
        for (key, value) in fields {
            let slot = self.materialize(value, node).inspect_err(|_| {
                self.arena_mut().release(Slot::Node(node));
            })?;
            self.arena_mut().record_mut(node)?.insert(key, slot);
        }
        Ok(Slot::Node(node))
    }

    fn materialize_list(&self, items: Vec<Input>, parent: NodeId) -> Result<Slot, ModelError> {
        let node = self.arena_mut().alloc(Shape::List(Vec::new()), Some(parent));
        for item in items {
            let slot = self.materialize(item, node).inspect_err(|_| {
                self.arena_mut().release(Slot::Node(node));
            })?;
            self.arena_mut().list_mut(node)?.push(slot);
        }
        Ok(Slot::Node(node))
    }

    /// Moves an existing instance below `parent`.
    ///
    /// The container that held it so far keeps null in its place.
    fn adopt(&self, instance: &Instance, parent: NodeId) -> Result<Slot, ModelError> {
        if !instance.store().ptr_eq(self) {
            return Err(ModelError::ForeignInstance);
        }
        let root = instance.root_node();
        if self.arena().is_ancestor_or_self(root, parent) {
            return Err(ModelError::Cycle);
        }
        self.unlink(root)?;
        self.arena_mut().node_mut(root)?.parent = Some(parent);
        Ok(Slot::Node(root))
    }

    /// Takes instance root `root` out of its current container, leaving
    /// null behind; the previous owner gets a patch for that position.
    fn unlink(&self, root: NodeId) -> Result<(), ModelError> {
        let link = {
            let arena = self.arena();
            let container = arena.node(root)?.parent;
            let segment = container.and_then(|container| arena.segment_of(container, root));
            container.zip(segment)
        };
        let Some((container, segment)) = link else {
            return Ok(());
        };
        {
            let mut arena = self.arena_mut();
            let vacated = match &mut arena.node_mut(container)?.shape {
                Shape::Record(fields) => fields.get_mut(&segment),
                Shape::List(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get_mut(index)),
            };
            if let Some(slot) = vacated {
                *slot = Slot::Scalar(Value::Null);
            }
            arena.node_mut(root)?.parent = None;
        }
        trace!(segment = %segment, "instance moved out of its container");
        self.emit_change(container, Some(&segment), Value::Null);
        Ok(())
    }

    /// `true` when writing `input` over `slot` would change nothing.
    pub(crate) fn holds(&self, slot: &Slot, input: &Input) -> bool {
        match (slot, input) {
            (Slot::Scalar(current), Input::Value(next)) => {
                !matches!(next, Value::Array(_) | Value::Object(_)) && current == next
            }
            (Slot::Date(current), Input::Date(next)) => current == next,
            (Slot::Node(node), Input::Model(instance)) => {
                instance.store().ptr_eq(self) && instance.root_node() == *node
            }
            _ => false,
        }
    }

    /// Emits the patch for a write below `node`.
    pub(crate) fn emit_change(&self, node: NodeId, tail: Option<&str>, value: Value) {
        let located = self.arena().locate(node);
        let Some((owner, mut path)) = located else {
            trace!("write below a released node; no patch emitted");
            return;
        };
        if let Some(segment) = tail {
            path.push(segment);
        }
        self.dispatch(owner, Event::patch(&path, value));
    }

    /// Delivers `event` on the bus of `origin`, then on each ancestor's bus
    /// with the path re-addressed for that ancestor.
    ///
    /// Patches invalidate the views of every instance they reach. Snapshot
    /// events carry the snapshot of the receiving instance and are only
    /// built for buses that have listeners.
    pub(crate) fn dispatch(&self, origin: InstanceId, event: Event) {
        let mut current = Some(origin);
        let mut event = event;
        while let Some(id) = current {
            let is_patch = event.as_patch().is_some();
            let bus = {
                let mut arena = self.arena_mut();
                if !arena.is_live(id) {
                    trace!(instance = ?id, "instance freed while dispatching");
                    break;
                }
                let record = arena.instance_mut(id);
                if is_patch {
                    record.views.invalidate();
                }
                Rc::clone(&record.bus)
            };
            if is_patch && self.config().view_policy == ViewPolicy::Eager {
                Instance::new(self.clone(), id).refresh_views();
            }

            let kind = event.kind();
            trace!(instance = ?id, kind, path = ?event.path(), "event dispatched");
            if kind == SNAPSHOT {
                if bus.has_listeners(SNAPSHOT) {
                    match self.snapshot_of(id) {
                        Ok(snapshot) => bus.emit(SNAPSHOT, &Event::Snapshot { snapshot }),
                        Err(err) => warn!(error = %err, "snapshot unavailable"),
                    }
                }
            } else {
                bus.emit(kind, &event);
            }

            let link = self.arena().instance_parent(id);
            current = match link {
                Some((parent, prefix)) => {
                    event = event.prefixed(&prefix);
                    Some(parent)
                }
                None => None,
            };
        }
    }
}
