//! Raw node storage.
//!
//! Every composite value of every instance lives in one [`Arena`] slot,
//! addressed by a generational [`NodeId`]. Nodes only know their parent;
//! paths and owning instances are recovered by walking parent links, so
//! list splices never leave stale addresses behind.

use std::rc::Rc;

use arbor_path::Path;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use crate::bus::EventBus;
use crate::error::ModelError;
use crate::event::Event;
use crate::model::Definition;
use crate::view::ViewCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Scalar(Value),
    Date(DateTime<Utc>),
    Node(NodeId),
}

#[derive(Debug)]
pub(crate) enum Shape {
    Record(IndexMap<String, Slot>),
    List(Vec<Slot>),
}

impl Shape {
    fn children(&self) -> Vec<NodeId> {
        let slots: Box<dyn Iterator<Item = &Slot>> = match self {
            Shape::Record(fields) => Box::new(fields.values()),
            Shape::List(items) => Box::new(items.iter()),
        };
        slots
            .filter_map(|slot| match slot {
                Slot::Node(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct RawNode {
    pub shape: Shape,
    pub parent: Option<NodeId>,
    /// Set on the root record of an instance.
    pub model: Option<InstanceId>,
}

struct Cell {
    generation: u32,
    node: Option<RawNode>,
}

pub(crate) struct InstanceRecord {
    pub definition: Rc<Definition>,
    pub root: NodeId,
    pub bus: Rc<EventBus<Event>>,
    pub views: ViewCache,
}

struct InstanceCell {
    generation: u32,
    live: bool,
    record: InstanceRecord,
}

#[derive(Default)]
pub(crate) struct Arena {
    cells: Vec<Cell>,
    free: Vec<usize>,
    instances: Vec<InstanceCell>,
    free_instances: Vec<usize>,
    /// Instances whose root lost its parent link since the last collection.
    unlinked: Vec<InstanceId>,
}

impl Arena {
    pub fn alloc(&mut self, shape: Shape, parent: Option<NodeId>) -> NodeId {
        let node = RawNode {
            shape,
            parent,
            model: None,
        };
        if let Some(index) = self.free.pop() {
            let cell = &mut self.cells[index];
            cell.node = Some(node);
            return NodeId {
                index,
                generation: cell.generation,
            };
        }
        let index = self.cells.len();
        self.cells.push(Cell {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub fn node(&self, id: NodeId) -> Result<&RawNode, ModelError> {
        self.cells
            .get(id.index)
            .filter(|cell| cell.generation == id.generation)
            .and_then(|cell| cell.node.as_ref())
            .ok_or(ModelError::Detached)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut RawNode, ModelError> {
        self.cells
            .get_mut(id.index)
            .filter(|cell| cell.generation == id.generation)
            .and_then(|cell| cell.node.as_mut())
            .ok_or(ModelError::Detached)
    }

    pub fn record(&self, id: NodeId) -> Result<&IndexMap<String, Slot>, ModelError> {
        match &self.node(id)?.shape {
            Shape::Record(fields) => Ok(fields),
            Shape::List(_) => Err(ModelError::NotARecord),
        }
    }

    pub fn record_mut(&mut self, id: NodeId) -> Result<&mut IndexMap<String, Slot>, ModelError> {
        match &mut self.node_mut(id)?.shape {
            Shape::Record(fields) => Ok(fields),
            Shape::List(_) => Err(ModelError::NotARecord),
        }
    }

    pub fn list(&self, id: NodeId) -> Result<&Vec<Slot>, ModelError> {
        match &self.node(id)?.shape {
            Shape::List(items) => Ok(items),
            Shape::Record(_) => Err(ModelError::NotAList),
        }
    }

    pub fn list_mut(&mut self, id: NodeId) -> Result<&mut Vec<Slot>, ModelError> {
        match &mut self.node_mut(id)?.shape {
            Shape::List(items) => Ok(items),
            Shape::Record(_) => Err(ModelError::NotAList),
        }
    }

    /// Frees a slot that has been unlinked from its container.
    ///
    /// Plain nodes are freed recursively. Instance roots only lose their
    /// parent link; the instance itself is freed by the store once no
    /// handle refers to it.
    pub fn release(&mut self, slot: Slot) {
        let Slot::Node(id) = slot else {
            return;
        };
        let Ok(node) = self.node_mut(id) else {
            return;
        };
        if let Some(model) = node.model {
            node.parent = None;
            self.unlinked.push(model);
            return;
        }
        self.release_plain(id);
    }

    fn release_plain(&mut self, id: NodeId) {
        let Some(node) = self.cells[id.index].node.take() else {
            return;
        };
        for child in node.shape.children() {
            let Ok(raw) = self.node_mut(child) else {
                continue;
            };
            let (model, linked_here) = (raw.model, raw.parent == Some(id));
            match model {
                Some(model) => {
                    if linked_here {
                        raw.parent = None;
                        self.unlinked.push(model);
                    }
                }
                None => self.release_plain(child),
            }
        }
        let cell = &mut self.cells[id.index];
        cell.generation = cell.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    /// The key or index under which `parent` currently stores `child`.
    pub fn segment_of(&self, parent: NodeId, child: NodeId) -> Option<String> {
        let target = Slot::Node(child);
        match &self.node(parent).ok()?.shape {
            Shape::Record(fields) => fields
                .iter()
                .find(|(_, slot)| **slot == target)
                .map(|(key, _)| key.clone()),
            Shape::List(items) => items
                .iter()
                .position(|slot| *slot == target)
                .map(|index| index.to_string()),
        }
    }

    /// Owning instance of `node` and the path from that instance's root.
    ///
    /// `None` when the node, or one of its ancestors, is no longer linked
    /// into an instance.
    pub fn locate(&self, node: NodeId) -> Option<(InstanceId, Path)> {
        let mut segments = Vec::new();
        let mut current = node;
        loop {
            let raw = self.node(current).ok()?;
            if let Some(owner) = raw.model {
                segments.reverse();
                return Some((owner, Path::from_segments(segments)));
            }
            let parent = raw.parent?;
            segments.push(self.segment_of(parent, current)?);
            current = parent;
        }
    }

    /// The instance that contains `id` as a child, and where it sees it.
    pub fn instance_parent(&self, id: InstanceId) -> Option<(InstanceId, Path)> {
        let root = self.instance(id).root;
        let parent = self.node(root).ok()?.parent?;
        let segment = self.segment_of(parent, root)?;
        let (owner, path) = self.locate(parent)?;
        Some((owner, path.child(segment)))
    }

    /// `true` when `ancestor` is `node` or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).ok().and_then(|raw| raw.parent);
        }
        false
    }

    pub fn push_instance(&mut self, record: InstanceRecord) -> InstanceId {
        if let Some(index) = self.free_instances.pop() {
            let cell = &mut self.instances[index];
            cell.live = true;
            cell.record = record;
            return InstanceId {
                index,
                generation: cell.generation,
            };
        }
        let index = self.instances.len();
        self.instances.push(InstanceCell {
            generation: 0,
            live: true,
            record,
        });
        InstanceId {
            index,
            generation: 0,
        }
    }

    /// Record of a live instance. Ids only come from live handles and
    /// linked roots, so the slot always holds that instance.
    pub fn instance(&self, id: InstanceId) -> &InstanceRecord {
        &self.instances[id.index].record
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> &mut InstanceRecord {
        &mut self.instances[id.index].record
    }

    pub fn is_live(&self, id: InstanceId) -> bool {
        self.instances
            .get(id.index)
            .is_some_and(|cell| cell.live && cell.generation == id.generation)
    }

    pub fn take_unlinked(&mut self) -> Vec<InstanceId> {
        std::mem::take(&mut self.unlinked)
    }

    /// Frees instance `id` with its whole state subtree, unless its root
    /// is still linked into a container.
    ///
    /// Returns the bus of the freed instance so the caller can drop its
    /// handlers outside any borrow of the arena.
    pub fn free_instance(&mut self, id: InstanceId) -> Option<Rc<EventBus<Event>>> {
        if !self.is_live(id) {
            return None;
        }
        let root = self.instance(id).root;
        if self.node(root).is_ok_and(|raw| raw.parent.is_some()) {
            return None;
        }
        self.release_plain(root);
        self.free_instances.push(id.index);
        let cell = &mut self.instances[id.index];
        cell.live = false;
        cell.generation = cell.generation.wrapping_add(1);
        cell.record.views = ViewCache::default();
        Some(std::mem::replace(&mut cell.record.bus, Rc::new(EventBus::new())))
    }

    pub fn live_nodes(&self) -> usize {
        self.cells.iter().filter(|cell| cell.node.is_some()).count()
    }

    pub fn live_instances(&self) -> usize {
        self.instances.iter().filter(|cell| cell.live).count()
    }
}
