//! Typed handles over state nodes.
//!
//! Every node can be seen through two facades: [`ReadOnly`], handed to
//! views, subscribers and outside callers, and [`Mutable`], handed to
//! action bodies. Both address the same node; only the mutable one writes.
//! Writes through a [`ReadOnly`] fail with
//! [`ModelError::MutationOutsideAction`].

use std::fmt;
use std::marker::PhantomData;

use arbor_path::{is_index, Path};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::arena::{NodeId, Shape, Slot};
use crate::error::ModelError;
use crate::input::Input;
use crate::model::Instance;
use crate::store::Store;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ReadAccess {}
    impl Sealed for super::WriteAccess {}
}

/// Access level of a [`Facade`].
pub trait Access: sealed::Sealed + 'static {
    const WRITABLE: bool;
}

#[derive(Debug)]
pub enum ReadAccess {}

#[derive(Debug)]
pub enum WriteAccess {}

impl Access for ReadAccess {
    const WRITABLE: bool = false;
}

impl Access for WriteAccess {
    const WRITABLE: bool = true;
}

pub struct Facade<A: Access> {
    store: Store,
    node: NodeId,
    _access: PhantomData<fn() -> A>,
}

pub type ReadOnly = Facade<ReadAccess>;
pub type Mutable = Facade<WriteAccess>;

/// What a facade finds under a key or index.
pub enum Entry<A: Access> {
    Value(Value),
    Date(DateTime<Utc>),
    Node(Facade<A>),
}

impl<A: Access> Clone for Facade<A> {
    fn clone(&self) -> Self {
        Self::new(self.store.clone(), self.node)
    }
}

impl<A: Access> PartialEq for Facade<A> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.store.ptr_eq(&other.store)
    }
}

impl<A: Access> fmt::Debug for Facade<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(if A::WRITABLE { "Mutable" } else { "ReadOnly" })
            .field("node", &self.node)
            .field("value", &self.to_value().ok())
            .finish()
    }
}

impl<A: Access> Facade<A> {
    pub(crate) fn new(store: Store, node: NodeId) -> Self {
        Self {
            store,
            node,
            _access: PhantomData,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// `false` once the node has been replaced or removed from its instance.
    pub fn is_attached(&self) -> bool {
        self.store.arena().locate(self.node).is_some()
    }

    fn entry(&self, slot: Slot) -> Entry<A> {
        match slot {
            Slot::Scalar(value) => Entry::Value(value),
            Slot::Date(date) => Entry::Date(date),
            Slot::Node(id) => Entry::Node(Facade::new(self.store.clone(), id)),
        }
    }

    fn slot(&self, key: &str) -> Option<Slot> {
        let arena = self.store.arena();
        match &arena.node(self.node).ok()?.shape {
            Shape::Record(fields) => fields.get(key).cloned(),
            Shape::List(items) if is_index(key) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i).cloned())
            }
            Shape::List(_) => None,
        }
    }

    /// Field `key` of a record, or item `key` of a list when `key` is an index.
    pub fn get(&self, key: &str) -> Option<Entry<A>> {
        self.slot(key).map(|slot| self.entry(slot))
    }

    pub fn at(&self, index: usize) -> Option<Entry<A>> {
        let slot = self.store.arena().list(self.node).ok()?.get(index).cloned();
        slot.map(|slot| self.entry(slot))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slot(key).is_some()
    }

    /// Record keys in insertion order, or list indices.
    pub fn keys(&self) -> Vec<String> {
        let arena = self.store.arena();
        match arena.node(self.node).map(|node| &node.shape) {
            Ok(Shape::Record(fields)) => fields.keys().cloned().collect(),
            Ok(Shape::List(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn entries(&self) -> Vec<(String, Entry<A>)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|entry| (key, entry)))
            .collect()
    }

    /// List items, or record values in key order.
    pub fn items(&self) -> Vec<Entry<A>> {
        self.entries().into_iter().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        let arena = self.store.arena();
        match arena.node(self.node).map(|node| &node.shape) {
            Ok(Shape::Record(fields)) => fields.len(),
            Ok(Shape::List(items)) => items.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_list(&self) -> bool {
        self.store.arena().list(self.node).is_ok()
    }

    pub fn is_record(&self) -> bool {
        self.store.arena().record(self.node).is_ok()
    }

    pub fn resolve(&self, path: &Path) -> Option<Entry<A>> {
        let mut current = Entry::Node(self.clone());
        for segment in path.segments() {
            current = match current {
                Entry::Node(node) => node.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Looks up a JSON pointer relative to this node; `""` is the node itself.
    pub fn pointer(&self, pointer: &str) -> Option<Entry<A>> {
        self.resolve(&Path::parse(pointer).ok()?)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)?.as_str().map(str::to_string)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_i64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_f64()
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key)?.as_date()
    }

    pub fn get_node(&self, key: &str) -> Option<Facade<A>> {
        self.get(key)?.into_node()
    }

    /// Plain-data copy of the subtree.
    pub fn to_value(&self) -> Result<Value, ModelError> {
        self.store.plain(&Slot::Node(self.node))
    }

    /// Location relative to the owning instance, e.g. `/todos/0`.
    pub fn path(&self) -> Option<Path> {
        self.store.arena().locate(self.node).map(|(_, path)| path)
    }

    /// The instance whose state contains this node.
    pub fn owner(&self) -> Option<Instance> {
        let located = self.store.arena().locate(self.node);
        located.map(|(id, _)| Instance::new(self.store.clone(), id))
    }

    /// The instance rooted at this node, if it is one.
    pub fn model(&self) -> Option<Instance> {
        let model = self.store.arena().node(self.node).ok()?.model;
        model.map(|id| Instance::new(self.store.clone(), id))
    }

    pub fn read_only(&self) -> ReadOnly {
        Facade::new(self.store.clone(), self.node)
    }

    fn location(&self, tail: Option<String>) -> String {
        let mut path = self.path().unwrap_or_default();
        if let Some(segment) = tail {
            path.push(segment);
        }
        path.to_string()
    }
}

impl<A: Access> Entry<A> {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value()?.as_str()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value()?.as_bool()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value()?.as_i64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value()?.as_f64()
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Entry::Date(date) => Some(*date),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Entry::Value(Value::Null))
    }

    pub fn as_node(&self) -> Option<&Facade<A>> {
        match self {
            Entry::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<Facade<A>> {
        match self {
            Entry::Node(node) => Some(node),
            _ => None,
        }
    }

    /// The nested instance this entry holds, if any.
    pub fn into_model(self) -> Option<Instance> {
        self.into_node()?.model()
    }

    pub fn to_value(&self) -> Result<Value, ModelError> {
        match self {
            Entry::Value(value) => Ok(value.clone()),
            Entry::Date(date) => Ok(serde_json::to_value(date)?),
            Entry::Node(node) => node.to_value(),
        }
    }
}

impl<A: Access> fmt::Debug for Entry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Entry::Date(date) => f.debug_tuple("Date").field(date).finish(),
            Entry::Node(node) => f.debug_tuple("Node").field(node).finish(),
        }
    }
}

impl<A: Access> PartialEq<Value> for Entry<A> {
    fn eq(&self, other: &Value) -> bool {
        self.to_value().is_ok_and(|value| value == *other)
    }
}

impl Facade<ReadAccess> {
    fn refuse(&self, tail: Option<String>) -> ModelError {
        ModelError::MutationOutsideAction {
            path: self.location(tail),
        }
    }

    pub fn set(&self, key: &str, _value: impl Into<Input>) -> Result<(), ModelError> {
        Err(self.refuse(Some(key.to_string())))
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, ModelError> {
        Err(self.refuse(Some(key.to_string())))
    }

    pub fn set_at(&self, index: usize, _value: impl Into<Input>) -> Result<(), ModelError> {
        Err(self.refuse(Some(index.to_string())))
    }

    pub fn push(&self, _value: impl Into<Input>) -> Result<usize, ModelError> {
        Err(self.refuse(None))
    }

    pub fn insert(&self, _index: usize, _value: impl Into<Input>) -> Result<(), ModelError> {
        Err(self.refuse(None))
    }

    pub fn remove_at(&self, _index: usize) -> Result<Value, ModelError> {
        Err(self.refuse(None))
    }

    pub fn truncate(&self, _len: usize) -> Result<(), ModelError> {
        Err(self.refuse(None))
    }

    pub fn clear(&self) -> Result<(), ModelError> {
        Err(self.refuse(None))
    }
}

impl Facade<WriteAccess> {
    /// Writes field `key`, emitting one patch at `<path>/<key>`.
    ///
    /// Writing a scalar or date equal to the current one, or the same
    /// instance, is a no-op. Composite values are always written. Views
    /// of the instance rooted here cannot be assigned.
    pub fn set(&self, key: &str, value: impl Into<Input>) -> Result<(), ModelError> {
        let input = value.into();
        if self.is_list() {
            let index = key
                .parse::<usize>()
                .ok()
                .filter(|_| is_index(key))
                .ok_or(ModelError::NotARecord)?;
            return self.set_at(index, input);
        }
        if self
            .model()
            .is_some_and(|model| model.definition().view(key).is_some())
        {
            return Err(ModelError::MutationOutsideAction {
                path: self.location(Some(key.to_string())),
            });
        }
        let current = self.store.arena().record(self.node)?.get(key).cloned();
        if current.is_some_and(|slot| self.store.holds(&slot, &input)) {
            return Ok(());
        }
        let slot = self.store.materialize(input, self.node)?;
        let value = self.store.plain(&slot)?;
        let previous = self
            .store
            .arena_mut()
            .record_mut(self.node)?
            .insert(key.to_string(), slot);
        if let Some(previous) = previous {
            self.store.release_slot(previous);
        }
        self.store.emit_change(self.node, Some(key), value);
        Ok(())
    }

    /// Deletes field `key`; subscribers see a patch with a null value.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, ModelError> {
        let removed = self.store.arena_mut().record_mut(self.node)?.shift_remove(key);
        let Some(removed) = removed else {
            return Ok(None);
        };
        let value = self.store.plain(&removed)?;
        self.store.release_slot(removed);
        self.store.emit_change(self.node, Some(key), Value::Null);
        Ok(Some(value))
    }

    /// Replaces item `index`; `index == len` appends.
    pub fn set_at(&self, index: usize, value: impl Into<Input>) -> Result<(), ModelError> {
        let input = value.into();
        let (current, len) = {
            let arena = self.store.arena();
            let items = arena.list(self.node)?;
            (items.get(index).cloned(), items.len())
        };
        if index > len {
            return Err(ModelError::IndexOutOfBounds { index, len });
        }
        let Some(current) = current else {
            return self.push(input).map(|_| ());
        };
        if self.store.holds(&current, &input) {
            return Ok(());
        }
        let slot = self.store.materialize(input, self.node)?;
        let value = self.store.plain(&slot)?;
        let previous = {
            let mut arena = self.store.arena_mut();
            let items = arena.list_mut(self.node)?;
            let len = items.len();
            let item = items
                .get_mut(index)
                .ok_or(ModelError::IndexOutOfBounds { index, len })?;
            std::mem::replace(item, slot)
        };
        self.store.release_slot(previous);
        self.store.emit_change(self.node, Some(&index.to_string()), value);
        Ok(())
    }

    /// Appends an item, emitting a patch at the new index. Returns that index.
    pub fn push(&self, value: impl Into<Input>) -> Result<usize, ModelError> {
        self.store.arena().list(self.node)?;
        let slot = self.store.materialize(value.into(), self.node)?;
        let value = self.store.plain(&slot)?;
        let index = {
            let mut arena = self.store.arena_mut();
            let items = arena.list_mut(self.node)?;
            items.push(slot);
            items.len() - 1
        };
        self.store
            .emit_change(self.node, Some(&index.to_string()), value);
        Ok(index)
    }

    /// Inserts before `index`. Shifts later items, so subscribers get one
    /// patch replacing the whole list.
    pub fn insert(&self, index: usize, value: impl Into<Input>) -> Result<(), ModelError> {
        let len = self.store.arena().list(self.node)?.len();
        if index > len {
            return Err(ModelError::IndexOutOfBounds { index, len });
        }
        let slot = self.store.materialize(value.into(), self.node)?;
        {
            let mut arena = self.store.arena_mut();
            let items = arena.list_mut(self.node)?;
            let at = index.min(items.len());
            items.insert(at, slot);
        }
        self.emit_list()
    }

    /// Removes item `index` and returns its plain value.
    pub fn remove_at(&self, index: usize) -> Result<Value, ModelError> {
        let removed = {
            let mut arena = self.store.arena_mut();
            let items = arena.list_mut(self.node)?;
            if index >= items.len() {
                return Err(ModelError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.remove(index)
        };
        let value = self.store.plain(&removed)?;
        self.store.release_slot(removed);
        self.emit_list()?;
        Ok(value)
    }

    /// Shortens the list to `len` items. Longer targets are a no-op.
    pub fn truncate(&self, len: usize) -> Result<(), ModelError> {
        let removed = {
            let mut arena = self.store.arena_mut();
            let items = arena.list_mut(self.node)?;
            if len >= items.len() {
                return Ok(());
            }
            items.split_off(len)
        };
        for slot in removed {
            self.store.release_slot(slot);
        }
        self.emit_list()
    }

    pub fn clear(&self) -> Result<(), ModelError> {
        self.truncate(0)
    }

    fn emit_list(&self) -> Result<(), ModelError> {
        let value = self.to_value()?;
        self.store.emit_change(self.node, None, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Actions, ModelDef};
    use serde_json::json;

    fn notes() -> Instance {
        let store = Store::new();
        store
            .define(
                "Notes",
                ModelDef::new(|| json!({"title": "inbox", "tags": ["a", "b"], "meta": {"pinned": false}}))
                    .actions(Actions::new().action("noop", |_, _| Ok(()))),
            )
            .unwrap()
            .create_default()
            .unwrap()
    }

    #[test]
    fn read_only_writes_report_the_target_path() {
        let notes = notes();
        let meta = notes.state().get_node("meta").unwrap();
        let err = meta.set("pinned", true).unwrap_err();
        assert!(err.is_mutation_outside_action());
        assert_eq!(err.to_string(), "state at `/meta/pinned` can only be modified inside an action");

        let tags = notes.state().get_node("tags").unwrap();
        assert!(tags.push("c").unwrap_err().is_mutation_outside_action());
        assert_eq!(notes.get_snapshot().unwrap()["tags"], json!(["a", "b"]));
    }

    #[test]
    fn lists_answer_index_keys() {
        let notes = notes();
        let tags = notes.state().get_node("tags").unwrap();
        assert!(tags.is_list());
        assert_eq!(tags.keys(), ["0", "1"]);
        assert_eq!(tags.get("1").unwrap(), json!("b"));
        assert!(tags.get("01").is_none());
        assert_eq!(notes.state().pointer("/tags/0").unwrap(), json!("a"));
        assert_eq!(notes.state().pointer("/meta").unwrap(), json!({"pinned": false}));
        assert!(notes.state().pointer("meta").is_none());
    }

    #[test]
    fn mutable_edits_keep_facades_addressing_the_same_node() {
        let notes = notes();
        let tags = notes.mutable().get_node("tags").unwrap();
        tags.insert(0, "z").unwrap();
        tags.set_at(3, "c").unwrap();
        assert_eq!(tags.remove_at(1).unwrap(), json!("a"));
        assert_eq!(tags.to_value().unwrap(), json!(["z", "b", "c"]));
        assert_eq!(tags.set_at(9, "x").unwrap_err().to_string(), "index 9 is out of bounds for a list of length 3");

        let meta = notes.mutable().get_node("meta").unwrap();
        notes.mutable().set("meta", json!({"pinned": true})).unwrap();
        assert!(!meta.is_attached());
        assert!(matches!(meta.to_value(), Err(ModelError::Detached)));
    }
}
