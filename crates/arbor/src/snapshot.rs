//! Plain-data export and reconciling import of instance state.

use arbor_path::Path;
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

use crate::arena::{Arena, InstanceId, NodeId, Shape, Slot};
use crate::error::ModelError;
use crate::event::Event;
use crate::facade::Mutable;
use crate::input::Input;
use crate::model::Instance;
use crate::store::Store;

/// Serializes a slot and everything below it. Dates become RFC 3339 strings.
struct SlotRef<'a> {
    arena: &'a Arena,
    slot: &'a Slot,
}

impl Serialize for SlotRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.slot {
            Slot::Scalar(value) => value.serialize(serializer),
            Slot::Date(date) => date.serialize(serializer),
            Slot::Node(id) => {
                let node = self.arena.node(*id).map_err(S::Error::custom)?;
                match &node.shape {
                    Shape::Record(fields) => {
                        let mut map = serializer.serialize_map(Some(fields.len()))?;
                        for (key, slot) in fields {
                            map.serialize_entry(key, &self.nested(slot))?;
                        }
                        map.end()
                    }
                    Shape::List(items) => {
                        let mut seq = serializer.serialize_seq(Some(items.len()))?;
                        for slot in items {
                            seq.serialize_element(&self.nested(slot))?;
                        }
                        seq.end()
                    }
                }
            }
        }
    }
}

impl<'a> SlotRef<'a> {
    fn nested(&self, slot: &'a Slot) -> SlotRef<'a> {
        SlotRef {
            arena: self.arena,
            slot,
        }
    }
}

impl Store {
    pub(crate) fn plain(&self, slot: &Slot) -> Result<Value, ModelError> {
        let arena = self.arena();
        if let Slot::Node(id) = slot {
            arena.node(*id)?;
        }
        Ok(serde_json::to_value(SlotRef {
            arena: &arena,
            slot,
        })?)
    }

    pub(crate) fn snapshot_of(&self, id: InstanceId) -> Result<Value, ModelError> {
        let root = self.arena().instance(id).root;
        self.plain(&Slot::Node(root))
    }

    fn reconcile_record(
        &self,
        owner: &Instance,
        node: NodeId,
        next: &Map<String, Value>,
    ) -> Result<(), ModelError> {
        let definition = owner.definition();
        let model_key = self.config().model_key.as_str();
        let keys: IndexSet<String> = self
            .arena()
            .record(node)?
            .keys()
            .cloned()
            .chain(next.keys().cloned())
            .collect();
        let target = Mutable::new(self.clone(), node);
        for key in keys {
            if definition.is_reserved(&key, model_key) {
                continue;
            }
            let current = self.arena().record(node)?.get(&key).cloned();
            match (current, next.get(&key)) {
                (None, None) => {}
                (Some(_), None) => {
                    target.remove(&key)?;
                }
                (current, Some(value)) => {
                    self.reconcile_slot(owner, current, value, |input| target.set(&key, input))?;
                }
            }
        }
        Ok(())
    }

    fn reconcile_list(
        &self,
        owner: &Instance,
        node: NodeId,
        next: &[Value],
    ) -> Result<(), ModelError> {
        let target = Mutable::new(self.clone(), node);
        let len = target.len();
        for (index, value) in next.iter().enumerate() {
            if index < len {
                let current = self.arena().list(node)?.get(index).cloned();
                self.reconcile_slot(owner, current, value, |input| target.set_at(index, input))?;
            } else {
                target.push(value.clone())?;
            }
        }
        target.truncate(next.len())
    }

    /// Brings one slot in line with `next`, writing through `write` only
    /// where the stored value actually differs.
    fn reconcile_slot<W>(
        &self,
        owner: &Instance,
        current: Option<Slot>,
        next: &Value,
        write: W,
    ) -> Result<(), ModelError>
    where
        W: FnOnce(Input) -> Result<(), ModelError>,
    {
        match (current, next) {
            (Some(Slot::Scalar(value)), next) if value == *next => Ok(()),
            (Some(Slot::Date(date)), Value::String(text)) => {
                match DateTime::parse_from_rfc3339(text) {
                    Ok(parsed) if parsed == date => Ok(()),
                    Ok(parsed) => write(Input::Date(parsed.with_timezone(&Utc))),
                    Err(_) => write(Input::Value(next.clone())),
                }
            }
            (Some(Slot::Node(id)), Value::Object(fields)) => {
                let (model, is_record) = {
                    let arena = self.arena();
                    let raw = arena.node(id)?;
                    (raw.model, matches!(raw.shape, Shape::Record(_)))
                };
                match model {
                    Some(child) if child != owner.id() => {
                        Instance::new(self.clone(), child).apply_snapshot(next, true)
                    }
                    _ if is_record => self.reconcile_record(owner, id, fields),
                    _ => write(Input::Value(next.clone())),
                }
            }
            (Some(Slot::Node(id)), Value::Array(items)) if self.arena().list(id).is_ok() => {
                self.reconcile_list(owner, id, items)
            }
            _ => write(Input::Value(next.clone())),
        }
    }
}

impl Instance {
    /// Plain-data copy of the whole instance, nested instances included.
    pub fn get_snapshot(&self) -> Result<Value, ModelError> {
        self.store().snapshot_of(self.id())
    }

    /// Plain-data copy of the subtree at `pointer`, `None` if nothing is there.
    pub fn snapshot_at(&self, pointer: &str) -> Result<Option<Value>, ModelError> {
        let path: Path = pointer.parse()?;
        self.state()
            .resolve(&path)
            .map(|entry| entry.to_value())
            .transpose()
    }

    /// Reconciles state with `data`.
    ///
    /// Only leaves that differ are written, each producing its usual patch.
    /// Keys missing from `data` are removed. The model tag and member names
    /// are skipped at every depth. Nested instances receive their part of
    /// `data` silently. Unless `silent`, one `snapshot` event follows.
    pub fn apply_snapshot(&self, data: &Value, silent: bool) -> Result<(), ModelError> {
        let Value::Object(fields) = data else {
            return Err(ModelError::NotARecord);
        };
        self.store()
            .reconcile_record(self, self.root_node(), fields)?;
        debug!(model = %self.model_name(), silent, "snapshot applied");
        if !silent {
            self.store().dispatch(
                self.id(),
                Event::Snapshot {
                    snapshot: Value::Null,
                },
            );
        }
        Ok(())
    }
}
