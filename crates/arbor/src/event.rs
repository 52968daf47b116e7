use arbor_path::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ACTION: &str = "action";
pub const ACTION_COMPLETE: &str = "action-complete";
pub const PATCH: &str = "patch";
pub const SNAPSHOT: &str = "snapshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
}

/// A single leaf replacement, addressed relative to the receiving instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEvent {
    pub path: String,
    pub op: PatchOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub name: String,
    pub path: String,
    pub args: Vec<Value>,
}

/// Everything an instance bus carries.
///
/// Serializes with a `type` tag, e.g.
/// `{"type":"patch","path":"/lastname","op":"replace","value":"Clancy"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    Action(ActionEvent),
    ActionComplete(ActionEvent),
    Patch(PatchEvent),
    Snapshot { snapshot: Value },
}

impl Event {
    pub(crate) fn patch(path: &Path, value: Value) -> Self {
        Event::Patch(PatchEvent {
            path: path.to_string(),
            op: PatchOp::Replace,
            value,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Action(_) => ACTION,
            Event::ActionComplete(_) => ACTION_COMPLETE,
            Event::Patch(_) => PATCH,
            Event::Snapshot { .. } => SNAPSHOT,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Event::Action(ev) | Event::ActionComplete(ev) => Some(&ev.path),
            Event::Patch(ev) => Some(&ev.path),
            Event::Snapshot { .. } => None,
        }
    }

    pub fn as_patch(&self) -> Option<&PatchEvent> {
        match self {
            Event::Patch(ev) => Some(ev),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<&ActionEvent> {
        match self {
            Event::Action(ev) | Event::ActionComplete(ev) => Some(ev),
            _ => None,
        }
    }

    pub fn as_snapshot(&self) -> Option<&Value> {
        match self {
            Event::Snapshot { snapshot } => Some(snapshot),
            _ => None,
        }
    }

    /// Re-addresses the event for an ancestor that sees the emitter at `prefix`.
    pub(crate) fn prefixed(mut self, prefix: &Path) -> Self {
        if prefix.is_root() {
            return self;
        }
        let prefix = prefix.to_string();
        match &mut self {
            Event::Action(ev) | Event::ActionComplete(ev) => ev.path.insert_str(0, &prefix),
            Event::Patch(ev) => ev.path.insert_str(0, &prefix),
            Event::Snapshot { .. } => {}
        }
        self
    }
}
