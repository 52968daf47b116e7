//! Cached derived values.

use std::collections::HashMap;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::error::ModelError;
use crate::facade::ReadOnly;
use crate::model::Instance;

pub(crate) type ViewFn = Rc<dyn Fn(&ReadOnly) -> Value>;

/// View table of a [`ModelDef`](crate::ModelDef).
#[derive(Default, Clone)]
pub struct Views {
    entries: Vec<(String, ViewFn)>,
}

impl Views {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a view. The body only ever sees the read-only facade.
    pub fn view<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ReadOnly) -> Value + 'static,
    {
        let body: ViewFn = Rc::new(move |this: &ReadOnly| body(this));
        self.entries.push((name.into(), body));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, ViewFn)> {
        self.entries
    }
}

/// Last computed value of each view of one instance.
///
/// A patch anywhere at or below the instance clears every entry.
#[derive(Debug, Default)]
pub(crate) struct ViewCache {
    values: HashMap<String, Value>,
    computed: usize,
}

impl ViewCache {
    pub(crate) fn fresh(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    pub(crate) fn store(&mut self, name: &str, value: Value) {
        self.computed += 1;
        self.values.insert(name.to_string(), value);
    }

    pub(crate) fn invalidate(&mut self) {
        self.values.clear();
    }

    pub(crate) fn computed(&self) -> usize {
        self.computed
    }
}

impl Instance {
    /// Current value of view `name`, recomputed only if state changed
    /// since the last read.
    pub fn view(&self, name: &str) -> Result<Value, ModelError> {
        let definition = self.definition();
        let body = definition
            .view(name)
            .ok_or_else(|| ModelError::UnknownView {
                model: definition.name().to_string(),
                name: name.to_string(),
            })?;
        let cached = self.store().arena().instance(self.id()).views.fresh(name);
        if let Some(value) = cached {
            return Ok(value);
        }
        trace!(model = %definition.name(), view = %name, "view recomputed");
        let value = body(&self.state());
        self.store()
            .arena_mut()
            .instance_mut(self.id())
            .views
            .store(name, value.clone());
        Ok(value)
    }

    pub fn view_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, ModelError> {
        Ok(serde_json::from_value(self.view(name)?)?)
    }

    /// How many times views of this instance have been evaluated.
    pub fn view_evaluations(&self) -> usize {
        self.store().arena().instance(self.id()).views.computed()
    }

    /// Evaluates every view not currently cached.
    pub(crate) fn refresh_views(&self) {
        for name in self.view_names() {
            if let Err(err) = self.view(&name) {
                tracing::warn!(view = %name, error = %err, "view refresh failed");
            }
        }
    }
}
