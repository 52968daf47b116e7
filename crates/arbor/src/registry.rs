use std::collections::HashMap;
use std::rc::Rc;

use crate::model::Definition;

/// Model names known to one store, used to rehydrate tagged plain data.
#[derive(Default)]
pub(crate) struct Registry {
    definitions: HashMap<String, Rc<Definition>>,
}

impl Registry {
    /// Registers `definition` under its name, returning the one it replaced.
    pub(crate) fn register(&mut self, definition: Rc<Definition>) -> Option<Rc<Definition>> {
        self.definitions
            .insert(definition.name().to_string(), definition)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Rc<Definition>> {
        self.definitions.get(name).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.definitions.len();
        self.definitions.clear();
        dropped
    }
}
