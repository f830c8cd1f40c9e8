use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// The full state of a table: opaque component states keyed by component id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMemento {
    components: BTreeMap<String, Vec<u8>>,
}

impl TableMemento {
    pub fn new(components: BTreeMap<String, Vec<u8>>) -> Self {
        TableMemento { components }
    }

    pub fn components(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.components
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// A change to one table component. A `state` of `None` removes the component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIncrement {
    component: String,
    state: Option<Vec<u8>>,
}

impl TableIncrement {
    pub fn set(component: &str, state: Vec<u8>) -> Self {
        TableIncrement {
            component: component.to_string(),
            state: Some(state),
        }
    }

    pub fn remove(component: &str) -> Self {
        TableIncrement {
            component: component.to_string(),
            state: None,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn state(&self) -> Option<&[u8]> {
        self.state.as_deref()
    }
}

/// The local table handle a node replicates. What a component state means is up to
/// the game, the network only moves the bytes.
pub trait Table: Send + Sync {
    fn memento(&self) -> TableMemento;
    fn set_memento(&self, memento: &TableMemento);
    fn apply_increment(&self, increment: &TableIncrement);
}

/// A table kept in memory, enough for a session that does not render anything.
#[derive(Debug, Default)]
pub struct InMemoryTable {
    components: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryTable {
    pub fn new() -> Self {
        InMemoryTable::default()
    }

    pub fn component(&self, component: &str) -> Option<Vec<u8>> {
        self.lock().get(component).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // a poisoned table still holds the last complete write
        self.components
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Table for InMemoryTable {
    fn memento(&self) -> TableMemento {
        TableMemento::new(self.lock().clone())
    }

    fn set_memento(&self, memento: &TableMemento) {
        *self.lock() = memento.components().clone();
    }

    fn apply_increment(&self, increment: &TableIncrement) {
        let mut components = self.lock();
        match increment.state() {
            Some(state) => {
                components.insert(increment.component().to_string(), state.to_vec());
            }
            None => {
                components.remove(increment.component());
            }
        }
    }
}
