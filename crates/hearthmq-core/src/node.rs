//! Observable nodes
//!
//! A [`Node`] is a cloneable handle to a named set of JSON properties.
//! Every assignment notifies the node's observers synchronously, in
//! subscription order, after the property lock has been released.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::topic::validate_level;
use crate::{Error, Result, Value};

/// Identifier returned by [`Node::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Property change callback: `(node, property, new value)`
pub type Observer = Arc<dyn Fn(&Node, &str, &Value) + Send + Sync>;

struct NodeInner {
    id: String,
    name: String,
    properties: RwLock<BTreeMap<String, Value>>,
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

/// A logical device with observable properties
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node. The id becomes a topic level, so it must not be empty
    /// or contain `/`, `+` or `#`.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !validate_level(&id) {
            return Err(Error::InvalidNodeId(id));
        }

        Ok(Self {
            inner: Arc::new(NodeInner {
                id,
                name: name.into(),
                properties: RwLock::new(BTreeMap::new()),
                observers: RwLock::new(Vec::new()),
                next_observer: AtomicU64::new(1),
            }),
        })
    }

    /// Create a node with initial property values. Observers registered
    /// later are not notified about these.
    pub fn with_properties<I, K>(
        id: impl Into<String>,
        name: impl Into<String>,
        properties: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let node = Self::new(id, name)?;
        node.inner
            .properties
            .write()
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v)));
        Ok(node)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get a property value
    pub fn get(&self, property: &str) -> Option<Value> {
        self.inner.properties.read().get(property).cloned()
    }

    /// Assign a property and notify every observer
    pub fn set(&self, property: &str, value: impl Into<Value>) {
        let value = value.into();
        self.inner
            .properties
            .write()
            .insert(property.to_string(), value.clone());

        // Observers may touch the node again, so call them without holding a lock
        let observers: Vec<Observer> = self
            .inner
            .observers
            .read()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();

        trace!(node = %self.id(), property, observers = observers.len(), "property set");
        for observer in observers {
            observer(self, property, &value);
        }
    }

    /// All properties as a JSON object
    pub fn snapshot(&self) -> Value {
        let props = self.inner.properties.read();
        Value::Object(props.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn property_names(&self) -> Vec<String> {
        self.inner.properties.read().keys().cloned().collect()
    }

    /// Register an observer for every future property assignment
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Node, &str, &Value) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.write();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    /// Check if two handles refer to the same node
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("properties", &*self.inner.properties.read())
            .field("observers", &self.observer_count())
            .finish()
    }
}
