//! Handler tables and handler context
//!
//! Handlers are async closures keyed by command or property name. The
//! tables are built once when a router is created; a lookup miss is
//! reported to the caller, which logs it and moves on.

use futures::future::BoxFuture;
use hearthmq_core::{Node, TopicScheme, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::{BridgeError, Messenger, Result};

/// Boxed handler future
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// A command or property handler: `(context, node, value)`
pub type Handler = Arc<dyn Fn(HandlerContext, Node, Value) -> HandlerFuture + Send + Sync>;

/// Name to handler mapping
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn insert<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(HandlerContext, Node, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |ctx, node, value| -> HandlerFuture {
            Box::pin(handler(ctx, node, value))
        });
        self.handlers.insert(name.into(), boxed);
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Inbound command handlers and outbound property handlers of a module
#[derive(Clone, Debug, Default)]
pub struct Handlers {
    pub commands: HandlerTable,
    pub properties: HandlerTable,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle inbound messages whose last topic level is `command`
    pub fn on_command<F, Fut>(mut self, command: impl Into<String>, handler: F) -> Self
    where
        F: Fn(HandlerContext, Node, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.commands.insert(command, handler);
        self
    }

    /// Handle assignments to `property`
    pub fn on_property<F, Fut>(mut self, property: impl Into<String>, handler: F) -> Self
    where
        F: Fn(HandlerContext, Node, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.properties.insert(property, handler);
        self
    }
}

/// What a handler can reach: the shared messenger and its router's component
#[derive(Clone)]
pub struct HandlerContext {
    messenger: Arc<dyn Messenger>,
    component: Option<Arc<str>>,
}

impl HandlerContext {
    pub fn new(messenger: Arc<dyn Messenger>, component: Option<&str>) -> Self {
        Self {
            messenger,
            component: component.map(Arc::from),
        }
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }

    pub fn topics(&self) -> &TopicScheme {
        self.messenger.topics()
    }

    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    fn require_component(&self) -> Result<&str> {
        self.component().ok_or(BridgeError::NoComponent)
    }

    /// Publish a JSON-encoded value
    pub async fn publish<T: Serialize + ?Sized + Sync>(
        &self,
        topic: &str,
        value: &T,
        retain: bool,
    ) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.messenger.publish(topic, payload.into(), retain).await
    }

    /// Publish a property value (retained) to the node's state topic
    pub async fn publish_state(&self, node: &Node, property: &str, value: &Value) -> Result<()> {
        let component = self.require_component()?;
        let topic = self.topics().state_topic(component, node, property);
        self.publish(&topic, value, true).await
    }

    /// Publish a retained announcement document for the node
    pub async fn publish_announce(&self, node: &Node, document: &Value) -> Result<()> {
        let component = self.require_component()?;
        let topic = self.topics().announce_topic(component, node);
        self.publish(&topic, document, true).await
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("component", &self.component)
            .finish()
    }
}
