//! Node router
//!
//! A [`Router`] binds one [`NodeModule`] to the shared [`Messenger`] and
//! moves traffic in both directions for a node:
//!
//! ```text
//! <prefix>/<component>/<node>/<command> ──► command handler (sequential)
//! node.set(property, value)             ──► property handler (tracked task)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hearthmq_bridge::{PropertyModule, Router, RouterConfig, Messenger};
//! use hearthmq_core::Node;
//! use std::sync::Arc;
//!
//! # async fn example(messenger: Arc<dyn Messenger>) -> hearthmq_bridge::Result<()> {
//! let module = Arc::new(PropertyModule::new("light", ["power", "level"]));
//! let router = Router::new(messenger, module, RouterConfig::default());
//! let node = Node::new("lamp", "Living Room Lamp")?;
//!
//! router.announce(&node).await?;
//! router.listen(&node).await?;
//! # Ok(())
//! # }
//! ```

use futures::FutureExt;
use hearthmq_core::{Message, Node, ObserverId, Value};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::tasks::{panic_message, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_PENDING};
use crate::{
    BridgeError, DrainReport, HandlerContext, Handlers, Messenger, NodeModule, OutboundTasks,
    Result, TaskStats,
};

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Property handlers allowed to run at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Property handlers allowed to be queued or running
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Characters of payload included in message logs
    #[serde(default = "default_payload_preview")]
    pub payload_preview: usize,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING
}

fn default_payload_preview() -> usize {
    256
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_pending: default_max_pending(),
            payload_preview: default_payload_preview(),
        }
    }
}

struct RouterInner {
    module: Arc<dyn NodeModule>,
    ctx: HandlerContext,
    handlers: Handlers,
    tasks: OutboundTasks,
    config: RouterConfig,
}

/// Routes one module's nodes between MQTT and node state
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        module: Arc<dyn NodeModule>,
        config: RouterConfig,
    ) -> Self {
        let ctx = HandlerContext::new(messenger, module.component());
        let handlers = module.handlers();
        debug!(
            component = ?module.component(),
            commands = ?handlers.commands,
            properties = ?handlers.properties,
            "router created"
        );

        Self {
            inner: Arc::new(RouterInner {
                tasks: OutboundTasks::new(config.max_concurrent, config.max_pending),
                module,
                ctx,
                handlers,
                config,
            }),
        }
    }

    pub fn component(&self) -> Option<&str> {
        self.inner.ctx.component()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn handlers(&self) -> &Handlers {
        &self.inner.handlers
    }

    /// Route traffic for `node` until the message sequence ends.
    ///
    /// Commands are handled one at a time in arrival order. Missing
    /// handlers, malformed payloads, handler errors and handler panics are
    /// logged and skipped. The subscription and the node observer are
    /// released however this future ends, including when it is dropped.
    pub async fn listen(&self, node: &Node) -> Result<()> {
        let component = self
            .component()
            .ok_or(BridgeError::NoComponent)?
            .to_string();
        let span = info_span!("router", node = %node.id(), component = %component);

        async {
            self.inner.tasks.bind(Handle::current());
            let _observer = self.observe(node);

            let mut messages = self
                .inner
                .ctx
                .messenger()
                .filtered_messages(&component, node)
                .await?;
            info!(filter = %messages.filter(), "listening");

            while let Some(message) = messages.next().await {
                self.dispatch(node, &message).await;
            }

            info!("message sequence ended");
            Ok::<(), BridgeError>(())
        }
        .instrument(span)
        .await
    }

    /// Register the outbound observer; detached when the guard drops
    fn observe(&self, node: &Node) -> ObserverGuard {
        let router = self.clone();
        let id = node.subscribe(move |node, property, value| {
            router.on_property_change(node, property, value);
        });
        ObserverGuard {
            node: node.clone(),
            id,
        }
    }

    async fn dispatch(&self, node: &Node, message: &Message) {
        info!(
            topic = message.topic(),
            payload = %message.payload_preview(self.inner.config.payload_preview),
            "message received"
        );

        let command = message.command();
        let payload = match message.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic = message.topic(), error = %e, "malformed payload, skipping message");
                return;
            }
        };

        let Some(handler) = self.inner.handlers.commands.get(command) else {
            warn!(command, "missing handler for command");
            return;
        };

        let ctx = self.inner.ctx.clone();
        let node = node.clone();
        let invocation = async move { handler(ctx, node, payload).await };

        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(())) => debug!(command, "command handled"),
            Ok(Err(e)) => warn!(command, error = %e, "command handler failed"),
            Err(panic) => {
                error!(command, panic = %panic_message(&*panic), "command handler panicked")
            }
        }
    }

    /// React to a property assignment on `node`.
    ///
    /// Never blocks and never fails: the handler, if any, is scheduled on
    /// the router's tracked task set.
    pub fn on_property_change(&self, node: &Node, property: &str, value: &Value) {
        let Some(handler) = self.inner.handlers.properties.get(property) else {
            warn!(node = %node.id(), property, "missing handler for property");
            return;
        };

        let span = info_span!("property", node = %node.id(), property);
        let ctx = self.inner.ctx.clone();
        let node = node.clone();
        let value = value.clone();
        let task = async move { handler(ctx, node, value).await }.instrument(span);

        self.inner.tasks.spawn(property, task);
    }

    /// Announce `node` through the module. Safe to repeat.
    pub async fn announce(&self, node: &Node) -> Result<()> {
        self.inner.module.announce(&self.inner.ctx, node).await
    }

    /// Property handlers queued or running
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.in_flight()
    }

    pub fn task_stats(&self) -> TaskStats {
        self.inner.tasks.stats()
    }

    /// Stop accepting property changes, then await outstanding handlers
    /// for up to `timeout` and abort the rest.
    pub async fn shutdown(&self, timeout: Duration) -> DrainReport {
        self.inner.tasks.close();
        let report = self.inner.tasks.drain(timeout).await;
        info!(
            component = ?self.component(),
            completed = report.completed,
            failed = report.failed,
            aborted = report.aborted,
            "router shut down"
        );
        report
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("component", &self.component())
            .field("handlers", &self.inner.handlers)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

struct ObserverGuard {
    node: Node,
    id: ObserverId,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.node.unsubscribe(self.id);
    }
}
