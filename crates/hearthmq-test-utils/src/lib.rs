//! Common test helpers for HearthMQ tests
//!
//! - Condition-based waiting (no hardcoded sleeps)
//! - An in-memory [`Messenger`] that records subscriptions and publishes
//! - A configurable [`NodeModule`] and a handler call recorder

use async_trait::async_trait;
use bytes::Bytes;
use hearthmq_bridge::{BridgeError, HandlerContext, Handlers, Messenger, NodeModule, Subscription};
use hearthmq_core::{Message, Node, TopicFilter, TopicScheme, Value};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Mock Messenger
// ============================================================================

/// Subscription lifecycle as seen by the mock broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Subscribed(String),
    Unsubscribed(String),
}

/// A message published through the mock
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl Published {
    /// Payload decoded as JSON; `Value::Null` if it is not JSON
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

struct MockRoute {
    id: u64,
    filter: TopicFilter,
    tx: mpsc::Sender<Message>,
}

#[derive(Default)]
struct MockState {
    routes: Mutex<Vec<MockRoute>>,
    next_id: AtomicU64,
    events: Mutex<Vec<SubscriptionEvent>>,
    published: Mutex<Vec<Published>>,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    changed: Notify,
}

impl MockState {
    fn record(&self, event: SubscriptionEvent) {
        self.events.lock().push(event);
        self.changed.notify_waiters();
    }
}

/// In-memory broker standing in for an MQTT connection
#[derive(Clone)]
pub struct MockMessenger {
    topics: TopicScheme,
    state: Arc<MockState>,
}

impl MockMessenger {
    pub fn new() -> Self {
        Self::with_topics(TopicScheme::default())
    }

    pub fn with_topics(topics: TopicScheme) -> Self {
        Self {
            topics,
            state: Arc::new(MockState::default()),
        }
    }

    /// Shared handle usable wherever a router expects a messenger
    pub fn shared(&self) -> Arc<dyn Messenger> {
        Arc::new(self.clone())
    }

    /// Deliver a message to every matching subscription, in order.
    /// Returns the number of subscriptions it reached.
    pub async fn inject(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let targets: Vec<mpsc::Sender<Message>> = self
            .state
            .routes
            .lock()
            .iter()
            .filter(|route| route.filter.matches(topic))
            .map(|route| route.tx.clone())
            .collect();

        let mut delivered = 0;
        for tx in targets {
            if tx.send(Message::new(topic, payload.clone())).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// End every open message sequence
    pub fn close_all(&self) {
        self.state.routes.lock().clear();
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.state.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SubscriptionEvent> {
        self.state.events.lock().clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SubscriptionEvent::Subscribed(_)))
            .count()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SubscriptionEvent::Unsubscribed(_)))
            .count()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.routes.lock().len()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.published.lock().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.state
            .published
            .lock()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Wait until `n` subscriptions are open
    pub async fn wait_for_subscriptions(&self, n: usize, max_wait: Duration) -> bool {
        self.wait_until(|| self.active_subscriptions() >= n, max_wait)
            .await
    }

    /// Wait until `n` unsubscribes have been recorded
    pub async fn wait_for_unsubscribes(&self, n: usize, max_wait: Duration) -> bool {
        self.wait_until(|| self.unsubscribe_count() >= n, max_wait)
            .await
    }

    /// Wait until at least `n` messages were published to `topic`
    pub async fn wait_for_published(&self, topic: &str, n: usize, max_wait: Duration) -> bool {
        self.wait_until(|| self.published_to(topic).len() >= n, max_wait)
            .await
    }

    async fn wait_until<F>(&self, check: F, max_wait: Duration) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let changed = self.state.changed.notified();
            if check() {
                return true;
            }
            // Polled as a fallback; not every change is notified
            let tick = tokio::time::sleep(DEFAULT_CHECK_INTERVAL);
            tokio::select! {
                _ = changed => {}
                _ = tick => {}
                _ = tokio::time::sleep_until(deadline) => return check(),
            }
        }
    }
}

impl Default for MockMessenger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    async fn filtered_messages(
        &self,
        component: &str,
        node: &Node,
    ) -> hearthmq_bridge::Result<Subscription> {
        if self.state.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BridgeError::Subscribe("mock subscribe failure".into()));
        }

        let filter = self.topics.command_filter(component, node)?;
        let (tx, rx) = mpsc::channel(64);
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);

        self.state.routes.lock().push(MockRoute {
            id,
            filter: filter.clone(),
            tx,
        });
        self.state
            .record(SubscriptionEvent::Subscribed(filter.to_string()));

        let state = self.state.clone();
        let released = filter.to_string();
        Ok(Subscription::new(filter, rx, move || {
            state.routes.lock().retain(|route| route.id != id);
            state.record(SubscriptionEvent::Unsubscribed(released));
        }))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        retain: bool,
    ) -> hearthmq_bridge::Result<()> {
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::Publish("mock publish failure".into()));
        }
        self.state.published.lock().push(Published {
            topic: topic.to_string(),
            payload,
            retain,
        });
        self.state.changed.notify_waiters();
        Ok(())
    }
}

// ============================================================================
// Test Module and Call Recorder
// ============================================================================

/// Records handler invocations as `(node id, value)`
#[derive(Clone, Default)]
pub struct CallRecorder {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    count: Arc<AtomicU32>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that records its invocation and succeeds
    pub fn handler(
        &self,
    ) -> impl Fn(HandlerContext, Node, Value) -> futures::future::Ready<hearthmq_bridge::Result<()>>
           + Send
           + Sync
           + 'static {
        let recorder = self.clone();
        move |_ctx, node, value| {
            recorder.record(&node, value);
            futures::future::ready(Ok(()))
        }
    }

    pub fn record(&self, node: &Node, value: Value) {
        self.calls.lock().push((node.id().to_string(), value));
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn values(&self) -> Vec<Value> {
        self.calls.lock().iter().map(|(_, v)| v.clone()).collect()
    }
}

/// A module assembled from test handlers
pub struct TestModule {
    component: Option<String>,
    handlers: Handlers,
    announcements: Arc<AtomicU32>,
}

impl TestModule {
    pub fn new(component: &str) -> Self {
        Self {
            component: Some(component.to_string()),
            handlers: Handlers::new(),
            announcements: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A module without a component identifier
    pub fn anonymous() -> Self {
        Self {
            component: None,
            handlers: Handlers::new(),
            announcements: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn announcements(&self) -> Arc<AtomicU32> {
        self.announcements.clone()
    }
}

#[async_trait]
impl NodeModule for TestModule {
    fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    fn handlers(&self) -> Handlers {
        self.handlers.clone()
    }

    async fn announce(&self, ctx: &HandlerContext, node: &Node) -> hearthmq_bridge::Result<()> {
        self.announcements.fetch_add(1, Ordering::SeqCst);
        ctx.publish_announce(node, &serde_json::json!({ "id": node.id() }))
            .await
    }
}
