//! MQTT messenger
//!
//! One rumqttc connection shared by every router. Each
//! [`Subscription`] is a route in a table; the event loop task hands
//! every incoming publish to all routes whose filter matches it. A broker
//! subscription exists while at least one route uses its filter.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use hearthmq_core::{Message, Node, TopicFilter, TopicScheme};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS as MqttQoS};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{BridgeError, Messenger, Result, Subscription};

/// MQTT connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address
    #[serde(default = "default_host")]
    pub broker_host: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub broker_port: u16,
    /// Client ID for the connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,
    /// QoS level for subscriptions and publishes (0, 1, or 2)
    #[serde(default)]
    pub qos: u8,
    /// Keep alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// Buffered messages per subscription before new ones are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Pause before polling again after a connection error
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("hearthmq-{}", &id[..8])
}

fn default_keep_alive() -> u16 {
    60
}

fn default_channel_capacity() -> usize {
    64
}

fn default_reconnect_delay() -> u64 {
    5000
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: default_host(),
            broker_port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            qos: 0,
            keep_alive_secs: default_keep_alive(),
            channel_capacity: default_channel_capacity(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broker_host.is_empty() {
            return Err(BridgeError::Config("broker_host is empty".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(BridgeError::Config("client_id is empty".to_string()));
        }
        if self.qos > 2 {
            return Err(BridgeError::Config(format!("invalid qos: {}", self.qos)));
        }
        if self.channel_capacity == 0 {
            return Err(BridgeError::Config("channel_capacity must be > 0".to_string()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(BridgeError::Config(
                "username and password must be set together".to_string(),
            ));
        }
        Ok(())
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker_host, self.broker_port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs as u64));

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }
        options
    }
}

/// Parse MQTT QoS level
fn parse_qos(qos: u8) -> MqttQoS {
    match qos {
        0 => MqttQoS::AtMostOnce,
        1 => MqttQoS::AtLeastOnce,
        _ => MqttQoS::ExactlyOnce,
    }
}

struct Route {
    filter: TopicFilter,
    tx: mpsc::Sender<Message>,
}

/// Subscription routes keyed by route id.
///
/// `uses` counts the routes of each filter. Every change to it, and the
/// broker request it triggers, happens under its lock, so broker
/// subscribe and unsubscribe requests are queued in refcount order.
#[derive(Default)]
struct RouteTable {
    routes: DashMap<u64, Route>,
    uses: Mutex<HashMap<TopicFilter, usize>>,
    next_id: AtomicU64,
}

impl RouteTable {
    /// Add a route, calling `subscribe` when it is the first for its filter.
    /// Nothing is added if `subscribe` fails.
    fn insert<F>(
        &self,
        filter: TopicFilter,
        tx: mpsc::Sender<Message>,
        subscribe: F,
    ) -> Result<u64>
    where
        F: FnOnce(&TopicFilter) -> Result<()>,
    {
        let mut uses = self.uses.lock();
        match uses.get_mut(&filter) {
            Some(count) => *count += 1,
            None => {
                subscribe(&filter)?;
                uses.insert(filter.clone(), 1);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes.insert(id, Route { filter, tx });
        Ok(id)
    }

    /// Remove a route, calling `unsubscribe` when it was the last for its filter
    fn remove<F>(&self, id: u64, unsubscribe: F)
    where
        F: FnOnce(&TopicFilter),
    {
        let mut uses = self.uses.lock();
        let Some((_, route)) = self.routes.remove(&id) else {
            return;
        };
        if let Some(count) = uses.get_mut(&route.filter) {
            *count -= 1;
            if *count == 0 {
                uses.remove(&route.filter);
                unsubscribe(&route.filter);
            }
        }
    }

    fn filters(&self) -> Vec<TopicFilter> {
        let mut filters: Vec<TopicFilter> = self.uses.lock().keys().cloned().collect();
        filters.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        filters
    }

    /// Hand a message to every matching route without waiting
    fn deliver(&self, message: &Message) -> usize {
        let targets: Vec<(u64, mpsc::Sender<Message>)> = self
            .routes
            .iter()
            .filter(|r| r.filter.matches(message.topic()))
            .map(|r| (*r.key(), r.tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        route = id,
                        topic = message.topic(),
                        "subscription full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(route = id, "subscription closed");
                }
            }
        }
        delivered
    }
}

/// [`Messenger`] backed by a rumqttc client
pub struct MqttMessenger {
    client: AsyncClient,
    topics: TopicScheme,
    qos: MqttQoS,
    capacity: usize,
    routes: Arc<RouteTable>,
    connected: Arc<AtomicBool>,
    event_loop: JoinHandle<()>,
}

impl MqttMessenger {
    /// Create the client and start its event loop on the current tokio
    /// runtime. The connection is established in the background.
    pub fn connect(config: &MqttConfig, topics: TopicScheme) -> Result<Self> {
        config.validate()?;

        let (client, eventloop) = AsyncClient::new(config.options(), 100);
        let routes = Arc::new(RouteTable::default());
        let connected = Arc::new(AtomicBool::new(false));
        let qos = parse_qos(config.qos);

        info!(
            "MQTT messenger connecting to {}:{} as {}",
            config.broker_host, config.broker_port, config.client_id
        );

        let event_loop = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            routes.clone(),
            connected.clone(),
            qos,
            Duration::from_millis(config.reconnect_delay_ms),
        ));

        Ok(Self {
            client,
            topics,
            qos,
            capacity: config.channel_capacity,
            routes,
            connected,
            event_loop,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Filters currently subscribed on the broker
    pub fn active_filters(&self) -> Vec<TopicFilter> {
        self.routes.filters()
    }

    /// Send DISCONNECT and stop the event loop
    pub async fn disconnect(&self) -> Result<()> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BridgeError::Connection(e.to_string()));
        self.event_loop.abort();
        info!("MQTT messenger stopped");
        result
    }
}

impl Drop for MqttMessenger {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl Messenger for MqttMessenger {
    fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    async fn filtered_messages(&self, component: &str, node: &Node) -> Result<Subscription> {
        let filter = self.topics.command_filter(component, node)?;
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.routes.insert(filter.clone(), tx, |filter| {
            self.client
                .try_subscribe(filter.as_str(), self.qos)
                .map_err(|e| BridgeError::Subscribe(format!("{}: {}", filter, e)))?;
            debug!("MQTT subscribed to: {}", filter);
            Ok(())
        })?;

        let routes = self.routes.clone();
        let client = self.client.clone();
        Ok(Subscription::new(filter, rx, move || {
            routes.remove(id, |filter| match client.try_unsubscribe(filter.as_str()) {
                Ok(()) => debug!("MQTT unsubscribed from: {}", filter),
                Err(e) => warn!("MQTT unsubscribe from {} failed: {}", filter, e),
            });
        }))
    }

    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<()> {
        self.client
            .publish(topic, self.qos, retain, payload.to_vec())
            .await
            .map_err(|e| BridgeError::Publish(format!("{}: {}", topic, e)))?;

        debug!("MQTT sent to topic: {}", topic);
        Ok(())
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    routes: Arc<RouteTable>,
    connected: Arc<AtomicBool>,
    qos: MqttQoS,
    reconnect_delay: Duration,
) {
    let mut connected_once = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "MQTT received: {} ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                let message = Message::new(publish.topic, publish.payload);
                if routes.deliver(&message) == 0 {
                    debug!(topic = message.topic(), "no route for message");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT connected to broker");
                connected.store(true, Ordering::Release);

                // A fresh session forgets earlier subscriptions
                if connected_once && !ack.session_present {
                    for filter in routes.filters() {
                        if let Err(e) = client.try_subscribe(filter.as_str(), qos) {
                            warn!("MQTT resubscribe to {} failed: {}", filter, e);
                        }
                    }
                }
                connected_once = true;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT disconnected from broker");
                connected.store(false, Ordering::Release);
            }
            Err(e) => {
                error!("MQTT error: {:?}", e);
                connected.store(false, Ordering::Release);
                tokio::time::sleep(reconnect_delay).await;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = MqttConfig::default();
        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.qos, 0);
        assert!(config.client_id.starts_with("hearthmq-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = MqttConfig {
            qos: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MqttConfig {
            username: Some("user".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_qos() {
        assert_eq!(parse_qos(0), MqttQoS::AtMostOnce);
        assert_eq!(parse_qos(1), MqttQoS::AtLeastOnce);
        assert_eq!(parse_qos(2), MqttQoS::ExactlyOnce);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Request {
        Subscribe,
        Unsubscribe,
    }

    type RequestLog = Arc<Mutex<Vec<Request>>>;

    fn insert_logged(table: &RouteTable, filter: &TopicFilter, log: &RequestLog) -> u64 {
        let (tx, _rx) = mpsc::channel(1);
        table
            .insert(filter.clone(), tx, |_| {
                log.lock().push(Request::Subscribe);
                Ok(())
            })
            .unwrap()
    }

    fn remove_logged(table: &RouteTable, id: u64, log: &RequestLog) {
        table.remove(id, |_| log.lock().push(Request::Unsubscribe));
    }

    #[tokio::test]
    async fn test_route_table_shares_filters() {
        let table = RouteTable::default();
        let filter = TopicFilter::parse("hearthmq/light/lamp/+").unwrap();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let subscribes = AtomicU64::new(0);
        let subscribe = |_: &TopicFilter| {
            subscribes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        let a = table.insert(filter.clone(), tx1, subscribe).unwrap();
        let b = table.insert(filter.clone(), tx2, subscribe).unwrap();
        assert_eq!(subscribes.load(Ordering::SeqCst), 1);

        let delivered = table.deliver(&Message::new("hearthmq/light/lamp/set", "{}"));
        assert_eq!(delivered, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());

        assert_eq!(table.deliver(&Message::new("hearthmq/light/lamp/state/power", "1")), 0);

        let unsubscribed = Arc::new(Mutex::new(Vec::new()));
        let record = |f: &TopicFilter| unsubscribed.lock().push(f.clone());
        table.remove(a, record);
        assert!(unsubscribed.lock().is_empty());
        table.remove(b, record);
        assert_eq!(*unsubscribed.lock(), vec![filter]);
        assert!(table.filters().is_empty());
    }

    #[test]
    fn test_route_table_resubscribes_after_last_route_leaves() {
        let table = RouteTable::default();
        let filter = TopicFilter::parse("hearthmq/light/lamp/+").unwrap();
        let log: RequestLog = Arc::default();

        let a = insert_logged(&table, &filter, &log);
        remove_logged(&table, a, &log);
        let b = insert_logged(&table, &filter, &log);
        remove_logged(&table, b, &log);
        remove_logged(&table, b, &log);

        assert_eq!(
            *log.lock(),
            vec![
                Request::Subscribe,
                Request::Unsubscribe,
                Request::Subscribe,
                Request::Unsubscribe
            ]
        );
    }

    #[test]
    fn test_route_table_failed_subscribe_adds_nothing() {
        let table = RouteTable::default();
        let filter = TopicFilter::parse("a/+").unwrap();
        let (tx, _rx) = mpsc::channel(1);

        let result = table.insert(filter.clone(), tx, |_| {
            Err(BridgeError::Subscribe("request queue full".into()))
        });
        assert!(result.is_err());
        assert!(table.filters().is_empty());

        let log: RequestLog = Arc::default();
        insert_logged(&table, &filter, &log);
        assert_eq!(*log.lock(), vec![Request::Subscribe]);
    }

    #[test]
    fn test_route_table_concurrent_replace_keeps_subscription() {
        let table = Arc::new(RouteTable::default());
        let filter = TopicFilter::parse("hearthmq/light/lamp/+").unwrap();
        let log: RequestLog = Arc::default();

        for _ in 0..500 {
            let old = insert_logged(&table, &filter, &log);
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let remover = {
                let (table, log, barrier) = (table.clone(), log.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    remove_logged(&table, old, &log);
                })
            };
            let inserter = {
                let (table, log, barrier, filter) =
                    (table.clone(), log.clone(), barrier.clone(), filter.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    insert_logged(&table, &filter, &log)
                })
            };
            remover.join().unwrap();
            let new = inserter.join().unwrap();

            // The replacement route is live, so the last request is a subscribe
            assert_eq!(log.lock().last(), Some(&Request::Subscribe));
            assert_eq!(table.filters(), vec![filter.clone()]);

            remove_logged(&table, new, &log);
            assert_eq!(log.lock().last(), Some(&Request::Unsubscribe));
        }
    }

    #[test]
    fn test_route_table_drops_when_full() {
        let table = RouteTable::default();
        let (tx, _rx) = mpsc::channel(1);
        table
            .insert(TopicFilter::parse("a/+").unwrap(), tx, |_| Ok(()))
            .unwrap();

        assert_eq!(table.deliver(&Message::new("a/set", "1")), 1);
        assert_eq!(table.deliver(&Message::new("a/set", "2")), 0);
    }
}
