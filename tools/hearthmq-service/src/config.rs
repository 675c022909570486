//! Service configuration file

use anyhow::{bail, Context, Result};
use hearthmq_bridge::{MqttConfig, RouterConfig};
use hearthmq_core::{Node, TopicScheme, Value, DEFAULT_TOPIC_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// First topic level(s) of every node namespace
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// How long shutdown waits for outstanding property handlers
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// A node served by the generic property module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    /// Display name; the id when omitted
    #[serde(default)]
    pub name: Option<String>,
    pub component: String,
    #[serde(default)]
    pub properties: Vec<String>,
    /// Values the node starts with, reported by `get`
    #[serde(default)]
    pub initial: BTreeMap<String, Value>,
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            drain_timeout_ms: default_drain_timeout_ms(),
            mqtt: MqttConfig::default(),
            router: RouterConfig::default(),
            nodes: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("loading config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.topics()?;
        self.mqtt.validate()?;

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert((node.component.as_str(), node.id.as_str())) {
                bail!("duplicate node {:?} in component {:?}", node.id, node.component);
            }
            for property in node.initial.keys() {
                if !node.properties.contains(property) {
                    bail!(
                        "node {:?}: initial value for undeclared property {:?}",
                        node.id,
                        property
                    );
                }
            }
        }
        Ok(())
    }

    pub fn topics(&self) -> Result<TopicScheme> {
        TopicScheme::new(self.topic_prefix.as_str()).context("invalid topic_prefix")
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Apply a `host:port` or bare `host` broker override
    pub fn override_broker(&mut self, broker: &str) -> Result<()> {
        match broker.rsplit_once(':') {
            Some((host, port)) => {
                self.mqtt.broker_port = port
                    .parse()
                    .with_context(|| format!("invalid broker port in {:?}", broker))?;
                self.mqtt.broker_host = host.to_string();
            }
            None => self.mqtt.broker_host = broker.to_string(),
        }
        if self.mqtt.broker_host.is_empty() {
            bail!("invalid broker address {:?}", broker);
        }
        Ok(())
    }
}

impl NodeConfig {
    pub fn build(&self) -> Result<Node> {
        let name = self.name.clone().unwrap_or_else(|| self.id.clone());
        let node = Node::with_properties(&self.id, name, self.initial.clone())
            .with_context(|| format!("invalid node {:?}", self.id))?;
        Ok(node)
    }
}
