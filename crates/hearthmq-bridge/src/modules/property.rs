//! Generic property module
//!
//! Exposes a fixed list of properties with no device-specific behaviour:
//!
//! | topic | effect |
//! |---|---|
//! | `.../<node>/set` | assign every declared property present in the JSON object |
//! | `.../<node>/get` | republish every declared property that has a value |
//! | `.../<node>/state/<property>` | retained value, published on each assignment |
//! | `.../<node>/meta/config` | retained announcement document |

use async_trait::async_trait;
use hearthmq_core::{Node, Value};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{BridgeError, HandlerContext, Handlers, NodeModule, Result};

pub const SET_COMMAND: &str = "set";
pub const GET_COMMAND: &str = "get";

pub struct PropertyModule {
    component: String,
    properties: Arc<Vec<String>>,
}

impl PropertyModule {
    pub fn new<I, S>(component: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut properties: Vec<String> = properties.into_iter().map(Into::into).collect();
        properties.sort();
        properties.dedup();

        Self {
            component: component.into(),
            properties: Arc::new(properties),
        }
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// The document published by [`NodeModule::announce`]
    pub fn announcement(&self, node: &Node) -> Value {
        json!({
            "id": node.id(),
            "name": node.name(),
            "component": self.component,
            "properties": *self.properties,
            "commands": [GET_COMMAND, SET_COMMAND],
        })
    }
}

async fn set_properties(properties: Arc<Vec<String>>, node: Node, payload: Value) -> Result<()> {
    let Value::Object(values) = payload else {
        return Err(BridgeError::handler(format!(
            "set expects a JSON object, got {}",
            payload
        )));
    };

    for (property, value) in values {
        if properties.contains(&property) {
            node.set(&property, value);
        } else {
            warn!(node = %node.id(), property = %property, "ignoring undeclared property");
        }
    }
    Ok(())
}

async fn publish_all(
    properties: Arc<Vec<String>>,
    ctx: HandlerContext,
    node: Node,
) -> Result<()> {
    for property in properties.iter() {
        if let Some(value) = node.get(property) {
            ctx.publish_state(&node, property, &value).await?;
        }
    }
    debug!(node = %node.id(), "state republished");
    Ok(())
}

#[async_trait]
impl NodeModule for PropertyModule {
    fn component(&self) -> Option<&str> {
        Some(&self.component)
    }

    fn handlers(&self) -> Handlers {
        let set_props = self.properties.clone();
        let get_props = self.properties.clone();

        let mut handlers = Handlers::new()
            .on_command(SET_COMMAND, move |_ctx, node, payload| {
                set_properties(set_props.clone(), node, payload)
            })
            .on_command(GET_COMMAND, move |ctx, node, _payload| {
                publish_all(get_props.clone(), ctx, node)
            });

        for property in self.properties.iter() {
            let name = property.clone();
            handlers = handlers.on_property(property.clone(), move |ctx, node, value| {
                let name = name.clone();
                async move { ctx.publish_state(&node, &name, &value).await }
            });
        }
        handlers
    }

    async fn announce(&self, ctx: &HandlerContext, node: &Node) -> Result<()> {
        ctx.publish_announce(node, &self.announcement(node)).await
    }
}
