//! HearthMQ routing
//!
//! Binds home-automation nodes to MQTT topics:
//! - inbound: `<prefix>/<component>/<node>/<command>` dispatched to command handlers
//! - outbound: property assignments dispatched to property handlers
//! - announce: retained per-node configuration documents
//!
//! A [`Router`] serves one [`NodeModule`]; a [`Bridge`] supervises the
//! routers of a whole installation over one shared [`Messenger`].

pub mod bridge;
pub mod error;
pub mod handler;
pub mod messenger;
pub mod module;
pub mod modules;
pub mod router;
pub mod tasks;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use bridge::Bridge;
pub use error::{BridgeError, Result};
pub use handler::{Handler, HandlerContext, HandlerFuture, HandlerTable, Handlers};
pub use messenger::{Messenger, Subscription};
pub use module::NodeModule;
pub use modules::PropertyModule;
pub use router::{Router, RouterConfig};
pub use tasks::{DrainReport, OutboundTasks, TaskStats};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttMessenger};
