//! hearthmq Core
//!
//! Core types shared by every hearthmq crate.
//!
//! This crate provides:
//! - Observable nodes with named JSON properties ([`Node`])
//! - Immutable MQTT messages ([`Message`])
//! - Topic layout and MQTT wildcard matching ([`TopicScheme`], [`TopicFilter`])

pub mod error;
pub mod message;
pub mod node;
pub mod topic;

pub use error::{Error, Result};
pub use message::Message;
pub use node::{Node, Observer, ObserverId};
pub use topic::{TopicFilter, TopicScheme};

/// Property and payload value type
pub use serde_json::Value;

/// Default topic prefix for every node namespace
pub const DEFAULT_TOPIC_PREFIX: &str = "hearthmq";

/// Topic level that holds a node's per-property state topics
pub const STATE_SEGMENT: &str = "state";

/// Topic level that holds a node's metadata topics
pub const META_SEGMENT: &str = "meta";

/// Final segment of a node's announcement topic
pub const ANNOUNCE_SEGMENT: &str = "config";
