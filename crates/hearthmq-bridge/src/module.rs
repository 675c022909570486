//! Node module trait

use async_trait::async_trait;
use hearthmq_core::Node;

use crate::{HandlerContext, Handlers, Result};

/// Behaviour of one kind of node on the bus.
///
/// A module names the component namespace its nodes live in, supplies
/// the handler tables a [`Router`](crate::Router) dispatches to, and may
/// announce a node's capabilities.
#[async_trait]
pub trait NodeModule: Send + Sync {
    /// Component identifier scoping this module's topics.
    ///
    /// A module returning `None` receives no messages: `listen` fails
    /// with [`BridgeError::NoComponent`](crate::BridgeError::NoComponent).
    fn component(&self) -> Option<&str>;

    /// Build the command and property handler tables. Called once per router.
    fn handlers(&self) -> Handlers;

    /// Announce the node to the rest of the system.
    ///
    /// Must tolerate being called before or after `listen` and more than
    /// once. The default announces nothing.
    async fn announce(&self, _ctx: &HandlerContext, _node: &Node) -> Result<()> {
        Ok(())
    }
}
