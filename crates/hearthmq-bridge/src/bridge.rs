//! Router supervision
//!
//! A [`Bridge`] owns one listener task per node. Listeners that end on
//! their own are logged and not restarted; [`Bridge::shutdown`] cancels
//! the rest and drains every router's outbound tasks.

use futures::future::join_all;
use hearthmq_core::Node;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::{BridgeError, DrainReport, Messenger, NodeModule, Result, Router, RouterConfig};

type ListenerExit = (String, Result<()>);

pub struct Bridge {
    messenger: Arc<dyn Messenger>,
    config: RouterConfig,
    routers: Vec<(Node, Router)>,
    listeners: JoinSet<ListenerExit>,
}

impl Bridge {
    pub fn new(messenger: Arc<dyn Messenger>, config: RouterConfig) -> Self {
        Self {
            messenger,
            config,
            routers: Vec::new(),
            listeners: JoinSet::new(),
        }
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }

    /// Announce `node` and start routing it through `module`.
    ///
    /// A failed announcement is logged; the node is still routed.
    pub async fn add(&mut self, node: Node, module: Arc<dyn NodeModule>) -> Result<Router> {
        let router = Router::new(self.messenger.clone(), module, self.config.clone());
        if router.component().is_none() {
            return Err(BridgeError::NoComponent);
        }

        if let Err(e) = router.announce(&node).await {
            warn!(node = %node.id(), error = %e, "announce failed");
        }

        let listener = router.clone();
        let listened = node.clone();
        self.listeners.spawn(async move {
            let result = listener.listen(&listened).await;
            (listened.id().to_string(), result)
        });

        info!(node = %node.id(), component = ?router.component(), "node added");
        self.routers.push((node, router.clone()));
        Ok(router)
    }

    pub fn routers(&self) -> impl Iterator<Item = (&Node, &Router)> {
        self.routers.iter().map(|(node, router)| (node, router))
    }

    /// Listener tasks that have not ended yet
    pub fn active_listeners(&mut self) -> usize {
        while let Some(exit) = self.listeners.try_join_next() {
            log_exit(exit);
        }
        self.listeners.len()
    }

    /// Supervise listeners until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            if self.listeners.is_empty() {
                debug!("no listeners left, waiting for shutdown");
                (&mut shutdown).await;
                break;
            }
            tokio::select! {
                _ = &mut shutdown => break,
                Some(exit) = self.listeners.join_next() => log_exit(exit),
            }
        }
    }

    /// Cancel every listener, then drain every router for up to `timeout`
    pub async fn shutdown(&mut self, timeout: Duration) -> DrainReport {
        info!(listeners = self.listeners.len(), "shutting down bridge");
        self.listeners.abort_all();
        while let Some(exit) = self.listeners.join_next().await {
            log_exit(exit);
        }

        let drains = self
            .routers
            .iter()
            .map(|(_, router)| router.shutdown(timeout));
        let report = join_all(drains)
            .await
            .into_iter()
            .fold(DrainReport::default(), DrainReport::merge);

        info!(
            completed = report.completed,
            failed = report.failed,
            aborted = report.aborted,
            "bridge shut down"
        );
        report
    }
}

fn log_exit(exit: std::result::Result<ListenerExit, JoinError>) {
    match exit {
        Ok((node, Ok(()))) => info!(node = %node, "listener finished"),
        Ok((node, Err(e))) => error!(node = %node, error = %e, "listener failed"),
        Err(e) if e.is_cancelled() => debug!("listener cancelled"),
        Err(e) => error!(error = %e, "listener panicked"),
    }
}
