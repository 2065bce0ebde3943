//! Plugin → agent casts.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use lbaas_core::AgentRequest;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};

/// One-way delivery of requests to the agent on a host.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn cast(&self, host: &str, request: AgentRequest) -> PluginResult<()>;
}

/// In-process transport: each registered host owns the receiving end of an
/// unbounded channel.
#[derive(Default)]
pub struct LocalTransport {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<AgentRequest>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route casts for `host` to the returned receiver, replacing any
    /// earlier registration.
    pub fn register(&self, host: &str) -> mpsc::UnboundedReceiver<AgentRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.insert(host.to_string(), tx);
        debug!(%host, "agent route registered");
        rx
    }

    pub fn unregister(&self, host: &str) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.remove(host);
    }

    pub fn hosts(&self) -> Vec<String> {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut hosts: Vec<String> = routes.keys().cloned().collect();
        hosts.sort();
        hosts
    }
}

#[async_trait]
impl AgentTransport for LocalTransport {
    async fn cast(&self, host: &str, request: AgentRequest) -> PluginResult<()> {
        let sender = {
            let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            routes.get(host).cloned()
        };
        let Some(sender) = sender else {
            warn!(%host, operation = request.operation(), "no route to agent");
            return Err(PluginError::Transport(format!("no route to agent {host}")));
        };
        let operation = request.operation();
        sender
            .send(request)
            .map_err(|_| PluginError::Transport(format!("agent {host} stopped receiving")))?;
        debug!(%host, %operation, "cast delivered");
        Ok(())
    }
}
