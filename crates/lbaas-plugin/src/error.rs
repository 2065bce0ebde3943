//! Plugin error types.

use lbaas_core::RpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("no eligible agent for pool {0}")]
    NoAgent(String),

    #[error("no free address on subnet {0}")]
    AddressExhausted(String),

    #[error("address {address} already allocated on subnet {subnet_id}")]
    AddressInUse { subnet_id: String, address: String },

    #[error("agent transport error: {0}")]
    Transport(String),

    #[error("state store error: {0}")]
    State(#[from] lbaas_state::StateError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] lbaas_scheduler::SchedulerError),
}

impl PluginError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        PluginError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<PluginError> for RpcError {
    fn from(e: PluginError) -> Self {
        match e {
            PluginError::NotFound { .. } => RpcError::NotFound(e.to_string()),
            PluginError::Transport(msg) => RpcError::Transport(msg),
            other => RpcError::Remote(other.to_string()),
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;
