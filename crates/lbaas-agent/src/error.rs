//! Agent error types.

use std::fmt;

use lbaas_cluster::ClusterError;
use lbaas_core::RpcError;
use lbaas_driver::DriverError;
use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

/// Reconcile phase an error was raised in, for status descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Tenant,
    Network,
    Pool,
    Monitor,
    Member,
    Vip,
    PoolDelete,
    NetworkTeardown,
    TenantCleanup,
    FinalSync,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Tenant => "tenant setup",
            Phase::Network => "network setup",
            Phase::Pool => "pool",
            Phase::Monitor => "health monitor",
            Phase::Member => "member",
            Phase::Vip => "vip",
            Phase::PoolDelete => "pool delete",
            Phase::NetworkTeardown => "network teardown",
            Phase::TenantCleanup => "tenant cleanup",
            Phase::FinalSync => "cluster sync",
        })
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Data the reconciler needs is missing or unusable.
    #[error("{0}")]
    Invalid(String),

    #[error("{phase} failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<AgentError>,
    },
}

impl AgentError {
    /// Whether the appliance session was lost; the caller re-arms a resync.
    pub fn is_connectivity(&self) -> bool {
        match self {
            AgentError::Driver(e) => e.is_connectivity(),
            AgentError::Cluster(e) => e.is_connectivity(),
            AgentError::Phase { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            AgentError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Short description suitable for an object's status field.
    pub fn status_description(&self) -> String {
        let mut text = self.to_string();
        if text.len() > 255 {
            let mut cut = 252;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...");
        }
        text
    }
}

/// Tag a result with the phase it came from.
pub trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> AgentResult<T>;
}

impl<T, E: Into<AgentError>> InPhase<T> for Result<T, E> {
    fn in_phase(self, phase: Phase) -> AgentResult<T> {
        self.map_err(|e| match e.into() {
            already @ AgentError::Phase { .. } => already,
            other => AgentError::Phase {
                phase,
                source: Box::new(other),
            },
        })
    }
}
