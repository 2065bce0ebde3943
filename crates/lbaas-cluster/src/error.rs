//! Cluster coordinator error types.

use lbaas_driver::DriverError;
use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The appliances do not match what the agent is configured for.
    #[error("configuration conflict: {0}")]
    Config(String),

    #[error("cluster sync failed after {attempts} attempts: {last_error}")]
    SyncFailed { attempts: u32, last_error: String },

    #[error("device trust is locked: {0}")]
    TrustLocked(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl ClusterError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ClusterError::Driver(e) if e.is_connectivity())
    }
}
