//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("state store error: {0}")]
    State(#[from] lbaas_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
