//! Control-plane store errors.

use std::fmt::Display;

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open store: {0}")]
    Open(String),

    /// A redb transaction, table, read or write step failed.
    #[error("storage {step} failed: {message}")]
    Storage { step: &'static str, message: String },

    #[error("cannot encode record: {0}")]
    Encode(String),

    #[error("corrupt record: {0}")]
    Decode(String),
}

impl StateError {
    pub(crate) fn storage(step: &'static str, e: impl Display) -> Self {
        StateError::Storage {
            step,
            message: e.to_string(),
        }
    }
}
