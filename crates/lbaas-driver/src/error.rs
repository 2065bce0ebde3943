//! Appliance driver error types.

use thiserror::Error;

/// Result type alias for appliance operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors an appliance operation can produce.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object in use: {0}")]
    InUse(String),

    #[error("object already exists: {0}")]
    Conflict(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("appliance api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed appliance response: {0}")]
    Malformed(String),
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }

    pub fn is_in_use(&self) -> bool {
        matches!(self, DriverError::InUse(_))
    }

    /// Errors that mean the session to the appliance is gone.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DriverError::Io(_) | DriverError::Timeout(_) | DriverError::NotConnected(_)
        )
    }

    /// Another writer holds the device trust lock.
    pub fn is_locked(&self) -> bool {
        matches!(self, DriverError::Api { status: 409, message } if message.contains("lock"))
    }
}

/// Treat a missing object as success (idempotent delete).
pub fn ignore_not_found(result: DriverResult<()>) -> DriverResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(DriverError::NotFound("x".into()).is_not_found());
        assert!(DriverError::InUse("x".into()).is_in_use());
        assert!(DriverError::Io("reset".into()).is_connectivity());
        assert!(DriverError::Timeout("30s".into()).is_connectivity());
        assert!(!DriverError::Conflict("x".into()).is_connectivity());
        let locked = DriverError::Api {
            status: 409,
            message: "device trust is locked".into(),
        };
        assert!(locked.is_locked());
    }

    #[test]
    fn ignore_not_found_only_swallows_missing() {
        assert!(ignore_not_found(Err(DriverError::NotFound("x".into()))).is_ok());
        assert!(ignore_not_found(Err(DriverError::InUse("x".into()))).is_err());
    }
}
