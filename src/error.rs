//! Error types for the multisite agent

use thiserror::Error;

/// Main error type for multisite reconciliation
///
/// Each variant maps to one category of the reconciliation error taxonomy,
/// so callers can decide between "blocked until the operator fixes the
/// configuration" and "fatal for this pass, re-entered on the next event".
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Required configuration is unset or inconsistent between sites
    #[error("configuration error: {0}")]
    Config(String),

    /// The migration planner found more than one candidate and no name match
    #[error("ambiguous topology: {0}")]
    Ambiguous(String),

    /// A secondary site already holds data and cannot join multisite
    #[error("pristine-site violation: {0}")]
    Pristine(String),

    /// A remote administrative operation failed
    #[error("admin operation failed: {0}")]
    Admin(String),

    /// Restarting the gateway service failed
    #[error("restart error: {0}")]
    Restart(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an ambiguous-topology error with the given message
    pub fn ambiguous(msg: impl Into<String>) -> Self {
        Self::Ambiguous(msg.into())
    }

    /// Create a pristine-site error with the given message
    pub fn pristine(msg: impl Into<String>) -> Self {
        Self::Pristine(msg.into())
    }

    /// Create an admin operation error with the given message
    pub fn admin(msg: impl Into<String>) -> Self {
        Self::Admin(msg.into())
    }

    /// Create a restart error with the given message
    pub fn restart(msg: impl Into<String>) -> Self {
        Self::Restart(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether this error leaves the agent blocked until an operator acts.
    ///
    /// Blocked errors are not retried on the next periodic event; they need
    /// a configuration change or manual topology cleanup first.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Ambiguous(_) | Error::Pristine(_)
        )
    }
}
