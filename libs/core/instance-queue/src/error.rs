//! Instance queue error types
//!
//! Errors fall into two families:
//! - [`BrokerError`]: a single broker call failed (create, subscribe, receive, ...)
//! - [`IqError`]: the instance queue itself could not be provisioned or its
//!   poll loop terminated abnormally
//!
//! Only provisioning and a fatal poll-loop exit are ever surfaced to callers.
//! Handler, delete, and cleanup failures are logged where they happen.

use core_config::ConfigError;
use thiserror::Error;

/// Failure of one broker operation.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker rejected or failed the request
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    /// The broker answered but omitted a field the worker needs
    #[error("{operation} response is missing {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    /// A value could not be expressed in the broker's request format
    #[error("invalid value for {field}: {value}")]
    InvalidArgument { field: &'static str, value: String },
}

impl BrokerError {
    /// Create a request error for the named operation
    pub fn request(operation: &'static str, message: impl ToString) -> Self {
        BrokerError::Request {
            operation,
            message: message.to_string(),
        }
    }

    /// Create a missing-field error for the named operation
    pub fn missing(operation: &'static str, field: &'static str) -> Self {
        BrokerError::MissingField { operation, field }
    }
}

/// Instance queue errors
#[derive(Error, Debug)]
pub enum IqError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Broker call failed
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The poll loop task panicked or was aborted
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for IqError {
    fn from(err: tokio::task::JoinError) -> Self {
        IqError::Worker(err.to_string())
    }
}

/// Result alias for instance queue operations
pub type IqResult<T> = Result<T, IqError>;
