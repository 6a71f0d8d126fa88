//! Error types for registration, delivery and the HTTP seam

use thiserror::Error;

/// Errors surfaced to the application by the monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// `register` was called after a monitor already exists.
    #[error("Monitor already registered for service '{service}'")]
    AlreadyRegistered { service: String },

    /// The configuration cannot be used to start a monitor.
    #[error("Invalid monitor configuration: {0}")]
    InvalidConfig(String),

    /// Registration needs a tokio runtime to host the delivery worker.
    #[error("No tokio runtime available to run the delivery worker")]
    NoRuntime,
}

/// Failure of a single transmission attempt. Retried, never raised to the application.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Collector unreachable: {0}")]
    Transport(#[from] HttpError),

    #[error("Collector rejected batch with status {0}")]
    Status(u16),

    #[error("Failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of an outbound HTTP call, as seen by the caller of an [`crate::HttpClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("HTTP request failed: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
