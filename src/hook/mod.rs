//! Capture hooks
//!
//! Two independent capture points feed the monitor:
//! - [`ErrorHook`], an [`ErrorSink`] the host framework calls when application
//!   code fails inside one of its callbacks
//! - [`RequestHook`], a wrapper around the application's [`crate::HttpClient`]
//!
//! Hooks observe; they never swallow the error or alter the response they saw.

use crate::error::HttpError;
use crate::event::{ErrorCategory, RawError};

pub mod error;
pub mod lifecycle;
pub mod request;

pub use error::ErrorHook;
pub use request::RequestHook;

/// Capability the host framework invokes with every error it propagates
pub trait ErrorSink: Send + Sync {
    fn report(&self, raw: RawError, category: ErrorCategory);
}

/// Anything the application may fail with, viewed as a [`RawError`] without consuming it
pub trait CaptureSource {
    fn to_raw(&self) -> RawError;
}

impl CaptureSource for RawError {
    fn to_raw(&self) -> RawError {
        self.clone()
    }
}

impl CaptureSource for serde_json::Value {
    fn to_raw(&self) -> RawError {
        RawError::from_value(self)
    }
}

impl CaptureSource for String {
    fn to_raw(&self) -> RawError {
        RawError::Text(self.clone())
    }
}

impl CaptureSource for &str {
    fn to_raw(&self) -> RawError {
        RawError::Text((*self).to_string())
    }
}

impl CaptureSource for std::io::Error {
    fn to_raw(&self) -> RawError {
        RawError::from_error(self)
    }
}

impl CaptureSource for HttpError {
    fn to_raw(&self) -> RawError {
        RawError::from_error(self)
    }
}

impl CaptureSource for Box<dyn std::error::Error + Send + Sync> {
    fn to_raw(&self) -> RawError {
        RawError::from_error(self.as_ref())
    }
}
