//! Error capture hook

use std::future::Future;

use super::{CaptureSource, ErrorSink};
use crate::event::{ErrorCategory, RawError};
use crate::monitor::Monitor;

/// Records errors raised by application code. Never panics, never swallows.
#[derive(Debug, Clone)]
pub struct ErrorHook {
    monitor: Monitor,
}

impl ErrorHook {
    pub(crate) fn new(monitor: Monitor) -> Self {
        Self { monitor }
    }

    /// Record any thrown value, e.g. `{msg: "vue error", status: 3000}`
    pub fn capture_value(&self, value: &serde_json::Value) {
        self.report(RawError::from_value(value), ErrorCategory::Lifecycle);
    }

    pub fn capture_error(&self, err: &(dyn std::error::Error + 'static)) {
        self.report(RawError::from_error(err), ErrorCategory::Lifecycle);
    }

    /// Record the error of `result`, if any, and hand the result back unchanged
    pub fn observe<T, E: CaptureSource>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            self.report(e.to_raw(), ErrorCategory::Lifecycle);
        }
        result
    }

    /// Await `future` and record its error, if any; the output is returned unchanged
    pub async fn observe_async<T, E, F>(&self, future: F) -> Result<T, E>
    where
        E: CaptureSource,
        F: Future<Output = Result<T, E>>,
    {
        let result = future.await;
        if let Err(e) = &result {
            self.report(e.to_raw(), ErrorCategory::Async);
        }
        result
    }
}

impl ErrorSink for ErrorHook {
    fn report(&self, raw: RawError, category: ErrorCategory) {
        if !self.monitor.capture_error(raw, category) {
            log::debug!("Error event not recorded for {}", self.monitor.config().service);
        }
    }
}
