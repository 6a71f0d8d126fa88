//! Lifecycle guards
//!
//! What a host framework does around each component callback: run it, report
//! a failure to the registered sink, then let the failure continue on its way.

use std::panic::{self, AssertUnwindSafe};

use super::{CaptureSource, ErrorSink};
use crate::event::{ErrorCategory, RawError};

/// Run a lifecycle callback; an `Err` is reported and returned as is
pub fn guard<T, E: CaptureSource>(
    sink: &dyn ErrorSink,
    stage: &str,
    callback: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let result = callback();
    if let Err(e) = &result {
        log::debug!("Lifecycle stage '{}' failed", stage);
        sink.report(e.to_raw(), ErrorCategory::Lifecycle);
    }
    result
}

/// Run a lifecycle callback; a panic is reported, then unwinding resumes
pub fn guard_panic<T>(sink: &dyn ErrorSink, stage: &str, callback: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(value) => value,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned());

            log::debug!("Lifecycle stage '{}' panicked", stage);
            sink.report(message.map(RawError::Text).unwrap_or(RawError::Unknown), ErrorCategory::Panic);
            panic::resume_unwind(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        seen: Mutex<Vec<(RawError, ErrorCategory)>>,
    }

    impl ErrorSink for CollectingSink {
        fn report(&self, raw: RawError, category: ErrorCategory) {
            self.seen.lock().unwrap().push((raw, category));
        }
    }

    #[test]
    fn test_guard_reports_and_propagates() {
        let sink = CollectingSink::default();
        let result: Result<(), serde_json::Value> = guard(&sink, "mounted", || {
            Err(serde_json::json!({"msg": "vue error", "status": 3000}))
        });

        assert!(result.is_err());
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, ErrorCategory::Lifecycle);
    }

    #[test]
    fn test_guard_success_is_silent() {
        let sink = CollectingSink::default();
        let result: Result<u32, String> = guard(&sink, "created", || Ok(1));
        assert_eq!(result, Ok(1));
        assert!(sink.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_guard_panic_reports_then_resumes() {
        let sink = CollectingSink::default();
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            guard_panic::<()>(&sink, "updated", || panic!("render exploded"))
        }));

        assert!(unwound.is_err());
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen[0], (RawError::Text("render exploded".to_string()), ErrorCategory::Panic));
    }

    #[test]
    fn test_guard_panic_passes_value_through() {
        let sink = CollectingSink::default();
        assert_eq!(guard_panic(&sink, "created", || 42), 42);
        assert!(sink.seen.lock().unwrap().is_empty());
    }
}
