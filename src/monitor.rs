//! The registered monitor
//!
//! A [`Monitor`] is the context object hooks are built from: it owns the
//! read-only configuration, the normalizer and the handle to the delivery
//! queue. It is created only through [`crate::Registrar`].

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::{ErrorCategory, EventNormalizer, PageTiming, RawCapture, RawError, RawRequest, RequestOutcome};
use crate::hook::{ErrorHook, RequestHook};
use crate::queue::{DeliveryQueue, DeliveryState, DeliveryStats, FlushOutcome};
use crate::transport::HttpClient;

#[derive(Debug, Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

#[derive(Debug)]
struct MonitorInner {
    config: MonitorConfig,
    normalizer: EventNormalizer,
    queue: DeliveryQueue,
    ignore_urls: Vec<Regex>,
}

impl Monitor {
    pub(crate) fn start<C: HttpClient>(config: MonitorConfig, client: C) -> Result<Self> {
        config.validate().map_err(MonitorError::InvalidConfig)?;

        let ignore_urls = config
            .capture
            .ignore_urls
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| MonitorError::InvalidConfig(format!("bad ignore pattern '{}': {}", pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let queue = DeliveryQueue::spawn(config.collector.clone(), config.delivery.clone(), client)?;

        Ok(Self {
            inner: Arc::new(MonitorInner {
                normalizer: EventNormalizer::new(&config),
                config,
                queue,
                ignore_urls,
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Error sink for the host framework
    pub fn error_hook(&self) -> ErrorHook {
        ErrorHook::new(self.clone())
    }

    /// Wrap the application's HTTP client so every call is recorded
    pub fn request_hook<C: HttpClient>(&self, client: C) -> RequestHook<C> {
        RequestHook::new(client, self.clone())
    }

    /// Normalize and enqueue. Returns false if the queue abandoned the event.
    pub fn capture(&self, raw: RawCapture) -> bool {
        let event = self.inner.normalizer.normalize(raw);
        log::debug!("Captured {:?} event for {}", event.kind(), event.service());
        self.inner.queue.enqueue(event)
    }

    pub(crate) fn capture_error(&self, raw: RawError, category: ErrorCategory) -> bool {
        if !self.inner.config.capture.js_errors && category != ErrorCategory::Ajax {
            return false;
        }
        self.capture(RawCapture::Error { raw, category })
    }

    /// Record a finished request, plus an ajax error when it failed and api errors are on
    pub(crate) fn capture_request(&self, raw: RawRequest) {
        let failed = self.inner.config.capture.api_errors && raw.outcome.is_failure();
        let ajax_error = failed.then(|| {
            let reason = match &raw.outcome {
                RequestOutcome::Failed { reason } => reason.clone(),
                RequestOutcome::Status { code } => format!("status {}", code),
            };
            RawError::Fields {
                msg: Some(Value::String(format!("{} {} failed: {}", raw.method, raw.url, reason))),
                status: Some(Value::from(raw.outcome.code())),
            }
        });

        self.capture(RawCapture::Request(raw));
        if let Some(error) = ajax_error {
            self.capture_error(error, ErrorCategory::Ajax);
        }
    }

    /// Page load timings; the FMP value is only kept when `useFmp` is on
    pub fn record_page_timing(&self, timing: PageTiming) -> bool {
        self.capture(RawCapture::Perf(timing))
    }

    /// Requests to the collector endpoint itself or to ignored URLs are not recorded
    pub fn should_trace(&self, url: &str) -> bool {
        if endpoint(url) == endpoint(&self.inner.config.collector) {
            return false;
        }
        !self.inner.ignore_urls.iter().any(|re| re.is_match(url))
    }

    pub fn stats(&self) -> DeliveryStats {
        self.inner.queue.stats()
    }

    pub fn delivery_state(&self) -> DeliveryState {
        self.inner.queue.state()
    }

    pub async fn flush(&self) -> FlushOutcome {
        self.inner.queue.flush().await
    }

    /// Best-effort final flush; later captures are abandoned
    pub async fn close(&self) -> FlushOutcome {
        self.inner.queue.close().await
    }
}

/// A URL without its query, fragment and trailing slashes
fn endpoint(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].trim_end_matches('/')
}
