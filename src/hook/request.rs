//! Request tracing hook

use std::future::Future;
use std::time::Instant;

use crate::error::HttpError;
use crate::event::{RawRequest, RequestOutcome};
use crate::monitor::Monitor;
use crate::transport::{HttpClient, HttpRequest, HttpResponse};

/// Wraps the application's HTTP client.
///
/// The capture runs once the wrapped call has resolved and only enqueues, so
/// the caller gets exactly the result it would have had unhooked.
#[derive(Debug, Clone)]
pub struct RequestHook<C> {
    inner: C,
    monitor: Monitor,
}

impl<C: HttpClient> RequestHook<C> {
    pub(crate) fn new(inner: C, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }

    async fn traced(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = request.method.clone();
        let url = request.url.clone();
        let started = Instant::now();

        let result = self.inner.execute(request).await;

        if self.monitor.should_trace(&url) {
            let outcome = match &result {
                Ok(response) => RequestOutcome::Status { code: response.status },
                Err(e) => RequestOutcome::Failed { reason: e.to_string() },
            };
            self.monitor.capture_request(RawRequest {
                method,
                url,
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        result
    }
}

impl<C: HttpClient> HttpClient for RequestHook<C> {
    fn execute(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse, HttpError>> + Send {
        self.traced(request)
    }
}
