//! Outbound HTTP seam
//!
//! Both the request hook (wrapping the application's calls) and the delivery
//! queue (posting batches) talk HTTP through [`HttpClient`]. [`UreqClient`] is
//! the production implementation; ureq is blocking, so calls run on tokio's
//! blocking pool.

use std::future::Future;
use std::time::Duration;

use crate::error::HttpError;

/// An outbound HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON body with the matching content type
    pub fn json(self, body: impl Into<Vec<u8>>) -> Self {
        self.header("Content-Type", "application/json").body(body)
    }
}

/// A response with its body fully read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The outbound HTTP call primitive.
///
/// A non-2xx status is a successful call returning that status; `Err` means no
/// response was obtained at all.
pub trait HttpClient: Send + Sync + 'static {
    fn execute(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse, HttpError>> + Send;
}

/// Blocking ureq agent driven from tokio's blocking pool
#[derive(Debug, Clone)]
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for UreqClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl HttpClient for UreqClient {
    fn execute(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse, HttpError>> + Send {
        let agent = self.agent.clone();
        async move {
            tokio::task::spawn_blocking(move || execute_blocking(&agent, request))
                .await
                .map_err(|e| HttpError::Transport(format!("request task failed: {}", e)))?
        }
    }
}

/// Apply header pairs to a ureq request builder of either body flavour
macro_rules! with_headers {
    ($builder:expr, $headers:expr) => {{
        let mut builder = $builder;
        for (name, value) in $headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }};
}

fn execute_blocking(agent: &ureq::Agent, request: HttpRequest) -> Result<HttpResponse, HttpError> {
    let HttpRequest {
        method,
        url,
        headers,
        body,
    } = request;
    let body = body.unwrap_or_default();

    let result = match method.to_ascii_uppercase().as_str() {
        "GET" => with_headers!(agent.get(&url), &headers).call(),
        "HEAD" => with_headers!(agent.head(&url), &headers).call(),
        "DELETE" => with_headers!(agent.delete(&url), &headers).call(),
        "POST" => with_headers!(agent.post(&url), &headers).send(body.as_slice()),
        "PUT" => with_headers!(agent.put(&url), &headers).send(body.as_slice()),
        "PATCH" => with_headers!(agent.patch(&url), &headers).send(body.as_slice()),
        other => return Err(HttpError::UnsupportedMethod(other.to_string())),
    };

    let mut response = result.map_err(|e| HttpError::Transport(e.to_string()))?;
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_vec()
        .map_err(|e| HttpError::Transport(format!("failed to read response body: {}", e)))?;

    Ok(HttpResponse { status, body })
}
