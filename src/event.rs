//! Captured events and their normalization
//!
//! Raw inputs arrive in whatever shape the host produced them. [`EventNormalizer`]
//! turns every one of them into a well-formed [`CapturedEvent`], defaulting
//! missing fields instead of failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MonitorConfig;

pub const UNKNOWN_MESSAGE: &str = "unknown";
pub const UNKNOWN_URL: &str = "unknown";

/// Event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Error,
    Request,
    Perf,
}

/// Where an error was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Raised by application code inside a framework lifecycle callback
    Lifecycle,
    /// A panic caught by a lifecycle guard
    Panic,
    /// A failed outbound request
    Ajax,
    /// A failed future the application did not await
    Async,
    Unknown,
}

/// Result of an outbound request as seen by the request hook
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RequestOutcome {
    Status { code: u16 },
    Failed { reason: String },
}

impl RequestOutcome {
    pub fn is_failure(&self) -> bool {
        match self {
            RequestOutcome::Status { code } => *code >= 400,
            RequestOutcome::Failed { .. } => true,
        }
    }

    /// HTTP status, or 0 when the request never produced one
    pub fn code(&self) -> u16 {
        match self {
            RequestOutcome::Status { code } => *code,
            RequestOutcome::Failed { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub code: i64,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub method: String,
    pub url: String,
    pub outcome: RequestOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_ready_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_page_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fmp_time: Option<u64>,
}

/// Kind-specific event body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Error(ErrorPayload),
    Request(RequestPayload),
    Perf(PerfPayload),
}

/// A normalized record of an intercepted error, request or page timing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedEvent {
    kind: EventKind,
    timestamp: DateTime<Utc>,
    service: String,
    service_version: String,
    page_path: String,
    payload: EventPayload,
}

impl CapturedEvent {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    pub fn page_path(&self) -> &str {
        &self.page_path
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn as_error(&self) -> Option<&ErrorPayload> {
        match &self.payload {
            EventPayload::Error(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_request(&self) -> Option<&RequestPayload> {
        match &self.payload {
            EventPayload::Request(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_perf(&self) -> Option<&PerfPayload> {
        match &self.payload {
            EventPayload::Perf(p) => Some(p),
            _ => None,
        }
    }
}

/// A thrown value in one of the shapes hosts actually produce
#[derive(Debug, Clone, PartialEq)]
pub enum RawError {
    /// A native error value
    Native { message: String, stack: Option<String> },
    /// A plain mapping, e.g. `{msg: "vue error", status: 3000}`
    Fields { msg: Option<Value>, status: Option<Value> },
    /// A bare string
    Text(String),
    /// Anything else
    Unknown,
}

impl RawError {
    /// Classify an arbitrary JSON value
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                let field = |name: &str| map.get(name).filter(|v| !v.is_null());
                RawError::Fields {
                    msg: field("msg").or_else(|| field("message")).cloned(),
                    status: field("status").or_else(|| field("code")).cloned(),
                }
            }
            Value::String(s) => RawError::Text(s.clone()),
            _ => RawError::Unknown,
        }
    }

    /// Capture a native error together with its source chain
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        RawError::Native {
            message: err.to_string(),
            stack: if chain.is_empty() { None } else { Some(chain.join("\n")) },
        }
    }

    fn message(&self) -> Option<String> {
        let message = match self {
            RawError::Native { message, .. } => Some(message.clone()),
            RawError::Fields { msg, .. } => msg.as_ref().and_then(scalar_to_string),
            RawError::Text(text) => Some(text.clone()),
            RawError::Unknown => None,
        };
        message.filter(|m| !m.trim().is_empty())
    }

    fn code(&self) -> Option<i64> {
        match self {
            RawError::Fields { status: Some(status), .. } => match status {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            },
            _ => None,
        }
    }

    fn stack(&self) -> Option<String> {
        match self {
            RawError::Native { stack, .. } => stack.clone(),
            _ => None,
        }
    }
}

impl From<&Value> for RawError {
    fn from(value: &Value) -> Self {
        RawError::from_value(value)
    }
}

impl From<&str> for RawError {
    fn from(text: &str) -> Self {
        RawError::Text(text.to_string())
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Request metadata observed once the response (or failure) is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub method: String,
    pub url: String,
    pub outcome: RequestOutcome,
    pub duration_ms: u64,
}

/// Page load timings in milliseconds, as measured by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTiming {
    pub ttfb_ms: Option<u64>,
    pub dom_ready_ms: Option<u64>,
    pub load_page_ms: Option<u64>,
    pub fmp_ms: Option<u64>,
}

/// Anything a hook can hand to the normalizer
#[derive(Debug, Clone, PartialEq)]
pub enum RawCapture {
    Error { raw: RawError, category: ErrorCategory },
    Request(RawRequest),
    Perf(PageTiming),
}

/// Builds [`CapturedEvent`]s stamped with the registered service identity
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    service: String,
    service_version: String,
    page_path: String,
    use_fmp: bool,
}

impl EventNormalizer {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            service: config.service.clone(),
            service_version: config.service_version.clone(),
            page_path: config.page_path.clone(),
            use_fmp: config.use_fmp,
        }
    }

    /// Normalize any raw input. Never fails.
    pub fn normalize(&self, raw: RawCapture) -> CapturedEvent {
        match raw {
            RawCapture::Error { raw, category } => self.normalize_error(&raw, category),
            RawCapture::Request(raw) => self.normalize_request(raw),
            RawCapture::Perf(timing) => self.normalize_timing(timing),
        }
    }

    pub fn normalize_error(&self, raw: &RawError, category: ErrorCategory) -> CapturedEvent {
        let payload = ErrorPayload {
            message: raw.message().unwrap_or_else(|| UNKNOWN_MESSAGE.to_string()),
            code: raw.code().unwrap_or(0),
            category,
            stack: raw.stack(),
        };
        self.event(EventKind::Error, EventPayload::Error(payload))
    }

    pub fn normalize_request(&self, raw: RawRequest) -> CapturedEvent {
        let method = raw.method.trim().to_ascii_uppercase();
        let url = raw.url.trim();

        let payload = RequestPayload {
            method: if method.is_empty() { "GET".to_string() } else { method },
            url: if url.is_empty() { UNKNOWN_URL.to_string() } else { url.to_string() },
            outcome: raw.outcome,
            duration_ms: raw.duration_ms,
        };
        self.event(EventKind::Request, EventPayload::Request(payload))
    }

    pub fn normalize_timing(&self, timing: PageTiming) -> CapturedEvent {
        let payload = PerfPayload {
            ttfb_time: timing.ttfb_ms,
            dom_ready_time: timing.dom_ready_ms,
            load_page_time: timing.load_page_ms,
            fmp_time: if self.use_fmp { timing.fmp_ms } else { None },
        };
        self.event(EventKind::Perf, EventPayload::Perf(payload))
    }

    fn event(&self, kind: EventKind, payload: EventPayload) -> CapturedEvent {
        CapturedEvent {
            kind,
            timestamp: Utc::now(),
            service: self.service.clone(),
            service_version: self.service_version.clone(),
            page_path: self.page_path.clone(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> EventNormalizer {
        EventNormalizer::new(&MonitorConfig::new("test-ui", "index.html", "v1.0.0").with_fmp(true))
    }

    fn error_of(value: Value) -> ErrorPayload {
        let event = normalizer().normalize_error(&RawError::from_value(&value), ErrorCategory::Lifecycle);
        event.as_error().cloned().expect("error payload")
    }

    #[test]
    fn test_fields_error() {
        let payload = error_of(json!({"msg": "vue error", "status": 3000}));
        assert_eq!(payload.message, "vue error");
        assert_eq!(payload.code, 3000);
        assert_eq!(payload.category, ErrorCategory::Lifecycle);
    }

    #[test]
    fn test_missing_status_defaults_to_zero() {
        for value in [json!({"msg": "boom"}), json!({"msg": "boom", "status": null}), json!({"msg": "boom", "status": [1]})] {
            assert_eq!(error_of(value).code, 0);
        }
    }

    #[test]
    fn test_missing_msg_defaults_to_unknown() {
        for value in [json!({"status": 500}), json!({"msg": ""}), json!({"msg": {"nested": true}})] {
            assert_eq!(error_of(value).message, UNKNOWN_MESSAGE);
        }
    }

    #[test]
    fn test_message_and_code_aliases() {
        let payload = error_of(json!({"message": "typed", "code": "404"}));
        assert_eq!(payload.message, "typed");
        assert_eq!(payload.code, 404);
    }

    #[test]
    fn test_null_field_falls_back_to_alias() {
        let payload = error_of(json!({"msg": null, "message": "x", "status": null, "code": 502}));
        assert_eq!(payload.message, "x");
        assert_eq!(payload.code, 502);
    }

    #[test]
    fn test_primitive_thrown_values() {
        assert_eq!(error_of(json!("plain string")).message, "plain string");
        assert_eq!(error_of(json!(42)).message, UNKNOWN_MESSAGE);
        assert_eq!(error_of(Value::Null).code, 0);
    }

    #[test]
    fn test_native_error_keeps_source_chain() {
        let plain = std::io::Error::other("disk gone");
        let raw = RawError::from_error(&plain);
        assert_eq!(raw.message().as_deref(), Some("disk gone"));
        assert_eq!(raw.stack(), None);

        let wrapped = crate::error::DeliveryError::Encode(serde_json::from_str::<Value>("{").unwrap_err());
        let raw = RawError::from_error(&wrapped);
        assert!(raw.message().unwrap().starts_with("Failed to encode batch"));
        assert!(raw.stack().unwrap().starts_with("caused by: "));
    }

    #[test]
    fn test_event_is_stamped_with_identity() {
        let event = normalizer().normalize(RawCapture::Error {
            raw: RawError::Unknown,
            category: ErrorCategory::Unknown,
        });
        assert_eq!(event.kind(), EventKind::Error);
        assert_eq!(event.service(), "test-ui");
        assert_eq!(event.service_version(), "v1.0.0");
        assert_eq!(event.page_path(), "index.html");
        assert!(event.timestamp() <= Utc::now());
    }

    #[test]
    fn test_request_defaults() {
        let event = normalizer().normalize_request(RawRequest {
            method: " post ".to_string(),
            url: "".to_string(),
            outcome: RequestOutcome::Status { code: 200 },
            duration_ms: 12,
        });
        let payload = event.as_request().expect("request payload");
        assert_eq!(payload.method, "POST");
        assert_eq!(payload.url, UNKNOWN_URL);
        assert_eq!(event.kind(), EventKind::Request);
    }

    #[test]
    fn test_fmp_dropped_when_disabled() {
        let timing = PageTiming {
            load_page_ms: Some(800),
            fmp_ms: Some(450),
            ..PageTiming::default()
        };
        let with = normalizer().normalize_timing(timing);
        assert_eq!(with.as_perf().unwrap().fmp_time, Some(450));

        let without = EventNormalizer::new(&MonitorConfig::new("svc", "/", "v1")).normalize_timing(timing);
        assert_eq!(without.as_perf().unwrap().fmp_time, None);
        assert_eq!(without.as_perf().unwrap().load_page_time, Some(800));
    }

    #[test]
    fn test_wire_format() {
        let event = normalizer().normalize_error(
            &RawError::from_value(&json!({"msg": "vue error", "status": 3000})),
            ErrorCategory::Lifecycle,
        );
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["kind"], "error");
        assert_eq!(wire["serviceVersion"], "v1.0.0");
        assert_eq!(wire["pagePath"], "index.html");
        assert_eq!(wire["payload"]["message"], "vue error");
        assert_eq!(wire["payload"]["code"], 3000);
        assert_eq!(wire["payload"]["category"], "lifecycle");
    }

    #[test]
    fn test_outcome_failure() {
        assert!(RequestOutcome::Status { code: 500 }.is_failure());
        assert!(!RequestOutcome::Status { code: 204 }.is_failure());
        let failed = RequestOutcome::Failed {
            reason: "refused".to_string(),
        };
        assert!(failed.is_failure());
        assert_eq!(failed.code(), 0);
    }
}
