//! Client-side capture of application errors and outbound requests
//!
//! Register a [`Monitor`] once, attach its hooks, and every captured error or
//! request is normalized into a [`CapturedEvent`] and shipped to the collector
//! in batches by a background worker:
//!
//! - [`hook::ErrorHook`] - an [`ErrorSink`] for the host framework
//! - [`hook::RequestHook`] - wraps any [`HttpClient`]
//! - [`DeliveryQueue`] - non-blocking enqueue, batched POSTs, bounded retries
//!
//! ```rust,ignore
//! let monitor = pagewatch::register(
//!     MonitorConfig::new("test-ui", "index.html", "v1.0.0").with_fmp(true),
//! )?;
//! let errors = monitor.error_hook();
//! let http = monitor.request_hook(UreqClient::default());
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod hook;
pub mod monitor;
pub mod queue;
pub mod registrar;
pub mod transport;

pub use config::{CaptureConfig, DeliveryConfig, MonitorConfig};
pub use error::{DeliveryError, HttpError, MonitorError};
pub use event::{
    CapturedEvent, ErrorCategory, EventKind, EventNormalizer, EventPayload, PageTiming, RawCapture, RawError,
    RawRequest, RequestOutcome,
};
pub use hook::{CaptureSource, ErrorHook, ErrorSink, RequestHook};
pub use monitor::Monitor;
pub use queue::{DeliveryBatch, DeliveryQueue, DeliveryState, DeliveryStats, FlushOutcome};
pub use registrar::{Registrar, monitor, register};
pub use transport::{HttpClient, HttpRequest, HttpResponse, UreqClient};
