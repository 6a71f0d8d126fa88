//! One-time monitor registration
//!
//! A [`Registrar`] hands out at most one [`Monitor`]. The process-wide
//! registrar behind [`register`] gives the usual "initialize once" entry
//! point; tests and embedders that want isolation create their own.

use once_cell::sync::OnceCell;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::monitor::Monitor;
use crate::transport::{HttpClient, UreqClient};

static GLOBAL: Registrar = Registrar::new();

/// Init guard around a single [`Monitor`]
#[derive(Debug, Default)]
pub struct Registrar {
    slot: OnceCell<Monitor>,
}

impl Registrar {
    pub const fn new() -> Self {
        Self { slot: OnceCell::new() }
    }

    /// Start the monitor. Succeeds once; later calls fail with
    /// [`MonitorError::AlreadyRegistered`] and leave the first registration untouched.
    ///
    /// Must be called from within a tokio runtime. A configuration that fails
    /// validation does not use up the registration.
    pub fn register<C: HttpClient>(&self, config: MonitorConfig, client: C) -> Result<Monitor> {
        let mut started = false;
        let monitor = self.slot.get_or_try_init(|| {
            started = true;
            Monitor::start(config, client)
        })?;

        if !started {
            return Err(MonitorError::AlreadyRegistered {
                service: monitor.config().service.clone(),
            });
        }

        let config = monitor.config();
        log::info!(
            "Registered monitor for {} {} (page {}, fmp {}) reporting to {}",
            config.service,
            config.service_version,
            config.page_path,
            config.use_fmp,
            config.collector
        );
        Ok(monitor.clone())
    }

    pub fn get(&self) -> Option<Monitor> {
        self.slot.get().cloned()
    }
}

/// Register the process-wide monitor, delivering over HTTP with ureq
pub fn register(config: MonitorConfig) -> Result<Monitor> {
    let client = UreqClient::new(config.delivery.request_timeout());
    GLOBAL.register(config, client)
}

/// The process-wide monitor, once registered
pub fn monitor() -> Option<Monitor> {
    GLOBAL.get()
}
