use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main pagewatch configuration (binary side)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub log_level: LogLevel,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Off => log::LevelFilter::Off,
        }
    }
}

/// Registration options for a monitor.
///
/// Set once at registration and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Identifies the monitored application
    pub service: String,
    /// Current page identifier
    pub page_path: String,
    /// Semantic version of the monitored application
    pub service_version: String,
    /// Enable first-meaningful-paint timing capture
    pub use_fmp: bool,
    /// Collector endpoint receiving batches
    pub collector: String,
    pub delivery: DeliveryConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeliveryConfig {
    /// Flush the current batch at least this often
    pub flush_interval_ms: u64,
    /// Flush as soon as the batch holds this many events
    pub batch_threshold: usize,
    /// Retries after the first failed attempt, per batch
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Events waiting for the worker beyond this are abandoned
    pub buffer_capacity: usize,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Record errors reported by the host framework
    pub js_errors: bool,
    /// Record failed requests (status >= 400 or transport error) as ajax errors
    pub api_errors: bool,
    /// Regular expressions; matching request URLs are never recorded
    pub ignore_urls: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            service: String::new(),
            page_path: String::new(),
            service_version: String::new(),
            use_fmp: false,
            collector: "http://127.0.0.1:12800/events".to_string(),
            delivery: DeliveryConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 60_000,
            batch_threshold: 20,
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            buffer_capacity: 1_024,
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            js_errors: true,
            api_errors: true,
            ignore_urls: Vec::new(),
        }
    }
}

impl MonitorConfig {
    pub fn new(service: impl Into<String>, page_path: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            page_path: page_path.into(),
            service_version: service_version.into(),
            ..Self::default()
        }
    }

    pub fn with_fmp(mut self, use_fmp: bool) -> Self {
        self.use_fmp = use_fmp;
        self
    }

    pub fn with_collector(mut self, collector: impl Into<String>) -> Self {
        self.collector = collector.into();
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Check the fields a running monitor depends on
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.service.trim().is_empty() {
            return Err("service must not be empty".to_string());
        }
        if self.collector.trim().is_empty() {
            return Err("collector must not be empty".to_string());
        }
        if self.delivery.batch_threshold == 0 {
            return Err("delivery.batchThreshold must be at least 1".to_string());
        }
        if self.delivery.buffer_capacity == 0 {
            return Err("delivery.bufferCapacity must be at least 1".to_string());
        }
        if self.delivery.flush_interval_ms == 0 {
            return Err("delivery.flushIntervalMs must be at least 1".to_string());
        }
        if self.delivery.request_timeout_ms == 0 {
            return Err("delivery.requestTimeoutMs must be at least 1".to_string());
        }
        Ok(())
    }
}

impl DeliveryConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay before retry number `retry` (0-based): base * 2^retry, capped at the maximum
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let path = Self::expand_path(path);
            return Self::load_from_file(&path).context(format!("Failed to load config from {}", path.display()));
        }

        if let Ok(env_path) = std::env::var("PAGEWATCH_CONFIG") {
            let path = Self::expand_path(Path::new(&env_path));
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from PAGEWATCH_CONFIG: {}", e);
                    }
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("pagewatch").join("pagewatch.yaml");
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", path.display(), e);
                    }
                }
            }
        }

        // Development fallback
        let local_config = PathBuf::from("pagewatch.yaml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load local config: {}", e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Expand a path that may contain ~ or env vars
    pub fn expand_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        let expanded = shellexpand::full(&path_str).unwrap_or_else(|_| path_str.clone());
        PathBuf::from(expanded.as_ref())
    }
}
