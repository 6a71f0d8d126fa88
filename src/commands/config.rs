use colored::*;
use eyre::Result;

use crate::cli::OutputFormat;
use pagewatch::config::Config;

pub fn run(format: OutputFormat, config: &Config) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(config)?);
        }
        OutputFormat::Text => {
            let monitor = &config.monitor;
            let delivery = &monitor.delivery;
            let capture = &monitor.capture;

            println!("{}", "pagewatch configuration".bold());
            println!();
            println!("  logLevel: {}", config.log_level.as_filter());
            println!();

            println!("{}:", "monitor".cyan());
            println!("  service: {}", display_or_unset(&monitor.service));
            println!("  pagePath: {}", display_or_unset(&monitor.page_path));
            println!("  serviceVersion: {}", display_or_unset(&monitor.service_version));
            println!("  useFmp: {}", monitor.use_fmp);
            println!("  collector: {}", monitor.collector);
            println!();

            println!("{}:", "delivery".cyan());
            println!("  flushIntervalMs: {}", delivery.flush_interval_ms);
            println!("  batchThreshold: {}", delivery.batch_threshold);
            println!("  maxRetries: {}", delivery.max_retries);
            println!("  backoffBaseMs: {}", delivery.backoff_base_ms);
            println!("  backoffMaxMs: {}", delivery.backoff_max_ms);
            println!("  bufferCapacity: {}", delivery.buffer_capacity);
            println!("  requestTimeoutMs: {}", delivery.request_timeout_ms);
            println!();

            println!("{}:", "capture".cyan());
            println!("  jsErrors: {}", capture.js_errors);
            println!("  apiErrors: {}", capture.api_errors);
            if capture.ignore_urls.is_empty() {
                println!("  ignoreUrls: {}", "(none)".dimmed());
            } else {
                println!("  ignoreUrls:");
                for pattern in &capture.ignore_urls {
                    println!("    - {}", pattern);
                }
            }

            if let Err(reason) = monitor.validate() {
                println!();
                println!("{} {}", "⚠".yellow(), reason);
            }
        }
    }

    Ok(())
}

fn display_or_unset(value: &str) -> ColoredString {
    if value.is_empty() {
        "(unset)".dimmed()
    } else {
        value.normal()
    }
}
