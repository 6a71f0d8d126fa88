use colored::*;
use eyre::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;

use crate::cli::OutputFormat;
use pagewatch::config::Config;
use pagewatch::hook::lifecycle;
use pagewatch::{DeliveryStats, FlushOutcome, HttpClient, HttpRequest, MonitorConfig, PageTiming, UreqClient};

/// What the fixture run observed
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FixtureReport {
    service: String,
    collector: String,
    info_status: Option<u16>,
    info_error: Option<String>,
    outcome: String,
    stats: DeliveryStats,
}

/// The registration the test page performs: the configured delivery and
/// capture settings, with the page identity pinned
fn fixture_config(config: &Config, collector: Option<String>) -> MonitorConfig {
    let base = config.monitor.clone();
    let mut monitor = MonitorConfig::new("test-ui", "index.html", "v1.0.0")
        .with_fmp(true)
        .with_delivery(base.delivery)
        .with_capture(base.capture)
        .with_collector(base.collector);

    if let Some(collector) = collector {
        monitor = monitor.with_collector(collector);
    }
    monitor
}

fn info_url(target: &str) -> String {
    format!("{}/info", target.trim_end_matches('/'))
}

fn describe(outcome: FlushOutcome) -> String {
    match outcome {
        FlushOutcome::Empty => "nothing pending".to_string(),
        FlushOutcome::Delivered { events, attempts } => {
            format!("delivered {} event(s) in {} attempt(s)", events, attempts)
        }
        FlushOutcome::Dropped { events, attempts } => {
            format!("dropped {} event(s) after {} attempt(s)", events, attempts)
        }
        FlushOutcome::Closed => "queue already closed".to_string(),
    }
}

pub fn run(target: &str, collector: Option<String>, format: OutputFormat, config: &Config) -> Result<()> {
    let monitor_config = fixture_config(config, collector);
    let url = info_url(target);
    let info = url.clone();

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let report = rt.block_on(async move {
        let started = Instant::now();
        let monitor = pagewatch::register(monitor_config).context("Failed to register monitor")?;

        // The page's mounted() hook throws a plain object
        let errors = monitor.error_hook();
        let mounted: std::result::Result<(), serde_json::Value> =
            lifecycle::guard(&errors, "mounted", || Err(json!({"msg": "vue error", "status": 3000})));
        if let Err(value) = &mounted {
            log::info!("Lifecycle stage failed as expected: {}", value);
        }

        let http = monitor.request_hook(UreqClient::new(monitor.config().delivery.request_timeout()));
        let request = HttpRequest::post(info)
            .json(serde_json::to_vec(&json!({"page": "index.html"}))?);
        let (info_status, info_error) = match http.execute(request).await {
            Ok(response) => (Some(response.status), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let elapsed = started.elapsed().as_millis() as u64;
        monitor.record_page_timing(PageTiming {
            load_page_ms: Some(elapsed),
            fmp_ms: Some(elapsed),
            ..PageTiming::default()
        });

        let outcome = monitor.close().await;
        let stats = monitor.stats();
        log::info!("Fixture finished: {:?} {:?}", outcome, stats);

        Ok::<_, eyre::Report>(FixtureReport {
            service: monitor.config().service.clone(),
            collector: monitor.config().collector.clone(),
            info_status,
            info_error,
            outcome: describe(outcome),
            stats,
        })
    })?;

    print_report(&report, &url, format)
}

fn print_report(report: &FixtureReport, url: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(report)?),
        OutputFormat::Text => {
            println!("{} {} → {}", "pagewatch fixture".bold(), report.service.cyan(), report.collector);
            println!();

            match (&report.info_status, &report.info_error) {
                (Some(status), _) if (200..300).contains(status) => {
                    println!("  {} POST {} → {}", "✓".green(), url, status)
                }
                (Some(status), _) => println!("  {} POST {} → {}", "✗".red(), url, status),
                (None, Some(error)) => println!("  {} POST {} failed: {}", "✗".red(), url, error),
                (None, None) => {}
            }

            let mark = if report.stats.failed_batches == 0 { "✓".green() } else { "✗".red() };
            println!("  {} {}", mark, report.outcome);
            println!();

            let stats = &report.stats;
            println!("{}:", "delivery".cyan());
            println!("  enqueued: {}", stats.enqueued);
            println!("  abandoned: {}", stats.abandoned);
            println!("  delivered: {} event(s) in {} batch(es)", stats.delivered_events, stats.delivered_batches);
            println!("  failed batches: {}", stats.failed_batches);
            println!("  dropped events: {}", stats.dropped_events);
            println!("  retries: {}", stats.retries);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_config_pins_identity() {
        let mut config = Config::default();
        config.monitor.service = "ignored".to_string();
        config.monitor.delivery.max_retries = 7;

        let monitor = fixture_config(&config, Some("http://collector:9000/events".to_string()));

        assert_eq!(monitor.service, "test-ui");
        assert_eq!(monitor.page_path, "index.html");
        assert_eq!(monitor.service_version, "v1.0.0");
        assert!(monitor.use_fmp);
        assert_eq!(monitor.delivery.max_retries, 7);
        assert_eq!(monitor.collector, "http://collector:9000/events");
    }

    #[test]
    fn test_info_url() {
        assert_eq!(info_url("http://localhost:8080/"), "http://localhost:8080/info");
        assert_eq!(info_url("http://localhost:8080"), "http://localhost:8080/info");
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(
            describe(FlushOutcome::Dropped { events: 2, attempts: 4 }),
            "dropped 2 event(s) after 4 attempt(s)"
        );
    }
}
