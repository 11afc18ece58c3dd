//! `ragchat health`: report service health as a process exit code.
//!
//! Exit codes: `0` healthy, `1` degraded, `2` unhealthy, `3` when the check
//! itself failed. At `2` or above an alert is posted to the webhook, if any.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ragchat_config::AppConfig;
use ragchat_telemetry::{HealthMonitor, HealthSnapshot, MetricsCollector, SystemSampler};
use reqwest::StatusCode;
use tracing::{error, info, warn};

pub const EXIT_CHECK_FAILED: u8 = 3;
const ALERT_THRESHOLD: u8 = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(config: &AppConfig, url: Option<String>, local: bool, alert_webhook: Option<String>) -> ExitCode {
    ExitCode::from(evaluate(config, url, local, alert_webhook).await)
}

/// Run the check, alert if needed, and return the exit code.
async fn evaluate(config: &AppConfig, url: Option<String>, local: bool, alert_webhook: Option<String>) -> u8 {
    let code = match check(config, url, local).await {
        Ok(snapshot) => {
            print_snapshot(&snapshot);
            u8::try_from(snapshot.status.exit_code()).unwrap_or(EXIT_CHECK_FAILED)
        }
        Err(e) => {
            error!("Health check failed: {e}");
            println!("Health check failed: {e}");
            EXIT_CHECK_FAILED
        }
    };

    if code >= ALERT_THRESHOLD {
        if let Some(webhook) = alert_webhook {
            let message = if code == EXIT_CHECK_FAILED {
                "Health check failed"
            } else {
                "Application is unhealthy"
            };
            match send_alert(&webhook, message).await {
                Ok(()) => info!("Alert sent"),
                Err(e) => warn!("Failed to send alert: {e}"),
            }
        }
    }

    code
}

/// Fetch a snapshot from a running server, or compute one for this process.
pub async fn check(
    config: &AppConfig,
    url: Option<String>,
    local: bool,
) -> Result<HealthSnapshot, Box<dyn std::error::Error>> {
    if local {
        let monitor = HealthMonitor::new(
            Arc::new(MetricsCollector::with_window(config.monitoring.response_window)),
            Box::new(SystemSampler::new()),
            config.monitoring.memory_limit_mb,
        );
        return Ok(monitor.snapshot());
    }

    let base = url.unwrap_or_else(|| config.gateway.base_url());
    fetch_snapshot(&base).await
}

/// `GET <base>/health`. A 503 still carries a snapshot.
pub async fn fetch_snapshot(base: &str) -> Result<HealthSnapshot, Box<dyn std::error::Error>> {
    let endpoint = format!("{}/health", base.trim_end_matches('/'));
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

    let response = client
        .get(&endpoint)
        .send()
        .await
        .map_err(|e| format!("Cannot reach {endpoint}: {e}"))?;
    let status = response.status();
    if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
        return Err(format!("{endpoint} returned {status}").into());
    }
    Ok(response.json::<HealthSnapshot>().await?)
}

pub fn alert_payload(message: &str) -> serde_json::Value {
    serde_json::json!({
        "text": format!("ragchat alert: {message}"),
        "timestamp": chrono::Local::now().to_rfc3339(),
    })
}

async fn send_alert(webhook: &str, message: &str) -> Result<(), reqwest::Error> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?
        .post(webhook)
        .json(&alert_payload(message))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

fn print_snapshot(snapshot: &HealthSnapshot) {
    println!("Application is {}", snapshot.status);
    println!("  uptime:            {:.0}s", snapshot.uptime_seconds);
    println!(
        "  requests:          {} total, {} ok, {} failed ({:.1}% success)",
        snapshot.total_requests, snapshot.successful_requests, snapshot.failed_requests, snapshot.success_rate
    );
    println!("  avg response time: {:.2}s", snapshot.average_response_time);
    println!(
        "  resources:         {:.1} MB, {:.1}% CPU",
        snapshot.memory_usage_mb, snapshot.cpu_usage_percent
    );
    println!("  cache:             {} hits, {} misses", snapshot.cache_hits, snapshot.cache_misses);
    if !snapshot.error_counts.is_empty() {
        let mut errors: Vec<_> = snapshot.error_counts.iter().collect();
        errors.sort();
        for (kind, count) in errors {
            println!("  error {kind}: {count}");
        }
    }
}
