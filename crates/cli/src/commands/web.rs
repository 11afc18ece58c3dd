//! `ragchat web`: serve the chat over HTTP and WebSocket.

use std::sync::Arc;

use ragchat_config::{AppConfig, GatewayConfig};
use ragchat_gateway::GatewayState;
use ragchat_telemetry::{HealthMonitor, SystemSampler};
use tracing::warn;

use super::build_pipeline;

pub async fn run(config: &AppConfig, host: Option<String>, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = gateway_config(config, host, port);

    let pipeline = build_pipeline(config)?;
    if !pipeline.warm_up().await.all_ok() {
        warn!("Serving despite warm-up failures; first requests may be slow or fail");
    }

    let health = Arc::new(HealthMonitor::new(
        pipeline.metrics().clone(),
        Box::new(SystemSampler::new()),
        config.monitoring.memory_limit_mb,
    ));
    let state = Arc::new(GatewayState {
        pipeline,
        health,
        allowed_origin: Some(gateway.base_url()),
    });

    println!();
    println!("  ragchat web gateway");
    println!("  Chat:    ws://{}:{}/chat", gateway.host, gateway.port);
    println!("  Health:  {}/health", gateway.base_url());
    println!("  Metrics: {}/metrics", gateway.base_url());
    println!();

    ragchat_gateway::start(&gateway, state).await
}

fn gateway_config(config: &AppConfig, host: Option<String>, port: Option<u16>) -> GatewayConfig {
    let mut gateway = config.gateway.clone();
    if let Some(host) = host {
        gateway.host = host;
    }
    if let Some(port) = port {
        gateway.port = port;
    }
    gateway
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_gateway_section() {
        let config = AppConfig::default();
        let gateway = gateway_config(&config, None, Some(9100));
        assert_eq!(gateway.host, config.gateway.host);
        assert_eq!(gateway.port, 9100);

        let gateway = gateway_config(&config, Some("0.0.0.0".into()), None);
        assert_eq!(gateway.host, "0.0.0.0");
        assert_eq!(gateway.port, 8000);
    }

    #[tokio::test]
    async fn missing_index_stops_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.knowledge.index_path = dir.path().join("absent.jsonl");

        let err = run(&config, None, Some(0)).await.unwrap_err();
        assert!(err.to_string().contains("ragchat ingest"));
    }
}
