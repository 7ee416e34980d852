//! HTTP Exporter Adapter
//!
//! Implements the `MetricExporter` port by POSTing OTLP/JSON-encoded
//! snapshots to a configured URL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, info};

use crate::adapters::otlp_json;
use crate::domain::ports::MetricExporter;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// Default OTLP/HTTP metrics endpoint
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:9090/api/v1/otlp/v1/metrics";

/// Configuration for the HTTP exporter
#[derive(Debug, Clone)]
pub struct HttpExporterConfig {
    /// Destination URL (http or https)
    pub endpoint: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Exporter name used in logs and telemetry
    pub name: String,
}

impl Default for HttpExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            timeout: Duration::from_secs(10),
            name: "otlp".to_string(),
        }
    }
}

impl HttpExporterConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Network destination for snapshots
#[derive(Debug)]
pub struct HttpExporter {
    name: String,
    endpoint: Url,
    client: Client,
}

impl HttpExporter {
    /// Validate the endpoint and build the HTTP client.
    ///
    /// The endpoint is not contacted here; an unreachable destination shows up
    /// as export failures.
    pub fn new(config: HttpExporterConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint '{}': {}", config.endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "unsupported scheme '{}' in endpoint '{}'",
                endpoint.scheme(),
                config.endpoint
            )));
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        info!(exporter = %config.name, endpoint = %endpoint, "HTTP exporter configured");
        Ok(Self {
            name: config.name,
            endpoint,
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl MetricExporter for HttpExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        let body = otlp_json::encode(&snapshot);
        let start = Instant::now();

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::export(&self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::export(
                &self.name,
                format!("HTTP {}: {}", status, text.trim()),
            ));
        }

        debug!(
            exporter = %self.name,
            status = %status,
            metrics = snapshot.metrics.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "snapshot delivered"
        );
        Ok(())
    }
}
