//! Pipeline Self-Telemetry
//!
//! Counters about the pipeline itself (export outcomes and latency, callback
//! failures, shutdown timeouts), kept in a dedicated Prometheus registry and
//! rendered in the Prometheus text exposition format.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::{Error, Result};

const NAMESPACE: &str = "meterflow";

/// Outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";

/// Self-telemetry registry
#[derive(Clone)]
pub struct PipelineTelemetry {
    registry: Registry,
    exports: IntCounterVec,
    export_duration: HistogramVec,
    callback_failures: IntCounterVec,
    shutdown_timeouts: IntCounterVec,
}

impl PipelineTelemetry {
    /// Create a registry with all pipeline counters registered
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let exports = IntCounterVec::new(
            Opts::new("exports_total", "Export attempts by exporter and outcome")
                .namespace(NAMESPACE),
            &["exporter", "outcome"],
        )?;
        let export_duration = HistogramVec::new(
            HistogramOpts::new("export_duration_seconds", "Duration of export calls")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["exporter"],
        )?;
        let callback_failures = IntCounterVec::new(
            Opts::new(
                "callback_failures_total",
                "Observable callbacks that failed or timed out",
            )
            .namespace(NAMESPACE),
            &["instrument", "reason"],
        )?;
        let shutdown_timeouts = IntCounterVec::new(
            Opts::new(
                "shutdown_timeouts_total",
                "Exporters abandoned at the shutdown deadline",
            )
            .namespace(NAMESPACE),
            &["exporter"],
        )?;

        registry.register(Box::new(exports.clone()))?;
        registry.register(Box::new(export_duration.clone()))?;
        registry.register(Box::new(callback_failures.clone()))?;
        registry.register(Box::new(shutdown_timeouts.clone()))?;

        Ok(Self {
            registry,
            exports,
            export_duration,
            callback_failures,
            shutdown_timeouts,
        })
    }

    /// Record one export attempt
    pub fn record_export(&self, exporter: &str, success: bool, duration: Duration) {
        let outcome = if success {
            OUTCOME_SUCCESS
        } else {
            OUTCOME_FAILURE
        };
        self.exports.with_label_values(&[exporter, outcome]).inc();
        self.export_duration
            .with_label_values(&[exporter])
            .observe(duration.as_secs_f64());
    }

    pub fn record_callback_failure(&self, instrument: &str, reason: &str) {
        self.callback_failures
            .with_label_values(&[instrument, reason])
            .inc();
    }

    pub fn record_shutdown_timeout(&self, exporter: &str) {
        self.shutdown_timeouts.with_label_values(&[exporter]).inc();
    }

    /// Export attempts with the given outcome
    pub fn export_count(&self, exporter: &str, outcome: &str) -> u64 {
        self.exports.with_label_values(&[exporter, outcome]).get()
    }

    pub fn callback_failure_count(&self, instrument: &str, reason: &str) -> u64 {
        self.callback_failures
            .with_label_values(&[instrument, reason])
            .get()
    }

    pub fn shutdown_timeout_count(&self, exporter: &str) -> u64 {
        self.shutdown_timeouts.with_label_values(&[exporter]).get()
    }

    /// Content type of `render()`
    pub fn format_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    /// Render all counters in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

impl std::fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineTelemetry").finish_non_exhaustive()
    }
}
