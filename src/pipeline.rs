//! Pipeline Coordinator
//!
//! Owns the shared registry, the collector and one periodic exporter per
//! destination.
//!
//! # Architecture
//!
//! ```text
//!   Meter ──register──► InstrumentRegistry ──► MeasurementStore
//!                                         └──► CallbackRunner
//!                                                   │
//!                      ┌──────── Collector ◄────────┘
//!                      │   (callbacks, then store snapshot)
//!         ┌────────────┼─────────────┐
//!         ▼            ▼             ▼
//!   PeriodicExporter  PeriodicExporter  …   (one tokio task each)
//!         │            │
//!         ▼            ▼
//!     HttpExporter  TextExporter
//! ```
//!
//! Every exporter collects on its own schedule. Shutdown cancels all loops and
//! waits for their final flushes against one shared deadline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::ports::MetricExporter;
use crate::error::{Error, Result};
use crate::exporter::{ExporterState, PeriodicExporter, PeriodicExporterConfig};
use crate::instrument::{InstrumentRegistry, Meter};
use crate::observable::{CallbackRunner, DEFAULT_CALLBACK_TIMEOUT};
use crate::snapshot::{Resource, Snapshot};
use crate::store::MeasurementStore;
use crate::telemetry::PipelineTelemetry;

// =============================================================================
// Collector
// =============================================================================

/// Produces one merged snapshot per collection cycle
#[derive(Debug)]
pub struct Collector {
    store: Arc<MeasurementStore>,
    callbacks: Arc<CallbackRunner>,
    resource: Resource,
    // Store reads are serialized so sequence order is also value order
    sequence: Mutex<u64>,
}

impl Collector {
    pub fn new(store: Arc<MeasurementStore>, callbacks: Arc<CallbackRunner>, resource: Resource) -> Self {
        Self {
            store,
            callbacks,
            resource,
            sequence: Mutex::new(0),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Run observable callbacks, then snapshot the store
    pub async fn collect(&self) -> Arc<Snapshot> {
        let now = Utc::now();
        let observed = self.callbacks.run(now).await;
        let (sequence, mut metrics) = {
            let mut sequence = self.sequence.lock();
            *sequence += 1;
            (*sequence, self.store.snapshot(now))
        };
        metrics.extend(observed);

        debug!(sequence, metrics = metrics.len(), "collected snapshot");
        Arc::new(Snapshot {
            resource: self.resource.clone(),
            start_time: self.store.start_time(),
            collected_at: now,
            sequence,
            metrics,
        })
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Pipeline-wide settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attributes describing the emitting service
    pub resource: Resource,

    /// Upper bound for each observable callback
    pub callback_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resource: Resource::default(),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

/// Outcome of [`MetricsPipeline::shutdown`], by exporter name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Final flush delivered
    pub flushed: Vec<String>,
    /// Final flush finished with an error
    pub failed: Vec<String>,
    /// Abandoned at the deadline
    pub timed_out: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MetricsPipeline`]
#[derive(Debug, Default)]
pub struct MetricsPipelineBuilder {
    config: PipelineConfig,
    exporters: Vec<(Arc<dyn MetricExporter>, PeriodicExporterConfig)>,
}

impl MetricsPipelineBuilder {
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.config.resource = resource;
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.config.callback_timeout = timeout;
        self
    }

    /// Add a destination driven by its own periodic loop
    pub fn with_periodic_exporter<E>(mut self, exporter: E, config: PeriodicExporterConfig) -> Self
    where
        E: MetricExporter + 'static,
    {
        self.exporters.push((Arc::new(exporter), config));
        self
    }

    pub fn build(self) -> Result<MetricsPipeline> {
        if self.config.callback_timeout.is_zero() {
            return Err(Error::Config("callback timeout must be greater than zero".into()));
        }

        let mut names = HashSet::new();
        for (exporter, config) in &self.exporters {
            if !names.insert(exporter.name().to_string()) {
                return Err(Error::Config(format!(
                    "duplicate exporter name '{}'",
                    exporter.name()
                )));
            }
            if config.interval.is_zero() {
                return Err(Error::Config(format!(
                    "export interval for '{}' must be greater than zero",
                    exporter.name()
                )));
            }
        }

        let telemetry = Arc::new(PipelineTelemetry::new()?);
        let store = Arc::new(MeasurementStore::new());
        let callbacks = Arc::new(CallbackRunner::new(
            self.config.callback_timeout,
            Arc::clone(&telemetry),
        ));
        let registry = Arc::new(InstrumentRegistry::new(
            Arc::clone(&store),
            Arc::clone(&callbacks),
        ));
        let collector = Arc::new(Collector::new(store, callbacks, self.config.resource));

        let exporters = self
            .exporters
            .into_iter()
            .map(|(exporter, config)| {
                Arc::new(PeriodicExporter::new(exporter, config, Arc::clone(&telemetry)))
            })
            .collect();

        Ok(MetricsPipeline {
            registry,
            collector,
            exporters,
            telemetry,
            cancel: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }
}

// =============================================================================
// Metrics Pipeline
// =============================================================================

enum Lifecycle {
    Created,
    Running(Vec<(String, JoinHandle<Result<()>>)>),
    ShutDown,
}

/// Coordinates instruments, collection and all exporters.
///
/// Passed explicitly to the code that records; there is no global instance.
pub struct MetricsPipeline {
    registry: Arc<InstrumentRegistry>,
    collector: Arc<Collector>,
    exporters: Vec<Arc<PeriodicExporter>>,
    telemetry: Arc<PipelineTelemetry>,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl MetricsPipeline {
    pub fn builder() -> MetricsPipelineBuilder {
        MetricsPipelineBuilder::default()
    }

    /// Meter for the given instrumentation scope, bound to the shared registry
    pub fn meter(&self, scope: impl Into<String>) -> Meter {
        Meter::new(scope, Arc::clone(&self.registry))
    }

    pub fn resource(&self) -> &Resource {
        self.collector.resource()
    }

    pub fn telemetry(&self) -> &Arc<PipelineTelemetry> {
        &self.telemetry
    }

    /// Collect one snapshot without exporting it
    pub async fn collect(&self) -> Arc<Snapshot> {
        self.collector.collect().await
    }

    /// Names of the configured exporters, in registration order
    pub fn exporter_names(&self) -> Vec<String> {
        self.exporters.iter().map(|e| e.name().to_string()).collect()
    }

    /// Current loop phase of an exporter
    pub fn exporter_state(&self, name: &str) -> Option<ExporterState> {
        self.find(name).map(|e| e.state())
    }

    /// Watch an exporter's phase transitions
    pub fn subscribe(&self, name: &str) -> Option<tokio::sync::watch::Receiver<ExporterState>> {
        self.find(name).map(|e| e.subscribe())
    }

    fn find(&self, name: &str) -> Option<&Arc<PeriodicExporter>> {
        self.exporters.iter().find(|e| e.name() == name)
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    pub fn is_shut_down(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::ShutDown)
    }

    /// Spawn every exporter's loop. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running(_) => {
                debug!("pipeline already running");
                Ok(())
            }
            Lifecycle::ShutDown => Err(Error::AlreadyShutdown),
            Lifecycle::Created => {
                let handles = self
                    .exporters
                    .iter()
                    .map(|exporter| {
                        let task = Arc::clone(exporter)
                            .run(Arc::clone(&self.collector), self.cancel.child_token());
                        (exporter.name().to_string(), tokio::spawn(task))
                    })
                    .collect();
                *lifecycle = Lifecycle::Running(handles);
                info!(exporters = self.exporters.len(), "metrics pipeline started");
                Ok(())
            }
        }
    }

    /// Collect once and push the same snapshot to every exporter concurrently
    #[instrument(skip(self))]
    pub async fn force_flush(&self) -> Result<Vec<(String, Result<()>)>> {
        if self.is_shut_down() {
            return Err(Error::AlreadyShutdown);
        }

        let snapshot = self.collector.collect().await;
        let outcomes = join_all(
            self.exporters
                .iter()
                .map(|e| e.export_snapshot(Arc::clone(&snapshot))),
        )
        .await;

        Ok(self
            .exporters
            .iter()
            .zip(outcomes)
            .map(|(exporter, outcome)| {
                if let Err(e) = &outcome {
                    warn!(exporter = %exporter.name(), error = %e, "forced flush failed");
                }
                (exporter.name().to_string(), outcome)
            })
            .collect())
    }

    /// Stop every exporter and wait for their final flushes until `deadline`.
    ///
    /// Exporters still flushing at the deadline are abandoned. Never blocks
    /// past the deadline. A second call returns an empty report.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::ShutDown);
        let handles = match previous {
            Lifecycle::ShutDown => {
                debug!("pipeline already shut down");
                return ShutdownReport::default();
            }
            Lifecycle::Running(handles) => handles,
            // Never started: flush once per exporter anyway
            Lifecycle::Created => self
                .exporters
                .iter()
                .map(|exporter| {
                    let exporter = Arc::clone(exporter);
                    let collector = Arc::clone(&self.collector);
                    let name = exporter.name().to_string();
                    (name, tokio::spawn(async move { exporter.final_flush(&collector).await }))
                })
                .collect(),
        };

        info!(deadline_ms = deadline.as_millis() as u64, "shutting down metrics pipeline");
        self.cancel.cancel();

        let until = tokio::time::Instant::now() + deadline;
        let waits = handles.into_iter().map(|(name, handle)| async move {
            let outcome = tokio::time::timeout_at(until, handle).await;
            (name, outcome)
        });

        let mut report = ShutdownReport::default();
        for (name, outcome) in join_all(waits).await {
            match outcome {
                Ok(Ok(Ok(()))) => report.flushed.push(name),
                Ok(Ok(Err(e))) => {
                    warn!(exporter = %name, error = %e, "final flush failed");
                    report.failed.push(name);
                }
                Ok(Err(e)) => {
                    error!(exporter = %name, error = %e, "exporter task aborted");
                    report.failed.push(name);
                }
                Err(_) => {
                    let e = Error::ShutdownTimeout {
                        exporter: name.clone(),
                        deadline,
                    };
                    error!(exporter = %name, error = %e, "abandoning exporter");
                    self.telemetry.record_shutdown_timeout(&name);
                    report.timed_out.push(name);
                }
            }
        }

        info!(
            flushed = report.flushed.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "metrics pipeline shut down"
        );
        report
    }
}

impl Drop for MetricsPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for MetricsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsPipeline")
            .field("resource", self.collector.resource())
            .field("instruments", &self.registry.len())
            .field("exporters", &self.exporter_names())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryExporter;
    use crate::attributes::{AttributeSet, KeyValue};
    use crate::observable::Observation;
    use assert_matches::assert_matches;

    fn pipeline_with(sinks: &[Arc<InMemoryExporter>]) -> MetricsPipeline {
        let mut builder = MetricsPipeline::builder()
            .with_resource(Resource::for_service("test", Some("a".into()), "0.0.1"));
        for sink in sinks {
            builder = builder.with_periodic_exporter(Arc::clone(sink), PeriodicExporterConfig::default());
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_builder_rejects_duplicate_exporter_names() {
        let result = MetricsPipeline::builder()
            .with_periodic_exporter(InMemoryExporter::new("same"), PeriodicExporterConfig::default())
            .with_periodic_exporter(InMemoryExporter::new("same"), PeriodicExporterConfig::default())
            .build();
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = MetricsPipeline::builder()
            .with_periodic_exporter(
                InMemoryExporter::new("memory"),
                PeriodicExporterConfig::default().with_interval(Duration::ZERO),
            )
            .build();
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_collect_merges_store_and_callbacks() {
        let pipeline = pipeline_with(&[]);
        let meter = pipeline.meter("test");

        let counter = meter.counter("items").build().unwrap();
        counter.add(3.0, &[]).unwrap();
        meter
            .observable_gauge("observed")
            .with_callback(|| Ok(vec![Observation::value(23.0)]))
            .build()
            .unwrap();

        let snapshot = pipeline.collect().await;
        assert_eq!(snapshot.sum_value("items", &AttributeSet::empty()), Some(3.0));
        assert_eq!(snapshot.gauge_value("observed", &AttributeSet::empty()), Some(23.0));
        assert_eq!(
            snapshot.resource.attributes.get(Resource::SERVICE_NAME),
            Some(&crate::attributes::AttributeValue::from("test"))
        );
    }

    #[tokio::test]
    async fn test_force_flush_shares_snapshot() {
        let a = Arc::new(InMemoryExporter::new("a"));
        let b = Arc::new(InMemoryExporter::new("b"));
        let pipeline = pipeline_with(&[Arc::clone(&a), Arc::clone(&b)]);

        let counter = pipeline.meter("test").counter("items").build().unwrap();
        counter.add(1.0, &[KeyValue::new("k", "v")]).unwrap();

        let outcomes = pipeline.force_flush().await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));

        let first = a.last().unwrap();
        let second = b.last().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_force_flush_reports_each_exporter() {
        let ok = Arc::new(InMemoryExporter::new("ok"));
        let broken = Arc::new(InMemoryExporter::new("broken"));
        broken.fail_next(1);
        let pipeline = pipeline_with(&[Arc::clone(&ok), Arc::clone(&broken)]);

        let outcomes = pipeline.force_flush().await.unwrap();
        assert!(outcomes[0].1.is_ok());
        assert_matches!(outcomes[1].1, Err(Error::Export { .. }));
        assert_eq!(ok.len(), 1);
        assert_eq!(broken.len(), 0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_rejected_after_shutdown() {
        let sink = Arc::new(InMemoryExporter::new("memory"));
        let pipeline = pipeline_with(&[Arc::clone(&sink)]);

        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.is_running());

        let report = pipeline.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.flushed, vec!["memory".to_string()]);
        assert!(report.is_clean());
        assert_eq!(pipeline.exporter_state("memory"), Some(ExporterState::Stopped));

        assert_matches!(pipeline.start(), Err(Error::AlreadyShutdown));
        assert_matches!(pipeline.force_flush().await, Err(Error::AlreadyShutdown));
    }

    #[tokio::test]
    async fn test_shutdown_without_start_flushes_once() {
        let sink = Arc::new(InMemoryExporter::new("memory"));
        let pipeline = pipeline_with(&[Arc::clone(&sink)]);
        pipeline
            .meter("test")
            .counter("items")
            .build()
            .unwrap()
            .add(24.0, &[])
            .unwrap();

        let report = pipeline.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.flushed.len(), 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(
            sink.last().unwrap().sum_value("items", &AttributeSet::empty()),
            Some(24.0)
        );
        assert!(sink.is_shut_down());

        // Second call is a no-op
        let again = pipeline.shutdown(Duration::from_secs(1)).await;
        assert_eq!(again, ShutdownReport::default());
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_failed_final_flush() {
        let sink = Arc::new(InMemoryExporter::new("memory"));
        sink.fail_next(1);
        let pipeline = pipeline_with(&[Arc::clone(&sink)]);

        let report = pipeline.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.failed, vec!["memory".to_string()]);
        assert_eq!(pipeline.telemetry().export_count("memory", "failure"), 1);
    }
}
