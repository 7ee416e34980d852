//! Periodic Exporter
//!
//! Drives one destination on its own timer:
//!
//! ```text
//! Idle → Waiting ─tick→ Collecting → Exporting → Waiting → …
//!          │                │            │
//!          └──── cancel ────┴────────────┴──→ FinalFlush → Stopped
//! ```
//!
//! Cancellation is only observed between phases, so an export that has
//! started always runs to completion. A failed export is logged and the loop
//! carries on with the next tick; nothing is retried or buffered.

mod temporality;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::ports::MetricExporter;
use crate::error::Result;
use crate::pipeline::Collector;
use crate::snapshot::{Snapshot, Temporality};
use crate::telemetry::PipelineTelemetry;

use temporality::TemporalityConverter;

/// Default export cadence
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one periodic exporter
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicExporterConfig {
    /// Time between collection cycles
    pub interval: Duration,

    /// Temporality of exported sums and histograms
    pub temporality: Temporality,
}

impl Default for PeriodicExporterConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_EXPORT_INTERVAL,
            temporality: Temporality::Cumulative,
        }
    }
}

impl PeriodicExporterConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }
}

// =============================================================================
// Exporter State
// =============================================================================

/// Phase of an exporter's loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterState {
    Idle,
    Waiting,
    Collecting,
    Exporting,
    FinalFlush,
    Stopped,
}

impl std::fmt::Display for ExporterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExporterState::Idle => write!(f, "Idle"),
            ExporterState::Waiting => write!(f, "Waiting"),
            ExporterState::Collecting => write!(f, "Collecting"),
            ExporterState::Exporting => write!(f, "Exporting"),
            ExporterState::FinalFlush => write!(f, "FinalFlush"),
            ExporterState::Stopped => write!(f, "Stopped"),
        }
    }
}

// =============================================================================
// Periodic Exporter
// =============================================================================

/// Schedules collection and export for a single destination
pub struct PeriodicExporter {
    config: PeriodicExporterConfig,
    exporter: Arc<dyn MetricExporter>,
    state: watch::Sender<ExporterState>,
    /// Serializes exports to the destination and guards the delta baseline
    converter: Mutex<TemporalityConverter>,
    telemetry: Arc<PipelineTelemetry>,
}

impl PeriodicExporter {
    pub fn new(
        exporter: Arc<dyn MetricExporter>,
        config: PeriodicExporterConfig,
        telemetry: Arc<PipelineTelemetry>,
    ) -> Self {
        let (state, _) = watch::channel(ExporterState::Idle);
        Self {
            converter: Mutex::new(TemporalityConverter::new(config.temporality)),
            config,
            exporter,
            state,
            telemetry,
        }
    }

    pub fn name(&self) -> &str {
        self.exporter.name()
    }

    pub fn config(&self) -> &PeriodicExporterConfig {
        &self.config
    }

    /// Current loop phase
    pub fn state(&self) -> ExporterState {
        *self.state.borrow()
    }

    /// Watch phase transitions
    pub fn subscribe(&self) -> watch::Receiver<ExporterState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ExporterState) {
        self.state.send_replace(state);
        debug!(exporter = %self.name(), %state, "exporter state");
    }

    /// Convert to the configured temporality and export once.
    ///
    /// The snapshot is dropped afterwards whatever the outcome.
    pub async fn export_snapshot(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        let mut converter = self.converter.lock().await;
        if converter.is_stale(&snapshot) {
            debug!(exporter = %self.name(), sequence = snapshot.sequence, "skipping snapshot older than the last export");
            return Ok(());
        }
        let (converted, pending) = converter.convert(snapshot);

        let started = Instant::now();
        let result = self.exporter.export(converted).await;
        let elapsed = started.elapsed();
        self.telemetry
            .record_export(self.name(), result.is_ok(), elapsed);

        if result.is_ok() {
            converter.commit(pending);
            debug!(exporter = %self.name(), elapsed_ms = elapsed.as_millis() as u64, "export succeeded");
        }
        result
    }

    /// Run the timer loop until cancelled, then flush once and stop
    #[instrument(skip_all, fields(exporter = %self.name()))]
    pub async fn run(self: Arc<Self>, collector: Arc<Collector>, cancel: CancellationToken) -> Result<()> {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            temporality = %self.config.temporality,
            "periodic exporter started"
        );

        let start = tokio::time::Instant::now() + self.config.interval;
        let mut tick = interval_at(start, self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.set_state(ExporterState::Waiting);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            self.set_state(ExporterState::Collecting);
            let snapshot = collector.collect().await;
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(ExporterState::Exporting);
            if let Err(e) = self.export_snapshot(snapshot).await {
                error!(error = %e, "export failed, continuing with next cycle");
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        self.final_flush(&collector).await
    }

    /// Collect and export one last time, then shut the destination down
    pub async fn final_flush(&self, collector: &Collector) -> Result<()> {
        self.set_state(ExporterState::FinalFlush);
        info!(exporter = %self.name(), "final flush");

        let snapshot = collector.collect().await;
        let result = self.export_snapshot(snapshot).await;
        if let Err(e) = &result {
            error!(exporter = %self.name(), error = %e, "final flush failed");
        }
        if let Err(e) = self.exporter.shutdown().await {
            warn!(exporter = %self.name(), error = %e, "exporter shutdown failed");
        }

        self.set_state(ExporterState::Stopped);
        info!(exporter = %self.name(), "periodic exporter stopped");
        result
    }
}

impl std::fmt::Debug for PeriodicExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicExporter")
            .field("exporter", &self.exporter)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
