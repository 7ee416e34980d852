//! meterflow - periodic multi-destination metrics pipeline
//!
//! Applications record measurements through typed instruments; independent
//! periodic exporters collect cumulative snapshots and push them to their
//! destinations (OTLP/JSON over HTTP, a text sink, memory).
//!
//! # Architecture
//!
//! ```text
//! Meter → Instrument Registry → Measurement Store ─┐
//!                             → Callback Runner ───┴→ Collector → Periodic Exporters → Destinations
//! ```
//!
//! There is no global provider: a [`MetricsPipeline`] is built once and its
//! [`Meter`]s are handed to the code that records.
//!
//! # Modules
//!
//! - [`adapters`] - Exporter destinations implementing the domain port
//! - [`attributes`] - Canonical attribute sets used as aggregation keys
//! - [`demo`] - Sample instrumentation recorded by the binary
//! - [`domain`] - Port traits
//! - [`error`] - Error types
//! - [`exporter`] - Periodic exporter loop and temporality conversion
//! - [`instrument`] - Instrument descriptors, registry, meters and handles
//! - [`observable`] - Observable gauge callbacks
//! - [`pipeline`] - Lifecycle coordinator
//! - [`snapshot`] - Immutable collected data
//! - [`store`] - Per-instrument aggregation
//! - [`telemetry`] - The pipeline's own Prometheus counters

pub mod adapters;
pub mod attributes;
pub mod demo;
pub mod domain;
pub mod error;
pub mod exporter;
pub mod instrument;
pub mod observable;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod telemetry;

// Re-export commonly used types
pub use attributes::{AttributeSet, AttributeValue, KeyValue};
pub use domain::MetricExporter;
pub use error::{Error, Result};
pub use exporter::{ExporterState, PeriodicExporterConfig};
pub use instrument::{
    Counter, Gauge, Histogram, InstrumentDescriptor, InstrumentKind, Meter, ObservableGauge,
    UpDownCounter,
};
pub use observable::Observation;
pub use pipeline::{MetricsPipeline, PipelineConfig, ShutdownReport};
pub use snapshot::{Metric, MetricData, Resource, Snapshot, Temporality};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
