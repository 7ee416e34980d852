//! Domain Layer
//!
//! Port traits the pipeline is written against.
//!
//! # Usage
//!
//! ```ignore
//! use meterflow::domain::ports::MetricExporter;
//!
//! async fn push<E: MetricExporter>(exporter: &E, snapshot: Arc<Snapshot>) -> Result<()> {
//!     exporter.export(snapshot).await
//! }
//! ```

pub mod ports;

pub use ports::MetricExporter;
