//! Infrastructure Adapters
//!
//! Destinations implementing the `MetricExporter` port, following the
//! Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │                    MetricExporter                           │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │  HttpExporter (OTLP/JSON) │ TextExporter │ InMemoryExporter │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use meterflow::adapters::{HttpExporter, HttpExporterConfig, TextExporter};
//! use meterflow::{MetricsPipeline, PeriodicExporterConfig};
//!
//! let pipeline = MetricsPipeline::builder()
//!     .with_periodic_exporter(HttpExporter::new(HttpExporterConfig::default())?, PeriodicExporterConfig::default())
//!     .with_periodic_exporter(TextExporter::stdout(), PeriodicExporterConfig::default())
//!     .build()?;
//! ```

mod http;
mod in_memory;
pub mod otlp_json;
mod text;

pub use http::{HttpExporter, HttpExporterConfig, DEFAULT_OTLP_ENDPOINT};
pub use in_memory::InMemoryExporter;
pub use text::{render_text, TextExporter, TextFormat};
