//! Domain Ports (Port/Adapter Pattern)
//!
//! The pipeline depends only on these abstractions; destinations live in
//! `crate::adapters`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Pipeline Layer                           │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │                    MetricExporter                    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │   HttpExporter │ TextExporter │ InMemoryExporter     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::snapshot::Snapshot;

// =============================================================================
// Metric Exporter Port
// =============================================================================

/// Destination that receives one snapshot per collection cycle.
///
/// Implementations are called from a single exporter loop, never concurrently
/// with themselves, except through `MetricsPipeline::force_flush`.
#[async_trait]
pub trait MetricExporter: Send + Sync + std::fmt::Debug {
    /// Name used in logs and telemetry labels
    fn name(&self) -> &str;

    /// Deliver a snapshot. Failures are reported, never retried.
    async fn export(&self, snapshot: Arc<Snapshot>) -> Result<()>;

    /// Release resources after the final flush
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: MetricExporter + ?Sized> MetricExporter for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn export(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        (**self).export(snapshot).await
    }

    async fn shutdown(&self) -> Result<()> {
        (**self).shutdown().await
    }
}
