//! In-Memory Exporter
//!
//! Keeps exported snapshots for later inspection. Useful in tests and demos;
//! failures and latency can be injected to exercise the exporter loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::ports::MetricExporter;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// Collects snapshots in memory
#[derive(Debug)]
pub struct InMemoryExporter {
    name: String,
    snapshots: RwLock<Vec<Arc<Snapshot>>>,
    latency: Option<Duration>,
    fail_remaining: AtomicUsize,
    shut_down: AtomicBool,
}

impl InMemoryExporter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            snapshots: RwLock::new(Vec::new()),
            latency: None,
            fail_remaining: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Delay every export by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `n` exports
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// All successfully exported snapshots
    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.snapshots.read().clone()
    }

    /// Most recent successfully exported snapshot
    pub fn last(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    pub fn clear(&self) {
        self.snapshots.write().clear();
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricExporter for InMemoryExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::export(&self.name, "injected failure"));
        }

        self.snapshots.write().push(snapshot);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}
