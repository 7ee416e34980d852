//! Instrument handles
//!
//! Cheap, cloneable handles returned by the `Meter`. Recording never blocks on
//! export I/O and never panics: a rejected value is logged and returned as an
//! error the caller is free to ignore.

use std::sync::Arc;

use tracing::warn;

use crate::attributes::{AttributeSet, KeyValue};
use crate::error::Result;
use crate::instrument::InstrumentDescriptor;
use crate::observable::{ObservableCallback, ObservableInstrument};
use crate::store::InstrumentStorage;

fn record(storage: &InstrumentStorage, value: f64, attributes: &[KeyValue]) -> Result<()> {
    let result = storage.record(value, AttributeSet::from(attributes));
    if let Err(e) = &result {
        warn!(instrument = %storage.descriptor().name, error = %e, "measurement rejected");
    }
    result
}

/// Monotonic sum; negative deltas are rejected
#[derive(Debug, Clone)]
pub struct Counter {
    storage: Arc<InstrumentStorage>,
}

impl Counter {
    pub(crate) fn new(storage: Arc<InstrumentStorage>) -> Self {
        Self { storage }
    }

    pub fn add(&self, value: f64, attributes: &[KeyValue]) -> Result<()> {
        record(&self.storage, value, attributes)
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        self.storage.descriptor()
    }
}

/// Signed running sum
#[derive(Debug, Clone)]
pub struct UpDownCounter {
    storage: Arc<InstrumentStorage>,
}

impl UpDownCounter {
    pub(crate) fn new(storage: Arc<InstrumentStorage>) -> Self {
        Self { storage }
    }

    pub fn add(&self, value: f64, attributes: &[KeyValue]) -> Result<()> {
        record(&self.storage, value, attributes)
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        self.storage.descriptor()
    }
}

/// Last value wins
#[derive(Debug, Clone)]
pub struct Gauge {
    storage: Arc<InstrumentStorage>,
}

impl Gauge {
    pub(crate) fn new(storage: Arc<InstrumentStorage>) -> Self {
        Self { storage }
    }

    pub fn record(&self, value: f64, attributes: &[KeyValue]) -> Result<()> {
        record(&self.storage, value, attributes)
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        self.storage.descriptor()
    }
}

/// Distribution over fixed bucket boundaries
#[derive(Debug, Clone)]
pub struct Histogram {
    storage: Arc<InstrumentStorage>,
}

impl Histogram {
    pub(crate) fn new(storage: Arc<InstrumentStorage>) -> Self {
        Self { storage }
    }

    pub fn record(&self, value: f64, attributes: &[KeyValue]) -> Result<()> {
        record(&self.storage, value, attributes)
    }

    /// Record a duration in seconds
    pub fn record_duration(&self, duration: std::time::Duration, attributes: &[KeyValue]) -> Result<()> {
        self.record(duration.as_secs_f64(), attributes)
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        self.storage.descriptor()
    }
}

/// Gauge whose values are pulled from callbacks at collection time
#[derive(Debug, Clone)]
pub struct ObservableGauge {
    instrument: Arc<ObservableInstrument>,
}

impl ObservableGauge {
    pub(crate) fn new(instrument: Arc<ObservableInstrument>) -> Self {
        Self { instrument }
    }

    /// Register an additional callback
    pub fn add_callback(&self, callback: ObservableCallback) {
        self.instrument.add_callback(callback);
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        self.instrument.descriptor()
    }
}
