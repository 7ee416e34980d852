//! Measurement Store
//!
//! Thread-safe aggregation state for every synchronous instrument.
//!
//! Each instrument owns a short-lived lock over its attribute-set map.
//! Recording holds it for a single map update; snapshotting holds it only
//! long enough to copy the map, so the contention window is bounded by the
//! number of attribute sets and never by export latency.

mod aggregation;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::attributes::AttributeSet;
use crate::error::{Error, Result};
use crate::instrument::{InstrumentDescriptor, InstrumentKind};
use crate::snapshot::{Metric, MetricData, Temporality};

use aggregation::{
    Aggregation, HistogramAggregation, LastValueAggregation, SumAggregation,
};

// =============================================================================
// Instrument Storage
// =============================================================================

/// Aggregation state of one synchronous instrument
#[derive(Debug)]
pub struct InstrumentStorage {
    scope: String,
    descriptor: InstrumentDescriptor,
    /// Histogram boundaries fixed at creation (empty for other kinds)
    boundaries: Vec<f64>,
    start_time: DateTime<Utc>,
    points: Mutex<HashMap<AttributeSet, Aggregation>>,
}

impl InstrumentStorage {
    fn new(scope: &str, descriptor: InstrumentDescriptor, start_time: DateTime<Utc>) -> Self {
        let boundaries = match descriptor.kind {
            InstrumentKind::Histogram => descriptor.effective_boundaries(),
            _ => Vec::new(),
        };
        Self {
            scope: scope.to_string(),
            descriptor,
            boundaries,
            start_time,
            points: Mutex::new(HashMap::new()),
        }
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Aggregate one measurement according to the instrument kind
    pub fn record(&self, value: f64, attributes: AttributeSet) -> Result<()> {
        self.check_value(value)?;

        let mut points = self.points.lock();
        match self.descriptor.kind {
            InstrumentKind::Counter | InstrumentKind::UpDownCounter => {
                if let Aggregation::Sum(sum) = points
                    .entry(attributes)
                    .or_insert_with(|| Aggregation::Sum(SumAggregation::default()))
                {
                    sum.add(value);
                }
            }
            InstrumentKind::Gauge => {
                // Last write under the lock wins; the timestamp is only reported.
                let now = Utc::now();
                points
                    .entry(attributes)
                    .and_modify(|agg| {
                        if let Aggregation::LastValue(last) = agg {
                            last.set(value, now);
                        }
                    })
                    .or_insert_with(|| Aggregation::LastValue(LastValueAggregation::new(value, now)));
            }
            InstrumentKind::Histogram => {
                let bucket_count = self.boundaries.len() + 1;
                if let Aggregation::Histogram(hist) = points.entry(attributes).or_insert_with(|| {
                    Aggregation::Histogram(HistogramAggregation::new(bucket_count))
                }) {
                    hist.observe(&self.boundaries, value);
                }
            }
            InstrumentKind::ObservableGauge => {
                return Err(Error::Internal(format!(
                    "observable instrument '{}' cannot be recorded synchronously",
                    self.descriptor.name
                )));
            }
        }
        Ok(())
    }

    fn check_value(&self, value: f64) -> Result<()> {
        let reject = |reason: &str| Error::InvalidValue {
            instrument: self.descriptor.name.clone(),
            value,
            reason: reason.to_string(),
        };

        if !value.is_finite() {
            return Err(reject("value must be finite"));
        }
        if self.descriptor.kind == InstrumentKind::Counter && value < 0.0 {
            return Err(reject("counter delta must not be negative"));
        }
        Ok(())
    }

    /// Cumulative view of this instrument; `None` when nothing was recorded yet
    pub fn collect(&self, now: DateTime<Utc>) -> Option<Metric> {
        // Copy under the lock, build points outside it.
        let entries: Vec<(AttributeSet, Aggregation)> = {
            let points = self.points.lock();
            if points.is_empty() {
                return None;
            }
            points
                .iter()
                .map(|(attrs, agg)| (attrs.clone(), agg.clone()))
                .collect()
        };

        let mut entries = entries;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let data = match self.descriptor.kind {
            InstrumentKind::Counter | InstrumentKind::UpDownCounter => MetricData::Sum {
                monotonic: self.descriptor.kind == InstrumentKind::Counter,
                temporality: Temporality::Cumulative,
                points: entries
                    .iter()
                    .filter_map(|(attrs, agg)| match agg {
                        Aggregation::Sum(sum) => Some(sum.to_point(attrs, self.start_time, now)),
                        _ => None,
                    })
                    .collect(),
            },
            InstrumentKind::Gauge => MetricData::Gauge {
                points: entries
                    .iter()
                    .filter_map(|(attrs, agg)| match agg {
                        Aggregation::LastValue(last) => Some(last.to_point(attrs)),
                        _ => None,
                    })
                    .collect(),
            },
            InstrumentKind::Histogram => MetricData::Histogram {
                temporality: Temporality::Cumulative,
                points: entries
                    .iter()
                    .filter_map(|(attrs, agg)| match agg {
                        Aggregation::Histogram(hist) => {
                            Some(hist.to_point(attrs, &self.boundaries, self.start_time, now))
                        }
                        _ => None,
                    })
                    .collect(),
            },
            InstrumentKind::ObservableGauge => return None,
        };

        Some(Metric {
            scope: self.scope.clone(),
            descriptor: self.descriptor.clone(),
            data,
        })
    }

    /// Number of distinct attribute sets recorded so far
    pub fn cardinality(&self) -> usize {
        self.points.lock().len()
    }
}

// =============================================================================
// Measurement Store
// =============================================================================

/// All synchronous instruments of a pipeline, in registration order
#[derive(Debug)]
pub struct MeasurementStore {
    streams: RwLock<Vec<Arc<InstrumentStorage>>>,
    start_time: DateTime<Utc>,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(Vec::new()),
            start_time: Utc::now(),
        }
    }

    /// When aggregation started; start time of every cumulative point
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Create storage for a newly registered instrument
    pub fn attach(&self, scope: &str, descriptor: InstrumentDescriptor) -> Arc<InstrumentStorage> {
        let storage = Arc::new(InstrumentStorage::new(scope, descriptor, self.start_time));
        self.streams.write().push(Arc::clone(&storage));
        debug!(instrument = %storage.descriptor.name, kind = %storage.descriptor.kind, "attached instrument storage");
        storage
    }

    /// Record a measurement against an instrument's storage
    pub fn record(
        &self,
        storage: &InstrumentStorage,
        value: f64,
        attributes: AttributeSet,
    ) -> Result<()> {
        storage.record(value, attributes)
    }

    /// Cumulative copy of every instrument that has data.
    ///
    /// Each instrument is copied atomically; instruments are visited one after another.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<Metric> {
        let streams: Vec<Arc<InstrumentStorage>> = self.streams.read().clone();
        streams.iter().filter_map(|s| s.collect(now)).collect()
    }

    /// Number of registered synchronous instruments
    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MeasurementStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
