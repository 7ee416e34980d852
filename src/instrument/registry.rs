//! Instrument Registry
//!
//! Creates and deduplicates instruments. Registration is atomic per name:
//! an identical re-registration returns the existing instrument, one that
//! differs only in description logs a warning and returns it too, any other
//! difference fails with `DuplicateInstrument`.

use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::instrument::handles::{Counter, Gauge, Histogram, ObservableGauge, UpDownCounter};
use crate::instrument::{InstrumentDescriptor, InstrumentKind};
use crate::observable::{callback, CallbackRunner, ObservableCallback, ObservableInstrument, Observation};
use crate::store::{InstrumentStorage, MeasurementStore};

// =============================================================================
// Instrument Handle
// =============================================================================

/// Untyped handle to a registered instrument
#[derive(Debug, Clone)]
pub enum InstrumentHandle {
    Synchronous(Arc<InstrumentStorage>),
    Observable(Arc<ObservableInstrument>),
}

impl InstrumentHandle {
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        match self {
            InstrumentHandle::Synchronous(s) => s.descriptor(),
            InstrumentHandle::Observable(o) => o.descriptor(),
        }
    }

    fn into_storage(self) -> Result<Arc<InstrumentStorage>> {
        match self {
            InstrumentHandle::Synchronous(s) => Ok(s),
            InstrumentHandle::Observable(o) => Err(Error::Internal(format!(
                "instrument '{}' is observable",
                o.descriptor().name
            ))),
        }
    }

    fn into_observable(self) -> Result<Arc<ObservableInstrument>> {
        match self {
            InstrumentHandle::Observable(o) => Ok(o),
            InstrumentHandle::Synchronous(s) => Err(Error::Internal(format!(
                "instrument '{}' is synchronous",
                s.descriptor().name
            ))),
        }
    }
}

// =============================================================================
// Instrument Registry
// =============================================================================

/// One instrument per name across the pipeline
pub struct InstrumentRegistry {
    instruments: DashMap<String, InstrumentHandle>,
    store: Arc<MeasurementStore>,
    callbacks: Arc<CallbackRunner>,
}

impl InstrumentRegistry {
    pub fn new(store: Arc<MeasurementStore>, callbacks: Arc<CallbackRunner>) -> Self {
        Self {
            instruments: DashMap::new(),
            store,
            callbacks,
        }
    }

    /// Register an instrument, or return the existing one if registered identically
    pub fn register(
        &self,
        scope: &str,
        descriptor: InstrumentDescriptor,
        callbacks: Vec<ObservableCallback>,
    ) -> Result<InstrumentHandle> {
        descriptor.validate()?;
        if !callbacks.is_empty() && !descriptor.kind.is_observable() {
            return Err(Error::InvalidInstrument {
                name: descriptor.name.clone(),
                reason: "callbacks are only valid for observable instruments".to_string(),
            });
        }

        match self.instruments.entry(descriptor.name.clone()) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if !existing.descriptor().is_compatible(&descriptor) {
                    return Err(Error::DuplicateInstrument {
                        name: descriptor.name.clone(),
                        existing: existing.descriptor().summary(),
                        requested: descriptor.summary(),
                    });
                }
                if existing.descriptor().description != descriptor.description {
                    warn!(
                        instrument = %descriptor.name,
                        existing = %existing.descriptor().description,
                        requested = %descriptor.description,
                        "instrument re-registered with a different description, keeping the first"
                    );
                }
                if let InstrumentHandle::Observable(observable) = existing {
                    for cb in callbacks {
                        observable.add_callback(cb);
                    }
                }
                debug!(instrument = %descriptor.name, "returning existing instrument");
                Ok(existing.clone())
            }
            Entry::Vacant(entry) => {
                let handle = if descriptor.kind.is_observable() {
                    InstrumentHandle::Observable(self.callbacks.attach(
                        scope,
                        descriptor.clone(),
                        callbacks,
                    ))
                } else {
                    InstrumentHandle::Synchronous(self.store.attach(scope, descriptor.clone()))
                };
                info!(instrument = %descriptor.name, kind = %descriptor.kind, scope, "registered instrument");
                Ok(entry.insert(handle).clone())
            }
        }
    }

    /// Descriptor of a registered instrument
    pub fn descriptor(&self, name: &str) -> Option<InstrumentDescriptor> {
        self.instruments.get(name).map(|h| h.descriptor().clone())
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl std::fmt::Debug for InstrumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentRegistry")
            .field("instruments", &self.instruments.len())
            .finish()
    }
}

// =============================================================================
// Meter
// =============================================================================

/// Entry point for creating instruments under a named scope
#[derive(Debug, Clone)]
pub struct Meter {
    scope: String,
    registry: Arc<InstrumentRegistry>,
}

impl Meter {
    pub fn new(scope: impl Into<String>, registry: Arc<InstrumentRegistry>) -> Self {
        Self {
            scope: scope.into(),
            registry,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn counter(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Counter> {
        InstrumentBuilder::new(self, name, InstrumentKind::Counter)
    }

    pub fn up_down_counter(&self, name: impl Into<String>) -> InstrumentBuilder<'_, UpDownCounter> {
        InstrumentBuilder::new(self, name, InstrumentKind::UpDownCounter)
    }

    pub fn gauge(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Gauge> {
        InstrumentBuilder::new(self, name, InstrumentKind::Gauge)
    }

    pub fn histogram(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Histogram> {
        InstrumentBuilder::new(self, name, InstrumentKind::Histogram)
    }

    pub fn observable_gauge(
        &self,
        name: impl Into<String>,
    ) -> InstrumentBuilder<'_, ObservableGauge> {
        InstrumentBuilder::new(self, name, InstrumentKind::ObservableGauge)
    }
}

// =============================================================================
// Instrument Builder
// =============================================================================

/// Collects instrument options before registration
pub struct InstrumentBuilder<'a, T> {
    meter: &'a Meter,
    descriptor: InstrumentDescriptor,
    callbacks: Vec<ObservableCallback>,
    _marker: PhantomData<T>,
}

impl<'a, T> InstrumentBuilder<'a, T> {
    fn new(meter: &'a Meter, name: impl Into<String>, kind: InstrumentKind) -> Self {
        Self {
            meter,
            descriptor: InstrumentDescriptor::new(name, kind),
            callbacks: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_unit(unit);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_description(description);
        self
    }

    fn register(self) -> Result<InstrumentHandle> {
        self.meter
            .registry
            .register(&self.meter.scope, self.descriptor, self.callbacks)
    }
}

impl InstrumentBuilder<'_, Counter> {
    pub fn build(self) -> Result<Counter> {
        Ok(Counter::new(self.register()?.into_storage()?))
    }
}

impl InstrumentBuilder<'_, UpDownCounter> {
    pub fn build(self) -> Result<UpDownCounter> {
        Ok(UpDownCounter::new(self.register()?.into_storage()?))
    }
}

impl InstrumentBuilder<'_, Gauge> {
    pub fn build(self) -> Result<Gauge> {
        Ok(Gauge::new(self.register()?.into_storage()?))
    }
}

impl InstrumentBuilder<'_, Histogram> {
    /// Explicit bucket boundaries; must be finite and strictly increasing
    pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.descriptor = self.descriptor.with_boundaries(boundaries);
        self
    }

    pub fn build(self) -> Result<Histogram> {
        Ok(Histogram::new(self.register()?.into_storage()?))
    }
}

impl InstrumentBuilder<'_, ObservableGauge> {
    pub fn with_callback<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Vec<Observation>> + Send + Sync + 'static,
    {
        self.callbacks.push(callback(f));
        self
    }

    pub fn build(self) -> Result<ObservableGauge> {
        Ok(ObservableGauge::new(self.register()?.into_observable()?))
    }
}

// =============================================================================
// Tests
// =============================================================================
