//! Instruments
//!
//! Named, typed measurement streams and the registry that creates them.
//!
//! # Architecture
//!
//! ```text
//! MetricsPipeline::meter("scope")
//!   └── Meter
//!         ├── counter() / up_down_counter() / gauge() / histogram()
//!         │     └── InstrumentRegistry::register() → MeasurementStore::attach()
//!         └── observable_gauge().with_callback(..)
//!               └── InstrumentRegistry::register() → CallbackRunner::attach()
//! ```

mod handles;
mod registry;

pub use handles::{Counter, Gauge, Histogram, ObservableGauge, UpDownCounter};
pub use registry::{InstrumentBuilder, InstrumentHandle, InstrumentRegistry, Meter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum instrument name length
pub const MAX_NAME_LENGTH: usize = 255;

/// Boundaries used by histograms registered without explicit ones
pub const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

// =============================================================================
// Instrument Kind
// =============================================================================

/// Kind of measurement stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Counter,
    UpDownCounter,
    Gauge,
    Histogram,
    ObservableGauge,
}

impl InstrumentKind {
    /// Whether values are supplied by a callback at collection time
    pub fn is_observable(&self) -> bool {
        matches!(self, InstrumentKind::ObservableGauge)
    }
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentKind::Counter => write!(f, "Counter"),
            InstrumentKind::UpDownCounter => write!(f, "UpDownCounter"),
            InstrumentKind::Gauge => write!(f, "Gauge"),
            InstrumentKind::Histogram => write!(f, "Histogram"),
            InstrumentKind::ObservableGauge => write!(f, "ObservableGauge"),
        }
    }
}

// =============================================================================
// Instrument Descriptor
// =============================================================================

/// Identity of an instrument; immutable once registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDescriptor {
    pub name: String,
    pub kind: InstrumentKind,
    pub unit: String,
    pub description: String,
    /// Explicit bucket boundaries, histograms only
    pub boundaries: Option<Vec<f64>>,
}

impl InstrumentDescriptor {
    pub fn new(name: impl Into<String>, kind: InstrumentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unit: String::new(),
            description: String::new(),
            boundaries: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.boundaries = Some(boundaries);
        self
    }

    /// Boundaries the histogram aggregates against
    pub fn effective_boundaries(&self) -> Vec<f64> {
        self.boundaries
            .clone()
            .unwrap_or_else(|| DEFAULT_HISTOGRAM_BOUNDARIES.to_vec())
    }

    /// Same identity apart from the description
    pub fn is_compatible(&self, other: &InstrumentDescriptor) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.unit == other.unit
            && self.boundaries == other.boundaries
    }

    /// Short human-readable summary used in duplicate errors
    pub fn summary(&self) -> String {
        let mut out = format!("{}(unit=\"{}\"", self.kind, self.unit);
        if !self.description.is_empty() {
            out.push_str(&format!(", description=\"{}\"", self.description));
        }
        if let Some(b) = &self.boundaries {
            out.push_str(&format!(", boundaries={:?}", b));
        }
        out.push(')');
        out
    }

    /// Validate name and options
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        if let Some(boundaries) = &self.boundaries {
            if self.kind != InstrumentKind::Histogram {
                return Err(self.invalid("bucket boundaries are only valid for histograms"));
            }
            if boundaries.iter().any(|b| !b.is_finite()) {
                return Err(self.invalid("bucket boundaries must be finite"));
            }
            if boundaries.windows(2).any(|w| w[0] >= w[1]) {
                return Err(self.invalid("bucket boundaries must be strictly increasing"));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::InvalidInstrument {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Check an instrument name: a letter followed by letters, digits, `_`, `.`, `-` or `/`
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidInstrument {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name must not be empty")),
        Some(c) if !c.is_ascii_alphabetic() => {
            return Err(invalid("name must start with a letter"))
        }
        _ => {}
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid("name exceeds 255 characters"));
    }
    if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')))
    {
        return Err(invalid(&format!("name contains invalid character '{}'", c)));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
