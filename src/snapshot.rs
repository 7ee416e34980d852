//! Snapshot Data Model
//!
//! Immutable, point-in-time copies of every instrument's aggregated data.
//! One `Snapshot` is produced per collection cycle and shared read-only
//! (as `Arc<Snapshot>`) with every exporter of that cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeSet, KeyValue};
use crate::instrument::InstrumentDescriptor;

// =============================================================================
// Temporality
// =============================================================================

/// Window an exported aggregation was calculated over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temporality {
    /// Accumulated since the pipeline started
    #[default]
    Cumulative,
    /// Accumulated since the previous successful export
    Delta,
}

impl std::fmt::Display for Temporality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Temporality::Cumulative => write!(f, "cumulative"),
            Temporality::Delta => write!(f, "delta"),
        }
    }
}

impl std::str::FromStr for Temporality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cumulative" => Ok(Temporality::Cumulative),
            "delta" => Ok(Temporality::Delta),
            other => Err(format!("unknown temporality '{}'", other)),
        }
    }
}

// =============================================================================
// Resource
// =============================================================================

/// Attributes describing the entity producing the metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub attributes: AttributeSet,
}

impl Resource {
    pub const SERVICE_NAME: &'static str = "service.name";
    pub const SERVICE_INSTANCE_ID: &'static str = "service.instance.id";
    pub const SERVICE_VERSION: &'static str = "service.version";

    pub fn new(attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        Self {
            attributes: AttributeSet::new(attributes),
        }
    }

    /// Resource for a service; a random instance id is generated when none is given
    pub fn for_service(
        name: impl Into<String>,
        instance_id: Option<String>,
        version: impl Into<String>,
    ) -> Self {
        let instance_id = instance_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self::new([
            KeyValue::string(Self::SERVICE_NAME, name),
            KeyValue::string(Self::SERVICE_INSTANCE_ID, instance_id),
            KeyValue::string(Self::SERVICE_VERSION, version),
        ])
    }
}

// =============================================================================
// Data Points
// =============================================================================

/// Point of a Counter or UpDownCounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumPoint {
    pub attributes: AttributeSet,
    pub value: f64,
    pub start_time: DateTime<Utc>,
    pub time: DateTime<Utc>,
}

/// Point of a Gauge or ObservableGauge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugePoint {
    pub attributes: AttributeSet,
    pub value: f64,
    pub time: DateTime<Utc>,
}

/// Point of a Histogram.
///
/// `bucket_counts[i]` counts values in `[boundaries[i-1], boundaries[i])`;
/// the last entry is the overflow bucket for values `>= boundaries.last()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramPoint {
    pub attributes: AttributeSet,
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub boundaries: Vec<f64>,
    pub bucket_counts: Vec<u64>,
    pub start_time: DateTime<Utc>,
    pub time: DateTime<Utc>,
}

// =============================================================================
// Metric
// =============================================================================

/// Aggregated data of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricData {
    Sum {
        monotonic: bool,
        temporality: Temporality,
        points: Vec<SumPoint>,
    },
    Gauge {
        points: Vec<GaugePoint>,
    },
    Histogram {
        temporality: Temporality,
        points: Vec<HistogramPoint>,
    },
}

impl MetricData {
    /// Number of data points
    pub fn len(&self) -> usize {
        match self {
            MetricData::Sum { points, .. } => points.len(),
            MetricData::Gauge { points } => points.len(),
            MetricData::Histogram { points, .. } => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One instrument's data inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Name of the meter the instrument was first registered through
    pub scope: String,
    pub descriptor: InstrumentDescriptor,
    pub data: MetricData,
}

impl Metric {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable copy of all data points at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub resource: Resource,
    pub start_time: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    /// Position in the pipeline's collection order
    #[serde(default)]
    pub sequence: u64,
    pub metrics: Vec<Metric>,
}

impl Snapshot {
    /// Find a metric by instrument name
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name() == name)
    }

    /// Value of a Sum point for the given attributes
    pub fn sum_value(&self, name: &str, attributes: &AttributeSet) -> Option<f64> {
        match &self.metric(name)?.data {
            MetricData::Sum { points, .. } => points
                .iter()
                .find(|p| &p.attributes == attributes)
                .map(|p| p.value),
            _ => None,
        }
    }

    /// Value of a Gauge point for the given attributes
    pub fn gauge_value(&self, name: &str, attributes: &AttributeSet) -> Option<f64> {
        match &self.metric(name)?.data {
            MetricData::Gauge { points } => points
                .iter()
                .find(|p| &p.attributes == attributes)
                .map(|p| p.value),
            _ => None,
        }
    }

    /// Histogram point for the given attributes
    pub fn histogram(&self, name: &str, attributes: &AttributeSet) -> Option<&HistogramPoint> {
        match &self.metric(name)?.data {
            MetricData::Histogram { points, .. } => {
                points.iter().find(|p| &p.attributes == attributes)
            }
            _ => None,
        }
    }

    /// Total number of data points across all metrics
    pub fn point_count(&self) -> usize {
        self.metrics.iter().map(|m| m.data.len()).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeValue;

    #[test]
    fn test_temporality_parse() {
        assert_eq!("delta".parse::<Temporality>(), Ok(Temporality::Delta));
        assert_eq!(
            "Cumulative".parse::<Temporality>(),
            Ok(Temporality::Cumulative)
        );
        assert!("hourly".parse::<Temporality>().is_err());
        assert_eq!(Temporality::default(), Temporality::Cumulative);
    }

    #[test]
    fn test_resource_for_service() {
        let resource = Resource::for_service("my-demo-service", Some("instance-a".into()), "0.1.0");
        assert_eq!(
            resource.attributes.get(Resource::SERVICE_NAME),
            Some(&AttributeValue::from("my-demo-service"))
        );
        assert_eq!(
            resource.attributes.get(Resource::SERVICE_INSTANCE_ID),
            Some(&AttributeValue::from("instance-a"))
        );
    }

    #[test]
    fn test_resource_generates_instance_id() {
        let a = Resource::for_service("svc", None, "1");
        let b = Resource::for_service("svc", None, "1");
        assert_ne!(a, b);
    }
}
