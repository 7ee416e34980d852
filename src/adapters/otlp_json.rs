//! OTLP/JSON encoding of snapshots
//!
//! Produces the `ExportMetricsServiceRequest` JSON mapping: one resource, one
//! entry per instrumentation scope, 64-bit integers and timestamps as strings.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::attributes::{AttributeSet, AttributeValue};
use crate::snapshot::{GaugePoint, HistogramPoint, Metric, MetricData, Snapshot, SumPoint, Temporality};

fn unix_nanos(time: &DateTime<Utc>) -> String {
    time.timestamp_nanos_opt().unwrap_or_default().to_string()
}

fn any_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::String(s) => json!({ "stringValue": s }),
        AttributeValue::I64(i) => json!({ "intValue": i.to_string() }),
        AttributeValue::F64(f) => json!({ "doubleValue": f }),
        AttributeValue::Bool(b) => json!({ "boolValue": b }),
    }
}

fn attributes(set: &AttributeSet) -> Value {
    Value::Array(
        set.iter()
            .map(|kv| json!({ "key": kv.key, "value": any_value(&kv.value) }))
            .collect(),
    )
}

fn temporality(t: Temporality) -> u8 {
    match t {
        Temporality::Delta => 1,
        Temporality::Cumulative => 2,
    }
}

fn sum_point(p: &SumPoint) -> Value {
    json!({
        "attributes": attributes(&p.attributes),
        "startTimeUnixNano": unix_nanos(&p.start_time),
        "timeUnixNano": unix_nanos(&p.time),
        "asDouble": p.value,
    })
}

fn gauge_point(p: &GaugePoint) -> Value {
    json!({
        "attributes": attributes(&p.attributes),
        "timeUnixNano": unix_nanos(&p.time),
        "asDouble": p.value,
    })
}

fn histogram_point(p: &HistogramPoint) -> Value {
    let mut point = json!({
        "attributes": attributes(&p.attributes),
        "startTimeUnixNano": unix_nanos(&p.start_time),
        "timeUnixNano": unix_nanos(&p.time),
        "count": p.count.to_string(),
        "sum": p.sum,
        "bucketCounts": p.bucket_counts.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
        "explicitBounds": p.boundaries,
    });
    if let Some(min) = p.min {
        point["min"] = json!(min);
    }
    if let Some(max) = p.max {
        point["max"] = json!(max);
    }
    point
}

fn metric(m: &Metric) -> Value {
    let mut encoded = json!({
        "name": m.descriptor.name,
        "description": m.descriptor.description,
        "unit": m.descriptor.unit,
    });
    match &m.data {
        MetricData::Sum {
            monotonic,
            temporality: t,
            points,
        } => {
            encoded["sum"] = json!({
                "dataPoints": points.iter().map(sum_point).collect::<Vec<_>>(),
                "aggregationTemporality": temporality(*t),
                "isMonotonic": monotonic,
            });
        }
        MetricData::Gauge { points } => {
            encoded["gauge"] = json!({
                "dataPoints": points.iter().map(gauge_point).collect::<Vec<_>>(),
            });
        }
        MetricData::Histogram {
            temporality: t,
            points,
        } => {
            encoded["histogram"] = json!({
                "dataPoints": points.iter().map(histogram_point).collect::<Vec<_>>(),
                "aggregationTemporality": temporality(*t),
            });
        }
    }
    encoded
}

/// Encode a snapshot as an OTLP/JSON export request body
pub fn encode(snapshot: &Snapshot) -> Value {
    // Scopes in order of first appearance
    let mut scopes: Vec<(&str, Vec<Value>)> = Vec::new();
    for m in &snapshot.metrics {
        match scopes.iter_mut().find(|(name, _)| *name == m.scope) {
            Some((_, metrics)) => metrics.push(metric(m)),
            None => scopes.push((&m.scope, vec![metric(m)])),
        }
    }

    json!({
        "resourceMetrics": [{
            "resource": { "attributes": attributes(&snapshot.resource.attributes) },
            "scopeMetrics": scopes
                .into_iter()
                .map(|(name, metrics)| json!({ "scope": { "name": name }, "metrics": metrics }))
                .collect::<Vec<_>>(),
        }]
    })
}
