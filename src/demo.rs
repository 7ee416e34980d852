//! Sample instrumentation
//!
//! Registers the demo instruments on a meter and records one fixed set of
//! measurements.

use chrono::Utc;

use crate::attributes::KeyValue;
use crate::error::Result;
use crate::instrument::Meter;
use crate::observable::Observation;

/// Instrumentation scope used by the demo
pub const DEMO_SCOPE: &str = "otel-instrumentation-example";

/// Boundaries of `demo.request.duration`, in seconds
pub const REQUEST_DURATION_BOUNDARIES: [f64; 7] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0];

/// Value reported by the `demo.observed_value` callback
pub const OBSERVED_VALUE: f64 = 23.0;

/// Register every demo instrument and record the sample values.
///
/// Registration errors are returned; they mean the instrumentation itself is
/// wrong.
pub fn record_sample_measurements(meter: &Meter) -> Result<()> {
    let handled = meter.counter("demo.handled_items").build()?;
    handled.add(1.0, &[])?;
    handled.add(23.0, &[])?;

    let queue = meter.up_down_counter("demo.queue_length").build()?;
    queue.add(5.0, &[])?;
    queue.add(-2.0, &[])?;

    let start_time = meter.gauge("demo.start_time").build()?;
    start_time.record(Utc::now().timestamp() as f64, &[])?;

    let duration = meter
        .histogram("demo.request.duration")
        .with_unit("s")
        .with_description("The distribution of demo request durations.")
        .with_boundaries(REQUEST_DURATION_BOUNDARIES.to_vec())
        .build()?;
    for seconds in [0.023, 1.632, 0.345, 0.123] {
        duration.record(seconds, &[])?;
    }

    meter
        .observable_gauge("demo.observed_value")
        .with_callback(|| Ok(vec![Observation::value(OBSERVED_VALUE)]))
        .build()?;

    let requests = meter
        .counter("demo.request.count")
        .with_description("The number of requests handled by the server.")
        .build()?;
    for (method, path, count) in [
        ("GET", "/items", 58.0),
        ("POST", "/items", 81.0),
        ("GET", "/users", 33.0),
        ("POST", "/users", 97.0),
    ] {
        requests.add(
            count,
            &[
                KeyValue::string("demo.method", method),
                KeyValue::string("demo.path", path),
            ],
        )?;
    }

    Ok(())
}
