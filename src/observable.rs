//! Observable Callback Runner
//!
//! Invokes the callbacks of asynchronous instruments once per collection
//! cycle. Callbacks are plain synchronous functions. An instrument's callbacks
//! run together on the blocking pool under one bounded timeout, so a stuck or
//! panicking callback can only cost its own instrument a data point for that
//! cycle. While an invocation is still running, later cycles report a timeout
//! for that instrument instead of starting another one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::attributes::AttributeSet;
use crate::error::{Error, Result};
use crate::instrument::InstrumentDescriptor;
use crate::snapshot::{GaugePoint, Metric, MetricData};
use crate::telemetry::PipelineTelemetry;

/// Default per-instrument callback timeout
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(1);

/// One value reported by a callback
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: f64,
    pub attributes: AttributeSet,
}

impl Observation {
    pub fn new(value: f64, attributes: impl Into<AttributeSet>) -> Self {
        Self {
            value,
            attributes: attributes.into(),
        }
    }

    /// Observation without attributes
    pub fn value(value: f64) -> Self {
        Self::new(value, AttributeSet::empty())
    }
}

/// Callback of an observable gauge
pub type ObservableCallback = Arc<dyn Fn() -> anyhow::Result<Vec<Observation>> + Send + Sync>;

/// Wrap a closure as an `ObservableCallback`
pub fn callback<F>(f: F) -> ObservableCallback
where
    F: Fn() -> anyhow::Result<Vec<Observation>> + Send + Sync + 'static,
{
    Arc::new(f)
}

// =============================================================================
// Observable Instrument
// =============================================================================

/// An observable gauge and its callbacks
pub struct ObservableInstrument {
    scope: String,
    descriptor: InstrumentDescriptor,
    callbacks: Mutex<Vec<ObservableCallback>>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the blocking invocation ends, panics included
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ObservableInstrument {
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    /// Register another callback for this instrument
    pub fn add_callback(&self, callback: ObservableCallback) {
        self.callbacks.lock().push(callback);
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Whether a previous invocation of the callbacks has not returned yet
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ObservableInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableInstrument")
            .field("scope", &self.scope)
            .field("name", &self.descriptor.name)
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

// =============================================================================
// Callback Runner
// =============================================================================

/// Runs every observable instrument's callbacks for one collection cycle
pub struct CallbackRunner {
    instruments: RwLock<Vec<Arc<ObservableInstrument>>>,
    timeout: Duration,
    telemetry: Arc<PipelineTelemetry>,
}

impl CallbackRunner {
    pub fn new(timeout: Duration, telemetry: Arc<PipelineTelemetry>) -> Self {
        Self {
            instruments: RwLock::new(Vec::new()),
            timeout,
            telemetry,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Track a newly registered observable instrument
    pub fn attach(
        &self,
        scope: &str,
        descriptor: InstrumentDescriptor,
        callbacks: Vec<ObservableCallback>,
    ) -> Arc<ObservableInstrument> {
        let instrument = Arc::new(ObservableInstrument {
            scope: scope.to_string(),
            descriptor,
            callbacks: Mutex::new(callbacks),
            in_flight: Arc::new(AtomicBool::new(false)),
        });
        self.instruments.write().push(Arc::clone(&instrument));
        instrument
    }

    /// Invoke all callbacks and return one metric per instrument that produced points.
    ///
    /// Failures are logged and leave the instrument out of this cycle.
    pub async fn run(&self, now: DateTime<Utc>) -> Vec<Metric> {
        let instruments: Vec<Arc<ObservableInstrument>> = self.instruments.read().clone();
        let results = join_all(instruments.iter().map(|i| self.observe(i))).await;

        let mut metrics = Vec::new();
        for (instrument, result) in instruments.iter().zip(results) {
            match result {
                Ok(observations) if observations.is_empty() => {}
                Ok(observations) => metrics.push(to_metric(instrument, observations, now)),
                Err(e) => {
                    let reason = match e {
                        Error::CallbackTimeout { .. } => "timeout",
                        _ => "error",
                    };
                    self.telemetry
                        .record_callback_failure(&instrument.descriptor.name, reason);
                    warn!(instrument = %instrument.descriptor.name, error = %e, "observable callback failed, skipping instrument this cycle");
                }
            }
        }
        metrics
    }

    async fn observe(&self, instrument: &ObservableInstrument) -> Result<Vec<Observation>> {
        let name = &instrument.descriptor.name;
        let timed_out = || Error::CallbackTimeout {
            instrument: name.clone(),
            timeout: self.timeout,
        };

        if instrument
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(instrument = %name, "previous callback invocation still running");
            return Err(timed_out());
        }

        let callbacks: Vec<ObservableCallback> = instrument.callbacks.lock().clone();
        let guard = InFlightGuard(Arc::clone(&instrument.in_flight));
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut produced = Vec::new();
            for callback in callbacks {
                produced.extend(callback()?);
            }
            Ok::<_, anyhow::Error>(produced)
        });

        let mut observations = tokio::time::timeout(self.timeout, handle)
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| Error::Callback {
                instrument: name.clone(),
                reason: if e.is_panic() {
                    "callback panicked".to_string()
                } else {
                    e.to_string()
                },
            })?
            .map_err(|e| Error::Callback {
                instrument: name.clone(),
                reason: format!("{:#}", e),
            })?;

        let before = observations.len();
        observations.retain(|o| o.value.is_finite());
        if observations.len() != before {
            warn!(instrument = %name, dropped = before - observations.len(), "dropped non-finite observations");
        }
        debug!(instrument = %name, observations = observations.len(), "observed");
        Ok(observations)
    }
}

impl std::fmt::Debug for CallbackRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRunner")
            .field("instruments", &self.instruments.read().len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Equal attribute sets within one cycle collapse to the last observation
fn to_metric(
    instrument: &ObservableInstrument,
    observations: Vec<Observation>,
    now: DateTime<Utc>,
) -> Metric {
    let mut latest: HashMap<AttributeSet, f64> = HashMap::new();
    for o in observations {
        latest.insert(o.attributes, o.value);
    }
    let mut points: Vec<GaugePoint> = latest
        .into_iter()
        .map(|(attributes, value)| GaugePoint {
            attributes,
            value,
            time: now,
        })
        .collect();
    points.sort_by(|a, b| a.attributes.cmp(&b.attributes));

    Metric {
        scope: instrument.scope.clone(),
        descriptor: instrument.descriptor.clone(),
        data: MetricData::Gauge { points },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::KeyValue;
    use crate::instrument::InstrumentKind;
    use std::sync::atomic::AtomicU64;

    fn runner(timeout: Duration) -> CallbackRunner {
        CallbackRunner::new(timeout, Arc::new(PipelineTelemetry::new().unwrap()))
    }

    fn gauge(name: &str) -> InstrumentDescriptor {
        InstrumentDescriptor::new(name, InstrumentKind::ObservableGauge)
    }

    fn gauge_values(metric: &Metric) -> Vec<f64> {
        match &metric.data {
            MetricData::Gauge { points } => points.iter().map(|p| p.value).collect(),
            other => panic!("expected gauge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_callback_values_collected() {
        let runner = runner(DEFAULT_CALLBACK_TIMEOUT);
        runner.attach(
            "test",
            gauge("demo.observed_value"),
            vec![callback(|| Ok(vec![Observation::value(23.0)]))],
        );

        let metrics = runner.run(Utc::now()).await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(gauge_values(&metrics[0]), vec![23.0]);
    }

    #[tokio::test]
    async fn test_values_are_fresh_each_cycle() {
        let runner = runner(DEFAULT_CALLBACK_TIMEOUT);
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        runner.attach(
            "test",
            gauge("calls"),
            vec![callback(move || {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                Ok(vec![Observation::value(n as f64)])
            })],
        );

        assert_eq!(gauge_values(&runner.run(Utc::now()).await[0]), vec![1.0]);
        assert_eq!(gauge_values(&runner.run(Utc::now()).await[0]), vec![2.0]);
    }

    #[tokio::test]
    async fn test_failing_callback_skips_only_its_instrument() {
        let runner = runner(DEFAULT_CALLBACK_TIMEOUT);
        runner.attach(
            "test",
            gauge("broken"),
            vec![callback(|| Err(anyhow::anyhow!("sensor offline")))],
        );
        runner.attach(
            "test",
            gauge("healthy"),
            vec![callback(|| Ok(vec![Observation::value(1.0)]))],
        );

        let metrics = runner.run(Utc::now()).await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name(), "healthy");
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let runner = runner(DEFAULT_CALLBACK_TIMEOUT);
        let instrument = runner.attach("test", gauge("panics"), vec![callback(|| panic!("boom"))]);

        assert!(runner.run(Utc::now()).await.is_empty());
        assert!(!instrument.is_in_flight());
    }

    #[tokio::test]
    async fn test_stuck_callback_is_not_restarted() {
        let runner = runner(Duration::from_millis(20));
        let started = Arc::new(AtomicU64::new(0));
        let release = Arc::new(AtomicBool::new(false));
        let (calls, gate) = (Arc::clone(&started), Arc::clone(&release));
        let instrument = runner.attach(
            "test",
            gauge("stuck"),
            vec![callback(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                while !gate.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(vec![Observation::value(1.0)])
            })],
        );

        for _ in 0..20 {
            assert!(runner.run(Utc::now()).await.is_empty());
        }
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(instrument.is_in_flight());

        release.store(true, Ordering::SeqCst);
        while instrument.is_in_flight() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let metrics = runner.run(Utc::now()).await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_bounds_all_callbacks_of_an_instrument() {
        let runner = runner(Duration::from_millis(100));
        let slow = || {
            callback(|| {
                std::thread::sleep(Duration::from_millis(80));
                Ok(vec![Observation::value(1.0)])
            })
        };
        runner.attach("test", gauge("slow"), vec![slow(), slow(), slow()]);

        let started = std::time::Instant::now();
        assert!(runner.run(Utc::now()).await.is_empty());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_slow_callback_times_out() {
        let runner = runner(Duration::from_millis(50));
        runner.attach(
            "test",
            gauge("slow"),
            vec![callback(|| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(vec![Observation::value(1.0)])
            })],
        );
        runner.attach(
            "test",
            gauge("fast"),
            vec![callback(|| Ok(vec![Observation::value(2.0)]))],
        );

        let started = std::time::Instant::now();
        let metrics = runner.run(Utc::now()).await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name(), "fast");
    }

    #[tokio::test]
    async fn test_duplicate_attributes_collapse_to_last() {
        let runner = runner(DEFAULT_CALLBACK_TIMEOUT);
        let attrs = [KeyValue::string("room", "a")];
        runner.attach(
            "test",
            gauge("temperature"),
            vec![callback(move || {
                Ok(vec![
                    Observation::new(20.0, attrs.clone()),
                    Observation::new(21.5, attrs.clone()),
                    Observation::value(f64::NAN),
                ])
            })],
        );

        let metrics = runner.run(Utc::now()).await;
        assert_eq!(gauge_values(&metrics[0]), vec![21.5]);
    }

    #[tokio::test]
    async fn test_multiple_callbacks_merge() {
        let runner = runner(DEFAULT_CALLBACK_TIMEOUT);
        let instrument = runner.attach(
            "test",
            gauge("merged"),
            vec![callback(|| {
                Ok(vec![Observation::new(1.0, [KeyValue::string("source", "a")])])
            })],
        );
        instrument.add_callback(callback(|| {
            Ok(vec![Observation::new(2.0, [KeyValue::string("source", "b")])])
        }));

        let metrics = runner.run(Utc::now()).await;
        assert_eq!(gauge_values(&metrics[0]), vec![1.0, 2.0]);
    }
}
