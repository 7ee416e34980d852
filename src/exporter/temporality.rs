//! Temporality conversion
//!
//! The store is always cumulative. An exporter configured for delta
//! temporality keeps the cumulative values of its last successful export as a
//! baseline and emits differences against it. The baseline only advances when
//! the export succeeds, so a failed cycle's change is carried into the next one.
//! Snapshots collected before the last exported one are stale and never
//! exported, whichever path (timer or forced flush) delivers them late.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::attributes::AttributeSet;
use crate::snapshot::{HistogramPoint, Metric, MetricData, Snapshot, SumPoint, Temporality};

type SeriesKey = (String, AttributeSet);

#[derive(Debug, Clone, PartialEq)]
enum Baseline {
    Sum(f64),
    Histogram { count: u64, sum: f64, bucket_counts: Vec<u64> },
}

/// Baseline captured from a converted snapshot, applied once its export succeeds
#[derive(Debug, Default)]
pub(crate) struct PendingBaseline {
    series: HashMap<SeriesKey, Baseline>,
    time: Option<DateTime<Utc>>,
    sequence: u64,
}

/// Per-exporter converter from cumulative snapshots to the configured temporality
#[derive(Debug)]
pub(crate) struct TemporalityConverter {
    temporality: Temporality,
    baseline: HashMap<SeriesKey, Baseline>,
    last_export: Option<DateTime<Utc>>,
    last_sequence: Option<u64>,
}

impl TemporalityConverter {
    pub(crate) fn new(temporality: Temporality) -> Self {
        Self {
            temporality,
            baseline: HashMap::new(),
            last_export: None,
            last_sequence: None,
        }
    }

    /// Whether a newer snapshot has already been exported
    pub(crate) fn is_stale(&self, snapshot: &Snapshot) -> bool {
        matches!(self.last_sequence, Some(last) if snapshot.sequence <= last)
    }

    /// Convert a cumulative snapshot; cumulative exporters share the original
    pub(crate) fn convert(&self, snapshot: Arc<Snapshot>) -> (Arc<Snapshot>, PendingBaseline) {
        if self.temporality == Temporality::Cumulative {
            let pending = PendingBaseline {
                sequence: snapshot.sequence,
                ..Default::default()
            };
            return (snapshot, pending);
        }

        let mut pending = PendingBaseline {
            series: HashMap::new(),
            time: Some(snapshot.collected_at),
            sequence: snapshot.sequence,
        };
        let metrics = snapshot
            .metrics
            .iter()
            .map(|m| self.convert_metric(m, &mut pending))
            .collect();

        let converted = Snapshot {
            resource: snapshot.resource.clone(),
            start_time: snapshot.start_time,
            collected_at: snapshot.collected_at,
            sequence: snapshot.sequence,
            metrics,
        };
        (Arc::new(converted), pending)
    }

    /// Advance the baseline after a successful export
    pub(crate) fn commit(&mut self, pending: PendingBaseline) {
        self.last_sequence = Some(pending.sequence);
        if pending.time.is_none() {
            return;
        }
        self.baseline.extend(pending.series);
        self.last_export = pending.time;
    }

    fn convert_metric(&self, metric: &Metric, pending: &mut PendingBaseline) -> Metric {
        let name = metric.descriptor.name.clone();
        let data = match &metric.data {
            MetricData::Sum {
                monotonic, points, ..
            } => MetricData::Sum {
                monotonic: *monotonic,
                temporality: Temporality::Delta,
                points: points
                    .iter()
                    .map(|p| {
                        let key = (name.clone(), p.attributes.clone());
                        pending.series.insert(key.clone(), Baseline::Sum(p.value));
                        self.sum_delta(&key, p, *monotonic)
                    })
                    .collect(),
            },
            MetricData::Histogram { points, .. } => MetricData::Histogram {
                temporality: Temporality::Delta,
                points: points
                    .iter()
                    .map(|p| {
                        let key = (name.clone(), p.attributes.clone());
                        pending.series.insert(
                            key.clone(),
                            Baseline::Histogram {
                                count: p.count,
                                sum: p.sum,
                                bucket_counts: p.bucket_counts.clone(),
                            },
                        );
                        self.histogram_delta(&key, p)
                    })
                    .collect(),
            },
            gauge @ MetricData::Gauge { .. } => gauge.clone(),
        };

        Metric {
            scope: metric.scope.clone(),
            descriptor: metric.descriptor.clone(),
            data,
        }
    }

    fn start_time(&self, original: DateTime<Utc>) -> DateTime<Utc> {
        self.last_export.unwrap_or(original)
    }

    fn sum_delta(&self, key: &SeriesKey, point: &SumPoint, monotonic: bool) -> SumPoint {
        let previous = match self.baseline.get(key) {
            Some(Baseline::Sum(v)) => *v,
            _ => 0.0,
        };
        let value = if monotonic && point.value < previous {
            point.value
        } else {
            point.value - previous
        };
        SumPoint {
            attributes: point.attributes.clone(),
            value,
            start_time: self.start_time(point.start_time),
            time: point.time,
        }
    }

    fn histogram_delta(&self, key: &SeriesKey, point: &HistogramPoint) -> HistogramPoint {
        let (count, sum, bucket_counts) = match self.baseline.get(key) {
            Some(Baseline::Histogram {
                count,
                sum,
                bucket_counts,
            }) if *count <= point.count && bucket_counts.len() == point.bucket_counts.len() => (
                point.count - count,
                point.sum - sum,
                point
                    .bucket_counts
                    .iter()
                    .zip(bucket_counts)
                    .map(|(cur, prev)| cur.saturating_sub(*prev))
                    .collect(),
            ),
            _ => (point.count, point.sum, point.bucket_counts.clone()),
        };

        HistogramPoint {
            attributes: point.attributes.clone(),
            count,
            sum,
            min: None,
            max: None,
            boundaries: point.boundaries.clone(),
            bucket_counts,
            start_time: self.start_time(point.start_time),
            time: point.time,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentDescriptor, InstrumentKind};
    use crate::snapshot::Resource;
    use chrono::Duration as ChronoDuration;

    fn sum_snapshot(value: f64, at: DateTime<Utc>) -> Arc<Snapshot> {
        let start = at - ChronoDuration::seconds(60);
        Arc::new(Snapshot {
            resource: Resource::default(),
            start_time: start,
            collected_at: at,
            sequence: 0,
            metrics: vec![Metric {
                scope: "test".into(),
                descriptor: InstrumentDescriptor::new("requests", InstrumentKind::Counter),
                data: MetricData::Sum {
                    monotonic: true,
                    temporality: Temporality::Cumulative,
                    points: vec![SumPoint {
                        attributes: AttributeSet::empty(),
                        value,
                        start_time: start,
                        time: at,
                    }],
                },
            }],
        })
    }

    fn histogram_snapshot(count: u64, sum: f64, buckets: Vec<u64>) -> Arc<Snapshot> {
        let now = Utc::now();
        Arc::new(Snapshot {
            resource: Resource::default(),
            start_time: now,
            collected_at: now,
            sequence: 0,
            metrics: vec![Metric {
                scope: "test".into(),
                descriptor: InstrumentDescriptor::new("latency", InstrumentKind::Histogram),
                data: MetricData::Histogram {
                    temporality: Temporality::Cumulative,
                    points: vec![HistogramPoint {
                        attributes: AttributeSet::empty(),
                        count,
                        sum,
                        min: Some(0.1),
                        max: Some(1.0),
                        boundaries: vec![0.5],
                        bucket_counts: buckets,
                        start_time: now,
                        time: now,
                    }],
                },
            }],
        })
    }

    #[test]
    fn test_cumulative_passes_through() {
        let converter = TemporalityConverter::new(Temporality::Cumulative);
        let snapshot = sum_snapshot(10.0, Utc::now());
        let (converted, _) = converter.convert(Arc::clone(&snapshot));
        assert!(Arc::ptr_eq(&snapshot, &converted));
    }

    #[test]
    fn test_delta_between_successful_exports() {
        let mut converter = TemporalityConverter::new(Temporality::Delta);
        let t0 = Utc::now();

        let (first, pending) = converter.convert(sum_snapshot(10.0, t0));
        assert_eq!(first.sum_value("requests", &AttributeSet::empty()), Some(10.0));
        converter.commit(pending);

        let t1 = t0 + ChronoDuration::seconds(5);
        let (second, pending) = converter.convert(sum_snapshot(14.0, t1));
        assert_eq!(second.sum_value("requests", &AttributeSet::empty()), Some(4.0));
        match &second.metrics[0].data {
            MetricData::Sum {
                temporality,
                points,
                ..
            } => {
                assert_eq!(*temporality, Temporality::Delta);
                assert_eq!(points[0].start_time, t0);
            }
            other => panic!("expected sum, got {:?}", other),
        }
        converter.commit(pending);
    }

    #[test]
    fn test_failed_export_keeps_baseline() {
        let mut converter = TemporalityConverter::new(Temporality::Delta);
        let t0 = Utc::now();
        let (_, pending) = converter.convert(sum_snapshot(10.0, t0));
        converter.commit(pending);

        // Export of 15 fails: pending dropped without commit
        let (_, _dropped) = converter.convert(sum_snapshot(15.0, t0 + ChronoDuration::seconds(5)));

        let (third, _) = converter.convert(sum_snapshot(20.0, t0 + ChronoDuration::seconds(10)));
        assert_eq!(third.sum_value("requests", &AttributeSet::empty()), Some(10.0));
    }

    #[test]
    fn test_snapshot_older_than_last_export_is_stale() {
        let mut converter = TemporalityConverter::new(Temporality::Delta);
        let with_sequence = |value: f64, sequence: u64| {
            Arc::new(Snapshot {
                sequence,
                ..(*sum_snapshot(value, Utc::now())).clone()
            })
        };
        let older = with_sequence(10.0, 1);
        let newer = with_sequence(12.0, 2);
        assert!(!converter.is_stale(&older));

        let (_, pending) = converter.convert(Arc::clone(&newer));
        converter.commit(pending);

        assert!(converter.is_stale(&older));
        assert!(converter.is_stale(&newer));
        assert!(!converter.is_stale(&with_sequence(15.0, 3)));
    }

    #[test]
    fn test_monotonic_reset_rebases() {
        let mut converter = TemporalityConverter::new(Temporality::Delta);
        let (_, pending) = converter.convert(sum_snapshot(10.0, Utc::now()));
        converter.commit(pending);

        let (next, _) = converter.convert(sum_snapshot(3.0, Utc::now()));
        assert_eq!(next.sum_value("requests", &AttributeSet::empty()), Some(3.0));
    }

    #[test]
    fn test_histogram_delta() {
        let mut converter = TemporalityConverter::new(Temporality::Delta);
        let (_, pending) = converter.convert(histogram_snapshot(2, 1.5, vec![1, 1]));
        converter.commit(pending);

        let (next, _) = converter.convert(histogram_snapshot(5, 3.0, vec![2, 3]));
        let point = next.histogram("latency", &AttributeSet::empty()).unwrap();
        assert_eq!(point.count, 3);
        assert!((point.sum - 1.5).abs() < 1e-9);
        assert_eq!(point.bucket_counts, vec![1, 2]);
        assert_eq!(point.min, None);
    }
}
