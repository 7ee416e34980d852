//! Aggregations
//!
//! Per-attribute-set aggregation state. Values are mutated only while the
//! owning instrument's lock is held, so plain fields are enough here.

use chrono::{DateTime, Utc};

use crate::attributes::AttributeSet;
use crate::snapshot::{GaugePoint, HistogramPoint, SumPoint};

/// Running sum (Counter and UpDownCounter)
#[derive(Debug, Clone, Default)]
pub(crate) struct SumAggregation {
    value: f64,
}

impl SumAggregation {
    pub(crate) fn add(&mut self, delta: f64) {
        self.value += delta;
    }

    pub(crate) fn to_point(
        &self,
        attributes: &AttributeSet,
        start_time: DateTime<Utc>,
        time: DateTime<Utc>,
    ) -> SumPoint {
        SumPoint {
            attributes: attributes.clone(),
            value: self.value,
            start_time,
            time,
        }
    }
}

/// Last recorded value; writes are ordered by the instrument lock, the time is metadata
#[derive(Debug, Clone)]
pub(crate) struct LastValueAggregation {
    value: f64,
    time: DateTime<Utc>,
}

impl LastValueAggregation {
    pub(crate) fn new(value: f64, time: DateTime<Utc>) -> Self {
        Self { value, time }
    }

    pub(crate) fn set(&mut self, value: f64, time: DateTime<Utc>) {
        self.value = value;
        self.time = time;
    }

    pub(crate) fn to_point(&self, attributes: &AttributeSet) -> GaugePoint {
        GaugePoint {
            attributes: attributes.clone(),
            value: self.value,
            time: self.time,
        }
    }
}

/// Explicit-bucket histogram
#[derive(Debug, Clone)]
pub(crate) struct HistogramAggregation {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    /// `boundaries.len() + 1` entries, the last one is the overflow bucket
    bucket_counts: Vec<u64>,
}

impl HistogramAggregation {
    pub(crate) fn new(bucket_count: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            bucket_counts: vec![0; bucket_count],
        }
    }

    pub(crate) fn observe(&mut self, boundaries: &[f64], value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.bucket_counts[bucket_index(boundaries, value)] += 1;
    }

    pub(crate) fn to_point(
        &self,
        attributes: &AttributeSet,
        boundaries: &[f64],
        start_time: DateTime<Utc>,
        time: DateTime<Utc>,
    ) -> HistogramPoint {
        let has_values = self.count > 0;
        HistogramPoint {
            attributes: attributes.clone(),
            count: self.count,
            sum: self.sum,
            min: has_values.then_some(self.min),
            max: has_values.then_some(self.max),
            boundaries: boundaries.to_vec(),
            bucket_counts: self.bucket_counts.clone(),
            start_time,
            time,
        }
    }
}

/// Bucket for `value`: buckets are `[b[i-1], b[i])`, values `>= b.last()` overflow.
pub(crate) fn bucket_index(boundaries: &[f64], value: f64) -> usize {
    boundaries.partition_point(|b| *b <= value)
}

/// Aggregation state of one attribute set
#[derive(Debug, Clone)]
pub(crate) enum Aggregation {
    Sum(SumAggregation),
    LastValue(LastValueAggregation),
    Histogram(HistogramAggregation),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const BOUNDARIES: [f64; 7] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0];

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(&BOUNDARIES, 0.0), 0);
        assert_eq!(bucket_index(&BOUNDARIES, 0.023), 0);
        // Lower bound inclusive
        assert_eq!(bucket_index(&BOUNDARIES, 0.05), 1);
        assert_eq!(bucket_index(&BOUNDARIES, 0.123), 2);
        assert_eq!(bucket_index(&BOUNDARIES, 0.345), 3);
        assert_eq!(bucket_index(&BOUNDARIES, 1.632), 5);
        // Overflow
        assert_eq!(bucket_index(&BOUNDARIES, 5.0), 7);
        assert_eq!(bucket_index(&BOUNDARIES, 100.0), 7);
        assert_eq!(bucket_index(&[], 3.0), 0);
    }

    #[test]
    fn test_histogram_observe() {
        let mut h = HistogramAggregation::new(BOUNDARIES.len() + 1);
        for v in [0.023, 1.632, 0.345, 0.123] {
            h.observe(&BOUNDARIES, v);
        }
        let now = Utc::now();
        let point = h.to_point(&AttributeSet::empty(), &BOUNDARIES, now, now);
        assert_eq!(point.count, 4);
        assert!((point.sum - 2.123).abs() < 1e-9);
        assert_eq!(point.min, Some(0.023));
        assert_eq!(point.max, Some(1.632));
        assert_eq!(point.bucket_counts, vec![1, 0, 1, 1, 0, 1, 0, 0]);
    }

    #[test]
    fn test_last_value_survives_clock_step_back() {
        let now = Utc::now();
        let earlier = now - ChronoDuration::seconds(2);
        let mut g = LastValueAggregation::new(1.0, now);
        g.set(42.0, earlier);
        let point = g.to_point(&AttributeSet::empty());
        assert_eq!(point.value, 42.0);
        assert_eq!(point.time, earlier);
    }

    #[test]
    fn test_empty_histogram_has_no_min_max() {
        let h = HistogramAggregation::new(3);
        let now = Utc::now();
        let point = h.to_point(&AttributeSet::empty(), &[1.0, 2.0], now, now);
        assert_eq!(point.min, None);
        assert_eq!(point.max, None);
    }
}
