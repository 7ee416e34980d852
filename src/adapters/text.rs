//! Text Exporter Adapter
//!
//! Writes a human-readable rendering (or pretty JSON) of each snapshot to a
//! local sink, stdout by default.

use std::fmt::Write as _;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::ports::MetricExporter;
use crate::error::{Error, Result};
use crate::snapshot::{MetricData, Snapshot};

/// Output format of the text exporter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextFormat {
    #[default]
    Text,
    Json,
}

/// Local sink for snapshots
pub struct TextExporter {
    name: String,
    format: TextFormat,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl TextExporter {
    pub fn new(name: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name: name.into(),
            format: TextFormat::default(),
            writer: Mutex::new(writer),
        }
    }

    /// Exporter writing to standard output
    pub fn stdout() -> Self {
        Self::new("stdout", Box::new(std::io::stdout()))
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    fn render(&self, snapshot: &Snapshot) -> Result<String> {
        match self.format {
            TextFormat::Text => Ok(render_text(snapshot)),
            TextFormat::Json => {
                let mut out = serde_json::to_string_pretty(snapshot)?;
                out.push('\n');
                Ok(out)
            }
        }
    }
}

impl std::fmt::Debug for TextExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextExporter")
            .field("name", &self.name)
            .field("format", &self.format)
            .finish()
    }
}

#[async_trait]
impl MetricExporter for TextExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        let rendered = self.render(&snapshot)?;
        let mut writer = self.writer.lock();
        writer
            .write_all(rendered.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| Error::export(&self.name, e))
    }

    async fn shutdown(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

/// Render a snapshot as indented plain text, one line per data point
pub fn render_text(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "--- snapshot at {} resource {}",
        snapshot.collected_at.to_rfc3339(),
        snapshot.resource.attributes
    );

    for metric in &snapshot.metrics {
        let d = &metric.descriptor;
        let _ = write!(out, "{} [{}] {}", d.name, metric.scope, d.kind);
        if !d.unit.is_empty() {
            let _ = write!(out, " unit={}", d.unit);
        }
        match &metric.data {
            MetricData::Sum { temporality, .. } | MetricData::Histogram { temporality, .. } => {
                let _ = write!(out, " {}", temporality);
            }
            MetricData::Gauge { .. } => {}
        }
        if !d.description.is_empty() {
            let _ = write!(out, " \"{}\"", d.description);
        }
        out.push('\n');

        match &metric.data {
            MetricData::Sum { points, .. } => {
                for p in points {
                    let _ = writeln!(out, "  {} {}", p.attributes, p.value);
                }
            }
            MetricData::Gauge { points } => {
                for p in points {
                    let _ = writeln!(out, "  {} {}", p.attributes, p.value);
                }
            }
            MetricData::Histogram { points, .. } => {
                for p in points {
                    let _ = write!(out, "  {} count={} sum={}", p.attributes, p.count, p.sum);
                    if let (Some(min), Some(max)) = (p.min, p.max) {
                        let _ = write!(out, " min={} max={}", min, max);
                    }
                    let buckets: Vec<String> = p
                        .bucket_counts
                        .iter()
                        .enumerate()
                        .map(|(i, c)| match p.boundaries.get(i) {
                            Some(b) => format!("<{}:{}", b, c),
                            None => format!("+Inf:{}", c),
                        })
                        .collect();
                    let _ = writeln!(out, " buckets=[{}]", buckets.join(" "));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeSet, KeyValue};
    use crate::instrument::{InstrumentDescriptor, InstrumentKind};
    use crate::snapshot::{GaugePoint, HistogramPoint, Metric, Resource, SumPoint, Temporality};
    use chrono::Utc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn snapshot() -> Arc<Snapshot> {
        let now = Utc::now();
        Arc::new(Snapshot {
            resource: Resource::for_service("svc", Some("i-1".into()), "1.0.0"),
            start_time: now,
            collected_at: now,
            sequence: 1,
            metrics: vec![
                Metric {
                    scope: "demo".into(),
                    descriptor: InstrumentDescriptor::new("demo.handled_items", InstrumentKind::Counter),
                    data: MetricData::Sum {
                        monotonic: true,
                        temporality: Temporality::Cumulative,
                        points: vec![SumPoint {
                            attributes: AttributeSet::new([KeyValue::string("demo.method", "GET")]),
                            value: 24.0,
                            start_time: now,
                            time: now,
                        }],
                    },
                },
                Metric {
                    scope: "demo".into(),
                    descriptor: InstrumentDescriptor::new("demo.observed_value", InstrumentKind::ObservableGauge),
                    data: MetricData::Gauge {
                        points: vec![GaugePoint {
                            attributes: AttributeSet::empty(),
                            value: 23.0,
                            time: now,
                        }],
                    },
                },
                Metric {
                    scope: "demo".into(),
                    descriptor: InstrumentDescriptor::new("demo.request.duration", InstrumentKind::Histogram)
                        .with_unit("s"),
                    data: MetricData::Histogram {
                        temporality: Temporality::Cumulative,
                        points: vec![HistogramPoint {
                            attributes: AttributeSet::empty(),
                            count: 2,
                            sum: 0.5,
                            min: Some(0.1),
                            max: Some(0.4),
                            boundaries: vec![0.25],
                            bucket_counts: vec![1, 1],
                            start_time: now,
                            time: now,
                        }],
                    },
                },
            ],
        })
    }

    #[test]
    fn test_render_text_includes_every_instrument() {
        let text = render_text(&snapshot());
        assert!(text.contains("demo.handled_items"));
        assert!(text.contains("demo.method=\"GET\""));
        assert!(text.contains("demo.observed_value"));
        assert!(text.contains("23"));
        assert!(text.contains("count=2"));
        assert!(text.contains("<0.25:1 +Inf:1"));
        assert!(text.contains("unit=s"));
    }

    #[tokio::test]
    async fn test_export_writes_to_sink() {
        let buffer = SharedBuffer::default();
        let exporter = TextExporter::new("text", Box::new(buffer.clone()));
        exporter.export(snapshot()).await.unwrap();
        exporter.export(snapshot()).await.unwrap();

        assert_eq!(buffer.contents().matches("--- snapshot at").count(), 2);
    }

    #[tokio::test]
    async fn test_json_format() {
        let buffer = SharedBuffer::default();
        let exporter = TextExporter::new("json", Box::new(buffer.clone())).with_format(TextFormat::Json);
        exporter.export(snapshot()).await.unwrap();

        let parsed: Snapshot = serde_json::from_str(&buffer.contents()).unwrap();
        assert_eq!(parsed.metrics.len(), 3);
    }
}
