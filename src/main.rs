//! meterflow demo
//!
//! Records a fixed set of sample measurements and exports them periodically
//! until interrupted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        meterflow demo                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    demo      │───▶│   Metrics    │───▶│ OTLP / HTTP  │       │
//! │  │ measurements │    │   Pipeline   │───▶│    stdout    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │                             │                                    │
//! │                             ▼                                    │
//! │                   /metrics /healthz /readyz                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meterflow::adapters::{HttpExporter, HttpExporterConfig, TextExporter, DEFAULT_OTLP_ENDPOINT};
use meterflow::demo::{record_sample_measurements, DEMO_SCOPE};
use meterflow::error::{Error, Result};
use meterflow::{MetricsPipeline, PeriodicExporterConfig, Resource, Temporality};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Periodic metrics export demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// OTLP/HTTP metrics endpoint
    #[arg(long, env = "OTLP_ENDPOINT", default_value = DEFAULT_OTLP_ENDPOINT)]
    otlp_endpoint: String,

    /// Export interval in seconds, shared by all exporters
    #[arg(long, env = "EXPORT_INTERVAL_SECONDS", default_value = "5")]
    export_interval_seconds: u64,

    /// Do not print snapshots to stdout
    #[arg(long, env = "DISABLE_STDOUT_EXPORTER")]
    disable_stdout_exporter: bool,

    /// Export temporality (cumulative, delta)
    #[arg(long, env = "TEMPORALITY", default_value = "cumulative")]
    temporality: Temporality,

    /// service.name resource attribute
    #[arg(long, env = "SERVICE_NAME", default_value = "my-demo-service")]
    service_name: String,

    /// service.instance.id resource attribute; empty generates a random id
    #[arg(long, env = "SERVICE_INSTANCE_ID", default_value = "instance-a")]
    service_instance_id: String,

    /// service.version resource attribute
    #[arg(long, env = "SERVICE_VERSION", default_value = "0.1.0")]
    service_version: String,

    /// Deadline for the final flush on shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECONDS", default_value = "5")]
    shutdown_timeout_seconds: u64,

    /// Timeout for each observable callback, in milliseconds
    #[arg(long, env = "CALLBACK_TIMEOUT_MS", default_value = "1000")]
    callback_timeout_ms: u64,

    /// Bind address for /metrics, /healthz and /readyz (disabled when unset)
    #[arg(long, env = "TELEMETRY_ADDR")]
    telemetry_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting meterflow {}", meterflow::version());
    info!("  OTLP endpoint: {}", args.otlp_endpoint);
    info!("  Export interval: {}s", args.export_interval_seconds);
    info!("  Temporality: {}", args.temporality);
    info!("  Stdout exporter: {}", !args.disable_stdout_exporter);

    let instance_id = Some(args.service_instance_id.clone()).filter(|id| !id.is_empty());
    let resource = Resource::for_service(
        args.service_name.clone(),
        instance_id,
        args.service_version.clone(),
    );

    let exporter_config = PeriodicExporterConfig::default()
        .with_interval(Duration::from_secs(args.export_interval_seconds))
        .with_temporality(args.temporality);

    let http = HttpExporter::new(HttpExporterConfig::default().with_endpoint(args.otlp_endpoint.clone()))
        .map_err(|e| {
            error!("Failed to create OTLP exporter: {}", e);
            e
        })?;

    let mut builder = MetricsPipeline::builder()
        .with_resource(resource)
        .with_callback_timeout(Duration::from_millis(args.callback_timeout_ms))
        .with_periodic_exporter(http, exporter_config.clone());
    if !args.disable_stdout_exporter {
        builder = builder.with_periodic_exporter(TextExporter::stdout(), exporter_config);
    }
    let pipeline = Arc::new(builder.build()?);

    record_sample_measurements(&pipeline.meter(DEMO_SCOPE))?;
    pipeline.start()?;

    if let Some(addr) = args.telemetry_addr.clone() {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if let Err(e) = run_telemetry_server(&addr, pipeline).await {
                error!("Telemetry server failed: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let report = pipeline
        .shutdown(Duration::from_secs(args.shutdown_timeout_seconds))
        .await;
    if !report.is_clean() {
        warn!(
            failed = ?report.failed,
            timed_out = ?report.timed_out,
            "Some exporters did not flush"
        );
    }

    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Telemetry Server
// =============================================================================

async fn run_telemetry_server(addr: &str, pipeline: Arc<MetricsPipeline>) -> Result<()> {
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    fn handle(pipeline: &MetricsPipeline, req: Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
        match req.uri().path() {
            "/metrics" => match pipeline.telemetry().render() {
                Ok(text) => {
                    let mut response = respond(StatusCode::OK, text);
                    if let Ok(value) = HeaderValue::from_str(pipeline.telemetry().format_type()) {
                        response.headers_mut().insert(CONTENT_TYPE, value);
                    }
                    response
                }
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            },
            "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
            "/readyz" if pipeline.is_running() => respond(StatusCode::OK, "ok"),
            "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        }
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid telemetry server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Telemetry server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let pipeline = Arc::clone(&pipeline);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = handle(&pipeline, req);
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Telemetry server connection error: {}", e);
            }
        });
    }
}
