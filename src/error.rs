//! Error types for the metrics pipeline

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while registering, recording, collecting or exporting metrics
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Registration Errors (fatal at setup)
    // =========================================================================
    /// Instrument name already registered with incompatible metadata
    #[error("Instrument '{name}' already registered as {existing}, requested {requested}")]
    DuplicateInstrument {
        name: String,
        existing: String,
        requested: String,
    },

    /// Instrument name or options are not valid
    #[error("Invalid instrument '{name}': {reason}")]
    InvalidInstrument { name: String, reason: String },

    // =========================================================================
    // Recording Errors
    // =========================================================================
    /// A single measurement was rejected
    #[error("Invalid value {value} for instrument '{instrument}': {reason}")]
    InvalidValue {
        instrument: String,
        value: f64,
        reason: String,
    },

    // =========================================================================
    // Collection Errors
    // =========================================================================
    /// Observable callback failed
    #[error("Callback for instrument '{instrument}' failed: {reason}")]
    Callback { instrument: String, reason: String },

    /// Observable callback did not return in time
    #[error("Callback for instrument '{instrument}' timed out after {timeout:?}")]
    CallbackTimeout {
        instrument: String,
        timeout: Duration,
    },

    // =========================================================================
    // Export Errors
    // =========================================================================
    /// Exporter could not deliver a snapshot
    #[error("Export via '{exporter}' failed: {reason}")]
    Export { exporter: String, reason: String },

    /// Exporter did not finish its final flush before the shutdown deadline
    #[error("Exporter '{exporter}' did not finish its final flush within {deadline:?}")]
    ShutdownTimeout { exporter: String, deadline: Duration },

    /// Pipeline was already shut down
    #[error("Metrics pipeline already shut down")]
    AlreadyShutdown,

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Self-telemetry registry error
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an export error for the named exporter
    pub fn export(exporter: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Export {
            exporter: exporter.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is only fatal at setup time
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicateInstrument { .. } | Error::InvalidInstrument { .. } | Error::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_message() {
        let err = Error::DuplicateInstrument {
            name: "demo.handled_items".to_string(),
            existing: "Counter".to_string(),
            requested: "Gauge".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instrument 'demo.handled_items' already registered as Counter, requested Gauge"
        );
        assert!(err.is_setup_error());
    }

    #[test]
    fn test_export_helper() {
        let err = Error::export("otlp", "connection refused");
        assert_eq!(err.to_string(), "Export via 'otlp' failed: connection refused");
        assert!(!err.is_setup_error());
    }
}
