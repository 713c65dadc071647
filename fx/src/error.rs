//! Rate feed error types.

use ratefeed_common::Currency;
use thiserror::Error;

/// Errors that can occur while fetching or serving rates.
///
/// Every variant is recoverable: the coordinator logs it and keeps serving
/// whatever it already has cached.
#[derive(Debug, Error)]
pub enum FxError {
    /// Connection, timeout, TLS or HTTP status failure.
    #[error("Network error from {source_name}: {message}")]
    Network { source_name: String, message: String },

    /// Upstream payload did not have the expected shape.
    #[error("Unexpected response from {source_name}: {message}")]
    Parse { source_name: String, message: String },

    /// History requested for a currency the source does not serve.
    #[error("{source_name} does not provide history for {currency}")]
    UnsupportedOperation {
        source_name: String,
        currency: Currency,
    },

    /// A fetch succeeded but did not price the requested currency.
    #[error("No rate data for {0}")]
    NoData(Currency),

    /// Name not present in the source catalog.
    #[error("Unknown rate source: {0}")]
    UnknownSource(String),

    /// Local file access failed.
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    /// Settings or config store contents are invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FxError {
    /// Build a network error for a source.
    pub fn network(source_name: &str, message: impl ToString) -> Self {
        FxError::Network {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a parse error for a source.
    pub fn parse(source_name: &str, message: impl ToString) -> Self {
        FxError::Parse {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    /// Check if a later poll may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, FxError::Network { .. } | FxError::NoData(_))
    }

    /// Get a stable error code for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::Network { .. } => "NETWORK_ERROR",
            FxError::Parse { .. } => "PARSE_ERROR",
            FxError::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            FxError::NoData(_) => "NO_DATA",
            FxError::UnknownSource(_) => "UNKNOWN_SOURCE",
            FxError::Io { .. } => "IO_ERROR",
            FxError::Config(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type for rate feed operations.
pub type FxResult<T> = Result<T, FxError>;
