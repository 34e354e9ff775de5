//! Error types for the dune-dashboard-fetch crate.
//!
//! None of these escape the resilience layer as panics: source and
//! verification errors are logged and swallowed, attempt errors drive
//! retries, and only the dashboard layer reports failures to its caller.

use http::StatusCode;
use thiserror::Error;

/// Error returned when no healthy proxy is available in the pool.
#[derive(Debug, Error)]
#[error("No proxy available in pool")]
pub struct NoProxyAvailable;

/// A proxy list provider could not be read or parsed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to fetch provider {source_name}: {error}")]
    Http {
        source_name: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("failed to read provider file {path}: {error}")]
    File {
        path: String,
        #[source]
        error: std::io::Error,
    },
    #[error("provider {source_name} returned status {status}")]
    Status { source_name: String, status: StatusCode },
    #[error("provider {source_name} returned an unrecognised document")]
    Parse { source_name: String },
}

/// A single HTTP exchange failed before a response was obtained.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid proxy endpoint {endpoint}: {error}")]
    InvalidProxy {
        endpoint: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("request timed out")]
    Timeout,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Why one attempt of a logical request was counted as failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("response body is not JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("response carries soft-block marker {0:?}")]
    SoftBlocked(String),
}

/// Failure of a dashboard retrieval.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Invalid Dune dashboard URL format")]
    InvalidUrl,
    #[error("Dashboard not found or access denied by Cloudflare.")]
    NotFound,
    #[error("No visualizations found in dashboard")]
    NoVisualizations,
}
