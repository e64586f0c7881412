//! Error types for the fallible outer surfaces of the crate.
//!
//! The reconciler, progress split and record normalization never fail; they
//! degrade to empty or best-effort results. Only the data-service client,
//! shipment validation and file input of the replay tool return errors.

use thiserror::Error;

/// Result type for shipment-tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors that can occur when talking to the shipment data service or
/// validating user-supplied data.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Transport-level failure (connect, timeout, body download)
    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Retries were exhausted (transport errors or 429s)
    #[error("Max retries exceeded for {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A shipment failed validation before being sent
    #[error("Invalid shipment: {0}")]
    InvalidShipment(String),

    /// The geocoder had no result for an address
    #[error("No coordinates found for address '{0}'")]
    GeocodeNotFound(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        TrackerError::Http(err.to_string())
    }
}
