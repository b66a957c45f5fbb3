//! Error types for sg-alerts
//!
//! Suppression outcomes (cooldown, low confidence, judge rejection) are not
//! errors; they are recorded decisions. See [`crate::pipeline::SuppressionReason`].

use std::time::Duration;
use thiserror::Error;

/// Malformed inbound event; reported to the caller, never recorded or retried
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown event_type '{0}'")]
    UnknownEventType(String),

    #[error("camera_id is missing or empty")]
    MissingCameraId,

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("confidence is missing or not a number")]
    ConfidenceNotNumeric,

    #[error("timestamp '{0}' is not a valid RFC 3339 instant")]
    InvalidTimestamp(String),

    #[error("malformed event body: {0}")]
    MalformedBody(String),
}

/// Judge or voice service failure; always recovered by the local strategy
#[derive(Error, Debug)]
pub enum ExternalServiceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service returned HTTP {0}")]
    Status(u16),

    #[error("could not decode service response: {0}")]
    Decode(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Incident log append failure
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("incident log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("incident record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Main error type for sg-alerts
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Common error: {0}")]
    Common(#[from] sg_common::Error),
}

/// Convenience Result type using sg-alerts Error
pub type Result<T> = std::result::Result<T, Error>;
