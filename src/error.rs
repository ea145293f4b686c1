//! Error types and handling for the weather advisory pipeline
//!
//! Each pipeline stage has its own error enum. [`RegionError`] wraps them
//! with one variant per stage so the stage is fixed at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pipeline stage at which a region failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Generate,
    Store,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Generate => "generate",
            Stage::Store => "store",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forecast retrieval and parsing failures
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid region code '{code}': {reason}")]
    InvalidRegionCode { code: String, reason: String },

    #[error("forecast request for {region_code} failed: {message}")]
    Request { region_code: String, message: String },

    #[error("forecast provider returned HTTP {status} for {region_code}")]
    Status { region_code: String, status: u16 },

    #[error("unparseable forecast for {region_code}: {message}")]
    Parse { region_code: String, message: String },

    #[error("forecast for {region_code} has no time series")]
    MissingTimeSeries { region_code: String },
}

/// Advisory generation failures
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Backoff exhausted while the provider kept signalling rate limiting
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("advisory generation failed: {message}")]
    Failed { message: String },

    /// Response did not match the `{advisory: string}` schema
    #[error("invalid advisory response: {message}")]
    InvalidResponse { message: String },
}

impl GenerationError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

/// Classification of document store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    PermissionDenied,
    NotFound,
    Unknown,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorKind::PermissionDenied => f.write_str("permission denied"),
            StoreErrorKind::NotFound => f.write_str("not found"),
            StoreErrorKind::Unknown => f.write_str("unknown"),
        }
    }
}

/// Persistence failure
#[derive(Error, Debug)]
#[error("store error ({kind}): {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new<S: Into<String>>(kind: StoreErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(StoreErrorKind::Unknown, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    /// Classify any backend error by looking for an I/O cause in its source chain.
    pub fn classify(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(io) = e.downcast_ref::<std::io::Error>() {
                let kind = match io.kind() {
                    std::io::ErrorKind::PermissionDenied => StoreErrorKind::PermissionDenied,
                    std::io::ErrorKind::NotFound => StoreErrorKind::NotFound,
                    _ => StoreErrorKind::Unknown,
                };
                return Self::new(kind, err.to_string());
            }
            current = e.source();
        }
        Self::unknown(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::unknown(format!("document encoding: {err}"))
    }
}

/// Per-user push delivery failure
#[derive(Error, Debug)]
pub enum PushError {
    #[error("invalid push token: {token}")]
    InvalidToken { token: String },

    #[error("push rejected by provider: {message}")]
    Rejected { message: String },

    #[error("push transport error: {message}")]
    Transport { message: String },
}

/// Failure of one region, tagged with the stage that produced it
#[derive(Error, Debug)]
pub enum RegionError {
    #[error("fetch stage: {0}")]
    Fetch(#[from] FetchError),

    #[error("generate stage: {0}")]
    Generate(#[from] GenerationError),

    #[error("store stage: {0}")]
    Store(#[from] StoreError),
}

impl RegionError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            RegionError::Fetch(_) => Stage::Fetch,
            RegionError::Generate(_) => Stage::Generate,
            RegionError::Store(_) => Stage::Store,
        }
    }
}

/// Top-level error for run-level failures
#[derive(Error, Debug)]
pub enum AdvisoryError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Input validation errors
    #[error("Invalid input: {message}")]
    Validation { message: String },

    /// Batch run aborted outside per-region isolation
    #[error("Batch error: {message}")]
    Batch { message: String },

    /// User directory query failed
    #[error("User query error: {source}")]
    Users {
        #[source]
        source: StoreError,
    },

    /// Document store failure outside a per-region boundary
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Delivery failure for a single notification
    #[error("Push error: {0}")]
    Push(#[from] PushError),

    /// Single-region processing failure surfaced directly (on-demand paths)
    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// General application errors
    #[error("Application error: {message}")]
    General { message: String },
}

impl AdvisoryError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn batch<S: Into<String>>(message: S) -> Self {
        Self::Batch {
            message: message.into(),
        }
    }

    /// Create a new general error
    pub fn general<S: Into<String>>(message: S) -> Self {
        Self::General {
            message: message.into(),
        }
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            AdvisoryError::Config { .. } => {
                "Configuration error. Please check your config file and credentials.".to_string()
            }
            AdvisoryError::Validation { message } => format!("Invalid input: {message}"),
            AdvisoryError::Batch { message } => format!("Batch run failed: {message}"),
            AdvisoryError::Users { .. } => "Unable to load notification recipients.".to_string(),
            AdvisoryError::Store(_) => "Document store operation failed.".to_string(),
            AdvisoryError::Push(err) => format!("Notification could not be delivered: {err}"),
            AdvisoryError::Region(err) => {
                format!("Processing failed at the {} stage: {err}", err.stage())
            }
            AdvisoryError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
            AdvisoryError::General { message } => message.clone(),
        }
    }
}
