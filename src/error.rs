//! Error types for Datom-View
//!
//! Every public operation fails with one [`Error`] variant. Failures that the
//! service reports as structured anomalies keep their category and message so
//! callers can tell a timeout from a transport fault.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for Datom-View operations
pub type Result<T> = std::result::Result<T, Error>;

/// Anomaly category, spelled the way the service reports it
/// (`:cognitect.anomalies/<category>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyCategory {
    Unavailable,
    Interrupted,
    Incorrect,
    Forbidden,
    Unsupported,
    NotFound,
    Conflict,
    Fault,
    Busy,
}

impl AnomalyCategory {
    /// Keyword spelling, e.g. `:cognitect.anomalies/interrupted`
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Unavailable => ":cognitect.anomalies/unavailable",
            Self::Interrupted => ":cognitect.anomalies/interrupted",
            Self::Incorrect => ":cognitect.anomalies/incorrect",
            Self::Forbidden => ":cognitect.anomalies/forbidden",
            Self::Unsupported => ":cognitect.anomalies/unsupported",
            Self::NotFound => ":cognitect.anomalies/not-found",
            Self::Conflict => ":cognitect.anomalies/conflict",
            Self::Fault => ":cognitect.anomalies/fault",
            Self::Busy => ":cognitect.anomalies/busy",
        }
    }
}

/// Structured (category, message) error payload returned by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Anomaly category
    #[serde(rename = "cognitect.anomalies/category")]
    pub category: AnomalyCategory,
    /// Human readable message
    #[serde(rename = "cognitect.anomalies/message")]
    pub message: String,
}

impl Anomaly {
    /// Message used for client-side deadline expiry
    pub const TIMEOUT_MESSAGE: &'static str = "Client Timeout";

    /// Create a new anomaly
    pub fn new(category: AnomalyCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Anomaly reported when an operation exceeds its deadline
    pub fn timeout() -> Self {
        Self::new(AnomalyCategory::Interrupted, Self::TIMEOUT_MESSAGE)
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Stable discriminant of an [`Error`], for matching without payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Unsupported,
    InvalidArgument,
    Timeout,
    Interrupted,
    FilterCombinationUnsupported,
    UnsupportedIndex,
    RemoteFailure,
    Configuration,
    Serialization,
}

/// Main error type for Datom-View
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Missing database or system
    #[error("{0}")]
    NotFound(String),

    /// Authentication or authorization failure
    #[error("{message}")]
    Forbidden {
        /// HTTP-like status when the service supplied one
        status: Option<u16>,
        /// Failure message
        message: String,
    },

    /// Operation not implemented by this backend variant
    #[error("{0}")]
    Unsupported(String),

    /// Input rejected before contacting the service
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation exceeded its deadline
    #[error("{0}")]
    Timeout(Anomaly),

    /// Operation was interrupted before it completed
    #[error("{0}")]
    Interrupted(Anomaly),

    /// `with` combined with as-of/since on a backend that cannot serve it
    #[error("Filter combination unsupported: {0}")]
    FilterCombinationUnsupported(String),

    /// Index order not applicable to the requested attribute
    #[error("Unsupported index: {0}")]
    UnsupportedIndex(String),

    /// Catch-all service or transport failure
    #[error("Remote failure: {0}")]
    Remote(Anomaly),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden { .. } => ErrorKind::Forbidden,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Interrupted(_) => ErrorKind::Interrupted,
            Error::FilterCombinationUnsupported(_) => ErrorKind::FilterCombinationUnsupported,
            Error::UnsupportedIndex(_) => ErrorKind::UnsupportedIndex,
            Error::Remote(_) => ErrorKind::RemoteFailure,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Structured anomaly payload, if this error carries one
    pub fn anomaly(&self) -> Option<&Anomaly> {
        match self {
            Error::Timeout(a) | Error::Interrupted(a) | Error::Remote(a) => Some(a),
            _ => None,
        }
    }

    /// True for deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub(crate) fn limit_zero() -> Self {
        Error::InvalidArgument("limit can't be 0. Set limit to -1 to retrieve all".to_string())
    }

    pub(crate) fn db_not_found(db_name: &str) -> Self {
        Error::NotFound(format!("Db not found: {db_name}"))
    }
}

impl From<Anomaly> for Error {
    fn from(anomaly: Anomaly) -> Self {
        match anomaly.category {
            AnomalyCategory::NotFound => Error::NotFound(anomaly.message),
            AnomalyCategory::Forbidden => Error::Forbidden {
                status: None,
                message: anomaly.message,
            },
            AnomalyCategory::Unsupported => Error::Unsupported(anomaly.message),
            AnomalyCategory::Interrupted => Error::Timeout(anomaly),
            _ => Error::Remote(anomaly),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
