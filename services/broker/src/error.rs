//! Error types shared across the broker.

use std::fmt;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::credentials::CodecError;
use crate::options::OptionsError;
use crate::store::StoreError;

/// Machine-checkable classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// The provider rejected the request parameters.
    InvalidParameters,
    /// An account or regional quota would be exceeded.
    QuotaExceeded,
    /// Transient failure: network error, 5xx, or the call timed out.
    ProviderUnavailable,
    /// The addressed resource does not exist.
    NotFound,
    /// The resource already exists or is in a conflicting state.
    Conflict,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParameters => "invalid_parameters",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
        }
    }

    /// Parse the error code a provider API returns in its error body.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().replace('-', "_").as_str() {
            "invalid_parameters" | "invalid_parameter_value" | "invalid_request" => {
                Some(Self::InvalidParameters)
            }
            "quota_exceeded" | "limit_exceeded" => Some(Self::QuotaExceeded),
            "provider_unavailable" | "service_unavailable" | "throttled" => {
                Some(Self::ProviderUnavailable)
            }
            "not_found" => Some(Self::NotFound),
            "conflict" | "already_exists" => Some(Self::Conflict),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidParameters, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::QuotaExceeded, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::ProviderUnavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Conflict, message)
    }

    /// Transient failures leave the persisted record untouched; the caller
    /// recovers by polling, never by resubmitting.
    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::ProviderUnavailable
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::unavailable(format!("provider request failed: {err}"))
    }
}

/// Result type for orchestrator operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors surfaced by the lifecycle orchestrator.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Bad options or plan mismatch. No provider call was made.
    #[error("{0}")]
    Validation(String),

    /// Duplicate identifier or concurrent operation on the same identifier.
    #[error("{0}")]
    Conflict(String),

    /// Unknown instance identifier.
    #[error("{0}")]
    NotFound(String),

    /// The provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Credential encryption or decryption failed.
    #[error("credential error: {0}")]
    Encryption(#[from] CodecError),

    /// Persistence or other internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for BrokerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(id) => Self::Conflict(format!("instance {id} already exists")),
            StoreError::NotFound(id) => Self::NotFound(format!("instance {id} not found")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<OptionsError> for BrokerError {
    fn from(err: OptionsError) -> Self {
        Self::Validation(format!("Invalid parameters. Error: {err}"))
    }
}

impl From<CatalogError> for BrokerError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownPlan(_) => Self::Validation(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(ProviderError::unavailable("timed out").is_transient());
        assert!(!ProviderError::quota_exceeded("too many clusters").is_transient());
        assert!(!ProviderError::invalid_parameters("bad version").is_transient());
    }

    #[test]
    fn test_kind_from_code() {
        assert_eq!(
            ProviderErrorKind::from_code("QUOTA-EXCEEDED"),
            Some(ProviderErrorKind::QuotaExceeded)
        );
        assert_eq!(
            ProviderErrorKind::from_code("already_exists"),
            Some(ProviderErrorKind::Conflict)
        );
        assert_eq!(ProviderErrorKind::from_code("teapot"), None);
    }

    #[test]
    fn test_store_errors_keep_their_class() {
        let err: BrokerError = StoreError::Conflict("abc".into()).into();
        assert!(matches!(err, BrokerError::Conflict(_)));

        let err: BrokerError = StoreError::NotFound("abc".into()).into();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }
}
