//! Caller-facing status classes.
//!
//! The protocol layer turns these into wire responses; this module only
//! decides which class an outcome or error belongs to.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::adapter::{Credentials, OperationMode};
use crate::broker::{LastOperation, OperationOutcome};
use crate::error::{BrokerError, ProviderErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// Accepted; poll last-operation for the result.
    Accepted,
    Success,
    ClientError,
    NotFound,
    Conflict,
    ServerError,
}

impl StatusClass {
    /// Conventional HTTP status for the class.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Accepted => 202,
            Self::Success => 200,
            Self::ClientError => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::ServerError => 500,
        }
    }
}

impl From<&BrokerError> for StatusClass {
    fn from(err: &BrokerError) -> Self {
        match err {
            BrokerError::Validation(_) => Self::ClientError,
            BrokerError::Conflict(_) => Self::Conflict,
            BrokerError::NotFound(_) => Self::NotFound,
            BrokerError::Provider(e) => match e.kind {
                ProviderErrorKind::InvalidParameters | ProviderErrorKind::QuotaExceeded => {
                    Self::ClientError
                }
                ProviderErrorKind::NotFound => Self::NotFound,
                ProviderErrorKind::Conflict => Self::Conflict,
                ProviderErrorKind::ProviderUnavailable => Self::ServerError,
            },
            BrokerError::Encryption(_) | BrokerError::Internal(_) => Self::ServerError,
        }
    }
}

impl From<OperationMode> for StatusClass {
    fn from(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Async => Self::Accepted,
            OperationMode::Sync => Self::Success,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LastOperationBody {
    pub state: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerResponse {
    pub class: StatusClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperationBody>,
}

impl BrokerResponse {
    fn new(class: StatusClass) -> Self {
        Self {
            class,
            message: None,
            credentials: None,
            last_operation: None,
        }
    }

    pub fn from_error(err: &BrokerError) -> Self {
        Self {
            message: Some(err.to_string()),
            ..Self::new(err.into())
        }
    }

    /// Response to create, modify or delete.
    pub fn from_outcome(result: Result<OperationOutcome, BrokerError>) -> Self {
        match result {
            Ok(outcome) => Self {
                message: Some(format!("Instance is {}", outcome.status)),
                ..Self::new(outcome.mode.into())
            },
            Err(err) => Self::from_error(&err),
        }
    }

    pub fn from_bind(result: Result<Credentials, BrokerError>) -> Self {
        match result {
            Ok(credentials) => Self {
                credentials: Some(credentials.into_map()),
                ..Self::new(StatusClass::Success)
            },
            Err(err) => Self::from_error(&err),
        }
    }

    pub fn from_last_operation(result: Result<LastOperation, BrokerError>) -> Self {
        match result {
            Ok(op) => Self {
                last_operation: Some(LastOperationBody {
                    state: op.state.as_str().to_string(),
                    description: op.description,
                }),
                ..Self::new(StatusClass::Success)
            },
            Err(err) => Self::from_error(&err),
        }
    }
}
