//! Error taxonomy for generation jobs.
//!
//! Every failure that reaches the orchestrator is reduced to a
//! [`GenerationError`] with one of three severities:
//!
//! | Severity | Meaning | Retried |
//! |----------|---------|---------|
//! | `validation` | caller input is wrong | never |
//! | `transient` | timeout, rate limit, network, unavailable service | by the retry wrapper |
//! | `permanent` | a generation step failed deterministically | never |
//!
//! [`classify`] is the single decision point the pipeline consults.

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Error;
use crate::database::retry::is_transient_sqlx_error;
use crate::generation::providers::ProviderError;

/// Severity of a generation error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Validation,
    Transient,
    Permanent,
}

/// Closed set of error kinds known to the orchestrator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Validation
    InvalidRequest,
    EmptyItems,
    TooManyItems,
    DuplicateSubmission,
    TooManyActiveJobs,
    NotFound,
    // Transient
    Timeout,
    RateLimited,
    Network,
    ServiceUnavailable,
    StorageBusy,
    // Permanent
    GenerationFailed,
    InvalidResponse,
    StorageFailed,
    Aborted,
    Internal,
}

impl ErrorKind {
    /// The fixed severity of this kind.
    pub fn severity(self) -> Severity {
        match self {
            Self::InvalidRequest
            | Self::EmptyItems
            | Self::TooManyItems
            | Self::DuplicateSubmission
            | Self::TooManyActiveJobs
            | Self::NotFound => Severity::Validation,
            Self::Timeout
            | Self::RateLimited
            | Self::Network
            | Self::ServiceUnavailable
            | Self::StorageBusy => Severity::Transient,
            Self::GenerationFailed
            | Self::InvalidResponse
            | Self::StorageFailed
            | Self::Aborted
            | Self::Internal => Severity::Permanent,
        }
    }
}

/// A classified error.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let severity = kind.severity();
        Self {
            kind,
            severity,
            message: message.into(),
            retryable: severity == Severity::Transient,
            cause: None,
            context: BTreeMap::new(),
        }
    }

    pub fn validation(kind: ErrorKind, message: impl Into<String>) -> Self {
        debug_assert_eq!(kind.severity(), Severity::Validation);
        Self::new(kind, message)
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_validation(&self) -> bool {
        self.severity == Severity::Validation
    }

    pub fn is_transient(&self) -> bool {
        self.severity == Severity::Transient
    }

    pub fn is_permanent(&self) -> bool {
        self.severity == Severity::Permanent
    }
}

/// Map an HTTP-like status code onto the taxonomy.
///
/// 408 and 429 and gateway errors are transient, any other 4xx is a
/// validation error, everything else is permanent.
pub fn classify_status(status: u16, message: impl Into<String>) -> GenerationError {
    let kind = match status {
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimited,
        502..=504 => ErrorKind::ServiceUnavailable,
        404 => ErrorKind::NotFound,
        400..=499 => ErrorKind::InvalidRequest,
        _ => ErrorKind::GenerationFailed,
    };
    GenerationError::new(kind, message).with_context("status", status.to_string())
}

/// Classify a collaborator error.
pub fn classify_provider(err: &ProviderError) -> GenerationError {
    let message = err.to_string();
    match err {
        ProviderError::Timeout(_) => GenerationError::new(ErrorKind::Timeout, message),
        ProviderError::RateLimited { .. } => GenerationError::new(ErrorKind::RateLimited, message),
        ProviderError::Network(_) => GenerationError::new(ErrorKind::Network, message),
        ProviderError::Unavailable { .. } => {
            GenerationError::new(ErrorKind::ServiceUnavailable, message)
        }
        ProviderError::Status { status, .. } => classify_status(*status, message),
        ProviderError::Rejected(_) => GenerationError::new(ErrorKind::GenerationFailed, message),
        ProviderError::InvalidResponse(_) => {
            GenerationError::new(ErrorKind::InvalidResponse, message)
        }
    }
}

fn classify_io(err: &io::Error) -> GenerationError {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => ErrorKind::Network,
        _ => ErrorKind::Internal,
    };
    GenerationError::new(kind, err.to_string())
}

/// Classify any application error onto the taxonomy.
///
/// Already-classified errors pass through unchanged; typed collaborator and
/// driver errors go through their mapping tables; anything else is permanent.
pub fn classify(err: &Error) -> GenerationError {
    match err {
        Error::Generation(inner) => inner.clone(),
        Error::Provider(inner) => classify_provider(inner),
        Error::DatabaseSqlx(inner) => {
            let kind = if is_transient_sqlx_error(inner) {
                ErrorKind::StorageBusy
            } else {
                ErrorKind::StorageFailed
            };
            GenerationError::new(kind, "storage operation failed").with_cause(inner)
        }
        Error::Database(msg) => GenerationError::new(ErrorKind::StorageFailed, msg.clone()),
        Error::Migration(inner) => {
            GenerationError::new(ErrorKind::StorageFailed, "schema migration failed")
                .with_cause(inner)
        }
        Error::Validation(msg) => GenerationError::new(ErrorKind::InvalidRequest, msg.clone()),
        Error::NotFound { entity_type, id } => {
            GenerationError::new(ErrorKind::NotFound, format!("{entity_type} {id} not found"))
        }
        Error::Io(inner) => classify_io(inner),
        Error::InvalidStateTransition { .. }
        | Error::Serialization(_)
        | Error::Configuration(_)
        | Error::Other(_) => GenerationError::new(ErrorKind::Internal, err.to_string()),
    }
}
