//! Error types for the Kafka provider.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::schema::{Diagnostic, DiagnosticSeverity};

/// Errors that can occur while serving provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider has not been configured yet.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker client failed before any per-topic result was available.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A handler reported one or more error diagnostics.
    #[error("{}", summarize(.0))]
    Diagnostics(Vec<Diagnostic>),
}

impl ProviderError {
    /// Turn the error into the diagnostics reported back to the host.
    ///
    /// Handler diagnostics are passed through untouched; every other variant
    /// becomes a single error diagnostic carrying the display message.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            Self::Diagnostics(diagnostics) => diagnostics,
            other => vec![Diagnostic::error(other.to_string())],
        }
    }
}

/// Collapse a list of diagnostics into one line.
fn summarize(diagnostics: &[Diagnostic]) -> String {
    let errors: Vec<String> = diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .map(|d| match &d.detail {
            Some(detail) => format!("{}: {}", d.summary, detail),
            None => d.summary.clone(),
        })
        .collect();

    match errors.len() {
        0 => "no error diagnostics".to_string(),
        1 => errors[0].clone(),
        n => format!("{} errors: {}", n, errors.join("; ")),
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::NotConfigured(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Broker(err) => tonic::Status::unavailable(err.to_string()),
            ProviderError::Diagnostics(diagnostics) => {
                tonic::Status::internal(summarize(&diagnostics))
            },
        }
    }
}
