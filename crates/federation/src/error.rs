//! Error types for the federation engine.
//!
//! Errors are grouped by the pipeline stage that raises them. Validation,
//! access and selection errors are expected domain failures and surface before
//! any provider is called. Provider errors never reach the caller directly:
//! they are captured per call, aggregated and logged. Reconciliation and
//! infrastructure errors are fatal to the request.
//!
//! # Error classes
//!
//! | Error | Class |
//! |-------|-------|
//! | `Validation` | BadRequest |
//! | `Selection` | BadRequest |
//! | `Access::Denied` | Forbidden |
//! | `Access::Unavailable` | ServiceError |
//! | `Reconciliation` | ServiceError |
//! | `Infrastructure` | ServiceError |
//! | `Cancelled` | Cancelled |

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::types::ProtocolVersion;

/// The umbrella error returned by the orchestration coordinator.
#[derive(Error, Debug)]
pub enum FederationError {
    /// Malformed request input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Consumer may not access the requested record.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Provider registry does not yield a usable provider set.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// No authoritative base to reconcile from.
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    /// Unexpected failure outside the domain taxonomy.
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    /// The caller cancelled the request.
    #[error("request cancelled by caller")]
    Cancelled,
}

/// Coarse classification used by API boundaries to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input (4xx-equivalent).
    BadRequest,
    /// Access forbidden (403-equivalent).
    Forbidden,
    /// Service fault (5xx-equivalent).
    ServiceError,
    /// Request abandoned by the caller.
    Cancelled,
}

/// Severity at which an error is reported to the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected or recoverable failure.
    Error,
    /// Storage or infrastructure failure needing operator attention.
    Critical,
}

impl FederationError {
    /// Returns the boundary classification for this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            FederationError::Validation(_) | FederationError::Selection(_) => {
                ErrorClass::BadRequest
            }
            FederationError::Access(AccessError::Denied { .. }) => ErrorClass::Forbidden,
            FederationError::Access(AccessError::Unavailable { .. })
            | FederationError::Reconciliation(_)
            | FederationError::Infrastructure(_) => ErrorClass::ServiceError,
            FederationError::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Returns the severity this error should be logged at.
    pub fn severity(&self) -> Severity {
        match self {
            FederationError::Infrastructure(InfrastructureError::Registry { .. }) => {
                Severity::Critical
            }
            _ => Severity::Error,
        }
    }
}

/// Errors raised while validating request input.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("patient identifier is required")]
    MissingPatientIdentifier,

    #[error("invalid patient identifier '{identifier}': {message}")]
    InvalidPatientIdentifier { identifier: String, message: String },

    #[error("invalid correlation id: {value}")]
    InvalidCorrelationId { value: String },

    #[error("invalid filter '{parameter}': {message}")]
    InvalidFilter { parameter: String, message: String },

    #[error("operation {operation} is not available for protocol version {protocol_version}")]
    UnsupportedOperation {
        operation: String,
        protocol_version: ProtocolVersion,
    },
}

/// Errors raised by the access validator.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("access denied: consumer {consumer} cannot access records for patient {patient}")]
    Denied { consumer: String, patient: String },

    #[error("access validator unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors raised while selecting the provider set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No active primary provider found. One active primary provider required.")]
    NoPrimaryProvider,

    #[error(
        "Multiple active primary providers found. One active primary provider required. Active providers: {}",
        .providers.join(", ")
    )]
    MultiplePrimaryProviders { providers: Vec<String> },
}

/// Which cancellation source stopped a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationScope {
    /// The caller's request-wide token.
    Caller,
    /// The per-provider wait bound.
    ProviderTimeout,
}

impl fmt::Display for CancellationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationScope::Caller => write!(f, "caller"),
            CancellationScope::ProviderTimeout => write!(f, "provider timeout"),
        }
    }
}

/// A cooperative cancellation signal observed during a provider call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled by {scope}")]
pub struct OperationCancelled {
    pub scope: CancellationScope,
}

/// Errors raised by a provider handle while serving a call.
#[derive(Error, Debug)]
pub enum ProviderCallError {
    /// The handle observed its cancellation token and stopped.
    #[error("provider call observed cancellation")]
    Cancelled,

    #[error("transport error calling {endpoint}: {message}")]
    Transport {
        endpoint: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("provider responded with HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid provider response: {message}")]
    InvalidResponse { message: String },

    #[error("provider task aborted: {message}")]
    TaskAborted { message: String },
}

/// The error half of a fan-out outcome.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The per-provider wait bound elapsed.
    #[error("Provider call exceeded {limit_ms} milliseconds.")]
    Timeout {
        provider: String,
        limit_ms: u64,
        #[source]
        source: OperationCancelled,
    },

    /// The caller's cancellation fired before or during the call.
    #[error("provider {provider} call cancelled")]
    Cancelled {
        provider: String,
        #[source]
        source: OperationCancelled,
    },

    /// The provider failed for any other reason.
    #[error("provider {provider} call failed: {source}")]
    Failed {
        provider: String,
        #[source]
        source: ProviderCallError,
    },
}

impl ProviderError {
    pub(crate) fn timeout(provider: impl Into<String>, limit_ms: u64) -> Self {
        ProviderError::Timeout {
            provider: provider.into(),
            limit_ms,
            source: OperationCancelled {
                scope: CancellationScope::ProviderTimeout,
            },
        }
    }

    pub(crate) fn cancelled(provider: impl Into<String>) -> Self {
        ProviderError::Cancelled {
            provider: provider.into(),
            source: OperationCancelled {
                scope: CancellationScope::Caller,
            },
        }
    }

    pub(crate) fn failed(provider: impl Into<String>, source: ProviderCallError) -> Self {
        ProviderError::Failed {
            provider: provider.into(),
            source,
        }
    }

    /// Returns the name of the provider that produced this error.
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Timeout { provider, .. }
            | ProviderError::Cancelled { provider, .. }
            | ProviderError::Failed { provider, .. } => provider,
        }
    }

    /// Returns true if this error is a per-provider timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }

    /// Returns true if this error is a caller cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled { .. })
    }
}

/// All provider errors from one fan-out, logged as a single event.
#[derive(Error, Debug)]
#[error("One or more provider calls failed or timed out.")]
pub struct AggregateProviderError {
    pub errors: Vec<ProviderError>,
}

impl AggregateProviderError {
    /// Number of wrapped errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns true if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of wrapped timeouts.
    pub fn timeout_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_timeout()).count()
    }
}

/// Errors raised while reconciling provider results.
#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error(
        "no successful result from primary provider {primary}; reconciliation has no authoritative base"
    )]
    PrimaryResultMissing { primary: String },

    #[error("primary provider {primary} produced {count} results, expected exactly one")]
    AmbiguousPrimary { primary: String, count: usize },

    #[error("result from primary provider {primary} does not carry its provenance tag")]
    PrimaryProvenanceMissing { primary: String },

    #[error("provenance tag of primary provider {primary} is also carried by {}", .providers.join(", "))]
    PrimaryProvenanceShared {
        primary: String,
        providers: Vec<String>,
    },

    #[error("no reconciliation strategy registered for protocol version {protocol_version}")]
    UnsupportedProtocol { protocol_version: ProtocolVersion },

    #[error("reconciliation strategy {strategy} failed: {message}")]
    Strategy { strategy: String, message: String },
}

/// Errors from the provider registry collaborator.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read provider registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse provider registry: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },

    #[error("provider registry unavailable: {message}")]
    Unavailable { message: String },
}

/// Unexpected failures, reported to callers as a generic service error.
#[derive(Error, Debug)]
pub enum InfrastructureError {
    #[error("service error, contact support (provider registry: {source})")]
    Registry {
        #[source]
        source: RegistryError,
    },

    #[error("service error, contact support ({message})")]
    Unexpected {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Failure reported by an audit sink. Never propagated into the pipeline.
#[derive(Error, Debug)]
#[error("audit sink failed: {message}")]
pub struct AuditError {
    pub message: String,
}

/// Failure reported by a capability probe.
#[derive(Error, Debug, Clone)]
#[error("capability probe failed for {provider}: {message}")]
pub struct CapabilityError {
    pub provider: String,
    pub message: String,
}

/// A registry entry whose endpoint cannot back an HTTP provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("provider {provider} has an unusable endpoint '{endpoint}': {message}")]
pub struct EndpointError {
    pub provider: String,
    pub endpoint: String,
    pub message: String,
}

/// Invalid engine configuration, reported when building a coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid federation configuration: {}", .errors.join("; "))]
pub struct ConfigError {
    pub errors: Vec<String>,
}

/// Result type alias for coordinator operations.
pub type FederationResult<T> = Result<T, FederationError>;

/// Result type alias for provider handle calls.
pub type ProviderCallResult<T> = Result<T, ProviderCallError>;

impl From<RegistryError> for FederationError {
    fn from(err: RegistryError) -> Self {
        FederationError::Infrastructure(InfrastructureError::Registry { source: err })
    }
}

impl From<reqwest::Error> for ProviderCallError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if err.is_decode() {
            return ProviderCallError::InvalidResponse {
                message: err.to_string(),
            };
        }
        ProviderCallError::Transport {
            endpoint,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
