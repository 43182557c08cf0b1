//! Audit and error reporting sinks.
//!
//! The coordinator reports through two injected collaborators:
//!
//! - [`AuditSink`] receives one [`AuditEvent`] per pipeline stage transition.
//!   Audit failures are logged and swallowed; they never fault a request.
//! - [`ErrorSink`] receives errors worth operator attention, at error or
//!   critical severity.
//!
//! The `Tracing*` implementations forward to `tracing`.

use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::error::AuditError;
use crate::types::CorrelationId;

/// Pipeline stages of one orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OrchestrationStage {
    /// Checking request shape.
    Validating,
    /// Access check, registry fetch and provider selection.
    Selecting,
    /// Concurrent provider calls.
    FanningOut,
    /// Merging provider results.
    Reconciling,
    /// Result returned to the caller.
    Completed,
    /// Terminal failure.
    Failed,
}

impl fmt::Display for OrchestrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestrationStage::Validating => "Validating",
            OrchestrationStage::Selecting => "Selecting",
            OrchestrationStage::FanningOut => "FanningOut",
            OrchestrationStage::Reconciling => "Reconciling",
            OrchestrationStage::Completed => "Completed",
            OrchestrationStage::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Event category, e.g. `federation`.
    pub category: String,
    /// Stage entered.
    pub stage: OrchestrationStage,
    /// Human-readable detail.
    pub detail: String,
    /// Serialized request parameters.
    pub extra: Value,
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

/// Receives lifecycle events.
pub trait AuditSink: Send + Sync {
    /// Records one event.
    fn log_information(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Receives errors worth operator attention.
pub trait ErrorSink: Send + Sync {
    /// Records an expected or recoverable failure.
    fn log_error(&self, error: &(dyn Error + 'static), correlation_id: Option<CorrelationId>);

    /// Records a storage or infrastructure failure.
    fn log_critical(&self, error: &(dyn Error + 'static), correlation_id: Option<CorrelationId>);
}

/// Emits audit events as `info` tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_information(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "recordhub::audit",
            category = %event.category,
            stage = %event.stage,
            correlation_id = %event.correlation_id,
            extra = %event.extra,
            "{}",
            event.detail
        );
        Ok(())
    }
}

/// Emits errors as `error` tracing events with the full source chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn log_error(&self, err: &(dyn Error + 'static), correlation_id: Option<CorrelationId>) {
        error!(
            correlation_id = ?correlation_id.map(|c| c.to_string()),
            chain = %error_chain(err),
            "{}",
            err
        );
    }

    fn log_critical(&self, err: &(dyn Error + 'static), correlation_id: Option<CorrelationId>) {
        error!(
            critical = true,
            correlation_id = ?correlation_id.map(|c| c.to_string()),
            chain = %error_chain(err),
            "{}",
            err
        );
    }
}

/// Renders an error and its sources as `outer: inner: root`.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
