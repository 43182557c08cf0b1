//! Logical record requests.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::Operation;
use crate::error::ValidationError;

use super::registry::ProtocolVersion;

/// Maximum accepted length of a patient identifier.
pub const MAX_PATIENT_IDENTIFIER_LEN: usize = 64;

/// Per-request trace identifier.
///
/// Generated once at orchestration entry (or taken from the caller) and never
/// mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a caller-supplied correlation id.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|_| ValidationError::InvalidCorrelationId {
                value: value.to_string(),
            })
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional narrowing of a record request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilters {
    /// Clinical period start (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<NaiveDate>,

    /// Clinical period end (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<NaiveDate>,

    /// Only content changed after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,

    /// Resource types to include. Empty means everything.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,
}

impl RecordFilters {
    /// Checks the filters for internal consistency.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(start), Some(end)) = (self.period_start, self.period_end)
            && start > end
        {
            return Err(ValidationError::InvalidFilter {
                parameter: "period".to_string(),
                message: format!("start {start} is after end {end}"),
            });
        }

        if let Some(bad) = self
            .resource_types
            .iter()
            .find(|t| t.is_empty() || !t.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(ValidationError::InvalidFilter {
                parameter: "resourceTypes".to_string(),
                message: format!("'{bad}' is not a resource type name"),
            });
        }

        Ok(())
    }
}

/// A logical request for one patient's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    /// Patient identifier, e.g. a national health number.
    pub patient_identifier: String,

    /// Dialect whose providers should answer.
    pub protocol_version: ProtocolVersion,

    /// Clinical operation to perform.
    pub operation: Operation,

    /// Optional filters.
    #[serde(default)]
    pub filters: RecordFilters,

    /// Caller-supplied correlation id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl RecordRequest {
    /// Creates a request with no filters and no correlation id.
    pub fn new(
        patient_identifier: impl Into<String>,
        protocol_version: ProtocolVersion,
        operation: Operation,
    ) -> Self {
        Self {
            patient_identifier: patient_identifier.into(),
            protocol_version,
            operation,
            filters: RecordFilters::default(),
            correlation_id: None,
        }
    }

    /// Sets the filters.
    pub fn with_filters(mut self, filters: RecordFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the caller-supplied correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Returns the caller's correlation id, or a fresh one if none was supplied.
    pub fn resolve_correlation_id(&self) -> Result<CorrelationId, ValidationError> {
        match &self.correlation_id {
            Some(value) => CorrelationId::parse(value),
            None => Ok(CorrelationId::new()),
        }
    }

    /// Checks the identifier and filters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let identifier = self.patient_identifier.trim();
        if identifier.is_empty() {
            return Err(ValidationError::MissingPatientIdentifier);
        }
        if identifier.len() > MAX_PATIENT_IDENTIFIER_LEN {
            return Err(ValidationError::InvalidPatientIdentifier {
                identifier: identifier.to_string(),
                message: format!("longer than {MAX_PATIENT_IDENTIFIER_LEN} characters"),
            });
        }
        if identifier.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidPatientIdentifier {
                identifier: identifier.to_string(),
                message: "contains whitespace".to_string(),
            });
        }
        self.filters.validate()
    }
}
