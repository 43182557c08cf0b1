//! Provider capability declarations.
//!
//! Providers declare which clinical operations they support per resource
//! type. The selector probes these declarations before fan-out. A probe may
//! fail; [`probe`] folds the failure into [`CapabilitySupport::Unknown`]
//! rather than letting it escape as an error.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;

/// Resource type every record operation is addressed to.
pub const PATIENT_RESOURCE: &str = "Patient";

/// Clinical operations a provider may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Everything known about the patient.
    Everything,
    /// The structured clinical record.
    GetStructuredRecord,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Everything => write!(f, "Everything"),
            Operation::GetStructuredRecord => write!(f, "GetStructuredRecord"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "everything" | "$everything" => Ok(Operation::Everything),
            "getstructuredrecord" | "structured" | "$gpc.getstructuredrecord" => {
                Ok(Operation::GetStructuredRecord)
            }
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// Result of probing a provider for an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilitySupport {
    /// The provider declares the operation.
    Supported,
    /// The provider does not declare the operation.
    Unsupported,
    /// The probe itself failed.
    Unknown(String),
}

impl CapabilitySupport {
    /// Only an explicit declaration counts as support.
    pub fn is_supported(&self) -> bool {
        matches!(self, CapabilitySupport::Supported)
    }
}

/// Static capability metadata of a provider.
pub trait CapabilityDescriptor: Send + Sync {
    /// Returns whether the provider implements `operation` on `resource_type`.
    fn supports_operation(
        &self,
        resource_type: &str,
        operation: Operation,
    ) -> Result<bool, CapabilityError>;
}

/// Probes a descriptor, folding probe failures into `Unknown`.
pub fn probe(
    descriptor: &dyn CapabilityDescriptor,
    resource_type: &str,
    operation: Operation,
) -> CapabilitySupport {
    match descriptor.supports_operation(resource_type, operation) {
        Ok(true) => CapabilitySupport::Supported,
        Ok(false) => CapabilitySupport::Unsupported,
        Err(e) => CapabilitySupport::Unknown(e.to_string()),
    }
}

/// A fixed table of supported operations per resource type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCapabilities {
    operations: HashMap<String, HashSet<Operation>>,
}

impl StaticCapabilities {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `operation` on `resource_type`.
    pub fn with_operation(mut self, resource_type: impl Into<String>, operation: Operation) -> Self {
        self.operations
            .entry(resource_type.into())
            .or_default()
            .insert(operation);
        self
    }

    /// Declares `operation` on the Patient resource.
    pub fn with_patient_operation(self, operation: Operation) -> Self {
        self.with_operation(PATIENT_RESOURCE, operation)
    }
}

impl CapabilityDescriptor for StaticCapabilities {
    fn supports_operation(
        &self,
        resource_type: &str,
        operation: Operation,
    ) -> Result<bool, CapabilityError> {
        Ok(self
            .operations
            .get(resource_type)
            .is_some_and(|ops| ops.contains(&operation)))
    }
}
