//! Protocol dialect adapters.
//!
//! The selector, executor and reconciler are generic over the protocol
//! version. A [`DialectAdapter`] is the only place that knows how one dialect
//! names its operations and parameters; it turns a [`RecordRequest`] into the
//! [`ProviderCall`] every provider of that dialect receives.
//!
//! | Dialect | Operation | Operation name | Parameters |
//! |---------|-----------|----------------|------------|
//! | STU3 | GetStructuredRecord | `$gpc.getstructuredrecord` | `patientNHSNumber`, `includeAllergies`, `includeMedication` |
//! | R4 | GetStructuredRecord | `$gpc.getstructuredrecord` | as STU3 |
//! | R4 | Everything | `$everything` | `patient`, `start`, `end`, `_since`, `_type` |

use serde_json::{Value, json};

use crate::core::{Operation, PATIENT_RESOURCE, ProviderCall};
use crate::error::ValidationError;
use crate::types::{CorrelationId, ProtocolVersion, RecordFilters, RecordRequest};

/// Identifier system for patient identifiers sent to providers.
pub const NHS_NUMBER_SYSTEM: &str = "https://fhir.nhs.uk/Id/nhs-number";

const STRUCTURED_RECORD_OPERATION: &str = "$gpc.getstructuredrecord";
const EVERYTHING_OPERATION: &str = "$everything";

const ALLERGY_RESOURCE: &str = "AllergyIntolerance";
const MEDICATION_RESOURCES: [&str; 3] =
    ["MedicationStatement", "MedicationRequest", "Medication"];

/// Translates logical requests into one dialect's call shape.
pub trait DialectAdapter: Send + Sync {
    /// Dialect handled by this adapter.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Returns true if the dialect defines `operation`.
    fn supports(&self, operation: Operation) -> bool;

    /// Builds the provider call for a validated request.
    fn translate(
        &self,
        request: &RecordRequest,
        correlation_id: CorrelationId,
    ) -> Result<ProviderCall, ValidationError>;
}

/// Returns the adapter for a dialect.
pub fn adapter_for(protocol_version: ProtocolVersion) -> &'static dyn DialectAdapter {
    match protocol_version {
        ProtocolVersion::Stu3 => &Stu3Dialect,
        ProtocolVersion::R4 => &R4Dialect,
    }
}

/// FHIR STU3 structured record dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stu3Dialect;

impl DialectAdapter for Stu3Dialect {
    fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::Stu3
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(operation, Operation::GetStructuredRecord)
    }

    fn translate(
        &self,
        request: &RecordRequest,
        correlation_id: CorrelationId,
    ) -> Result<ProviderCall, ValidationError> {
        ensure_supported(self, request)?;
        if request.filters.since.is_some() {
            return Err(ValidationError::InvalidFilter {
                parameter: "since".to_string(),
                message: "not supported by the stu3 structured record".to_string(),
            });
        }

        Ok(ProviderCall {
            operation: request.operation,
            resource_type: PATIENT_RESOURCE.to_string(),
            operation_name: STRUCTURED_RECORD_OPERATION.to_string(),
            patient_identifier: request.patient_identifier.trim().to_string(),
            parameters: structured_record_parameters(request)?,
            correlation_id,
        })
    }
}

/// FHIR R4 dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct R4Dialect;

impl DialectAdapter for R4Dialect {
    fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::R4
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(
            operation,
            Operation::Everything | Operation::GetStructuredRecord
        )
    }

    fn translate(
        &self,
        request: &RecordRequest,
        correlation_id: CorrelationId,
    ) -> Result<ProviderCall, ValidationError> {
        ensure_supported(self, request)?;

        let (operation_name, parameters) = match request.operation {
            Operation::Everything => (EVERYTHING_OPERATION, everything_parameters(request)),
            Operation::GetStructuredRecord => {
                if request.filters.since.is_some() {
                    return Err(ValidationError::InvalidFilter {
                        parameter: "since".to_string(),
                        message: "not supported by the structured record".to_string(),
                    });
                }
                (
                    STRUCTURED_RECORD_OPERATION,
                    structured_record_parameters(request)?,
                )
            }
        };

        Ok(ProviderCall {
            operation: request.operation,
            resource_type: PATIENT_RESOURCE.to_string(),
            operation_name: operation_name.to_string(),
            patient_identifier: request.patient_identifier.trim().to_string(),
            parameters,
            correlation_id,
        })
    }
}

fn ensure_supported(
    adapter: &dyn DialectAdapter,
    request: &RecordRequest,
) -> Result<(), ValidationError> {
    if adapter.supports(request.operation) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedOperation {
            operation: request.operation.to_string(),
            protocol_version: adapter.protocol_version(),
        })
    }
}

fn patient_identifier_parameter(request: &RecordRequest) -> Value {
    json!({
        "name": "patientNHSNumber",
        "valueIdentifier": {
            "system": NHS_NUMBER_SYSTEM,
            "value": request.patient_identifier.trim(),
        }
    })
}

fn wants(filters: &RecordFilters, resource_type: &str) -> bool {
    filters.resource_types.is_empty() || filters.resource_types.iter().any(|t| t == resource_type)
}

fn structured_record_parameters(request: &RecordRequest) -> Result<Value, ValidationError> {
    let filters = &request.filters;

    if let Some(unknown) = filters.resource_types.iter().find(|t| {
        t.as_str() != ALLERGY_RESOURCE && !MEDICATION_RESOURCES.contains(&t.as_str())
    }) {
        return Err(ValidationError::InvalidFilter {
            parameter: "resourceTypes".to_string(),
            message: format!("{unknown} cannot be requested from the structured record"),
        });
    }

    let mut parameters = vec![patient_identifier_parameter(request)];

    if wants(filters, ALLERGY_RESOURCE) {
        parameters.push(json!({
            "name": "includeAllergies",
            "part": [{ "name": "includeResolvedAllergies", "valueBoolean": true }]
        }));
    }

    if MEDICATION_RESOURCES.iter().any(|r| wants(filters, r)) {
        let mut part = vec![json!({ "name": "includePrescriptionIssues", "valueBoolean": true })];
        if let Some(start) = filters.period_start {
            part.push(json!({
                "name": "medicationSearchFromDate",
                "valueDate": start.to_string(),
            }));
        }
        parameters.push(json!({ "name": "includeMedication", "part": part }));
    }

    Ok(json!({ "resourceType": "Parameters", "parameter": parameters }))
}

fn everything_parameters(request: &RecordRequest) -> Value {
    let filters = &request.filters;
    let mut parameters = vec![json!({
        "name": "patient",
        "valueString": request.patient_identifier.trim(),
    })];

    if let Some(start) = filters.period_start {
        parameters.push(json!({ "name": "start", "valueDate": start.to_string() }));
    }
    if let Some(end) = filters.period_end {
        parameters.push(json!({ "name": "end", "valueDate": end.to_string() }));
    }
    if let Some(since) = filters.since {
        parameters.push(json!({ "name": "_since", "valueInstant": since.to_rfc3339() }));
    }
    if !filters.resource_types.is_empty() {
        parameters.push(json!({
            "name": "_type",
            "valueString": filters.resource_types.join(","),
        }));
    }

    json!({ "resourceType": "Parameters", "parameter": parameters })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;

    fn parameter<'a>(call: &'a ProviderCall, name: &str) -> Option<&'a Value> {
        call.parameters["parameter"]
            .as_array()
            .and_then(|ps| ps.iter().find(|p| p["name"] == name))
    }

    #[test]
    fn test_stu3_rejects_everything() {
        let request = RecordRequest::new("9434765919", ProtocolVersion::Stu3, Operation::Everything);
        let err = Stu3Dialect
            .translate(&request, CorrelationId::new())
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_stu3_structured_record_parameters() {
        let request = RecordRequest::new(
            " 9434765919 ",
            ProtocolVersion::Stu3,
            Operation::GetStructuredRecord,
        )
        .with_filters(RecordFilters {
            period_start: NaiveDate::from_ymd_opt(2023, 1, 1),
            resource_types: vec!["MedicationStatement".to_string()],
            ..Default::default()
        });

        let call = adapter_for(ProtocolVersion::Stu3)
            .translate(&request, CorrelationId::new())
            .unwrap();

        assert_eq!(call.operation_name, "$gpc.getstructuredrecord");
        assert_eq!(call.patient_identifier, "9434765919");
        let nhs = parameter(&call, "patientNHSNumber").unwrap();
        assert_eq!(nhs["valueIdentifier"]["system"], NHS_NUMBER_SYSTEM);
        assert!(parameter(&call, "includeAllergies").is_none());
        let medication = parameter(&call, "includeMedication").unwrap();
        assert_eq!(medication["part"][1]["valueDate"], "2023-01-01");
    }

    #[test]
    fn test_structured_record_rejects_unknown_resource_type() {
        let request =
            RecordRequest::new("1", ProtocolVersion::R4, Operation::GetStructuredRecord)
                .with_filters(RecordFilters {
                    resource_types: vec!["Observation".to_string()],
                    ..Default::default()
                });
        let err = R4Dialect
            .translate(&request, CorrelationId::new())
            .unwrap_err();
        assert!(err.to_string().contains("Observation"));
    }

    #[test]
    fn test_stu3_rejects_since() {
        let request =
            RecordRequest::new("1", ProtocolVersion::Stu3, Operation::GetStructuredRecord)
                .with_filters(RecordFilters {
                    since: Some(Utc::now()),
                    ..Default::default()
                });
        assert!(Stu3Dialect.translate(&request, CorrelationId::new()).is_err());
    }

    #[test]
    fn test_r4_everything_parameters() {
        let request = RecordRequest::new("9434765919", ProtocolVersion::R4, Operation::Everything)
            .with_filters(RecordFilters {
                period_start: NaiveDate::from_ymd_opt(2024, 1, 1),
                period_end: NaiveDate::from_ymd_opt(2024, 12, 31),
                resource_types: vec!["Observation".to_string(), "Condition".to_string()],
                ..Default::default()
            });
        let correlation_id = CorrelationId::new();
        let call = R4Dialect.translate(&request, correlation_id).unwrap();

        assert_eq!(call.operation_name, "$everything");
        assert_eq!(call.resource_type, "Patient");
        assert_eq!(call.correlation_id, correlation_id);
        assert_eq!(parameter(&call, "start").unwrap()["valueDate"], "2024-01-01");
        assert_eq!(parameter(&call, "end").unwrap()["valueDate"], "2024-12-31");
        assert_eq!(
            parameter(&call, "_type").unwrap()["valueString"],
            "Observation,Condition"
        );
        assert!(parameter(&call, "_since").is_none());
    }
}
