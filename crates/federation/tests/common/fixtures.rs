//! Registry entries and bundles used across tests.

use serde_json::{Value, json};

use recordhub_federation::core::Operation;
use recordhub_federation::types::{ProtocolVersion, Provider, RecordRequest};

/// Coding system of every fixture provider's provenance tag.
pub const PROVIDER_SYSTEM: &str = "https://fhir.example.org/CodeSystem/provider";

/// A valid national health number.
pub const PATIENT: &str = "9434765919";

/// An active R4 provider with provenance derived from its name.
pub fn provider(name: &str) -> Provider {
    let code = name.to_lowercase();
    Provider::new(name, ProtocolVersion::R4).with_provenance(
        PROVIDER_SYSTEM,
        &code,
        format!("https://{code}.example.org/fhir"),
    )
}

/// Registry with one primary (`DDS`) and one secondary (`LDS`).
pub fn dds_lds_registry() -> Vec<Provider> {
    vec![provider("DDS").primary(), provider("LDS")]
}

/// A searchset bundle holding one Observation per id.
pub fn observation_bundle(ids: &[&str]) -> Value {
    let entries: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "fullUrl": format!("urn:uuid:{id}"),
                "resource": { "resourceType": "Observation", "id": id }
            })
        })
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": entries.len(),
        "entry": entries,
    })
}

/// An R4 `$everything` request for [`PATIENT`].
pub fn everything_request() -> RecordRequest {
    RecordRequest::new(PATIENT, ProtocolVersion::R4, Operation::Everything)
}
