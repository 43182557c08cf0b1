//! FHIR-over-HTTP provider handle.
//!
//! Posts the call's `Parameters` resource to
//! `{endpoint}/{resourceType}/{operationName}` and expects a Bundle back.
//! The cancellation token is observed for the whole exchange, including
//! reading the response body.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::core::{CapabilityDescriptor, Operation, ProviderCall, ProviderHandle, StaticCapabilities};
use crate::error::{EndpointError, ProviderCallError, ProviderCallResult};
use crate::federation::adapter_for;
use crate::types::{Bundle, ProtocolVersion, Provider};

const FHIR_JSON: &str = "application/fhir+json";
const CORRELATION_HEADER: &str = "X-Correlation-Id";
const MAX_ERROR_BODY: usize = 200;

/// A provider reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    name: String,
    endpoint: Url,
    client: Client,
    capabilities: StaticCapabilities,
}

impl HttpProvider {
    /// Creates a handle for `endpoint`, declaring every operation the
    /// protocol dialect defines.
    pub fn new(
        name: impl Into<String>,
        endpoint: &str,
        protocol_version: ProtocolVersion,
        client: Client,
    ) -> Result<Self, EndpointError> {
        let name = name.into();
        let endpoint = parse_endpoint(&name, endpoint)?;

        let dialect = adapter_for(protocol_version);
        let capabilities = [Operation::Everything, Operation::GetStructuredRecord]
            .into_iter()
            .filter(|op| dialect.supports(*op))
            .fold(StaticCapabilities::new(), |caps, op| {
                caps.with_patient_operation(op)
            });

        Ok(Self {
            name,
            endpoint,
            client,
            capabilities,
        })
    }

    /// Creates a handle from a registry entry.
    pub fn from_provider(entry: &Provider, client: Client) -> Result<Self, EndpointError> {
        let endpoint = entry.endpoint.as_deref().ok_or_else(|| EndpointError {
            provider: entry.name.clone(),
            endpoint: String::new(),
            message: "no endpoint registered".to_string(),
        })?;
        Self::new(&entry.name, endpoint, entry.protocol_version, client)
    }

    /// Returns the base endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns the URL a call is posted to.
    pub fn operation_url(&self, call: &ProviderCall) -> ProviderCallResult<Url> {
        self.endpoint
            .join(&format!("{}/{}", call.resource_type, call.operation_name))
            .map_err(|e| ProviderCallError::Transport {
                endpoint: self.endpoint.to_string(),
                message: format!("cannot build operation url: {e}"),
                source: Some(Box::new(e)),
            })
    }

    async fn exchange(&self, url: Url, call: &ProviderCall) -> ProviderCallResult<Bundle> {
        let response = self
            .client
            .post(url)
            .header(ACCEPT, FHIR_JSON)
            .header(CONTENT_TYPE, FHIR_JSON)
            .header(CORRELATION_HEADER, call.correlation_id.to_string())
            .json(&call.parameters)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderCallError::Status {
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let value: Value = response.json().await?;
        Bundle::from_value(value)
    }
}

#[async_trait]
impl ProviderHandle for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &dyn CapabilityDescriptor {
        &self.capabilities
    }

    async fn invoke(
        &self,
        call: &ProviderCall,
        cancellation: CancellationToken,
    ) -> ProviderCallResult<Bundle> {
        let url = self.operation_url(call)?;
        debug!(provider = %self.name, url = %url, correlation_id = %call.correlation_id, "Calling provider");

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ProviderCallError::Cancelled),
            result = self.exchange(url, call) => result,
        }
    }
}

fn parse_endpoint(provider: &str, endpoint: &str) -> Result<Url, EndpointError> {
    let error = |message: String| EndpointError {
        provider: provider.to_string(),
        endpoint: endpoint.to_string(),
        message,
    };

    let mut url = Url::parse(endpoint).map_err(|e| error(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(error(format!("unsupported scheme {}", url.scheme())));
    }
    // Url::join replaces the last path segment unless the base ends in '/'.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::{CapabilitySupport, PATIENT_RESOURCE, probe};
    use crate::types::CorrelationId;

    fn call(operation_name: &str) -> ProviderCall {
        ProviderCall {
            operation: Operation::Everything,
            resource_type: "Patient".to_string(),
            operation_name: operation_name.to_string(),
            patient_identifier: "9434765919".to_string(),
            parameters: json!({ "resourceType": "Parameters" }),
            correlation_id: CorrelationId::new(),
        }
    }

    #[test]
    fn test_operation_url_keeps_base_path() {
        let provider =
            HttpProvider::new("DDS", "https://dds.example.org/fhir", ProtocolVersion::R4, Client::new())
                .unwrap();
        assert_eq!(
            provider.operation_url(&call("$everything")).unwrap().as_str(),
            "https://dds.example.org/fhir/Patient/$everything"
        );
    }

    #[test]
    fn test_capabilities_follow_dialect() {
        let stu3 = HttpProvider::new("GP", "https://gp.example.org/", ProtocolVersion::Stu3, Client::new())
            .unwrap();
        assert_eq!(
            probe(stu3.capabilities(), PATIENT_RESOURCE, Operation::Everything),
            CapabilitySupport::Unsupported
        );
        assert!(probe(stu3.capabilities(), PATIENT_RESOURCE, Operation::GetStructuredRecord).is_supported());

        let r4 = HttpProvider::new("DDS", "https://dds.example.org/", ProtocolVersion::R4, Client::new())
            .unwrap();
        assert!(probe(r4.capabilities(), PATIENT_RESOURCE, Operation::Everything).is_supported());
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        assert!(HttpProvider::new("A", "not a url", ProtocolVersion::R4, Client::new()).is_err());
        assert!(HttpProvider::new("A", "ftp://a.example.org/", ProtocolVersion::R4, Client::new()).is_err());

        let entry = Provider::new("NoEndpoint", ProtocolVersion::R4);
        let err = HttpProvider::from_provider(&entry, Client::new()).unwrap_err();
        assert_eq!(err.provider, "NoEndpoint");
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let provider =
            HttpProvider::new("DDS", "http://127.0.0.1:9/fhir", ProtocolVersion::R4, Client::new())
                .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = provider.invoke(&call("$everything"), token).await;
        assert!(matches!(result, Err(ProviderCallError::Cancelled)));
    }
}
