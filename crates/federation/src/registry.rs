//! Provider registry access.
//!
//! The engine reads a snapshot of the registry once per request through the
//! [`ProviderRegistry`] trait. [`InMemoryRegistry`] holds a snapshot in
//! memory and can be loaded from a JSON file containing an array of
//! [`Provider`] entries.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::types::Provider;

/// Read-only access to registered providers.
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    /// Returns every registered provider.
    async fn retrieve_all_providers(&self) -> Result<Vec<Provider>, RegistryError>;
}

/// A registry snapshot held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    providers: RwLock<Vec<Provider>>,
}

impl InMemoryRegistry {
    /// Creates a registry holding `providers`.
    pub fn new(providers: Vec<Provider>) -> Self {
        Self {
            providers: RwLock::new(providers),
        }
    }

    /// Loads a registry from a JSON array file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Parses a registry from a JSON array string.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let providers: Vec<Provider> =
            serde_json::from_str(json).map_err(|source| RegistryError::Parse { source })?;
        Ok(Self::new(providers))
    }

    /// Replaces the snapshot.
    pub fn replace(&self, providers: Vec<Provider>) {
        *self.providers.write() = providers;
    }

    /// Returns a copy of the snapshot.
    pub fn snapshot(&self) -> Vec<Provider> {
        self.providers.read().clone()
    }
}

#[async_trait]
impl ProviderRegistry for InMemoryRegistry {
    async fn retrieve_all_providers(&self) -> Result<Vec<Provider>, RegistryError> {
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::types::ProtocolVersion;

    const REGISTRY: &str = r#"[
        {
            "name": "DDS",
            "protocolVersion": "r4",
            "isPrimary": true,
            "system": "https://fhir.example.org/CodeSystem/provider",
            "code": "dds",
            "source": "https://dds.example.org/fhir",
            "endpoint": "https://dds.example.org/fhir/"
        },
        {
            "name": "LDS",
            "protocolVersion": "r4",
            "system": "https://fhir.example.org/CodeSystem/provider",
            "code": "lds",
            "source": "https://lds.example.org/fhir"
        }
    ]"#;

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(REGISTRY.as_bytes()).unwrap();

        let registry = InMemoryRegistry::from_json_file(file.path()).unwrap();
        let providers = registry.retrieve_all_providers().await.unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].name, "DDS");
        assert_eq!(providers[1].protocol_version, ProtocolVersion::R4);
    }

    #[test]
    fn test_missing_file() {
        let err = InMemoryRegistry::from_json_file("/nonexistent/registry.json").unwrap_err();
        assert!(matches!(err, RegistryError::Io { .. }));
    }

    #[test]
    fn test_malformed_json() {
        let err = InMemoryRegistry::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_replace_snapshot() {
        let registry = InMemoryRegistry::from_json_str(REGISTRY).unwrap();
        registry.replace(vec![Provider::new("Solo", ProtocolVersion::Stu3)]);
        let providers = registry.retrieve_all_providers().await.unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name, "Solo");
    }
}
