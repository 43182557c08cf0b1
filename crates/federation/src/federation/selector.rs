//! Provider selection.
//!
//! Reduces the registry snapshot to the providers that should answer one
//! request and identifies the unique primary among them. Selection is pure
//! and synchronous and always runs before any provider is called.
//!
//! A provider is selected when all of the following hold:
//!
//! 1. its protocol version matches the request,
//! 2. it is active at `now` (inclusive window bounds, missing bounds open),
//! 3. a handle is bound to its name and the handle's capability descriptor
//!    declares the requested operation on `Patient`.
//!
//! Capability probes that fail are treated as "unsupported" and logged.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::{CapabilitySupport, Operation, PATIENT_RESOURCE, ProviderSet, probe};
use crate::error::SelectionError;
use crate::types::{ProtocolVersion, Provider};

/// The outcome of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedProviders {
    /// Selected registry entries, in registry order.
    pub providers: Vec<Provider>,
    /// Name of the primary provider.
    pub primary: String,
}

impl SelectedProviders {
    /// Returns the selected provider names in registry order.
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    /// Returns the primary's registry entry.
    pub fn primary_entry(&self) -> Option<&Provider> {
        self.providers.iter().find(|p| p.name == self.primary)
    }
}

/// Selects the providers eligible to answer a request.
pub fn select_active_providers(
    all_providers: &[Provider],
    handles: &ProviderSet,
    protocol_version: ProtocolVersion,
    operation: Operation,
    now: DateTime<Utc>,
) -> Result<SelectedProviders, SelectionError> {
    let providers: Vec<Provider> = all_providers
        .iter()
        .filter(|p| p.protocol_version == protocol_version)
        .filter(|p| p.is_active_at(now))
        .filter(|p| supports(p, handles, operation))
        .cloned()
        .collect();

    let primaries: Vec<&Provider> = providers.iter().filter(|p| p.counts_as_primary()).collect();

    let primary = match primaries.as_slice() {
        [] => return Err(SelectionError::NoPrimaryProvider),
        [only] => only.name.clone(),
        _ => {
            return Err(SelectionError::MultiplePrimaryProviders {
                providers: providers.iter().map(|p| p.name.clone()).collect(),
            });
        }
    };

    debug!(
        protocol_version = %protocol_version,
        operation = %operation,
        primary = %primary,
        selected = providers.len(),
        "Selected providers"
    );

    Ok(SelectedProviders { providers, primary })
}

fn supports(provider: &Provider, handles: &ProviderSet, operation: Operation) -> bool {
    let Some(handle) = handles.get(&provider.name) else {
        warn!(provider = %provider.name, "No handle bound to registered provider");
        return false;
    };

    match probe(handle.capabilities(), PATIENT_RESOURCE, operation) {
        CapabilitySupport::Supported => true,
        CapabilitySupport::Unsupported => {
            debug!(provider = %provider.name, operation = %operation, "Operation not supported");
            false
        }
        CapabilitySupport::Unknown(reason) => {
            warn!(
                provider = %provider.name,
                operation = %operation,
                error = %reason,
                "Capability probe failed, treating provider as unsupported"
            );
            false
        }
    }
}
