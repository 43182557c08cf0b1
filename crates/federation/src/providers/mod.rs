//! Provider handle implementations.

pub mod http;

use std::sync::Arc;

use reqwest::Client;
use tracing::warn;

use crate::core::ProviderSet;
use crate::error::EndpointError;
use crate::types::Provider;

pub use http::HttpProvider;

/// Binds an [`HttpProvider`] to every registry entry that has an endpoint.
///
/// Entries without an endpoint are skipped; selection later treats them as
/// unsupported. A malformed endpoint is an error.
pub fn http_provider_set(entries: &[Provider], client: &Client) -> Result<ProviderSet, EndpointError> {
    let mut set = ProviderSet::new();
    for entry in entries {
        if entry.endpoint.is_none() {
            warn!(provider = %entry.name, "Registry entry has no endpoint, not binding");
            continue;
        }
        set.insert(Arc::new(HttpProvider::from_provider(entry, client.clone())?));
    }
    Ok(set)
}
