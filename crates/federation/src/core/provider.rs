//! Provider handles.
//!
//! A [`ProviderHandle`] is the engine's only view of a backend: a name that
//! binds it to a registry entry, a capability descriptor, and one async
//! operation surface. Handles must observe the cancellation token they are
//! given during their own I/O.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderCallResult;
use crate::types::{Bundle, CorrelationId};

use super::capabilities::{CapabilityDescriptor, Operation};

/// A dialect-translated call, identical for every provider in one fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCall {
    /// Logical operation.
    pub operation: Operation,
    /// Resource type the operation is invoked on.
    pub resource_type: String,
    /// Dialect-specific operation name, e.g. `$everything`.
    pub operation_name: String,
    /// Patient identifier.
    pub patient_identifier: String,
    /// FHIR `Parameters` resource carrying the call arguments.
    pub parameters: Value,
    /// Correlation id of the originating request.
    pub correlation_id: CorrelationId,
}

/// A backend capable of answering record queries.
#[async_trait]
pub trait ProviderHandle: Send + Sync {
    /// Registry name this handle is bound to.
    fn name(&self) -> &str;

    /// Static capability declaration.
    fn capabilities(&self) -> &dyn CapabilityDescriptor;

    /// Performs the call.
    ///
    /// Implementations should return [`ProviderCallError::Cancelled`] promptly
    /// once `cancellation` fires.
    ///
    /// [`ProviderCallError::Cancelled`]: crate::error::ProviderCallError::Cancelled
    async fn invoke(
        &self,
        call: &ProviderCall,
        cancellation: CancellationToken,
    ) -> ProviderCallResult<Bundle>;
}

/// A dynamically typed provider handle.
pub type DynProvider = Arc<dyn ProviderHandle>;

/// Provider handles keyed by registry name.
#[derive(Clone, Default)]
pub struct ProviderSet {
    handles: HashMap<String, DynProvider>,
}

impl ProviderSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handle under its own name, replacing any previous binding.
    pub fn insert(&mut self, handle: DynProvider) {
        self.handles.insert(handle.name().to_string(), handle);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, handle: DynProvider) -> Self {
        self.insert(handle);
        self
    }

    /// Returns the handle bound to `name`.
    pub fn get(&self, name: &str) -> Option<&DynProvider> {
        self.handles.get(name)
    }

    /// Returns the number of bound handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no handle is bound.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns the bound names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ProviderSet").field("handles", &names).finish()
    }
}

impl FromIterator<DynProvider> for ProviderSet {
    fn from_iter<I: IntoIterator<Item = DynProvider>>(iter: I) -> Self {
        let mut set = Self::new();
        for handle in iter {
            set.insert(handle);
        }
        set
    }
}
