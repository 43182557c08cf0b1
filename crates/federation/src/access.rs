//! Consumer access control.
//!
//! Every orchestration runs on behalf of a [`ConsumerContext`]. Before any
//! provider is selected, an [`AccessValidator`] decides whether that consumer
//! may see the requested patient's record.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::AccessError;
use crate::types::CorrelationId;

/// The caller an orchestration runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerContext {
    consumer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    organisation: Option<String>,
}

impl ConsumerContext {
    /// Creates a context for a consumer.
    pub fn new(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            organisation: None,
        }
    }

    /// Attaches the consumer's organisation code.
    pub fn with_organisation(mut self, organisation: impl Into<String>) -> Self {
        self.organisation = Some(organisation.into());
        self
    }

    /// Returns the consumer id.
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Returns the organisation code, if any.
    pub fn organisation(&self) -> Option<&str> {
        self.organisation.as_deref()
    }
}

impl fmt::Display for ConsumerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.organisation {
            Some(org) => write!(f, "{}@{}", self.consumer_id, org),
            None => write!(f, "{}", self.consumer_id),
        }
    }
}

/// Decides whether a consumer may access a patient's record.
#[async_trait]
pub trait AccessValidator: Send + Sync {
    /// Returns `Ok(())` when access is granted.
    async fn validate_access(
        &self,
        consumer: &ConsumerContext,
        patient_identifier: &str,
        correlation_id: CorrelationId,
    ) -> Result<(), AccessError>;
}

/// Grants every request. Intended for operator tooling and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessValidator for AllowAll {
    async fn validate_access(
        &self,
        _consumer: &ConsumerContext,
        _patient_identifier: &str,
        _correlation_id: CorrelationId,
    ) -> Result<(), AccessError> {
        Ok(())
    }
}

/// What a consumer is allowed to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    /// Any patient.
    AllPatients,
    /// Only the listed patients.
    Patients(HashSet<String>),
}

impl AccessScope {
    fn permits(&self, patient_identifier: &str) -> bool {
        match self {
            AccessScope::AllPatients => true,
            AccessScope::Patients(ids) => ids.contains(patient_identifier),
        }
    }
}

/// An in-memory consumer policy. Unknown consumers are denied.
#[derive(Debug, Default)]
pub struct ConsumerAccessPolicy {
    scopes: RwLock<HashMap<String, AccessScope>>,
}

impl ConsumerAccessPolicy {
    /// Creates an empty policy that denies everyone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a scope to a consumer, replacing any earlier grant.
    pub fn grant(&self, consumer_id: impl Into<String>, scope: AccessScope) {
        self.scopes.write().insert(consumer_id.into(), scope);
    }

    /// Builder form of [`grant`](Self::grant).
    pub fn with_grant(self, consumer_id: impl Into<String>, scope: AccessScope) -> Self {
        self.grant(consumer_id, scope);
        self
    }

    /// Removes every grant of a consumer.
    pub fn revoke(&self, consumer_id: &str) {
        self.scopes.write().remove(consumer_id);
    }
}

#[async_trait]
impl AccessValidator for ConsumerAccessPolicy {
    async fn validate_access(
        &self,
        consumer: &ConsumerContext,
        patient_identifier: &str,
        _correlation_id: CorrelationId,
    ) -> Result<(), AccessError> {
        let permitted = self
            .scopes
            .read()
            .get(consumer.consumer_id())
            .is_some_and(|scope| scope.permits(patient_identifier));

        if permitted {
            Ok(())
        } else {
            Err(AccessError::Denied {
                consumer: consumer.consumer_id().to_string(),
                patient: patient_identifier.to_string(),
            })
        }
    }
}
