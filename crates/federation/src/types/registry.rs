//! Provider registry entries.
//!
//! A [`Provider`] is a read-only snapshot of one registered backend. The
//! engine never mutates registry entries; they are fetched once per request
//! through a [`ProviderRegistry`](crate::registry::ProviderRegistry).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provenance::Provenance;

/// The clinical-protocol dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// FHIR STU3 structured record dialect.
    Stu3,
    /// FHIR R4 dialect.
    R4,
}

impl ProtocolVersion {
    /// Returns the FHIR version string stamped into provenance.
    pub fn fhir_version(&self) -> &'static str {
        match self {
            ProtocolVersion::Stu3 => "3.0.1",
            ProtocolVersion::R4 => "4.0.1",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Stu3 => write!(f, "stu3"),
            ProtocolVersion::R4 => write!(f, "r4"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stu3" => Ok(ProtocolVersion::Stu3),
            "r4" => Ok(ProtocolVersion::R4),
            other => Err(format!("unknown protocol version: {other}")),
        }
    }
}

fn default_active() -> bool {
    true
}

/// A registered backend data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// Unique provider name.
    pub name: String,

    /// Dialect this provider speaks.
    pub protocol_version: ProtocolVersion,

    /// Administrative on/off switch.
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Start of the eligibility window. `None` means open.
    #[serde(default)]
    pub active_from: Option<DateTime<Utc>>,

    /// End of the eligibility window. `None` means open.
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,

    /// Whether this provider's result is authoritative.
    #[serde(default)]
    pub is_primary: bool,

    /// Participates in fan-out but never acts as primary.
    #[serde(default)]
    pub is_for_comparison_only: bool,

    /// Provenance coding system.
    pub system: String,

    /// Provenance code.
    pub code: String,

    /// Provenance source URI.
    pub source: String,

    /// Base URL for HTTP-backed handles.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Provider {
    /// Creates an active, non-primary provider with empty provenance.
    pub fn new(name: impl Into<String>, protocol_version: ProtocolVersion) -> Self {
        let name = name.into();
        Self {
            code: name.clone(),
            name,
            protocol_version,
            is_active: true,
            active_from: None,
            active_to: None,
            is_primary: false,
            is_for_comparison_only: false,
            system: String::new(),
            source: String::new(),
            endpoint: None,
        }
    }

    /// Marks this provider as primary.
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    /// Marks this provider as comparison-only.
    pub fn comparison_only(mut self) -> Self {
        self.is_for_comparison_only = true;
        self
    }

    /// Switches the provider off.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Sets the eligibility window.
    pub fn with_window(
        mut self,
        active_from: Option<DateTime<Utc>>,
        active_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.active_from = active_from;
        self.active_to = active_to;
        self
    }

    /// Sets the provenance fields.
    pub fn with_provenance(
        mut self,
        system: impl Into<String>,
        code: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.system = system.into();
        self.code = code.into();
        self.source = source.into();
        self
    }

    /// Sets the HTTP endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Returns true if the provider is switched on and `now` is inside its window.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.active_from.is_none_or(|from| from <= now)
            && self.active_to.is_none_or(|to| now <= to)
    }

    /// Returns true if this provider counts toward the unique-primary check.
    pub fn counts_as_primary(&self) -> bool {
        self.is_primary && !self.is_for_comparison_only
    }

    /// Builds the provenance stamped onto this provider's results.
    pub fn provenance(&self) -> Provenance {
        Provenance {
            system: self.system.clone(),
            code: self.code.clone(),
            display: self.name.clone(),
            version: self.protocol_version.fhir_version().to_string(),
            source: self.source.clone(),
        }
    }
}
