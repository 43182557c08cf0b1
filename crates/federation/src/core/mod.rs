//! Provider abstractions.
//!
//! - [`capabilities`] - operation declarations and the tri-state probe
//! - [`provider`] - the [`ProviderHandle`] trait and the name-keyed [`ProviderSet`]

pub mod capabilities;
pub mod provider;

pub use capabilities::{
    CapabilityDescriptor, CapabilitySupport, Operation, PATIENT_RESOURCE, StaticCapabilities,
    probe,
};
pub use provider::{DynProvider, ProviderCall, ProviderHandle, ProviderSet};
