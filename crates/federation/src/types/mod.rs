//! Core data types shared across the engine.

pub mod bundle;
pub mod provenance;
pub mod registry;
pub mod request;

pub use bundle::{Bundle, entry_key};
pub use provenance::{PROVENANCE_EXTENSION_URL, Provenance};
pub use registry::{ProtocolVersion, Provider};
pub use request::{CorrelationId, RecordFilters, RecordRequest};
