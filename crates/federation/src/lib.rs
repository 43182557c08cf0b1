//! RecordHub Federation Engine
//!
//! This crate aggregates a patient's health record from several independent
//! FHIR providers. For every request it selects the providers eligible to
//! answer, calls all of them concurrently with independent timeouts and
//! cancellation, tolerates partial failure, and reconciles the results into
//! one bundle built on the designated primary provider's answer.
//!
//! # Features
//!
//! - **Selection**: protocol version, active window and capability filtering
//!   with a strict one-primary rule
//! - **Fan-out**: one task per provider, per-provider wait bound, caller
//!   cancellation, failures isolated and logged in aggregate
//! - **Provenance**: every provider result is stamped with its origin
//! - **Reconciliation**: pluggable strategy per protocol version, explicit
//!   failure when the primary produced nothing
//! - **Dialects**: FHIR STU3 structured record and FHIR R4 operations
//!
//! # Architecture
//!
//! - [`types`] - Registry entries, requests, bundles and provenance
//! - [`core`] - Provider handle and capability abstractions
//! - [`access`] - Consumer access validation
//! - [`registry`] - Provider registry access
//! - [`federation`] - Selector, executor, reconciler and coordinator
//! - [`providers`] - HTTP provider handle
//! - [`audit`] - Audit and error sinks
//! - [`config`] - Engine configuration
//! - [`error`] - Error types for all stages
//!
//! # Selection
//!
//! ```
//! use chrono::Utc;
//! use recordhub_federation::core::{DynProvider, Operation, ProviderSet};
//! use recordhub_federation::federation::select_active_providers;
//! use recordhub_federation::providers::HttpProvider;
//! use recordhub_federation::types::{ProtocolVersion, Provider};
//!
//! let registry = vec![
//!     Provider::new("DDS", ProtocolVersion::R4).primary(),
//!     Provider::new("LDS", ProtocolVersion::R4),
//! ];
//! let client = reqwest::Client::new();
//! let handles: ProviderSet = registry
//!     .iter()
//!     .map(|p| {
//!         let url = format!("https://{}.example.org/fhir", p.name.to_lowercase());
//!         std::sync::Arc::new(
//!             HttpProvider::new(&p.name, &url, p.protocol_version, client.clone()).unwrap(),
//!         ) as DynProvider
//!     })
//!     .collect();
//!
//! let selected = select_active_providers(
//!     &registry,
//!     &handles,
//!     ProtocolVersion::R4,
//!     Operation::Everything,
//!     Utc::now(),
//! )
//! .unwrap();
//! assert_eq!(selected.primary, "DDS");
//! assert_eq!(selected.names(), vec!["DDS", "LDS"]);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod access;
pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod federation;
pub mod providers;
pub mod registry;
pub mod types;

// Re-export commonly used types at crate root
pub use access::{AccessValidator, ConsumerContext};
pub use config::FederationConfig;
pub use error::{FederationError, FederationResult};
pub use types::{Bundle, CorrelationId, ProtocolVersion, Provider, RecordFilters, RecordRequest};

// Re-export the engine entry points
pub use federation::{FederationCoordinator, ReconciledResult, SelectedProviders};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
