//! The fan-out and reconciliation engine.
//!
//! - [`dialect`] - per-protocol translation of requests into provider calls
//! - [`selector`] - active provider selection and the unique-primary check
//! - [`executor`] - concurrent provider calls with timeouts and cancellation
//! - [`reconciler`] - primary-based merging of provider results
//! - [`health`] - advisory provider health tracking
//! - [`coordinator`] - the end-to-end request pipeline

pub mod coordinator;
pub mod dialect;
pub mod executor;
pub mod health;
pub mod reconciler;
pub mod selector;

pub use coordinator::{FederationCoordinator, FederationCoordinatorBuilder};
pub use dialect::{DialectAdapter, NHS_NUMBER_SYSTEM, R4Dialect, Stu3Dialect, adapter_for};
pub use executor::{
    FanOutExecutor, FanOutReport, FanOutTarget, Outcome, OutcomeKind, ProviderResult,
};
pub use health::{HealthSnapshot, ProviderHealthMonitor, ProviderHealthStatus};
pub use reconciler::{
    ComparisonReport, PrimaryEnrichedStrategy, PrimaryOnlyStrategy, ReconciledResult,
    ReconciliationStrategy, Reconciler,
};
pub use selector::{SelectedProviders, select_active_providers};
