//! Orchestration of one record request.
//!
//! [`FederationCoordinator::retrieve`] walks a request through
//!
//! ```text
//! Validating → Selecting → FanningOut → Reconciling → Completed
//!      └───────────┴────────────┴────────────┴──────→ Failed
//! ```
//!
//! emitting exactly one audit event per stage entered. A failing stage emits
//! the `Failed` event and reports its error to the error sink once. Provider
//! failures are not stage failures: they are logged in aggregate by the
//! executor and the request continues with whatever succeeded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::access::{AccessValidator, ConsumerContext};
use crate::audit::{
    AuditEvent, AuditSink, ErrorSink, OrchestrationStage, TracingAuditSink, TracingErrorSink,
};
use crate::config::FederationConfig;
use crate::core::{ProviderCall, ProviderSet};
use crate::error::{ConfigError, FederationError, FederationResult, InfrastructureError, Severity};
use crate::registry::ProviderRegistry;
use crate::types::{CorrelationId, RecordRequest};

use super::dialect::adapter_for;
use super::executor::{FanOutExecutor, FanOutTarget};
use super::health::{HealthSnapshot, ProviderHealthMonitor};
use super::reconciler::{ReconciledResult, Reconciler};
use super::selector::{SelectedProviders, select_active_providers};

/// Runs record requests end to end.
pub struct FederationCoordinator {
    registry: Arc<dyn ProviderRegistry>,
    access: Arc<dyn AccessValidator>,
    providers: ProviderSet,
    config: FederationConfig,
    audit: Arc<dyn AuditSink>,
    errors: Arc<dyn ErrorSink>,
    executor: FanOutExecutor,
    reconciler: Reconciler,
    health: ProviderHealthMonitor,
}

impl std::fmt::Debug for FederationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationCoordinator")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl FederationCoordinator {
    /// Starts building a coordinator.
    pub fn builder(
        registry: Arc<dyn ProviderRegistry>,
        access: Arc<dyn AccessValidator>,
        providers: ProviderSet,
    ) -> FederationCoordinatorBuilder {
        FederationCoordinatorBuilder::new(registry, access, providers)
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Returns the health of every provider called so far.
    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    /// Retrieves and reconciles a patient's record from every eligible provider.
    ///
    /// Cancelling `cancellation` stops in-flight provider calls and makes the
    /// request fail with [`FederationError::Cancelled`].
    #[instrument(
        skip(self, consumer, request, cancellation),
        fields(
            consumer = %consumer,
            protocol_version = %request.protocol_version,
            operation = %request.operation
        )
    )]
    pub async fn retrieve(
        &self,
        consumer: &ConsumerContext,
        request: RecordRequest,
        cancellation: CancellationToken,
    ) -> FederationResult<ReconciledResult> {
        let extra = json!({
            "consumer": consumer.to_string(),
            "request": serde_json::to_value(&request).unwrap_or_default(),
        });

        let correlation_id = match request.resolve_correlation_id() {
            Ok(id) => id,
            Err(e) => {
                let fresh = CorrelationId::new();
                self.enter(
                    OrchestrationStage::Validating,
                    "Validating record request",
                    &extra,
                    fresh,
                );
                let err = FederationError::from(e);
                self.fail(&err, &extra, fresh);
                return Err(err);
            }
        };

        match self
            .orchestrate(consumer, &request, &extra, correlation_id, &cancellation)
            .await
        {
            Ok(result) => {
                self.enter(
                    OrchestrationStage::Completed,
                    &format!(
                        "Returned {} entries from {} provider(s)",
                        result.bundle.entries().len(),
                        result.contributors.len()
                    ),
                    &extra,
                    correlation_id,
                );
                Ok(result)
            }
            Err(err) => {
                self.fail(&err, &extra, correlation_id);
                Err(err)
            }
        }
    }

    /// Fetches the registry and runs provider selection without calling anyone.
    pub async fn select_providers(
        &self,
        request: &RecordRequest,
        now: DateTime<Utc>,
    ) -> FederationResult<SelectedProviders> {
        let all = self.registry.retrieve_all_providers().await?;
        Ok(select_active_providers(
            &all,
            &self.providers,
            request.protocol_version,
            request.operation,
            now,
        )?)
    }

    async fn orchestrate(
        &self,
        consumer: &ConsumerContext,
        request: &RecordRequest,
        extra: &Value,
        correlation_id: CorrelationId,
        cancellation: &CancellationToken,
    ) -> FederationResult<ReconciledResult> {
        self.enter(
            OrchestrationStage::Validating,
            "Validating record request",
            extra,
            correlation_id,
        );
        let call = self.validate(request, correlation_id)?;

        self.enter(
            OrchestrationStage::Selecting,
            "Checking access and selecting providers",
            extra,
            correlation_id,
        );
        self.access
            .validate_access(consumer, &call.patient_identifier, correlation_id)
            .await?;
        let selected = self.select_providers(request, Utc::now()).await?;

        let primary = selected.primary_entry().cloned().ok_or_else(|| {
            InfrastructureError::Unexpected {
                message: format!("primary {} missing from selection", selected.primary),
                source: None,
            }
        })?;
        let targets: Vec<FanOutTarget> = selected
            .providers
            .into_iter()
            .filter_map(|entry| {
                let handle = self.providers.get(&entry.name)?.clone();
                Some(FanOutTarget::new(entry, handle))
            })
            .collect();

        self.enter(
            OrchestrationStage::FanningOut,
            &format!(
                "Calling {} provider(s), primary {}",
                targets.len(),
                primary.name
            ),
            extra,
            correlation_id,
        );
        let outcomes = self
            .executor
            .execute_all(targets, Arc::new(call), cancellation)
            .await;
        self.health.record_outcomes(&outcomes);
        let report = self.executor.collect(outcomes, correlation_id);

        if cancellation.is_cancelled() {
            return Err(FederationError::Cancelled);
        }

        self.enter(
            OrchestrationStage::Reconciling,
            &format!(
                "Reconciling {} result(s), {} provider failure(s)",
                report.successes.len(),
                report.failures.len()
            ),
            extra,
            correlation_id,
        );
        Ok(self
            .reconciler
            .reconcile(request.protocol_version, report.successes, &primary)?)
    }

    fn validate(
        &self,
        request: &RecordRequest,
        correlation_id: CorrelationId,
    ) -> FederationResult<ProviderCall> {
        request.validate()?;
        let call = adapter_for(request.protocol_version).translate(request, correlation_id)?;
        debug!(
            correlation_id = %correlation_id,
            operation_name = %call.operation_name,
            "Request translated"
        );
        Ok(call)
    }

    fn enter(
        &self,
        stage: OrchestrationStage,
        detail: &str,
        extra: &Value,
        correlation_id: CorrelationId,
    ) {
        let event = AuditEvent {
            category: self.config.audit_category.clone(),
            stage,
            detail: detail.to_string(),
            extra: extra.clone(),
            correlation_id,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.audit.log_information(&event) {
            warn!(
                correlation_id = %correlation_id,
                stage = %stage,
                error = %e,
                "Audit sink failed, continuing"
            );
        }
    }

    fn fail(&self, err: &FederationError, extra: &Value, correlation_id: CorrelationId) {
        self.enter(
            OrchestrationStage::Failed,
            &err.to_string(),
            extra,
            correlation_id,
        );

        if matches!(err, FederationError::Cancelled) {
            info!(correlation_id = %correlation_id, "Request cancelled by caller");
            return;
        }

        match err.severity() {
            Severity::Critical => self.errors.log_critical(err, Some(correlation_id)),
            Severity::Error => self.errors.log_error(err, Some(correlation_id)),
        }
    }
}

/// Builder for [`FederationCoordinator`].
pub struct FederationCoordinatorBuilder {
    registry: Arc<dyn ProviderRegistry>,
    access: Arc<dyn AccessValidator>,
    providers: ProviderSet,
    config: FederationConfig,
    audit: Arc<dyn AuditSink>,
    errors: Arc<dyn ErrorSink>,
    reconciler: Reconciler,
}

impl FederationCoordinatorBuilder {
    /// Creates a builder with default configuration, tracing sinks and the
    /// default reconciler.
    pub fn new(
        registry: Arc<dyn ProviderRegistry>,
        access: Arc<dyn AccessValidator>,
        providers: ProviderSet,
    ) -> Self {
        Self {
            registry,
            access,
            providers,
            config: FederationConfig::default(),
            audit: Arc::new(TracingAuditSink),
            errors: Arc::new(TracingErrorSink),
            reconciler: Reconciler::default(),
        }
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: FederationConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the audit sink.
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Sets the error sink.
    pub fn with_error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    /// Sets the reconciler.
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Builds the coordinator, validating the configuration first.
    pub fn build(self) -> Result<FederationCoordinator, ConfigError> {
        self.config
            .validate()
            .map_err(|errors| ConfigError { errors })?;

        Ok(FederationCoordinator {
            executor: FanOutExecutor::new(self.config.max_provider_wait(), self.errors.clone()),
            health: ProviderHealthMonitor::new(self.config.health.clone()),
            registry: self.registry,
            access: self.access,
            providers: self.providers,
            config: self.config,
            audit: self.audit,
            errors: self.errors,
            reconciler: self.reconciler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AllowAll;
    use crate::registry::InMemoryRegistry;

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = FederationConfig {
            audit_category: String::new(),
            ..FederationConfig::default()
        };
        let err = FederationCoordinator::builder(
            Arc::new(InMemoryRegistry::default()),
            Arc::new(AllowAll),
            ProviderSet::new(),
        )
        .with_config(config)
        .build()
        .unwrap_err();
        assert_eq!(err.errors, vec!["Audit category cannot be empty"]);
    }

    #[tokio::test]
    async fn test_empty_registry_has_no_primary() {
        let coordinator = FederationCoordinator::builder(
            Arc::new(InMemoryRegistry::default()),
            Arc::new(AllowAll),
            ProviderSet::new(),
        )
        .build()
        .unwrap();

        let request = RecordRequest::new(
            "9434765919",
            crate::types::ProtocolVersion::R4,
            crate::core::Operation::Everything,
        );
        let err = coordinator
            .retrieve(&ConsumerContext::new("gp"), request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FederationError::Selection(crate::error::SelectionError::NoPrimaryProvider)
        ));
    }
}
