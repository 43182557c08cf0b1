//! Scriptable providers, recording sinks and a coordinator builder.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use recordhub_federation::access::{AccessValidator, AllowAll};
use recordhub_federation::audit::{AuditEvent, AuditSink, ErrorSink, OrchestrationStage};
use recordhub_federation::core::{
    CapabilityDescriptor, Operation, ProviderCall, ProviderHandle, ProviderSet, StaticCapabilities,
};
use recordhub_federation::error::{
    AggregateProviderError, AuditError, CapabilityError, ProviderCallError, ProviderCallResult,
    RegistryError,
};
use recordhub_federation::federation::{FanOutTarget, FederationCoordinator};
use recordhub_federation::registry::{InMemoryRegistry, ProviderRegistry};
use recordhub_federation::types::{Bundle, CorrelationId, Provider};
use recordhub_federation::FederationConfig;

/// How a [`MockProvider`] answers.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return the bundle after the delay.
    Respond { delay: Duration, bundle: Value },
    /// Never answer; observe cancellation.
    Hang,
    /// Fail with an HTTP status.
    Fail { status: u16 },
}

enum MockCapabilities {
    Static(StaticCapabilities),
    Broken,
}

impl CapabilityDescriptor for MockCapabilities {
    fn supports_operation(
        &self,
        resource_type: &str,
        operation: Operation,
    ) -> Result<bool, CapabilityError> {
        match self {
            MockCapabilities::Static(caps) => caps.supports_operation(resource_type, operation),
            MockCapabilities::Broken => Err(CapabilityError {
                provider: "mock".to_string(),
                message: "capability statement unavailable".to_string(),
            }),
        }
    }
}

/// A provider handle with scripted behaviour and a call log.
pub struct MockProvider {
    name: String,
    behaviour: MockBehaviour,
    capabilities: MockCapabilities,
    calls: AtomicUsize,
    last_call: Mutex<Option<ProviderCall>>,
}

impl MockProvider {
    /// Creates a provider supporting both operations.
    pub fn new(name: &str, behaviour: MockBehaviour) -> Arc<Self> {
        Arc::new(Self::build(name, behaviour, MockCapabilities::Static(all_operations())))
    }

    /// Responds immediately with `bundle`.
    pub fn responding(name: &str, bundle: Value) -> Arc<Self> {
        Self::new(
            name,
            MockBehaviour::Respond {
                delay: Duration::ZERO,
                bundle,
            },
        )
    }

    /// Responds with `bundle` after `delay`.
    pub fn delayed(name: &str, delay: Duration, bundle: Value) -> Arc<Self> {
        Self::new(name, MockBehaviour::Respond { delay, bundle })
    }

    /// Never responds.
    pub fn hanging(name: &str) -> Arc<Self> {
        Self::new(name, MockBehaviour::Hang)
    }

    /// Fails with `status`.
    pub fn failing(name: &str, status: u16) -> Arc<Self> {
        Self::new(name, MockBehaviour::Fail { status })
    }

    /// A provider whose capability probe errors.
    pub fn with_broken_capabilities(name: &str, bundle: Value) -> Arc<Self> {
        Arc::new(Self::build(
            name,
            MockBehaviour::Respond {
                delay: Duration::ZERO,
                bundle,
            },
            MockCapabilities::Broken,
        ))
    }

    fn build(name: &str, behaviour: MockBehaviour, capabilities: MockCapabilities) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
            capabilities,
            calls: AtomicUsize::new(0),
            last_call: Mutex::new(None),
        }
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent call received.
    pub fn last_call(&self) -> Option<ProviderCall> {
        self.last_call.lock().clone()
    }
}

fn all_operations() -> StaticCapabilities {
    StaticCapabilities::new()
        .with_patient_operation(Operation::Everything)
        .with_patient_operation(Operation::GetStructuredRecord)
}

#[async_trait]
impl ProviderHandle for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &dyn CapabilityDescriptor {
        &self.capabilities
    }

    async fn invoke(
        &self,
        call: &ProviderCall,
        cancellation: CancellationToken,
    ) -> ProviderCallResult<Bundle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_call.lock() = Some(call.clone());

        match &self.behaviour {
            MockBehaviour::Respond { delay, bundle } => {
                tokio::select! {
                    _ = cancellation.cancelled() => Err(ProviderCallError::Cancelled),
                    _ = tokio::time::sleep(*delay) => Bundle::from_value(bundle.clone()),
                }
            }
            MockBehaviour::Hang => {
                cancellation.cancelled().await;
                Err(ProviderCallError::Cancelled)
            }
            MockBehaviour::Fail { status } => Err(ProviderCallError::Status {
                status: *status,
                message: "mock failure".to_string(),
            }),
        }
    }
}

/// Builds a handle set from mocks.
pub fn provider_set(mocks: &[Arc<MockProvider>]) -> ProviderSet {
    mocks
        .iter()
        .map(|m| m.clone() as Arc<dyn ProviderHandle>)
        .collect()
}

/// Pairs registry entries with mocks of the same name, in registry order.
pub fn targets(registry: &[Provider], mocks: &[Arc<MockProvider>]) -> Vec<FanOutTarget> {
    registry
        .iter()
        .filter_map(|entry| {
            let mock = mocks.iter().find(|m| m.name == entry.name)?;
            Some(FanOutTarget::new(entry.clone(), mock.clone()))
        })
        .collect()
}

/// Records every audit event; optionally fails each call afterwards.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    fail: bool,
}

impl RecordingAuditSink {
    /// A sink that records and then reports failure.
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// All recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Recorded stages in order.
    pub fn stages(&self) -> Vec<OrchestrationStage> {
        self.events.lock().iter().map(|e| e.stage).collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn log_information(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event.clone());
        if self.fail {
            return Err(AuditError {
                message: "audit store offline".to_string(),
            });
        }
        Ok(())
    }
}

/// Severity an error was reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggedLevel {
    /// `log_error`.
    Error,
    /// `log_critical`.
    Critical,
}

/// One error handed to the error sink.
#[derive(Debug, Clone)]
pub struct LoggedError {
    /// Severity.
    pub level: LoggedLevel,
    /// Display form.
    pub message: String,
    /// Correlation id supplied with the error.
    pub correlation_id: Option<CorrelationId>,
    /// Wrapped error messages if this was an aggregate.
    pub aggregated: Vec<String>,
    /// Timeouts inside the aggregate.
    pub aggregated_timeouts: usize,
}

/// Records every reported error.
#[derive(Default)]
pub struct RecordingErrorSink {
    logged: Mutex<Vec<LoggedError>>,
}

impl RecordingErrorSink {
    /// All reported errors.
    pub fn logged(&self) -> Vec<LoggedError> {
        self.logged.lock().clone()
    }

    /// Reported aggregates only.
    pub fn aggregates(&self) -> Vec<LoggedError> {
        self.logged
            .lock()
            .iter()
            .filter(|e| !e.aggregated.is_empty())
            .cloned()
            .collect()
    }

    fn record(
        &self,
        level: LoggedLevel,
        error: &(dyn Error + 'static),
        correlation_id: Option<CorrelationId>,
    ) {
        let aggregate = error.downcast_ref::<AggregateProviderError>();
        self.logged.lock().push(LoggedError {
            level,
            message: error.to_string(),
            correlation_id,
            aggregated: aggregate
                .map(|a| a.errors.iter().map(|e| e.to_string()).collect())
                .unwrap_or_default(),
            aggregated_timeouts: aggregate.map(|a| a.timeout_count()).unwrap_or_default(),
        });
    }
}

impl ErrorSink for RecordingErrorSink {
    fn log_error(&self, error: &(dyn Error + 'static), correlation_id: Option<CorrelationId>) {
        self.record(LoggedLevel::Error, error, correlation_id);
    }

    fn log_critical(&self, error: &(dyn Error + 'static), correlation_id: Option<CorrelationId>) {
        self.record(LoggedLevel::Critical, error, correlation_id);
    }
}

/// A registry that is always down.
pub struct UnavailableRegistry;

#[async_trait]
impl ProviderRegistry for UnavailableRegistry {
    async fn retrieve_all_providers(&self) -> Result<Vec<Provider>, RegistryError> {
        Err(RegistryError::Unavailable {
            message: "connection refused".to_string(),
        })
    }
}

/// A coordinator wired to recording sinks.
pub struct TestContext {
    /// The coordinator under test.
    pub coordinator: FederationCoordinator,
    /// Audit events emitted.
    pub audit: Arc<RecordingAuditSink>,
    /// Errors reported.
    pub errors: Arc<RecordingErrorSink>,
}

impl TestContext {
    /// Builds a coordinator over an in-memory registry with [`AllowAll`] access.
    pub fn new(registry: Vec<Provider>, mocks: &[Arc<MockProvider>], config: FederationConfig) -> Self {
        Self::with_parts(
            Arc::new(InMemoryRegistry::new(registry)),
            Arc::new(AllowAll),
            mocks,
            config,
            Arc::new(RecordingAuditSink::default()),
        )
    }

    /// Builds a coordinator from explicit collaborators.
    pub fn with_parts(
        registry: Arc<dyn ProviderRegistry>,
        access: Arc<dyn AccessValidator>,
        mocks: &[Arc<MockProvider>],
        config: FederationConfig,
        audit: Arc<RecordingAuditSink>,
    ) -> Self {
        let errors = Arc::new(RecordingErrorSink::default());
        let coordinator = FederationCoordinator::builder(registry, access, provider_set(mocks))
            .with_config(config)
            .with_audit_sink(audit.clone())
            .with_error_sink(errors.clone())
            .build()
            .expect("test configuration is valid");
        Self {
            coordinator,
            audit,
            errors,
        }
    }
}
