//! Concurrent provider fan-out.
//!
//! The executor issues one spawned task per selected provider and waits for
//! every task to settle before returning. Each task runs under its own scope:
//!
//! ```text
//!   global (caller) token
//!        │
//!        ├── child scope ── provider A  (bounded by max wait)
//!        ├── child scope ── provider B
//!        └── child scope ── provider C
//! ```
//!
//! Cancelling the global token cancels every scope. A scope that outlives the
//! wait bound is cancelled on its own and the outcome is a timeout. Outcome
//! kinds are decided by which token fired, never by the provider's error
//! text.
//!
//! Failures never leave the executor as errors. They are collected and logged
//! once as an [`AggregateProviderError`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audit::ErrorSink;
use crate::core::{DynProvider, ProviderCall};
use crate::error::{AggregateProviderError, ProviderCallError, ProviderError};
use crate::types::{Bundle, CorrelationId, Provenance, Provider};

/// A provider selected for fan-out, paired with its handle.
#[derive(Clone)]
pub struct FanOutTarget {
    /// Registry entry.
    pub entry: Provider,
    /// Bound handle.
    pub handle: DynProvider,
}

impl FanOutTarget {
    /// Pairs a registry entry with its handle.
    pub fn new(entry: Provider, handle: DynProvider) -> Self {
        Self { entry, handle }
    }
}

impl std::fmt::Debug for FanOutTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutTarget")
            .field("entry", &self.entry.name)
            .finish_non_exhaustive()
    }
}

/// Kind of a settled provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The provider returned a bundle.
    Success,
    /// The wait bound elapsed.
    Timeout,
    /// The caller cancelled.
    Cancelled,
    /// Any other failure.
    Failed,
}

/// The settled result of one provider call.
#[derive(Debug)]
pub struct Outcome {
    /// Provider name.
    pub provider: String,
    /// Whether the provider is comparison-only.
    pub comparison_only: bool,
    /// Provenance of the provider.
    pub provenance: Provenance,
    /// Time from task start to settlement.
    pub elapsed: Duration,
    /// Stamped bundle or error.
    pub result: Result<Bundle, ProviderError>,
}

impl Outcome {
    /// Returns the outcome kind.
    pub fn kind(&self) -> OutcomeKind {
        match &self.result {
            Ok(_) => OutcomeKind::Success,
            Err(ProviderError::Timeout { .. }) => OutcomeKind::Timeout,
            Err(ProviderError::Cancelled { .. }) => OutcomeKind::Cancelled,
            Err(ProviderError::Failed { .. }) => OutcomeKind::Failed,
        }
    }

    /// Returns true if the provider returned a bundle.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A successful provider result handed to reconciliation.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    /// Provider name.
    pub provider: String,
    /// Whether the provider is comparison-only.
    pub comparison_only: bool,
    /// Provenance stamped on the bundle.
    pub provenance: Provenance,
    /// Provenance-stamped bundle.
    pub bundle: Bundle,
}

/// Partitioned fan-out outcomes.
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Successful results in registration order.
    pub successes: Vec<ProviderResult>,
    /// Provider errors in registration order.
    pub failures: Vec<ProviderError>,
}

impl FanOutReport {
    /// Returns true if every provider failed.
    pub fn is_total_failure(&self) -> bool {
        self.successes.is_empty()
    }
}

/// Runs provider calls concurrently.
pub struct FanOutExecutor {
    max_wait: Option<Duration>,
    error_sink: Arc<dyn ErrorSink>,
}

impl FanOutExecutor {
    /// Creates an executor. `max_wait = None` disables the per-provider bound.
    pub fn new(max_wait: Option<Duration>, error_sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            max_wait,
            error_sink,
        }
    }

    /// Returns the per-provider wait bound.
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait
    }

    /// Runs the fan-out and partitions the outcomes.
    pub async fn run(
        &self,
        targets: Vec<FanOutTarget>,
        call: Arc<ProviderCall>,
        cancellation: &CancellationToken,
    ) -> FanOutReport {
        let correlation_id = call.correlation_id;
        let outcomes = self.execute_all(targets, call, cancellation).await;
        self.collect(outcomes, correlation_id)
    }

    /// Calls every target concurrently and returns one outcome per target,
    /// in target order.
    pub async fn execute_all(
        &self,
        targets: Vec<FanOutTarget>,
        call: Arc<ProviderCall>,
        cancellation: &CancellationToken,
    ) -> Vec<Outcome> {
        let labels: Vec<(String, bool, Provenance)> = targets
            .iter()
            .map(|t| {
                (
                    t.entry.name.clone(),
                    t.entry.is_for_comparison_only,
                    t.entry.provenance(),
                )
            })
            .collect();

        let tasks = targets.into_iter().map(|target| {
            let call = Arc::clone(&call);
            let global = cancellation.clone();
            let max_wait = self.max_wait;
            tokio::spawn(call_provider(target, call, global, max_wait))
        });

        let started = Instant::now();
        join_all(tasks)
            .await
            .into_iter()
            .zip(labels)
            .map(|(joined, (provider, comparison_only, provenance))| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Provider task did not complete");
                    Outcome {
                        result: Err(ProviderError::failed(
                            &provider,
                            ProviderCallError::TaskAborted {
                                message: e.to_string(),
                            },
                        )),
                        provider,
                        comparison_only,
                        provenance,
                        elapsed: started.elapsed(),
                    }
                }
            })
            .collect()
    }

    /// Partitions outcomes and logs any failures once, in aggregate.
    pub fn collect(&self, outcomes: Vec<Outcome>, correlation_id: CorrelationId) -> FanOutReport {
        let mut report = FanOutReport::default();

        for outcome in outcomes {
            match outcome.result {
                Ok(bundle) => report.successes.push(ProviderResult {
                    provider: outcome.provider,
                    comparison_only: outcome.comparison_only,
                    provenance: outcome.provenance,
                    bundle,
                }),
                Err(e) => report.failures.push(e),
            }
        }

        let aggregate = AggregateProviderError {
            errors: std::mem::take(&mut report.failures),
        };
        if !aggregate.is_empty() {
            warn!(
                correlation_id = %correlation_id,
                failed = aggregate.len(),
                timed_out = aggregate.timeout_count(),
                succeeded = report.successes.len(),
                "Fan-out completed with provider failures"
            );
            self.error_sink.log_error(&aggregate, Some(correlation_id));
        }
        report.failures = aggregate.errors;

        report
    }
}

async fn call_provider(
    target: FanOutTarget,
    call: Arc<ProviderCall>,
    global: CancellationToken,
    max_wait: Option<Duration>,
) -> Outcome {
    let started = Instant::now();
    let FanOutTarget { entry, handle } = target;
    let name = entry.name.clone();
    let provenance = entry.provenance();

    let result = if global.is_cancelled() {
        debug!(provider = %name, "Skipping provider call, request already cancelled");
        Err(ProviderError::cancelled(&name))
    } else {
        let scope = global.child_token();
        let invoke = handle.invoke(&call, scope.clone());
        let bounded = async {
            match max_wait {
                Some(limit) => tokio::time::timeout(limit, invoke).await.ok(),
                None => Some(invoke.await),
            }
        };

        tokio::select! {
            biased;
            _ = global.cancelled() => Err(ProviderError::cancelled(&name)),
            settled = bounded => match settled {
                Some(Ok(mut bundle)) => {
                    provenance.stamp(&mut bundle);
                    Ok(bundle)
                }
                Some(Err(ProviderCallError::Cancelled)) if global.is_cancelled() => {
                    Err(ProviderError::cancelled(&name))
                }
                Some(Err(e)) => Err(ProviderError::failed(&name, e)),
                None => {
                    scope.cancel();
                    let limit_ms = max_wait
                        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                        .unwrap_or_default();
                    Err(ProviderError::timeout(&name, limit_ms))
                }
            },
        }
    };

    let elapsed = started.elapsed();
    match &result {
        Ok(bundle) => debug!(
            provider = %name,
            entries = bundle.entries().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Provider call succeeded"
        ),
        Err(e) => debug!(
            provider = %name,
            error = %e,
            elapsed_ms = elapsed.as_millis() as u64,
            "Provider call did not succeed"
        ),
    }

    Outcome {
        provider: name,
        comparison_only: entry.is_for_comparison_only,
        provenance,
        elapsed,
        result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::core::{CapabilityDescriptor, Operation, ProviderHandle, StaticCapabilities};
    use crate::error::{CancellationScope, ProviderCallResult};
    use crate::types::ProtocolVersion;

    enum Behaviour {
        Respond(Duration),
        Hang,
        Fail,
        Panic,
    }

    struct TestProvider {
        name: String,
        behaviour: Behaviour,
        capabilities: StaticCapabilities,
        calls: AtomicUsize,
    }

    impl TestProvider {
        fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behaviour,
                capabilities: StaticCapabilities::new().with_patient_operation(Operation::Everything),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProviderHandle for TestProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> &dyn CapabilityDescriptor {
            &self.capabilities
        }

        async fn invoke(
            &self,
            _call: &ProviderCall,
            cancellation: CancellationToken,
        ) -> ProviderCallResult<Bundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Respond(delay) => {
                    tokio::time::sleep(delay).await;
                    Bundle::from_value(json!({
                        "resourceType": "Bundle",
                        "type": "searchset",
                        "entry": [{ "resource": { "resourceType": "Patient", "id": self.name } }]
                    }))
                }
                Behaviour::Hang => {
                    cancellation.cancelled().await;
                    Err(ProviderCallError::Cancelled)
                }
                Behaviour::Fail => Err(ProviderCallError::Status {
                    status: 500,
                    message: "internal error".to_string(),
                }),
                Behaviour::Panic => panic!("provider exploded"),
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        errors: Mutex<Vec<String>>,
    }

    impl ErrorSink for CountingSink {
        fn log_error(
            &self,
            error: &(dyn std::error::Error + 'static),
            _correlation_id: Option<CorrelationId>,
        ) {
            self.errors.lock().push(error.to_string());
        }

        fn log_critical(
            &self,
            error: &(dyn std::error::Error + 'static),
            correlation_id: Option<CorrelationId>,
        ) {
            self.log_error(error, correlation_id);
        }
    }

    fn target(provider: &Arc<TestProvider>) -> FanOutTarget {
        FanOutTarget::new(
            Provider::new(&provider.name, ProtocolVersion::R4).with_provenance(
                "https://fhir.example.org/CodeSystem/provider",
                provider.name.to_lowercase(),
                format!("https://{}.example.org/fhir", provider.name.to_lowercase()),
            ),
            provider.clone(),
        )
    }

    fn call() -> Arc<ProviderCall> {
        Arc::new(ProviderCall {
            operation: Operation::Everything,
            resource_type: "Patient".to_string(),
            operation_name: "$everything".to_string(),
            patient_identifier: "9434765919".to_string(),
            parameters: json!({ "resourceType": "Parameters" }),
            correlation_id: CorrelationId::new(),
        })
    }

    fn executor(max_wait: Option<Duration>) -> (FanOutExecutor, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink::default());
        (FanOutExecutor::new(max_wait, sink.clone()), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_keep_target_order_and_are_stamped() {
        let slow = TestProvider::new("DDS", Behaviour::Respond(Duration::from_millis(80)));
        let fast = TestProvider::new("LDS", Behaviour::Respond(Duration::from_millis(10)));
        let (executor, sink) = executor(Some(Duration::from_secs(1)));

        let outcomes = executor
            .execute_all(vec![target(&slow), target(&fast)], call(), &CancellationToken::new())
            .await;

        assert_eq!(outcomes[0].provider, "DDS");
        assert_eq!(outcomes[1].provider, "LDS");
        let bundle = outcomes[0].result.as_ref().unwrap();
        assert!(bundle.has_tag("https://fhir.example.org/CodeSystem/provider", "dds"));
        assert_eq!(bundle.as_object()["meta"]["source"], "https://dds.example.org/fhir");
        assert!(sink.errors.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_isolated() {
        let ok = TestProvider::new("DDS", Behaviour::Respond(Duration::from_millis(50)));
        let hung = TestProvider::new("LDS", Behaviour::Hang);
        let (executor, sink) = executor(Some(Duration::from_millis(100)));

        let started = Instant::now();
        let report = executor
            .run(vec![target(&ok), target(&hung)], call(), &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(report.successes.len(), 1);
        assert_eq!(report.successes[0].provider, "DDS");
        assert_eq!(report.failures.len(), 1);
        match &report.failures[0] {
            ProviderError::Timeout { limit_ms, source, .. } => {
                assert_eq!(*limit_ms, 100);
                assert_eq!(source.scope, CancellationScope::ProviderTimeout);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(
            *sink.errors.lock(),
            vec!["One or more provider calls failed or timed out.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_invokes_nothing() {
        let a = TestProvider::new("DDS", Behaviour::Respond(Duration::ZERO));
        let b = TestProvider::new("LDS", Behaviour::Respond(Duration::ZERO));
        let (executor, _sink) = executor(None);
        let token = CancellationToken::new();
        token.cancel();

        let outcomes = executor
            .execute_all(vec![target(&a), target(&b)], call(), &token)
            .await;

        assert!(outcomes.iter().all(|o| o.kind() == OutcomeKind::Cancelled));
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_cancellation_is_not_a_timeout() {
        let hung = TestProvider::new("LDS", Behaviour::Hang);
        let (executor, _sink) = executor(Some(Duration::from_secs(10)));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcomes = executor.execute_all(vec![target(&hung)], call(), &token).await;
        assert_eq!(outcomes[0].kind(), OutcomeKind::Cancelled);
        assert!(outcomes[0].elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_wait_outlasts_default_bound() {
        let slow = TestProvider::new("DDS", Behaviour::Respond(Duration::from_secs(120)));
        let (executor, _sink) = executor(None);

        let outcomes = executor
            .execute_all(vec![target(&slow)], call(), &CancellationToken::new())
            .await;
        assert!(outcomes[0].is_success());
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_captured() {
        let failing = TestProvider::new("DDS", Behaviour::Fail);
        let panicking = TestProvider::new("LDS", Behaviour::Panic);
        let (executor, sink) = executor(Some(Duration::from_secs(1)));

        let report = executor
            .run(vec![target(&failing), target(&panicking)], call(), &CancellationToken::new())
            .await;

        assert!(report.is_total_failure());
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(
            &report.failures[1],
            ProviderError::Failed { provider, source: ProviderCallError::TaskAborted { .. } }
                if provider == "LDS"
        ));
        assert_eq!(sink.errors.lock().len(), 1);
    }
}
