//! Provider health tracking.
//!
//! The monitor is fed with every fan-out outcome and tracks consecutive
//! failures and successes per provider. A provider crossing the failure
//! threshold is marked unhealthy; it recovers after enough consecutive
//! successes.
//!
//! Health is advisory. The selector never skips an unhealthy provider; the
//! status is exposed for operators through [`ProviderHealthMonitor::snapshot`].
//!
//! # Example
//!
//! ```
//! use recordhub_federation::config::HealthConfig;
//! use recordhub_federation::federation::ProviderHealthMonitor;
//!
//! let monitor = ProviderHealthMonitor::new(HealthConfig {
//!     failure_threshold: 1,
//!     success_threshold: 1,
//! });
//! monitor.record_failure("LDS", "Provider call exceeded 100 milliseconds.");
//! assert!(!monitor.is_healthy("LDS"));
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::HealthConfig;

use super::executor::Outcome;

const RESPONSE_SAMPLES: usize = 10;

/// Health status of one provider.
#[derive(Debug, Clone)]
pub struct ProviderHealthStatus {
    /// Provider name.
    pub provider: String,

    /// Whether the provider is currently considered healthy.
    pub is_healthy: bool,

    /// Last successful call.
    pub last_success: Option<Instant>,

    /// Last failed call.
    pub last_failure: Option<Instant>,

    /// Consecutive failure count.
    pub consecutive_failures: u32,

    /// Consecutive success count.
    pub consecutive_successes: u32,

    /// Last error message (if any).
    pub last_error: Option<String>,

    /// Rolling average response time of successful calls in milliseconds.
    pub avg_response_time_ms: f64,

    response_times: Vec<u64>,
}

impl ProviderHealthStatus {
    /// Creates a healthy status with no history.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            is_healthy: true,
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_error: None,
            avg_response_time_ms: 0.0,
            response_times: Vec::with_capacity(RESPONSE_SAMPLES),
        }
    }

    /// Records a successful call.
    pub fn record_success(&mut self, response_time_ms: u64) {
        self.last_success = Some(Instant::now());
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        self.last_error = None;

        self.response_times.push(response_time_ms);
        if self.response_times.len() > RESPONSE_SAMPLES {
            self.response_times.remove(0);
        }
        self.avg_response_time_ms =
            self.response_times.iter().sum::<u64>() as f64 / self.response_times.len() as f64;
    }

    /// Records a failed call.
    pub fn record_failure(&mut self, error: String) {
        self.last_failure = Some(Instant::now());
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_error = Some(error);
    }

    /// Updates the healthy flag from the thresholds.
    pub fn update_health(&mut self, failure_threshold: u32, success_threshold: u32) {
        if self.consecutive_failures >= failure_threshold {
            if self.is_healthy {
                warn!(
                    provider = %self.provider,
                    failures = self.consecutive_failures,
                    "Provider marked unhealthy"
                );
            }
            self.is_healthy = false;
        } else if self.consecutive_successes >= success_threshold {
            if !self.is_healthy {
                info!(
                    provider = %self.provider,
                    successes = self.consecutive_successes,
                    "Provider recovered"
                );
            }
            self.is_healthy = true;
        }
    }

    /// Returns how long since the last successful call.
    pub fn time_since_success(&self) -> Option<Duration> {
        self.last_success.map(|t| t.elapsed())
    }
}

/// Health of every provider seen so far.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// Status per provider.
    pub providers: HashMap<String, ProviderHealthStatus>,

    /// Names of unhealthy providers, sorted.
    pub unhealthy: Vec<String>,
}

impl HealthSnapshot {
    fn new(providers: HashMap<String, ProviderHealthStatus>) -> Self {
        let mut unhealthy: Vec<_> = providers
            .values()
            .filter(|s| !s.is_healthy)
            .map(|s| s.provider.clone())
            .collect();
        unhealthy.sort();
        Self {
            providers,
            unhealthy,
        }
    }

    /// Returns true if no provider is unhealthy.
    pub fn all_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }

    /// Returns the number of healthy providers.
    pub fn healthy_count(&self) -> usize {
        self.providers.values().filter(|s| s.is_healthy).count()
    }
}

/// Tracks provider health from fan-out outcomes.
#[derive(Debug)]
pub struct ProviderHealthMonitor {
    config: HealthConfig,
    status: RwLock<HashMap<String, ProviderHealthStatus>>,
}

impl Default for ProviderHealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl ProviderHealthMonitor {
    /// Creates a monitor with no history.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            status: RwLock::new(HashMap::new()),
        }
    }

    /// Records every outcome of one fan-out.
    ///
    /// Caller cancellations say nothing about the provider and are ignored.
    pub fn record_outcomes(&self, outcomes: &[Outcome]) {
        for outcome in outcomes {
            match &outcome.result {
                Ok(_) => self.record_success(&outcome.provider, outcome.elapsed),
                Err(e) if e.is_cancelled() => {}
                Err(e) => self.record_failure(&outcome.provider, e.to_string()),
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self, provider: &str, elapsed: Duration) {
        let mut status = self.status.write();
        let entry = status
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealthStatus::new(provider));
        entry.record_success(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        entry.update_health(self.config.failure_threshold, self.config.success_threshold);
    }

    /// Records a failed call.
    pub fn record_failure(&self, provider: &str, error: impl Into<String>) {
        let mut status = self.status.write();
        let entry = status
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealthStatus::new(provider));
        entry.record_failure(error.into());
        entry.update_health(self.config.failure_threshold, self.config.success_threshold);
    }

    /// Returns the status of one provider.
    pub fn provider_status(&self, provider: &str) -> Option<ProviderHealthStatus> {
        self.status.read().get(provider).cloned()
    }

    /// Returns true if the provider is healthy or has no history.
    pub fn is_healthy(&self, provider: &str) -> bool {
        self.status
            .read()
            .get(provider)
            .is_none_or(|s| s.is_healthy)
    }

    /// Returns the status of every provider seen so far.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot::new(self.status.read().clone())
    }
}
