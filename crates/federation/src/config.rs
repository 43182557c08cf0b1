//! Engine configuration.
//!
//! Configuration is resolved once at startup and handed to the coordinator;
//! the engine never reads the environment during a request.
//!
//! # Settings
//!
//! | Field | Default | Description |
//! |-------|---------|-------------|
//! | `max_provider_wait_time_ms` | 30000 | Per-provider wait bound; `<= 0` disables it |
//! | `audit_category` | `federation` | Category stamped on audit events |
//! | `health.failure_threshold` | 3 | Consecutive failures before a provider is unhealthy |
//! | `health.success_threshold` | 2 | Consecutive successes before it recovers |
//!
//! # Example
//!
//! ```
//! use recordhub_federation::FederationConfig;
//!
//! let config: FederationConfig =
//!     serde_json::from_str(r#"{ "maxProviderWaitTimeMs": 1500 }"#).unwrap();
//! assert_eq!(config.max_provider_wait().unwrap().as_millis(), 1500);
//! assert_eq!(config.audit_category, "federation");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Provider health tracking thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    /// Number of consecutive failures before marking unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Federation engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationConfig {
    /// Per-provider wait bound in milliseconds. Zero or negative means unbounded.
    #[serde(default = "default_max_provider_wait_time_ms")]
    pub max_provider_wait_time_ms: i64,

    /// Category stamped on audit events.
    #[serde(default = "default_audit_category")]
    pub audit_category: String,

    /// Health tracking thresholds.
    #[serde(default)]
    pub health: HealthConfig,
}

fn default_max_provider_wait_time_ms() -> i64 {
    30_000
}

fn default_audit_category() -> String {
    "federation".to_string()
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_provider_wait_time_ms: default_max_provider_wait_time_ms(),
            audit_category: default_audit_category(),
            health: HealthConfig::default(),
        }
    }
}

impl FederationConfig {
    /// Returns the per-provider wait bound, or `None` when disabled.
    pub fn max_provider_wait(&self) -> Option<Duration> {
        u64::try_from(self.max_provider_wait_time_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Sets the per-provider wait bound.
    pub fn with_max_provider_wait_time_ms(mut self, ms: i64) -> Self {
        self.max_provider_wait_time_ms = ms;
        self
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.audit_category.trim().is_empty() {
            errors.push("Audit category cannot be empty".to_string());
        }

        if self.health.failure_threshold == 0 {
            errors.push("Health failure threshold cannot be 0".to_string());
        }

        if self.health.success_threshold == 0 {
            errors.push("Health success threshold cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    ///
    /// Uses a short wait bound so hanging test providers settle quickly.
    pub fn for_testing() -> Self {
        Self {
            max_provider_wait_time_ms: 200,
            audit_category: "federation-test".to_string(),
            health: HealthConfig {
                failure_threshold: 1,
                success_threshold: 1,
            },
        }
    }
}
