// SPDX-License-Identifier: Apache-2.0

//! Capability tuning and performance budgets.
//!
//! The kernel triple (schema validation, rate limiting, metrics) is always on:
//! tuning can adjust it but never remove it. Extension capabilities (state,
//! retry, circuit breaker) are opt-in through their presence in
//! [`CapabilityTuning`]. Budgets are contracts published in
//! `capability_budgets.yaml`; blueprint overrides must stay within the
//! declared maxima.

use crate::error::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Tuning for the schema-validation capability (tier 10).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SchemaValidatorConfig {
    /// Reject fields that are not declared in the schema.
    #[serde(default = "default_strict_mode")]
    pub strict_mode: bool,
}

fn default_strict_mode() -> bool {
    true
}

impl Default for SchemaValidatorConfig {
    fn default() -> Self {
        Self {
            strict_mode: default_strict_mode(),
        }
    }
}

/// Tuning for the rate-limiting capability (tier 20).
///
/// The limiter is never removable; effectively-unlimited throughput is
/// configured with a very high rate, which is also the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Sustained rate in permits per second.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Maximum burst size in permits.
    #[serde(default = "default_burst")]
    pub burst: u64,
}

fn default_rate() -> f64 {
    1_000_000.0
}

fn default_burst() -> u64 {
    1_000_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
        }
    }
}

/// Tuning for the opt-in retry capability (tier 40).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Tuning for the opt-in circuit-breaker capability (tier 50).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures that opens the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the circuit stays open before probing (half-open), in milliseconds.
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_ms() -> u64 {
    30_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

/// Backend selection for the opt-in state capability (tier 30).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// Process-local in-memory store. For tests and ephemeral components.
    Memory,
    /// SQLite file store, the default for local deployments.
    Sqlite {
        /// Path to the SQLite database file.
        path: String,
    },
    /// Redis snapshot store.
    Redis {
        /// Redis connection URL.
        url: String,
    },
}

/// Per-component capability tuning carried in the component configuration.
///
/// The kernel entries always deserialize (with defaults); the extension
/// entries are opt-in through presence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CapabilityTuning {
    /// Schema-validator tuning (kernel, tier 10).
    #[serde(default)]
    pub schema_validator: SchemaValidatorConfig,
    /// Rate-limiter tuning (kernel, tier 20).
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// State capability (tier 30), opt-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateBackend>,
    /// Retry capability (tier 40), opt-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Circuit-breaker capability (tier 50), opt-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

/// Published performance budget for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Budget {
    /// p95 per-item latency budget in milliseconds.
    pub max_latency_ms: f64,
    /// Maximum resident memory in megabytes.
    pub max_memory_mb: u64,
}

/// The set of published capability budgets, keyed by capability name.
///
/// Budgets are contracts: the build-time micro-benchmarks fail when a
/// capability regresses past its budget, and blueprint overrides may only
/// tighten, never exceed, the declared maxima.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CapabilityBudgets {
    /// Budget per capability name (e.g. `schema_validator`).
    pub budgets: BTreeMap<String, Budget>,
}

impl CapabilityBudgets {
    /// Loads budgets from a YAML file (typically `capability_budgets.yaml`).
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the file cannot be read or parsed.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
                context: Default::default(),
                details: e.to_string(),
            })?;
        serde_yaml::from_str(&contents).map_err(|e| Error::DeserializationError {
            context: Default::default(),
            format: "YAML".to_string(),
            details: e.to_string(),
        })
    }

    /// Returns the budget for a capability, if declared.
    #[must_use]
    pub fn get(&self, capability: &str) -> Option<&Budget> {
        self.budgets.get(capability)
    }

    /// Returns `true` if no budgets are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }

    /// Applies blueprint overrides on top of these (declared-maxima) budgets.
    ///
    /// An override may tighten a budget but never exceed the declared maximum;
    /// overrides for capabilities with no declared budget are accepted as-is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BudgetExceeded`] for the first override past a maximum.
    pub fn apply_overrides(&self, overrides: &CapabilityBudgets) -> Result<Self, Error> {
        let mut merged = self.clone();
        for (name, requested) in &overrides.budgets {
            if let Some(maximum) = self.budgets.get(name) {
                if requested.max_latency_ms > maximum.max_latency_ms {
                    return Err(Error::BudgetExceeded {
                        capability: name.clone(),
                        field: "max_latency_ms".to_string(),
                        requested: requested.max_latency_ms as u64,
                        maximum: maximum.max_latency_ms as u64,
                    });
                }
                if requested.max_memory_mb > maximum.max_memory_mb {
                    return Err(Error::BudgetExceeded {
                        capability: name.clone(),
                        field: "max_memory_mb".to_string(),
                        requested: requested.max_memory_mb,
                        maximum: maximum.max_memory_mb,
                    });
                }
            }
            let _ = merged.budgets.insert(name.clone(), *requested);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults_keep_kernel_on() {
        let tuning: CapabilityTuning = serde_yaml::from_str("{}").unwrap();
        assert!(tuning.schema_validator.strict_mode);
        assert!(tuning.rate_limit.rate >= 1_000_000.0);
        assert!(tuning.state.is_none());
        assert!(tuning.retry.is_none());
        assert!(tuning.circuit_breaker.is_none());
    }

    #[test]
    fn tuning_rejects_unknown_options() {
        let result: Result<CapabilityTuning, _> =
            serde_yaml::from_str("bypass_validation: true");
        assert!(result.is_err());
    }

    #[test]
    fn opt_in_capabilities_by_presence() {
        let yaml = r#"
rate_limit:
  rate: 100.0
  burst: 100
retry:
  max_attempts: 5
state:
  sqlite:
    path: "/tmp/state.db"
"#;
        let tuning: CapabilityTuning = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tuning.rate_limit.rate, 100.0);
        assert_eq!(tuning.retry.as_ref().unwrap().max_attempts, 5);
        assert_eq!(tuning.retry.as_ref().unwrap().initial_delay_ms, 100);
        assert!(matches!(tuning.state, Some(StateBackend::Sqlite { .. })));
    }

    #[test]
    fn budget_overrides_must_stay_within_maxima() {
        let declared: CapabilityBudgets = serde_yaml::from_str(
            r#"
schema_validator:
  max_latency_ms: 0.05
  max_memory_mb: 16
"#,
        )
        .unwrap();

        let tighter: CapabilityBudgets = serde_yaml::from_str(
            r#"
schema_validator:
  max_latency_ms: 0.01
  max_memory_mb: 8
"#,
        )
        .unwrap();
        let merged = declared.apply_overrides(&tighter).unwrap();
        assert_eq!(merged.get("schema_validator").unwrap().max_memory_mb, 8);

        let looser: CapabilityBudgets = serde_yaml::from_str(
            r#"
schema_validator:
  max_latency_ms: 10.0
  max_memory_mb: 16
"#,
        )
        .unwrap();
        assert!(matches!(
            declared.apply_overrides(&looser),
            Err(Error::BudgetExceeded { field, .. }) if field == "max_latency_ms"
        ));
    }
}
