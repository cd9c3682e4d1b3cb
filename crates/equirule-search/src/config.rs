//! Enumeration and batch settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumeratorConfig {
    /// Wall-clock budget for one template pair. `None` means unbounded.
    pub timeout_ms: Option<u64>,
    /// Skip the output-arity check (diagnostics only).
    pub disable_output_breaker: bool,
    /// Skip the summation-shape check (diagnostics only).
    pub disable_summation_breaker: bool,
    /// Record every reached leaf as Eq without consulting the oracle.
    pub dry_run: bool,
    /// Apply unique-key and not-null canonicalization before the oracle.
    pub canonicalize: bool,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            disable_output_breaker: false,
            disable_summation_breaker: false,
            dry_run: false,
            canonicalize: true,
        }
    }
}

impl EnumeratorConfig {
    /// Dry run is implied when either breaker is disabled.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run || self.disable_output_breaker || self.disable_summation_breaker
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads; `None` uses the global rayon pool.
    pub threads: Option<usize>,
    pub enumerator: EnumeratorConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: EnumeratorConfig = serde_json::from_str(r#"{"timeout_ms": 250}"#).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));
        assert!(config.canonicalize);
        assert!(!config.is_dry_run());

        let batch: BatchConfig =
            serde_json::from_str(r#"{"enumerator": {"disable_summation_breaker": true}}"#).unwrap();
        assert!(batch.threads.is_none());
        assert!(batch.enumerator.is_dry_run());
    }
}
