//! Processor configuration
//!
//! Every limit the scheduler enforces lives here so hosts can tune them per
//! run; nothing is hard-coded in the processor itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default iteration ceiling for loop controllers
pub const DEFAULT_MAX_LOOP_ITERATIONS: u32 = 100;

/// Default time in-flight nodes get to settle after an abort
pub const DEFAULT_ABORT_GRACE_PERIOD_MS: u64 = 5000;

/// Default number of runs for split-run nodes without their own limit
pub const DEFAULT_SPLIT_RUN_MAX: usize = 10;

/// Limits and policies applied by a `GraphProcessor`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessorSettings {
    /// Processor-wide loop ceiling, applied on top of each controller's own
    pub max_loop_iterations: u32,
    /// How long in-flight nodes may keep running after an abort before they
    /// are abandoned; `None` waits for them indefinitely
    pub abort_grace_period_ms: Option<u64>,
    /// Per-node processing timeout
    pub node_timeout_ms: Option<u64>,
    /// Timeout for host external function calls
    pub external_call_timeout_ms: Option<u64>,
    /// Stop launching nodes and cancel in-flight ones after the first error
    pub fail_fast: bool,
    pub split_run_max: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            abort_grace_period_ms: Some(DEFAULT_ABORT_GRACE_PERIOD_MS),
            node_timeout_ms: None,
            external_call_timeout_ms: None,
            fail_fast: true,
            split_run_max: DEFAULT_SPLIT_RUN_MAX,
        }
    }
}

impl ProcessorSettings {
    pub fn with_max_loop_iterations(mut self, max: u32) -> Self {
        self.max_loop_iterations = max;
        self
    }

    pub fn with_abort_grace_period(mut self, grace: Option<Duration>) -> Self {
        self.abort_grace_period_ms = grace.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_node_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.node_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_external_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.external_call_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_split_run_max(mut self, max: usize) -> Self {
        self.split_run_max = max;
        self
    }

    pub fn abort_grace_period(&self) -> Option<Duration> {
        self.abort_grace_period_ms.map(Duration::from_millis)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    pub fn external_call_timeout(&self) -> Option<Duration> {
        self.external_call_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ProcessorSettings::default();
        assert_eq!(settings.max_loop_iterations, 100);
        assert_eq!(settings.abort_grace_period(), Some(Duration::from_secs(5)));
        assert!(settings.fail_fast);
        assert!(settings.node_timeout().is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: ProcessorSettings =
            serde_json::from_str(r#"{ "maxLoopIterations": 3, "abortGracePeriodMs": null }"#).unwrap();
        assert_eq!(settings.max_loop_iterations, 3);
        assert_eq!(settings.abort_grace_period(), None);
        assert_eq!(settings.split_run_max, DEFAULT_SPLIT_RUN_MAX);
    }

    #[test]
    fn test_builders() {
        let settings = ProcessorSettings::default()
            .with_node_timeout(Some(Duration::from_millis(250)))
            .with_fail_fast(false)
            .with_split_run_max(2);
        assert_eq!(settings.node_timeout_ms, Some(250));
        assert!(!settings.fail_fast);
        assert_eq!(settings.split_run_max, 2);
    }
}
