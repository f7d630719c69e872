//! Fault injection for virtual devices.
//!
//! A [`FaultConfig`] decides, per call, whether a device operation should
//! fail with an injected transport error. It is shared (cheaply cloned) by a
//! decorator and its tests so both observe the same counters.

use super::rng::MockRng;
use ivc_core::error::{TransportError, TransportErrorKind};
use parking_lot::Mutex;
use std::sync::Arc;

/// Fault injection configuration for virtual devices
#[derive(Clone, Debug)]
pub struct FaultConfig {
    /// Probability that any single call fails (0.0 to 1.0)
    failure_rate: f64,
    /// Deterministic scenario, if any
    scenario: Option<FaultScenario>,
    /// RNG for failure decisions
    rng: Arc<MockRng>,
    /// Calls seen since the last reset
    calls: Arc<Mutex<u32>>,
}

/// Deterministic failure scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultScenario {
    /// The first `count` calls succeed, every later call fails until reset
    FailAfterN {
        /// Number of calls that succeed.
        count: u32,
    },
}

impl FaultConfig {
    /// Never fail.
    pub fn none() -> Self {
        Self {
            failure_rate: 0.0,
            scenario: None,
            rng: Arc::new(MockRng::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Fail each call with probability `rate`.
    pub fn random_failures(rate: f64) -> Self {
        Self::random_failures_seeded(rate, None)
    }

    /// Fail each call with probability `rate`, drawing from a seeded RNG.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self {
            failure_rate: rate.clamp(0.0, 1.0),
            rng: Arc::new(MockRng::new(seed)),
            ..Self::none()
        }
    }

    /// Succeed `count` times, then fail until [`FaultConfig::reset`].
    pub fn fail_after(count: u32) -> Self {
        Self {
            scenario: Some(FaultScenario::FailAfterN { count }),
            ..Self::none()
        }
    }

    /// Configured failure probability.
    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// Decide whether `operation` on `device` fails.
    pub fn check_operation(&self, device: &str, operation: &'static str) -> Result<(), TransportError> {
        let mut calls = self.calls.lock();
        *calls = calls.saturating_add(1);

        if let Some(FaultScenario::FailAfterN { count }) = self.scenario {
            if *calls > count {
                return Err(TransportError::new(
                    device,
                    TransportErrorKind::Io,
                    format!("Injected failure on '{}' after {} operations", operation, count),
                ));
            }
        }

        if self.rng.should_fail(self.failure_rate) {
            return Err(TransportError::new(
                device,
                TransportErrorKind::Io,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Clear counters so deterministic scenarios start over.
    pub fn reset(&self) {
        *self.calls.lock() = 0;
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = FaultConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("dev", "read").is_ok());
        }
    }

    #[test]
    fn test_random_failures() {
        let config = FaultConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("dev", "read").is_err())
            .count();
        // Expect roughly 50% failures
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_after_n_and_reset() {
        let config = FaultConfig::fail_after(2);
        assert!(config.check_operation("dev", "read").is_ok());
        assert!(config.check_operation("dev", "trigger").is_ok());

        let err = config.check_operation("dev", "read").unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Io);
        assert!(err.message.contains("read"));

        config.reset();
        assert!(config.check_operation("dev", "read").is_ok());
    }

    #[test]
    fn test_clones_share_counters() {
        let config = FaultConfig::fail_after(1);
        let shared = config.clone();
        assert!(config.check_operation("dev", "read").is_ok());
        assert!(shared.check_operation("dev", "read").is_err());
    }
}
