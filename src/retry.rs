//! Retry Controller
//!
//! Runs a fallible async operation with bounded exponential backoff.
//! Attempts are strictly sequential and no delay follows the final attempt.
//! Retry notifications go to an injected [`RetryObserver`] rather than
//! being logged from inside the loop.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::config::RetryConfig;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    /// Optional upper bound for a single wait. `None` keeps the pure
    /// `initial_delay * backoff_multiplier^(k-1)` schedule.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: None,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: config.max_delay_ms.map(Duration::from_millis),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, i.e. after the `attempt`-th failure
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let nanos = self.initial_delay.as_nanos() as f64 * factor;
        let ceiling = self.max_delay.unwrap_or(Duration::MAX);
        if !nanos.is_finite() || nanos >= ceiling.as_nanos() as f64 {
            return ceiling;
        }
        Duration::from_nanos(nanos.round().max(0.0) as u64)
    }
}

/// Emitted before each backoff wait
#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub operation: String,
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub error: String,
}

/// Receives retry notifications
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, event: &RetryEvent);
}

/// Default observer: one warning line per retry
#[derive(Debug, Default)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, event: &RetryEvent) {
        warn!(
            operation = %event.operation,
            attempt = event.attempt,
            max_attempts = event.max_attempts,
            delay_ms = event.delay.as_millis() as u64,
            "Retrying after error: {}",
            event.error
        );
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Always in `1..=max_attempts`
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Retry controller with a fixed policy and observer
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_observer(policy, Arc::new(TracingRetryObserver))
    }

    pub fn with_observer(policy: RetryPolicy, observer: Arc<dyn RetryObserver>) -> Self {
        Self { policy, observer }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying any error
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_with(operation_name, operation, |_| true).await
    }

    /// Run `operation`, retrying only errors accepted by `should_retry`
    pub async fn run_with<T, E, F, Fut, P>(
        &self,
        operation_name: &str,
        mut operation: F,
        should_retry: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    };
                }
                Err(e) => e,
            };

            if attempt >= max_attempts || !should_retry(&error) {
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }

            let delay = self.policy.delay_after(attempt);
            self.observer.on_retry(&RetryEvent {
                operation: operation_name.to_string(),
                attempt,
                max_attempts,
                delay,
                error: error.to_string(),
            });

            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<RetryEvent>>,
    }

    impl RetryObserver for RecordingObserver {
        fn on_retry(&self, event: &RetryEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn assert_waited(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(1),
            "waited {:?}, expected {:?}",
            actual,
            expected
        );
    }

    fn policy(max_attempts: u32, initial_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            backoff_multiplier: 2.0,
            max_delay: None,
        }
    }

    #[test]
    fn test_delay_schedule() {
        let p = policy(5, 100);
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_uncapped_by_default() {
        let p = RetryPolicy {
            max_attempts: 12,
            ..RetryPolicy::default()
        };
        // 200ms * 2^9
        assert_eq!(p.delay_after(10), Duration::from_millis(102_400));
        assert_eq!(RetryPolicy::from(&RetryConfig::default()), RetryPolicy::default());
    }

    #[test]
    fn test_delay_capped() {
        let mut p = policy(10, 1000);
        p.max_delay = Some(Duration::from_millis(1500));
        assert_eq!(p.delay_after(2), Duration::from_millis(1500));
        assert_eq!(p.delay_after(30), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let observer = Arc::new(RecordingObserver::default());
        let controller = RetryController::with_observer(policy(3, 100), observer.clone());
        let calls = AtomicU32::new(0);
        let stamps = Mutex::new(Vec::new());

        let outcome = controller
            .run("flaky", || {
                stamps.lock().push(Instant::now());
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format!("failure {}", n))
                    } else {
                        Ok(0.9f32)
                    }
                }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap(), 0.9);

        let stamps = stamps.lock();
        assert_waited(stamps[1] - stamps[0], 100);
        assert_waited(stamps[2] - stamps[1], 200);

        let events = observer.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].attempt, 1);
        assert_eq!(events[1].delay, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_rejects_first_failure() {
        let controller = RetryController::with_observer(
            policy(5, 100),
            Arc::new(RecordingObserver::default()),
        );
        let outcome: RetryOutcome<(), String> = controller
            .run_with("auth", || async { Err("unauthorized".to_string()) }, |_| false)
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_without_trailing_delay() {
        let controller = RetryController::with_observer(
            policy(3, 100),
            Arc::new(RecordingObserver::default()),
        );
        let outcome: RetryOutcome<(), String> = controller
            .run("always", || async { Err("down".to_string()) })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap_err(), "down");
        // 100 + 200, no wait after the third attempt
        assert!(outcome.elapsed >= Duration::from_millis(300));
        assert!(outcome.elapsed < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let controller = RetryController::new(RetryPolicy::default());
        let outcome = controller.run("ok", || async { Ok::<_, String>(42) }).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.into_result().unwrap(), 42);
    }
}
