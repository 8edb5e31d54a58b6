use std::fmt::Display;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Retry with exponential backoff: after the n-th failed attempt the policy
/// waits `base_delay * 2^(n-1)` and tries again, up to `max_retries` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds or the retry budget is spent, returning
    /// the last error in the latter case.
    pub fn run<T, E, F>(&self, name: &str, op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        self.run_when(name, |_| true, op)
    }

    /// Like [`RetryPolicy::run`], but errors for which `should_retry`
    /// returns false are returned immediately.
    pub fn run_when<T, E, F, P>(&self, name: &str, should_retry: P, op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        self.run_with_sleeper(name, should_retry, op, thread::sleep)
    }

    pub(crate) fn run_with_sleeper<T, E, F, P, S>(
        &self,
        name: &str,
        should_retry: P,
        mut op: F,
        mut sleep: S,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        S: FnMut(Duration),
    {
        let total_attempts = self.max_retries + 1;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.delay_for_attempt(attempt);
                warn!(
                    operation = name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after delay"
                );
                sleep(delay);
            }

            match op() {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            operation = name,
                            attempt = attempt + 1,
                            "Operation succeeded on retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= total_attempts {
                        error!(
                            operation = name,
                            attempts = total_attempts,
                            error = %e,
                            "Operation failed after all attempts"
                        );
                        return Err(e);
                    }
                    if !should_retry(&e) {
                        warn!(
                            operation = name,
                            error = %e,
                            "Operation failed with non-retryable error"
                        );
                        return Err(e);
                    }
                    warn!(
                        operation = name,
                        attempt,
                        max_attempts = total_attempts,
                        error = %e,
                        "Operation failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(
            policy.delay_for_attempt(40),
            Duration::from_millis(100).saturating_mul(u32::MAX)
        );
    }

    #[test]
    fn succeeds_on_third_call_with_increasing_delays() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Cell::new(0);
        let mut delays = Vec::new();

        let result: Result<&str, String> = policy.run_with_sleeper(
            "flaky",
            |_| true,
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(format!("failure {}", calls.get()))
                } else {
                    Ok("done")
                }
            },
            |d| delays.push(d),
        );

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
        assert_eq!(delays, vec![Duration::from_millis(10), Duration::from_millis(20)]);
        assert!(delays[1] > delays[0]);
    }

    #[test]
    fn returns_last_error_when_exhausted() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let calls = Cell::new(0);
        let result: Result<(), String> = policy.run("always_fails", || {
            calls.set(calls.get() + 1);
            Err(format!("failure {}", calls.get()))
        });
        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_retryable_errors_return_immediately() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let calls = Cell::new(0);
        let result: Result<(), String> = policy.run_when(
            "fatal",
            |e: &String| !e.contains("fatal"),
            || {
                calls.set(calls.get() + 1);
                Err("fatal".to_string())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
