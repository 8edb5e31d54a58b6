use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("Circuit breaker for {name} is open")]
    Open { name: String },

    #[error("{0}")]
    Inner(E),
}

/// Stops calling a failing target for `recovery_timeout` once
/// `failure_threshold` consecutive failures have been seen.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn call<T, E, F>(&mut self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.call_with_clock(Instant::now, op)
    }

    /// The clock is read before admission and again once `op` has failed, so
    /// the recovery window starts when the failure happened.
    fn call_with_clock<T, E, C, F>(&mut self, mut clock: C, op: F) -> Result<T, BreakerError<E>>
    where
        C: FnMut() -> Instant,
        F: FnOnce() -> Result<T, E>,
    {
        let now = clock();
        if self.state == CircuitState::Open {
            let elapsed = self
                .last_failure
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or(Duration::MAX);
            if elapsed < self.config.recovery_timeout {
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
            self.state = CircuitState::HalfOpen;
            info!(breaker = %self.name, "Circuit breaker half-open, probing");
        }

        match op() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(clock());
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn on_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            info!(breaker = %self.name, "Circuit breaker closed after successful probe");
        }
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    fn on_failure(&mut self, now: Instant) {
        self.failure_count += 1;
        self.last_failure = Some(now);

        if self.state == CircuitState::HalfOpen
            || self.failure_count >= self.config.failure_threshold
        {
            if self.state != CircuitState::Open {
                warn!(
                    breaker = %self.name,
                    failures = self.failure_count,
                    "Circuit breaker opened"
                );
            }
            self.state = CircuitState::Open;
        }
    }
}

/// One breaker per target name, created on first use.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: HashMap<String, CircuitBreaker>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: HashMap::new(),
        }
    }

    pub fn get(&mut self, name: &str) -> &mut CircuitBreaker {
        let config = self.config;
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, config))
    }

    pub fn state_of(&self, name: &str) -> Option<CircuitState> {
        self.breakers.get(name).map(CircuitBreaker::state)
    }
}
