pub mod breaker;
pub mod campaign;
pub mod config;
pub mod driver;
pub mod error;
pub mod generator;
pub mod health;
pub mod input;
pub mod keys;
pub mod oracle;
pub mod profile;
pub mod report;
pub mod retry;
pub mod runner;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use campaign::{Campaign, CampaignError};
pub use config::KeystormConfig;
pub use driver::{DriverOptions, PtyDriver};
pub use error::DriverError;
pub use generator::{GeneratorConfig, SequenceGenerator, Strategy};
pub use health::{HealthChecker, HealthReport, HealthThresholds};
pub use input::KeySequence;
pub use oracle::{BehaviorOracle, FuzzOracle, Oracle, RunResult, ViolationKind};
pub use profile::{EditorProfile, profile_for};
pub use report::{BehaviorSummary, CampaignReport, FuzzSummary};
pub use retry::RetryPolicy;
pub use runner::{FuzzRunner, RunnerOptions};
pub use shutdown::{CancellationToken, GracefulShutdown};
