//! Long-running campaigns against one target.
//!
//! A [`Campaign`] wraps every run in the target's circuit breaker and the
//! retry policy, checks the cancellation token between runs and keeps the
//! breaker state keyed by target name so several campaigns never share it.

use crate::breaker::{BreakerConfig, BreakerError, BreakerRegistry, CircuitState};
use crate::error::DriverError;
use crate::generator::{self, BehaviorTestCase, SequenceGenerator, Strategy};
use crate::health::{HealthChecker, HealthReport};
use crate::input::KeySequence;
use crate::oracle::{BehaviorResult, RunResult};
use crate::retry::RetryPolicy;
use crate::runner::FuzzRunner;
use crate::shutdown::CancellationToken;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

const PROGRESS_INTERVAL: usize = 10;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error(
        "Health check failed for {editor} (binary ok: {binary_ok}, resources ok: {resources_ok})"
    )]
    Unhealthy {
        editor: String,
        binary_ok: bool,
        resources_ok: bool,
    },
}

pub struct Campaign {
    runner: FuzzRunner,
    retry: RetryPolicy,
    breakers: BreakerRegistry,
    token: CancellationToken,
}

impl Campaign {
    pub fn new(
        runner: FuzzRunner,
        retry: RetryPolicy,
        breaker: BreakerConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            runner,
            retry,
            breakers: BreakerRegistry::new(breaker),
            token,
        }
    }

    pub fn runner(&self) -> &FuzzRunner {
        &self.runner
    }

    pub fn breaker_state(&self) -> Option<CircuitState> {
        self.breakers.state_of(self.runner.editor())
    }

    /// Go/no-go check before any editor is launched.
    pub fn health_gate(&self, checker: &HealthChecker) -> Result<HealthReport, CampaignError> {
        let report = checker.run(self.runner.profile());
        if report.healthy() {
            info!(editor = %self.runner.editor(), "Health check passed");
            Ok(report)
        } else {
            Err(CampaignError::Unhealthy {
                editor: report.editor.clone(),
                binary_ok: report.binary_ok,
                resources_ok: report.resources.healthy,
            })
        }
    }

    /// Runs one sequence through the breaker and retry policy and records
    /// the result. Only transient harness errors are retried.
    pub fn run_one(&mut self, sequence: &KeySequence) -> RunResult {
        let started_at = Instant::now();
        let editor = self.runner.editor().to_string();
        let runner = &self.runner;
        let retry = &self.retry;

        let outcome = self.breakers.get(&editor).call(|| {
            retry.run_when(&editor, DriverError::is_transient, || {
                runner.try_run_sequence(sequence)
            })
        });

        let result = match outcome {
            Ok(result) => result,
            Err(BreakerError::Open { name }) => {
                warn!(editor = %name, "Skipping run, circuit breaker open");
                RunResult::failed(
                    sequence,
                    format!("Circuit breaker for {name} is open"),
                    None,
                    Duration::ZERO,
                )
            }
            Err(BreakerError::Inner(e)) => {
                FuzzRunner::failure_result(sequence, &e, started_at.elapsed())
            }
        };
        self.runner.record(result.clone());
        result
    }

    /// Runs `sequences` in order until exhausted or cancelled.
    pub fn run_sequences<I>(&mut self, label: &str, sequences: I) -> Vec<RunResult>
    where
        I: IntoIterator<Item = KeySequence>,
    {
        let mut results = Vec::new();
        for sequence in sequences {
            if self.token.is_cancelled() {
                info!(label, completed = results.len(), "Campaign cancelled");
                break;
            }
            results.push(self.run_one(&sequence));

            if results.len() % PROGRESS_INTERVAL == 0 {
                let passed = results.iter().filter(|r: &&RunResult| r.success).count();
                info!(
                    label,
                    completed = results.len(),
                    success_rate = passed as f64 / results.len() as f64,
                    "Progress"
                );
            }
        }
        results
    }

    /// `iterations` random sequences followed by the edge-case catalog.
    pub fn run_fuzz(
        &mut self,
        generator: &mut SequenceGenerator,
        iterations: usize,
    ) -> Vec<RunResult> {
        let random: Vec<KeySequence> = (0..iterations).map(|_| generator.generate()).collect();
        let mut results = self.run_sequences("random", random);
        results.extend(self.run_edge_cases());
        results
    }

    pub fn run_edge_cases(&mut self) -> Vec<RunResult> {
        let sequences = generator::edge_case_sequences().into_iter().map(|c| c.sequence);
        self.run_sequences("edge_cases", sequences)
    }

    pub fn run_stress(&mut self) -> Vec<RunResult> {
        let sequences = generator::stress_sequences().into_iter().map(|c| c.sequence);
        self.run_sequences("stress", sequences)
    }

    /// Runs one behavior case through the breaker and retry policy, like
    /// [`Campaign::run_one`].
    pub fn run_behavior_case(&mut self, case: &BehaviorTestCase) -> BehaviorResult {
        let started_at = Instant::now();
        let editor = self.runner.editor().to_string();
        let runner = &self.runner;
        let retry = &self.retry;

        let outcome = self.breakers.get(&editor).call(|| {
            retry.run_when(&editor, DriverError::is_transient, || {
                runner.try_run_behavior_case(case)
            })
        });

        let result = match outcome {
            Ok(result) => result,
            Err(BreakerError::Open { name }) => {
                warn!(
                    editor = %name,
                    test = %case.name,
                    "Skipping behavior test, circuit breaker open"
                );
                BehaviorResult::skipped(
                    case,
                    format!("Circuit breaker for {name} is open"),
                    Duration::ZERO,
                )
            }
            Err(BreakerError::Inner(e)) => BehaviorResult::failed(case, &e, started_at.elapsed()),
        };
        self.runner.record_behavior(result.clone());
        result
    }

    pub fn run_behavior(&mut self) -> Vec<BehaviorResult> {
        let mut results = Vec::new();
        for case in generator::behavior_test_cases() {
            if self.token.is_cancelled() {
                info!(completed = results.len(), "Behavior suite cancelled");
                break;
            }
            results.push(self.run_behavior_case(&case));
        }
        results
    }

    /// Every strategy in turn, `iterations` sequences each.
    pub fn run_aggressive(
        &mut self,
        generator: &mut SequenceGenerator,
        iterations: usize,
    ) -> BTreeMap<Strategy, Vec<RunResult>> {
        let mut by_strategy = BTreeMap::new();
        for strategy in Strategy::ALL {
            if self.token.is_cancelled() {
                break;
            }
            let sequences: Vec<KeySequence> =
                (0..iterations).map(|_| generator.generate_for(strategy)).collect();
            let results = self.run_sequences(&strategy.to_string(), sequences);
            let passed = results.iter().filter(|r| r.success).count();
            info!(%strategy, passed, total = results.len(), "Strategy finished");
            by_strategy.insert(strategy, results);
        }
        by_strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthThresholds;
    use crate::oracle::ViolationKind;
    use crate::profile::EditorProfile;
    use crate::runner::RunnerOptions;
    use crate::testing::{fast_options, shell_target};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts launch attempts and always points at a missing binary.
    #[derive(Debug, Default)]
    struct UnlaunchableProfile {
        launches: AtomicUsize,
    }

    impl EditorProfile for UnlaunchableProfile {
        fn name(&self) -> &str {
            "unlaunchable"
        }

        fn binary(&self) -> &Path {
            Path::new("/nonexistent/unlaunchable")
        }

        fn command(&self, _file: Option<&Path>) -> Vec<String> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            vec!["/nonexistent/unlaunchable".to_string()]
        }

        fn quit_keys(&self) -> &str {
            ":q<CR>"
        }

        fn force_quit_keys(&self) -> &str {
            ":q!<CR>"
        }
    }

    fn campaign_for(profile: Arc<dyn EditorProfile>, threshold: u32) -> Campaign {
        let runner = FuzzRunner::new(profile, fast_options(), RunnerOptions::default());
        Campaign::new(
            runner,
            RetryPolicy::new(2, Duration::ZERO),
            BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(60),
            },
            CancellationToken::new(),
        )
    }

    #[test]
    fn transient_failures_are_retried_then_trip_the_breaker() {
        let profile = Arc::new(UnlaunchableProfile::default());
        let mut campaign = campaign_for(profile.clone(), 1);
        let sequence = KeySequence::from("x");

        let first = campaign.run_one(&sequence);
        assert!(!first.success);
        assert!(first.error.as_deref().unwrap().contains("Failed to spawn"));
        assert_eq!(profile.launches.load(Ordering::SeqCst), 3);
        assert_eq!(campaign.breaker_state(), Some(CircuitState::Open));

        let second = campaign.run_one(&sequence);
        assert!(second.error.as_deref().unwrap().contains("Circuit breaker"));
        assert_eq!(profile.launches.load(Ordering::SeqCst), 3, "open breaker must not launch");
        assert_eq!(campaign.runner().results().len(), 2);
    }

    #[test]
    fn behavior_cases_share_retry_and_breaker() {
        let profile = Arc::new(UnlaunchableProfile::default());
        let mut campaign = campaign_for(profile.clone(), 1);

        let results = campaign.run_behavior();
        assert_eq!(results.len(), generator::behavior_test_cases().len());
        assert_eq!(profile.launches.load(Ordering::SeqCst), 3, "only the first case launches");
        assert_eq!(campaign.breaker_state(), Some(CircuitState::Open));

        assert_eq!(results[0].violation, Some(ViolationKind::Crash));
        assert!(results[0].error.as_deref().unwrap().contains("Failed to spawn"));
        for skipped in &results[1..] {
            assert!(!skipped.passed);
            assert!(skipped.error.as_deref().unwrap().contains("Circuit breaker"));
        }
        assert_eq!(campaign.runner().behavior_results().len(), results.len());
    }

    #[test]
    fn findings_do_not_count_against_the_breaker() {
        let mut campaign = campaign_for(shell_target("exit_on_input.sh"), 1);
        let results = campaign.run_sequences(
            "test",
            vec![KeySequence::from("a"), KeySequence::from("b")],
        );
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.unexpected_exit));
        assert_eq!(campaign.breaker_state(), Some(CircuitState::Closed));
    }

    #[test]
    fn cancelled_campaign_runs_nothing() {
        let token = CancellationToken::new();
        let runner = FuzzRunner::new(
            shell_target("well_behaved.sh"),
            fast_options(),
            RunnerOptions::default(),
        );
        let mut campaign = Campaign::new(
            runner,
            RetryPolicy::default(),
            BreakerConfig::default(),
            token.clone(),
        );
        token.cancel();

        assert!(campaign.run_sequences("test", vec![KeySequence::from("h")]).is_empty());
        assert!(campaign.run_behavior().is_empty());
        let mut generator = SequenceGenerator::new(Default::default());
        assert!(campaign.run_aggressive(&mut generator, 3).is_empty());
    }

    #[test]
    fn health_gate_rejects_missing_binary() {
        let campaign = campaign_for(Arc::new(UnlaunchableProfile::default()), 5);
        let checker = HealthChecker::new(HealthThresholds {
            max_cpu_percent: 101.0,
            max_memory_percent: 101.0,
        });
        match campaign.health_gate(&checker) {
            Err(CampaignError::Unhealthy { binary_ok, resources_ok, .. }) => {
                assert!(!binary_ok);
                assert!(resources_ok);
            }
            Ok(_) => panic!("missing binary must fail the health gate"),
        }
    }
}
