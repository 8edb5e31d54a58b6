//! Runs one sequence against a fresh editor process and classifies the
//! outcome.
//!
//! Every run follows the same skeleton: spawn, send, probe, quit, clean up.
//! Target misbehaviour is always returned as a result value; only harness
//! infrastructure failures surface as `Err` from [`FuzzRunner::try_run_sequence`]
//! so callers can retry them.

use crate::driver::{DriverOptions, PtyDriver};
use crate::error::DriverError;
use crate::generator::BehaviorTestCase;
use crate::input::KeySequence;
use crate::oracle::{
    BehaviorOracle, BehaviorResult, FuzzOracle, Observation, Oracle, RunResult, ViolationKind,
};
use crate::profile::EditorProfile;
use crate::report::{BehaviorSummary, FuzzSummary};
use crate::shutdown::ProcessRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long a case that should quit gets to do so.
const BEHAVIOR_EXIT_DEADLINE: Duration = Duration::from_secs(1);
/// Settle time before probing a case that should not quit.
const BEHAVIOR_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub key_delay: Duration,
    /// Time spent draining output after the last key.
    pub settle: Duration,
    pub strict_tokens: bool,
    pub file: Option<PathBuf>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            key_delay: Duration::from_millis(1),
            settle: Duration::from_millis(100),
            strict_tokens: false,
            file: None,
        }
    }
}

pub struct FuzzRunner {
    profile: Arc<dyn EditorProfile>,
    driver_options: DriverOptions,
    options: RunnerOptions,
    registry: ProcessRegistry,
    results: Vec<RunResult>,
    behavior_results: Vec<BehaviorResult>,
}

impl FuzzRunner {
    pub fn new(
        profile: Arc<dyn EditorProfile>,
        driver_options: DriverOptions,
        options: RunnerOptions,
    ) -> Self {
        Self {
            profile,
            driver_options,
            options,
            registry: ProcessRegistry::default(),
            results: Vec::new(),
            behavior_results: Vec::new(),
        }
    }

    /// Share a registry with the shutdown sweep.
    pub fn with_registry(mut self, registry: ProcessRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn editor(&self) -> &str {
        self.profile.name()
    }

    pub fn profile(&self) -> &dyn EditorProfile {
        self.profile.as_ref()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    pub fn behavior_results(&self) -> &[BehaviorResult] {
        &self.behavior_results
    }

    fn new_driver(&self) -> PtyDriver {
        PtyDriver::new(Arc::clone(&self.profile), self.driver_options.clone())
            .with_registry(self.registry.clone())
    }

    /// Drives `sequence` in fuzz mode. Returns `Err` only when the editor
    /// could not be brought up; the driver has already been cleaned up then.
    pub fn try_run_sequence(&self, sequence: &KeySequence) -> Result<RunResult, DriverError> {
        let started_at = Instant::now();
        let mut driver = self.new_driver();
        driver.start(self.options.file.as_deref())?;
        debug!(editor = %self.editor(), sequence = %sequence.preview(50), "Running sequence");

        let mut observation = Observation::default();
        match driver.send(sequence.as_str(), self.options.key_delay) {
            Ok(report) => observation.unknown_tokens = report.unknown_tokens.len(),
            Err(DriverError::UnexpectedExit { .. }) => {
                driver.cleanup();
                let observation = Observation {
                    exited: true,
                    ..observation
                };
                return Ok(self.classify(sequence, observation, started_at));
            }
            Err(e) => return Ok(self.abandon(&mut driver, sequence, e, started_at)),
        }

        if let Err(e) = driver.read(self.options.settle) {
            return Ok(self.abandon(&mut driver, sequence, e, started_at));
        }

        if !driver.is_alive() {
            driver.cleanup();
            observation.exited = true;
            return Ok(self.classify(sequence, observation, started_at));
        }

        // Buffer state is arbitrary after random input, so always force-quit.
        match driver.quit(true) {
            Ok(report) => observation.signalled_on_quit = report.signalled,
            Err(e) => return Ok(self.abandon(&mut driver, sequence, e, started_at)),
        }
        Ok(self.classify(sequence, observation, started_at))
    }

    fn classify(
        &self,
        sequence: &KeySequence,
        observation: Observation,
        started_at: Instant,
    ) -> RunResult {
        let oracle = FuzzOracle {
            strict_tokens: self.options.strict_tokens,
        };
        let violation = oracle.examine(&observation);
        if let Some(kind) = violation {
            warn!(
                editor = %self.editor(),
                violation = %kind,
                sequence = %sequence.preview(50),
                "Violation detected"
            );
        }
        RunResult::classified(sequence, observation, violation, started_at.elapsed())
    }

    /// Force-quits after a terminal I/O error on a live editor.
    fn abandon(
        &self,
        driver: &mut PtyDriver,
        sequence: &KeySequence,
        error: DriverError,
        started_at: Instant,
    ) -> RunResult {
        warn!(editor = %self.editor(), error = %error, "Run failed, force-quitting editor");
        if let Err(e) = driver.quit(true) {
            debug!(editor = %self.editor(), error = %e, "Force quit failed");
        }
        driver.cleanup();
        RunResult::failed(
            sequence,
            error.to_string(),
            Some(ViolationKind::Crash),
            started_at.elapsed(),
        )
    }

    /// Result for a run whose infrastructure failure could not be recovered.
    /// Anything but the target dying on its own is a harness `CRASH`.
    pub fn failure_result(
        sequence: &KeySequence,
        error: &DriverError,
        elapsed: Duration,
    ) -> RunResult {
        let violation = match error {
            DriverError::UnexpectedExit { .. } => ViolationKind::UnexpectedExit,
            _ => ViolationKind::Crash,
        };
        RunResult::failed(sequence, error.to_string(), Some(violation), elapsed)
    }

    /// Runs `sequence` once and records the result, folding infrastructure
    /// errors into a failed result.
    pub fn run_sequence(&mut self, sequence: &KeySequence) -> RunResult {
        let started_at = Instant::now();
        let result = self
            .try_run_sequence(sequence)
            .unwrap_or_else(|e| Self::failure_result(sequence, &e, started_at.elapsed()));
        self.record(result.clone());
        result
    }

    pub fn record(&mut self, result: RunResult) {
        self.results.push(result);
    }

    /// Runs one behavior case and records it. Harness errors are classified
    /// as `CRASH`.
    pub fn run_behavior_case(&mut self, case: &BehaviorTestCase) -> BehaviorResult {
        let started_at = Instant::now();
        let result = self.try_run_behavior_case(case).unwrap_or_else(|e| {
            BehaviorResult::failed(case, &e, started_at.elapsed())
        });
        self.record_behavior(result.clone());
        result
    }

    /// Drives one behavior case. Returns `Err` only when the harness could
    /// not observe the editor at all.
    pub fn try_run_behavior_case(
        &self,
        case: &BehaviorTestCase,
    ) -> Result<BehaviorResult, DriverError> {
        let started_at = Instant::now();
        let exited = self.observe_behavior(case)?;
        let observation = Observation {
            exited,
            ..Observation::default()
        };
        let violation = BehaviorOracle {
            expected_exit: case.expected_exit,
        }
        .examine(&observation);
        Ok(BehaviorResult {
            test_name: case.name.clone(),
            sequence: case.sequence.clone(),
            expected_exit: case.expected_exit,
            actual_exit: Some(exited),
            passed: violation.is_none(),
            violation,
            description: case.description.clone(),
            error: None,
            execution_time: started_at.elapsed(),
        })
    }

    pub fn record_behavior(&mut self, result: BehaviorResult) {
        if result.passed {
            info!(editor = %self.editor(), test = %result.test_name, "Behavior test passed");
        } else {
            warn!(
                editor = %self.editor(),
                test = %result.test_name,
                violation = ?result.violation,
                "Behavior test failed: {}",
                result.description
            );
        }
        self.behavior_results.push(result);
    }

    /// Returns whether the editor had exited at the probe point.
    fn observe_behavior(&self, case: &BehaviorTestCase) -> Result<bool, DriverError> {
        let mut driver = self.new_driver();
        driver.start(self.options.file.as_deref())?;

        let mut exited = match driver.send(case.sequence.as_str(), self.options.key_delay) {
            Ok(_) => false,
            Err(DriverError::UnexpectedExit { .. }) => true,
            Err(e) => {
                driver.cleanup();
                return Err(e);
            }
        };

        if !exited {
            exited = if case.expected_exit {
                driver.wait_exit(BEHAVIOR_EXIT_DEADLINE)
            } else {
                thread::sleep(BEHAVIOR_SETTLE);
                !driver.is_alive()
            };
        }

        if exited {
            driver.cleanup();
        } else if let Err(e) = driver.quit(true) {
            debug!(editor = %self.editor(), error = %e, "Quit after behavior test failed");
            driver.cleanup();
        }
        Ok(exited)
    }

    pub fn summary(&self) -> FuzzSummary {
        FuzzSummary::from_results(&self.results)
    }

    pub fn behavior_summary(&self) -> BehaviorSummary {
        BehaviorSummary::from_results(&self.behavior_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::behavior_test_cases;
    use crate::profile::CustomProfile;
    use crate::testing::{fast_options, shell_target};

    fn runner(script: &str) -> FuzzRunner {
        FuzzRunner::new(shell_target(script), fast_options(), RunnerOptions::default())
    }

    fn case(name: &str) -> BehaviorTestCase {
        behavior_test_cases()
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    #[test]
    fn ctrl_c_on_well_behaved_target_succeeds() {
        let mut runner = runner("well_behaved.sh");
        let result = runner.run_sequence(&KeySequence::from("<C-c>"));
        assert!(result.success, "unexpected failure: {:?}", result.error);
        assert!(!result.unexpected_exit);
        assert!(!result.signalled);
        assert_eq!(result.violation, None);
        assert_eq!(runner.results().len(), 1);
    }

    #[test]
    fn burst_of_h_completes_within_timeout() {
        let mut runner = runner("well_behaved.sh");
        let sequence = KeySequence::new("h".repeat(50));
        let result = runner.run_sequence(&sequence);
        assert!(result.success, "unexpected failure: {:?}", result.error);
        assert!(result.execution_time < Duration::from_secs(10));
    }

    #[test]
    fn exiting_target_is_classified_as_unexpected_exit() {
        let mut runner = runner("exit_on_input.sh");
        let result = runner.run_sequence(&KeySequence::from("abc"));
        assert!(!result.success);
        assert!(result.unexpected_exit);
        assert_eq!(result.violation, Some(ViolationKind::UnexpectedExit));
        assert!(runner.registry().is_empty());
    }

    #[test]
    fn target_ignoring_force_quit_is_a_hang() {
        let mut runner = runner("ignore_input.sh");
        let result = runner.run_sequence(&KeySequence::from("ihello"));
        assert!(!result.success);
        assert!(result.signalled);
        assert_eq!(result.violation, Some(ViolationKind::Hang));
    }

    #[test]
    fn strict_tokens_report_unhandled_keys() {
        let options = RunnerOptions {
            strict_tokens: true,
            ..RunnerOptions::default()
        };
        let mut strict = FuzzRunner::new(shell_target("well_behaved.sh"), fast_options(), options);
        let result = strict.run_sequence(&KeySequence::from("a<Bogus>b"));
        assert_eq!(result.unknown_tokens, 1);
        assert_eq!(result.violation, Some(ViolationKind::UnhandledKey));

        let mut lenient = runner("well_behaved.sh");
        let result = lenient.run_sequence(&KeySequence::from("a<Bogus>b"));
        assert_eq!(result.unknown_tokens, 1);
        assert!(result.success);
    }

    #[test]
    fn spawn_failure_becomes_a_failed_result() {
        let profile: Arc<dyn EditorProfile> = Arc::new(CustomProfile::new(
            "missing",
            "/nonexistent/keystorm-editor",
            Vec::new(),
        ));
        let mut runner = FuzzRunner::new(profile, fast_options(), RunnerOptions::default());
        let sequence = KeySequence::from("x");
        assert!(runner.try_run_sequence(&sequence).is_err());

        let result = runner.run_sequence(&sequence);
        assert!(!result.success);
        assert_eq!(result.violation, Some(ViolationKind::Crash));
        assert!(result.error.unwrap().contains("Failed to spawn missing"));
        assert_eq!(runner.summary().failed, 1);
    }

    #[test]
    fn readiness_timeout_in_fuzz_mode_is_a_crash() {
        let profile: Arc<dyn EditorProfile> = Arc::new(
            CustomProfile::new(
                "silent",
                "/bin/sh",
                vec![crate::testing::get_test_target_path("ignore_input.sh")
                    .to_string_lossy()
                    .into_owned()],
            )
            .with_ready_pattern("this text is never printed"),
        );
        let options = DriverOptions {
            ready_timeout: Duration::from_millis(300),
            ..fast_options()
        };
        let mut runner = FuzzRunner::new(profile, options, RunnerOptions::default());

        let result = runner.run_sequence(&KeySequence::from("h"));
        assert!(!result.success);
        assert!(!result.unexpected_exit);
        assert_eq!(result.violation, Some(ViolationKind::Crash));
        assert!(result.error.unwrap().contains("failed to become ready"));

        let summary = runner.summary();
        assert_eq!(summary.violation_distribution.get(&ViolationKind::Crash), Some(&1));
        assert!(runner.registry().is_empty());
    }

    #[test]
    fn force_quit_case_passes_on_well_behaved_target() {
        let mut runner = runner("well_behaved.sh");
        let result = runner.run_behavior_case(&case("force_quit_exits"));
        assert!(result.passed, "{result:?}");
        assert_eq!(result.actual_exit, Some(true));
    }

    #[test]
    fn non_exit_cases_pass_on_input_ignoring_target() {
        let mut runner = runner("ignore_input.sh");
        for name in ["ctrl_c_no_exit", "arrows_no_exit"] {
            let result = runner.run_behavior_case(&case(name));
            assert!(result.passed, "{name}: {result:?}");
        }
    }

    #[test]
    fn non_exit_case_fails_on_exit_on_input_target() {
        let mut runner = runner("exit_on_input.sh");
        let result = runner.run_behavior_case(&case("ctrl_c_no_exit"));
        assert!(!result.passed);
        assert_eq!(result.violation, Some(ViolationKind::UnexpectedExit));
    }

    #[test]
    fn exit_case_outcomes_follow_target_behavior() {
        let mut exits = runner("exit_on_input.sh");
        assert!(exits.run_behavior_case(&case("force_quit_exits")).passed);

        let mut ignores = runner("ignore_input.sh");
        let result = ignores.run_behavior_case(&case("force_quit_exits"));
        assert!(!result.passed);
        assert_eq!(result.violation, Some(ViolationKind::StandardKeyMisbehavior));

        let summary = ignores.behavior_summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_tests[0].name, "force_quit_exits");
    }

    #[test]
    fn whole_behavior_catalog_matches_target_semantics() {
        let cases = behavior_test_cases();
        let mut ignores = runner("ignore_input.sh");
        let mut exits = runner("exit_on_input.sh");

        for case in &cases {
            let on_ignoring = ignores.run_behavior_case(case);
            let on_exiting = exits.run_behavior_case(case);
            if case.expected_exit {
                assert!(!on_ignoring.passed, "{}: {on_ignoring:?}", case.name);
                assert_eq!(
                    on_ignoring.violation,
                    Some(ViolationKind::StandardKeyMisbehavior),
                    "{}",
                    case.name
                );
                assert!(on_exiting.passed, "{}: {on_exiting:?}", case.name);
            } else {
                assert!(on_ignoring.passed, "{}: {on_ignoring:?}", case.name);
                assert!(!on_exiting.passed, "{}: {on_exiting:?}", case.name);
                assert_eq!(
                    on_exiting.violation,
                    Some(ViolationKind::UnexpectedExit),
                    "{}",
                    case.name
                );
            }
        }
        assert_eq!(ignores.behavior_results().len(), cases.len());
        assert_eq!(exits.behavior_results().len(), cases.len());
    }

    #[test]
    fn harness_failure_in_behavior_mode_is_a_crash() {
        let profile: Arc<dyn EditorProfile> = Arc::new(CustomProfile::new(
            "missing",
            "/nonexistent/keystorm-editor",
            Vec::new(),
        ));
        let mut runner = FuzzRunner::new(profile, fast_options(), RunnerOptions::default());
        let result = runner.run_behavior_case(&case("ctrl_c_no_exit"));
        assert!(!result.passed);
        assert_eq!(result.violation, Some(ViolationKind::Crash));
        assert_eq!(result.actual_exit, None);
    }
}
