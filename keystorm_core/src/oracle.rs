use crate::error::DriverError;
use crate::generator::BehaviorTestCase;
use crate::input::KeySequence;
use crate::keys;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// The closed set of ways an editor can break its contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    UnexpectedExit,
    UnhandledKey,
    StandardKeyMisbehavior,
    Hang,
    Crash,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::UnexpectedExit => "UNEXPECTED_EXIT",
            ViolationKind::UnhandledKey => "UNHANDLED_KEY",
            ViolationKind::StandardKeyMisbehavior => "STANDARD_KEY_MISBEHAVIOR",
            ViolationKind::Hang => "HANG",
            ViolationKind::Crash => "CRASH",
        };
        f.write_str(s)
    }
}

/// What the runner saw while driving one sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// The process was gone at the point it was probed.
    pub exited: bool,
    /// Quitting needed a signal because the quit keys were ignored.
    pub signalled_on_quit: bool,
    pub unknown_tokens: usize,
}

/// An `Oracle` turns an [`Observation`] into a verdict: `None` when the
/// editor behaved, otherwise the kind of violation.
pub trait Oracle {
    fn examine(&self, observation: &Observation) -> Option<ViolationKind>;
}

/// Random input must never terminate the editor, and the editor must still
/// honour its force-quit keys afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzOracle {
    /// Report sequences that contained unrecognised `<...>` tokens.
    pub strict_tokens: bool,
}

impl Oracle for FuzzOracle {
    fn examine(&self, observation: &Observation) -> Option<ViolationKind> {
        if observation.exited {
            Some(ViolationKind::UnexpectedExit)
        } else if observation.signalled_on_quit {
            Some(ViolationKind::Hang)
        } else if self.strict_tokens && observation.unknown_tokens > 0 {
            Some(ViolationKind::UnhandledKey)
        } else {
            None
        }
    }
}

/// Checks the exit expectation of a single behavior test case.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorOracle {
    pub expected_exit: bool,
}

impl Oracle for BehaviorOracle {
    fn examine(&self, observation: &Observation) -> Option<ViolationKind> {
        match (self.expected_exit, observation.exited) {
            (true, false) => Some(ViolationKind::StandardKeyMisbehavior),
            (false, true) => Some(ViolationKind::UnexpectedExit),
            _ => None,
        }
    }
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// MD5 of the encoded bytes, so sequences that type the same keys share an id.
pub fn sequence_id(sequence: &KeySequence) -> String {
    format!("{:x}", md5::compute(keys::encode(sequence.as_str())))
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub sequence: KeySequence,
    pub sequence_id: String,
    pub success: bool,
    pub error: Option<String>,
    #[serde(serialize_with = "as_secs")]
    pub execution_time: Duration,
    pub unexpected_exit: bool,
    pub violation: Option<ViolationKind>,
    pub unknown_tokens: usize,
    pub signalled: bool,
}

impl RunResult {
    /// Builds the result for a run that got as far as classification.
    pub fn classified(
        sequence: &KeySequence,
        observation: Observation,
        violation: Option<ViolationKind>,
        execution_time: Duration,
    ) -> Self {
        let error = violation.map(|v| match v {
            ViolationKind::UnexpectedExit => "Editor exited unexpectedly".to_string(),
            ViolationKind::Hang => "Editor ignored force-quit keys".to_string(),
            ViolationKind::UnhandledKey => {
                format!("{} unknown key token(s) dropped", observation.unknown_tokens)
            }
            other => other.to_string(),
        });
        Self {
            sequence: sequence.clone(),
            sequence_id: sequence_id(sequence),
            success: violation.is_none(),
            error,
            execution_time,
            unexpected_exit: violation == Some(ViolationKind::UnexpectedExit),
            violation,
            unknown_tokens: observation.unknown_tokens,
            signalled: observation.signalled_on_quit,
        }
    }

    /// A run that never reached classification.
    pub fn failed(
        sequence: &KeySequence,
        error: impl Into<String>,
        violation: Option<ViolationKind>,
        execution_time: Duration,
    ) -> Self {
        Self {
            sequence: sequence.clone(),
            sequence_id: sequence_id(sequence),
            success: false,
            error: Some(error.into()),
            execution_time,
            unexpected_exit: violation == Some(ViolationKind::UnexpectedExit),
            violation,
            unknown_tokens: 0,
            signalled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BehaviorResult {
    pub test_name: String,
    pub sequence: KeySequence,
    pub expected_exit: bool,
    /// `None` when the harness failed before the exit could be observed.
    pub actual_exit: Option<bool>,
    pub passed: bool,
    pub violation: Option<ViolationKind>,
    pub description: String,
    pub error: Option<String>,
    #[serde(serialize_with = "as_secs")]
    pub execution_time: Duration,
}

impl BehaviorResult {
    /// A case the harness could not observe. The target dying before the
    /// keys could be sent is an `UNEXPECTED_EXIT`; anything else is a `CRASH`.
    pub fn failed(case: &BehaviorTestCase, error: &DriverError, execution_time: Duration) -> Self {
        let (violation, actual_exit) = match error {
            DriverError::UnexpectedExit { .. } => (ViolationKind::UnexpectedExit, Some(true)),
            _ => (ViolationKind::Crash, None),
        };
        let mut result = Self::skipped(case, error.to_string(), execution_time);
        result.violation = Some(violation);
        result.actual_exit = actual_exit;
        result
    }

    /// A case that never ran, e.g. because the target's breaker is open.
    pub fn skipped(case: &BehaviorTestCase, error: String, execution_time: Duration) -> Self {
        Self {
            test_name: case.name.clone(),
            sequence: case.sequence.clone(),
            expected_exit: case.expected_exit,
            actual_exit: None,
            passed: false,
            violation: None,
            description: case.description.clone(),
            error: Some(error),
            execution_time,
        }
    }
}
