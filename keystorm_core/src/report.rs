use crate::generator::Strategy;
use crate::health::ResourceSnapshot;
use crate::oracle::{BehaviorResult, RunResult, ViolationKind};
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Aggregate view of a set of fuzz-mode runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FuzzSummary {
    pub total_sequences: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub unexpected_exits: usize,
    /// Seconds.
    pub average_execution_time: f64,
    pub error_distribution: BTreeMap<String, usize>,
    pub violation_distribution: BTreeMap<ViolationKind, usize>,
}

impl FuzzSummary {
    pub fn from_results(results: &[RunResult]) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.success).count();

        let mut error_distribution = BTreeMap::new();
        let mut violation_distribution = BTreeMap::new();
        for result in results.iter().filter(|r| !r.success) {
            if let Some(error) = &result.error {
                *error_distribution.entry(error.clone()).or_insert(0) += 1;
            }
            if let Some(kind) = result.violation {
                *violation_distribution.entry(kind).or_insert(0) += 1;
            }
        }

        let total_time: f64 = results.iter().map(|r| r.execution_time.as_secs_f64()).sum();
        Self {
            total_sequences: total,
            successful,
            failed: total - successful,
            success_rate: rate(successful, total),
            unexpected_exits: results.iter().filter(|r| r.unexpected_exit).count(),
            average_execution_time: if total == 0 { 0.0 } else { total_time / total as f64 },
            error_distribution,
            violation_distribution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTest {
    pub name: String,
    pub description: String,
    pub violation: Option<ViolationKind>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BehaviorSummary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub violations: BTreeMap<ViolationKind, usize>,
    pub failed_tests: Vec<FailedTest>,
}

impl BehaviorSummary {
    pub fn from_results(results: &[BehaviorResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let mut violations = BTreeMap::new();
        let mut failed_tests = Vec::new();
        for result in results.iter().filter(|r| !r.passed) {
            if let Some(kind) = result.violation {
                *violations.entry(kind).or_insert(0) += 1;
            }
            failed_tests.push(FailedTest {
                name: result.test_name.clone(),
                description: result.description.clone(),
                violation: result.violation,
                error: result.error.clone(),
            });
        }
        Self {
            total_tests: total,
            passed,
            failed: total - passed,
            pass_rate: rate(passed, total),
            violations,
            failed_tests,
        }
    }
}

/// The document written to `<out>/<mode>_<editor>.json`.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub editor: String,
    pub mode: String,
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<ResourceSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuzz_results: Option<FuzzSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_results: Option<BehaviorSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub strategies: BTreeMap<Strategy, FuzzSummary>,
    pub detailed_results: Vec<RunResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detailed_behavior_results: Vec<BehaviorResult>,
}

impl CampaignReport {
    pub fn new(editor: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            editor: editor.into(),
            mode: mode.into(),
            seed: None,
            health: None,
            fuzz_results: None,
            behavior_results: None,
            strategies: BTreeMap::new(),
            detailed_results: Vec::new(),
            detailed_behavior_results: Vec::new(),
        }
    }

    /// Success rate for fuzz-style modes, pass rate for behavior mode.
    pub fn headline_rate(&self) -> f64 {
        match (&self.behavior_results, &self.fuzz_results) {
            (Some(behavior), _) => behavior.pass_rate,
            (None, Some(fuzz)) => fuzz.success_rate,
            (None, None) => 0.0,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.json", self.mode, self.editor)
    }
}

/// Pretty-prints `value` as JSON to `path`, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), anyhow::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {parent:?}"))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create report {path:?}"))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write report {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::KeySequence;
    use crate::oracle::Observation;
    use std::time::Duration;

    fn ok(seq: &str, millis: u64) -> RunResult {
        RunResult::classified(
            &KeySequence::from(seq),
            Observation::default(),
            None,
            Duration::from_millis(millis),
        )
    }

    fn exited(seq: &str) -> RunResult {
        RunResult::classified(
            &KeySequence::from(seq),
            Observation {
                exited: true,
                ..Observation::default()
            },
            Some(ViolationKind::UnexpectedExit),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn fuzz_summary_counts_and_distributions() {
        let results = vec![ok("a", 100), ok("b", 300), exited("c"), exited("d")];
        let summary = FuzzSummary::from_results(&results);
        assert_eq!(summary.total_sequences, 4);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.unexpected_exits, 2);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((summary.average_execution_time - 0.15).abs() < 1e-9);
        assert_eq!(summary.error_distribution.get("Editor exited unexpectedly"), Some(&2));
        assert_eq!(summary.violation_distribution.get(&ViolationKind::UnexpectedExit), Some(&2));
    }

    #[test]
    fn empty_summary_has_zero_rates() {
        let summary = FuzzSummary::from_results(&[]);
        assert_eq!(summary.total_sequences, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(BehaviorSummary::from_results(&[]).pass_rate, 0.0);
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = CampaignReport::new("vite", "fuzz");
        report.detailed_results = vec![ok("a", 10), exited("b")];
        report.fuzz_results = Some(FuzzSummary::from_results(&report.detailed_results));

        let path = dir.path().join("nested").join(report.file_name());
        write_json(&path, &report).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["editor"], "vite");
        assert_eq!(json["fuzz_results"]["total_sequences"], 2);
        assert_eq!(json["fuzz_results"]["violation_distribution"]["UNEXPECTED_EXIT"], 1);
        assert!(json.get("behavior_results").is_none());
        assert!(path.ends_with("fuzz_vite.json"));
        assert!((report.headline_rate() - 0.5).abs() < f64::EPSILON);
    }
}
