use keystorm_core::campaign::Campaign;
use keystorm_core::config::KeystormConfig;
use keystorm_core::generator::{GeneratorConfig, SequenceGenerator};
use keystorm_core::health::HealthChecker;
use keystorm_core::oracle::BehaviorResult;
use keystorm_core::profile::profile_for;
use keystorm_core::report::{BehaviorSummary, CampaignReport, FuzzSummary, write_json};
use keystorm_core::runner::FuzzRunner;
use keystorm_core::shutdown::{GracefulShutdown, ProcessRegistry, sweep_temp_files};

use anyhow::Context;
use clap::{ArgAction, ArgGroup, Parser};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_AGGRESSIVE_ITERATIONS: u64 = 50;
const SCRATCH_LINE: &str = "The quick brown fox jumps over the lazy dog.\n";
const SCRATCH_LINES: usize = 200;

/// Fuzz and stress test terminal text editors through a pseudo-terminal.
#[derive(Parser, Debug)]
#[command(name = "keystorm", version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").args(["edge_cases", "stress", "behavior", "aggressive"])))]
struct Cli {
    /// Editor to test: a built-in (nvim, vim, vite, videre) or a configured target.
    editor: String,

    /// Number of random sequences (per strategy with --aggressive).
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Run the edge-case catalog instead of random fuzzing.
    #[arg(short, long)]
    edge_cases: bool,

    /// Run the stress catalog.
    #[arg(short, long)]
    stress: bool,

    /// Run behavior tests (keys that must or must not quit the editor).
    #[arg(short, long)]
    behavior: bool,

    /// Run every generation strategy with unseeded input.
    #[arg(short, long)]
    aggressive: bool,

    /// File to open in the editor.
    #[arg(short, long, conflicts_with = "scratch")]
    file: Option<PathBuf>,

    /// Open a throwaway file pre-filled with sample text.
    #[arg(long)]
    scratch: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for JSON reports.
    #[arg(short, long, default_value = "logs")]
    out_dir: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Fuzz,
    EdgeCases,
    Stress,
    Behavior,
    Aggressive,
}

impl Mode {
    fn from_cli(cli: &Cli) -> Self {
        if cli.behavior {
            Mode::Behavior
        } else if cli.stress {
            Mode::Stress
        } else if cli.edge_cases {
            Mode::EdgeCases
        } else if cli.aggressive {
            Mode::Aggressive
        } else {
            Mode::Fuzz
        }
    }

    fn name(self) -> &'static str {
        match self {
            Mode::Fuzz => "fuzz",
            Mode::EdgeCases => "edge_cases",
            Mode::Stress => "stress",
            Mode::Behavior => "behavior",
            Mode::Aggressive => "aggressive",
        }
    }

    /// Success (or pass) rate a run must exceed for a zero exit status.
    /// Catalog modes are expected to find problems. Behavior mode instead
    /// requires every case to pass.
    fn threshold(self) -> f64 {
        match self {
            Mode::Fuzz => 0.8,
            Mode::EdgeCases | Mode::Stress => 0.5,
            Mode::Aggressive => 0.7,
            Mode::Behavior => 1.0,
        }
    }

    fn passes(self, rate: f64) -> bool {
        match self {
            Mode::Behavior => rate >= self.threshold(),
            _ => rate > self.threshold(),
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<KeystormConfig, anyhow::Error> {
    match &cli.config {
        Some(path) => {
            info!(path = ?path, "Loading configuration");
            KeystormConfig::load_from_file(path)
        }
        None => {
            let default_path = PathBuf::from("keystorm.toml");
            if default_path.exists() {
                info!(path = ?default_path, "Loading default configuration");
                KeystormConfig::load_from_file(&default_path)
            } else {
                Ok(KeystormConfig::default())
            }
        }
    }
}

fn scratch_file() -> Result<tempfile::NamedTempFile, anyhow::Error> {
    let mut file = tempfile::Builder::new()
        .prefix("keystorm-scratch-")
        .suffix(".txt")
        .tempfile()
        .context("Failed to create scratch file")?;
    for _ in 0..SCRATCH_LINES {
        file.write_all(SCRATCH_LINE.as_bytes())?;
    }
    file.flush()?;
    Ok(file)
}

fn main() -> Result<ExitCode, anyhow::Error> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(&cli)?;
    if let Some(iterations) = cli.iterations {
        config.fuzzer.iterations = iterations;
    }
    if cli.seed.is_some() {
        config.fuzzer.seed = cli.seed;
    }
    let mode = Mode::from_cli(&cli);

    let target = config.target(&cli.editor).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown editor '{}'. Known editors: {}",
            cli.editor,
            config.target_names().join(", ")
        )
    })?;
    let profile = match profile_for(&target) {
        Ok(profile) => profile,
        Err(e) => {
            error!(editor = %cli.editor, error = %e, "Skipping editor");
            println!("Health check failed for {}: {e}", cli.editor);
            return Ok(ExitCode::FAILURE);
        }
    };

    let registry = ProcessRegistry::default();
    let shutdown = GracefulShutdown::new();
    {
        let registry = registry.clone();
        shutdown.register_cleanup("orphaned editors", move || {
            let killed = registry.kill_all();
            if killed > 0 {
                info!(killed, "Killed orphaned editor processes");
            }
            Ok(())
        });
        let patterns = config.shutdown.temp_patterns.clone();
        shutdown.register_cleanup("temporary files", move || {
            sweep_temp_files(&std::env::temp_dir(), &patterns);
            Ok(())
        });
    }
    shutdown
        .install_signal_handlers()
        .context("Failed to install signal handlers")?;

    let scratch = if cli.scratch { Some(scratch_file()?) } else { None };
    let file = cli
        .file
        .clone()
        .or_else(|| scratch.as_ref().map(|f| f.path().to_path_buf()));

    let runner = FuzzRunner::new(
        profile,
        config.driver.driver_options(),
        config.fuzzer.runner_options(file),
    )
    .with_registry(registry);
    let mut campaign = Campaign::new(
        runner,
        config.retry.policy(),
        config.breaker.breaker_config(),
        shutdown.token(),
    );

    let mut report = CampaignReport::new(cli.editor.as_str(), mode.name());
    if config.health.enabled {
        let checker = HealthChecker::new(config.health.thresholds());
        match campaign.health_gate(&checker) {
            Ok(health) => report.health = Some(health.resources),
            Err(e) => {
                error!(error = %e, "Skipping editor");
                println!("{e}");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "{} FOR {}",
        mode.name().to_uppercase().replace('_', " "),
        cli.editor.to_uppercase()
    );
    println!("{}", "=".repeat(60));

    match mode {
        Mode::Fuzz => {
            let generator_config = config.fuzzer.generator_config();
            report.seed = generator_config.seed;
            let mut generator = SequenceGenerator::new(generator_config);
            let results = campaign.run_fuzz(&mut generator, config.fuzzer.iterations as usize);
            report.fuzz_results = Some(FuzzSummary::from_results(&results));
            report.detailed_results = results;
        }
        Mode::EdgeCases | Mode::Stress => {
            let results = if mode == Mode::Stress {
                campaign.run_stress()
            } else {
                campaign.run_edge_cases()
            };
            report.fuzz_results = Some(FuzzSummary::from_results(&results));
            report.detailed_results = results;
        }
        Mode::Aggressive => {
            let generator_config = GeneratorConfig {
                seed: cli.seed,
                ..GeneratorConfig::aggressive()
            };
            report.seed = generator_config.seed;
            let mut generator = SequenceGenerator::new(generator_config);
            let iterations = cli.iterations.unwrap_or(DEFAULT_AGGRESSIVE_ITERATIONS) as usize;
            let by_strategy = campaign.run_aggressive(&mut generator, iterations);
            for (strategy, results) in by_strategy {
                let summary = FuzzSummary::from_results(&results);
                println!(
                    "{strategy}: {}/{} passed ({:.1}%)",
                    summary.successful,
                    summary.total_sequences,
                    summary.success_rate * 100.0
                );
                report.strategies.insert(strategy, summary);
                report.detailed_results.extend(results);
            }
            report.fuzz_results = Some(FuzzSummary::from_results(&report.detailed_results));
        }
        Mode::Behavior => {
            let results = campaign.run_behavior();
            report.behavior_results = Some(BehaviorSummary::from_results(&results));
            print_behavior_results(&results);
            report.detailed_behavior_results = results;
        }
    }

    if let Some(summary) = &report.fuzz_results {
        print_fuzz_summary(summary);
    }
    if let Some(summary) = &report.behavior_results {
        print_behavior_summary(summary);
    }

    let path = cli.out_dir.join(report.file_name());
    write_json(&path, &report)?;
    println!("\nDetailed results saved to: {}", path.display());

    if shutdown.is_shutdown_requested() {
        return Ok(ExitCode::FAILURE);
    }
    let rate = report.headline_rate();
    if mode.passes(rate) {
        Ok(ExitCode::SUCCESS)
    } else {
        info!(rate, threshold = mode.threshold(), "Below pass threshold");
        Ok(ExitCode::FAILURE)
    }
}

fn print_fuzz_summary(summary: &FuzzSummary) {
    println!("\nTotal sequences: {}", summary.total_sequences);
    println!("Successful: {}", summary.successful);
    println!("Failed: {}", summary.failed);
    println!("Unexpected exits: {}", summary.unexpected_exits);
    println!("Success rate: {:.2}%", summary.success_rate * 100.0);
    println!("Average execution time: {:.3}s", summary.average_execution_time);

    if !summary.violation_distribution.is_empty() {
        println!("\nViolations:");
        for (kind, count) in &summary.violation_distribution {
            println!("  {kind}: {count}");
        }
    }
    if !summary.error_distribution.is_empty() {
        println!("\nError distribution:");
        let mut errors: Vec<_> = summary.error_distribution.iter().collect();
        errors.sort_by(|a, b| b.1.cmp(a.1));
        for (error, count) in errors {
            println!("  {error}: {count}");
        }
    }
}

fn print_behavior_results(results: &[BehaviorResult]) {
    for result in results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        println!(
            "  [{status}] {:<28} {:.3}s",
            result.test_name,
            result.execution_time.as_secs_f64()
        );
    }
}

fn print_behavior_summary(summary: &BehaviorSummary) {
    println!("\nBehavior tests: {}", summary.total_tests);
    println!("Passed: {}", summary.passed);
    println!("Failed: {}", summary.failed);
    println!("Pass rate: {:.2}%", summary.pass_rate * 100.0);

    if !summary.failed_tests.is_empty() {
        println!("\nFailed tests:");
        for failed in &summary.failed_tests {
            let violation = failed
                .violation
                .map(|v| v.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            println!("  {} [{violation}]: {}", failed.name, failed.description);
            if let Some(error) = &failed.error {
                println!("    error: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_must_exceed_threshold_except_for_behavior() {
        assert!(!Mode::Fuzz.passes(0.8));
        assert!(Mode::Fuzz.passes(0.81));
        assert!(!Mode::EdgeCases.passes(0.5));
        assert!(Mode::Stress.passes(0.51));
        assert!(!Mode::Aggressive.passes(0.7));
        assert!(Mode::Behavior.passes(1.0));
        assert!(!Mode::Behavior.passes(0.99));
    }

    #[test]
    fn mode_flags_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["keystorm", "vite", "-b", "-s"]).is_err());
        let cli = Cli::try_parse_from(["keystorm", "vite", "--stress"]).unwrap();
        assert_eq!(Mode::from_cli(&cli), Mode::Stress);
        let cli = Cli::try_parse_from(["keystorm", "nvim"]).unwrap();
        assert_eq!(Mode::from_cli(&cli), Mode::Fuzz);
    }
}
