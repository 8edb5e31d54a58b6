use crate::breaker::BreakerConfig;
use crate::driver::DriverOptions;
use crate::generator::GeneratorConfig;
use crate::health::HealthThresholds;
use crate::retry::RetryPolicy;
use crate::runner::RunnerOptions;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// Neovim found on `PATH`, launched without plugins or user config.
    Nvim,
    /// An editor built in-tree at `.build/release/<name>`.
    Built,
    /// Anything else; command, readiness and quit keys come from the config.
    #[default]
    Custom,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default)]
    pub kind: TargetKind,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Substring that must appear in the output before the target counts as
    /// ready. Any output at all is enough when unset.
    pub ready_pattern: Option<String>,
    #[serde(default = "default_quit_keys")]
    pub quit_keys: String,
    #[serde(default = "default_force_quit_keys")]
    pub force_quit_keys: String,
}

pub fn default_quit_keys() -> String {
    "<ESC>:q<CR>".to_string()
}

pub fn default_force_quit_keys() -> String {
    "<ESC>:q!<CR>".to_string()
}

impl TargetConfig {
    fn builtin(name: &str, kind: TargetKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            path: None,
            args: Vec::new(),
            ready_pattern: None,
            quit_keys: default_quit_keys(),
            force_quit_keys: default_force_quit_keys(),
        }
    }
}

/// Targets available without any configuration file.
pub fn builtin_targets() -> Vec<TargetConfig> {
    vec![
        TargetConfig::builtin("nvim", TargetKind::Nvim),
        TargetConfig::builtin("vim", TargetKind::Custom),
        TargetConfig::builtin("vite", TargetKind::Built),
        TargetConfig::builtin("videre", TargetKind::Built),
    ]
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_true")]
    pub include_special_keys: bool,
    #[serde(default = "default_true")]
    pub include_unicode: bool,
    #[serde(default = "default_key_delay_ms")]
    pub key_delay_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub strict_tokens: bool,
}

pub fn default_iterations() -> u64 {
    100
}
fn default_min_length() -> usize {
    5
}
fn default_max_length() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_key_delay_ms() -> u64 {
    1
}
fn default_settle_ms() -> u64 {
    100
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            min_length: default_min_length(),
            max_length: default_max_length(),
            seed: None,
            include_special_keys: true,
            include_unicode: true,
            key_delay_ms: default_key_delay_ms(),
            settle_ms: default_settle_ms(),
            strict_tokens: false,
        }
    }
}

impl FuzzerSettings {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            min_length: self.min_length,
            max_length: self.max_length.max(self.min_length),
            include_special_keys: self.include_special_keys,
            include_unicode: self.include_unicode,
            seed: self.seed,
        }
    }

    pub fn runner_options(&self, file: Option<PathBuf>) -> RunnerOptions {
        RunnerOptions {
            key_delay: Duration::from_millis(self.key_delay_ms),
            settle: Duration::from_millis(self.settle_ms),
            strict_tokens: self.strict_tokens,
            file,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DriverSettings {
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_quit_timeout_ms")]
    pub quit_timeout_ms: u64,
    #[serde(default = "default_term_grace_ms")]
    pub term_grace_ms: u64,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_term")]
    pub term: String,
}

fn default_ready_timeout_ms() -> u64 {
    5000
}
fn default_quit_timeout_ms() -> u64 {
    5000
}
fn default_term_grace_ms() -> u64 {
    1000
}
fn default_rows() -> u16 {
    24
}
fn default_cols() -> u16 {
    80
}
fn default_term() -> String {
    "xterm-256color".to_string()
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            quit_timeout_ms: default_quit_timeout_ms(),
            term_grace_ms: default_term_grace_ms(),
            rows: default_rows(),
            cols: default_cols(),
            term: default_term(),
        }
    }
}

impl DriverSettings {
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            quit_timeout: Duration::from_millis(self.quit_timeout_ms),
            term_grace: Duration::from_millis(self.term_grace_ms),
            rows: self.rows,
            cols: self.cols,
            term: self.term.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_ms() -> u64 {
    60_000
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

impl BreakerSettings {
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HealthSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pressure_percent")]
    pub max_cpu_percent: f32,
    #[serde(default = "default_pressure_percent")]
    pub max_memory_percent: f32,
}

fn default_pressure_percent() -> f32 {
    90.0
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cpu_percent: default_pressure_percent(),
            max_memory_percent: default_pressure_percent(),
        }
    }
}

impl HealthSettings {
    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            max_cpu_percent: self.max_cpu_percent,
            max_memory_percent: self.max_memory_percent,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ShutdownSettings {
    /// Name prefixes of temp-dir entries removed during shutdown cleanup.
    #[serde(default = "default_temp_patterns")]
    pub temp_patterns: Vec<String>,
}

fn default_temp_patterns() -> Vec<String> {
    ["vite", ".vite", "nvim", ".nvim", "keystorm-"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            temp_patterns: default_temp_patterns(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct KeystormConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

impl KeystormConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolves a target by name: configured targets shadow the built-ins.
    pub fn target(&self, name: &str) -> Option<TargetConfig> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .or_else(|| builtin_targets().into_iter().find(|t| t.name == name))
    }

    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.iter().map(|t| t.name.clone()).collect();
        for builtin in builtin_targets() {
            if !names.contains(&builtin.name) {
                names.push(builtin.name);
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = KeystormConfig::from_toml_str("").unwrap();
        assert_eq!(config.fuzzer.iterations, 100);
        assert_eq!(config.fuzzer.min_length, 5);
        assert_eq!(config.driver.ready_timeout_ms, 5000);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert!(config.health.enabled);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn parses_custom_target_and_overrides() {
        let toml = r#"
            [fuzzer]
            iterations = 10
            seed = 42
            strict-tokens = true

            [retry]
            base-delay-ms = 5

            [[target]]
            name = "fake"
            path = "/bin/sh"
            args = ["editor.sh"]
            ready-pattern = "~"
        "#;
        let config = KeystormConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.fuzzer.iterations, 10);
        assert_eq!(config.fuzzer.seed, Some(42));
        assert!(config.fuzzer.strict_tokens);
        assert_eq!(config.retry.base_delay_ms, 5);

        let target = config.target("fake").expect("configured target");
        assert_eq!(target.kind, TargetKind::Custom);
        assert_eq!(target.args, vec!["editor.sh".to_string()]);
        assert_eq!(target.ready_pattern.as_deref(), Some("~"));
        assert_eq!(target.quit_keys, "<ESC>:q<CR>");
        assert_eq!(target.force_quit_keys, "<ESC>:q!<CR>");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = KeystormConfig::from_toml_str("[fuzzer]\nbogus = 1\n");
        assert!(err.is_err());
    }

    #[test]
    fn builtin_targets_resolve_without_config() {
        let config = KeystormConfig::default();
        assert_eq!(config.target("nvim").map(|t| t.kind), Some(TargetKind::Nvim));
        assert_eq!(config.target("vite").map(|t| t.kind), Some(TargetKind::Built));
        assert!(config.target("emacs").is_none());
        assert!(config.target_names().contains(&"videre".to_string()));
    }

    #[test]
    fn load_from_file_reports_missing_file() {
        let missing = PathBuf::from("/definitely/not/here/keystorm.toml");
        let err = KeystormConfig::load_from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
