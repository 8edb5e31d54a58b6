use crate::config::{TargetConfig, TargetKind};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("{name} not found in PATH")]
    BinaryNotFound { name: String },
}

/// The capability set the process driver needs from a target editor.
///
/// Implementations only describe how to launch, recognise and leave the
/// editor. All terminal handling lives in [`crate::driver::PtyDriver`].
pub trait EditorProfile: Debug + Send + Sync {
    /// Identity used in logs, reports and as the circuit-breaker key.
    fn name(&self) -> &str;

    /// Path of the executable, used by health checks.
    fn binary(&self) -> &Path;

    /// Full argv to launch the editor, optionally opening `file`.
    fn command(&self, file: Option<&Path>) -> Vec<String>;

    /// Whether the output accumulated since spawn shows the editor is ready.
    fn is_ready(&self, output: &str) -> bool {
        !output.is_empty()
    }

    fn quit_keys(&self) -> &str;

    /// Key sequence that quits unconditionally, discarding changes.
    fn force_quit_keys(&self) -> &str;
}

fn argv(program: &Path, args: &[String], file: Option<&Path>) -> Vec<String> {
    let mut cmd = vec![program.to_string_lossy().into_owned()];
    cmd.extend(args.iter().cloned());
    if let Some(file) = file {
        cmd.push(file.to_string_lossy().into_owned());
    }
    cmd
}

/// Neovim without plugins or user configuration, for reproducible runs.
#[derive(Debug, Clone)]
pub struct NvimProfile {
    path: PathBuf,
    quit_keys: String,
    force_quit_keys: String,
}

impl NvimProfile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            quit_keys: crate::config::default_quit_keys(),
            force_quit_keys: crate::config::default_force_quit_keys(),
        }
    }

    pub fn from_path_lookup() -> Result<Self, ProfileError> {
        which::which("nvim")
            .map(Self::new)
            .map_err(|_| ProfileError::BinaryNotFound {
                name: "nvim".to_string(),
            })
    }
}

impl EditorProfile for NvimProfile {
    fn name(&self) -> &str {
        "nvim"
    }

    fn binary(&self) -> &Path {
        &self.path
    }

    fn command(&self, file: Option<&Path>) -> Vec<String> {
        let flags = ["--noplugin", "-u", "NONE"].map(String::from);
        argv(&self.path, &flags, file)
    }

    fn quit_keys(&self) -> &str {
        &self.quit_keys
    }

    fn force_quit_keys(&self) -> &str {
        &self.force_quit_keys
    }
}

/// An editor built in this repository, found at `.build/release/<name>`
/// unless an explicit path is configured.
#[derive(Debug, Clone)]
pub struct BuiltProfile {
    name: String,
    path: PathBuf,
    quit_keys: String,
    force_quit_keys: String,
}

impl BuiltProfile {
    pub fn new(name: impl Into<String>, path: Option<PathBuf>) -> Self {
        let name = name.into();
        let path = path.unwrap_or_else(|| {
            let relative = PathBuf::from(".build/release").join(&name);
            std::env::current_dir()
                .map(|cwd| cwd.join(&relative))
                .unwrap_or(relative)
        });
        Self {
            name,
            path,
            quit_keys: crate::config::default_quit_keys(),
            force_quit_keys: crate::config::default_force_quit_keys(),
        }
    }
}

impl EditorProfile for BuiltProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn binary(&self) -> &Path {
        &self.path
    }

    fn command(&self, file: Option<&Path>) -> Vec<String> {
        argv(&self.path, &[], file)
    }

    fn quit_keys(&self) -> &str {
        &self.quit_keys
    }

    fn force_quit_keys(&self) -> &str {
        &self.force_quit_keys
    }
}

/// A fully config-described target.
#[derive(Debug, Clone)]
pub struct CustomProfile {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    ready_pattern: Option<String>,
    quit_keys: String,
    force_quit_keys: String,
}

impl CustomProfile {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            ready_pattern: None,
            quit_keys: crate::config::default_quit_keys(),
            force_quit_keys: crate::config::default_force_quit_keys(),
        }
    }

    pub fn with_ready_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ready_pattern = Some(pattern.into());
        self
    }

    pub fn with_quit_keys(mut self, quit: impl Into<String>, force: impl Into<String>) -> Self {
        self.quit_keys = quit.into();
        self.force_quit_keys = force.into();
        self
    }
}

impl EditorProfile for CustomProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn binary(&self) -> &Path {
        &self.program
    }

    fn command(&self, file: Option<&Path>) -> Vec<String> {
        argv(&self.program, &self.args, file)
    }

    fn is_ready(&self, output: &str) -> bool {
        match &self.ready_pattern {
            Some(pattern) => output.contains(pattern.as_str()),
            None => !output.is_empty(),
        }
    }

    fn quit_keys(&self) -> &str {
        &self.quit_keys
    }

    fn force_quit_keys(&self) -> &str {
        &self.force_quit_keys
    }
}

/// Selects the profile implementation for a configured target.
pub fn profile_for(target: &TargetConfig) -> Result<Arc<dyn EditorProfile>, ProfileError> {
    let profile: Arc<dyn EditorProfile> = match target.kind {
        TargetKind::Nvim => {
            let nvim = match &target.path {
                Some(path) => NvimProfile::new(path.clone()),
                None => NvimProfile::from_path_lookup()?,
            };
            Arc::new(NvimProfile {
                quit_keys: target.quit_keys.clone(),
                force_quit_keys: target.force_quit_keys.clone(),
                ..nvim
            })
        }
        TargetKind::Built => {
            let built = BuiltProfile::new(target.name.clone(), target.path.clone());
            Arc::new(BuiltProfile {
                quit_keys: target.quit_keys.clone(),
                force_quit_keys: target.force_quit_keys.clone(),
                ..built
            })
        }
        TargetKind::Custom => {
            let program = match &target.path {
                Some(path) => path.clone(),
                None => which::which(&target.name).map_err(|_| ProfileError::BinaryNotFound {
                    name: target.name.clone(),
                })?,
            };
            let mut custom = CustomProfile::new(target.name.clone(), program, target.args.clone())
                .with_quit_keys(target.quit_keys.clone(), target.force_quit_keys.clone());
            if let Some(pattern) = &target.ready_pattern {
                custom = custom.with_ready_pattern(pattern.clone());
            }
            Arc::new(custom)
        }
    };
    Ok(profile)
}
