use std::time::Duration;
use thiserror::Error;

/// Errors raised by the pseudo-terminal process driver.
///
/// Every variant is returned only after the driver has force-killed and
/// cleaned up its child, so callers never inherit a live process.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The child could not be spawned at all.
    #[error("Failed to spawn {editor} ({command:?}): {source}")]
    Spawn {
        editor: String,
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    /// Allocating or configuring the pseudo-terminal failed.
    #[error("Pseudo-terminal setup failed: {0}")]
    Pty(#[from] nix::Error),

    /// The target produced no ready output before the start deadline.
    #[error("{editor} failed to become ready within {timeout:?}")]
    ReadinessTimeout { editor: String, timeout: Duration },

    /// The target died without being asked to. `code` is `None` when it
    /// was killed by a signal or could not be reaped.
    #[error("{editor} exited unexpectedly")]
    UnexpectedExit { editor: String, code: Option<i32> },

    /// The target is alive but a read or write on its terminal failed.
    #[error("Terminal I/O with {editor} failed: {source}")]
    Command {
        editor: String,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called on a driver that has already been started.
    #[error("{editor} was already started")]
    AlreadyStarted { editor: String },

    /// An operation that needs a running child was called before `start`
    /// or after cleanup.
    #[error("{editor} is not running")]
    NotRunning { editor: String },
}

impl DriverError {
    /// Whether retrying the same run could plausibly succeed. Target
    /// misbehaviour is a finding, not a transient fault.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverError::Spawn { .. } | DriverError::Pty(_) | DriverError::ReadinessTimeout { .. }
        )
    }
}
