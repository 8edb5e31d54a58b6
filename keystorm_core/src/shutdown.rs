//! Cooperative cancellation and once-only cleanup on shutdown.
//!
//! Signals never run cleanup inside a signal handler: a dedicated thread
//! receives SIGINT/SIGTERM through `signal-hook`, flips the cancellation
//! token and runs the registered handlers in order, exactly once.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tracing::{debug, error, info, warn};

/// Shared flag checked between operations of a long campaign.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pids of editor processes currently owned by some driver.
#[derive(Clone, Debug, Default)]
pub struct ProcessRegistry {
    pids: Arc<Mutex<BTreeSet<i32>>>,
}

impl ProcessRegistry {
    pub fn register(&self, pid: Pid) {
        lock(&self.pids).insert(pid.as_raw());
    }

    pub fn unregister(&self, pid: Pid) {
        lock(&self.pids).remove(&pid.as_raw());
    }

    pub fn len(&self) -> usize {
        lock(&self.pids).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pids).is_empty()
    }

    /// SIGKILLs every registered process and empties the registry.
    /// Returns how many were signalled successfully.
    pub fn kill_all(&self) -> usize {
        let pids = std::mem::take(&mut *lock(&self.pids));
        let mut killed = 0;
        for raw in pids {
            match kill(Pid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) => {
                    debug!(pid = raw, "Killed orphaned editor");
                    killed += 1;
                }
                Err(e) => debug!(pid = raw, error = %e, "Orphan already gone"),
            }
        }
        killed
    }
}

/// Removes entries of `dir` whose file name starts with one of `prefixes`.
/// Entries that vanish or cannot be removed are skipped.
pub fn sweep_temp_files(dir: &Path, prefixes: &[String]) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = ?dir, error = %e, "Cannot scan temp dir");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !prefixes.iter().any(|p| name.starts_with(p.as_str())) {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => debug!(path = ?path, error = %e, "Could not remove temp entry"),
        }
    }
    if removed > 0 {
        info!(removed, "Cleaned up temporary files/directories");
    }
    removed
}

type CleanupHandler = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

pub struct GracefulShutdown {
    token: CancellationToken,
    handlers: Mutex<Vec<(String, CleanupHandler)>>,
    started: AtomicBool,
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self {
            token: CancellationToken::new(),
            handlers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }
}

impl GracefulShutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handlers run in registration order.
    pub fn register_cleanup<F>(&self, name: impl Into<String>, handler: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        lock(&self.handlers).push((name.into(), Box::new(handler)));
    }

    /// Cancels the token and runs every registered handler. Only the first
    /// call does anything; returns the number of handlers that ran.
    pub fn shutdown(&self, reason: &str) -> usize {
        if self.started.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.token.cancel();
        info!(reason, "Initiating graceful shutdown");

        let handlers = std::mem::take(&mut *lock(&self.handlers));
        let count = handlers.len();
        for (name, handler) in handlers {
            if let Err(e) = handler() {
                error!(handler = %name, error = %e, "Cleanup handler failed");
            }
        }
        count
    }

    /// Spawns the thread that turns SIGINT/SIGTERM into a shutdown followed
    /// by process exit with the conventional `128 + signo` status.
    pub fn install_signal_handlers(self: &Arc<Self>) -> std::io::Result<thread::JoinHandle<()>> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let this = Arc::clone(self);
        thread::Builder::new()
            .name("keystorm-signals".to_string())
            .spawn(move || {
                if let Some(signo) = signals.forever().next() {
                    this.shutdown(&format!("received signal {signo}"));
                    std::process::exit(128 + signo);
                }
            })
    }
}
