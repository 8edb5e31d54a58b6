//! Pseudo-terminal process driver.
//!
//! A [`PtyDriver`] owns exactly one editor process attached to a fresh
//! pseudo-terminal. The lifecycle is
//! `Unstarted -> Starting -> Ready -> Running -> Quitting -> Terminated`;
//! abnormal death may jump straight to `Terminated`. Whatever path is taken,
//! [`PtyDriver::cleanup`] runs exactly once with effect: the master descriptor
//! is closed, the child is reaped (killed first if still running) and the pid
//! is forgotten. `Drop` calls it as a last resort.

use crate::error::DriverError;
use crate::keys;
use crate::profile::EditorProfile;
use crate::shutdown::ProcessRegistry;
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::libc;
use nix::pty::{OpenptyResult, Winsize, openpty};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(5);
const QUIT_KEY_DELAY: Duration = Duration::from_millis(20);
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Unstarted,
    Starting,
    Ready,
    Running,
    Quitting,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub ready_timeout: Duration,
    pub quit_timeout: Duration,
    /// How long a SIGTERM'd child gets before SIGKILL.
    pub term_grace: Duration,
    pub rows: u16,
    pub cols: u16,
    pub term: String,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5),
            quit_timeout: Duration::from_secs(5),
            term_grace: Duration::from_secs(1),
            rows: 24,
            cols: 80,
            term: "xterm-256color".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub bytes_written: usize,
    /// `<...>` tokens the encoder did not recognise and dropped.
    pub unknown_tokens: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuitReport {
    pub elapsed: Duration,
    /// The editor ignored the quit keys and had to be signalled.
    pub signalled: bool,
}

enum ReadOutcome {
    Data,
    Pending,
    Closed,
}

pub struct PtyDriver {
    profile: Arc<dyn EditorProfile>,
    options: DriverOptions,
    registry: Option<ProcessRegistry>,
    state: DriverState,
    master: Option<File>,
    child: Option<Child>,
    pid: Option<Pid>,
    exit_status: Option<ExitStatus>,
}

impl PtyDriver {
    pub fn new(profile: Arc<dyn EditorProfile>, options: DriverOptions) -> Self {
        Self {
            profile,
            options,
            registry: None,
            state: DriverState::Unstarted,
            master: None,
            child: None,
            pid: None,
            exit_status: None,
        }
    }

    /// Tracks the child's pid in `registry` for as long as it is alive, so a
    /// shutdown sweep can kill it if this driver never gets to.
    pub fn with_registry(mut self, registry: ProcessRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn editor(&self) -> &str {
        self.profile.name()
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Spawns the editor on a new pseudo-terminal and waits until its output
    /// satisfies the profile's readiness check. Returns the time-to-ready.
    pub fn start(&mut self, file: Option<&Path>) -> Result<Duration, DriverError> {
        if self.state != DriverState::Unstarted {
            return Err(DriverError::AlreadyStarted {
                editor: self.editor().to_string(),
            });
        }
        self.state = DriverState::Starting;
        let started_at = Instant::now();

        let argv = self.profile.command(file);
        if let Err(e) = self.spawn(&argv) {
            self.abort();
            return Err(e);
        }
        info!(editor = %self.editor(), pid = ?self.pid, ?argv, "Spawned editor");

        match self.wait_for_ready(self.options.ready_timeout) {
            Ok(()) => {
                let elapsed = started_at.elapsed();
                self.state = DriverState::Ready;
                debug!(editor = %self.editor(), ?elapsed, "Editor ready");
                Ok(elapsed)
            }
            Err(e) => {
                warn!(editor = %self.editor(), error = %e, "Editor never became ready, killing");
                self.abort();
                Err(e)
            }
        }
    }

    fn spawn(&mut self, argv: &[String]) -> Result<(), DriverError> {
        let spawn_error = |source: io::Error| DriverError::Spawn {
            editor: self.profile.name().to_string(),
            command: argv.to_vec(),
            source,
        };

        let Some((program, args)) = argv.split_first() else {
            return Err(spawn_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty command line",
            )));
        };

        let winsize = Winsize {
            ws_row: self.options.rows,
            ws_col: self.options.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let OpenptyResult { master, slave } = openpty(&winsize, None)?;
        set_nonblocking(&master)?;

        let child = {
            let mut cmd = Command::new(program);
            cmd.args(args)
                .env("TERM", &self.options.term)
                .stdin(Stdio::from(slave.try_clone().map_err(spawn_error)?))
                .stdout(Stdio::from(slave.try_clone().map_err(spawn_error)?))
                .stderr(Stdio::from(slave));
            // SAFETY: the hook only calls setsid(2) and ioctl(2), both
            // async-signal-safe, between fork and exec.
            unsafe {
                cmd.pre_exec(attach_controlling_terminal);
            }
            cmd.spawn().map_err(spawn_error)?
            // `cmd` drops here and closes the parent's copies of the slave,
            // so reads on the master see EIO once the child is gone.
        };

        let pid = Pid::from_raw(child.id() as i32);
        if let Some(registry) = &self.registry {
            registry.register(pid);
        }
        self.pid = Some(pid);
        self.child = Some(child);
        self.master = Some(File::from(master));
        Ok(())
    }

    fn wait_for_ready(&mut self, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();

        while Instant::now() < deadline {
            match self.read_chunk(&mut output)? {
                ReadOutcome::Data => {
                    if self.profile.is_ready(&String::from_utf8_lossy(&output)) {
                        return Ok(());
                    }
                }
                ReadOutcome::Pending => {}
                // The slave side closes as the child dies; the liveness
                // probe below reaps it once it is gone.
                ReadOutcome::Closed => {}
            }
            if !self.is_alive() {
                return Err(self.unexpected_exit());
            }
            thread::sleep(READY_POLL_INTERVAL);
        }

        Err(DriverError::ReadinessTimeout {
            editor: self.editor().to_string(),
            timeout,
        })
    }

    fn read_chunk(&mut self, output: &mut Vec<u8>) -> Result<ReadOutcome, DriverError> {
        let Some(master) = self.master.as_mut() else {
            return Ok(ReadOutcome::Closed);
        };
        let mut buf = [0u8; READ_CHUNK_SIZE];
        match master.read(&mut buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                output.extend_from_slice(&buf[..n]);
                Ok(ReadOutcome::Data)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Pending)
            }
            // Linux reports EIO on the master once every slave fd is closed.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(ReadOutcome::Closed),
            Err(source) => Err(DriverError::Command {
                editor: self.profile.name().to_string(),
                source,
            }),
        }
    }

    /// Encodes `keys` and writes the bytes one at a time, sleeping `delay`
    /// after each so the editor sees individual keystrokes.
    pub fn send(&mut self, keys: &str, delay: Duration) -> Result<SendReport, DriverError> {
        if self.master.is_none() {
            return Err(DriverError::NotRunning {
                editor: self.editor().to_string(),
            });
        }
        if self.state == DriverState::Ready {
            self.state = DriverState::Running;
        }

        let encoded = keys::encode_with_report(keys);
        if !encoded.unknown_tokens.is_empty() {
            debug!(
                editor = %self.editor(),
                tokens = ?encoded.unknown_tokens,
                "Dropped unknown key tokens"
            );
        }
        self.write_bytes(&encoded.bytes, delay)?;
        Ok(SendReport {
            bytes_written: encoded.bytes.len(),
            unknown_tokens: encoded.unknown_tokens,
        })
    }

    fn write_bytes(&mut self, bytes: &[u8], delay: Duration) -> Result<(), DriverError> {
        for byte in bytes {
            self.write_byte(*byte)?;
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), DriverError> {
        let deadline = Instant::now() + self.options.ready_timeout;
        loop {
            let Some(master) = self.master.as_mut() else {
                return Err(DriverError::NotRunning {
                    editor: self.profile.name().to_string(),
                });
            };
            let err = match master.write(&[byte]) {
                Ok(1) => return Ok(()),
                Ok(_) => io::Error::new(io::ErrorKind::WriteZero, "pty accepted no bytes"),
                Err(e) => e,
            };

            let retryable = matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            );
            if retryable && Instant::now() < deadline {
                // The editor is not draining its input; give it a moment.
                thread::sleep(WRITE_RETRY_INTERVAL);
                continue;
            }
            if !self.is_alive() {
                return Err(self.unexpected_exit());
            }
            return Err(DriverError::Command {
                editor: self.editor().to_string(),
                source: err,
            });
        }
    }

    /// Drains whatever the editor writes for up to `timeout` and returns it
    /// decoded lossily. Stops early once the terminal closes.
    pub fn read(&mut self, timeout: Duration) -> Result<String, DriverError> {
        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();
        while Instant::now() < deadline {
            if let ReadOutcome::Closed = self.read_chunk(&mut output)? {
                break;
            }
            thread::sleep(OUTPUT_POLL_INTERVAL);
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Liveness probe. Reaps the child if it has exited, otherwise asks the
    /// kernel whether the pid exists with signal 0 (nothing is delivered).
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        let (Some(child), Some(pid)) = (self.child.as_mut(), self.pid) else {
            return false;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                return false;
            }
            Ok(None) => {}
            Err(e) => debug!(pid = %pid, error = %e, "try_wait failed, falling back to kill(0)"),
        }

        match kill(pid, None) {
            Ok(()) => true,
            // Exists but belongs to someone else.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn unexpected_exit(&self) -> DriverError {
        DriverError::UnexpectedExit {
            editor: self.editor().to_string(),
            code: self.exit_status.and_then(|status| status.code()),
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        debug!(editor = %self.editor(), pid = ?self.pid, %status, "Editor exited");
        self.exit_status = Some(status);
        if let (Some(registry), Some(pid)) = (&self.registry, self.pid) {
            registry.unregister(pid);
        }
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Polls up to `timeout` for the editor to exit on its own.
    pub fn wait_exit(&mut self, timeout: Duration) -> bool {
        self.wait_for_exit(timeout)
    }

    /// Sends the profile's quit keys (or force-quit keys), waits for exit and
    /// escalates to signals if the editor does not comply in time.
    pub fn quit(&mut self, force: bool) -> Result<QuitReport, DriverError> {
        if self.child.is_none() {
            return Err(DriverError::NotRunning {
                editor: self.editor().to_string(),
            });
        }
        let started_at = Instant::now();
        self.state = DriverState::Quitting;

        let profile = Arc::clone(&self.profile);
        let keys = if force {
            profile.force_quit_keys()
        } else {
            profile.quit_keys()
        };
        if self.is_alive() {
            if let Err(e) = self.write_bytes(&keys::encode(keys), QUIT_KEY_DELAY) {
                debug!(editor = %self.editor(), error = %e, "Writing quit keys failed");
            }
        }

        let signalled = if self.wait_for_exit(self.options.quit_timeout) {
            false
        } else {
            warn!(
                editor = %self.editor(),
                pid = ?self.pid,
                timeout = ?self.options.quit_timeout,
                "Editor ignored quit keys, terminating"
            );
            self.terminate();
            true
        };

        self.cleanup();
        Ok(QuitReport {
            elapsed: started_at.elapsed(),
            signalled,
        })
    }

    /// SIGTERM, bounded grace period, then SIGKILL and a blocking reap.
    fn terminate(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        if !self.is_alive() {
            return;
        }
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            debug!(pid = %pid, error = %e, "SIGTERM failed");
        }
        if self.wait_for_exit(self.options.term_grace) {
            return;
        }
        warn!(pid = %pid, "Editor survived SIGTERM, sending SIGKILL");
        if let Err(e) = kill(pid, Signal::SIGKILL) {
            debug!(pid = %pid, error = %e, "SIGKILL failed");
        }
        if let Some(child) = self.child.as_mut() {
            match child.wait() {
                Ok(status) => self.record_exit(status),
                Err(e) => warn!(pid = %pid, error = %e, "Failed to reap killed editor"),
            }
        }
    }

    fn abort(&mut self) {
        self.terminate();
        self.cleanup();
    }

    /// Releases everything the driver holds. Safe to call any number of
    /// times; only the first call after `start` has any effect.
    pub fn cleanup(&mut self) {
        if self.child.is_some() && self.exit_status.is_none() && self.is_alive() {
            if let Some(pid) = self.pid {
                match kill(pid, Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => debug!(pid = %pid, error = %e, "SIGKILL during cleanup failed"),
                }
            }
            if let Some(child) = self.child.as_mut() {
                if let Ok(status) = child.wait() {
                    self.record_exit(status);
                }
            }
        }
        if let Some(master) = self.master.take() {
            drop(master);
            debug!(editor = %self.editor(), "Closed pty master");
        }
        if let (Some(registry), Some(pid)) = (&self.registry, self.pid) {
            registry.unregister(pid);
        }
        self.child = None;
        self.pid = None;
        if self.state != DriverState::Unstarted {
            self.state = DriverState::Terminated;
        }
    }
}

impl Drop for PtyDriver {
    fn drop(&mut self) {
        if self.master.is_some() || self.child.is_some() {
            warn!(editor = %self.editor(), "Driver dropped without cleanup");
            self.cleanup();
        }
    }
}

fn attach_controlling_terminal() -> io::Result<()> {
    nix::unistd::setsid()?;
    // SAFETY: fd 0 is the pty slave installed by `Command`; TIOCSCTTY takes
    // an integer argument.
    if unsafe { libc::ioctl(0, libc::TIOCSCTTY as _, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::CustomProfile;
    use crate::testing::{fast_options, get_test_target_path, shell_target};

    #[test]
    fn start_reaches_ready_and_quit_exits_gracefully() {
        let mut driver = PtyDriver::new(shell_target("well_behaved.sh"), fast_options());
        assert_eq!(driver.state(), DriverState::Unstarted);

        let ready = driver.start(None).expect("editor should start");
        assert!(ready < Duration::from_secs(5));
        assert_eq!(driver.state(), DriverState::Ready);
        assert!(driver.is_alive());

        driver.send("ihello<ESC>", Duration::from_millis(1)).unwrap();
        assert_eq!(driver.state(), DriverState::Running);

        let report = driver.quit(false).unwrap();
        assert!(!report.signalled, "well-behaved target should exit on :q");
        assert_eq!(driver.state(), DriverState::Terminated);
        assert!(driver.pid().is_none());
    }

    #[test]
    fn quit_escalates_to_signals_when_keys_are_ignored() {
        let mut driver = PtyDriver::new(shell_target("ignore_input.sh"), fast_options());
        driver.start(None).unwrap();

        let report = driver.quit(true).unwrap();
        assert!(report.signalled);
        assert!(!driver.is_alive());
        assert_eq!(driver.state(), DriverState::Terminated);
    }

    #[test]
    fn liveness_probe_sees_unexpected_exit() {
        let mut driver = PtyDriver::new(shell_target("exit_on_input.sh"), fast_options());
        driver.start(None).unwrap();
        assert!(driver.is_alive());

        driver.send("x", Duration::ZERO).unwrap();
        assert!(driver.wait_exit(Duration::from_secs(2)));
        assert!(!driver.is_alive());
        assert!(driver.exit_status().is_some());
        driver.cleanup();
    }

    #[test]
    fn readiness_timeout_kills_the_child() {
        let profile: Arc<dyn EditorProfile> = Arc::new(
            CustomProfile::new(
                "silent",
                "/bin/sh",
                vec![get_test_target_path("ignore_input.sh").to_string_lossy().into_owned()],
            )
            .with_ready_pattern("this text is never printed"),
        );
        let options = DriverOptions {
            ready_timeout: Duration::from_millis(300),
            ..fast_options()
        };
        let registry = ProcessRegistry::default();
        let mut driver = PtyDriver::new(profile, options).with_registry(registry.clone());

        match driver.start(None) {
            Err(DriverError::ReadinessTimeout { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_millis(300));
            }
            other => panic!("Expected ReadinessTimeout, got {other:?}"),
        }
        assert_eq!(driver.state(), DriverState::Terminated);
        assert!(registry.is_empty(), "killed child must leave the registry");
    }

    #[test]
    fn death_during_startup_is_an_unexpected_exit() {
        let profile: Arc<dyn EditorProfile> = Arc::new(CustomProfile::new(
            "dies",
            "/bin/sh",
            vec!["-c".to_string(), "exit 3".to_string()],
        ));
        let registry = ProcessRegistry::default();
        let mut driver = PtyDriver::new(profile, fast_options()).with_registry(registry.clone());

        let started_at = Instant::now();
        match driver.start(None) {
            Err(err @ DriverError::UnexpectedExit { code, .. }) => {
                assert_eq!(code, Some(3));
                assert!(!err.is_transient());
            }
            other => panic!("Expected UnexpectedExit, got {other:?}"),
        }
        assert!(started_at.elapsed() < fast_options().ready_timeout);
        assert_eq!(driver.state(), DriverState::Terminated);
        assert!(registry.is_empty());
    }

    #[test]
    fn spawn_failure_is_reported() {
        let profile: Arc<dyn EditorProfile> = Arc::new(CustomProfile::new(
            "missing",
            "./this_command_does_not_exist_ever_12345",
            Vec::new(),
        ));
        let mut driver = PtyDriver::new(profile, fast_options());
        match driver.start(None) {
            Err(DriverError::Spawn { editor, .. }) => assert_eq!(editor, "missing"),
            other => panic!("Expected Spawn error, got {other:?}"),
        }
        assert_eq!(driver.state(), DriverState::Terminated);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut driver = PtyDriver::new(shell_target("ignore_input.sh"), fast_options());
        driver.start(None).unwrap();
        driver.cleanup();
        driver.cleanup();
        assert!(driver.pid().is_none());
        assert!(!driver.is_alive());
        assert!(matches!(
            driver.send("x", Duration::ZERO),
            Err(DriverError::NotRunning { .. })
        ));
    }

    #[test]
    fn read_returns_decoded_output() {
        let mut driver = PtyDriver::new(shell_target("well_behaved.sh"), fast_options());
        driver.start(None).unwrap();
        driver.send("abc<CR>", Duration::ZERO).unwrap();
        let echoed = driver.read(Duration::from_millis(200)).unwrap();
        assert!(echoed.contains("abc"), "expected echo, got {echoed:?}");
        driver.quit(true).unwrap();
    }
}
