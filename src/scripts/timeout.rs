//! Execution Timeout Management
//!
//! This module provides the timeout policy for script execution and the
//! termination sequence used when a child overstays it or the caller cancels:
//!
//! 1. ask the child to stop (SIGTERM to its process group on Unix)
//! 2. wait up to the grace period
//! 3. force-kill (SIGKILL to the process group) if it is still alive
//! 4. reap the child
//!
//! On Unix the executor starts every child in its own process group so the
//! signals also reach anything the script spawned.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::time;
use tracing::{debug, warn};

/// Default execution limit
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default delay between the polite and the forced stop
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2000;

/// Execution timeout configuration
///
/// Timeouts are enforced to prevent scripts from hanging indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    /// Maximum wall-clock time for one execution
    duration: Duration,

    /// Time a child gets to exit after being asked to
    grace_period: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout with the default grace period
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use scriptgate::scripts::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration(), Duration::from_secs(30));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
        }
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Set the grace period
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Get the grace period
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Stop a running child and reap it
    ///
    /// Returns the child's final status. Never returns before the child has
    /// been waited on unless waiting itself fails.
    pub async fn terminate(&self, child: &mut Child) -> io::Result<ExitStatus> {
        // None once the child has been reaped; nothing left to signal then.
        let pid = child.id();

        debug!(pid = ?pid, "Requesting child termination");
        request_termination(child, pid);

        match time::timeout(self.grace_period, reap_with_group(child, pid)).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    pid = ?pid,
                    grace_ms = self.grace_period.as_millis() as u64,
                    "Child ignored termination request, killing"
                );
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                // Ignore: the child may have exited between the two steps.
                let _ = child.start_kill();
                child.wait().await
            }
        }
    }
}

/// Wait for `child` to exit, then SIGKILL what is left of its process group
///
/// On Linux the group is killed while the exited leader is still unreaped,
/// so the group id cannot have been handed out again. Elsewhere the kill
/// follows the reap.
pub(crate) async fn reap_with_group(child: &mut Child, pid: Option<u32>) -> io::Result<ExitStatus> {
    #[cfg(target_os = "linux")]
    {
        if let Some(pid) = pid {
            if let Err(err) = tokio::task::spawn_blocking(move || wait_exited_unreaped(pid)).await {
                debug!(pid, error = %err, "Exit watcher failed");
            }
            kill_process_group(pid);
            return child.wait().await;
        }
    }

    let status = child.wait().await;
    if let Some(pid) = pid {
        kill_process_group(pid);
    }
    status
}

/// Block until `pid` has exited, leaving it waitable
#[cfg(target_os = "linux")]
fn wait_exited_unreaped(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };

    loop {
        match waitid(
            Id::Pid(Pid::from_raw(raw)),
            WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT,
        ) {
            Ok(_) => return,
            Err(Errno::EINTR) => continue,
            // ECHILD: already reaped by a terminate racing this watcher.
            Err(err) => {
                debug!(pid, error = %err, "waitid failed");
                return;
            }
        }
    }
}

#[cfg(unix)]
fn request_termination(_child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

/// SIGKILL whatever is left in the child's process group
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pid: u32) {}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };

    // ESRCH just means the group is already gone.
    if let Err(err) = killpg(Pid::from_raw(raw), signal) {
        debug!(pid, ?signal, error = %err, "killpg failed");
    }
}
