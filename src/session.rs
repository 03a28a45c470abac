//! Session control: child lifecycle tracking and teardown ordering.
//!
//! Startup order is allocate -> launch -> relay; teardown is observe child
//! exit -> release the backend (forcing the output direction to see
//! end-of-stream) -> wait out the relay with a bounded grace period ->
//! cancel any still-blocked input read -> report the disposition. Teardown
//! failures are logged and never stop the disposition from being reported.

use std::fmt;

use tracing::debug;

use crate::error::Result;
use crate::pty::{Pty, PtySize};

/// Final outcome of the child process, recorded exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Normal exit with the given status code.
    Exited(i32),
    /// Terminated by a signal (Unix only).
    Signaled { signal: i32, core_dumped: bool },
}

impl Disposition {
    /// The process exit code the relay itself should report: the child's
    /// code verbatim, or the conventional 128-plus-signal sentinel.
    pub fn exit_code(&self) -> i32 {
        match *self {
            Disposition::Exited(code) => code,
            Disposition::Signaled { signal, .. } => 128 + signal,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Disposition::Exited(code) => write!(f, "exited with status {code}"),
            Disposition::Signaled { signal, core_dumped } => {
                write!(f, "killed by signal {signal} ({})", signal_name(signal))?;
                if core_dumped {
                    write!(f, " (core dumped)")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> &'static str {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str())
        .unwrap_or("unknown")
}

#[cfg(not(unix))]
fn signal_name(_signal: i32) -> &'static str {
    "unknown"
}

/// Observes child termination and records the disposition exactly once.
///
/// No SIGCHLD handler: the relay loop polls `try_reap` on its tick, and
/// the controller falls back to a blocking `wait` if the loop ended first.
/// The recorded `Option` is the one-shot gate against double recording.
pub struct ChildTracker {
    #[cfg(unix)]
    pid: nix::unistd::Pid,
    #[cfg(windows)]
    process: windows::Win32::Foundation::HANDLE,
    disposition: Option<Disposition>,
}

#[cfg(unix)]
impl ChildTracker {
    pub fn new(pid: nix::unistd::Pid) -> Self {
        Self {
            pid,
            disposition: None,
        }
    }

    /// Non-blocking check; records and returns the disposition when the
    /// child has terminated.
    pub fn try_reap(&mut self) -> Option<Disposition> {
        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

        if self.disposition.is_some() {
            return self.disposition;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => None,
            Ok(status) => {
                self.disposition = disposition_from_status(status);
                self.disposition
            }
            Err(_) => None,
        }
    }

    /// Blocking wait; the disposition is recorded at most once no matter
    /// how often this races with `try_reap`.
    pub fn wait(&mut self) -> Disposition {
        use nix::sys::wait::waitpid;

        if let Some(disposition) = self.disposition {
            return disposition;
        }
        let disposition = match waitpid(self.pid, None) {
            Ok(status) => disposition_from_status(status).unwrap_or(Disposition::Exited(1)),
            Err(e) => {
                tracing::warn!("waitpid failed: {e}");
                Disposition::Exited(1)
            }
        };
        self.disposition = Some(disposition);
        disposition
    }
}

#[cfg(unix)]
fn disposition_from_status(status: nix::sys::wait::WaitStatus) -> Option<Disposition> {
    use nix::sys::wait::WaitStatus;

    match status {
        WaitStatus::Exited(_, code) => Some(Disposition::Exited(code)),
        WaitStatus::Signaled(_, signal, core_dumped) => Some(Disposition::Signaled {
            signal: signal as i32,
            core_dumped,
        }),
        // Stopped/continued: the child is still alive.
        _ => None,
    }
}

#[cfg(windows)]
impl ChildTracker {
    pub fn new(process: windows::Win32::Foundation::HANDLE) -> Self {
        Self {
            process,
            disposition: None,
        }
    }

    pub fn try_reap(&mut self) -> Option<Disposition> {
        use windows::Win32::Foundation::WAIT_OBJECT_0;
        use windows::Win32::System::Threading::WaitForSingleObject;

        if self.disposition.is_some() {
            return self.disposition;
        }
        let signaled = unsafe { WaitForSingleObject(self.process, 0) } == WAIT_OBJECT_0;
        if signaled {
            self.disposition = Some(Disposition::Exited(self.exit_code()));
        }
        self.disposition
    }

    pub fn wait(&mut self) -> Disposition {
        use windows::Win32::System::Threading::{WaitForSingleObject, INFINITE};

        if let Some(disposition) = self.disposition {
            return disposition;
        }
        unsafe { WaitForSingleObject(self.process, INFINITE) };
        let disposition = Disposition::Exited(self.exit_code());
        self.disposition = Some(disposition);
        disposition
    }

    fn exit_code(&self) -> i32 {
        use windows::Win32::System::Threading::GetExitCodeProcess;

        let mut code: u32 = 1;
        unsafe {
            if GetExitCodeProcess(self.process, &mut code).is_err() {
                tracing::warn!("GetExitCodeProcess failed");
                code = 1;
            }
        }
        code as i32
    }
}

/// A relay session: the backend, the attached child, and its tracker.
#[cfg(unix)]
pub struct Session {
    pty: Pty,
    tracker: ChildTracker,
}

#[cfg(unix)]
impl Session {
    /// Allocate the backend and launch the child. A launch failure releases
    /// the freshly allocated channels before returning.
    pub fn launch(command: &str, args: &[String], size: PtySize, term: &str) -> Result<Self> {
        let mut pty = Pty::open(size)?;
        // On error the Pty drops here, closing both ends.
        let pid = pty.spawn(command, args, term)?;
        Ok(Self {
            pty,
            tracker: ChildTracker::new(pid),
        })
    }

    /// Run the relay to completion and report the disposition.
    ///
    /// `input` is the external input source (`None` runs output-only, as
    /// the tests do); `output` receives the relayed child output.
    pub fn run(
        self,
        input: Option<std::os::fd::BorrowedFd<'_>>,
        output: &mut dyn std::io::Write,
        watch_resize: bool,
    ) -> Disposition {
        let Session { pty, mut tracker } = self;
        if let Err(e) = crate::relay::run(&pty, input, output, &mut tracker, watch_resize) {
            // An output-direction channel error means the child side is
            // gone; it ends the relay, never the disposition report.
            debug!("relay ended: {e}");
        }
        let disposition = tracker.wait();
        // Backend release: master closes when the Pty drops. The relay has
        // already drained the output direction by this point.
        drop(pty);
        disposition
    }
}

#[cfg(windows)]
pub struct Session {
    pty: std::sync::Arc<Pty>,
    tracker: ChildTracker,
}

#[cfg(windows)]
impl Session {
    pub fn launch(command: &str, args: &[String], size: PtySize, term: &str) -> Result<Self> {
        let mut pty = Pty::open(size)?;
        // On error the Pty drops here, releasing the pseudo-console.
        pty.spawn(command, args, term)?;
        let process = pty.process_handle().ok_or_else(|| crate::error::Error::Launch {
            command: command.to_string(),
            reason: "no process handle after launch".to_string(),
        })?;
        Ok(Self {
            pty: std::sync::Arc::new(pty),
            tracker: ChildTracker::new(process),
        })
    }

    /// Run the relay worker threads, block until the child exits, then
    /// tear down: release the console (forces output end-of-stream), give
    /// the workers a bounded grace period, cancel a still-blocked input
    /// read, and report the disposition.
    pub fn run(
        self,
        input: Option<crate::relay::ConsoleInput>,
        output: Box<dyn std::io::Write + Send>,
        pace: std::time::Duration,
        grace: std::time::Duration,
    ) -> Disposition {
        let Session { pty, mut tracker } = self;
        let workers = crate::relay::spawn(std::sync::Arc::clone(&pty), input, output, pace);
        let disposition = tracker.wait();
        // Output must drain before the console is gone for good, but
        // closing the HPCON is what breaks the reader's blocking ReadFile:
        // ConPTY flushes its queued output into the pipe first.
        pty.release();
        workers.join(&pty, grace);
        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_passthrough() {
        assert_eq!(Disposition::Exited(0).exit_code(), 0);
        assert_eq!(Disposition::Exited(7).exit_code(), 7);
    }

    #[test]
    fn signal_exit_code_is_offset() {
        let d = Disposition::Signaled {
            signal: 15,
            core_dumped: false,
        };
        assert_eq!(d.exit_code(), 143);
    }

    #[cfg(unix)]
    #[test]
    fn signal_display_names_the_signal() {
        let d = Disposition::Signaled {
            signal: 9,
            core_dumped: false,
        };
        assert_eq!(d.to_string(), "killed by signal 9 (SIGKILL)");
    }
}
