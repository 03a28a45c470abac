//! Unix PTY backend.
//!
//! Allocates a master/slave pair with `openpty`, then forks: the child
//! creates a new session, takes the slave as its controlling terminal, dups
//! it over stdio and execs the command. The master fd is both logical
//! channels at once (child input and child output), and nothing interprets
//! the bytes flowing through it.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;

use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{access, dup2, execv, fork, setsid, AccessFlags, ForkResult, Pid};
use tracing::debug;

use crate::error::{Error, Result};
use crate::pty::PtySize;

pub struct Pty {
    master: OwnedFd,
    /// Dup of the master for std I/O; `&File` is both `Read` and `Write`.
    file: File,
    /// Slave end, held only until the child takes it over.
    slave: Option<OwnedFd>,
    child: Option<Pid>,
}

impl Pty {
    /// Whether this backend actively interprets the escape stream. A Unix
    /// PTY is a transparent byte pipe: status queries pass through to the
    /// external output unanswered, and nothing hangs waiting for a reply.
    pub const INTERPRETS_STREAM: bool = false;

    pub fn open(size: PtySize) -> Result<Self> {
        let ws = Winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let ends = openpty(Some(&ws), None).map_err(|e| Error::Allocation(e.to_string()))?;
        let file = File::from(
            ends.master
                .try_clone()
                .map_err(|e| Error::Allocation(e.to_string()))?,
        );
        Ok(Self {
            master: ends.master,
            file,
            slave: Some(ends.slave),
            child: None,
        })
    }

    /// Fork and exec `command` attached to the slave side. On success the
    /// parent's copy of the slave is closed and the child pid returned; on
    /// failure the caller still owns the allocated channels and is
    /// responsible for releasing them (dropping the `Pty` does).
    pub fn spawn(&mut self, command: &str, args: &[String], term: &str) -> Result<Pid> {
        let program = resolve_program(command)?;

        // Everything the child needs is built before fork; only
        // async-signal-safe calls happen between fork and exec.
        let launch_err = |reason: String| Error::Launch {
            command: command.to_string(),
            reason,
        };
        let mut argv = vec![CString::new(command).map_err(|e| launch_err(e.to_string()))?];
        for arg in args {
            argv.push(CString::new(arg.as_str()).map_err(|e| launch_err(e.to_string()))?);
        }
        let term_env =
            CString::new(format!("TERM={term}")).map_err(|e| launch_err(e.to_string()))?;

        let slave = self
            .slave
            .take()
            .ok_or_else(|| launch_err("child already launched".to_string()))?;
        let slave_raw = slave.as_raw_fd();

        match unsafe { fork() }.map_err(|e| launch_err(e.to_string()))? {
            ForkResult::Parent { child } => {
                drop(slave);
                debug!(pid = child.as_raw(), command, "child launched");
                self.child = Some(child);
                Ok(child)
            }
            ForkResult::Child => {
                // New session, slave becomes the controlling terminal.
                if setsid().is_err() {
                    unsafe { libc::_exit(1) };
                }
                unsafe {
                    if libc::ioctl(slave_raw, libc::TIOCSCTTY as libc::c_ulong, 0) < 0 {
                        libc::_exit(1);
                    }
                }
                if dup2(slave_raw, libc::STDIN_FILENO).is_err()
                    || dup2(slave_raw, libc::STDOUT_FILENO).is_err()
                    || dup2(slave_raw, libc::STDERR_FILENO).is_err()
                {
                    unsafe { libc::_exit(1) };
                }
                if slave_raw > 2 {
                    drop(slave);
                }
                unsafe {
                    libc::putenv(term_env.into_raw());
                }
                let _ = execv(&program, &argv);
                // exec only returns on failure.
                unsafe { libc::_exit(127) };
            }
        }
    }

    /// Propagate a new window size, best effort. Failures are ignored: an
    /// unresizable backend is not an error.
    pub fn resize(&self, size: PtySize) {
        let ws = Winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        unsafe {
            libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ as libc::c_ulong, &ws);
        }
        if let Some(pid) = self.child {
            let _ = kill(pid, Signal::SIGWINCH);
        }
    }

    /// Read child output from the master. A PTY master reports `EIO` once
    /// the slave side is fully closed; that is end-of-stream here.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match (&self.file).read(buf) {
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            result => result,
        }
    }

    /// Write into the child's input channel.
    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        (&self.file).write_all(buf)
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }
}

/// PATH lookup before fork, so a bad command surfaces as a `Launch` error
/// in the parent instead of a bare exit-127 from the child.
fn resolve_program(command: &str) -> Result<CString> {
    let not_found = || Error::Launch {
        command: command.to_string(),
        reason: "command not found".to_string(),
    };

    let path: PathBuf = if command.contains('/') {
        let path = PathBuf::from(command);
        if !path.is_file() {
            return Err(not_found());
        }
        path
    } else {
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(command))
                    .find(|candidate| candidate.is_file())
            })
            .unwrap_or(None)
            .ok_or_else(not_found)?
    };

    if access(&path, AccessFlags::X_OK).is_err() {
        return Err(Error::Launch {
            command: command.to_string(),
            reason: "permission denied".to_string(),
        });
    }

    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes()).map_err(|e| Error::Launch {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_allocates_master_and_slave() {
        let pty = Pty::open(PtySize::default()).unwrap();
        assert!(pty.master.as_raw_fd() >= 0);
        assert!(pty.slave.is_some());
    }

    #[test]
    fn resolve_finds_sh() {
        assert!(resolve_program("sh").is_ok());
        assert!(resolve_program("/bin/sh").is_ok());
    }

    #[test]
    fn resolve_rejects_missing_command() {
        let err = resolve_program("definitely-not-a-real-command-ptywrap").unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[test]
    fn resize_is_best_effort() {
        let pty = Pty::open(PtySize::default()).unwrap();
        // No child yet; must not fail or panic.
        pty.resize(PtySize::new(120, 40));
    }
}
