//! The I/O relay loop: shuttles bytes between the external endpoints and
//! the pseudo-terminal.
//!
//! Two independent directions. Inbound moves external input to the child
//! input channel; outbound moves child output through the query scanner to
//! the external output. Bytes stay ordered within a direction; interleaving
//! between directions is nondeterministic, like a real terminal.
//!
//! End-of-stream on the child-output side terminates the loop. End-of-stream
//! on the external input only stops input forwarding; the session keeps
//! relaying output until the child is done.
//!
//! One scheduling model per backend: Unix multiplexes both directions on a
//! single thread with `poll` (woken on a short tick to reconcile the child
//! tracker), Windows runs two blocking worker threads because there is no
//! way to wait on a console handle and a pipe together.

use std::io::{self, Write};

use crate::pty::Pty;
use crate::query::QueryScanner;

pub const BUF_SIZE: usize = 4096;

/// Pass one chunk of child output to the external output, answering any
/// status queries in it when the backend is the interpreting kind.
/// Synthetic replies go back into the child input channel, never into the
/// external output; reply write failures are ignored (the output direction
/// decides when the child is gone).
fn forward_chunk(
    pty: &Pty,
    scanner: &mut QueryScanner,
    chunk: &[u8],
    output: &mut dyn Write,
) -> io::Result<()> {
    if Pty::INTERPRETS_STREAM {
        scanner.scan(chunk, |reply| {
            let _ = pty.write_all(reply.as_bytes());
        });
    }
    output.write_all(chunk)?;
    output.flush()
}

#[cfg(unix)]
pub use unix_loop::run;

#[cfg(unix)]
mod unix_loop {
    use std::os::fd::{AsRawFd, BorrowedFd};

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use tracing::debug;

    use super::*;
    use crate::pty::PtySize;
    use crate::session::ChildTracker;

    /// Tick that bounds how long the loop waits before reconciling the
    /// child tracker and the window size.
    const TICK_MS: u16 = 100;

    /// Single-threaded relay over `poll`. Returns when the child-output
    /// direction reaches end-of-stream, or once the tracker has seen the
    /// child exit and the output is drained. An outbound failure surfaces
    /// as [`crate::error::Error::Channel`] and ends the relay (the child
    /// side is gone); inbound failures only stop input forwarding.
    pub fn run(
        pty: &Pty,
        input: Option<BorrowedFd<'_>>,
        output: &mut dyn Write,
        tracker: &mut ChildTracker,
        watch_resize: bool,
    ) -> crate::error::Result<()> {
        let mut buf = [0u8; BUF_SIZE];
        let mut scanner = QueryScanner::new();
        let mut input_open = input.is_some();
        let mut last_size: Option<PtySize> = None;

        loop {
            let child_gone = tracker.try_reap().is_some();

            // Window-size propagation, best effort, once per tick.
            if watch_resize {
                if let Ok((cols, rows)) = crossterm::terminal::size() {
                    let size = PtySize::new(cols, rows);
                    if last_size != Some(size) {
                        pty.resize(size);
                        last_size = Some(size);
                    }
                }
            }

            let mut fds = Vec::with_capacity(2);
            fds.push(PollFd::new(pty.master_fd(), PollFlags::POLLIN));
            if input_open {
                if let Some(fd) = input {
                    fds.push(PollFd::new(fd, PollFlags::POLLIN));
                }
            }

            match poll(&mut fds, PollTimeout::from(TICK_MS)) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e).into()),
            }

            let master_events = fds[0].revents().unwrap_or(PollFlags::empty());
            let input_events = fds
                .get(1)
                .and_then(|fd| fd.revents())
                .unwrap_or(PollFlags::empty());

            if master_events.contains(PollFlags::POLLIN) {
                let n = pty.read(&mut buf)?;
                if n == 0 {
                    // Authoritative termination signal for the whole loop.
                    break;
                }
                forward_chunk(pty, &mut scanner, &buf[..n], output)?;
            } else if master_events.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                // Child side closed; pull whatever the kernel still
                // buffers before stopping.
                drain(pty, &mut scanner, output, &mut buf)?;
                break;
            }

            if let Some(fd) = input {
                if input_events.contains(PollFlags::POLLIN) {
                    match read_fd(fd, &mut buf) {
                        // External-input EOF: stop forwarding, keep the
                        // session and the output direction alive.
                        Ok(0) => input_open = false,
                        Ok(n) => {
                            if let Err(e) = pty.write_all(&buf[..n]) {
                                // Inbound channel errors are non-fatal.
                                debug!("input forwarding stopped: {e}");
                                input_open = false;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            debug!("input forwarding stopped: {e}");
                            input_open = false;
                        }
                    }
                } else if input_events.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                    input_open = false;
                }
            }

            if child_gone {
                drain(pty, &mut scanner, output, &mut buf)?;
                break;
            }
        }
        Ok(())
    }

    /// Forward everything still readable on the master without blocking.
    fn drain(
        pty: &Pty,
        scanner: &mut QueryScanner,
        output: &mut dyn Write,
        buf: &mut [u8],
    ) -> io::Result<()> {
        loop {
            let mut fds = [PollFd::new(pty.master_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(0) => break,
                Ok(_) => {
                    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                    if !revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
                        break;
                    }
                    let n = pty.read(buf)?;
                    if n == 0 {
                        break;
                    }
                    forward_chunk(pty, scanner, &buf[..n], output)?;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
        Ok(())
    }

    fn read_fd(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::read(
                fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

#[cfg(windows)]
pub use windows_loop::{spawn, ConsoleInput, Workers};

#[cfg(windows)]
mod windows_loop {
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    use tracing::{debug, warn};
    use windows::core::HRESULT;
    use windows::Win32::Foundation::{ERROR_BROKEN_PIPE, ERROR_OPERATION_ABORTED, HANDLE};
    use windows::Win32::Storage::FileSystem::ReadFile;
    use windows::Win32::System::Console::{GetStdHandle, STD_INPUT_HANDLE};
    use windows::Win32::System::IO::CancelSynchronousIo;

    use super::*;
    use crate::error::Error;

    /// The external input source for the inbound worker.
    pub struct ConsoleInput(HANDLE);

    // Safety: the handle is only read from the inbound worker thread.
    unsafe impl Send for ConsoleInput {}

    impl ConsoleInput {
        pub fn stdin() -> Option<Self> {
            let handle = unsafe { GetStdHandle(STD_INPUT_HANDLE) }.ok()?;
            if handle.is_invalid() {
                return None;
            }
            Some(Self(handle))
        }

        /// Blocking read. `Ok(0)` is end-of-stream or a canceled read.
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut read: u32 = 0;
            unsafe {
                match ReadFile(self.0, Some(buf), Some(&mut read), None) {
                    Ok(()) => Ok(read as usize),
                    Err(e) if e.code() == HRESULT::from_win32(ERROR_BROKEN_PIPE.0) => Ok(0),
                    Err(e) if e.code() == HRESULT::from_win32(ERROR_OPERATION_ABORTED.0) => Ok(0),
                    Err(e) => Err(io::Error::from_raw_os_error(e.code().0 as i32)),
                }
            }
        }
    }

    /// Handles of the two relay worker threads.
    pub struct Workers {
        outbound: JoinHandle<()>,
        inbound: Option<JoinHandle<()>>,
    }

    /// Start the two blocking workers. The outbound worker owns the query
    /// scanner (single writer); synthetic replies go straight back into
    /// the child input pipe.
    pub fn spawn(
        pty: Arc<Pty>,
        input: Option<ConsoleInput>,
        mut output: Box<dyn Write + Send>,
        pace: Duration,
    ) -> Workers {
        let outbound = {
            let pty = Arc::clone(&pty);
            thread::spawn(move || {
                let mut scanner = QueryScanner::new();
                let mut buf = [0u8; BUF_SIZE];
                loop {
                    match pty.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if forward_chunk(&pty, &mut scanner, &buf[..n], output.as_mut())
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            // Treated as "child gone"; ends the relay.
                            debug!("output channel error: {e}");
                            break;
                        }
                    }
                }
            })
        };

        let inbound = input.map(|console| {
            thread::spawn(move || {
                let mut buf = [0u8; BUF_SIZE];
                loop {
                    match console.read(&mut buf) {
                        // EOF or canceled: stop forwarding input. The
                        // session keeps running on the outbound side.
                        Ok(0) => break,
                        Ok(n) => {
                            if let Err(e) = write_paced(&pty, &buf[..n], pace) {
                                debug!("input forwarding stopped: {e}");
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("input forwarding stopped: {e}");
                            break;
                        }
                    }
                }
            })
        });

        Workers { outbound, inbound }
    }

    /// Forward input to the child, pausing briefly after each ESC byte.
    /// ConPTY's own parser cannot tell a standalone Escape keypress from
    /// the start of a multi-byte sequence without a gap after the ESC;
    /// without the pause it swallows lone Escapes. Correctness, not a
    /// performance knob.
    fn write_paced(pty: &Pty, bytes: &[u8], pace: Duration) -> io::Result<()> {
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|&b| b == 0x1b) {
            pty.write_all(&rest[..=pos])?;
            thread::sleep(pace);
            rest = &rest[pos + 1..];
        }
        if !rest.is_empty() {
            pty.write_all(rest)?;
        }
        Ok(())
    }

    impl Workers {
        /// Teardown, called after the pseudo-console has been released.
        /// Releasing breaks the outbound reader once ConPTY's queued
        /// output has drained into the pipe; the inbound reader may still
        /// be blocked on the console and needs an explicit cancel, since
        /// stream closure alone never unblocks it.
        pub fn join(self, pty: &Pty, grace: Duration) {
            if !wait_finished(&self.outbound, grace) {
                pty.cancel_output();
                let _ = wait_finished(&self.outbound, Duration::from_millis(200));
            }
            if self.outbound.is_finished() {
                let _ = self.outbound.join();
            } else {
                warn!(
                    "{}",
                    Error::Teardown("output relay did not stop within the grace period".into())
                );
            }

            if let Some(inbound) = self.inbound {
                cancel_blocked_read(&inbound);
                if wait_finished(&inbound, grace) {
                    let _ = inbound.join();
                } else {
                    warn!(
                        "{}",
                        Error::Teardown("input relay did not stop within the grace period".into())
                    );
                }
            }
        }
    }

    fn wait_finished(handle: &JoinHandle<()>, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Unblock a worker stuck in a synchronous `ReadFile`.
    fn cancel_blocked_read(handle: &JoinHandle<()>) {
        use std::os::windows::io::AsRawHandle;

        let thread = HANDLE(handle.as_raw_handle());
        unsafe {
            if let Err(e) = CancelSynchronousIo(thread) {
                // Usually means the thread already finished.
                debug!("CancelSynchronousIo: {e}");
            }
        }
    }
}
