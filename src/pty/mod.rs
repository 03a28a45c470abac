//! Pseudo-terminal backends.
//!
//! Two variants, selected at compile time:
//!
//! - **unix**: a classic PTY master/slave pair. The master is a transparent
//!   byte pipe; nothing between the relay and the child interprets the
//!   stream, so status queries the child emits simply pass through.
//! - **conpty**: the Windows pseudo-console. ConPTY hosts an interpreting
//!   agent that parses the stream and emits status queries of its own,
//!   which the relay must answer (see [`crate::query`]).
//!
//! Both expose the same surface: `open`, `spawn`, `resize`, blocking
//! `read`/`write_all` on the two logical channels, and an
//! `INTERPRETS_STREAM` constant the relay uses to decide whether the query
//! scanner must run.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::Pty;

#[cfg(windows)]
mod conpty;
#[cfg(windows)]
pub use conpty::Pty;

/// Terminal window size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub cols: u16,
    pub rows: u16,
}

impl PtySize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_size_is_80x24() {
        let size = PtySize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }
}
