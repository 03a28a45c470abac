//! Controlling-terminal handling for the relay process itself.

use std::io::stdout;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use crossterm::tty::IsTty;
use tracing::warn;

use crate::error::Error;
use crate::pty::PtySize;

/// Puts the controlling terminal into raw mode for the lifetime of the
/// guard, so keystrokes reach the child unmangled. Restored on drop, which
/// runs before the exit report is printed.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn enable() -> Self {
        match enable_raw_mode() {
            Ok(()) => Self { active: true },
            Err(e) => {
                warn!("could not enable raw mode: {e}");
                Self { active: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = disable_raw_mode() {
                warn!(
                    "{}",
                    Error::Teardown(format!("could not restore terminal mode: {e}"))
                );
            }
        }
    }
}

/// Size for the child's terminal: the controlling terminal's current size
/// when there is one, otherwise `fallback`.
pub fn detect_size(fallback: PtySize) -> PtySize {
    if stdout().is_tty() {
        if let Ok((cols, rows)) = size() {
            return PtySize::new(cols, rows);
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_size_has_a_fallback() {
        let size = detect_size(PtySize::new(132, 50));
        assert!(size.cols > 0 && size.rows > 0);
    }
}
