//! Error types for the relay engine.

use std::io;

use thiserror::Error;

/// Relay error taxonomy.
///
/// `Allocation` and `Launch` are fatal to startup. A `Channel` error on the
/// child-output direction ends the relay loop (the child is gone); on the
/// input direction it only stops input forwarding. `Teardown` errors are
/// logged and never escalated, so the exit disposition is always reported.
#[derive(Error, Debug)]
pub enum Error {
    /// The OS refused to create the pseudo-terminal.
    #[error("failed to allocate pseudo-terminal: {0}")]
    Allocation(String),

    /// The child could not be launched (bad command, permissions).
    #[error("failed to launch {command}: {reason}")]
    Launch { command: String, reason: String },

    /// Read/write failure on a relay channel.
    #[error("relay channel error: {0}")]
    Channel(#[from] io::Error),

    /// Backend release or relay cancellation failed during shutdown.
    #[error("teardown error: {0}")]
    Teardown(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_become_channel_errors() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, Error::Channel(_)));
        assert_eq!(err.to_string(), "relay channel error: gone");
    }
}
