//! ptywrap - run a command inside a pseudo-terminal.
//!
//! The child process is attached to a PTY (Unix) or a ConPTY pseudo-console
//! (Windows), so it behaves as if it were talking to an interactive terminal
//! even when ptywrap's own stdin/stdout are redirected to files or pipes.
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Pty           (platform backend: Unix PTY master / Windows ConPTY)
//! ├── ChildTracker  (exit disposition, recorded exactly once)
//! └── relay         (byte shuttle between stdio and the PTY)
//!     └── QueryScanner (answers DSR/DA queries on the interpreting backend)
//! ```
//!
//! Data flow: external input -> relay -> child input channel -> child;
//! child -> child output channel -> relay -> query scanner -> external
//! output. Synthetic query replies are fed back to the child input channel,
//! never into the external output.

pub mod config;
pub mod error;
pub mod pty;
pub mod query;
pub mod relay;
pub mod session;
pub mod term;

pub use error::{Error, Result};
pub use pty::{Pty, PtySize};
pub use session::{Disposition, Session};
